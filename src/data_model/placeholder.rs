//! Placeholder tree describing the join graph

use serde::{Deserialize, Serialize};

use crate::error::{RelpropError, Result};

/// The declared cardinality of a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Relationship {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
    Propositionalization,
}

impl Relationship {
    /// Joins with at most one matching peripheral row are flattened into the
    /// population table during staging instead of being aggregated.
    pub fn is_flattened(&self) -> bool {
        matches!(self, Relationship::OneToOne | Relationship::ManyToOne)
    }
}

/// A node in the data model tree.
///
/// Each child entry describes one join: which key and time-stamp columns to
/// use on either side, the time window (memory/horizon) and the declared
/// relationship. The child-parallel vectors always have the same length as
/// `joined_tables`; this is checked on construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placeholder {
    name: String,
    joined_tables: Vec<Placeholder>,
    join_keys_used: Vec<String>,
    other_join_keys_used: Vec<String>,
    time_stamps_used: Vec<String>,
    other_time_stamps_used: Vec<String>,
    upper_time_stamps_used: Vec<String>,
    allow_lagged_targets: Vec<bool>,
    propositionalization: Vec<bool>,
    relationship: Vec<Relationship>,
    memory: Vec<f64>,
    horizon: Vec<f64>,
}

/// The join parameters for a single child, resolved from the parallel
/// vectors of a [`Placeholder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub join_key: String,
    pub other_join_key: String,
    pub time_stamp: Option<String>,
    pub other_time_stamp: Option<String>,
    pub upper_time_stamp: Option<String>,
    pub allow_lagged_targets: bool,
    pub memory: f64,
    pub horizon: f64,
}

impl Placeholder {
    /// A leaf node with no joined tables.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            joined_tables: Vec::new(),
            join_keys_used: Vec::new(),
            other_join_keys_used: Vec::new(),
            time_stamps_used: Vec::new(),
            other_time_stamps_used: Vec::new(),
            upper_time_stamps_used: Vec::new(),
            allow_lagged_targets: Vec::new(),
            propositionalization: Vec::new(),
            relationship: Vec::new(),
            memory: Vec::new(),
            horizon: Vec::new(),
        }
    }

    /// Adds a joined table. An empty `join_key` maps both sides onto the
    /// synthetic join key that staging injects, producing a cross join.
    /// `time_stamp`/`other_time_stamp` and `upper_time_stamp` may be empty
    /// strings when the join is not time-windowed. `memory <= 0` means an
    /// unbounded window.
    #[allow(clippy::too_many_arguments)]
    pub fn join(
        mut self,
        table: Placeholder,
        join_key: &str,
        other_join_key: &str,
        time_stamp: &str,
        other_time_stamp: &str,
        upper_time_stamp: &str,
        relationship: Relationship,
        memory: f64,
        horizon: f64,
        allow_lagged_targets: bool,
    ) -> Self {
        let join_key = if join_key.is_empty() {
            crate::data_model::macros::SYNTHETIC_JOIN_KEY
        } else {
            join_key
        };

        self.joined_tables.push(table);
        self.join_keys_used.push(join_key.to_string());
        self.other_join_keys_used
            .push(if other_join_key.is_empty() {
                join_key.to_string()
            } else {
                other_join_key.to_string()
            });
        self.time_stamps_used.push(time_stamp.to_string());
        self.other_time_stamps_used
            .push(if other_time_stamp.is_empty() {
                time_stamp.to_string()
            } else {
                other_time_stamp.to_string()
            });
        self.upper_time_stamps_used.push(upper_time_stamp.to_string());
        self.allow_lagged_targets.push(allow_lagged_targets);
        self.propositionalization
            .push(relationship == Relationship::Propositionalization);
        self.relationship.push(relationship);
        self.memory.push(memory);
        self.horizon.push(horizon);
        self
    }

    /// Validates the child-parallel vectors and checks that every joined
    /// table is declared in `peripheral_names`.
    pub fn check(&self, peripheral_names: &[String]) -> Result<()> {
        let n = self.joined_tables.len();

        let lengths = [
            self.join_keys_used.len(),
            self.other_join_keys_used.len(),
            self.time_stamps_used.len(),
            self.other_time_stamps_used.len(),
            self.upper_time_stamps_used.len(),
            self.allow_lagged_targets.len(),
            self.propositionalization.len(),
            self.relationship.len(),
            self.memory.len(),
            self.horizon.len(),
        ];

        if lengths.iter().any(|&l| l != n) {
            return Err(RelpropError::ShapeMismatch {
                expected: format!("{} entries per join attribute", n),
                actual: format!("{:?}", lengths),
            });
        }

        for child in &self.joined_tables {
            if !peripheral_names.contains(&child.name) {
                return Err(RelpropError::UserInput(format!(
                    "Data model refers to table '{}', but no such peripheral table was declared.",
                    child.name
                )));
            }
            child.check(peripheral_names)?;
        }

        Ok(())
    }

    /// Resolves the join parameters for child `ix`.
    pub fn join_spec(&self, ix: usize) -> JoinSpec {
        let opt = |s: &String| {
            if s.is_empty() {
                None
            } else {
                Some(s.clone())
            }
        };

        JoinSpec {
            join_key: self.join_keys_used[ix].clone(),
            other_join_key: self.other_join_keys_used[ix].clone(),
            time_stamp: opt(&self.time_stamps_used[ix]),
            other_time_stamp: opt(&self.other_time_stamps_used[ix]),
            upper_time_stamp: opt(&self.upper_time_stamps_used[ix]),
            allow_lagged_targets: self.allow_lagged_targets[ix],
            memory: self.memory[ix],
            horizon: self.horizon[ix],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn joined_tables(&self) -> &[Placeholder] {
        &self.joined_tables
    }

    pub fn num_joined(&self) -> usize {
        self.joined_tables.len()
    }

    pub fn relationship(&self, ix: usize) -> Relationship {
        self.relationship[ix]
    }

    /// Whether child `ix` should be handled by a nested propositionalization
    /// pass of its own rather than by subfeature recursion.
    pub fn is_propositionalization(&self, ix: usize) -> bool {
        self.propositionalization[ix]
    }

    /// A copy without the children flattened into the population table
    /// during staging; this is the tree the feature learner sees.
    pub fn without_flattened(&self) -> Placeholder {
        let mut out = Placeholder::new(&self.name);
        for (ix, child) in self.joined_tables.iter().enumerate() {
            if self.relationship[ix].is_flattened() {
                continue;
            }
            out.joined_tables.push(child.without_flattened());
            out.join_keys_used.push(self.join_keys_used[ix].clone());
            out.other_join_keys_used
                .push(self.other_join_keys_used[ix].clone());
            out.time_stamps_used.push(self.time_stamps_used[ix].clone());
            out.other_time_stamps_used
                .push(self.other_time_stamps_used[ix].clone());
            out.upper_time_stamps_used
                .push(self.upper_time_stamps_used[ix].clone());
            out.allow_lagged_targets.push(self.allow_lagged_targets[ix]);
            out.propositionalization.push(self.propositionalization[ix]);
            out.relationship.push(self.relationship[ix]);
            out.memory.push(self.memory[ix]);
            out.horizon.push(self.horizon[ix]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> Placeholder {
        Placeholder::new("population").join(
            Placeholder::new("orders"),
            "customer_id",
            "",
            "ts",
            "",
            "",
            Relationship::ManyToMany,
            0.0,
            0.0,
            false,
        )
    }

    #[test]
    fn test_check_passes() {
        let m = model();
        assert!(m.check(&["orders".to_string()]).is_ok());
    }

    #[test]
    fn test_check_unknown_peripheral() {
        let m = model();
        let err = m.check(&["payments".to_string()]).unwrap_err();
        assert!(err.to_string().contains("orders"));
    }

    #[test]
    fn test_join_spec_defaults_other_side() {
        let m = model();
        let spec = m.join_spec(0);
        assert_eq!(spec.other_join_key, "customer_id");
        assert_eq!(spec.other_time_stamp.as_deref(), Some("ts"));
        assert_eq!(spec.upper_time_stamp, None);
    }
}
