//! Stable declaration of a frame's shape

use serde::{Deserialize, Serialize};

use crate::data_model::Role;

/// The names and roles of a data frame's columns, without the data.
///
/// Schemas are extracted when a pipeline is fitted and frozen into it; the
/// SQL transpiler and the scoring paths resolve column names through them
/// rather than through live frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub categoricals: Vec<String>,
    pub discretes: Vec<String>,
    pub join_keys: Vec<String>,
    pub numericals: Vec<String>,
    pub targets: Vec<String>,
    pub text: Vec<String>,
    pub time_stamps: Vec<String>,
    pub unused_floats: Vec<String>,
    pub unused_strings: Vec<String>,
}

impl Schema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// All `(role, name)` pairs, in role-group order.
    pub fn columns(&self) -> Vec<(Role, &str)> {
        let mut cols = Vec::new();
        let groups: [(Role, &Vec<String>); 9] = [
            (Role::Categorical, &self.categoricals),
            (Role::Discrete, &self.discretes),
            (Role::JoinKey, &self.join_keys),
            (Role::Numerical, &self.numericals),
            (Role::Target, &self.targets),
            (Role::Text, &self.text),
            (Role::TimeStamp, &self.time_stamps),
            (Role::UnusedFloat, &self.unused_floats),
            (Role::UnusedString, &self.unused_strings),
        ];
        for (role, names) in groups {
            for name in names {
                cols.push((role, name.as_str()));
            }
        }
        cols
    }

    pub fn role_of(&self, colname: &str) -> Option<Role> {
        self.columns()
            .into_iter()
            .find(|(_, name)| *name == colname)
            .map(|(role, _)| role)
    }

    pub fn ncols(&self) -> usize {
        self.columns().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_and_roles() {
        let schema = Schema {
            name: "orders".to_string(),
            join_keys: vec!["customer_id".to_string()],
            numericals: vec!["price".to_string()],
            time_stamps: vec!["ts".to_string()],
            ..Default::default()
        };
        assert_eq!(schema.ncols(), 3);
        assert_eq!(schema.role_of("price"), Some(Role::Numerical));
        assert_eq!(schema.role_of("missing"), None);
    }
}
