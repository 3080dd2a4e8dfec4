//! Tagged-record command parsing
//!
//! Commands arrive as JSON documents whose `type_` field selects the
//! operation. The discriminator is hand-written: the tag is read first,
//! then the payload deserializes into the matching record. Unknown tags are
//! user errors, never assertions. The TCP framing, Arrow transport and
//! database connectors live outside this crate; they hand finished JSON
//! documents to [`parse_command`].

use serde::{Deserialize, Serialize};

use crate::error::{RelpropError, Result};
use crate::fastprop::Hyperparameters;

/// Feature-learner variants that parse but are only available in the
/// enterprise edition.
const PREMIUM_FEATURE_LEARNERS: [&str; 4] = ["Fastboost", "Multirel", "Relboost", "RelMT"];

/// A parsed top-level command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    IsAlive,
    MonitorUrl,
    Shutdown,
    Pipeline(PipelineCommand),
    DataFrame(DataFrameCommand),
    Project(ProjectCommand),
}

/// Pipeline operations. The payload carries the pipeline name plus the
/// names of the frames to run against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineCommand {
    #[serde(skip)]
    pub operation: PipelineOperation,
    pub name: String,
    #[serde(default)]
    pub population_df: String,
    #[serde(default)]
    pub peripheral_dfs: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOperation {
    #[default]
    Check,
    Fit,
    Transform,
    Score,
    ToSql,
    Refresh,
    RefreshAll,
    Deploy,
    LiftCurve,
    RocCurve,
    PrecisionRecallCurve,
    ColumnImportances,
    FeatureImportances,
    FeatureCorrelations,
}

/// Data frame operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrameCommand {
    #[serde(skip)]
    pub operation: DataFrameOperation,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFrameOperation {
    #[default]
    Append,
    Delete,
    FromJson,
    Load,
    Save,
    Summarize,
}

/// Project operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectCommand {
    #[serde(skip)]
    pub operation: ProjectOperation,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectOperation {
    #[default]
    Load,
    Save,
    Delete,
}

/// Options for the subselection over features; `num_subselection` is a
/// historical alias accepted at the parser boundary only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubselectionOptions {
    #[serde(alias = "num_subselection")]
    pub subselection: usize,
}

fn tag_of(value: &serde_json::Value) -> Result<&str> {
    value
        .get("type_")
        .and_then(|t| t.as_str())
        .ok_or_else(|| RelpropError::UserInput("Command is missing the 'type_' field.".to_string()))
}

/// Parses the top-level command envelope.
pub fn parse_command(json: &str) -> Result<Command> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let tag = tag_of(&value)?;

    let parse_pipeline = |operation| -> Result<Command> {
        let mut command: PipelineCommand = serde_json::from_value(strip_tag(&value))?;
        command.operation = operation;
        Ok(Command::Pipeline(command))
    };

    match tag {
        "is_alive" => Ok(Command::IsAlive),
        "monitor_url" => Ok(Command::MonitorUrl),
        "shutdown" => Ok(Command::Shutdown),
        "Pipeline.check" => parse_pipeline(PipelineOperation::Check),
        "Pipeline.fit" => parse_pipeline(PipelineOperation::Fit),
        "Pipeline.transform" => parse_pipeline(PipelineOperation::Transform),
        "Pipeline.score" => parse_pipeline(PipelineOperation::Score),
        "Pipeline.to_sql" => parse_pipeline(PipelineOperation::ToSql),
        "Pipeline.refresh" => parse_pipeline(PipelineOperation::Refresh),
        "Pipeline.refresh_all" => parse_pipeline(PipelineOperation::RefreshAll),
        "Pipeline.deploy" => parse_pipeline(PipelineOperation::Deploy),
        "Pipeline.lift_curve" => parse_pipeline(PipelineOperation::LiftCurve),
        "Pipeline.roc_curve" => parse_pipeline(PipelineOperation::RocCurve),
        "Pipeline.precision_recall_curve" => {
            parse_pipeline(PipelineOperation::PrecisionRecallCurve)
        }
        "Pipeline.column_importances" => parse_pipeline(PipelineOperation::ColumnImportances),
        "Pipeline.feature_importances" => parse_pipeline(PipelineOperation::FeatureImportances),
        "Pipeline.feature_correlations" => parse_pipeline(PipelineOperation::FeatureCorrelations),
        _ if tag.starts_with("DataFrame.") => {
            let operation: DataFrameOperation =
                serde_json::from_value(serde_json::Value::String(
                    tag.trim_start_matches("DataFrame.").to_string(),
                ))
                .map_err(|_| unknown_tag(tag))?;
            let mut command: DataFrameCommand = serde_json::from_value(strip_tag(&value))?;
            command.operation = operation;
            Ok(Command::DataFrame(command))
        }
        _ if tag.starts_with("Project.") => {
            let operation: ProjectOperation = serde_json::from_value(serde_json::Value::String(
                tag.trim_start_matches("Project.").to_string(),
            ))
            .map_err(|_| unknown_tag(tag))?;
            let mut command: ProjectCommand = serde_json::from_value(strip_tag(&value))?;
            command.operation = operation;
            Ok(Command::Project(command))
        }
        _ => Err(unknown_tag(tag)),
    }
}

/// Parses a feature-learner declaration. `FastProp` yields its
/// hyperparameters; the premium learners parse cleanly but are rejected
/// with a dedicated error instead of a parse failure.
pub fn parse_feature_learner(value: &serde_json::Value) -> Result<Hyperparameters> {
    let tag = tag_of(value)?;

    if PREMIUM_FEATURE_LEARNERS.contains(&tag) {
        return Err(RelpropError::NotSupportedInCommunity(tag.to_string()));
    }

    if tag != "FastProp" {
        return Err(unknown_tag(tag));
    }

    let mut defaults = serde_json::to_value(Hyperparameters::default())?;
    if let (Some(defaults_map), Some(given)) = (defaults.as_object_mut(), value.as_object()) {
        for (key, val) in given {
            if key != "type_" {
                defaults_map.insert(key.clone(), val.clone());
            }
        }
    }

    Ok(serde_json::from_value(defaults)?)
}

fn strip_tag(value: &serde_json::Value) -> serde_json::Value {
    let mut copy = value.clone();
    if let Some(map) = copy.as_object_mut() {
        map.remove("type_");
    }
    copy
}

fn unknown_tag(tag: &str) -> RelpropError {
    RelpropError::UserInput(format!("Unknown command: '{}'.", tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_command("{\"type_\": \"is_alive\"}").unwrap(), Command::IsAlive);
        assert_eq!(parse_command("{\"type_\": \"shutdown\"}").unwrap(), Command::Shutdown);
    }

    #[test]
    fn test_pipeline_fit() {
        let json = r#"{
            "type_": "Pipeline.fit",
            "name": "p1",
            "population_df": "population",
            "peripheral_dfs": ["orders"]
        }"#;
        let Command::Pipeline(command) = parse_command(json).unwrap() else {
            panic!("expected a pipeline command");
        };
        assert_eq!(command.operation, PipelineOperation::Fit);
        assert_eq!(command.name, "p1");
        assert_eq!(command.peripheral_dfs, vec!["orders".to_string()]);
    }

    #[test]
    fn test_unknown_tag_is_user_error() {
        let err = parse_command("{\"type_\": \"Pipeline.explode\"}").unwrap_err();
        assert!(matches!(err, RelpropError::UserInput(_)));
        assert!(err.to_string().contains("Pipeline.explode"));
    }

    #[test]
    fn test_missing_tag() {
        let err = parse_command("{\"name\": \"p1\"}").unwrap_err();
        assert!(err.to_string().contains("type_"));
    }

    #[test]
    fn test_fastprop_declaration_parses() {
        let value = serde_json::json!({
            "type_": "FastProp",
            "num_features": 50,
            "delta_t": 3600.0,
            "max_lag": 4
        });
        let hyp = parse_feature_learner(&value).unwrap();
        assert_eq!(hyp.num_features, 50);
        assert_eq!(hyp.max_lag, 4);
    }

    #[test]
    fn test_premium_learners_rejected_cleanly() {
        for learner in ["Fastboost", "Multirel", "Relboost", "RelMT"] {
            let value = serde_json::json!({ "type_": learner });
            let err = parse_feature_learner(&value).unwrap_err();
            assert!(
                matches!(err, RelpropError::NotSupportedInCommunity(_)),
                "{} should be rejected as premium",
                learner
            );
        }
    }

    #[test]
    fn test_subselection_alias() {
        let a: SubselectionOptions = serde_json::from_str("{\"subselection\": 5}").unwrap();
        let b: SubselectionOptions = serde_json::from_str("{\"num_subselection\": 5}").unwrap();
        assert_eq!(a, b);
    }
}
