//! The pipeline orchestrator
//!
//! Drives stage, preprocess, feature learning, selection, prediction and
//! scoring, and owns the process-wide state (frames, encodings, trackers,
//! fitted pipelines).

mod engine;
mod fitted;
mod pipeline;
mod predictor;
mod staging;

pub use engine::EngineState;
pub use fitted::{FittedPipeline, TransformReport};
pub use pipeline::Pipeline;
pub use predictor::{Predictor, PredictorFactory};
pub use staging::stage;
