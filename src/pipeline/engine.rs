//! Process-wide engine state

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::Array2;
use parking_lot::RwLock;

use crate::containers::{DataFrame, Encoding};
use crate::dependency::{DataFrameTracker, Tracker, WarningTracker};
use crate::pipeline::FittedPipeline;

/// Everything that outlives a single command: the shared encodings, the
/// frame map, the fitted pipelines and the dependency trackers.
///
/// The state is created once per project via [`EngineState::init`] and torn
/// down on shutdown; components only ever see it through the orchestrator.
/// The frame and pipeline maps are reader-writer locked; the encodings are
/// append-only and written only during staging and preprocessor fits.
pub struct EngineState {
    pub categories: Arc<RwLock<Encoding>>,
    pub join_key_encoding: Arc<RwLock<Encoding>>,
    pub data_frames: Arc<RwLock<HashMap<String, DataFrame>>>,
    pub pipelines: RwLock<HashMap<String, Arc<FittedPipeline>>>,
    pub df_tracker: DataFrameTracker,
    pub feature_cache: Tracker<Array2<f64>>,
    pub warning_tracker: WarningTracker,
    pub project_directory: PathBuf,
    pub temp_dir: PathBuf,
    shutdown: AtomicBool,
}

impl EngineState {
    pub fn init(project_directory: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        let data_frames = Arc::new(RwLock::new(HashMap::new()));
        Self {
            categories: Arc::new(RwLock::new(Encoding::new())),
            join_key_encoding: Arc::new(RwLock::new(Encoding::new())),
            df_tracker: DataFrameTracker::new(data_frames.clone()),
            data_frames,
            pipelines: RwLock::new(HashMap::new()),
            feature_cache: Tracker::new(),
            warning_tracker: WarningTracker::new(),
            project_directory: project_directory.into(),
            temp_dir: temp_dir.into(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Registers or replaces a frame in the process-wide map.
    pub fn set_data_frame(&self, frame: DataFrame) {
        self.data_frames
            .write()
            .insert(frame.name().to_string(), frame);
    }

    pub fn get_data_frame(&self, name: &str) -> Option<DataFrame> {
        self.data_frames.read().get(name).cloned()
    }

    /// Removes a fitted pipeline. Frames and caches keyed on it become
    /// unreachable and fall out naturally.
    pub fn delete_pipeline(&self, name: &str) -> bool {
        self.pipelines.write().remove(name).is_some()
    }

    /// Drops all cached state. Called on project teardown.
    pub fn teardown(&self) {
        self.data_frames.write().clear();
        self.pipelines.write().clear();
        self.df_tracker.clear();
        self.feature_cache.clear();
        self.warning_tracker.clear();
    }

    /// The `shutdown` command sets this; the embedding server polls it.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
