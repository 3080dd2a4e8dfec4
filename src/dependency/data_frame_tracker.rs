//! Tracks which live data frame a fingerprint evaluated to

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::containers::DataFrame;
use crate::dependency::Fingerprint;

/// Maps build histories to frames in the process-wide frame map.
///
/// Unlike [`super::Tracker`], the artefacts themselves are not stored here:
/// the tracker records `(frame name, last_change)` and a retrieval succeeds
/// only while the named frame still exists with the same `last_change`.
/// Mutating any input frame therefore invalidates downstream entries by
/// construction.
pub struct DataFrameTracker {
    data_frames: Arc<RwLock<HashMap<String, DataFrame>>>,
    pairs: Mutex<HashMap<String, (String, u64)>>,
    retrievals: AtomicUsize,
}

impl DataFrameTracker {
    pub fn new(data_frames: Arc<RwLock<HashMap<String, DataFrame>>>) -> Self {
        Self {
            data_frames,
            pairs: Mutex::new(HashMap::new()),
            retrievals: AtomicUsize::new(0),
        }
    }

    /// Combines the upstream dependencies and the input frames into the
    /// build history identifying a derived frame.
    pub fn make_build_history(
        &self,
        dependencies: &[Fingerprint],
        population: &DataFrame,
        peripheral: &[DataFrame],
    ) -> Fingerprint {
        let mut all = dependencies.to_vec();
        all.push(Fingerprint::DataFrame {
            name: population.name().to_string(),
            last_change: population.last_change(),
        });
        for df in peripheral {
            all.push(Fingerprint::DataFrame {
                name: df.name().to_string(),
                last_change: df.last_change(),
            });
        }
        Fingerprint::Staging { dependencies: all }
    }

    pub fn add(&self, df: &DataFrame, build_history: &Fingerprint) {
        self.pairs.lock().insert(
            build_history.hash_hex(),
            (df.name().to_string(), df.last_change()),
        );
    }

    /// The live frame for this build history, if it still exists unchanged.
    pub fn retrieve(&self, build_history: &Fingerprint) -> Option<DataFrame> {
        let (name, last_change) = {
            let pairs = self.pairs.lock();
            pairs.get(&build_history.hash_hex())?.clone()
        };

        let frames = self.data_frames.read();
        let frame = frames.get(&name)?;
        if frame.last_change() != last_change {
            return None;
        }

        self.retrievals.fetch_add(1, Ordering::Relaxed);
        Some(frame.clone())
    }

    /// Convenience wrapper: builds the history and retrieves in one step.
    pub fn retrieve_for(
        &self,
        dependencies: &[Fingerprint],
        population: &DataFrame,
        peripheral: &[DataFrame],
    ) -> Option<DataFrame> {
        let history = self.make_build_history(dependencies, population, peripheral);
        self.retrieve(&history)
    }

    /// How many retrievals have hit so far. Instrumentation hook used by
    /// cache-soundness tests.
    pub fn retrievals(&self) -> usize {
        self.retrievals.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.pairs.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::FloatColumn;

    fn setup() -> (Arc<RwLock<HashMap<String, DataFrame>>>, DataFrameTracker) {
        let frames = Arc::new(RwLock::new(HashMap::new()));
        let tracker = DataFrameTracker::new(frames.clone());
        (frames, tracker)
    }

    fn frame(name: &str) -> DataFrame {
        let mut df = DataFrame::new(name);
        df.add_numerical(FloatColumn::new("x", vec![1.0, 2.0])).unwrap();
        df
    }

    #[test]
    fn test_hit_while_unchanged() {
        let (frames, tracker) = setup();
        let population = frame("population");
        let staged = frame("population__staged");
        frames
            .write()
            .insert(staged.name().to_string(), staged.clone());

        let history = tracker.make_build_history(&[], &population, &[]);
        tracker.add(&staged, &history);

        assert!(tracker.retrieve(&history).is_some());
        assert_eq!(tracker.retrievals(), 1);
    }

    #[test]
    fn test_mutation_invalidates() {
        let (frames, tracker) = setup();
        let population = frame("population");
        let staged = frame("population__staged");
        frames
            .write()
            .insert(staged.name().to_string(), staged.clone());

        let history = tracker.make_build_history(&[], &population, &[]);
        tracker.add(&staged, &history);

        // Mutate the tracked frame in the map.
        frames
            .write()
            .get_mut("population__staged")
            .unwrap()
            .add_numerical(FloatColumn::new("z", vec![0.0, 0.0]))
            .unwrap();

        assert!(tracker.retrieve(&history).is_none());
    }

    #[test]
    fn test_input_change_misses() {
        let (frames, tracker) = setup();
        let mut population = frame("population");
        let staged = frame("population__staged");
        frames
            .write()
            .insert(staged.name().to_string(), staged.clone());

        let history = tracker.make_build_history(&[], &population, &[]);
        tracker.add(&staged, &history);

        population
            .add_numerical(FloatColumn::new("z", vec![0.0, 0.0]))
            .unwrap();
        assert!(tracker.retrieve_for(&[], &population, &[]).is_none());
    }
}
