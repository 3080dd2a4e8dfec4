//! Generic fingerprint-keyed artefact cache

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dependency::Fingerprint;
use crate::error::Result;

/// Caches heavy artefacts by fingerprint hash.
///
/// `retrieve` double-checks the canonical rendering on a hash hit, so a
/// hash collision degrades to a miss instead of returning the wrong
/// artefact. `get_or_build` serializes builders per fingerprint: while one
/// caller computes, every other caller for the same fingerprint waits and
/// then reads the cached result, so the expensive computation runs at most
/// once.
pub struct Tracker<T> {
    elements: Mutex<HashMap<String, (String, Arc<T>)>>,
    build_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<T> Tracker<T> {
    pub fn new() -> Self {
        Self {
            elements: Mutex::new(HashMap::new()),
            build_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, fingerprint: &Fingerprint, element: Arc<T>) {
        self.elements
            .lock()
            .insert(fingerprint.hash_hex(), (fingerprint.canonical(), element));
    }

    pub fn retrieve(&self, fingerprint: &Fingerprint) -> Option<Arc<T>> {
        let elements = self.elements.lock();
        let (canonical, element) = elements.get(&fingerprint.hash_hex())?;
        if *canonical != fingerprint.canonical() {
            return None;
        }
        Some(element.clone())
    }

    /// Returns the cached artefact or builds it, guaranteeing at most one
    /// concurrent build per fingerprint.
    pub fn get_or_build(
        &self,
        fingerprint: &Fingerprint,
        build: impl FnOnce() -> Result<T>,
    ) -> Result<Arc<T>> {
        if let Some(element) = self.retrieve(fingerprint) {
            return Ok(element);
        }

        let lock = {
            let mut locks = self.build_locks.lock();
            locks
                .entry(fingerprint.hash_hex())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let _guard = lock.lock();

        // Another caller may have finished while we waited for the lock.
        if let Some(element) = self.retrieve(fingerprint) {
            return Ok(element);
        }

        let element = Arc::new(build()?);
        self.add(fingerprint, element.clone());
        Ok(element)
    }

    pub fn clear(&self) {
        self.elements.lock().clear();
        self.build_locks.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.elements.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.lock().is_empty()
    }
}

impl<T> Default for Tracker<T> {
    fn default() -> Self {
        Self::new()
    }
}
