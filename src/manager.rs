//! Experiment metadata access with a process-local read-through cache.
//!
//! Metadata reads sit on every enroll/goal path, so the manager caches
//! experiments in-process and invalidates via a version counter kept in the
//! shared counter backend: every save or delete bumps the shared version,
//! and readers drop their whole cache when they observe a version they have
//! not seen. Stale reads are bounded by one version check per call, never by
//! wall-clock TTL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::experiment::Experiment;
use crate::store::CounterBackend;

const META_KEY: &str = "experiments:meta";
const VERSION_FIELD: &str = "version";

/// Durable store for experiment definitions. The engine treats metadata
/// persistence as an external collaborator.
pub trait ExperimentStore: Send + Sync {
    fn get(&self, name: &str) -> Option<Experiment>;
    fn save(&self, experiment: &Experiment);
    fn delete(&self, name: &str);
    fn all(&self) -> Vec<Experiment>;
}

/// In-process experiment store. The default for embedded use and tests.
#[derive(Default)]
pub struct MemoryExperimentStore {
    experiments: DashMap<String, Experiment>,
}

impl MemoryExperimentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExperimentStore for MemoryExperimentStore {
    fn get(&self, name: &str) -> Option<Experiment> {
        self.experiments.get(name).map(|entry| entry.clone())
    }

    fn save(&self, experiment: &Experiment) {
        self.experiments
            .insert(experiment.name.clone(), experiment.clone());
    }

    fn delete(&self, name: &str) {
        self.experiments.remove(name);
    }

    fn all(&self) -> Vec<Experiment> {
        self.experiments
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

/// Read-through cache over an [`ExperimentStore`].
pub struct ExperimentManager {
    store: Arc<dyn ExperimentStore>,
    backend: Arc<dyn CounterBackend>,
    cache: RwLock<HashMap<String, Experiment>>,
    cached_version: AtomicI64,
    auto_create: bool,
}

impl ExperimentManager {
    pub fn new(
        store: Arc<dyn ExperimentStore>,
        backend: Arc<dyn CounterBackend>,
        auto_create: bool,
    ) -> Self {
        Self {
            store,
            backend,
            cache: RwLock::new(HashMap::new()),
            cached_version: AtomicI64::new(0),
            auto_create,
        }
    }

    fn shared_version(&self) -> i64 {
        match self.backend.hash_get(META_KEY, VERSION_FIELD) {
            Ok(version) => version.unwrap_or(0),
            Err(err) => {
                tracing::warn!(error = %err, "experiment version check failed, keeping cache");
                self.cached_version.load(Ordering::Acquire)
            }
        }
    }

    fn bump_shared_version(&self) -> i64 {
        match self.backend.hash_increment(META_KEY, VERSION_FIELD, 1) {
            Ok(version) => version,
            Err(err) => {
                tracing::warn!(error = %err, "experiment version bump failed");
                self.cached_version.load(Ordering::Acquire) + 1
            }
        }
    }

    /// Drop the in-process cache if another process has written since the
    /// version we last observed.
    fn refresh_if_stale(&self) {
        let shared = self.shared_version();
        if shared != self.cached_version.load(Ordering::Acquire) {
            self.cache.write().clear();
            self.cached_version.store(shared, Ordering::Release);
        }
    }

    /// Fetch an experiment by name, without auto-creation.
    pub fn get_experiment(&self, name: &str) -> Option<Experiment> {
        self.refresh_if_stale();
        if let Some(experiment) = self.cache.read().get(name) {
            return Some(experiment.clone());
        }
        let experiment = self.store.get(name)?;
        self.cache
            .write()
            .insert(name.to_string(), experiment.clone());
        Some(experiment)
    }

    /// Fetch an experiment, creating a bare one (Control state, no
    /// alternatives) when auto-creation is enabled.
    pub fn get_or_create(&self, name: &str) -> Option<Experiment> {
        if let Some(experiment) = self.get_experiment(name) {
            return Some(experiment);
        }
        if !self.auto_create {
            return None;
        }
        let experiment = Experiment::new(name);
        self.save(&experiment);
        tracing::info!(experiment = name, "auto-created experiment");
        Some(experiment)
    }

    /// Persist an experiment and publish the change to every process.
    /// The writer's own cache stays warm with the new copy.
    pub fn save(&self, experiment: &Experiment) {
        self.store.save(experiment);
        let version = self.bump_shared_version();
        let mut cache = self.cache.write();
        cache.clear();
        cache.insert(experiment.name.clone(), experiment.clone());
        self.cached_version.store(version, Ordering::Release);
    }

    /// Remove experiment metadata. Enrollment and counter cascade is the
    /// context's job, not the manager's.
    pub fn delete(&self, name: &str) {
        self.store.delete(name);
        let version = self.bump_shared_version();
        self.cache.write().clear();
        self.cached_version.store(version, Ordering::Release);
    }

    /// All experiments, straight from the store (reporting path, not hot).
    pub fn all(&self) -> Vec<Experiment> {
        self.store.all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ExperimentState;
    use crate::store::MemoryBackend;

    fn manager(auto_create: bool) -> (ExperimentManager, Arc<MemoryExperimentStore>) {
        let store = Arc::new(MemoryExperimentStore::new());
        let backend = Arc::new(MemoryBackend::new());
        (
            ExperimentManager::new(store.clone(), backend, auto_create),
            store,
        )
    }

    #[test]
    fn test_get_or_create_auto_creates() {
        let (manager, store) = manager(true);
        let experiment = manager.get_or_create("button_color").unwrap();
        assert_eq!(experiment.state, ExperimentState::Control);
        assert!(store.get("button_color").is_some());
    }

    #[test]
    fn test_auto_create_disabled() {
        let (manager, _) = manager(false);
        assert!(manager.get_or_create("button_color").is_none());
    }

    #[test]
    fn test_cache_serves_repeat_reads() {
        let (manager, store) = manager(true);
        manager.get_or_create("exp");
        // mutate the store behind the manager's back, without a version bump
        store.delete("exp");
        // cache still has it: no other process has published a change
        assert!(manager.get_experiment("exp").is_some());
    }

    #[test]
    fn test_cross_manager_invalidation() {
        let store = Arc::new(MemoryExperimentStore::new());
        let backend = Arc::new(MemoryBackend::new());
        let writer = ExperimentManager::new(store.clone(), backend.clone(), true);
        let reader = ExperimentManager::new(store, backend, false);

        let mut experiment = writer.get_or_create("exp").unwrap();
        assert_eq!(
            reader.get_experiment("exp").unwrap().state,
            ExperimentState::Control
        );

        experiment.set_state(ExperimentState::Enabled);
        writer.save(&experiment);

        // the reader observes the version bump and refetches
        assert_eq!(
            reader.get_experiment("exp").unwrap().state,
            ExperimentState::Enabled
        );
    }

    #[test]
    fn test_writer_cache_stays_warm_after_save() {
        let (manager, store) = manager(true);
        let experiment = manager.get_or_create("exp").unwrap();
        manager.save(&experiment);
        store.delete("exp");
        // own write published the version we cached against, so no refetch
        assert!(manager.get_experiment("exp").is_some());
    }

    #[test]
    fn test_delete_invalidates() {
        let (manager, _) = manager(true);
        manager.get_or_create("exp");
        manager.delete("exp");
        assert!(manager.get_experiment("exp").is_none());
    }
}
