//! Experiment-level view over the distribution counters.
//!
//! Maps (experiment, alternative, goal) triples onto counter keys and emits
//! one structured audit record per increment/removal. The key formats are a
//! persisted-state contract — changing them orphans existing counters:
//!
//! - participants: `"{experiment}:{alternative}:participant"`
//! - goal hits:    `"{experiment}:{alternative}:{goal}:goal"`

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::counters::Counters;
use crate::metrics;

/// Facade over [`Counters`] keyed by experiment/alternative/goal names
#[derive(Clone)]
pub struct ExperimentCounter {
    counters: Counters,
    config: Arc<EngineConfig>,
}

fn participant_key(experiment: &str, alternative: &str) -> String {
    format!("{experiment}:{alternative}:participant")
}

fn goal_key(experiment: &str, alternative: &str, goal: &str) -> String {
    format!("{experiment}:{alternative}:{goal}:goal")
}

impl ExperimentCounter {
    pub fn new(counters: Counters, config: Arc<EngineConfig>) -> Self {
        Self { counters, config }
    }

    /// Count a participant under an alternative
    pub fn increment_participant_count(
        &self,
        experiment: &str,
        alternative: &str,
        participant_id: &str,
    ) {
        self.counters
            .increment(&participant_key(experiment, alternative), participant_id, 1);
        metrics::ENROLLMENTS_TOTAL
            .with_label_values(&[experiment, alternative])
            .inc();
        tracing::info!(
            target: "splitlab::audit",
            event = "participant_incremented",
            experiment,
            alternative,
            participant = participant_id,
        );
    }

    /// Count goal hits for a participant under an alternative
    pub fn increment_goal_count(
        &self,
        experiment: &str,
        alternative: &str,
        goal: &str,
        participant_id: &str,
        count: u64,
    ) {
        self.counters.increment(
            &goal_key(experiment, alternative, goal),
            participant_id,
            count as i64,
        );
        metrics::GOALS_RECORDED_TOTAL
            .with_label_values(&[experiment, goal])
            .inc_by(count);
        tracing::info!(
            target: "splitlab::audit",
            event = "goal_hit",
            experiment,
            alternative,
            goal,
            participant = participant_id,
            count,
        );
    }

    /// Remove a participant: their participation counter plus every known
    /// goal counter (configured goals and built-in retention goals).
    pub fn remove_participant(&self, experiment: &str, alternative: &str, participant_id: &str) {
        self.counters
            .clear(&participant_key(experiment, alternative), participant_id);
        for goal in self.config.all_goals() {
            self.counters
                .clear(&goal_key(experiment, alternative, &goal), participant_id);
        }
        tracing::info!(
            target: "splitlab::audit",
            event = "participant_removed",
            experiment,
            alternative,
            participant = participant_id,
        );
    }

    /// Distinct participants counted under an alternative
    pub fn participant_count(&self, experiment: &str, alternative: &str) -> u64 {
        self.counters.get(&participant_key(experiment, alternative))
    }

    /// Distinct participants that hit a goal at least once
    pub fn goal_count(&self, experiment: &str, alternative: &str, goal: &str) -> u64 {
        self.counters.get(&goal_key(experiment, alternative, goal))
    }

    /// (goal, hit count) pairs for one participant across every known goal.
    /// Used to carry goal history across an identity merge.
    pub fn participant_goal_frequencies(
        &self,
        experiment: &str,
        alternative: &str,
        participant_id: &str,
    ) -> Vec<(String, u64)> {
        self.config
            .all_goals()
            .into_iter()
            .filter_map(|goal| {
                let count = self.counters.get_frequency(
                    &goal_key(experiment, alternative, &goal),
                    participant_id,
                );
                if count > 0 {
                    Some((goal, count as u64))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Histogram of goal hit counts for an alternative:
    /// hit count → number of participants with that many hits
    pub fn goal_distribution(
        &self,
        experiment: &str,
        alternative: &str,
        goal: &str,
    ) -> BTreeMap<u64, u64> {
        self.counters
            .get_frequencies(&goal_key(experiment, alternative, goal))
    }

    /// Drop every counter belonging to an experiment
    pub fn delete(&self, experiment: &str) {
        self.counters.reset_pattern(&format!("{experiment}:"));
        tracing::info!(
            target: "splitlab::audit",
            event = "experiment_counters_deleted",
            experiment,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;

    fn facade() -> ExperimentCounter {
        let config = Arc::new(EngineConfig {
            goals: vec!["signup".to_string()],
            ..Default::default()
        });
        ExperimentCounter::new(Counters::new(Arc::new(MemoryBackend::new())), config)
    }

    #[test]
    fn test_participant_and_goal_counts() {
        let counter = facade();
        counter.increment_participant_count("exp", "red", "session:a");
        counter.increment_participant_count("exp", "red", "session:b");
        counter.increment_goal_count("exp", "red", "signup", "session:a", 2);

        assert_eq!(counter.participant_count("exp", "red"), 2);
        assert_eq!(counter.goal_count("exp", "red", "signup"), 1);
    }

    #[test]
    fn test_remove_participant_clears_all_goals() {
        let counter = facade();
        counter.increment_participant_count("exp", "red", "session:a");
        counter.increment_goal_count("exp", "red", "signup", "session:a", 3);
        counter.increment_goal_count(
            "exp",
            "red",
            "_retention_not_present_visits",
            "session:a",
            1,
        );

        counter.remove_participant("exp", "red", "session:a");
        assert_eq!(counter.participant_count("exp", "red"), 0);
        assert_eq!(counter.goal_count("exp", "red", "signup"), 0);
        assert!(counter
            .participant_goal_frequencies("exp", "red", "session:a")
            .is_empty());
    }

    #[test]
    fn test_participant_goal_frequencies() {
        let counter = facade();
        counter.increment_goal_count("exp", "red", "signup", "session:a", 3);

        let freqs = counter.participant_goal_frequencies("exp", "red", "session:a");
        assert_eq!(freqs, vec![("signup".to_string(), 3)]);
    }

    #[test]
    fn test_goal_distribution() {
        let counter = facade();
        counter.increment_goal_count("exp", "red", "signup", "session:a", 1);
        counter.increment_goal_count("exp", "red", "signup", "session:b", 1);
        counter.increment_goal_count("exp", "red", "signup", "session:c", 4);

        let dist = counter.goal_distribution("exp", "red", "signup");
        assert_eq!(dist.get(&1), Some(&2));
        assert_eq!(dist.get(&4), Some(&1));
    }

    #[test]
    fn test_delete_scopes_to_experiment() {
        let counter = facade();
        counter.increment_participant_count("exp", "red", "session:a");
        counter.increment_participant_count("exp2", "red", "session:a");

        counter.delete("exp");
        assert_eq!(counter.participant_count("exp", "red"), 0);
        assert_eq!(counter.participant_count("exp2", "red"), 1);
    }
}
