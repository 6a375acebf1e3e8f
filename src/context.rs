//! Engine context: one object wiring the stores together, constructed once
//! per process and passed to whoever needs it.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use regex::Regex;

use crate::config::EngineConfig;
use crate::counters::Counters;
use crate::enrollment::{EnrollmentStore, Identity, MemoryEnrollmentStore};
use crate::experiment::{FlagEvaluator, NoFlags};
use crate::experiment_counters::ExperimentCounter;
use crate::manager::{ExperimentManager, ExperimentStore, MemoryExperimentStore};
use crate::metrics;
use crate::participant::{
    AuthenticatedParticipant, DummyParticipant, Participant, SessionParticipant,
};
use crate::store::{CounterBackend, MemoryBackend};

/// A goal recorded before the participant was confirmed human. Held until
/// `confirm_human` replays it or the TTL expires.
#[derive(Debug, Clone)]
pub struct BufferedGoal {
    pub experiment: String,
    pub alternative: String,
    pub goal: String,
    pub count: u64,
    pub buffered_at: chrono::DateTime<Utc>,
}

/// Bounded, TTL-bound buffer of goal events for unconfirmed participants.
///
/// Drain removes the participant's entry before replaying it, so each
/// buffered event is delivered at most once even if two confirmations race.
pub struct GoalBuffer {
    goals: DashMap<Identity, Vec<BufferedGoal>>,
    ttl_secs: u64,
    max_per_participant: usize,
}

impl GoalBuffer {
    pub fn new(ttl_secs: u64, max_per_participant: usize) -> Self {
        Self {
            goals: DashMap::new(),
            ttl_secs,
            max_per_participant,
        }
    }

    /// Buffer one goal event. Events past the cap are dropped, oldest first.
    pub fn push(&self, identity: &Identity, goal: BufferedGoal) {
        let mut entry = self.goals.entry(identity.clone()).or_default();
        let cutoff = Utc::now() - chrono::Duration::seconds(self.ttl_secs as i64);
        entry.retain(|buffered| buffered.buffered_at > cutoff);
        if entry.len() >= self.max_per_participant {
            entry.remove(0);
        }
        entry.push(goal);
        metrics::GOALS_BUFFERED_TOTAL.inc();
    }

    /// Remove and return every live buffered goal for a participant.
    pub fn drain(&self, identity: &Identity) -> Vec<BufferedGoal> {
        let Some((_, buffered)) = self.goals.remove(identity) else {
            return Vec::new();
        };
        let cutoff = Utc::now() - chrono::Duration::seconds(self.ttl_secs as i64);
        buffered
            .into_iter()
            .filter(|goal| goal.buffered_at > cutoff)
            .collect()
    }
}

/// The visitor-facing facts a participant is resolved from. The engine makes
/// no assumption about the web framework producing these.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub user_agent: Option<String>,
    pub session_key: Option<String>,
    pub user_id: Option<String>,
    /// `Some(false)` marks an authenticated account the caller has flagged
    /// as not yet human-confirmed; such requests resolve to the dummy
    /// participant. `None` means the caller makes no claim.
    pub user_confirmed_human: Option<bool>,
}

/// Everything the engine needs, assembled once and shared.
pub struct ExperimentsContext {
    pub config: Arc<EngineConfig>,
    pub manager: ExperimentManager,
    pub counters: ExperimentCounter,
    pub enrollments: Arc<dyn EnrollmentStore>,
    pub flags: Arc<dyn FlagEvaluator>,
    pub goal_buffer: GoalBuffer,
    // Compiled once at build time; participant resolution runs per request.
    bot_regex: Regex,
    confirmed_sessions: DashMap<String, ()>,
}

impl ExperimentsContext {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Resolve the participant for a request. Bots and identity-less
    /// requests get the dummy participant, which reports control and
    /// records nothing.
    pub fn participant<'a>(&'a self, request: &RequestInfo) -> Box<dyn Participant + 'a> {
        if let Some(agent) = &request.user_agent {
            if self.bot_regex.is_match(agent) {
                return Box::new(DummyParticipant::new(self));
            }
        }
        if let Some(user_id) = &request.user_id {
            // An account the caller has flagged unconfirmed is treated like
            // a bot: visible to the caller, invisible to the experiments.
            if request.user_confirmed_human == Some(false) {
                return Box::new(DummyParticipant::new(self));
            }
            return Box::new(AuthenticatedParticipant::new(self, user_id.clone()));
        }
        if let Some(session_key) = &request.session_key {
            return Box::new(SessionParticipant::new(self, session_key.clone()));
        }
        Box::new(DummyParticipant::new(self))
    }

    pub fn session_participant(&self, session_key: impl Into<String>) -> SessionParticipant<'_> {
        SessionParticipant::new(self, session_key.into())
    }

    pub fn authenticated_participant(
        &self,
        user_id: impl Into<String>,
    ) -> AuthenticatedParticipant<'_> {
        AuthenticatedParticipant::new(self, user_id.into())
    }

    /// Whether a session has been confirmed human. Always true when
    /// verification is disabled.
    pub fn is_confirmed_human(&self, session_key: &str) -> bool {
        if !self.config.verify_human {
            return true;
        }
        self.confirmed_sessions.contains_key(session_key)
    }

    /// Record a confirmation. Returns false if the session was already
    /// confirmed, so replay happens once.
    pub fn confirm_session(&self, session_key: &str) -> bool {
        self.confirmed_sessions
            .insert(session_key.to_string(), ())
            .is_none()
    }

    /// Delete an experiment: metadata, every enrollment, every counter.
    pub fn delete_experiment(&self, name: &str) {
        self.manager.delete(name);
        self.enrollments.remove_experiment(name);
        self.counters.delete(name);
        tracing::info!(experiment = name, "experiment deleted");
    }
}

/// Assembles an [`ExperimentsContext`], defaulting every collaborator to the
/// in-memory implementation.
#[derive(Default)]
pub struct ContextBuilder {
    config: Option<EngineConfig>,
    backend: Option<Arc<dyn CounterBackend>>,
    experiment_store: Option<Arc<dyn ExperimentStore>>,
    enrollments: Option<Arc<dyn EnrollmentStore>>,
    flags: Option<Arc<dyn FlagEvaluator>>,
}

impl ContextBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn CounterBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn experiment_store(mut self, store: Arc<dyn ExperimentStore>) -> Self {
        self.experiment_store = Some(store);
        self
    }

    pub fn enrollments(mut self, store: Arc<dyn EnrollmentStore>) -> Self {
        self.enrollments = Some(store);
        self
    }

    pub fn flags(mut self, flags: Arc<dyn FlagEvaluator>) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn build(self) -> ExperimentsContext {
        let config = Arc::new(self.config.unwrap_or_default());
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MemoryBackend::new()));
        let experiment_store = self
            .experiment_store
            .unwrap_or_else(|| Arc::new(MemoryExperimentStore::new()));
        let enrollments = self
            .enrollments
            .unwrap_or_else(|| Arc::new(MemoryEnrollmentStore::new()));
        let flags = self.flags.unwrap_or_else(|| Arc::new(NoFlags));

        let counters = Counters::new(backend.clone());
        let manager = ExperimentManager::new(
            experiment_store,
            backend,
            config.auto_create_experiments,
        );
        let goal_buffer = GoalBuffer::new(
            config.unconfirmed_goal_ttl_secs,
            config.max_buffered_goals,
        );
        ExperimentsContext {
            counters: ExperimentCounter::new(counters, config.clone()),
            bot_regex: config.bot_regex(),
            config,
            manager,
            enrollments,
            flags,
            goal_buffer,
            confirmed_sessions: DashMap::new(),
        }
    }
}
