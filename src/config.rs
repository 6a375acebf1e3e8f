//! Configuration for the experiments engine.
//!
//! All tunable behavior in one place with environment variable overrides.
//! Sensible defaults, configurable in production.

use std::env;

use regex::{Regex, RegexBuilder};
use tracing::info;

use crate::constants::{BUILT_IN_GOALS, DEFAULT_BOT_PATTERN};

/// Engine configuration loaded from environment with defaults
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Auto-create experiments on first access (default: true)
    pub auto_create_experiments: bool,

    /// Gate session-based counting behind human confirmation (default: true).
    /// When false, anonymous sessions count immediately and the unconfirmed
    /// goal buffer is never used.
    pub verify_human: bool,

    /// Retention session window in hours (default: 6). Two visits within the
    /// window count as one session.
    pub session_length_hours: i64,

    /// User-defined conversion goal names. Built-in retention goals are
    /// always tracked in addition to these.
    pub goals: Vec<String>,

    /// How long buffered goal events for unconfirmed participants are kept
    /// before being discarded as bot traffic (default: 24h).
    pub unconfirmed_goal_ttl_secs: u64,

    /// Maximum buffered goal events per unconfirmed participant
    /// (default: 1000). When full, the oldest buffered event is evicted to
    /// make room for the newest.
    pub max_buffered_goals: usize,

    /// Crawler signature list, matched case-insensitively against the
    /// request user-agent.
    pub bot_user_agent_pattern: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_create_experiments: true,
            verify_human: true,
            session_length_hours: 6,
            goals: Vec::new(),
            unconfirmed_goal_ttl_secs: 86_400,
            max_buffered_goals: 1000,
            bot_user_agent_pattern: DEFAULT_BOT_PATTERN.to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("SPLITLAB_AUTO_CREATE") {
            config.auto_create_experiments = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = env::var("SPLITLAB_VERIFY_HUMAN") {
            config.verify_human = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = env::var("SPLITLAB_SESSION_LENGTH") {
            if let Ok(n) = val.parse() {
                config.session_length_hours = n;
            }
        }

        if let Ok(val) = env::var("SPLITLAB_GOALS") {
            config.goals = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(val) = env::var("SPLITLAB_UNCONFIRMED_TTL") {
            if let Ok(n) = val.parse() {
                config.unconfirmed_goal_ttl_secs = n;
            }
        }

        if let Ok(val) = env::var("SPLITLAB_MAX_BUFFERED_GOALS") {
            if let Ok(n) = val.parse() {
                config.max_buffered_goals = n;
            }
        }

        if let Ok(val) = env::var("SPLITLAB_BOT_PATTERN") {
            config.bot_user_agent_pattern = val;
        }

        config
    }

    /// Every goal the engine tracks: configured goals plus the built-in
    /// retention goals. Removal and incorporation iterate this set.
    pub fn all_goals(&self) -> Vec<String> {
        self.goals
            .iter()
            .cloned()
            .chain(BUILT_IN_GOALS.iter().map(|g| g.to_string()))
            .collect()
    }

    /// Compiled bot signature matcher. An invalid configured pattern falls
    /// back to the built-in list rather than disabling bot detection.
    pub fn bot_regex(&self) -> Regex {
        match RegexBuilder::new(&self.bot_user_agent_pattern)
            .case_insensitive(true)
            .build()
        {
            Ok(re) => re,
            Err(e) => {
                tracing::warn!(
                    "Invalid SPLITLAB_BOT_PATTERN ({}), using built-in signature list",
                    e
                );
                RegexBuilder::new(DEFAULT_BOT_PATTERN)
                    .case_insensitive(true)
                    .build()
                    .expect("built-in bot pattern is valid")
            }
        }
    }

    /// Log the current configuration
    pub fn log(&self) {
        info!("Experiments configuration:");
        info!("   Auto-create experiments: {}", self.auto_create_experiments);
        info!("   Verify human: {}", self.verify_human);
        info!("   Session length: {}h", self.session_length_hours);
        info!("   Configured goals: {}", self.goals.len());
        info!(
            "   Unconfirmed goal buffer: {}s TTL, {} events max",
            self.unconfirmed_goal_ttl_secs, self.max_buffered_goals
        );
    }
}
