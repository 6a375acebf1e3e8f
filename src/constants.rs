//! Documented constants for the experiments engine.
//!
//! Centralizing tunables here prevents magic numbers scattered through the
//! assignment and counting paths.

/// Name of the baseline alternative.
///
/// Every experiment has exactly one `control` alternative once any
/// alternative exists; unenrolled and bot traffic always reports it.
pub const CONTROL_GROUP: &str = "control";

/// Retention goal fired when the participant was *not* already on the site
/// (fires on the first visit after enrollment, and again after each session
/// window elapses).
pub const VISIT_NOT_PRESENT_COUNT_GOAL: &str = "_retention_not_present_visits";

/// Retention goal fired only after a full session window has elapsed since
/// the last visit. Deliberately silent on the very first visit: the
/// participant was enrolled as part of that pageview, so counting it would
/// be valueless.
pub const VISIT_PRESENT_COUNT_GOAL: &str = "_retention_present_visits";

/// Goals the engine tracks for every experiment, in addition to
/// user-configured conversion goals.
pub const BUILT_IN_GOALS: [&str; 2] = [VISIT_PRESENT_COUNT_GOAL, VISIT_NOT_PRESENT_COUNT_GOAL];

/// Minimum observations per sample before the Mann-Whitney U test yields a
/// p-value. Below this the normal approximation is unreliable and the test
/// reports "no result" rather than a misleading number.
pub const MIN_OBSERVATIONS: u64 = 20;

/// Keys deleted per round-trip when resetting counters by pattern. Bounds
/// memory and I/O for experiments with very large participant counts.
pub const RESET_BATCH_SIZE: usize = 500;

/// Distribution chart points need at least this many participants at an
/// action count before the point extends the interesting range of the graph.
pub const MIN_ACTIONS_TO_SHOW: u64 = 3;

/// Default crawler/bot user-agent signature list. Matched case-insensitively
/// against the request user-agent; matches resolve to a dummy participant
/// that is never enrolled or counted.
pub const DEFAULT_BOT_PATTERN: &str = "(Baidu|Gigabot|Googlebot|YandexBot|AhrefsBot|TVersity\
|libwww-perl|Yeti|lwp-trivial|msnbot|bingbot|facebookexternalhit|Twitterbot|Twitmunin\
|SiteUptime|TwitterFeed|Slurp|WordPress|ZIBB|ZyBorg)";
