//! Participants and the enrollment/goal behavior shared between them.
//!
//! Three closed variants implement [`Participant`]: [`SessionParticipant`]
//! for anonymous visitors, [`AuthenticatedParticipant`] for logged-in
//! accounts, and [`DummyParticipant`] for bots and identity-less requests.
//! The shared behavior (`enroll`, `goal`, `visit`, `incorporate`) lives in
//! default trait methods; each variant supplies only the persistence seams.

use chrono::{DateTime, Duration, Utc};

use crate::constants::{CONTROL_GROUP, VISIT_NOT_PRESENT_COUNT_GOAL, VISIT_PRESENT_COUNT_GOAL};
use crate::context::{BufferedGoal, ExperimentsContext};
use crate::enrollment::{EnrollmentRecord, Identity};
use crate::experiment::{AlternativeSpec, Experiment};
use crate::metrics;

/// One enrollment, joined with its live experiment definition.
#[derive(Debug, Clone)]
pub struct EnrollmentData {
    pub experiment: Experiment,
    pub alternative: String,
    pub enrollment_date: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// A visitor that can take part in experiments.
pub trait Participant {
    fn context(&self) -> &ExperimentsContext;

    /// None for the dummy participant, which is never counted.
    fn identity(&self) -> Option<Identity>;

    fn is_confirmed_human(&self) -> bool;

    /// Mark this visitor as a real human. Buffered enrollments and goals are
    /// replayed into the counters exactly once; repeat calls are no-ops.
    fn confirm_human(&self) {}

    // ---- persistence seams ----

    /// Alternative this participant is enrolled in, if any.
    fn enrollment_for(&self, experiment: &str) -> Option<String>;

    /// Persist an enrollment and count the participant under the
    /// alternative. Changing alternatives counts the new one without
    /// decrementing the old, matching the reporting semantics.
    fn set_enrollment(
        &self,
        experiment: &Experiment,
        alternative: &str,
        enrollment_date: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    );

    fn all_enrollments(&self) -> Vec<EnrollmentData>;

    /// Remove the enrollment and every counter this participant holds
    /// against the experiment.
    fn cancel_enrollment(&self, experiment: &str);

    /// Record a goal hit against one experiment/alternative.
    fn record_goal(&self, experiment: &str, alternative: &str, goal: &str, count: u64);

    fn set_last_seen(&self, experiment: &str, last_seen: DateTime<Utc>);

    // ---- shared behavior ----

    /// Enroll in the experiment if not already enrolled. Returns the
    /// assigned alternative; sticky across calls.
    fn enroll(&self, experiment_name: &str, alternatives: &[AlternativeSpec]) -> String {
        self.enroll_with_forced(experiment_name, alternatives, None)
    }

    /// Enroll, optionally forcing the assigned alternative for new
    /// enrollments. Existing enrollments stay sticky even when forced.
    fn enroll_with_forced(
        &self,
        experiment_name: &str,
        alternatives: &[AlternativeSpec],
        force_alternative: Option<&str>,
    ) -> String {
        let context = self.context();
        let Some(mut experiment) = context.manager.get_or_create(experiment_name) else {
            return CONTROL_GROUP.to_string();
        };

        if !experiment.is_displaying_alternatives() {
            return experiment.default_alternative().to_string();
        }

        let mut changed = false;
        if !alternatives.iter().any(|spec| spec.name == CONTROL_GROUP) {
            // control inherits the average of the supplied weights so a
            // fully-weighted alternative set stays fully weighted
            let control_weight = if !alternatives.is_empty()
                && alternatives.iter().all(|spec| spec.weight.is_some())
            {
                let total: f64 = alternatives.iter().filter_map(|spec| spec.weight).sum();
                Some((total / alternatives.len() as f64).round())
            } else {
                None
            };
            changed |= experiment.ensure_alternative_exists(CONTROL_GROUP, control_weight);
        }
        for spec in alternatives {
            changed |= experiment.ensure_alternative_exists(&spec.name, spec.weight);
        }
        if changed {
            context.manager.save(&experiment);
        }

        if let Some(assigned) = self.enrollment_for(experiment_name) {
            return assigned;
        }

        if experiment.is_accepting_new_users(context.flags.as_ref()) {
            let chosen = force_alternative
                .map(str::to_string)
                .or_else(|| experiment.random_alternative())
                .unwrap_or_else(|| CONTROL_GROUP.to_string());
            self.set_enrollment(&experiment, &chosen, None, None);
            return chosen;
        }

        CONTROL_GROUP.to_string()
    }

    /// The alternative this participant sees, without enrolling.
    fn get_alternative(&self, experiment_name: &str) -> String {
        let Some(experiment) = self.context().manager.get_or_create(experiment_name) else {
            return CONTROL_GROUP.to_string();
        };
        if experiment.is_displaying_alternatives() {
            if let Some(assigned) = self.enrollment_for(experiment_name) {
                return assigned;
            }
        } else {
            return experiment.default_alternative().to_string();
        }
        CONTROL_GROUP.to_string()
    }

    /// Explicitly move this participant onto an alternative, even if the
    /// experiment would not normally accept them. Counters for the previous
    /// alternative are not decremented.
    fn set_alternative(&self, experiment_name: &str, alternative: &str) {
        if let Some(experiment) = self.context().manager.get_experiment(experiment_name) {
            self.set_enrollment(&experiment, alternative, None, None);
        }
    }

    /// Record a goal against every displaying experiment this participant
    /// is enrolled in.
    fn goal(&self, goal_name: &str, count: u64) {
        for enrollment in self.all_enrollments() {
            if enrollment.experiment.is_displaying_alternatives() {
                self.record_goal(
                    &enrollment.experiment.name,
                    &enrollment.alternative,
                    goal_name,
                    count,
                );
            }
        }
    }

    /// Record a site visit for retention tracking.
    ///
    /// The first visit after enrollment fires only the not-present goal; the
    /// participant was on the page to get enrolled, so a present-visit then
    /// would be valueless. After a full session window both goals fire.
    fn visit(&self) {
        let session_window = Duration::hours(self.context().config.session_length_hours);
        for enrollment in self.all_enrollments() {
            if !enrollment.experiment.is_displaying_alternatives() {
                continue;
            }
            let name = &enrollment.experiment.name;
            match enrollment.last_seen {
                None => {
                    self.record_goal(
                        name,
                        &enrollment.alternative,
                        VISIT_NOT_PRESENT_COUNT_GOAL,
                        1,
                    );
                    self.set_last_seen(name, Utc::now());
                }
                Some(last_seen) if Utc::now() - last_seen >= session_window => {
                    self.record_goal(
                        name,
                        &enrollment.alternative,
                        VISIT_NOT_PRESENT_COUNT_GOAL,
                        1,
                    );
                    self.record_goal(name, &enrollment.alternative, VISIT_PRESENT_COUNT_GOAL, 1);
                    self.set_last_seen(name, Utc::now());
                }
                Some(_) => {}
            }
        }
    }

    /// Merge another participant's history into this one.
    ///
    /// Experiments this participant is not yet enrolled in are taken over
    /// wholesale: the other's enrollment dates, goal hit counts, everything.
    /// Where both are enrolled, the other's results are discarded. The other
    /// participant ends with no enrollments either way.
    fn incorporate(&self, other: &dyn Participant) {
        let Some(other_identity) = other.identity() else {
            return;
        };
        let context = self.context();
        for enrollment in other.all_enrollments() {
            let name = enrollment.experiment.name.clone();
            if self.enrollment_for(&name).is_none() {
                self.set_enrollment(
                    &enrollment.experiment,
                    &enrollment.alternative,
                    Some(enrollment.enrollment_date),
                    enrollment.last_seen,
                );
                if let Some(identity) = self.identity() {
                    let goals = context.counters.participant_goal_frequencies(
                        &name,
                        &enrollment.alternative,
                        &other_identity.counter_id(),
                    );
                    for (goal, count) in goals {
                        context.counters.increment_goal_count(
                            &name,
                            &enrollment.alternative,
                            &goal,
                            &identity.counter_id(),
                            count,
                        );
                    }
                }
            }
            other.cancel_enrollment(&name);
        }
        metrics::INCORPORATIONS_TOTAL.inc();
    }

    /// Enroll (adding `alternative` to the experiment if needed) and report
    /// whether this participant landed in it.
    fn is_enrolled(&self, experiment_name: &str, alternative: &str) -> bool {
        self.enroll(experiment_name, &[AlternativeSpec::new(alternative)]) == alternative
    }
}

// ============================================================================
// Dummy participant
// ============================================================================

/// Bots and identity-less requests. Always reports control, never writes.
pub struct DummyParticipant<'a> {
    context: &'a ExperimentsContext,
}

impl<'a> DummyParticipant<'a> {
    pub fn new(context: &'a ExperimentsContext) -> Self {
        Self { context }
    }
}

impl Participant for DummyParticipant<'_> {
    fn context(&self) -> &ExperimentsContext {
        self.context
    }

    fn identity(&self) -> Option<Identity> {
        None
    }

    fn is_confirmed_human(&self) -> bool {
        false
    }

    fn enrollment_for(&self, _experiment: &str) -> Option<String> {
        None
    }

    fn set_enrollment(
        &self,
        _experiment: &Experiment,
        _alternative: &str,
        _enrollment_date: Option<DateTime<Utc>>,
        _last_seen: Option<DateTime<Utc>>,
    ) {
    }

    fn all_enrollments(&self) -> Vec<EnrollmentData> {
        Vec::new()
    }

    fn cancel_enrollment(&self, _experiment: &str) {}

    fn record_goal(&self, _experiment: &str, _alternative: &str, _goal: &str, _count: u64) {}

    fn set_last_seen(&self, _experiment: &str, _last_seen: DateTime<Utc>) {}

    fn enroll_with_forced(
        &self,
        _experiment_name: &str,
        _alternatives: &[AlternativeSpec],
        _force_alternative: Option<&str>,
    ) -> String {
        CONTROL_GROUP.to_string()
    }

    fn get_alternative(&self, _experiment_name: &str) -> String {
        CONTROL_GROUP.to_string()
    }

    fn is_enrolled(&self, _experiment_name: &str, alternative: &str) -> bool {
        alternative == CONTROL_GROUP
    }

    /// Still cancels the other participant's enrollments, so a bot-flagged
    /// account login cleans up the session's history.
    fn incorporate(&self, other: &dyn Participant) {
        for enrollment in other.all_enrollments() {
            other.cancel_enrollment(&enrollment.experiment.name);
        }
    }
}

// ============================================================================
// Shared store-backed seams
// ============================================================================

fn store_enrollment_for(context: &ExperimentsContext, identity: &Identity, experiment: &str) -> Option<String> {
    context
        .enrollments
        .get(identity, experiment)
        .map(|record| record.alternative)
}

fn store_all_enrollments(context: &ExperimentsContext, identity: &Identity) -> Vec<EnrollmentData> {
    context
        .enrollments
        .all_for(identity)
        .into_iter()
        .filter_map(|(name, record)| {
            // skip enrollments whose experiment has since been deleted
            let experiment = context.manager.get_experiment(&name)?;
            Some(EnrollmentData {
                experiment,
                alternative: record.alternative,
                enrollment_date: record.enrollment_date,
                last_seen: record.last_seen,
            })
        })
        .collect()
}

fn store_cancel_enrollment(context: &ExperimentsContext, identity: &Identity, experiment: &str) {
    if let Some(record) = context.enrollments.remove(identity, experiment) {
        context
            .counters
            .remove_participant(experiment, &record.alternative, &identity.counter_id());
    }
}

fn persist_enrollment(
    context: &ExperimentsContext,
    identity: &Identity,
    experiment: &Experiment,
    alternative: &str,
    enrollment_date: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
) {
    let record = EnrollmentRecord {
        alternative: alternative.to_string(),
        enrollment_date: enrollment_date.unwrap_or_else(Utc::now),
        last_seen,
    };
    context.enrollments.upsert(identity, &experiment.name, record);
}

// ============================================================================
// Session participant
// ============================================================================

/// An anonymous visitor keyed by session. Until confirmed human, enrollments
/// and goals are held out of the counters (goals in a bounded TTL buffer)
/// and replayed on confirmation.
pub struct SessionParticipant<'a> {
    context: &'a ExperimentsContext,
    session_key: String,
}

impl<'a> SessionParticipant<'a> {
    pub fn new(context: &'a ExperimentsContext, session_key: String) -> Self {
        Self {
            context,
            session_key,
        }
    }

    fn session_identity(&self) -> Identity {
        Identity::session(self.session_key.clone())
    }
}

impl Participant for SessionParticipant<'_> {
    fn context(&self) -> &ExperimentsContext {
        self.context
    }

    fn identity(&self) -> Option<Identity> {
        Some(self.session_identity())
    }

    fn is_confirmed_human(&self) -> bool {
        self.context.is_confirmed_human(&self.session_key)
    }

    fn confirm_human(&self) {
        if !self.context.confirm_session(&self.session_key) {
            return;
        }
        metrics::HUMAN_CONFIRMATIONS_TOTAL.inc();
        let identity = self.session_identity();
        tracing::info!(participant = %identity.counter_id(), "confirmed human");

        // replay enrollments into the participant counters
        for enrollment in self.all_enrollments() {
            self.context.counters.increment_participant_count(
                &enrollment.experiment.name,
                &enrollment.alternative,
                &identity.counter_id(),
            );
        }

        // replay buffered goals; drain is at-most-once under racing confirms
        for goal in self.context.goal_buffer.drain(&identity) {
            if self.context.manager.get_experiment(&goal.experiment).is_some() {
                self.context.counters.increment_goal_count(
                    &goal.experiment,
                    &goal.alternative,
                    &goal.goal,
                    &identity.counter_id(),
                    goal.count,
                );
            }
        }
    }

    fn enrollment_for(&self, experiment: &str) -> Option<String> {
        store_enrollment_for(self.context, &self.session_identity(), experiment)
    }

    fn set_enrollment(
        &self,
        experiment: &Experiment,
        alternative: &str,
        enrollment_date: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) {
        let identity = self.session_identity();
        persist_enrollment(
            self.context,
            &identity,
            experiment,
            alternative,
            enrollment_date,
            last_seen,
        );
        if self.is_confirmed_human() {
            self.context.counters.increment_participant_count(
                &experiment.name,
                alternative,
                &identity.counter_id(),
            );
        } else {
            tracing::info!(
                experiment = %experiment.name,
                alternative,
                participant = %identity.counter_id(),
                "participant unconfirmed, not counted yet"
            );
        }
    }

    fn all_enrollments(&self) -> Vec<EnrollmentData> {
        store_all_enrollments(self.context, &self.session_identity())
    }

    fn cancel_enrollment(&self, experiment: &str) {
        store_cancel_enrollment(self.context, &self.session_identity(), experiment);
    }

    fn record_goal(&self, experiment: &str, alternative: &str, goal: &str, count: u64) {
        let identity = self.session_identity();
        if self.is_confirmed_human() {
            self.context.counters.increment_goal_count(
                experiment,
                alternative,
                goal,
                &identity.counter_id(),
                count,
            );
        } else {
            self.context.goal_buffer.push(
                &identity,
                BufferedGoal {
                    experiment: experiment.to_string(),
                    alternative: alternative.to_string(),
                    goal: goal.to_string(),
                    count,
                    buffered_at: Utc::now(),
                },
            );
            tracing::info!(
                experiment,
                alternative,
                goal,
                count,
                participant = %identity.counter_id(),
                "goal hit buffered until human confirmation"
            );
        }
    }

    fn set_last_seen(&self, experiment: &str, last_seen: DateTime<Utc>) {
        self.context
            .enrollments
            .set_last_seen(&self.session_identity(), experiment, last_seen);
    }
}

// ============================================================================
// Authenticated participant
// ============================================================================

/// A logged-in visitor keyed by account id. Always treated as human.
pub struct AuthenticatedParticipant<'a> {
    context: &'a ExperimentsContext,
    user_id: String,
}

impl<'a> AuthenticatedParticipant<'a> {
    pub fn new(context: &'a ExperimentsContext, user_id: String) -> Self {
        Self { context, user_id }
    }

    fn account_identity(&self) -> Identity {
        Identity::account(self.user_id.clone())
    }
}

impl Participant for AuthenticatedParticipant<'_> {
    fn context(&self) -> &ExperimentsContext {
        self.context
    }

    fn identity(&self) -> Option<Identity> {
        Some(self.account_identity())
    }

    fn is_confirmed_human(&self) -> bool {
        true
    }

    fn enrollment_for(&self, experiment: &str) -> Option<String> {
        store_enrollment_for(self.context, &self.account_identity(), experiment)
    }

    fn set_enrollment(
        &self,
        experiment: &Experiment,
        alternative: &str,
        enrollment_date: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) {
        let identity = self.account_identity();
        persist_enrollment(
            self.context,
            &identity,
            experiment,
            alternative,
            enrollment_date,
            last_seen,
        );
        self.context.counters.increment_participant_count(
            &experiment.name,
            alternative,
            &identity.counter_id(),
        );
    }

    fn all_enrollments(&self) -> Vec<EnrollmentData> {
        store_all_enrollments(self.context, &self.account_identity())
    }

    fn cancel_enrollment(&self, experiment: &str) {
        store_cancel_enrollment(self.context, &self.account_identity(), experiment);
    }

    fn record_goal(&self, experiment: &str, alternative: &str, goal: &str, count: u64) {
        self.context.counters.increment_goal_count(
            experiment,
            alternative,
            goal,
            &self.account_identity().counter_id(),
            count,
        );
    }

    fn set_last_seen(&self, experiment: &str, last_seen: DateTime<Utc>) {
        self.context
            .enrollments
            .set_last_seen(&self.account_identity(), experiment, last_seen);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::experiment::ExperimentState;

    fn enabled_context() -> ExperimentsContext {
        let context = ExperimentsContext::builder()
            .config(EngineConfig {
                verify_human: false,
                goals: vec!["signup".to_string()],
                ..Default::default()
            })
            .build();
        let mut experiment = context.manager.get_or_create("exp").unwrap();
        experiment.set_state(ExperimentState::Enabled);
        context.manager.save(&experiment);
        context
    }

    fn specs(names: &[&str]) -> Vec<AlternativeSpec> {
        names.iter().map(|name| AlternativeSpec::new(*name)).collect()
    }

    #[test]
    fn test_enroll_is_sticky() {
        let context = enabled_context();
        let participant = context.session_participant("abc");
        let first = participant.enroll("exp", &specs(&["red", "blue"]));
        // different alternative list, same answer
        let second = participant.enroll("exp", &specs(&["green"]));
        assert_eq!(first, second);
    }

    #[test]
    fn test_enroll_control_state_reports_default() {
        let context = ExperimentsContext::builder()
            .config(EngineConfig {
                verify_human: false,
                ..Default::default()
            })
            .build();
        let participant = context.session_participant("abc");
        // auto-created experiments start in Control
        assert_eq!(participant.enroll("fresh", &specs(&["red"])), "control");
        assert!(participant.enrollment_for("fresh").is_none());
    }

    #[test]
    fn test_enroll_track_state_rejects_new_users() {
        let context = enabled_context();
        let mut experiment = context.manager.get_experiment("exp").unwrap();
        experiment.set_state(ExperimentState::Track);
        context.manager.save(&experiment);

        let participant = context.session_participant("abc");
        assert_eq!(participant.enroll("exp", &specs(&["red"])), "control");
        assert!(participant.enrollment_for("exp").is_none());
    }

    #[test]
    fn test_enroll_registers_control_and_alternatives() {
        let context = enabled_context();
        let participant = context.session_participant("abc");
        participant.enroll("exp", &specs(&["red", "blue"]));

        let experiment = context.manager.get_experiment("exp").unwrap();
        let mut keys = experiment.alternative_keys();
        keys.sort();
        assert_eq!(keys, vec!["blue", "control", "red"]);
    }

    #[test]
    fn test_enroll_weighted_specs_give_control_average_weight() {
        let context = enabled_context();
        let participant = context.session_participant("abc");
        participant.enroll(
            "exp",
            &[
                AlternativeSpec::weighted("red", 2.0),
                AlternativeSpec::weighted("blue", 4.0),
            ],
        );
        let experiment = context.manager.get_experiment("exp").unwrap();
        assert_eq!(experiment.alternatives["control"].weight, Some(3.0));
    }

    #[test]
    fn test_forced_alternative_applies_to_new_enrollments_only() {
        let context = enabled_context();
        let participant = context.session_participant("abc");
        let chosen = participant.enroll_with_forced("exp", &specs(&["red"]), Some("red"));
        assert_eq!(chosen, "red");

        let still = participant.enroll_with_forced("exp", &specs(&["red"]), Some("control"));
        assert_eq!(still, "red");
    }

    #[test]
    fn test_goal_counts_for_enrolled_experiments() {
        let context = enabled_context();
        let participant = context.session_participant("abc");
        let alternative = participant.enroll("exp", &specs(&["red"]));
        participant.goal("signup", 2);

        assert_eq!(context.counters.goal_count("exp", &alternative, "signup"), 1);
        assert_eq!(
            context
                .counters
                .participant_goal_frequencies("exp", &alternative, "session:abc"),
            vec![("signup".to_string(), 2)]
        );
    }

    #[test]
    fn test_unconfirmed_session_buffers_until_confirmation() {
        let context = ExperimentsContext::builder()
            .config(EngineConfig {
                goals: vec!["signup".to_string()],
                ..Default::default()
            })
            .build();
        let mut experiment = context.manager.get_or_create("exp").unwrap();
        experiment.set_state(ExperimentState::Enabled);
        context.manager.save(&experiment);

        let participant = context.session_participant("abc");
        let alternative = participant.enroll("exp", &specs(&["red"]));
        participant.goal("signup", 1);

        // nothing counted yet
        assert_eq!(context.counters.participant_count("exp", &alternative), 0);
        assert_eq!(context.counters.goal_count("exp", &alternative, "signup"), 0);

        participant.confirm_human();
        assert_eq!(context.counters.participant_count("exp", &alternative), 1);
        assert_eq!(context.counters.goal_count("exp", &alternative, "signup"), 1);

        // replay happens once
        participant.confirm_human();
        assert_eq!(context.counters.participant_count("exp", &alternative), 1);
        assert_eq!(
            context
                .counters
                .participant_goal_frequencies("exp", &alternative, "session:abc"),
            vec![("signup".to_string(), 1)]
        );
    }

    #[test]
    fn test_incorporate_merges_history() {
        let context = enabled_context();
        let session = context.session_participant("abc");
        let alternative = session.enroll("exp", &specs(&["red"]));
        session.goal("signup", 3);

        let account = context.authenticated_participant("42");
        account.incorporate(&session);

        assert_eq!(account.enrollment_for("exp"), Some(alternative.clone()));
        assert_eq!(
            context
                .counters
                .participant_goal_frequencies("exp", &alternative, "user:42"),
            vec![("signup".to_string(), 3)]
        );
        // the session's side is gone
        assert!(session.enrollment_for("exp").is_none());
        assert!(context
            .counters
            .participant_goal_frequencies("exp", &alternative, "session:abc")
            .is_empty());
    }

    #[test]
    fn test_incorporate_discards_when_already_enrolled() {
        let context = enabled_context();
        let session = context.session_participant("abc");
        session.set_alternative("exp", "red");
        session.goal("signup", 5);

        let account = context.authenticated_participant("42");
        account.set_alternative("exp", "blue");
        account.incorporate(&session);

        assert_eq!(account.enrollment_for("exp"), Some("blue".to_string()));
        assert!(context
            .counters
            .participant_goal_frequencies("exp", "blue", "user:42")
            .is_empty());
        assert!(session.enrollment_for("exp").is_none());
    }

    #[test]
    fn test_visit_fires_retention_goals_across_session_windows() {
        let context = enabled_context();
        let participant = context.session_participant("abc");
        let alternative = participant.enroll("exp", &specs(&["red"]));

        participant.visit();
        assert_eq!(
            context
                .counters
                .goal_count("exp", &alternative, VISIT_NOT_PRESENT_COUNT_GOAL),
            1
        );
        assert_eq!(
            context
                .counters
                .goal_count("exp", &alternative, VISIT_PRESENT_COUNT_GOAL),
            0
        );

        // within the session window: nothing new fires
        participant.visit();
        assert_eq!(
            context
                .counters
                .participant_goal_frequencies("exp", &alternative, "session:abc"),
            vec![(VISIT_NOT_PRESENT_COUNT_GOAL.to_string(), 1)]
        );

        // a full session window later, both goals fire
        let stale = Utc::now() - Duration::hours(context.config.session_length_hours + 1);
        context
            .enrollments
            .set_last_seen(&Identity::session("abc"), "exp", stale);
        participant.visit();
        assert_eq!(
            context
                .counters
                .goal_count("exp", &alternative, VISIT_PRESENT_COUNT_GOAL),
            1
        );
    }

    #[test]
    fn test_dummy_never_enrolls_or_counts() {
        let context = enabled_context();
        let dummy = DummyParticipant::new(&context);
        assert_eq!(dummy.enroll("exp", &specs(&["red", "blue"])), "control");
        assert!(dummy.is_enrolled("exp", "control"));
        assert!(!dummy.is_enrolled("exp", "red"));

        dummy.goal("signup", 1);
        dummy.visit();
        for alternative in ["control", "red", "blue"] {
            assert_eq!(context.counters.participant_count("exp", alternative), 0);
        }
    }

    #[test]
    fn test_set_alternative_bypasses_acceptance() {
        let context = enabled_context();
        let mut experiment = context.manager.get_experiment("exp").unwrap();
        experiment.set_state(ExperimentState::Track);
        context.manager.save(&experiment);

        let participant = context.authenticated_participant("42");
        participant.set_alternative("exp", "red");
        assert_eq!(participant.enrollment_for("exp"), Some("red".to_string()));
        assert_eq!(context.counters.participant_count("exp", "red"), 1);
    }
}
