//! End-to-End Test Suite for the Splitlab Engine
//!
//! Exercises the full enrollment → counting → significance pipeline the way
//! a deployment would drive it: many sessions, identity merges on login,
//! retention visits, and cluster-wide lock contention.
//!
//! Run with: cargo test --test engine_tests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use splitlab::config::EngineConfig;
use splitlab::context::{ExperimentsContext, RequestInfo};
use splitlab::enrollment::Identity;
use splitlab::experiment::{AlternativeSpec, ExperimentState};
use splitlab::lock::{DistributedLock, LockStore, MemoryLockStore};
use splitlab::participant::Participant;
use splitlab::report::experiment_report;

fn engine() -> ExperimentsContext {
    // RUST_LOG=splitlab=debug surfaces the audit event stream during a run
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let context = ExperimentsContext::builder()
        .config(EngineConfig {
            verify_human: false,
            goals: vec!["signup".to_string(), "purchase".to_string()],
            ..Default::default()
        })
        .build();
    let mut experiment = context.manager.get_or_create("button_color").unwrap();
    experiment.set_state(ExperimentState::Enabled);
    context.manager.save(&experiment);
    context
}

fn specs(names: &[&str]) -> Vec<AlternativeSpec> {
    names.iter().map(|name| AlternativeSpec::new(*name)).collect()
}

// ============================================================================
// ENROLLMENT
// ============================================================================

#[test]
fn hundred_sessions_enroll_once_each() {
    let context = engine();

    let mut assignments = HashMap::new();
    for i in 0..100 {
        let participant = context.session_participant(format!("session{i}"));
        let first = participant.enroll("button_color", &specs(&["red", "blue"]));
        // a repeat call for the same session never flips the assignment
        let second = participant.enroll("button_color", &specs(&["red", "blue"]));
        assert_eq!(first, second);
        assignments.insert(i, first);
    }

    let total: u64 = ["control", "red", "blue"]
        .iter()
        .map(|alternative| context.counters.participant_count("button_color", alternative))
        .sum();
    assert_eq!(total, 100);
}

#[test]
fn weighted_assignment_converges_to_weights() {
    let context = engine();
    let alternatives = vec![
        AlternativeSpec::weighted("red", 1.0),
        AlternativeSpec::weighted("blue", 2.0),
        AlternativeSpec::weighted("control", 1.0),
    ];

    let trials = 12_000u64;
    for i in 0..trials {
        let participant = context.session_participant(format!("session{i}"));
        participant.enroll("button_color", &alternatives);
    }

    let fraction = |alternative: &str| {
        context.counters.participant_count("button_color", alternative) as f64 / trials as f64
    };
    assert!((fraction("red") - 0.25).abs() < 0.03, "red = {}", fraction("red"));
    assert!((fraction("blue") - 0.50).abs() < 0.03, "blue = {}", fraction("blue"));
    assert!(
        (fraction("control") - 0.25).abs() < 0.03,
        "control = {}",
        fraction("control")
    );
}

#[test]
fn bots_are_never_counted() {
    let context = engine();
    let bot = context.participant(&RequestInfo {
        user_agent: Some("Googlebot/2.1 (+http://www.google.com/bot.html)".to_string()),
        session_key: Some("bot-session".to_string()),
        ..Default::default()
    });

    assert_eq!(bot.enroll("button_color", &specs(&["red"])), "control");
    bot.goal("signup", 1);

    assert_eq!(context.counters.participant_count("button_color", "control"), 0);
    assert_eq!(context.counters.goal_count("button_color", "control", "signup"), 0);
}

// ============================================================================
// IDENTITY MERGE
// ============================================================================

#[test]
fn login_incorporates_session_history() {
    let context = engine();

    let session = context.session_participant("anon");
    let alternative = session.enroll("button_color", &specs(&["red", "blue"]));
    session.goal("signup", 3);

    // the account was never in this experiment
    let account = context.authenticated_participant("1001");
    assert!(account.enrollment_for("button_color").is_none());

    account.incorporate(&session);

    assert_eq!(account.enrollment_for("button_color"), Some(alternative.clone()));
    assert_eq!(
        context.counters.participant_goal_frequencies(
            "button_color",
            &alternative,
            &Identity::account("1001").counter_id(),
        ),
        vec![("signup".to_string(), 3)]
    );

    // the anonymous side is fully gone
    assert!(session.enrollment_for("button_color").is_none());
    assert!(context
        .counters
        .participant_goal_frequencies(
            "button_color",
            &alternative,
            &Identity::session("anon").counter_id(),
        )
        .is_empty());
}

// ============================================================================
// HUMAN GATING
// ============================================================================

#[test]
fn unconfirmed_goals_replay_exactly_once() {
    let context = ExperimentsContext::builder()
        .config(EngineConfig {
            goals: vec!["signup".to_string()],
            ..Default::default()
        })
        .build();
    let mut experiment = context.manager.get_or_create("button_color").unwrap();
    experiment.set_state(ExperimentState::Enabled);
    context.manager.save(&experiment);

    let participant = context.session_participant("maybe-human");
    let alternative = participant.enroll("button_color", &specs(&["red"]));
    participant.goal("signup", 2);

    assert_eq!(context.counters.participant_count("button_color", &alternative), 0);

    participant.confirm_human();
    participant.confirm_human();

    assert_eq!(context.counters.participant_count("button_color", &alternative), 1);
    assert_eq!(
        context.counters.participant_goal_frequencies(
            "button_color",
            &alternative,
            "session:maybe-human",
        ),
        vec![("signup".to_string(), 2)]
    );
}

// ============================================================================
// SIGNIFICANCE PIPELINE
// ============================================================================

#[test]
fn report_reflects_a_conversion_difference() {
    let context = engine();
    let mut experiment = context.manager.get_experiment("button_color").unwrap();
    experiment.relevant_mwu_goals = vec!["signup".to_string()];
    context.manager.save(&experiment);

    // red converts at 80%, control at 20%, forced assignment for determinism
    for i in 0..100 {
        let participant = context.session_participant(format!("red{i}"));
        participant.enroll_with_forced("button_color", &specs(&["red"]), Some("red"));
        if i % 10 < 8 {
            participant.goal("signup", 1);
        }
    }
    for i in 0..100 {
        let participant = context.session_participant(format!("ctl{i}"));
        participant.enroll_with_forced("button_color", &specs(&["red"]), Some("control"));
        if i % 10 < 2 {
            participant.goal("signup", 1);
        }
    }

    let experiment = context.manager.get_experiment("button_color").unwrap();
    let report = experiment_report(&context, &experiment);
    let signup = &report.results["signup"];

    assert_eq!(signup.control.conversions, 20);
    let red = &signup.alternatives["red"];
    assert_eq!(red.conversions, 80);
    assert_eq!(red.conversion_rate, Some(80.0));
    assert!(red.improvement.unwrap() > 200.0);
    assert!(red.confidence.unwrap() > 99.0);
    assert!(red.mann_whitney_confidence.unwrap() > 99.0);
    assert!(signup.mwu_histogram.is_some());
}

// ============================================================================
// RETENTION VISITS
// ============================================================================

#[test]
fn visits_within_a_session_window_count_once() {
    let context = engine();
    let participant = context.session_participant("visitor");
    let alternative = participant.enroll("button_color", &specs(&["red"]));

    participant.visit();
    participant.visit();
    participant.visit();

    assert_eq!(
        context.counters.participant_goal_frequencies(
            "button_color",
            &alternative,
            "session:visitor",
        ),
        vec![("_retention_not_present_visits".to_string(), 1)]
    );
}

// ============================================================================
// EXPERIMENT LIFECYCLE
// ============================================================================

#[test]
fn deleting_an_experiment_cascades() {
    let context = engine();
    let participant = context.session_participant("abc");
    let alternative = participant.enroll("button_color", &specs(&["red"]));
    participant.goal("signup", 1);

    context.delete_experiment("button_color");

    assert!(context.manager.get_experiment("button_color").is_none());
    assert!(participant.all_enrollments().is_empty());
    assert_eq!(context.counters.participant_count("button_color", &alternative), 0);
    assert_eq!(
        context.counters.goal_count("button_color", &alternative, "signup"),
        0
    );
}

// ============================================================================
// DISTRIBUTED LOCK
// ============================================================================

#[test]
fn lock_contention_has_exactly_one_winner() {
    let store = Arc::new(MemoryLockStore::new());
    let mut threads = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        threads.push(std::thread::spawn(move || {
            let mut lock = DistributedLock::new(store as Arc<dyn LockStore>, "remote_sync");
            let won = lock.acquire(false, None).unwrap();
            if won {
                std::mem::forget(lock);
            }
            won
        }));
    }
    let winners = threads
        .into_iter()
        .map(|thread| thread.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn lock_is_reacquirable_after_expiry() {
    let store = Arc::new(MemoryLockStore::new());
    let mut first = DistributedLock::new(store.clone() as Arc<dyn LockStore>, "remote_sync");
    assert!(first
        .acquire(true, Some(Duration::from_millis(60)))
        .unwrap());

    std::thread::sleep(Duration::from_millis(100));

    let mut second = DistributedLock::new(store as Arc<dyn LockStore>, "remote_sync");
    assert!(second.acquire(false, None).unwrap());
    assert!(!first.locked());
}
