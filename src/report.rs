//! Reporting: conversion rates, confidence figures, and chartable
//! distributions for each goal of an experiment.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};

use crate::constants::{CONTROL_GROUP, MIN_ACTIONS_TO_SHOW};
use crate::context::ExperimentsContext;
use crate::experiment::Experiment;
use crate::significance::{chi_square_p_value, mann_whitney};

/// Conversion rate as a percentage. None when there are no participants.
pub fn rate(conversions: u64, participants: u64) -> Option<f64> {
    if participants == 0 {
        return None;
    }
    Some(100.0 * conversions as f64 / participants as f64)
}

/// Relative improvement of rate `a` over baseline rate `b`, as a percentage.
pub fn improvement(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    let a = a?;
    let b = b?;
    if a == 0.0 || b == 0.0 {
        return None;
    }
    Some((a - b) * 100.0 / b)
}

/// Chi-squared confidence (percent) that two conversion rates differ.
pub fn chi_squared_confidence(
    a_count: u64,
    a_conversions: u64,
    b_count: u64,
    b_conversions: u64,
) -> Option<f64> {
    let contingency_table = vec![
        vec![
            a_count.saturating_sub(a_conversions) as f64,
            a_conversions as f64,
        ],
        vec![
            b_count.saturating_sub(b_conversions) as f64,
            b_conversions as f64,
        ],
    ];
    let (_, p_value) = chi_square_p_value(&contingency_table);
    p_value.map(|p| (1.0 - p) * 100.0)
}

/// Mann-Whitney confidence (percent) that two action-count distributions
/// differ. The underlying test is one-tailed, so the two-tailed probability
/// is doubled before inverting.
pub fn mann_whitney_confidence(
    a_distribution: &BTreeMap<u64, u64>,
    b_distribution: &BTreeMap<u64, u64>,
) -> Option<f64> {
    let (_, p_value) = mann_whitney(a_distribution, b_distribution, true);
    p_value.map(|p| (1.0 - p * 2.0) * 100.0)
}

/// Mean actions per participant over a distribution. Zero when empty.
pub fn average_actions(distribution: &BTreeMap<u64, u64>) -> f64 {
    let mut total_users = 0u64;
    let mut total_actions = 0u64;
    for (actions, frequency) in distribution {
        total_users += frequency;
        total_actions += actions * frequency;
    }
    if total_users == 0 {
        return 0.0;
    }
    total_actions as f64 / total_users as f64
}

/// Fill in the zero-actions bucket: participants who never hit the goal are
/// absent from the stored distribution but belong in the sample.
pub fn fixup_distribution(
    mut distribution: BTreeMap<u64, u64>,
    participant_count: u64,
) -> BTreeMap<u64, u64> {
    let counted: u64 = distribution.values().sum();
    let zeros = participant_count.saturating_sub(counted);
    *distribution.entry(0).or_insert(0) += zeros;
    distribution
}

/// Surround gaps in a sorted point sequence with stopper points so a chart
/// draws correct zero ranges, without filling the whole range in.
///
/// `[1,2,3,10,11,13]` becomes `[0,1,2,3,4,9,10,11,12,13]` (the leading zero
/// stopper is trimmed later by the table builder).
fn points_with_surrounding_gaps(points: &[u64]) -> Vec<u64> {
    let mut with_gaps = Vec::new();
    let mut last_point: i64 = -1;
    for &point in points {
        let point = point as i64;
        if last_point + 1 == point {
            // contiguous
        } else if last_point + 2 == point {
            with_gaps.push((last_point + 1) as u64);
        } else {
            with_gaps.push((last_point + 1) as u64);
            with_gaps.push((point - 1) as u64);
        }
        with_gaps.push(point as u64);
        last_point = point;
    }
    with_gaps
}

/// Turn named action-count distributions into a chart table: one header row
/// (`"x"` plus distribution names), then one row per action count holding the
/// cumulative fraction of each sample with at least that many actions.
/// Rows past the last point where any distribution has
/// [`MIN_ACTIONS_TO_SHOW`] participants are trimmed, as is the zero row.
pub fn conversion_distributions_to_graph_table(
    distributions: &[(String, BTreeMap<u64, u64>)],
) -> Value {
    let totals: Vec<f64> = distributions
        .iter()
        .map(|(_, dist)| {
            let sum: u64 = dist.values().sum();
            if sum == 0 {
                1.0
            } else {
                sum as f64
            }
        })
        .collect();

    let mut head = vec![json!("x")];
    head.extend(distributions.iter().map(|(name, _)| json!(name)));

    let mut points: Vec<u64> = distributions
        .iter()
        .flat_map(|(_, dist)| dist.keys().copied())
        .collect();
    points.sort_unstable();
    points.dedup();

    let mut body: Vec<(u64, Vec<f64>)> = points_with_surrounding_gaps(&points)
        .into_iter()
        .map(|point| {
            let fractions = distributions
                .iter()
                .zip(&totals)
                .map(|((_, dist), total)| dist.get(&point).copied().unwrap_or(0) as f64 / total)
                .collect();
            (point, fractions)
        })
        .collect();

    // cumulate from the right: each row becomes "fraction with >= x actions"
    let mut accumulator = vec![0.0; distributions.len()];
    for (_, fractions) in body.iter_mut().rev() {
        for (acc, fraction) in accumulator.iter_mut().zip(fractions.iter_mut()) {
            *acc += *fraction;
            *fraction = *acc;
        }
    }

    let highest_interesting_point = points
        .iter()
        .filter(|point| {
            distributions
                .iter()
                .any(|(_, dist)| dist.get(point).copied().unwrap_or(0) >= MIN_ACTIONS_TO_SHOW)
        })
        .max()
        .copied()
        .unwrap_or(0);

    let mut table = vec![Value::Array(head)];
    for (point, fractions) in body {
        if point == 0 || point > highest_interesting_point {
            continue;
        }
        let mut row = vec![json!(point)];
        row.extend(fractions.into_iter().map(|fraction| json!(fraction)));
        table.push(Value::Array(row));
    }
    Value::Array(table)
}

/// Control-side figures for one goal.
#[derive(Debug, Clone, Serialize)]
pub struct ControlResult {
    pub conversions: u64,
    pub conversion_rate: Option<f64>,
    pub average_goal_actions: Option<f64>,
}

/// Alternative-vs-control figures for one goal.
#[derive(Debug, Clone, Serialize)]
pub struct AlternativeResult {
    pub conversions: u64,
    pub conversion_rate: Option<f64>,
    pub improvement: Option<f64>,
    pub confidence: Option<f64>,
    pub average_goal_actions: Option<f64>,
    pub mann_whitney_confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoalResult {
    pub control: ControlResult,
    pub alternatives: BTreeMap<String, AlternativeResult>,
    /// Whether the experiment flagged this goal as worth showing.
    pub relevant: bool,
    /// Whether Mann-Whitney figures were computed for this goal.
    pub mwu: bool,
    pub mwu_histogram: Option<Value>,
}

/// Full reporting view of one experiment.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub experiment: String,
    pub participants: BTreeMap<String, u64>,
    pub control_participants: u64,
    pub results: BTreeMap<String, GoalResult>,
}

/// Assemble the report for an experiment from live counters.
pub fn experiment_report(
    context: &ExperimentsContext,
    experiment: &Experiment,
) -> ExperimentReport {
    let counters = &context.counters;
    let name = experiment.name.as_str();

    let participants: BTreeMap<String, u64> = experiment
        .alternatives
        .keys()
        .map(|alternative| {
            (
                alternative.clone(),
                counters.participant_count(name, alternative),
            )
        })
        .collect();
    let control_participants = counters.participant_count(name, CONTROL_GROUP);

    // without explicit goal subsets, every goal is relevant
    let no_subsets =
        experiment.relevant_chi2_goals.is_empty() && experiment.relevant_mwu_goals.is_empty();

    let mut results = BTreeMap::new();
    for goal in context.config.all_goals() {
        let show_mwu = experiment.relevant_mwu_goals.contains(&goal);
        let relevant = no_subsets
            || experiment.relevant_chi2_goals.contains(&goal)
            || experiment.relevant_mwu_goals.contains(&goal);

        let control_conversions = counters.goal_count(name, CONTROL_GROUP, &goal);
        let control_rate = rate(control_conversions, control_participants);

        let mut mwu_histogram = Vec::new();
        let control_distribution = if show_mwu {
            let distribution = fixup_distribution(
                counters.goal_distribution(name, CONTROL_GROUP, &goal),
                control_participants,
            );
            mwu_histogram.push((CONTROL_GROUP.to_string(), distribution.clone()));
            Some(distribution)
        } else {
            None
        };

        let mut alternatives = BTreeMap::new();
        for alternative in experiment.alternatives.keys() {
            if alternative == CONTROL_GROUP {
                continue;
            }
            let conversions = counters.goal_count(name, alternative, &goal);
            let alternative_participants = counters.participant_count(name, alternative);
            let conversion_rate = rate(conversions, alternative_participants);
            let confidence = chi_squared_confidence(
                alternative_participants,
                conversions,
                control_participants,
                control_conversions,
            );

            let (average_goal_actions, distribution_confidence) = match &control_distribution {
                Some(control_distribution) => {
                    let distribution = fixup_distribution(
                        counters.goal_distribution(name, alternative, &goal),
                        alternative_participants,
                    );
                    let average = average_actions(&distribution);
                    let confidence =
                        mann_whitney_confidence(&distribution, control_distribution);
                    mwu_histogram.push((alternative.clone(), distribution));
                    (Some(average), confidence)
                }
                None => (None, None),
            };

            alternatives.insert(
                alternative.clone(),
                AlternativeResult {
                    conversions,
                    conversion_rate,
                    improvement: improvement(conversion_rate, control_rate),
                    confidence,
                    average_goal_actions,
                    mann_whitney_confidence: distribution_confidence,
                },
            );
        }

        results.insert(
            goal.clone(),
            GoalResult {
                control: ControlResult {
                    conversions: control_conversions,
                    conversion_rate: control_rate,
                    average_goal_actions: control_distribution
                        .as_ref()
                        .map(average_actions),
                },
                alternatives,
                relevant,
                mwu: show_mwu,
                mwu_histogram: show_mwu
                    .then(|| conversion_distributions_to_graph_table(&mwu_histogram)),
            },
        );
    }

    ExperimentReport {
        experiment: name.to_string(),
        participants,
        control_participants,
        results,
    }
}
