//! Experiment metadata: alternatives, weights, lifecycle state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::CONTROL_GROUP;
use crate::errors::{ExperimentError, Result};

/// Lifecycle state of an experiment.
///
/// | state       | displaying alternatives | accepting new users |
/// |-------------|-------------------------|---------------------|
/// | Control     | no                      | no                  |
/// | Enabled     | yes                     | yes                 |
/// | SwitchGated | yes                     | external flag value |
/// | Track       | yes                     | no                  |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentState {
    Control,
    Enabled,
    SwitchGated,
    Track,
}

/// External feature-flag evaluation used by [`ExperimentState::SwitchGated`]
/// experiments. The engine never owns flag storage.
pub trait FlagEvaluator: Send + Sync {
    fn is_active(&self, key: &str) -> bool;
}

/// Evaluator for deployments without a feature-flag system: every switch
/// reads as inactive, so switch-gated experiments never enroll.
pub struct NoFlags;

impl FlagEvaluator for NoFlags {
    fn is_active(&self, _key: &str) -> bool {
        false
    }
}

/// One variant a participant may be assigned to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
}

/// An alternative name with an optional weight, as accepted by `enroll`.
/// Parsed from `"name"` or `"name:weight"`.
#[derive(Debug, Clone, PartialEq)]
pub struct AlternativeSpec {
    pub name: String,
    pub weight: Option<f64>,
}

impl AlternativeSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weight: None,
        }
    }

    pub fn weighted(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight: Some(weight),
        }
    }

    /// Parse `"name"` or `"name:weight"`. The name must be non-empty and
    /// weights must be finite and >= 0.
    pub fn parse(spec: &str) -> Result<Self> {
        if spec.is_empty() || spec.starts_with(':') {
            return Err(ExperimentError::InvalidAlternative(spec.to_string()));
        }
        match spec.split_once(':') {
            None => Ok(Self::new(spec)),
            Some((name, raw_weight)) => {
                let weight: f64 = raw_weight
                    .trim()
                    .parse()
                    .map_err(|_| ExperimentError::InvalidWeight(spec.to_string()))?;
                if !weight.is_finite() || weight < 0.0 {
                    return Err(ExperimentError::InvalidWeight(spec.to_string()));
                }
                Ok(Self::weighted(name, weight))
            }
        }
    }
}

/// A named A/B test and its variant set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub name: String,
    pub description: String,
    pub alternatives: BTreeMap<String, Alternative>,
    pub state: ExperimentState,
    /// Feature-flag key consulted when the state is [`ExperimentState::SwitchGated`].
    pub switch_key: Option<String>,
    /// Goal subset reported with chi-squared confidence.
    pub relevant_chi2_goals: Vec<String>,
    /// Goal subset reported with Mann-Whitney confidence and a distribution chart.
    pub relevant_mwu_goals: Vec<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

impl Experiment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            alternatives: BTreeMap::new(),
            state: ExperimentState::Control,
            switch_key: None,
            relevant_chi2_goals: Vec::new(),
            relevant_mwu_goals: Vec::new(),
            start_date: Utc::now(),
            end_date: None,
        }
    }

    pub fn is_displaying_alternatives(&self) -> bool {
        !matches!(self.state, ExperimentState::Control)
    }

    pub fn is_accepting_new_users(&self, flags: &dyn FlagEvaluator) -> bool {
        match self.state {
            ExperimentState::Control | ExperimentState::Track => false,
            ExperimentState::Enabled => true,
            ExperimentState::SwitchGated => self
                .switch_key
                .as_deref()
                .map(|key| flags.is_active(key))
                .unwrap_or(false),
        }
    }

    /// Change lifecycle state. Moving to Control stamps the end date;
    /// every other state reopens the experiment.
    pub fn set_state(&mut self, state: ExperimentState) {
        self.state = state;
        self.end_date = match state {
            ExperimentState::Control => Some(Utc::now()),
            _ => None,
        };
    }

    /// Add the alternative if missing; backfill a weight onto a weightless
    /// one. Returns true when the experiment changed and needs saving.
    pub fn ensure_alternative_exists(&mut self, name: &str, weight: Option<f64>) -> bool {
        let mut changed = false;
        let alternative = self.alternatives.entry(name.to_string()).or_insert_with(|| {
            changed = true;
            Alternative {
                enabled: true,
                ..Default::default()
            }
        });
        if let Some(weight) = weight {
            if alternative.weight.is_none() {
                alternative.weight = Some(weight);
                changed = true;
            }
        }
        changed
    }

    /// The alternative reported when the experiment is not displaying.
    pub fn default_alternative(&self) -> &str {
        self.alternatives
            .iter()
            .find(|(_, alt)| alt.default)
            .map(|(name, _)| name.as_str())
            .unwrap_or(CONTROL_GROUP)
    }

    pub fn set_default_alternative(&mut self, name: &str) {
        for (alternative_name, alternative) in self.alternatives.iter_mut() {
            alternative.default = alternative_name == name;
        }
    }

    /// Pick an alternative at random. Weighted choice when *every*
    /// alternative carries a weight; otherwise uniform (with a warning if
    /// only some do). None when no alternatives exist.
    pub fn random_alternative(&self) -> Option<String> {
        if self.alternatives.is_empty() {
            return None;
        }
        let weighted = self.alternatives.values().filter(|a| a.weight.is_some()).count();
        if weighted == self.alternatives.len() {
            let choices: Vec<(&str, f64)> = self
                .alternatives
                .iter()
                .map(|(name, alt)| (name.as_str(), alt.weight.unwrap_or(0.0)))
                .collect();
            return weighted_choice(&choices).map(str::to_string);
        }
        if weighted > 0 {
            tracing::warn!(
                experiment = %self.name,
                "ignoring weights, all alternatives need to have specified weights"
            );
        }
        let index = rand::thread_rng().gen_range(0..self.alternatives.len());
        self.alternatives.keys().nth(index).cloned()
    }

    /// A freshly auto-created experiment has only `control` until the first
    /// `enroll` supplies alternatives.
    pub fn has_alternatives(&self) -> bool {
        self.alternatives.len() > 1
    }

    pub fn alternative_keys(&self) -> Vec<String> {
        self.alternatives.keys().cloned().collect()
    }
}

/// Cumulative-weight scan over (name, weight) pairs.
fn weighted_choice<'a>(choices: &[(&'a str, f64)]) -> Option<&'a str> {
    let total: f64 = choices.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return choices.first().map(|(name, _)| *name);
    }
    let r = rand::thread_rng().gen_range(0.0..total);
    let mut upto = 0.0;
    for (name, weight) in choices {
        upto += weight;
        if upto >= r {
            return Some(name);
        }
    }
    choices.last().map(|(name, _)| *name)
}
