//! Tabular Q-learning path selection
//!
//! State is the traffic class, action is the uplink index. There is no
//! state transition: every decision re-reads the same class row, so the
//! bootstrap term uses that row's maximum.

use crate::config::ControllerConfig;
use crate::models::TrafficClass;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::warn;

/// One step of the Q-learning rule
pub fn q_update(q: f64, reward: f64, alpha: f64, gamma: f64, max_next: f64) -> f64 {
    (1.0 - alpha) * q + alpha * (reward + gamma * max_next)
}

/// Reward of moving a flow onto a path with the given forecast load.
///
/// A path without a forecast counts as idle.
pub fn reward(reward_constant: f64, predicted_load: Option<f64>) -> f64 {
    reward_constant / (predicted_load.unwrap_or(0.0).max(0.0) + 1.0)
}

/// Value estimates indexed by (traffic class, path index)
#[derive(Debug, Clone, Serialize)]
pub struct QTable {
    rows: Vec<Vec<f64>>,
}

impl QTable {
    pub fn new(states: usize, actions: usize) -> Self {
        Self {
            rows: vec![vec![0.0; actions]; states],
        }
    }

    pub fn row(&self, class: TrafficClass) -> &[f64] {
        &self.rows[class.index()]
    }

    pub fn get(&self, class: TrafficClass, action: usize) -> f64 {
        self.rows[class.index()][action]
    }

    pub fn set(&mut self, class: TrafficClass, action: usize, value: f64) {
        self.rows[class.index()][action] = value;
    }

    /// Replace a whole row, e.g. when warm-starting from known estimates
    pub fn set_row(&mut self, class: TrafficClass, values: &[f64]) {
        let row = &mut self.rows[class.index()];
        for (slot, value) in row.iter_mut().zip(values) {
            *slot = *value;
        }
    }

    /// Index of the first maximum of a class row
    pub fn best_action(&self, class: TrafficClass) -> usize {
        let mut best = 0;
        for (action, value) in self.row(class).iter().enumerate() {
            if *value > self.row(class)[best] {
                best = action;
            }
        }
        best
    }

    pub fn max_value(&self, class: TrafficClass) -> f64 {
        self.row(class).iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn actions(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }
}

/// Learning parameters of the selector
#[derive(Debug, Clone, Copy)]
pub struct SelectorConfig {
    pub paths: usize,
    pub epsilon: f64,
    pub alpha: f64,
    pub gamma: f64,
}

impl From<&ControllerConfig> for SelectorConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            paths: config.path_count(),
            epsilon: config.epsilon,
            alpha: config.alpha,
            gamma: config.gamma,
        }
    }
}

/// Epsilon-greedy agent choosing an uplink per traffic class.
///
/// The table lives as long as the selector and is never reset.
pub struct PathSelector {
    table: QTable,
    config: SelectorConfig,
    rng: StdRng,
}

impl PathSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic exploration, for replay and tests
    pub fn with_seed(config: SelectorConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SelectorConfig, rng: StdRng) -> Self {
        Self {
            table: QTable::new(TrafficClass::COUNT, config.paths),
            config,
            rng,
        }
    }

    /// Pick a path index for `class`
    pub fn select(&mut self, class: TrafficClass) -> usize {
        if self.config.paths == 0 {
            return 0;
        }
        if self.rng.gen::<f64>() < self.config.epsilon {
            self.rng.gen_range(0..self.config.paths)
        } else {
            self.table.best_action(class)
        }
    }

    /// Apply one Q-learning step and return the new estimate.
    ///
    /// Non-finite rewards or out-of-range actions leave the table untouched.
    pub fn update(&mut self, class: TrafficClass, action: usize, reward: f64) -> Option<f64> {
        if action >= self.table.actions() || !reward.is_finite() {
            warn!(class = %class, action, reward, "Skipping invalid Q-table update");
            return None;
        }

        let old = self.table.get(class, action);
        let max_next = self.table.max_value(class);
        let new = q_update(old, reward, self.config.alpha, self.config.gamma, max_next);
        if !new.is_finite() {
            warn!(class = %class, action, "Q-table update overflowed, keeping previous value");
            return None;
        }

        self.table.set(class, action, new);
        Some(new)
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut QTable {
        &mut self.table
    }
}
