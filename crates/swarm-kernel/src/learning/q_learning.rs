//! Tabular Q-learning over a discretized 2-D state space.
//!
//! The first two observation components are mapped onto a `bins x bins` grid
//! and each cell holds one value per action. Updates are one-step
//! temporal-difference backups; there is no replay or eligibility trace.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::LearningAlgorithm;
use crate::config::LearningConfig;
use crate::error::LearningError;

/// Observation components consumed by the discretizer.
const STATE_DIMS: usize = 2;

/// A tabular Q-learner.
///
/// Table dimensions are fixed at construction and every lookup goes through
/// [`QLearning::discretize`], which clamps into range, so no index can fall
/// outside the table.
#[derive(Debug, Clone)]
pub struct QLearning {
    /// Flattened `[x][y][action]` value table
    table: Vec<f64>,
    bins: usize,
    actions: usize,
    extent: f64,
    epsilon: f64,
    alpha: f64,
    gamma: f64,
    rng: ChaCha8Rng,
}

impl QLearning {
    /// Create a learner with a randomly initialized table.
    pub fn new(config: &LearningConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };

        let bins = config.state_bins.max(1);
        let actions = config.action_count.max(1);
        let init_scale = config.init_scale.max(0.0);

        // Small positive noise breaks the all-equal ties of a zeroed table
        let table = (0..bins * bins * actions)
            .map(|_| rng.random::<f64>() * init_scale)
            .collect();

        Self {
            table,
            bins,
            actions,
            extent: config.observation_extent,
            epsilon: config.exploration_rate,
            alpha: config.learning_rate,
            gamma: config.discount_factor,
            rng,
        }
    }

    /// Bins per axis.
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Map an observation to its `(x, y)` table cell.
    pub fn discretize(&self, observation: &[f64]) -> Result<(usize, usize), LearningError> {
        validate_observation(observation)?;
        Ok((self.bin(observation[0]), self.bin(observation[1])))
    }

    /// Values of every action in `cell`.
    ///
    /// `cell` is clamped the same way discretized coordinates are.
    pub fn action_values(&self, cell: (usize, usize)) -> &[f64] {
        let start = self.offset(cell);
        &self.table[start..start + self.actions]
    }

    fn bin(&self, coord: f64) -> usize {
        let scaled = (coord * self.bins as f64 / self.extent).floor();
        // Saturating cast: infinities land on the edges, NaN on 0
        scaled.clamp(0.0, (self.bins - 1) as f64) as usize
    }

    fn offset(&self, (x, y): (usize, usize)) -> usize {
        let x = x.min(self.bins - 1);
        let y = y.min(self.bins - 1);
        (x * self.bins + y) * self.actions
    }

    /// First-seen-wins argmax: ties go to the lowest action index.
    fn argmax(values: &[f64]) -> usize {
        let mut best_action = 0;
        let mut best_value = values[0];
        for (action, &value) in values.iter().enumerate().skip(1) {
            if value > best_value {
                best_value = value;
                best_action = action;
            }
        }
        best_action
    }

    fn max_of(values: &[f64]) -> f64 {
        values[Self::argmax(values)]
    }
}

fn validate_observation(observation: &[f64]) -> Result<(), LearningError> {
    if observation.len() < STATE_DIMS {
        return Err(LearningError::ObservationDimension {
            expected: STATE_DIMS,
            got: observation.len(),
        });
    }
    for (index, &value) in observation.iter().take(STATE_DIMS).enumerate() {
        if !value.is_finite() {
            return Err(LearningError::NonFiniteObservation { index, value });
        }
    }
    Ok(())
}

impl LearningAlgorithm for QLearning {
    fn name(&self) -> &str {
        "q_learning"
    }

    fn action_count(&self) -> usize {
        self.actions
    }

    fn exploration_rate(&self) -> f64 {
        self.epsilon
    }

    fn select_action(
        &mut self,
        observation: &[f64],
        explore_rate: f64,
    ) -> Result<usize, LearningError> {
        validate_observation(observation)?;

        if self.rng.random::<f64>() < explore_rate {
            return Ok(self.rng.random_range(0..self.actions));
        }
        self.greedy_action(observation)
    }

    fn greedy_action(&self, observation: &[f64]) -> Result<usize, LearningError> {
        let cell = self.discretize(observation)?;
        Ok(Self::argmax(self.action_values(cell)))
    }

    fn max_value(&self, observation: &[f64]) -> Result<f64, LearningError> {
        let cell = self.discretize(observation)?;
        Ok(Self::max_of(self.action_values(cell)))
    }

    fn update(
        &mut self,
        observation: &[f64],
        action: usize,
        reward: f64,
        next_observation: &[f64],
        terminal: bool,
    ) -> Result<(), LearningError> {
        if action >= self.actions {
            return Err(LearningError::ActionOutOfRange {
                action,
                action_count: self.actions,
            });
        }
        if !reward.is_finite() {
            return Err(LearningError::NonFiniteReward(reward));
        }
        let cell = self.discretize(observation)?;
        let next_cell = self.discretize(next_observation)?;

        let target = if terminal {
            reward
        } else {
            reward + self.gamma * Self::max_of(self.action_values(next_cell))
        };

        let index = self.offset(cell) + action;
        let current = self.table[index];
        self.table[index] = current + self.alpha * (target - current);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(seed: u64) -> LearningConfig {
        LearningConfig {
            seed: Some(seed),
            ..LearningConfig::default()
        }
    }

    #[test]
    fn test_initial_values_small_and_positive() {
        let ql = QLearning::new(&config(1));
        assert_eq!(ql.table.len(), 10 * 10 * 4);
        assert!(ql.table.iter().all(|v| (0.0..0.01).contains(v)));
        assert!(ql.table.iter().any(|v| *v > 0.0));
    }

    #[test]
    fn test_seeded_tables_are_identical() {
        let a = QLearning::new(&config(42));
        let b = QLearning::new(&config(42));
        assert_eq!(a.table, b.table);
    }

    #[test]
    fn test_discretize_scales_and_clamps() {
        let ql = QLearning::new(&config(3));
        assert_eq!(ql.discretize(&[0.0, 0.0]).unwrap(), (0, 0));
        assert_eq!(ql.discretize(&[3.7, 9.99]).unwrap(), (3, 9));
        assert_eq!(ql.discretize(&[10.0, 10.0]).unwrap(), (9, 9));
        assert_eq!(ql.discretize(&[-0.5, -1e300]).unwrap(), (0, 0));
        assert_eq!(ql.discretize(&[1e300, f64::MAX]).unwrap(), (9, 9));
        assert_eq!(ql.discretize(&[f64::MIN, 5.0]).unwrap(), (0, 5));
    }

    #[test]
    fn test_discretize_is_monotonic() {
        let ql = QLearning::new(&config(4));
        let mut last = 0;
        for i in -50..150 {
            let (x, _) = ql.discretize(&[i as f64 * 0.1, 0.0]).unwrap();
            assert!(x >= last);
            assert!(x < ql.bins());
            last = x;
        }
    }

    #[test]
    fn test_discretize_ignores_extra_components() {
        let ql = QLearning::new(&config(5));
        assert_eq!(
            ql.discretize(&[2.0, 4.0, f64::NAN, 1e9]).unwrap(),
            ql.discretize(&[2.0, 4.0]).unwrap()
        );
    }

    #[test]
    fn test_greedy_ties_prefer_lowest_action() {
        let mut ql = QLearning::new(&config(6));
        ql.table.iter_mut().for_each(|v| *v = 0.5);
        assert_eq!(ql.greedy_action(&[1.0, 1.0]).unwrap(), 0);

        let start = ql.offset((1, 1));
        ql.table[start + 2] = 0.9;
        ql.table[start + 3] = 0.9;
        assert_eq!(ql.greedy_action(&[1.0, 1.0]).unwrap(), 2);
    }

    #[test]
    fn test_same_cell_same_greedy_action() {
        let mut ql = QLearning::new(&config(7));
        for (a, b) in [([2.0, 3.0], [2.99, 3.5]), ([-4.0, 0.2], [0.0, 0.9]), ([50.0, 9.1], [9.5, 70.0])] {
            assert_eq!(ql.discretize(&a).unwrap(), ql.discretize(&b).unwrap());
            assert_eq!(
                ql.select_action(&a, 0.0).unwrap(),
                ql.select_action(&b, 0.0).unwrap()
            );
        }
    }

    #[test]
    fn test_full_exploration_stays_in_range() {
        let mut ql = QLearning::new(&config(8));
        let mut seen = [false; 4];
        for _ in 0..500 {
            let action = ql.select_action(&[5.0, 5.0], 1.0).unwrap();
            seen[action] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_update_moves_toward_target_without_overshoot() {
        let mut ql = QLearning::new(&config(9));
        let obs = [1.0, 2.0];
        let next = [1.0, 3.0];
        let cell = ql.discretize(&obs).unwrap();

        for reward in [-1.0, 0.0, 0.5, 10.0] {
            let old = ql.action_values(cell)[1];
            let target = reward + ql.gamma * ql.max_value(&next).unwrap();
            ql.update(&obs, 1, reward, &next, false).unwrap();
            let new = ql.action_values(cell)[1];
            assert!((new - target).abs() <= (old - target).abs());
            if old != target {
                assert!((new - target).abs() < (old - target).abs());
            }
        }
    }

    #[test]
    fn test_update_exact_rule() {
        let mut ql = QLearning::new(&config(10));
        let obs = [0.0, 0.0];
        let next = [9.0, 9.0];
        let old = ql.action_values((0, 0))[3];
        let max_next = ql.max_value(&next).unwrap();

        ql.update(&obs, 3, 1.0, &next, false).unwrap();
        let expected = old + 0.1 * (1.0 + 0.95 * max_next - old);
        assert!((ql.action_values((0, 0))[3] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_terminal_update_ignores_next_state() {
        let mut ql = QLearning::new(&config(11));
        let old = ql.action_values((4, 4))[0];
        ql.update(&[4.0, 4.0], 0, 1.0, &[5.0, 5.0], true).unwrap();
        let expected = old + 0.1 * (1.0 - old);
        assert!((ql.action_values((4, 4))[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_zero_learning_rate_leaves_value() {
        let mut cfg = config(12);
        cfg.learning_rate = 0.0;
        let mut ql = QLearning::new(&cfg);
        let before = ql.table.clone();
        ql.update(&[1.0, 1.0], 2, 5.0, &[2.0, 2.0], false).unwrap();
        assert_eq!(ql.table, before);
    }

    #[test]
    fn test_invalid_inputs_do_not_mutate() {
        let mut ql = QLearning::new(&config(13));
        let before = ql.table.clone();

        assert_eq!(
            ql.update(&[1.0], 0, 1.0, &[1.0, 1.0], false),
            Err(LearningError::ObservationDimension { expected: 2, got: 1 })
        );
        assert!(matches!(
            ql.update(&[1.0, 1.0], 0, 1.0, &[f64::NAN, 1.0], false),
            Err(LearningError::NonFiniteObservation { index: 0, .. })
        ));
        assert_eq!(
            ql.update(&[1.0, 1.0], 4, 1.0, &[1.0, 1.0], false),
            Err(LearningError::ActionOutOfRange { action: 4, action_count: 4 })
        );
        assert!(ql.update(&[1.0, 1.0], 0, f64::INFINITY, &[1.0, 1.0], false).is_err());
        assert!(ql.select_action(&[], 0.0).is_err());
        assert!(ql.select_action(&[f64::INFINITY, 0.0], 0.0).is_err());

        assert_eq!(ql.table, before);
    }
}
