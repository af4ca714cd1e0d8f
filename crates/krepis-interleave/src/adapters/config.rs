//! Test Configuration
//!
//! # Strategy Selection Surface
//!
//! Strategies are selected with short `name[:param]` strings:
//!
//! | String              | Strategy                                    |
//! |---------------------|---------------------------------------------|
//! | `random`            | uniform random                              |
//! | `prob:<coins>`      | probabilistic random, `coins` coin flips    |
//! | `pct:<points>`      | PCT with `points` priority change points    |
//! | `fairpct:<points>`  | PCT prefix, random suffix                   |
//! | `db:<delays>`       | delay bounding                              |
//! | `idb[:<delays>]`    | iterative delay bounding                    |
//! | `dfs`               | exhaustive depth-first search               |
//! | `dpor` / `rdpor`    | exhaustive / randomized DPOR                |
//! | `rl`                | Q-learning                                  |
//! | `greedy`            | random, steered towards rarely seen states  |
//! | `combo:<a>+<b>`     | strategy `a` as prefix, `b` as suffix       |
//!
//! Omitted parameters fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::state::AbstractionLevel;
use crate::error::{InterleaveError, InterleaveResult};

/// Default coin flips of `prob`
pub const DEFAULT_COIN_FLIPS: usize = 3;
/// Default priority change points of `pct` and `fairpct`
pub const DEFAULT_CHANGE_POINTS: usize = 10;
/// Default delay budget of `db`
pub const DEFAULT_MAX_DELAYS: usize = 10;
/// Default initial delay budget of `idb`
pub const DEFAULT_INITIAL_DELAYS: usize = 1;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Strategy Selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parsed strategy selection
///
/// Serializes as its string form.
///
/// # Example
///
/// ```rust
/// use krepis_interleave::adapters::config::StrategyConfig;
///
/// let config: StrategyConfig = "combo:pct:3+random".parse().unwrap();
/// assert_eq!(config.to_string(), "combo:pct:3+random");
/// assert!("pct:many".parse::<StrategyConfig>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StrategyConfig {
    /// `random`
    #[default]
    Random,
    /// `prob:<coins>`
    Probabilistic {
        /// Coin flips before switching away from the current operation
        coin_flips: usize,
    },
    /// `pct:<points>`
    Pct {
        /// Priority change points per iteration
        change_points: usize,
    },
    /// `fairpct:<points>`
    FairPct {
        /// Priority change points per iteration of the prefix
        change_points: usize,
    },
    /// `db:<delays>`
    DelayBounding {
        /// Delay budget
        max_delays: usize,
    },
    /// `idb[:<delays>]`
    IterativeDelayBounding {
        /// Initial delay budget
        initial_delays: usize,
    },
    /// `dfs`
    Dfs,
    /// `dpor`
    Dpor,
    /// `rdpor`
    RandomDpor,
    /// `rl`
    QLearning,
    /// `greedy`
    GreedyRandom,
    /// `combo:<prefix>+<suffix>`
    Combo {
        /// Strategy used until it reaches its step bound
        prefix: Box<StrategyConfig>,
        /// Strategy used for the rest of the iteration
        suffix: Box<StrategyConfig>,
    },
}

impl StrategyConfig {
    /// Check if the selection contains a combo
    pub fn is_combo(&self) -> bool {
        matches!(self, StrategyConfig::Combo { .. })
    }

    /// Check if the selection explores exhaustively and may run out of schedules
    pub fn is_exhaustive(&self) -> bool {
        matches!(self, StrategyConfig::Dfs | StrategyConfig::Dpor)
    }
}

fn invalid(input: &str, reason: impl Into<String>) -> InterleaveError {
    InterleaveError::InvalidStrategy {
        input: input.to_string(),
        reason: reason.into(),
    }
}

fn parse_param(input: &str, param: Option<&str>, default: usize) -> InterleaveResult<usize> {
    match param {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| invalid(input, format!("'{}' is not a non-negative integer", raw))),
    }
}

impl FromStr for StrategyConfig {
    type Err = InterleaveError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let (name, rest) = match trimmed.split_once(':') {
            Some((name, rest)) => (name, Some(rest)),
            None => (trimmed, None),
        };
        let name = name.to_ascii_lowercase();

        if name == "combo" {
            let rest = rest.ok_or_else(|| invalid(input, "combo needs '<prefix>+<suffix>'"))?;
            let (prefix, suffix) = rest
                .split_once('+')
                .ok_or_else(|| invalid(input, "combo needs '<prefix>+<suffix>'"))?;
            return Ok(StrategyConfig::Combo {
                prefix: Box::new(prefix.parse()?),
                suffix: Box::new(suffix.parse()?),
            });
        }

        let mut params = rest.map(|r| r.split(':')).into_iter().flatten();
        let param = params.next();
        if params.next().is_some() {
            return Err(invalid(input, "too many parameters"));
        }

        let no_param = |config: StrategyConfig| match param {
            None => Ok(config),
            Some(_) => Err(invalid(input, format!("'{}' takes no parameter", name))),
        };

        match name.as_str() {
            "random" => no_param(StrategyConfig::Random),
            "prob" => Ok(StrategyConfig::Probabilistic {
                coin_flips: parse_param(input, param, DEFAULT_COIN_FLIPS)?,
            }),
            "pct" => Ok(StrategyConfig::Pct {
                change_points: parse_param(input, param, DEFAULT_CHANGE_POINTS)?,
            }),
            "fairpct" => Ok(StrategyConfig::FairPct {
                change_points: parse_param(input, param, DEFAULT_CHANGE_POINTS)?,
            }),
            "db" => Ok(StrategyConfig::DelayBounding {
                max_delays: parse_param(input, param, DEFAULT_MAX_DELAYS)?,
            }),
            "idb" => Ok(StrategyConfig::IterativeDelayBounding {
                initial_delays: parse_param(input, param, DEFAULT_INITIAL_DELAYS)?,
            }),
            "dfs" => no_param(StrategyConfig::Dfs),
            "dpor" => no_param(StrategyConfig::Dpor),
            "rdpor" => no_param(StrategyConfig::RandomDpor),
            "rl" => no_param(StrategyConfig::QLearning),
            "greedy" => no_param(StrategyConfig::GreedyRandom),
            "" => Err(invalid(input, "empty strategy name")),
            other => Err(invalid(input, format!("unknown strategy '{}'", other))),
        }
    }
}

impl fmt::Display for StrategyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyConfig::Random => write!(f, "random"),
            StrategyConfig::Probabilistic { coin_flips } => write!(f, "prob:{}", coin_flips),
            StrategyConfig::Pct { change_points } => write!(f, "pct:{}", change_points),
            StrategyConfig::FairPct { change_points } => write!(f, "fairpct:{}", change_points),
            StrategyConfig::DelayBounding { max_delays } => write!(f, "db:{}", max_delays),
            StrategyConfig::IterativeDelayBounding { initial_delays } => {
                write!(f, "idb:{}", initial_delays)
            }
            StrategyConfig::Dfs => write!(f, "dfs"),
            StrategyConfig::Dpor => write!(f, "dpor"),
            StrategyConfig::RandomDpor => write!(f, "rdpor"),
            StrategyConfig::QLearning => write!(f, "rl"),
            StrategyConfig::GreedyRandom => write!(f, "greedy"),
            StrategyConfig::Combo { prefix, suffix } => write!(f, "combo:{}+{}", prefix, suffix),
        }
    }
}

impl TryFrom<String> for StrategyConfig {
    type Error = InterleaveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StrategyConfig> for String {
    fn from(config: StrategyConfig) -> Self {
        config.to_string()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test Configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a testing run needs to know
///
/// Missing fields take their default when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Iteration budget
    pub iterations: u64,
    /// Base seed of every randomized strategy
    pub seed: u64,
    /// Exploration strategy
    pub strategy: StrategyConfig,
    /// Step bound of unfair strategies (0 = unbounded)
    pub max_unfair_steps: usize,
    /// Step bound of fair strategies (0 = unbounded)
    pub max_fair_steps: usize,
    /// Hot monitor temperature above which a liveness bug is reported
    ///
    /// 0 selects half of `max_fair_steps`, or no threshold when fair
    /// executions are unbounded.
    pub liveness_temperature_threshold: u64,
    /// Report hitting the step bound as a bug
    pub consider_depth_bound_hit_as_bug: bool,
    /// State granularity used by state-aware strategies
    pub abstraction_level: AbstractionLevel,
    /// End the run at the first bug
    pub stop_on_first_bug: bool,
    /// Consecutive race reversals of randomized DPOR before a fresh path
    pub race_reversal_limit: usize,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            seed: 0,
            strategy: StrategyConfig::Random,
            max_unfair_steps: 10_000,
            max_fair_steps: 100_000,
            liveness_temperature_threshold: 0,
            consider_depth_bound_hit_as_bug: false,
            abstraction_level: AbstractionLevel::Default,
            stop_on_first_bug: true,
            race_reversal_limit: 10,
        }
    }
}

impl TestConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the iteration budget
    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the base seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the strategy
    pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the step bounds of unfair and fair strategies
    pub fn with_max_steps(mut self, unfair: usize, fair: usize) -> Self {
        self.max_unfair_steps = unfair;
        self.max_fair_steps = fair;
        self
    }

    /// Set the liveness temperature threshold
    pub fn with_liveness_temperature_threshold(mut self, threshold: u64) -> Self {
        self.liveness_temperature_threshold = threshold;
        self
    }

    /// Report hitting the step bound as a bug
    pub fn with_depth_bound_as_bug(mut self, enabled: bool) -> Self {
        self.consider_depth_bound_hit_as_bug = enabled;
        self
    }

    /// Set the state abstraction level
    pub fn with_abstraction_level(mut self, level: AbstractionLevel) -> Self {
        self.abstraction_level = level;
        self
    }

    /// Keep running after bugs are found
    pub fn with_stop_on_first_bug(mut self, stop: bool) -> Self {
        self.stop_on_first_bug = stop;
        self
    }

    /// Set the race reversal limit of randomized DPOR
    pub fn with_race_reversal_limit(mut self, limit: usize) -> Self {
        self.race_reversal_limit = limit;
        self
    }

    /// Temperature threshold with the default applied
    pub fn effective_temperature_threshold(&self) -> u64 {
        match (self.liveness_temperature_threshold, self.max_fair_steps) {
            (0, 0) => u64::MAX,
            (0, fair) => (fair as u64 / 2).max(1),
            (threshold, _) => threshold,
        }
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> InterleaveResult<()> {
        if self.iterations == 0 {
            return Err(InterleaveError::InvalidConfig(
                "iterations must be at least 1".into(),
            ));
        }
        if self.max_fair_steps > 0
            && (self.max_unfair_steps == 0 || self.max_fair_steps < self.max_unfair_steps)
        {
            return Err(InterleaveError::InvalidConfig(format!(
                "max_fair_steps ({}) must not be below max_unfair_steps ({})",
                self.max_fair_steps, self.max_unfair_steps
            )));
        }
        if let StrategyConfig::Probabilistic { coin_flips: 0 } = self.strategy {
            return Err(InterleaveError::InvalidConfig(
                "prob needs at least one coin flip".into(),
            ));
        }
        if matches!(self.strategy, StrategyConfig::RandomDpor) && self.race_reversal_limit == 0 {
            return Err(InterleaveError::InvalidConfig(
                "race_reversal_limit must be at least 1 for rdpor".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_every_strategy() {
        let cases = [
            ("random", StrategyConfig::Random),
            ("prob:4", StrategyConfig::Probabilistic { coin_flips: 4 }),
            ("pct:3", StrategyConfig::Pct { change_points: 3 }),
            ("fairpct:2", StrategyConfig::FairPct { change_points: 2 }),
            ("db:5", StrategyConfig::DelayBounding { max_delays: 5 }),
            ("idb", StrategyConfig::IterativeDelayBounding { initial_delays: 1 }),
            ("dfs", StrategyConfig::Dfs),
            ("dpor", StrategyConfig::Dpor),
            ("rdpor", StrategyConfig::RandomDpor),
            ("rl", StrategyConfig::QLearning),
            ("greedy", StrategyConfig::GreedyRandom),
            ("PCT", StrategyConfig::Pct { change_points: DEFAULT_CHANGE_POINTS }),
        ];
        for (input, expected) in cases {
            assert_eq!(input.parse::<StrategyConfig>().expect(input), expected);
        }
    }

    #[test]
    fn test_parse_combo() {
        let config: StrategyConfig = "combo:pct:3+prob:2".parse().expect("valid");
        assert_eq!(
            config,
            StrategyConfig::Combo {
                prefix: Box::new(StrategyConfig::Pct { change_points: 3 }),
                suffix: Box::new(StrategyConfig::Probabilistic { coin_flips: 2 }),
            }
        );
        assert!(config.is_combo());
        assert_eq!(config.to_string(), "combo:pct:3+prob:2");
    }

    #[test]
    fn test_parse_errors() {
        for input in ["", "fast", "pct:x", "dfs:3", "db:1:2", "combo:random", "combo"] {
            let err = input.parse::<StrategyConfig>().expect_err(input);
            assert!(err.is_config_error(), "{}", input);
        }
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = TestConfig::new()
            .with_seed(42)
            .with_strategy("fairpct:4".parse().expect("valid"))
            .with_abstraction_level(AbstractionLevel::InboxOnly);

        let json = serde_json::to_value(&config).expect("serialize");
        assert_eq!(json["strategy"], "fairpct:4");
        assert_eq!(json["abstraction_level"], "inbox-only");

        let back: TestConfig = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, config);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: TestConfig =
            serde_json::from_str(r#"{"iterations": 7, "strategy": "dpor"}"#).expect("valid");
        assert_eq!(config.iterations, 7);
        assert_eq!(config.strategy, StrategyConfig::Dpor);
        assert_eq!(config.max_unfair_steps, TestConfig::default().max_unfair_steps);

        let err = serde_json::from_str::<TestConfig>(r#"{"strategy": "nope"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_validate() {
        assert!(TestConfig::new().validate().is_ok());
        assert!(TestConfig::new().with_iterations(0).validate().is_err());
        assert!(TestConfig::new().with_max_steps(100, 10).validate().is_err());
        assert!(TestConfig::new().with_max_steps(0, 0).validate().is_ok());
        assert!(TestConfig::new()
            .with_strategy(StrategyConfig::Probabilistic { coin_flips: 0 })
            .validate()
            .is_err());
    }

    #[test]
    fn test_temperature_default() {
        let config = TestConfig::new().with_max_steps(10, 200);
        assert_eq!(config.effective_temperature_threshold(), 100);
        assert_eq!(
            config.with_liveness_temperature_threshold(7).effective_temperature_threshold(),
            7
        );
    }
}
