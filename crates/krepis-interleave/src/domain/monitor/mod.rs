//! Liveness Monitors
//!
//! # Overview
//!
//! A liveness property says "something good eventually happens". The
//! program under test expresses it with monitors that are *hot* while an
//! obligation is pending and *cold* once it is met. Under a fair scheduler,
//! staying hot for too long means the obligation is never met:
//!
//! ```text
//!   step:        1   2   3   4   5   6   7 ...
//!   monitor:    cold hot hot hot hot hot hot
//!   temperature:  0   1   2   3   4   5   6  > threshold  ==> violation
//! ```
//!
//! Temperature is raised by the temperature-checking strategy decorator on
//! every scheduling point, and only when the wrapped strategy is fair. An
//! unfair strategy may starve the operation that would cool the monitor, so
//! a hot monitor proves nothing there.
//!
//! The registry is shared between the strategy (which checks) and the
//! running program (which heats and cools), hence [`SharedMonitors`].

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Monitor identifier (index into the registry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitorId(pub usize);

impl MonitorId {
    /// Create a new MonitorId
    #[inline(always)]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the raw numeric ID
    #[inline(always)]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Monitor({})", self.0)
    }
}

/// One hot/cold liveness monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessMonitor {
    name: String,
    hot: bool,
    temperature: u64,
}

impl LivenessMonitor {
    /// Create a cold monitor
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hot: false,
            temperature: 0,
        }
    }

    /// Monitor name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if an obligation is pending
    #[inline]
    pub fn is_hot(&self) -> bool {
        self.hot
    }

    /// Consecutive checks spent hot
    #[inline]
    pub fn temperature(&self) -> u64 {
        self.temperature
    }

    fn heat(&mut self) {
        self.hot = true;
    }

    fn cool(&mut self) {
        self.hot = false;
        self.temperature = 0;
    }
}

/// Liveness violation detected by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessViolation {
    /// Monitor stayed hot past the temperature threshold
    TemperatureExceeded {
        /// Offending monitor
        monitor: MonitorId,
        /// Its name
        name: String,
        /// Temperature reached
        temperature: u64,
        /// Configured threshold
        threshold: u64,
    },

    /// Fair execution hit its step bound with the monitor still hot
    HotAtBound {
        /// Offending monitor
        monitor: MonitorId,
        /// Its name
        name: String,
    },
}

impl LivenessViolation {
    /// Monitor that triggered the violation
    pub fn monitor(&self) -> MonitorId {
        match self {
            LivenessViolation::TemperatureExceeded { monitor, .. } => *monitor,
            LivenessViolation::HotAtBound { monitor, .. } => *monitor,
        }
    }
}

impl fmt::Display for LivenessViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LivenessViolation::TemperatureExceeded {
                name,
                temperature,
                threshold,
                ..
            } => write!(
                f,
                "Monitor '{}' detected liveness bug in hot state with temperature {} exceeding threshold {}",
                name, temperature, threshold
            ),
            LivenessViolation::HotAtBound { name, .. } => write!(
                f,
                "Monitor '{}' detected potential liveness bug in hot state at the end of a fair execution",
                name
            ),
        }
    }
}

/// All monitors of a test run
///
/// # Example
///
/// ```rust
/// use krepis_interleave::domain::monitor::MonitorRegistry;
///
/// let mut registry = MonitorRegistry::new(2);
/// let progress = registry.register("progress");
///
/// registry.set_hot(progress);
/// assert!(registry.check_liveness_temperature().is_none()); // 1
/// assert!(registry.check_liveness_temperature().is_none()); // 2
/// assert!(registry.check_liveness_temperature().is_some()); // 3 > 2
/// ```
#[derive(Debug, Clone, Default)]
pub struct MonitorRegistry {
    monitors: Vec<LivenessMonitor>,
    threshold: u64,
    violation: Option<LivenessViolation>,
    checks: u64,
}

impl MonitorRegistry {
    /// Create an empty registry with the given temperature threshold
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    /// Wrap into the shared handle used by the runtime and strategies
    pub fn into_shared(self) -> SharedMonitors {
        Arc::new(Mutex::new(self))
    }

    /// Register a new cold monitor
    pub fn register(&mut self, name: impl Into<String>) -> MonitorId {
        let id = MonitorId::new(self.monitors.len());
        self.monitors.push(LivenessMonitor::new(name));
        id
    }

    /// Look up a monitor by id
    pub fn get(&self, id: MonitorId) -> Option<&LivenessMonitor> {
        self.monitors.get(id.as_usize())
    }

    /// Number of registered monitors
    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    /// Check if no monitor is registered
    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// Temperature threshold
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Change the temperature threshold
    pub fn set_threshold(&mut self, threshold: u64) {
        self.threshold = threshold;
    }

    /// Mark an obligation pending
    ///
    /// Returns `false` for an unknown monitor.
    pub fn set_hot(&mut self, id: MonitorId) -> bool {
        match self.monitors.get_mut(id.as_usize()) {
            Some(monitor) => {
                monitor.heat();
                true
            }
            None => false,
        }
    }

    /// Mark an obligation met, resetting its temperature
    ///
    /// Returns `false` for an unknown monitor.
    pub fn set_cold(&mut self, id: MonitorId) -> bool {
        match self.monitors.get_mut(id.as_usize()) {
            Some(monitor) => {
                monitor.cool();
                true
            }
            None => false,
        }
    }

    /// Check if any monitor is hot
    pub fn any_hot(&self) -> bool {
        self.monitors.iter().any(|m| m.is_hot())
    }

    /// Raise the temperature of every hot monitor by one
    ///
    /// Records and returns the first violation once a temperature exceeds
    /// the threshold. Later calls keep returning the recorded violation.
    pub fn check_liveness_temperature(&mut self) -> Option<LivenessViolation> {
        self.checks += 1;
        if self.violation.is_some() {
            return self.violation.clone();
        }

        let threshold = self.threshold;
        for (idx, monitor) in self.monitors.iter_mut().enumerate() {
            if !monitor.hot {
                continue;
            }
            monitor.temperature = monitor.temperature.saturating_add(1);
            if monitor.temperature > threshold && self.violation.is_none() {
                self.violation = Some(LivenessViolation::TemperatureExceeded {
                    monitor: MonitorId::new(idx),
                    name: monitor.name.clone(),
                    temperature: monitor.temperature,
                    threshold,
                });
            }
        }
        self.violation.clone()
    }

    /// Report the first hot monitor as a violation at the end of a fair run
    pub fn check_liveness_at_bound(&mut self) -> Option<LivenessViolation> {
        if self.violation.is_some() {
            return self.violation.clone();
        }
        let (idx, monitor) = self
            .monitors
            .iter()
            .enumerate()
            .find(|(_, m)| m.is_hot())?;
        self.violation = Some(LivenessViolation::HotAtBound {
            monitor: MonitorId::new(idx),
            name: monitor.name.clone(),
        });
        self.violation.clone()
    }

    /// Violation recorded in the current iteration
    pub fn violation(&self) -> Option<&LivenessViolation> {
        self.violation.as_ref()
    }

    /// Total temperature checks over the whole run
    pub fn checks(&self) -> u64 {
        self.checks
    }

    /// Cool every monitor and forget the violation
    ///
    /// Called at the start of every iteration. The check counter survives.
    pub fn reset_for_iteration(&mut self) {
        for monitor in &mut self.monitors {
            monitor.cool();
        }
        self.violation = None;
    }
}

/// Registry handle shared by the runtime and the temperature decorator
pub type SharedMonitors = Arc<Mutex<MonitorRegistry>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cold_monitor_never_heats() {
        let mut registry = MonitorRegistry::new(1);
        let id = registry.register("idle");

        for _ in 0..10 {
            assert!(registry.check_liveness_temperature().is_none());
        }
        assert_eq!(registry.get(id).map(|m| m.temperature()), Some(0));
        assert_eq!(registry.checks(), 10);
    }

    #[test]
    fn test_cooling_resets_temperature() {
        let mut registry = MonitorRegistry::new(3);
        let id = registry.register("progress");

        registry.set_hot(id);
        registry.check_liveness_temperature();
        registry.check_liveness_temperature();
        assert_eq!(registry.get(id).map(|m| m.temperature()), Some(2));

        registry.set_cold(id);
        assert_eq!(registry.get(id).map(|m| m.temperature()), Some(0));
        assert!(!registry.any_hot());
    }

    #[test]
    fn test_threshold_exceeded() {
        let mut registry = MonitorRegistry::new(2);
        let _quiet = registry.register("quiet");
        let loud = registry.register("loud");
        registry.set_hot(loud);

        assert!(registry.check_liveness_temperature().is_none());
        assert!(registry.check_liveness_temperature().is_none());
        let violation = registry.check_liveness_temperature();

        match violation {
            Some(LivenessViolation::TemperatureExceeded {
                monitor,
                temperature,
                threshold,
                ..
            }) => {
                assert_eq!(monitor, loud);
                assert_eq!(temperature, 3);
                assert_eq!(threshold, 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(
            registry.violation().map(ToString::to_string).as_deref(),
            Some("Monitor 'loud' detected liveness bug in hot state with temperature 3 exceeding threshold 2")
        );
    }

    #[test]
    fn test_hot_at_bound() {
        let mut registry = MonitorRegistry::new(100);
        let id = registry.register("eventually-done");
        assert!(registry.check_liveness_at_bound().is_none());

        registry.set_hot(id);
        let violation = registry.check_liveness_at_bound();
        assert_eq!(violation.map(|v| v.monitor()), Some(id));
    }

    #[test]
    fn test_reset_for_iteration() {
        let mut registry = MonitorRegistry::new(0);
        let id = registry.register("m");
        registry.set_hot(id);
        assert!(registry.check_liveness_temperature().is_some());

        registry.reset_for_iteration();
        assert!(registry.violation().is_none());
        assert!(!registry.any_hot());
        assert_eq!(registry.checks(), 1);
    }

    #[test]
    fn test_unknown_monitor() {
        let mut registry = MonitorRegistry::new(1);
        assert!(!registry.set_hot(MonitorId::new(9)));
        assert!(!registry.set_cold(MonitorId::new(9)));
    }
}
