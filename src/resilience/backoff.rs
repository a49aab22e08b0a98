//! Reconnect backoff coefficients.
//!
//! A provider in the retry partition is attempted on reconnect tick `t` only
//! when `t % coefficient == 0`. Hard failures double the coefficient up to a
//! cap; a connect that is rejected by the double-check jumps straight to the
//! soft-failure coefficient.

/// Coefficient of a provider that should be tried every tick.
pub const INITIAL_COEFFICIENT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    max_coefficient: u32,
    soft_failure_coefficient: u32,
}

impl ReconnectBackoff {
    pub fn new(max_coefficient: u32, soft_failure_coefficient: u32) -> Self {
        let max_coefficient = max_coefficient.max(INITIAL_COEFFICIENT);
        Self {
            max_coefficient,
            soft_failure_coefficient: soft_failure_coefficient.clamp(INITIAL_COEFFICIENT, max_coefficient),
        }
    }

    /// Whether reconnect tick `tick` attempts a provider with `coefficient`.
    pub fn should_attempt(&self, tick: u64, coefficient: u32) -> bool {
        coefficient <= INITIAL_COEFFICIENT || tick % u64::from(coefficient) == 0
    }

    pub fn after_failure(&self, coefficient: u32) -> u32 {
        coefficient
            .max(INITIAL_COEFFICIENT)
            .saturating_mul(2)
            .min(self.max_coefficient)
    }

    pub fn after_soft_failure(&self) -> u32 {
        self.soft_failure_coefficient
    }

    pub fn max_coefficient(&self) -> u32 {
        self.max_coefficient
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(32, 5)
    }
}
