//! Execution budget for compiled scripts.

use std::time::Duration;

use crate::config::Config;

/// Budget every script run is held to.
///
/// Running out of time or steps is a timeout; producing more output than
/// allowed is a fault.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    /// Wall-clock budget, including the wait for an executor permit
    pub execution_timeout: Duration,
    /// Maximum interpreted operations per run
    pub max_steps: u64,
    /// Maximum response body size in bytes
    pub max_output: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_secs(5),
            max_steps: 1_000_000,
            max_output: 8 * 1024 * 1024,
        }
    }
}

impl ResourceLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            execution_timeout: config.exec_timeout,
            max_steps: config.max_steps,
            max_output: config.max_output,
        }
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps = steps;
        self
    }

    pub fn with_max_output(mut self, bytes: usize) -> Self {
        self.max_output = bytes;
        self
    }

    /// Checks the limits are usable.
    ///
    /// # Errors
    ///
    /// Returns a description if the timeout is zero or over an hour, or if
    /// the step or output budget is zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.execution_timeout.is_zero() {
            return Err("execution timeout must be greater than zero".to_string());
        }
        if self.execution_timeout.as_secs() > 3600 {
            return Err(format!(
                "execution timeout must be <= 1 hour (got {} seconds)",
                self.execution_timeout.as_secs()
            ));
        }
        if self.max_steps == 0 {
            return Err("step limit must be greater than zero".to_string());
        }
        if self.max_output == 0 {
            return Err("output limit must be greater than zero".to_string());
        }
        Ok(())
    }
}
