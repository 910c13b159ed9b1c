//! Retry/backoff policies shared by upload adapters and the orchestrator
//!
//! A policy is stateless: it is handed the number of the attempt that just
//! failed (1-based) and the failure's [`ErrorClass`], and answers whether to
//! try again and after how long. Ceilings and delays come from
//! configuration; nothing here is wired into a particular caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::ErrorClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    Stop,
}

pub trait RetryPolicy: Send + Sync {
    /// Decide what to do after `attempt` failed with `class`.
    fn decide(&self, attempt: u32, class: ErrorClass) -> RetryDecision;

    /// Total attempts this policy allows, including the first
    fn max_attempts(&self) -> u32;
}

/// Same delay between every attempt. Used for individual chunk sends.
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl FixedBackoff {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl RetryPolicy for FixedBackoff {
    fn decide(&self, attempt: u32, class: ErrorClass) -> RetryDecision {
        if class != ErrorClass::Transient || attempt >= self.max_attempts {
            return RetryDecision::Stop;
        }
        RetryDecision::RetryAfter(self.delay)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Doubling delay, capped. Used for whole provider sequences.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn decide(&self, attempt: u32, class: ErrorClass) -> RetryDecision {
        if class != ErrorClass::Transient || attempt >= self.max_attempts {
            return RetryDecision::Stop;
        }
        // attempt 1 -> initial, 2 -> 2x, 3 -> 4x ...
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.initial_delay.saturating_mul(factor);
        RetryDecision::RetryAfter(delay.min(self.max_delay))
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Fixed,
    Exponential,
}

/// `[retry.chunk]` / `[retry.publish]` configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    pub strategy: BackoffStrategy,
    pub max_attempts: u32,
    /// Base delay in milliseconds
    pub delay_ms: u64,
    /// Upper bound for exponential delays, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl RetrySettings {
    /// Chunk sends: 3 attempts, 1s apart.
    pub fn chunk_default() -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            max_attempts: 3,
            delay_ms: 1_000,
            max_delay_ms: default_max_delay_ms(),
        }
    }

    /// Provider sequences: 3 attempts, 1s then 2s.
    pub fn publish_default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            max_attempts: 3,
            delay_ms: 1_000,
            max_delay_ms: default_max_delay_ms(),
        }
    }

    pub fn build(&self) -> Box<dyn RetryPolicy> {
        let delay = Duration::from_millis(self.delay_ms);
        match self.strategy {
            BackoffStrategy::Fixed => Box::new(FixedBackoff::new(self.max_attempts, delay)),
            BackoffStrategy::Exponential => Box::new(ExponentialBackoff::new(
                self.max_attempts,
                delay,
                Duration::from_millis(self.max_delay_ms),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub chunk: RetrySettings,
    pub publish: RetrySettings,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            chunk: RetrySettings::chunk_default(),
            publish: RetrySettings::publish_default(),
        }
    }
}
