//! Bounded retry around a single atom invocation.
//!
//! Failures never escape [`RetryPolicy::invoke`]: an error or a panic in the
//! atom body counts as a failed attempt, and exhausting the attempts yields a
//! typed [`AtomExecutionError`].

use crate::atom::{AtomDefinition, AtomExecutionError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    None,
    /// delay = delay_ms
    Constant { delay_ms: u64 },
    /// delay = base_ms * retry
    Linear { base_ms: u64 },
    /// delay = min(base_ms * 2^(retry - 1), max_ms)
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Backoff {
    /// Delay before the given retry (1 = the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let millis = match *self {
            Backoff::None => 0,
            Backoff::Constant { delay_ms } => delay_ms,
            Backoff::Linear { base_ms } => base_ms.saturating_mul(u64::from(retry)),
            Backoff::Exponential { base_ms, max_ms } => {
                let factor = 2u64.saturating_pow(retry.saturating_sub(1));
                base_ms.saturating_mul(factor).min(max_ms)
            }
        };
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first; zero behaves as one.
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
        }
    }
}

/// Outcome of invoking an atom under a policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub outcome: Result<Value, AtomExecutionError>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn invoke(&self, atom: &AtomDefinition, args: &[Value]) -> Invocation {
        let max_attempts = self.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let message = match call_atom(atom, args) {
                Ok(value) => {
                    return Invocation {
                        outcome: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(message) => message,
            };

            if attempt >= max_attempts {
                tracing::error!(
                    "Atom '{}' failed after {} attempt(s): {}",
                    atom.name,
                    attempt,
                    message
                );
                return Invocation {
                    outcome: Err(AtomExecutionError::Failed {
                        atom: atom.name.clone(),
                        attempts: attempt,
                        message,
                    }),
                    attempts: attempt,
                };
            }

            let delay = self.backoff.delay_for(attempt);
            tracing::warn!(
                "Atom '{}' attempt {}/{} failed: {} (retrying in {:?})",
                atom.name,
                attempt,
                max_attempts,
                message,
                delay
            );
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
    }
}

fn call_atom(atom: &AtomDefinition, args: &[Value]) -> Result<Value, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| atom.callable.call(args))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("panicked: {detail}"))
        }
    }
}
