//! Per-dependency circuit breaker with persisted state (§4.7).
//!
//! State machine:
//! - closed -> open when consecutive_failures >= failure_threshold.
//! - open -> half_open when now - opened_at >= cooldown.
//! - half_open -> closed when consecutive_successes >= success_threshold.
//! - any state -> closed on a recorded success outside half_open
//!   ("fast recovery" — a single success anywhere but half_open force-closes
//!   the breaker immediately, matching the source's `record_success`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::model::{CircuitState, CircuitStateKind};

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    success_threshold: u32,
    state_dir: PathBuf,
    state: CircuitState,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        cooldown: Duration,
        success_threshold: u32,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        let name = name.into();
        let state_dir = state_dir.into();
        let state = Self::load_state(&state_dir, &name).unwrap_or_else(|| CircuitState {
            name: name.clone(),
            state: CircuitStateKind::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_failures: 0,
            total_successes: 0,
            last_failure_time: None,
            opened_at: None,
        });
        Self {
            name,
            failure_threshold,
            cooldown,
            success_threshold,
            state_dir,
            state,
        }
    }

    fn state_path(state_dir: &Path, name: &str) -> PathBuf {
        state_dir.join(format!("{}.json", name))
    }

    fn load_state(state_dir: &Path, name: &str) -> Option<CircuitState> {
        let path = Self::state_path(state_dir, name);
        let bytes = std::fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn save_state(&self) {
        if std::fs::create_dir_all(&self.state_dir).is_err() {
            return;
        }
        let path = Self::state_path(&self.state_dir, &self.name);
        if let Ok(bytes) = serde_json::to_vec_pretty(&self.state) {
            // Best-effort persistence; failures here must never crash the caller.
            if let Err(e) = std::fs::write(&path, bytes) {
                warn!(breaker = %self.name, error = %e, "failed to persist circuit breaker state");
            }
        }
    }

    /// Lazily transitions open -> half_open when the cooldown has elapsed,
    /// then returns the current state kind.
    fn current_kind(&mut self) -> CircuitStateKind {
        if self.state.state == CircuitStateKind::Open {
            if let Some(opened_at) = self.state.opened_at {
                let elapsed = Utc::now().signed_duration_since(opened_at);
                if elapsed.to_std().unwrap_or(Duration::ZERO) >= self.cooldown {
                    self.state.state = CircuitStateKind::HalfOpen;
                    self.state.consecutive_successes = 0;
                    self.save_state();
                }
            }
        }
        self.state.state
    }

    pub fn can_call(&mut self) -> bool {
        matches!(
            self.current_kind(),
            CircuitStateKind::Closed | CircuitStateKind::HalfOpen
        )
    }

    pub fn record_success(&mut self) {
        let kind = self.current_kind();
        self.state.total_successes += 1;
        self.state.consecutive_failures = 0;

        if kind == CircuitStateKind::HalfOpen {
            self.state.consecutive_successes += 1;
            if self.state.consecutive_successes >= self.success_threshold {
                self.state.state = CircuitStateKind::Closed;
                self.state.opened_at = None;
                debug!(breaker = %self.name, "circuit closed after half-open recovery");
            }
        } else {
            // Fast recovery: any success outside half-open force-closes.
            self.state.state = CircuitStateKind::Closed;
            self.state.consecutive_successes = 0;
            self.state.opened_at = None;
        }
        self.save_state();
    }

    pub fn record_failure(&mut self) {
        let kind = self.current_kind();
        self.state.total_failures += 1;
        self.state.consecutive_failures += 1;
        self.state.consecutive_successes = 0;
        self.state.last_failure_time = Some(Utc::now());

        if kind != CircuitStateKind::Open && self.state.consecutive_failures >= self.failure_threshold {
            self.state.state = CircuitStateKind::Open;
            self.state.opened_at = Some(Utc::now());
            warn!(breaker = %self.name, failures = self.state.consecutive_failures, "circuit opened");
        }
        self.save_state();
    }

    pub fn reset(&mut self) {
        self.state.state = CircuitStateKind::Closed;
        self.state.consecutive_failures = 0;
        self.state.consecutive_successes = 0;
        self.state.opened_at = None;
        self.save_state();
    }

    pub fn status(&self) -> CircuitState {
        self.state.clone()
    }
}

/// Runs `f` through the breaker's `can_call`/`record_*` lifecycle, raising
/// `BridgeError::CircuitOpen` when the breaker is currently open.
pub fn protected_call<F, T, E>(breaker: &mut CircuitBreaker, f: F) -> Result<T, BridgeError>
where
    F: FnOnce() -> Result<T, E>,
    E: std::fmt::Display,
{
    if !breaker.can_call() {
        return Err(BridgeError::CircuitOpen(breaker.name.clone()));
    }
    match f() {
        Ok(v) => {
            breaker.record_success();
            Ok(v)
        }
        Err(e) => {
            breaker.record_failure();
            Err(BridgeError::TransientNetwork(e.to_string()))
        }
    }
}
