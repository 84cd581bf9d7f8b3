//! Named circuit breakers guarding upstream calls.
//!
//! # States
//! - Closed: calls pass through; consecutive failures are counted
//! - Open: calls are rejected without touching the upstream
//! - HalfOpen: exactly one probe call is let through
//!
//! # Transitions
//! ```text
//! Closed   → Open:     failures >= failure_threshold
//! Open     → HalfOpen: wait_duration_in_open_state elapsed (checked on the next call)
//! HalfOpen → Closed:   probe succeeded
//! HalfOpen → Open:     probe failed
//! ```
//!
//! Admission and outcome recording each happen inside one critical section, so
//! concurrent callers never race the OPEN transition or the probe slot. A call that
//! exceeds its deadline is dropped, which cancels the in-flight upstream request.
use std::{
    collections::HashMap as StdHashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use scc::HashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::models::{CircuitBreakerProperties, CircuitBreakerSection};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CircuitBreakerError {
    #[error("Invalid duration for '{field}': '{value}' ({reason})")]
    InvalidDuration {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("'{field}' must be greater than zero")]
    Zero { field: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Why a call did not produce an upstream result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// Circuit open, or half-open with the probe slot taken.
    Open,
    /// The call was cancelled after exceeding this deadline.
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub timeout: Duration,
    pub wait_duration_in_open_state: Duration,
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration, CircuitBreakerError> {
    let duration =
        humantime::parse_duration(value).map_err(|e| CircuitBreakerError::InvalidDuration {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        })?;
    if duration.is_zero() {
        return Err(CircuitBreakerError::Zero { field });
    }
    Ok(duration)
}

impl CircuitBreakerSettings {
    pub fn from_properties(
        props: &CircuitBreakerProperties,
    ) -> Result<Self, CircuitBreakerError> {
        if props.failure_threshold == 0 {
            return Err(CircuitBreakerError::Zero {
                field: "failure_threshold",
            });
        }
        Ok(Self {
            failure_threshold: props.failure_threshold,
            timeout: parse_duration("timeout", &props.timeout)?,
            wait_duration_in_open_state: parse_duration(
                "wait_duration_in_open_state",
                &props.wait_duration_in_open_state,
            )?,
        })
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(1),
            wait_duration_in_open_state: Duration::from_secs(30),
        }
    }
}

/// Point-in-time view of a breaker, served on `/gateway/circuitbreakers`.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub timeout_ms: u128,
    pub last_transition: DateTime<Utc>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    transitioned_at: Instant,
    transitioned_at_utc: DateTime<Utc>,
    probe_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// A single named breaker. Shared by every route that references its name.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: CircuitBreakerSettings,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: CircuitBreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                transitioned_at: Instant::now(),
                transitioned_at_utc: Utc::now(),
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &CircuitBreakerSettings {
        &self.settings
    }

    /// Current state. An OPEN breaker whose wait has elapsed still reports OPEN
    /// until the next call moves it to HALF_OPEN.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.lock();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failures,
            failure_threshold: self.settings.failure_threshold,
            timeout_ms: self.settings.timeout.as_millis(),
            last_transition: inner.transitioned_at_utc,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // State stays consistent even if a holder panicked: every write is a plain store.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.transitioned_at = Instant::now();
        inner.transitioned_at_utc = Utc::now();
        match to {
            CircuitState::Closed => {
                inner.failures = 0;
                inner.probe_in_flight = false;
            }
            CircuitState::Open => inner.probe_in_flight = false,
            CircuitState::HalfOpen => {}
        }

        if to == CircuitState::Open {
            tracing::warn!(
                breaker = %self.name,
                %from,
                %to,
                failures = inner.failures,
                "Circuit breaker opened"
            );
        } else {
            tracing::info!(breaker = %self.name, %from, %to, "Circuit breaker state changed");
        }
    }

    fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut inner = self.lock();
        let admission = match inner.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => {
                if inner.transitioned_at.elapsed() < self.settings.wait_duration_in_open_state {
                    return None;
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.probe_in_flight = true;
                Admission::Probe
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return None;
                }
                inner.probe_in_flight = true;
                Admission::Probe
            }
        };

        Some(Permit {
            breaker: self,
            admission,
            settled: false,
        })
    }

    fn record(&self, admission: Admission, failed: bool) {
        let mut inner = self.lock();
        match admission {
            Admission::Normal => {
                // Outcomes of calls admitted before a concurrent transition are ignored
                // outside CLOSED so the OPEN transition happens once.
                if inner.state != CircuitState::Closed {
                    return;
                }
                if failed {
                    inner.failures = inner.failures.saturating_add(1);
                    if inner.failures >= self.settings.failure_threshold {
                        self.transition(&mut inner, CircuitState::Open);
                    }
                } else {
                    inner.failures = 0;
                }
            }
            Admission::Probe => {
                inner.probe_in_flight = false;
                if inner.state != CircuitState::HalfOpen {
                    return;
                }
                if failed {
                    inner.failures = inner.failures.saturating_add(1);
                    self.transition(&mut inner, CircuitState::Open);
                } else {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
        }
    }

    fn release_probe(&self) {
        let mut inner = self.lock();
        inner.probe_in_flight = false;
    }

    /// Run `fut` under this breaker.
    ///
    /// Returns [`Rejected::Open`] without polling `fut` when the circuit is open.
    /// Otherwise `fut` races the configured timeout; on expiry it is dropped and
    /// [`Rejected::Timeout`] is returned. `is_failure` classifies completed outputs
    /// (e.g. transport errors and 5xx responses).
    pub async fn call<O, Fut, F>(&self, fut: Fut, is_failure: F) -> Result<O, Rejected>
    where
        Fut: Future<Output = O>,
        F: FnOnce(&O) -> bool,
    {
        let Some(permit) = self.try_acquire() else {
            tracing::debug!(breaker = %self.name, "Call short-circuited, circuit open");
            return Err(Rejected::Open);
        };

        match tokio::time::timeout(self.settings.timeout, fut).await {
            Ok(output) => {
                let failed = is_failure(&output);
                permit.settle(failed);
                Ok(output)
            }
            Err(_) => {
                tracing::warn!(
                    breaker = %self.name,
                    timeout = ?self.settings.timeout,
                    "Upstream call timed out and was cancelled"
                );
                permit.settle(true);
                Err(Rejected::Timeout(self.settings.timeout))
            }
        }
    }

    /// [`call`](Self::call), substituting `fallback` for any rejection.
    pub async fn call_with_fallback<O, Fut, F, FB, FbFut>(
        &self,
        fut: Fut,
        is_failure: F,
        fallback: FB,
    ) -> O
    where
        Fut: Future<Output = O>,
        F: FnOnce(&O) -> bool,
        FB: FnOnce(Rejected) -> FbFut,
        FbFut: Future<Output = O>,
    {
        match self.call(fut, is_failure).await {
            Ok(output) => output,
            Err(rejected) => fallback(rejected).await,
        }
    }
}

/// Admission ticket. A probe dropped without a verdict (caller went away) frees
/// the half-open slot.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Permit<'_> {
    fn settle(mut self, failed: bool) {
        self.settled = true;
        self.breaker.record(self.admission, failed);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Probe {
            self.breaker.release_probe();
        }
    }
}

/// Process-wide breakers keyed by name, created on first reference and kept for
/// the lifetime of the process.
pub struct CircuitBreakerRegistry {
    defaults: CircuitBreakerSettings,
    instances: StdHashMap<String, CircuitBreakerSettings>,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Parse and validate the defaults and every named instance up front.
    pub fn new(section: &CircuitBreakerSection) -> Result<Self, CircuitBreakerError> {
        let defaults = CircuitBreakerSettings::from_properties(&section.defaults)?;
        let mut instances = StdHashMap::new();
        for name in section.instances.keys() {
            let settings = CircuitBreakerSettings::from_properties(&section.properties_for(name))?;
            instances.insert(name.clone(), settings);
        }

        Ok(Self {
            defaults,
            instances,
            breakers: HashMap::new(),
        })
    }

    pub fn settings_for(&self, name: &str) -> CircuitBreakerSettings {
        self.instances.get(name).copied().unwrap_or(self.defaults)
    }

    /// Fetch the breaker for `name`, creating it on first use.
    pub async fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(entry) = self.breakers.get_async(name).await {
            return entry.get().clone();
        }

        let settings = self.settings_for(name);
        self.breakers
            .entry_async(name.to_string())
            .await
            .or_insert_with(|| {
                tracing::debug!(breaker = %name, ?settings, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(name, settings))
            })
            .get()
            .clone()
    }

    /// Run `fut` under the breaker called `name`, using `fallback` on rejection.
    pub async fn call_with_fallback<O, Fut, F, FB, FbFut>(
        &self,
        name: &str,
        fut: Fut,
        is_failure: F,
        fallback: FB,
    ) -> O
    where
        Fut: Future<Output = O>,
        F: FnOnce(&O) -> bool,
        FB: FnOnce(Rejected) -> FbFut,
        FbFut: Future<Output = O>,
    {
        self.get_or_create(name)
            .await
            .call_with_fallback(fut, is_failure, fallback)
            .await
    }

    /// Snapshots of every breaker created so far, sorted by name.
    pub async fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut snapshots = Vec::new();
        let out = &mut snapshots;
        self.breakers
            .retain_async(|_, breaker| {
                out.push(breaker.snapshot());
                true
            })
            .await;
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::sync::oneshot;

    use super::*;
    use crate::config::models::CircuitBreakerOverrides;

    fn settings(threshold: u32, timeout_ms: u64, wait_ms: u64) -> CircuitBreakerSettings {
        CircuitBreakerSettings {
            failure_threshold: threshold,
            timeout: Duration::from_millis(timeout_ms),
            wait_duration_in_open_state: Duration::from_millis(wait_ms),
        }
    }

    struct DropSignal(Arc<AtomicBool>);

    impl Drop for DropSignal {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), Rejected> {
        breaker
            .call(async { Err::<(), ()>(()) }, |r| r.is_err())
            .await
            .map(|_| ())
    }

    #[tokio::test]
    async fn test_initial_state_is_closed() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerSettings::default());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let breaker = CircuitBreaker::new("test", settings(1, 100, 1000));
        let result = breaker.call(async { 42 }, |_| false).await;
        assert_eq!(result, Ok(42));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_timeout_cancels_call_and_opens_at_threshold_one() {
        let breaker = CircuitBreaker::new("test", settings(1, 50, 10_000));
        let dropped = Arc::new(AtomicBool::new(false));
        let completed = Arc::new(AtomicBool::new(false));

        let signal = DropSignal(dropped.clone());
        let completed_flag = completed.clone();
        let slow = async move {
            let _signal = signal;
            tokio::time::sleep(Duration::from_secs(3)).await;
            completed_flag.store(true, Ordering::SeqCst);
            "upstream"
        };

        let result = breaker.call(slow, |_| false).await;
        assert_eq!(result, Err(Rejected::Timeout(Duration::from_millis(50))));
        assert!(dropped.load(Ordering::SeqCst));
        assert!(!completed.load(Ordering::SeqCst));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_circuit_does_not_poll_upstream() {
        let breaker = CircuitBreaker::new("test", settings(1, 100, 10_000));
        assert!(fail(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Open);

        let calls = AtomicUsize::new(0);
        for _ in 0..5 {
            let result = breaker
                .call(
                    async {
                        calls.fetch_add(1, Ordering::SeqCst);
                    },
                    |_| false,
                )
                .await;
            assert_eq!(result, Err(Rejected::Open));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failures_below_threshold_keep_closed_and_success_resets() {
        let breaker = CircuitBreaker::new("test", settings(3, 100, 10_000));
        fail(&breaker).await.unwrap();
        fail(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 2);

        breaker.call(async {}, |_| false).await.unwrap();
        assert_eq!(breaker.failure_count(), 0);

        fail(&breaker).await.unwrap();
        fail(&breaker).await.unwrap();
        fail(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_probe_success_closes() {
        let breaker = CircuitBreaker::new("test", settings(1, 100, 30));
        fail(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let result = breaker.call(async { "ok" }, |_| false).await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new("test", settings(1, 100, 30));
        fail(&breaker).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        fail(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Wait restarts from the failed probe.
        let result = breaker.call(async {}, |_| false).await;
        assert_eq!(result, Err(Rejected::Open));
    }

    #[tokio::test]
    async fn test_half_open_admits_single_probe() {
        let breaker = Arc::new(CircuitBreaker::new("test", settings(1, 1_000, 30)));
        fail(&breaker).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let probe_breaker = breaker.clone();
        let probe = tokio::spawn(async move {
            probe_breaker
                .call(
                    async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        "probe"
                    },
                    |_| false,
                )
                .await
        });

        started_rx.await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let concurrent = breaker.call(async { "second" }, |_| false).await;
        assert_eq!(concurrent, Err(Rejected::Open));

        release_tx.send(()).unwrap();
        assert_eq!(probe.await.unwrap(), Ok("probe"));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_abandoned_probe_releases_slot() {
        let breaker = Arc::new(CircuitBreaker::new("test", settings(1, 1_000, 30)));
        fail(&breaker).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let probe_breaker = breaker.clone();
        let probe = tokio::spawn(async move {
            probe_breaker
                .call(std::future::pending::<()>(), |_| false)
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        probe.abort();
        let _ = probe.await;

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        let result = breaker.call(async { 1 }, |_| false).await;
        assert_eq!(result, Ok(1));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_open_once() {
        let breaker = Arc::new(CircuitBreaker::new("test", settings(3, 1_000, 10_000)));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let breaker = breaker.clone();
            handles.push(tokio::spawn(async move {
                breaker
                    .call(
                        async {
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            Err::<(), ()>(())
                        },
                        |r| r.is_err(),
                    )
                    .await
            }));
        }
        for handle in handles {
            let _ = handle.await.unwrap();
        }

        assert_eq!(breaker.state(), CircuitState::Open);
        // Late outcomes after the transition are not counted.
        assert_eq!(breaker.failure_count(), 3);
    }

    #[tokio::test]
    async fn test_call_with_fallback() {
        let breaker = CircuitBreaker::new("test", settings(1, 20, 10_000));
        let output = breaker
            .call_with_fallback(
                async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    "upstream".to_string()
                },
                |_| false,
                |rejected| async move { format!("fallback after {rejected:?}") },
            )
            .await;
        assert!(output.starts_with("fallback after Timeout"));

        let output = breaker
            .call_with_fallback(
                async { "upstream".to_string() },
                |_| false,
                |_| async { "fallback".to_string() },
            )
            .await;
        assert_eq!(output, "fallback");
    }

    #[tokio::test]
    async fn test_registry_shares_state_by_name() {
        let registry = CircuitBreakerRegistry::new(&CircuitBreakerSection::default()).unwrap();
        let a = registry.get_or_create("mycmd").await;
        let b = registry.get_or_create("mycmd").await;
        let other = registry.get_or_create("other").await;

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(registry.len(), 2);

        let snapshots = registry.snapshots().await;
        let names: Vec<_> = snapshots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["mycmd", "other"]);
        assert_eq!(snapshots[0].state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_registry_applies_instance_overrides() {
        let mut section = CircuitBreakerSection::default();
        section.instances.insert(
            "fast".to_string(),
            CircuitBreakerOverrides {
                failure_threshold: Some(1),
                timeout: Some("250ms".to_string()),
                wait_duration_in_open_state: None,
            },
        );
        let registry = CircuitBreakerRegistry::new(&section).unwrap();

        let fast = registry.get_or_create("fast").await;
        assert_eq!(fast.settings().failure_threshold, 1);
        assert_eq!(fast.settings().timeout, Duration::from_millis(250));
        assert_eq!(
            fast.settings().wait_duration_in_open_state,
            Duration::from_secs(30)
        );

        let plain = registry.get_or_create("plain").await;
        assert_eq!(*plain.settings(), CircuitBreakerSettings::default());
    }

    #[test]
    fn test_invalid_settings() {
        let mut section = CircuitBreakerSection::default();
        section.defaults.timeout = "soon".to_string();
        assert!(matches!(
            CircuitBreakerRegistry::new(&section),
            Err(CircuitBreakerError::InvalidDuration { field: "timeout", .. })
        ));

        let mut section = CircuitBreakerSection::default();
        section.defaults.failure_threshold = 0;
        assert!(matches!(
            CircuitBreakerRegistry::new(&section),
            Err(CircuitBreakerError::Zero { .. })
        ));
    }
}
