//! Circuit breakers.
//!
//! A [`CircuitBreaker`] is a three-state failure detector. Callers ask for a
//! [`Permit`] before doing the guarded work and report the outcome through
//! it. A permit dropped without a recorded outcome counts as a failure, so a
//! cancelled probe cannot leave the breaker stuck half-open.
//!
//! Every transition bumps an internal generation; outcomes reported by
//! permits from an earlier generation are ignored.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use rampart_config::CircuitBreakerConfig;
use thiserror::Error;
use tokio::time::Instant;

/// Settings shared by every breaker in a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Failure percentage that trips the breaker.
    pub error_threshold_percent: u8,
    /// Minimum requests in the window before tripping.
    pub volume_threshold: u32,
    /// Time spent open before probing.
    pub sleep_window: Duration,
    /// Concurrent probes admitted while half-open.
    pub max_half_open: u32,
    /// Length of the counting window while closed.
    pub rolling_interval: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            error_threshold_percent: config.error_threshold_percent,
            volume_threshold: config.request_volume_threshold,
            sleep_window: config.sleep_window(),
            max_half_open: config.max_half_open_concurrency,
            rolling_interval: config.rolling_interval(),
        }
    }
}

impl BreakerSettings {
    /// Set the error threshold percentage.
    pub fn with_error_threshold_percent(mut self, percent: u8) -> Self {
        self.error_threshold_percent = percent;
        self
    }

    /// Set the request volume threshold.
    pub fn with_volume_threshold(mut self, volume: u32) -> Self {
        self.volume_threshold = volume;
        self
    }

    /// Set the sleep window.
    pub fn with_sleep_window(mut self, window: Duration) -> Self {
        self.sleep_window = window;
        self
    }

    /// Set the half-open concurrency.
    pub fn with_max_half_open(mut self, max: u32) -> Self {
        self.max_half_open = max;
        self
    }

    /// Set the rolling interval.
    pub fn with_rolling_interval(mut self, interval: Duration) -> Self {
        self.rolling_interval = interval;
        self
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerState {
    /// Requests flow; outcomes are counted.
    Closed,
    /// Requests are rejected until the sleep window passes.
    Open,
    /// A limited number of probes are admitted.
    HalfOpen,
}

impl BreakerState {
    /// Lowercase name used in logs, metrics and `/ready`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }

    /// Gauge value: 0 closed, 1 half-open, 2 open.
    pub fn gauge_value(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the guarded work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The work succeeded.
    Success,
    /// The work failed.
    Failure,
}

/// Rejection from a breaker that is open or out of probe slots.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("circuit breaker '{name}' is {state}")]
pub struct BreakerOpen {
    /// Breaker name.
    pub name: String,
    /// State after the rejection.
    pub state: BreakerState,
}

/// A state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerEvent {
    /// Breaker name.
    pub name: String,
    /// Previous state.
    pub from: BreakerState,
    /// New state.
    pub to: BreakerState,
}

/// Callback invoked after every transition, outside the breaker lock.
pub type TransitionListener = Arc<dyn Fn(&BreakerEvent) + Send + Sync>;

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: BreakerState,
    /// Requests recorded in the current window.
    pub requests: u32,
    /// Failures recorded in the current window.
    pub failures: u32,
    /// Successes recorded in the current window.
    pub successes: u32,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    window_start: Instant,
    requests: u32,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    generation: u64,
}

impl Inner {
    fn reset_window(&mut self, now: Instant) {
        self.window_start = now;
        self.requests = 0;
        self.failures = 0;
        self.successes = 0;
    }

    fn transition(&mut self, to: BreakerState, now: Instant) -> (BreakerState, BreakerState) {
        let from = self.state;
        self.state = to;
        self.generation += 1;
        self.half_open_in_flight = 0;
        self.reset_window(now);
        self.opened_at = (to == BreakerState::Open).then_some(now);
        (from, to)
    }
}

/// Three-state breaker guarding one route or dependency.
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
    listener: Option<TransitionListener>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("inner", &*self.inner.lock())
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                window_start: Instant::now(),
                requests: 0,
                failures: 0,
                successes: 0,
                opened_at: None,
                half_open_in_flight: 0,
                generation: 0,
            }),
            listener: None,
        }
    }

    /// Attaches a transition listener.
    pub fn with_listener(mut self, listener: TransitionListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Current state and window counters.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            requests: inner.requests,
            failures: inner.failures,
            successes: inner.successes,
        }
    }

    /// Asks to run guarded work.
    ///
    /// An open breaker past its sleep window moves to half-open and admits
    /// this call as a probe. A half-open breaker with no free probe slot
    /// rejects and re-opens.
    pub fn try_acquire(self: &Arc<Self>) -> Result<Permit, BreakerOpen> {
        let now = Instant::now();
        let mut transition = None;

        let result = {
            let mut inner = self.inner.lock();
            match inner.state {
                BreakerState::Closed => {
                    if now.saturating_duration_since(inner.window_start)
                        >= self.settings.rolling_interval
                    {
                        inner.reset_window(now);
                    }
                    Ok(inner.generation)
                }
                BreakerState::Open => {
                    let ready = inner.opened_at.map_or(true, |opened| {
                        now.saturating_duration_since(opened) >= self.settings.sleep_window
                    });
                    if ready {
                        transition = Some(inner.transition(BreakerState::HalfOpen, now));
                        inner.half_open_in_flight = 1;
                        Ok(inner.generation)
                    } else {
                        Err(BreakerState::Open)
                    }
                }
                BreakerState::HalfOpen => {
                    if inner.half_open_in_flight < self.settings.max_half_open {
                        inner.half_open_in_flight += 1;
                        Ok(inner.generation)
                    } else {
                        transition = Some(inner.transition(BreakerState::Open, now));
                        Err(BreakerState::Open)
                    }
                }
            }
        };

        if let Some((from, to)) = transition {
            self.emit(from, to);
        }

        result
            .map(|generation| Permit {
                breaker: Arc::clone(self),
                generation,
                recorded: false,
            })
            .map_err(|state| BreakerOpen {
                name: self.name.clone(),
                state,
            })
    }

    fn on_outcome(&self, generation: u64, outcome: Outcome) {
        let now = Instant::now();
        let mut transition = None;

        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }

            match inner.state {
                BreakerState::Closed => {
                    if now.saturating_duration_since(inner.window_start)
                        >= self.settings.rolling_interval
                    {
                        inner.reset_window(now);
                    }
                    inner.requests += 1;
                    match outcome {
                        Outcome::Success => inner.successes += 1,
                        Outcome::Failure => inner.failures += 1,
                    }

                    let tripped = inner.requests >= self.settings.volume_threshold
                        && u64::from(inner.failures) * 100
                            >= u64::from(self.settings.error_threshold_percent)
                                * u64::from(inner.requests);
                    if tripped {
                        transition = Some(inner.transition(BreakerState::Open, now));
                    }
                }
                BreakerState::HalfOpen => {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                    let to = match outcome {
                        Outcome::Success => BreakerState::Closed,
                        Outcome::Failure => BreakerState::Open,
                    };
                    transition = Some(inner.transition(to, now));
                }
                // A permit never outlives its generation into Open.
                BreakerState::Open => {}
            }
        }

        if let Some((from, to)) = transition {
            self.emit(from, to);
        }
    }

    fn emit(&self, from: BreakerState, to: BreakerState) {
        if to == BreakerState::Open {
            tracing::warn!(
                target: "rampart::breaker",
                breaker = %self.name,
                from = from.as_str(),
                to = to.as_str(),
                "circuit breaker opened"
            );
        } else {
            tracing::info!(
                target: "rampart::breaker",
                breaker = %self.name,
                from = from.as_str(),
                to = to.as_str(),
                "circuit breaker transition"
            );
        }

        rampart_telemetry::metrics::record_breaker_transition(
            &self.name,
            from.as_str(),
            to.as_str(),
            to.gauge_value(),
        );

        if let Some(listener) = &self.listener {
            listener(&BreakerEvent {
                name: self.name.clone(),
                from,
                to,
            });
        }
    }
}

/// Admission to run guarded work.
///
/// Report the outcome with [`record`](Self::record); dropping the permit
/// unrecorded reports a failure.
#[derive(Debug)]
pub struct Permit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    recorded: bool,
}

impl Permit {
    /// Reports the outcome.
    pub fn record(mut self, outcome: Outcome) {
        self.recorded = true;
        self.breaker.on_outcome(self.generation, outcome);
    }

    /// Reports a success.
    pub fn success(self) {
        self.record(Outcome::Success);
    }

    /// Reports a failure.
    pub fn failure(self) {
        self.record(Outcome::Failure);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker.on_outcome(self.generation, Outcome::Failure);
        }
    }
}

/// Lazily populated set of named breakers sharing one settings block.
pub struct CircuitBreakerRegistry {
    settings: BreakerSettings,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    listener: Option<TransitionListener>,
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("settings", &self.settings)
            .field("breakers", &self.breakers.len())
            .finish_non_exhaustive()
    }
}

impl CircuitBreakerRegistry {
    /// Creates an empty registry.
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: DashMap::new(),
            listener: None,
        }
    }

    /// Attaches a listener to every breaker created afterwards.
    pub fn with_listener(mut self, listener: TransitionListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Returns the breaker for `name`, creating it closed on first use.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }

        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            let breaker = CircuitBreaker::new(name, self.settings.clone());
            Arc::new(match &self.listener {
                Some(listener) => breaker.with_listener(Arc::clone(listener)),
                None => breaker,
            })
        });
        Arc::clone(entry.value())
    }

    /// Snapshot of every breaker, sorted by name.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Whether any breaker is currently open.
    pub fn any_open(&self) -> bool {
        self.breakers
            .iter()
            .any(|entry| entry.value().state() == BreakerState::Open)
    }

    /// Number of breakers created so far.
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breaker exists yet.
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    fn settings() -> BreakerSettings {
        BreakerSettings::default()
            .with_volume_threshold(5)
            .with_error_threshold_percent(50)
            .with_sleep_window(Duration::from_secs(1))
            .with_max_half_open(1)
            .with_rolling_interval(Duration::from_secs(10))
    }

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new("/api/v1/portfolios", settings()))
    }

    fn fail_n(breaker: &Arc<CircuitBreaker>, n: usize) {
        for _ in 0..n {
            breaker.try_acquire().unwrap().failure();
        }
    }

    #[test]
    fn test_settings_from_config() {
        let settings = BreakerSettings::from(&CircuitBreakerConfig::default());
        assert_eq!(settings.error_threshold_percent, 50);
        assert_eq!(settings.volume_threshold, 20);
        assert_eq!(settings.sleep_window, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_after_volume_and_ratio() {
        let breaker = breaker();
        fail_n(&breaker, 4);
        assert_eq!(breaker.state(), BreakerState::Closed);

        fail_n(&breaker, 1);
        assert_eq!(breaker.state(), BreakerState::Open);

        let err = breaker.try_acquire().unwrap_err();
        assert_eq!(err.state, BreakerState::Open);
        assert!(err.to_string().contains("/api/v1/portfolios"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_below_ratio_stays_closed() {
        let breaker = breaker();
        for _ in 0..6 {
            breaker.try_acquire().unwrap().success();
        }
        fail_n(&breaker, 5);
        // 5 failures of 11 requests is below 50%.
        assert_eq!(breaker.state(), BreakerState::Closed);
        fail_n(&breaker, 1);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_rolls_over() {
        let breaker = breaker();
        fail_n(&breaker, 4);
        tokio::time::advance(Duration::from_secs(11)).await;
        fail_n(&breaker, 1);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.snapshot().requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let breaker = breaker();
        fail_n(&breaker, 5);

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(breaker.try_acquire().is_err());

        tokio::time::advance(Duration::from_millis(101)).await;
        let probe = breaker.try_acquire().unwrap();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        probe.success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.snapshot().requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = breaker();
        fail_n(&breaker, 5);
        tokio::time::advance(Duration::from_secs(1)).await;

        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_excess_probe_rejected_and_reopens() {
        let breaker = breaker();
        fail_n(&breaker, 5);
        tokio::time::advance(Duration::from_secs(1)).await;

        let probe = breaker.try_acquire().unwrap();
        let err = breaker.try_acquire().unwrap_err();
        assert_eq!(err.state, BreakerState::Open);
        assert_eq!(breaker.state(), BreakerState::Open);

        // The stale probe cannot close the re-opened breaker.
        probe.success();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_counts_as_failure() {
        let breaker = breaker();
        fail_n(&breaker, 5);
        tokio::time::advance(Duration::from_secs(1)).await;

        drop(breaker.try_acquire().unwrap());
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_sees_transitions() {
        let events = Arc::new(PlMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let breaker = Arc::new(
            CircuitBreaker::new("auth", settings())
                .with_listener(Arc::new(move |event: &BreakerEvent| {
                    sink.lock().push((event.from, event.to));
                })),
        );

        fail_n(&breaker, 5);
        tokio::time::advance(Duration::from_secs(1)).await;
        breaker.try_acquire().unwrap().success();

        assert_eq!(
            *events.lock(),
            vec![
                (BreakerState::Closed, BreakerState::Open),
                (BreakerState::Open, BreakerState::HalfOpen),
                (BreakerState::HalfOpen, BreakerState::Closed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_shares_breakers_by_name() {
        let registry = CircuitBreakerRegistry::new(settings());
        let a = registry.get("/a");
        let again = registry.get("/a");
        assert!(Arc::ptr_eq(&a, &again));

        fail_n(&registry.get("/b"), 5);
        assert!(registry.any_open());

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "/a");
        assert_eq!(snapshot[0].state, BreakerState::Closed);
        assert_eq!(snapshot[1].state, BreakerState::Open);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(BreakerState::HalfOpen.to_string(), "half-open");
        assert!((BreakerState::Open.gauge_value() - 2.0).abs() < f64::EPSILON);
    }
}
