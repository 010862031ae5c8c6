//! Connection-health tracking and reconnection orchestration.
//!
//! One [`ServiceHealth`] state machine per monitored connection:
//! Healthy → Degraded on failure → CircuitOpen once consecutive failures
//! reach the threshold → retry after the cool-down → Healthy on success, or
//! CircuitOpen again with a renewed cool-down on failure.
//!
//! Reconnection runs as one owned task per service; the task handle doubles
//! as the "cycle in flight" guard, so failures reported while a cycle runs
//! are counted but never start a second concurrent cycle. Every attempt and
//! every ready-wait carries a timeout that converts to a recorded failure
//! rather than hanging. A silence watchdog independently flags a service
//! that has stopped reporting successes even without explicit failures.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use {
    async_trait::async_trait,
    serde::Serialize,
    tokio::{
        sync::mpsc,
        task::JoinHandle,
        time::{Instant, sleep, sleep_until, timeout},
    },
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    trestle_common::{now_ms, types::NetworkSide},
};

/// Recovery tuning. Defaults mirror the connection behavior of the wire
/// clients themselves (30s connect timeouts, ten retries).
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Consecutive failures that open the circuit.
    pub circuit_threshold: u32,
    /// How long an open circuit holds attempts off.
    pub cooldown: Duration,
    /// First backoff delay; doubles per attempt.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Attempts per reconnection cycle.
    pub max_attempts: u32,
    /// Per-attempt timeout; expiry is recorded as a failure.
    pub attempt_timeout: Duration,
    /// A service with no recorded success for this long is flagged silent.
    pub silence_timeout: Duration,
    /// Ring-buffer capacity for attempt history.
    pub history_capacity: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            circuit_threshold: 5,
            cooldown: Duration::from_secs(60),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            attempt_timeout: Duration::from_secs(30),
            silence_timeout: Duration::from_secs(300),
            history_capacity: 50,
        }
    }
}

/// Externally supplied reconnection procedure.
#[async_trait]
pub trait Reconnector: Send + Sync {
    async fn reconnect(&self, service: NetworkSide) -> anyhow::Result<()>;
}

/// Notifications emitted as health state changes.
#[derive(Debug, Clone)]
pub enum RecoveryEvent {
    /// First failure after a healthy stretch.
    Degraded { service: NetworkSide, error: String },
    /// An individual reconnection attempt failed.
    AttemptFailed {
        service: NetworkSide,
        attempt: u32,
        error: String,
    },
    /// The service came back (either an attempt succeeded or the connection
    /// reported success on its own).
    Recovered { service: NetworkSide },
    /// Consecutive failures reached the threshold.
    CircuitOpened { service: NetworkSide, failures: u32 },
    /// A success closed an open circuit.
    CircuitClosed { service: NetworkSide },
    /// An operator cleared the circuit without a reconnection.
    CircuitReset { service: NetworkSide },
    /// No success recorded within the silence window.
    Silent {
        service: NetworkSide,
        silent_for: Duration,
    },
}

/// One reconnection attempt, kept in a capped ring buffer for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryAttempt {
    pub attempt: u32,
    pub at_ms: u64,
    pub delay_ms: u64,
    pub success: bool,
}

/// Externally observable health snapshot for one service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub service: NetworkSide,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub last_success_ms: Option<u64>,
    pub circuit_open_until_ms: Option<u64>,
}

#[derive(Debug)]
struct ServiceState {
    consecutive_failures: u32,
    total_failures: u64,
    last_success: Option<Instant>,
    last_success_ms: Option<u64>,
    circuit_open_until: Option<Instant>,
    degraded: bool,
    silent_flagged: bool,
    history: VecDeque<RecoveryAttempt>,
}

impl ServiceState {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            total_failures: 0,
            last_success: None,
            last_success_ms: None,
            circuit_open_until: None,
            degraded: false,
            silent_flagged: false,
            history: VecDeque::new(),
        }
    }

    fn circuit_open(&self, now: Instant) -> bool {
        self.circuit_open_until.is_some_and(|until| until > now)
    }
}

struct Inner {
    config: RecoveryConfig,
    reconnector: Arc<dyn Reconnector>,
    events: mpsc::UnboundedSender<RecoveryEvent>,
    states: Mutex<HashMap<NetworkSide, ServiceState>>,
    cycles: Mutex<HashMap<NetworkSide, JoinHandle<()>>>,
    started_at: Instant,
    cancel: CancellationToken,
}

impl Inner {
    fn states(&self) -> MutexGuard<'_, HashMap<NetworkSide, ServiceState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: RecoveryEvent) {
        let _ = self.events.send(event);
    }

    /// Update counters for one failure. Returns true when this failure
    /// opened (or re-opened) the circuit.
    fn note_failure(&self, service: NetworkSide, error: &str) -> bool {
        let now = Instant::now();
        let mut states = self.states();
        let state = states.entry(service).or_insert_with(ServiceState::new);

        state.consecutive_failures += 1;
        state.total_failures += 1;

        if !state.degraded {
            state.degraded = true;
            self.emit(RecoveryEvent::Degraded {
                service,
                error: error.to_owned(),
            });
        }

        if state.consecutive_failures >= self.config.circuit_threshold && !state.circuit_open(now) {
            state.circuit_open_until = Some(now + self.config.cooldown);
            let failures = state.consecutive_failures;
            drop(states);
            warn!(%service, failures, "circuit breaker tripped");
            self.emit(RecoveryEvent::CircuitOpened { service, failures });
            return true;
        }
        false
    }

    fn note_success(&self, service: NetworkSide) {
        let mut states = self.states();
        let state = states.entry(service).or_insert_with(ServiceState::new);

        let was_open = state.circuit_open_until.is_some();
        let was_degraded = state.degraded || was_open;
        state.consecutive_failures = 0;
        state.last_success = Some(Instant::now());
        state.last_success_ms = Some(now_ms());
        state.circuit_open_until = None;
        state.degraded = false;
        state.silent_flagged = false;
        drop(states);

        if was_open {
            self.emit(RecoveryEvent::CircuitClosed { service });
        }
        if was_degraded {
            info!(%service, "service recovered");
            self.emit(RecoveryEvent::Recovered { service });
        }
    }

    fn record_attempt(&self, service: NetworkSide, attempt: RecoveryAttempt) {
        let mut states = self.states();
        let state = states.entry(service).or_insert_with(ServiceState::new);
        if state.history.len() >= self.config.history_capacity {
            state.history.pop_front();
        }
        state.history.push_back(attempt);
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.config.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.config.max_delay)
    }

    /// Run a single reconnection attempt, bounded by the attempt timeout.
    async fn run_attempt(&self, service: NetworkSide, attempt: u32, delay: Duration) -> bool {
        let outcome = timeout(
            self.config.attempt_timeout,
            self.reconnector.reconnect(service),
        )
        .await;

        let (success, error) = match outcome {
            Ok(Ok(())) => (true, None),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (false, Some("reconnection attempt timed out".to_owned())),
        };

        self.record_attempt(
            service,
            RecoveryAttempt {
                attempt,
                at_ms: now_ms(),
                delay_ms: delay.as_millis() as u64,
                success,
            },
        );

        if success {
            self.note_success(service);
        } else if let Some(error) = error {
            warn!(%service, attempt, %error, "reconnection attempt failed");
            self.emit(RecoveryEvent::AttemptFailed {
                service,
                attempt,
                error: error.clone(),
            });
            self.note_failure(service, &error);
        }
        success
    }
}

/// A reconnection cycle: backoff-spaced attempts until one succeeds or the
/// attempt budget is exhausted. While the circuit is open the cycle sleeps
/// out the cool-down instead of the backoff delay.
async fn run_cycle(inner: Arc<Inner>, service: NetworkSide) {
    for attempt in 1..=inner.config.max_attempts {
        let open_until = {
            let now = Instant::now();
            inner
                .states()
                .get(&service)
                .and_then(|s| s.circuit_open_until)
                .filter(|until| *until > now)
        };

        let delay = match open_until {
            Some(until) => {
                sleep_until(until).await;
                until.elapsed() // ~zero; the cool-down was the wait
            },
            None => {
                let delay = inner.backoff_delay(attempt);
                sleep(delay).await;
                delay
            },
        };

        info!(%service, attempt, "attempting reconnection");
        if inner.run_attempt(service, attempt, delay).await {
            return;
        }
    }
    warn!(%service, attempts = inner.config.max_attempts, "reconnection cycle exhausted");
}

/// Per-service health tracking, circuit breaking, and backoff reconnection.
#[derive(Clone)]
pub struct RecoveryManager {
    inner: Arc<Inner>,
}

impl RecoveryManager {
    #[must_use]
    pub fn new(
        config: RecoveryConfig,
        reconnector: Arc<dyn Reconnector>,
        events: mpsc::UnboundedSender<RecoveryEvent>,
    ) -> Self {
        let mut states = HashMap::new();
        states.insert(NetworkSide::Gateway, ServiceState::new());
        states.insert(NetworkSide::Line, ServiceState::new());

        Self {
            inner: Arc::new(Inner {
                config,
                reconnector,
                events,
                states: Mutex::new(states),
                cycles: Mutex::new(HashMap::new()),
                started_at: Instant::now(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Record a successful operation (connect, ready, delivered message).
    /// Resets failure counters, closes an open circuit, and emits a
    /// recovery notification on the transition back to healthy.
    pub fn record_success(&self, service: NetworkSide) {
        self.inner.note_success(service);
    }

    /// Record a transport failure and make sure a reconnection cycle is
    /// running. Failures observed while a cycle is already in flight are
    /// counted but never start a second one.
    pub fn record_failure(&self, service: NetworkSide, error: impl std::fmt::Display) {
        self.inner.note_failure(service, &error.to_string());
        self.ensure_cycle(service);
    }

    /// Bypass backoff: abort any running cycle, run one attempt now, and
    /// propagate its outcome to the caller.
    pub async fn force_recovery(&self, service: NetworkSide) -> anyhow::Result<()> {
        {
            let mut cycles = self
                .inner
                .cycles
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(handle) = cycles.remove(&service) {
                handle.abort();
            }
        }

        info!(%service, "forcing recovery");
        if self
            .inner
            .run_attempt(service, 1, Duration::ZERO)
            .await
        {
            Ok(())
        } else {
            Err(anyhow::anyhow!("forced recovery attempt for {service} failed"))
        }
    }

    /// Manually clear the circuit without requiring a successful
    /// reconnection.
    pub fn reset_circuit_breaker(&self, service: NetworkSide) {
        {
            let mut states = self.inner.states();
            let state = states.entry(service).or_insert_with(ServiceState::new);
            state.circuit_open_until = None;
            state.consecutive_failures = 0;
        }
        info!(%service, "circuit breaker reset");
        self.inner.emit(RecoveryEvent::CircuitReset { service });
    }

    /// Externally observable health snapshot.
    #[must_use]
    pub fn health(&self, service: NetworkSide) -> ServiceHealth {
        let states = self.inner.states();
        let state = states.get(&service);
        let now = Instant::now();
        ServiceHealth {
            service,
            consecutive_failures: state.map_or(0, |s| s.consecutive_failures),
            total_failures: state.map_or(0, |s| s.total_failures),
            last_success_ms: state.and_then(|s| s.last_success_ms),
            circuit_open_until_ms: state
                .and_then(|s| s.circuit_open_until)
                .filter(|until| *until > now)
                .map(|until| now_ms() + (until - now).as_millis() as u64),
        }
    }

    /// Attempt history for one service, oldest first.
    #[must_use]
    pub fn history(&self, service: NetworkSide) -> Vec<RecoveryAttempt> {
        self.inner
            .states()
            .get(&service)
            .map(|s| s.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether a reconnection cycle is currently in flight.
    #[must_use]
    pub fn cycle_in_flight(&self, service: NetworkSide) -> bool {
        let cycles = self.inner.cycles.lock().unwrap_or_else(|e| e.into_inner());
        cycles.get(&service).is_some_and(|h| !h.is_finished())
    }

    /// Spawn the silence watchdog. It flags a service unhealthy when no
    /// success has been recorded within the silence window, catching
    /// connections that stall without an explicit error.
    pub fn spawn_watchdog(&self) {
        let inner = Arc::clone(&self.inner);
        let cancel = inner.cancel.clone();
        let period = (inner.config.silence_timeout / 2).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {},
                }

                let now = Instant::now();
                let mut silent = Vec::new();
                {
                    let mut states = inner.states();
                    for (service, state) in states.iter_mut() {
                        let reference = state.last_success.unwrap_or(inner.started_at);
                        let gap = now.duration_since(reference);
                        if gap > inner.config.silence_timeout && !state.silent_flagged {
                            state.silent_flagged = true;
                            state.degraded = true;
                            silent.push((*service, gap));
                        }
                    }
                }
                for (service, gap) in silent {
                    warn!(%service, silent_secs = gap.as_secs(), "service silent");
                    inner.emit(RecoveryEvent::Silent {
                        service,
                        silent_for: gap,
                    });
                }
            }
        });
    }

    /// Stop the watchdog and abort any in-flight cycles. Used at shutdown.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut cycles = self.inner.cycles.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in cycles.drain() {
            handle.abort();
        }
    }

    fn ensure_cycle(&self, service: NetworkSide) {
        let mut cycles = self.inner.cycles.lock().unwrap_or_else(|e| e.into_inner());
        if cycles.get(&service).is_some_and(|h| !h.is_finished()) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        cycles.insert(service, tokio::spawn(run_cycle(inner, service)));
    }
}
