use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use aegis_core::context::LlmContext;
use aegis_core::errors::GatewayError;
use aegis_core::provider::{EventStream, LlmProvider, StreamOptions};

/// Retry and circuit breaker tuning.
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the backoff added or removed at random.
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

impl ReliableConfig {
    /// Delay before retry number `attempt` (zero-based). A `retry_after`
    /// hint from the server wins over the computed backoff.
    pub fn backoff(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.max_delay);
        }
        let doubled = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let capped = doubled.min(self.max_delay);
        if self.jitter_factor <= 0.0 {
            return capped;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter_factor..=self.jitter_factor);
        capped.mul_f64((1.0 + spread).max(0.0)).max(Duration::from_millis(1))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Consecutive-failure breaker shared by every session using one endpoint.
#[derive(Debug)]
struct Breaker {
    state: Mutex<CircuitState>,
    failures: AtomicU32,
    threshold: u32,
    cooldown: Duration,
}

impl Breaker {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(CircuitState::Closed),
            failures: AtomicU32::new(0),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    /// Whether a request may go out. An open breaker past its cooldown lets
    /// one probe through.
    fn admit(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open { since } if since.elapsed() >= self.cooldown => {
                *state = CircuitState::HalfOpen;
                true
            }
            CircuitState::Open { .. } => false,
        }
    }

    /// Returns true when this success closed a tripped breaker.
    fn succeeded(&self) -> bool {
        self.failures.store(0, Ordering::Relaxed);
        let mut state = self.state.lock();
        let reopened = *state != CircuitState::Closed;
        *state = CircuitState::Closed;
        reopened
    }

    /// Returns the failure count when this failure tripped the breaker.
    fn failed(&self) -> Option<u32> {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.state.lock();
        let tripping = match *state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => failures >= self.threshold,
            CircuitState::Open { .. } => false,
        };
        if tripping {
            *state = CircuitState::Open { since: Instant::now() };
            Some(failures)
        } else {
            None
        }
    }

    fn state(&self) -> CircuitState {
        *self.state.lock()
    }
}

/// Wraps a reasoning endpoint with bounded retries and a circuit breaker.
///
/// Retryable gateway errors back off exponentially with jitter. Once the
/// endpoint has failed `circuit_breaker_threshold` requests in a row, calls
/// fail fast with `ProviderOverloaded` until the cooldown passes; a failed
/// probe re-opens the breaker. Backoff sleeps end when the token is cancelled.
pub struct ReliableProvider<P: LlmProvider> {
    inner: P,
    config: ReliableConfig,
    cancel: CancellationToken,
    breaker: Breaker,
    retries: AtomicU64,
}

impl<P: LlmProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        let breaker = Breaker::new(config.circuit_breaker_threshold, config.circuit_breaker_cooldown);
        Self {
            inner,
            config,
            cancel: CancellationToken::new(),
            breaker,
            retries: AtomicU64::new(0),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Retries issued over the provider's lifetime.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    fn give_up(&self, err: GatewayError) -> GatewayError {
        if let Some(failures) = self.breaker.failed() {
            warn!(
                model = self.inner.model(),
                failures,
                cooldown_secs = self.config.circuit_breaker_cooldown.as_secs(),
                "reasoning endpoint circuit opened"
            );
        }
        err
    }
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn supports_tools(&self) -> bool {
        self.inner.supports_tools()
    }

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let mut attempt: u32 = 0;
        loop {
            if !self.breaker.admit() {
                return Err(GatewayError::ProviderOverloaded);
            }

            let err = match self.inner.stream(context, options).await {
                Ok(stream) => {
                    if self.breaker.succeeded() {
                        info!(model = self.inner.model(), "reasoning endpoint circuit closed");
                    }
                    return Ok(stream);
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.config.max_retries {
                return Err(self.give_up(err));
            }

            let delay = self.config.backoff(attempt, err.suggested_delay());
            attempt += 1;
            self.retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                model = self.inner.model(),
                attempt,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error_kind = err.error_kind(),
                error = %err,
                "reasoning request failed, retrying"
            );

            tokio::select! {
                () = self.cancel.cancelled() => return Err(self.give_up(err)),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProvider, MockResponse};

    fn overloaded() -> MockResponse {
        MockResponse::Error(GatewayError::ServerError { status: 500, body: "engine dead".into() })
    }

    fn quick(max_retries: u32, threshold: u32) -> ReliableConfig {
        ReliableConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter_factor: 0.0,
            circuit_breaker_threshold: threshold,
            circuit_breaker_cooldown: Duration::from_millis(40),
        }
    }

    async fn call(provider: &ReliableProvider<MockProvider>) -> Result<EventStream, GatewayError> {
        provider.stream(&LlmContext::empty(), &StreamOptions::default()).await
    }

    #[tokio::test]
    async fn transient_failures_are_absorbed() {
        let reliable = ReliableProvider::new(
            MockProvider::new(vec![overloaded(), overloaded(), MockResponse::text("{}")]),
            quick(3, 5),
        );
        assert!(call(&reliable).await.is_ok());
        assert_eq!(reliable.retries(), 2);
        assert_eq!(reliable.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn fatal_and_malformed_errors_surface_immediately() {
        let reliable = ReliableProvider::new(
            MockProvider::new(vec![
                MockResponse::Error(GatewayError::AuthenticationFailed("bad key".into())),
                MockResponse::Error(GatewayError::MalformedResponse("no choices".into())),
                MockResponse::text("unreachable"),
            ]),
            quick(3, 5),
        );
        assert!(matches!(call(&reliable).await, Err(GatewayError::AuthenticationFailed(_))));
        assert!(matches!(call(&reliable).await, Err(GatewayError::MalformedResponse(_))));
        assert_eq!(reliable.retries(), 0);
    }

    #[tokio::test]
    async fn gives_up_after_the_retry_budget() {
        let mock = MockProvider::new(vec![overloaded(), overloaded(), overloaded(), MockResponse::text("late")]);
        let reliable = ReliableProvider::new(mock, quick(2, 5));
        assert!(matches!(call(&reliable).await, Err(GatewayError::ServerError { status: 500, .. })));
        assert_eq!(reliable.retries(), 2);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let config = ReliableConfig {
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            ..quick(3, 5)
        };
        let reliable = ReliableProvider::new(MockProvider::new(vec![overloaded(), MockResponse::text("x")]), config)
            .with_cancellation(cancel.clone());
        cancel.cancel();

        let started = Instant::now();
        assert!(call(&reliable).await.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn breaker_fails_fast_then_probes_after_cooldown() {
        let mock = MockProvider::new(vec![overloaded(), overloaded(), MockResponse::text("{}")]);
        let reliable = ReliableProvider::new(mock, quick(0, 2));

        let _ = call(&reliable).await;
        let _ = call(&reliable).await;
        assert!(matches!(reliable.circuit_state(), CircuitState::Open { .. }));
        assert!(matches!(call(&reliable).await, Err(GatewayError::ProviderOverloaded)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(call(&reliable).await.is_ok());
        assert_eq!(reliable.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn failed_probe_reopens_the_breaker() {
        let mock = MockProvider::new(vec![overloaded(), overloaded(), MockResponse::text("{}")]);
        let reliable = ReliableProvider::new(mock, quick(0, 1));

        let _ = call(&reliable).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = call(&reliable).await;
        assert!(matches!(reliable.circuit_state(), CircuitState::Open { .. }));
        assert!(matches!(call(&reliable).await, Err(GatewayError::ProviderOverloaded)));
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter_factor: 0.0,
            ..ReliableConfig::default()
        };
        let delays: Vec<u128> = (0..4).map(|a| config.backoff(a, None).as_millis()).collect();
        assert_eq!(delays, [100, 200, 400, 500]);
        assert_eq!(config.backoff(40, None).as_millis(), 500);
        assert_eq!(config.backoff(0, Some(Duration::from_millis(250))).as_millis(), 250);
        assert_eq!(config.backoff(0, Some(Duration::from_secs(10))).as_millis(), 500);
    }

    #[test]
    fn jitter_stays_within_its_band() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(1000),
            jitter_factor: 0.2,
            ..ReliableConfig::default()
        };
        for _ in 0..100 {
            let ms = config.backoff(0, None).as_millis();
            assert!((799..=1200).contains(&ms), "got {ms}");
        }
    }

    #[test]
    fn delegates_identity() {
        let reliable = ReliableProvider::new(MockProvider::named("think", vec![]), ReliableConfig::default());
        assert_eq!(reliable.model(), "think");
        assert!(reliable.supports_tools());
    }
}
