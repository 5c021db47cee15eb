//! Limitation du débit et retries des appels sortants
//!
//! Tous les appels réseau passent par un [`RateLimitedClient`] partagé :
//! - un seau à jetons (capacité `C`, recharge `C / P` jetons par seconde)
//!   rechargé paresseusement à chaque vérification, sans timer de fond ;
//! - une politique de retry avec backoff exponentiel et jitter.
//!
//! Les erreurs "not found" et "bad request" ne sont jamais rejouées.

use crate::error::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

/// Nombre d'appels autorisés par période
pub const DEFAULT_CAPACITY: u32 = 19;
/// Période de recharge complète du seau
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);
/// Nombre maximal de tentatives par appel
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Délai de base du backoff exponentiel
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
/// Jitter maximal ajouté à chaque backoff
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);

struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

/// Seau à jetons partagé par tous les appels concurrents
pub struct RateLimiter {
    capacity: u32,
    /// Temps nécessaire pour regagner un jeton (période / capacité)
    refill_interval: Duration,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Crée un seau plein de `capacity` jetons, rechargé intégralement en `period`
    pub fn new(capacity: u32, period: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            refill_interval: (period / capacity).max(Duration::from_nanos(1)),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Jetons disponibles à l'instant présent
    pub async fn available(&self) -> u32 {
        let mut state = self.state.lock().await;
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    /// `tokens = min(C, tokens + floor(elapsed * rate))`
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let new_tokens = elapsed.as_nanos() / self.refill_interval.as_nanos();
        if new_tokens == 0 {
            return;
        }

        let tokens = (u128::from(state.tokens) + new_tokens).min(u128::from(self.capacity)) as u32;
        if tokens == self.capacity {
            state.last_refill = now;
        } else {
            // tokens < capacity, donc new_tokens tient dans un u32.
            // La fraction de jeton en cours d'accumulation est conservée.
            state.last_refill += self.refill_interval * new_tokens as u32;
        }
        state.tokens = tokens;
    }

    /// Attend qu'un jeton soit disponible puis le consomme
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                self.refill(&mut state, now);

                if state.tokens >= 1 {
                    state.tokens -= 1;
                    return;
                }

                let elapsed = now.saturating_duration_since(state.last_refill);
                self.refill_interval
                    .saturating_sub(elapsed)
                    .max(Duration::from_nanos(1))
            };

            debug!("Rate limiting: waiting {:?}", wait);
            sleep(wait).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_PERIOD)
    }
}

/// Politique de retry : `delay = base * 2^attempt + jitter`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Délai à respecter après l'échec de la tentative `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));

        let max_jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if max_jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=max_jitter_ms))
        };

        backoff + jitter
    }
}

/// Couche de politique : throttling + retries autour d'une opération réseau
pub struct RateLimitedClient {
    limiter: RateLimiter,
    policy: RetryPolicy,
}

impl RateLimitedClient {
    pub fn new(limiter: RateLimiter, policy: RetryPolicy) -> Self {
        Self { limiter, policy }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Exécute `operation` en respectant le débit et la politique de retry.
    ///
    /// Chaque tentative consomme un jeton. Une erreur non rejouable est
    /// retournée immédiatement ; sinon la dernière erreur est retournée une
    /// fois le budget de tentatives épuisé.
    pub async fn call<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            self.limiter.acquire().await;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        warn!(attempts = attempt, error = %e, "Call failed, giving up");
                        return Err(e);
                    }

                    let delay = self.policy.delay_for(attempt - 1);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Call failed, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RateLimitedClient {
    fn default() -> Self {
        Self::new(RateLimiter::default(), RetryPolicy::default())
    }
}
