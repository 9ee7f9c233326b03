use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use {
    reqwest::Method,
    serde::{Serialize, de::DeserializeOwned},
    tracing::{debug, warn},
};

use crate::{
    Error, Result,
    breaker::{CircuitBreaker, Gate},
};

/// Tuning knobs, usually sourced from [`drover_config::TransportConfig`].
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
        }
    }
}

impl From<&drover_config::TransportConfig> for TransportOptions {
    fn from(cfg: &drover_config::TransportConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_secs(cfg.base_delay_secs),
            max_delay: Duration::from_secs(cfg.max_delay_secs),
            failure_threshold: cfg.failure_threshold,
            cooldown: Duration::from_secs(cfg.cooldown_secs),
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOpts {
    pub bearer: Option<String>,
    pub timeout: Option<Duration>,
}

impl RequestOpts {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer: Some(token.into()),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// HTTP client with retries, backoff, and per-target circuit breaking.
pub struct RobustClient {
    client: reqwest::Client,
    opts: TransportOptions,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl RobustClient {
    pub fn new(opts: TransportOptions) -> Self {
        Self {
            client: reqwest::Client::new(),
            opts,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, opts: &RequestOpts) -> Result<T> {
        let body = self.request(Method::GET, url, None, opts).await?;
        serde_json::from_str(&body).map_err(|e| Error::Decode(e.to_string()))
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        opts: &RequestOpts,
    ) -> Result<T> {
        let payload = serde_json::to_value(body).map_err(|e| Error::Decode(e.to_string()))?;
        let body = self.request(Method::POST, url, Some(payload), opts).await?;
        serde_json::from_str(&body).map_err(|e| Error::Decode(e.to_string()))
    }

    /// One logical request: breaker gate, then up to `max_retries` attempts
    /// with exponential backoff on transient failures. Returns the raw
    /// response body of the first 2xx.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
        opts: &RequestOpts,
    ) -> Result<String> {
        let target = target_key(url);
        self.check_gate(&target)?;

        let timeout = opts.timeout.unwrap_or(self.opts.timeout);
        let mut last_err: Option<Error> = None;

        for attempt in 0..self.opts.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(&self.opts, attempt - 1);
                debug!(%url, attempt, ?delay, "retrying after backoff");
                tokio::time::sleep(delay).await;
            }

            match self.attempt(method.clone(), url, body.as_ref(), opts, timeout).await {
                Ok(text) => {
                    self.record_success(&target);
                    return Ok(text);
                },
                Err(err) if err.is_transient() => {
                    warn!(%url, attempt, error = %err, "transient transport failure");
                    last_err = Some(err);
                },
                Err(err) => {
                    // 4xx / decode failures are final. The peer answered, so
                    // the breaker treats this as contact.
                    if matches!(err, Error::Status { .. }) {
                        self.record_success(&target);
                    }
                    return Err(err);
                },
            }
        }

        self.record_failure(&target);
        Err(Error::ExhaustedRetries {
            attempts: self.opts.max_retries,
            last: Box::new(last_err.unwrap_or_else(|| Error::Connect("no attempt made".into()))),
        })
    }

    async fn attempt(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
        opts: &RequestOpts,
        timeout: Duration,
    ) -> Result<String> {
        let mut req = self.client.request(method, url).timeout(timeout);
        if let Some(ref token) = opts.bearer {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|e| classify(e, timeout))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Decode(e.to_string()))?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(Error::Status {
                status: status.as_u16(),
                body: text,
            })
        }
    }

    fn check_gate(&self, target: &str) -> Result<()> {
        let mut breakers = lock(&self.breakers);
        let breaker = breakers
            .entry(target.to_owned())
            .or_insert_with(|| CircuitBreaker::new(self.opts.failure_threshold, self.opts.cooldown));
        match breaker.gate(Instant::now()) {
            Gate::Open => Err(Error::CircuitOpen {
                target: target.to_owned(),
            }),
            Gate::HalfOpen => {
                debug!(%target, "circuit half-open, allowing trial request");
                Ok(())
            },
            Gate::Closed => Ok(()),
        }
    }

    fn record_success(&self, target: &str) {
        if let Some(b) = lock(&self.breakers).get_mut(target) {
            b.record_success();
        }
    }

    fn record_failure(&self, target: &str) {
        let mut breakers = lock(&self.breakers);
        let breaker = breakers
            .entry(target.to_owned())
            .or_insert_with(|| CircuitBreaker::new(self.opts.failure_threshold, self.opts.cooldown));
        breaker.record_failure(Instant::now());
    }
}

fn classify(e: reqwest::Error, timeout: Duration) -> Error {
    if e.is_timeout() {
        Error::Timeout(timeout)
    } else if e.is_connect() || e.is_request() {
        Error::Connect(e.to_string())
    } else if e.is_body() || e.is_decode() {
        Error::Decode(e.to_string())
    } else {
        Error::Connect(e.to_string())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A panicked holder only ever touched breaker counters; the map stays usable.
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn backoff_delay(opts: &TransportOptions, exponent: u32) -> Duration {
    let multiplier = 2u32.saturating_pow(exponent);
    opts.base_delay
        .saturating_mul(multiplier)
        .min(opts.max_delay)
}

/// Breakers are scoped per scheme+authority so one sick slave cannot poison
/// calls to its neighbors.
fn target_key(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => format!(
            "{}://{}:{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or("unknown"),
            parsed.port_or_known_default().unwrap_or(0)
        ),
        Err(_) => url.to_owned(),
    }
}
