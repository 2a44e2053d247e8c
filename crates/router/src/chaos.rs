//! Chaos injection wrapper for [`Backend`].
//!
//! [`ChaosBackend`] wraps any backend and injects configurable faults:
//! random errors, a hard "down" switch, latency, corrupted read payloads
//! and reversed key listings. The last two produce drift rather than
//! failures.

use crate::backend::Backend;
use pstore_common::{
    CountRequest, CountResponse, DeleteRequest, DeleteResponse, GetKeysRequest, GetKeysResponse,
    ReadRequest, ReadResponse, StoreError, WriteRequest, WriteResponse,
};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

/// Configuration for backend chaos injection.
#[derive(Debug, Clone, Default)]
pub struct ChaosConfig {
    /// Probability of returning an error \[0.0, 1.0\].
    pub failure_rate: f64,
    /// Fixed latency injected before forwarding.
    pub latency: Duration,
    /// Random additional latency in \[0, jitter\].
    pub jitter: Duration,
    /// Flip the last byte of every successful read.
    pub corrupt_reads: bool,
    /// Return key listings in reverse order.
    pub reverse_keys: bool,
}

#[derive(Debug, Default)]
struct ChaosState {
    config: ChaosConfig,
    down: bool,
}

/// A [`Backend`] wrapper that injects chaos.
pub struct ChaosBackend<B: Backend> {
    inner: Arc<B>,
    state: Arc<RwLock<ChaosState>>,
}

impl<B: Backend> std::fmt::Debug for ChaosBackend<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosBackend")
            .field("name", &self.inner.name())
            .finish_non_exhaustive()
    }
}

impl<B: Backend> ChaosBackend<B> {
    pub fn new(inner: B, config: ChaosConfig) -> Self {
        Self {
            inner: Arc::new(inner),
            state: Arc::new(RwLock::new(ChaosState {
                config,
                down: false,
            })),
        }
    }

    /// Fail every call with Unavailable until [`ChaosBackend::set_up`].
    pub async fn set_down(&self) {
        self.state.write().await.down = true;
    }

    pub async fn set_up(&self) {
        self.state.write().await.down = false;
    }

    /// Dynamically update the random failure rate.
    pub async fn set_failure_rate(&self, rate: f64) {
        self.state.write().await.config.failure_rate = rate;
    }

    pub async fn set_corrupt_reads(&self, on: bool) {
        self.state.write().await.config.corrupt_reads = on;
    }

    pub async fn set_reverse_keys(&self, on: bool) {
        self.state.write().await.config.reverse_keys = on;
    }

    /// Apply chaos checks: returns Err if the request should fail.
    async fn maybe_fail(&self) -> Result<(), StoreError> {
        let (delay, failure_rate) = {
            let state = self.state.read().await;
            if state.down {
                return Err(StoreError::Unavailable(format!(
                    "chaos: '{}' marked as down",
                    self.inner.name()
                )));
            }
            let config = &state.config;
            let jitter_ms = if config.jitter.is_zero() {
                0
            } else {
                rand::thread_rng().gen_range(0..=config.jitter.as_millis() as u64)
            };
            (
                config.latency + Duration::from_millis(jitter_ms),
                config.failure_rate,
            )
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if failure_rate > 0.0 && rand::thread_rng().gen_bool(failure_rate.min(1.0)) {
            return Err(StoreError::Internal("chaos: random failure".into()));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl<B: Backend> Backend for ChaosBackend<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn read(&self, req: &ReadRequest) -> Result<ReadResponse, StoreError> {
        self.maybe_fail().await?;
        let mut resp = self.inner.read(req).await?;
        if self.state.read().await.config.corrupt_reads {
            match resp.value.payload.last_mut() {
                Some(last) => *last ^= 0xff,
                None => resp.value.payload.push(0xff),
            }
        }
        Ok(resp)
    }

    async fn write(&self, req: &WriteRequest) -> Result<WriteResponse, StoreError> {
        self.maybe_fail().await?;
        self.inner.write(req).await
    }

    async fn get_keys(&self, req: &GetKeysRequest) -> Result<GetKeysResponse, StoreError> {
        self.maybe_fail().await?;
        let mut resp = self.inner.get_keys(req).await?;
        if self.state.read().await.config.reverse_keys {
            resp.keys.reverse();
        }
        Ok(resp)
    }

    async fn delete(&self, req: &DeleteRequest) -> Result<DeleteResponse, StoreError> {
        self.maybe_fail().await?;
        self.inner.delete(req).await
    }

    async fn count(&self, req: &CountRequest) -> Result<CountResponse, StoreError> {
        self.maybe_fail().await?;
        self.inner.count(req).await
    }
}

// ────────────────────────── Tests ──────────────────────────
