//! Fanout dispatcher.
//!
//! Every routed call goes through [`Router::dispatch`]. In parallel mode the
//! primary runs inline under the caller's deadline and its result is
//! returned immediately; the remaining backends run in one spawned
//! verification task that owns all of their futures, so the task's
//! completion means every secondary call has finished or timed out. In
//! sequential mode all backends are called in order before deciding.
//!
//! Disagreement is never an error. Only the primary's failure, or every
//! backend failing, reaches the caller.

use crate::backend::{Backend, Backends};
use crate::consistency::Verdict;
use crate::context::CallContext;
use crate::operation::RoutedRequest;
use crate::split::{AlwaysPrimary, SplitPolicy};
use crate::write_queue::{QueueError, WriteElement, WriteQueue};
use futures::stream::{FuturesUnordered, StreamExt};
use pstore_common::{
    Code, CountRequest, CountResponse, DeleteRequest, DeleteResponse, GetKeysRequest,
    GetKeysResponse, ReadRequest, ReadResponse, StoreError, WriteRequest, WriteResponse,
};
use pstore_metrics::MetricsRecorder;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::Instrument;

/// How backends are driven for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FanoutMode {
    /// Primary inline, secondaries concurrently in the background.
    #[default]
    Parallel,
    /// Every backend inline, in order, before the result is decided.
    Sequential,
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub mode: FanoutMode,
    /// Parallel mode: a failed primary skips verification. Count ignores it.
    pub short_circuit: bool,
    /// Applies when the caller sets no deadline.
    pub default_timeout: Duration,
    /// Push the primary's value to Read secondaries that drift or miss the key.
    pub read_repair: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: FanoutMode::Parallel,
            short_circuit: true,
            default_timeout: Duration::from_secs(60),
            read_repair: false,
        }
    }
}

/// Errors that reach the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("primary '{backend}' failed: {source}")]
    Primary {
        backend: String,
        #[source]
        source: StoreError,
    },
    #[error("no backends available ({attempted} attempted)")]
    NoBackendsAvailable { attempted: usize },
}

impl RouterError {
    /// Status code for the caller: the primary's own code, or Internal.
    pub fn code(&self) -> Code {
        match self {
            RouterError::Primary { source, .. } => source.code(),
            RouterError::NoBackendsAvailable { .. } => Code::Internal,
        }
    }

    /// Caller-visible message. A primary failure passes its message through
    /// verbatim.
    pub fn message(&self) -> String {
        match self {
            RouterError::Primary { source, .. } => source.message().to_string(),
            other => other.to_string(),
        }
    }
}

/// Result of one routed call, plus the verification still running for it.
#[must_use = "holds the primary's result"]
#[derive(Debug)]
pub struct Dispatch<T> {
    result: Result<T, RouterError>,
    verification: Option<JoinHandle<()>>,
}

impl<T> Dispatch<T> {
    fn done(result: Result<T, RouterError>) -> Self {
        Self {
            result,
            verification: None,
        }
    }

    pub fn result(&self) -> &Result<T, RouterError> {
        &self.result
    }

    pub fn is_verifying(&self) -> bool {
        self.verification
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Take the result and leave verification running on its own.
    pub fn into_result(self) -> Result<T, RouterError> {
        self.result
    }

    /// Wait until every secondary call has finished or timed out.
    pub async fn settled(self) -> Result<T, RouterError> {
        if let Some(handle) = self.verification {
            if let Err(e) = handle.await {
                tracing::warn!("verification task failed: {}", e);
            }
        }
        self.result
    }
}

/// Routes each operation across the configured backends.
#[derive(Clone)]
pub struct Router {
    backends: Backends,
    split: Arc<dyn SplitPolicy>,
    metrics: Arc<dyn MetricsRecorder>,
    config: DispatchConfig,
    queue: Option<WriteQueue>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("backends", &self.backends)
            .field("config", &self.config)
            .field("split_weight", &self.split.weight())
            .finish_non_exhaustive()
    }
}

impl Router {
    pub fn new(
        backends: Backends,
        metrics: Arc<dyn MetricsRecorder>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            backends,
            split: Arc::new(AlwaysPrimary),
            metrics,
            config,
            queue: None,
        }
    }

    pub fn with_split_policy(mut self, split: Arc<dyn SplitPolicy>) -> Self {
        self.split = split;
        self
    }

    /// Attach the shadow write queue. Required for read repair and
    /// [`Router::shadow_write`].
    pub fn with_write_queue(mut self, queue: WriteQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn write_queue(&self) -> Option<&WriteQueue> {
        self.queue.as_ref()
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    pub async fn read(
        &self,
        ctx: &CallContext,
        req: ReadRequest,
    ) -> Result<ReadResponse, RouterError> {
        self.dispatch(ctx, req).await.into_result()
    }

    pub async fn write(
        &self,
        ctx: &CallContext,
        req: WriteRequest,
    ) -> Result<WriteResponse, RouterError> {
        self.dispatch(ctx, req).await.into_result()
    }

    pub async fn get_keys(
        &self,
        ctx: &CallContext,
        req: GetKeysRequest,
    ) -> Result<GetKeysResponse, RouterError> {
        self.dispatch(ctx, req).await.into_result()
    }

    pub async fn delete(
        &self,
        ctx: &CallContext,
        req: DeleteRequest,
    ) -> Result<DeleteResponse, RouterError> {
        self.dispatch(ctx, req).await.into_result()
    }

    pub async fn count(
        &self,
        ctx: &CallContext,
        req: CountRequest,
    ) -> Result<CountResponse, RouterError> {
        self.dispatch(ctx, req).await.into_result()
    }

    /// Queue a write for one named backend, waiting for space if the queue
    /// is full.
    pub async fn shadow_write(&self, element: WriteElement) -> Result<(), QueueError> {
        match &self.queue {
            Some(queue) => queue.enqueue(element).await,
            None => Err(QueueError::NotConfigured),
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Route one request according to the configured fanout mode.
    pub async fn dispatch<R: RoutedRequest>(
        &self,
        ctx: &CallContext,
        req: R,
    ) -> Dispatch<R::Response> {
        if self.backends.is_empty() {
            return Dispatch::done(Err(RouterError::NoBackendsAvailable { attempted: 0 }));
        }
        match self.config.mode {
            FanoutMode::Parallel => self.dispatch_parallel(ctx, req).await,
            FanoutMode::Sequential => Dispatch::done(self.dispatch_sequential(ctx, req).await),
        }
    }

    fn select_primary(&self, candidates: usize) -> usize {
        self.metrics.record_split(self.split.weight());
        self.split
            .select(candidates)
            .min(candidates.saturating_sub(1))
    }

    fn checker<R: RoutedRequest>(
        &self,
        req: R,
        primary: &dyn Backend,
        result: Result<R::Response, StoreError>,
    ) -> Checker<R> {
        Checker {
            req,
            primary: primary.name().to_string(),
            result,
            metrics: self.metrics.clone(),
            repair_queue: self.queue.clone().filter(|_| self.config.read_repair),
            drifted: false,
        }
    }

    async fn dispatch_parallel<R: RoutedRequest>(
        &self,
        ctx: &CallContext,
        req: R,
    ) -> Dispatch<R::Response> {
        let index = self.select_primary(self.backends.len());
        let Some(primary) = self.backends.get(index).cloned() else {
            return Dispatch::done(Err(RouterError::NoBackendsAvailable { attempted: 0 }));
        };

        let deadline = ctx.effective_deadline(self.config.default_timeout);
        let result = call(self.metrics.as_ref(), primary.as_ref(), &req, deadline).await;

        let fan_out = result.is_ok() || R::ALWAYS_FAN_OUT || !self.config.short_circuit;
        let targets: Vec<Arc<dyn Backend>> = if fan_out {
            self.backends
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index || R::REVISIT_PRIMARY)
                .map(|(_, b)| b.clone())
                .collect()
        } else {
            tracing::debug!(
                "{} '{}': primary '{}' failed, skipping verification",
                R::OP,
                req.subject(),
                primary.name()
            );
            Vec::new()
        };

        let verification = if targets.is_empty() {
            None
        } else {
            let op = R::OP;
            let span = tracing::debug_span!("verify", op = %op, call = %uuid::Uuid::new_v4());
            let checker = self.checker(req.clone(), primary.as_ref(), result.clone());
            let deadline = ctx.detached_deadline(self.config.default_timeout);
            Some(tokio::spawn(
                run_verification(targets, req, deadline, checker).instrument(span),
            ))
        };

        Dispatch {
            result: result.map_err(|source| RouterError::Primary {
                backend: primary.name().to_string(),
                source,
            }),
            verification,
        }
    }

    /// Primary first under the caller's deadline, then every other backend
    /// in configured order under a fresh budget. Nothing further is attempted
    /// once the caller's deadline has passed.
    async fn dispatch_sequential<R: RoutedRequest>(
        &self,
        ctx: &CallContext,
        req: R,
    ) -> Result<R::Response, RouterError> {
        let index = self.select_primary(self.backends.len());
        let Some(primary) = self.backends.get(index).cloned() else {
            return Err(RouterError::NoBackendsAvailable { attempted: 0 });
        };

        let deadline = ctx.effective_deadline(self.config.default_timeout);
        let result = call(self.metrics.as_ref(), primary.as_ref(), &req, deadline).await;

        let mut secondaries = Vec::with_capacity(self.backends.len() - 1);
        if ctx.remaining().map_or(true, |left| !left.is_zero()) {
            let deadline = ctx.detached_deadline(self.config.default_timeout);
            for (i, backend) in self.backends.iter().enumerate() {
                if i == index {
                    continue;
                }
                if Instant::now() >= deadline {
                    break;
                }
                let outcome = call(self.metrics.as_ref(), backend.as_ref(), &req, deadline).await;
                secondaries.push((backend.clone(), outcome));
            }
        }

        let attempted = 1 + secondaries.len();
        let failed =
            |r: &Result<R::Response, StoreError>| matches!(r, Err(e) if e.is_backend_failure());
        if attempted == self.backends.len()
            && failed(&result)
            && secondaries.iter().all(|(_, r)| failed(r))
        {
            tracing::warn!(
                "{} '{}': all {} backend(s) failed",
                R::OP,
                req.subject(),
                attempted
            );
            return Err(RouterError::NoBackendsAvailable { attempted });
        }
        if attempted < self.backends.len() {
            tracing::debug!(
                "{} '{}': caller deadline passed after {} of {} backend(s)",
                R::OP,
                req.subject(),
                attempted,
                self.backends.len()
            );
        }

        let mut checker = self.checker(req, primary.as_ref(), result.clone());
        for (backend, secondary) in &secondaries {
            if let Some(element) = checker.observe(backend.name(), secondary) {
                checker.repair_now(element);
            }
        }

        result.map_err(|source| RouterError::Primary {
            backend: primary.name().to_string(),
            source,
        })
    }
}

/// One backend call under `deadline`, recorded and logged.
async fn call<R: RoutedRequest>(
    metrics: &dyn MetricsRecorder,
    backend: &dyn Backend,
    req: &R,
    deadline: Instant,
) -> Result<R::Response, StoreError> {
    let start = Instant::now();
    let result = match tokio::time::timeout_at(deadline, req.invoke(backend)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::DeadlineExceeded(format!(
            "{} on '{}' ran out of time",
            R::OP,
            backend.name()
        ))),
    };
    let elapsed = start.elapsed();
    metrics.record_call(R::OP, backend.name(), Code::of(&result), elapsed);

    match &result {
        Ok(_) => tracing::debug!(
            "{} ({}) on '{}' -> ok in {:?}",
            R::OP,
            req.subject(),
            backend.name(),
            elapsed
        ),
        Err(e) if e.is_backend_failure() => tracing::warn!(
            "{} ({}) on '{}' -> {}",
            R::OP,
            req.subject(),
            backend.name(),
            e
        ),
        Err(e) => tracing::debug!(
            "{} ({}) on '{}' -> {}",
            R::OP,
            req.subject(),
            backend.name(),
            e
        ),
    }
    result
}

/// Body of the verification task. Owns every secondary future; each one is
/// bounded by `deadline`, so the task cannot outlive it by much.
async fn run_verification<R: RoutedRequest>(
    targets: Vec<Arc<dyn Backend>>,
    req: R,
    deadline: Instant,
    mut checker: Checker<R>,
) {
    let mut calls: FuturesUnordered<_> = targets
        .into_iter()
        .map(|backend| {
            let req = req.clone();
            let metrics = checker.metrics.clone();
            async move {
                let result = call(metrics.as_ref(), backend.as_ref(), &req, deadline).await;
                (backend, result)
            }
        })
        .collect();

    // Repairs wait until every secondary has settled, so a full queue never
    // stalls the calls still in flight.
    let mut repairs = Vec::new();
    while let Some((backend, result)) = calls.next().await {
        repairs.extend(checker.observe(backend.name(), &result));
    }
    for element in repairs {
        checker.repair(element).await;
    }
}

// ────────────────────────── Checker ──────────────────────────

/// Judges secondary results against a snapshot of the primary's result.
struct Checker<R: RoutedRequest> {
    req: R,
    primary: String,
    result: Result<R::Response, StoreError>,
    metrics: Arc<dyn MetricsRecorder>,
    /// Present only when read repair is on.
    repair_queue: Option<WriteQueue>,
    drifted: bool,
}

impl<R: RoutedRequest> Checker<R> {
    /// Record the verdict for one secondary. Returns the repair write due
    /// for it, if any.
    fn observe(
        &mut self,
        backend: &str,
        secondary: &Result<R::Response, StoreError>,
    ) -> Option<WriteElement> {
        match self.req.verify(&self.result, secondary) {
            Verdict::Agree => {
                tracing::debug!(
                    "{} ({}) '{}' agrees with '{}'",
                    R::OP,
                    self.req.subject(),
                    backend,
                    self.primary
                );
                return None;
            }
            Verdict::Skipped => return None,
            Verdict::Missing => {
                tracing::info!(
                    "{} ({}) missing on '{}', present on '{}'",
                    R::OP,
                    self.req.subject(),
                    backend,
                    self.primary
                );
            }
            Verdict::Drift(mismatch) => {
                tracing::warn!(
                    "{} ({}) drift on '{}' vs '{}': {}",
                    R::OP,
                    self.req.subject(),
                    backend,
                    self.primary,
                    mismatch.detail
                );
                if !(R::DRIFT_ONCE_PER_CALL && self.drifted) {
                    self.metrics.record_drift(mismatch.kind);
                }
                self.drifted = true;
            }
        }

        self.repair_queue.as_ref()?;
        let primary = self.result.as_ref().ok()?;
        let (key, value) = self.req.repair(primary)?;
        Some(WriteElement {
            key,
            value,
            target: backend.to_string(),
        })
    }

    async fn repair(&self, element: WriteElement) {
        let Some(queue) = &self.repair_queue else { return };
        let (key, target) = (element.key.clone(), element.target.clone());
        match queue.enqueue(element).await {
            Ok(()) => tracing::debug!("queued read repair ({}, {})", target, key),
            Err(e) => tracing::warn!("read repair ({}, {}) not queued: {}", target, key, e),
        }
    }

    /// Inline variant: never waits for queue space.
    fn repair_now(&self, element: WriteElement) {
        let Some(queue) = &self.repair_queue else { return };
        let (key, target) = (element.key.clone(), element.target.clone());
        match queue.try_enqueue(element) {
            Ok(()) => tracing::debug!("queued read repair ({}, {})", target, key),
            Err(e) => tracing::warn!("read repair ({}, {}) not queued: {}", target, key, e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemBackend;
    use crate::split::WeightedSplit;
    use pstore_common::{DriftKind, Operation, Value};
    use pstore_metrics::RouterMetrics;

    struct Fixture {
        router: Router,
        metrics: Arc<RouterMetrics>,
        nodes: Vec<Arc<MemBackend>>,
    }

    fn fixture(names: &[&str], config: DispatchConfig) -> Fixture {
        let nodes: Vec<Arc<MemBackend>> = names.iter().map(|n| MemBackend::new(n)).collect();
        let backends = Backends::new(
            nodes
                .iter()
                .map(|n| n.clone() as Arc<dyn Backend>)
                .collect(),
        );
        let metrics = Arc::new(RouterMetrics::new());
        let router = Router::new(backends, metrics.clone(), config);
        Fixture {
            router,
            metrics,
            nodes,
        }
    }

    fn read_req(key: &str) -> ReadRequest {
        ReadRequest { key: key.into() }
    }

    fn sequential() -> DispatchConfig {
        DispatchConfig {
            mode: FanoutMode::Sequential,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_identical_reads_do_not_drift() {
        let f = fixture(&["a", "b", "c"], DispatchConfig::default());
        for n in &f.nodes {
            n.insert("x", b"v1");
        }

        let resp = f
            .router
            .dispatch(&CallContext::background(), read_req("x"))
            .await
            .settled()
            .await
            .unwrap();

        assert_eq!(resp.value.payload, b"v1");
        assert_eq!(f.metrics.drift(DriftKind::Read), 0);
        for n in &f.nodes {
            assert_eq!(n.calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_one_length_mismatch_counts_once() {
        let f = fixture(&["a", "b", "c", "d", "e"], DispatchConfig::default());
        for n in &f.nodes {
            n.insert("x", b"v1");
        }
        f.nodes[3].insert("x", b"v1-longer");

        f.router
            .dispatch(&CallContext::background(), read_req("x"))
            .await
            .settled()
            .await
            .unwrap();

        assert_eq!(f.metrics.drift(DriftKind::Read), 1);
        assert_eq!(f.metrics.total_drift(), 1);
    }

    #[tokio::test]
    async fn test_primary_failure_short_circuits() {
        let f = fixture(&["a", "b", "c"], DispatchConfig::default());
        f.nodes[0].fail_with(StoreError::Internal("disk on fire".into()));

        let dispatch = f
            .router
            .dispatch(&CallContext::background(), read_req("x"))
            .await;
        assert!(!dispatch.is_verifying());
        let err = dispatch.settled().await.unwrap_err();

        assert_eq!(
            err,
            RouterError::Primary {
                backend: "a".into(),
                source: StoreError::Internal("disk on fire".into()),
            }
        );
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(err.message(), "disk on fire");
        assert_eq!(f.nodes[1].calls(), 0);
        assert_eq!(f.nodes[2].calls(), 0);
    }

    async fn assert_short_circuits<R>(req: R)
    where
        R: RoutedRequest,
        R::Response: std::fmt::Debug,
    {
        let f = fixture(&["a", "b", "c"], DispatchConfig::default());
        f.nodes[0].fail_with(StoreError::Unavailable("a is down".into()));

        let dispatch = f.router.dispatch(&CallContext::background(), req).await;
        assert!(!dispatch.is_verifying(), "{}", R::OP);
        let err = dispatch.settled().await.unwrap_err();

        assert_eq!(
            err,
            RouterError::Primary {
                backend: "a".into(),
                source: StoreError::Unavailable("a is down".into()),
            },
            "{}",
            R::OP
        );
        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(err.message(), "a is down");
        assert_eq!(f.nodes[1].calls(), 0, "{}", R::OP);
        assert_eq!(f.nodes[2].calls(), 0, "{}", R::OP);
    }

    #[tokio::test]
    async fn test_primary_failure_short_circuits_every_op_but_count() {
        assert_short_circuits(read_req("x")).await;
        assert_short_circuits(WriteRequest {
            key: "x".into(),
            value: Value::raw(b"v1".to_vec()),
        })
        .await;
        assert_short_circuits(GetKeysRequest::prefix("x")).await;
        assert_short_circuits(DeleteRequest { key: "x".into() }).await;
    }

    #[tokio::test]
    async fn test_primary_not_found_is_returned_verbatim() {
        let f = fixture(&["a", "b"], DispatchConfig::default());
        f.nodes[1].insert("x", b"v1");

        let err = f
            .router
            .read(&CallContext::background(), read_req("x"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(err.message(), "x");
    }

    #[tokio::test]
    async fn test_no_short_circuit_still_fans_out() {
        let f = fixture(
            &["a", "b"],
            DispatchConfig {
                short_circuit: false,
                ..Default::default()
            },
        );
        f.nodes[0].fail_with(StoreError::Unavailable("down".into()));
        f.nodes[1].insert("x", b"v1");

        let result = f
            .router
            .dispatch(&CallContext::background(), read_req("x"))
            .await
            .settled()
            .await;

        assert!(result.is_err());
        assert_eq!(f.nodes[1].calls(), 1);
        assert_eq!(f.metrics.total_drift(), 0);
    }

    #[tokio::test]
    async fn test_failing_secondaries_are_absorbed() {
        let f = fixture(&["a", "b", "c"], DispatchConfig::default());
        f.nodes[0].insert("x", b"v1");
        f.nodes[1].fail_with(StoreError::Unavailable("down".into()));
        f.nodes[2].fail_with(StoreError::Internal("boom".into()));

        let resp = f
            .router
            .dispatch(&CallContext::background(), read_req("x"))
            .await
            .settled()
            .await
            .unwrap();

        assert_eq!(resp.value.payload, b"v1");
        assert_eq!(f.metrics.total_drift(), 0);
        assert_eq!(f.metrics.calls(Operation::Read, "b", Code::Unavailable), 1);
        assert_eq!(f.metrics.calls(Operation::Read, "c", Code::Internal), 1);
    }

    #[tokio::test]
    async fn test_get_keys_reorder_counts_order_not_count() {
        let f = fixture(&["a", "b"], DispatchConfig::default());
        for n in &f.nodes {
            n.insert("k1", b"v");
            n.insert("k2", b"v");
            n.insert("k3", b"v");
        }
        f.nodes[1].reverse_keys();

        let resp = f
            .router
            .dispatch(&CallContext::background(), GetKeysRequest::prefix("k"))
            .await
            .settled()
            .await
            .unwrap();

        assert_eq!(resp.keys, vec!["k1", "k2", "k3"]);
        assert_eq!(f.metrics.drift(DriftKind::GetKeysOrder), 1);
        assert_eq!(f.metrics.drift(DriftKind::GetKeysCount), 0);
    }

    #[tokio::test]
    async fn test_get_keys_count_mismatch() {
        let f = fixture(&["a", "b"], DispatchConfig::default());
        f.nodes[0].insert("k1", b"v");
        f.nodes[0].insert("k2", b"v");
        f.nodes[1].insert("k1", b"v");

        f.router
            .dispatch(&CallContext::background(), GetKeysRequest::all())
            .await
            .settled()
            .await
            .unwrap();

        assert_eq!(f.metrics.drift(DriftKind::GetKeysCount), 1);
        assert_eq!(f.metrics.drift(DriftKind::GetKeysOrder), 0);
    }

    #[tokio::test]
    async fn test_delete_code_mismatch() {
        let f = fixture(&["a", "b"], DispatchConfig::default());
        f.nodes[0].insert("x", b"v");

        f.router
            .dispatch(&CallContext::background(), DeleteRequest { key: "x".into() })
            .await
            .settled()
            .await
            .unwrap();

        assert_eq!(f.metrics.drift(DriftKind::Delete), 1);
    }

    #[tokio::test]
    async fn test_write_fans_out_without_drift() {
        let f = fixture(&["a", "b", "c"], DispatchConfig::default());
        let req = WriteRequest {
            key: "x".into(),
            value: Value::raw(b"v1".to_vec()),
        };

        f.router
            .dispatch(&CallContext::background(), req)
            .await
            .settled()
            .await
            .unwrap();

        for n in &f.nodes {
            assert_eq!(n.payload("x"), Some(b"v1".to_vec()));
        }
        assert_eq!(f.metrics.total_drift(), 0);
    }

    #[tokio::test]
    async fn test_three_backend_scenario() {
        let f = fixture(&["A", "B", "C"], DispatchConfig::default());
        let ctx = CallContext::background();
        f.router
            .dispatch(
                &ctx,
                WriteRequest {
                    key: "x".into(),
                    value: Value::raw(b"v1".to_vec()),
                },
            )
            .await
            .settled()
            .await
            .unwrap();

        // Agreement: no drift.
        let resp = f
            .router
            .dispatch(&ctx, read_req("x"))
            .await
            .settled()
            .await
            .unwrap();
        assert_eq!(resp.value.payload, b"v1");
        assert_eq!(f.metrics.drift(DriftKind::Read), 0);

        // C diverges: exactly one drift, caller still sees A's value.
        f.nodes[2].insert("x", b"v2");
        let resp = f
            .router
            .dispatch(&ctx, read_req("x"))
            .await
            .settled()
            .await
            .unwrap();
        assert_eq!(resp.value.payload, b"v1");
        assert_eq!(f.metrics.drift(DriftKind::Read), 1);
    }

    #[tokio::test]
    async fn test_count_drift_once_per_call() {
        let f = fixture(&["a", "b", "c"], DispatchConfig::default());
        f.nodes[0].set_counter("total", 10);
        f.nodes[1].set_counter("total", 10);
        f.nodes[2].set_counter("total", 9);

        let resp = f
            .router
            .dispatch(
                &CallContext::background(),
                CountRequest {
                    counter: "total".into(),
                },
            )
            .await
            .settled()
            .await
            .unwrap();

        assert_eq!(resp.count, 10);
        assert_eq!(f.metrics.drift(DriftKind::Count), 1);
        // Primary answered twice: once for the caller, once in verification.
        assert_eq!(f.nodes[0].calls(), 2);
    }

    #[tokio::test]
    async fn test_count_many_disagreements_still_once() {
        let f = fixture(&["a", "b", "c", "d"], DispatchConfig::default());
        f.nodes[0].set_counter("total", 10);
        f.nodes[1].set_counter("total", 7);
        f.nodes[2].set_counter("total", 8);
        f.nodes[3].set_counter("total", 9);

        f.router
            .dispatch(
                &CallContext::background(),
                CountRequest {
                    counter: "total".into(),
                },
            )
            .await
            .settled()
            .await
            .unwrap();

        assert_eq!(f.metrics.drift(DriftKind::Count), 1);
    }

    #[tokio::test]
    async fn test_count_fans_out_despite_primary_failure() {
        let f = fixture(&["a", "b"], DispatchConfig::default());
        f.nodes[0].fail_with(StoreError::Unavailable("down".into()));
        f.nodes[1].set_counter("total", 3);

        let err = f
            .router
            .dispatch(
                &CallContext::background(),
                CountRequest {
                    counter: "total".into(),
                },
            )
            .await
            .settled()
            .await
            .unwrap_err();

        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(f.nodes[1].calls(), 1);
        assert_eq!(f.metrics.drift(DriftKind::Count), 0);
    }

    #[tokio::test]
    async fn test_primary_returns_before_slow_secondary() {
        let f = fixture(&["a", "b"], DispatchConfig::default());
        for n in &f.nodes {
            n.insert("x", b"v1");
        }
        f.nodes[1].set_delay(Duration::from_millis(200));

        let started = Instant::now();
        let dispatch = f
            .router
            .dispatch(&CallContext::background(), read_req("x"))
            .await;
        assert!(started.elapsed() < Duration::from_millis(150));
        assert!(dispatch.is_verifying());
        assert!(dispatch.result().is_ok());

        dispatch.settled().await.unwrap();
        assert_eq!(f.nodes[1].calls(), 1);
    }

    #[tokio::test]
    async fn test_secondary_bounded_by_caller_budget() {
        let f = fixture(&["a", "b"], DispatchConfig::default());
        for n in &f.nodes {
            n.insert("x", b"v1");
        }
        f.nodes[1].set_delay(Duration::from_secs(5));

        let ctx = CallContext::with_timeout(Duration::from_millis(50));
        let started = Instant::now();
        f.router
            .dispatch(&ctx, read_req("x"))
            .await
            .settled()
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(
            f.metrics.calls(Operation::Read, "b", Code::DeadlineExceeded),
            1
        );
        assert_eq!(f.metrics.total_drift(), 0);
    }

    #[tokio::test]
    async fn test_verification_survives_dropped_result() {
        let f = fixture(&["a", "b"], DispatchConfig::default());
        f.nodes[0].insert("x", b"v1");
        f.nodes[1].insert("x", b"v2");
        f.nodes[1].set_delay(Duration::from_millis(30));

        let _ = f
            .router
            .read(&CallContext::background(), read_req("x"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(f.metrics.drift(DriftKind::Read), 1);
    }

    #[tokio::test]
    async fn test_primary_deadline_exceeded() {
        let f = fixture(&["a"], DispatchConfig::default());
        f.nodes[0].insert("x", b"v1");
        f.nodes[0].set_delay(Duration::from_millis(200));

        let err = f
            .router
            .read(
                &CallContext::with_timeout(Duration::from_millis(20)),
                read_req("x"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_no_backends() {
        let metrics = Arc::new(RouterMetrics::new());
        let router = Router::new(Backends::new(vec![]), metrics, DispatchConfig::default());
        let err = router
            .read(&CallContext::background(), read_req("x"))
            .await
            .unwrap_err();
        assert_eq!(err, RouterError::NoBackendsAvailable { attempted: 0 });
        assert_eq!(err.code(), Code::Internal);
    }

    #[tokio::test]
    async fn test_split_weight_moves_primary() {
        let f = fixture(&["a", "b"], DispatchConfig::default());
        let router = f
            .router
            .clone()
            .with_split_policy(Arc::new(WeightedSplit::new(1.0)));
        f.nodes[0].insert("x", b"from-a");
        f.nodes[1].insert("x", b"from-b");

        let resp = router
            .dispatch(&CallContext::background(), read_req("x"))
            .await
            .settled()
            .await
            .unwrap();

        assert_eq!(resp.value.payload, b"from-b");
        assert_eq!(f.metrics.split_weight(), 1.0);
        assert_eq!(f.metrics.drift(DriftKind::Read), 1);
    }

    // ──── Sequential mode ────

    #[tokio::test]
    async fn test_sequential_calls_all_inline() {
        let f = fixture(&["a", "b", "c"], sequential());
        for n in &f.nodes {
            n.insert("x", b"v1");
        }
        f.nodes[2].insert("x", b"v2");

        let dispatch = f
            .router
            .dispatch(&CallContext::background(), read_req("x"))
            .await;
        assert!(!dispatch.is_verifying());
        let resp = dispatch.into_result().unwrap();

        assert_eq!(resp.value.payload, b"v1");
        for n in &f.nodes {
            assert_eq!(n.calls(), 1);
        }
        assert_eq!(f.metrics.drift(DriftKind::Read), 1);
    }

    #[tokio::test]
    async fn test_sequential_all_failed() {
        let f = fixture(&["a", "b"], sequential());
        for n in &f.nodes {
            n.fail_with(StoreError::Unavailable("down".into()));
        }

        let err = f
            .router
            .read(&CallContext::background(), read_req("x"))
            .await
            .unwrap_err();
        assert_eq!(err, RouterError::NoBackendsAvailable { attempted: 2 });
        assert_eq!(err.code(), Code::Internal);
    }

    #[tokio::test]
    async fn test_sequential_primary_failure_with_healthy_secondary() {
        let f = fixture(&["a", "b"], sequential());
        f.nodes[0].fail_with(StoreError::Internal("boom".into()));
        f.nodes[1].insert("x", b"v1");

        let err = f
            .router
            .read(&CallContext::background(), read_req("x"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(err.message(), "boom");
    }

    #[tokio::test]
    async fn test_sequential_not_found_everywhere_is_an_answer() {
        let f = fixture(&["a", "b"], sequential());
        let err = f
            .router
            .read(&CallContext::background(), read_req("x"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn test_sequential_count_once_per_call() {
        let f = fixture(&["a", "b", "c"], sequential());
        f.nodes[0].set_counter("total", 10);
        f.nodes[1].set_counter("total", 9);
        f.nodes[2].set_counter("total", 8);

        let resp = f
            .router
            .count(
                &CallContext::background(),
                CountRequest {
                    counter: "total".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(resp.count, 10);
        assert_eq!(f.metrics.drift(DriftKind::Count), 1);
    }

    #[tokio::test]
    async fn test_sequential_slow_primary_keeps_its_own_error() {
        let f = fixture(&["a", "b"], sequential());
        for n in &f.nodes {
            n.insert("x", b"v1");
        }
        f.nodes[0].set_delay(Duration::from_millis(100));
        f.nodes[1].set_delay(Duration::from_millis(5));

        let err = f
            .router
            .read(&CallContext::with_timeout(Duration::from_millis(50)), read_req("x"))
            .await
            .unwrap_err();

        assert!(
            matches!(
                &err,
                RouterError::Primary { backend, source: StoreError::DeadlineExceeded(_) }
                    if backend == "a"
            ),
            "{:?}",
            err
        );
        assert_eq!(err.code(), Code::DeadlineExceeded);
        assert_eq!(f.metrics.calls(Operation::Read, "a", Code::DeadlineExceeded), 1);
        // The caller's budget was spent on the primary; b was never tried.
        assert_eq!(f.nodes[1].calls(), 0);
        assert_eq!(f.metrics.calls(Operation::Read, "b", Code::DeadlineExceeded), 0);
        assert_eq!(f.metrics.calls(Operation::Read, "b", Code::Ok), 0);
    }

    #[tokio::test]
    async fn test_sequential_secondaries_run_after_primary() {
        let f = fixture(&["a", "b"], sequential());
        for n in &f.nodes {
            n.insert("x", b"v1");
        }
        f.nodes[0].set_delay(Duration::from_millis(20));
        f.nodes[1].set_delay(Duration::from_millis(20));

        let resp = f
            .router
            .read(&CallContext::with_timeout(Duration::from_secs(2)), read_req("x"))
            .await
            .unwrap();
        assert_eq!(resp.value.payload, b"v1");
        assert_eq!(f.metrics.calls(Operation::Read, "b", Code::Ok), 1);
        assert_eq!(f.metrics.total_drift(), 0);
    }

    #[tokio::test]
    async fn test_sequential_recovers_once_backends_heal() {
        let f = fixture(&["a", "b"], sequential());
        for n in &f.nodes {
            n.insert("x", b"v1");
            n.fail_with(StoreError::Unavailable("down".into()));
        }

        let err = f
            .router
            .read(&CallContext::background(), read_req("x"))
            .await
            .unwrap_err();
        assert_eq!(err, RouterError::NoBackendsAvailable { attempted: 2 });

        for n in &f.nodes {
            n.heal();
        }
        let resp = f
            .router
            .read(&CallContext::background(), read_req("x"))
            .await
            .unwrap();
        assert_eq!(resp.value.payload, b"v1");
        assert_eq!(f.metrics.calls(Operation::Read, "b", Code::Ok), 1);
        assert_eq!(f.metrics.total_drift(), 0);
    }

    // ──── Read repair / shadow writes ────

    #[tokio::test]
    async fn test_read_repair_queues_primary_value() {
        let f = fixture(
            &["a", "b", "c"],
            DispatchConfig {
                read_repair: true,
                ..Default::default()
            },
        );
        let (queue, mut rx) = WriteQueue::bounded(8, f.metrics.clone());
        let router = f.router.clone().with_write_queue(queue);
        f.nodes[0].insert("x", b"v1");
        f.nodes[1].insert("x", b"v1");
        f.nodes[2].insert("x", b"stale");

        router
            .dispatch(&CallContext::background(), read_req("x"))
            .await
            .settled()
            .await
            .unwrap();

        let element = rx.recv_now().expect("repair queued");
        assert_eq!(element.target, "c");
        assert_eq!(element.key, "x");
        assert_eq!(element.value.payload, b"v1");
        assert!(rx.recv_now().is_none());
    }

    #[tokio::test]
    async fn test_full_repair_queue_does_not_stall_secondaries() {
        let f = fixture(
            &["a", "b", "c"],
            DispatchConfig {
                read_repair: true,
                ..Default::default()
            },
        );
        let (queue, mut rx) = WriteQueue::bounded(1, f.metrics.clone());
        queue
            .try_enqueue(WriteElement {
                key: "filler".into(),
                value: Value::raw(b"f".to_vec()),
                target: "a".into(),
            })
            .unwrap();
        let router = f.router.clone().with_write_queue(queue);
        f.nodes[0].insert("x", b"v1");
        f.nodes[1].insert("x", b"stale-b");
        f.nodes[2].insert("x", b"stale-c");
        f.nodes[2].set_delay(Duration::from_millis(30));

        let dispatch = router
            .dispatch(&CallContext::background(), read_req("x"))
            .await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        // c answered while b's repair was waiting for queue space.
        assert_eq!(f.metrics.calls(Operation::Read, "c", Code::Ok), 1);
        assert_eq!(f.metrics.drift(DriftKind::Read), 2);

        let mut targets = Vec::new();
        for _ in 0..100 {
            match rx.recv_now() {
                Some(element) => targets.push(element.target),
                None if targets.len() == 3 => break,
                None => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
        dispatch.settled().await.unwrap();

        targets.sort();
        assert_eq!(targets, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_read_repair_covers_missing_keys() {
        let f = fixture(&["a", "b"], sequential_with_repair());
        let (queue, mut rx) = WriteQueue::bounded(8, f.metrics.clone());
        let router = f.router.clone().with_write_queue(queue);
        f.nodes[0].insert("x", b"v1");

        router
            .read(&CallContext::background(), read_req("x"))
            .await
            .unwrap();

        let element = rx.recv_now().expect("repair queued");
        assert_eq!(element.target, "b");
        assert_eq!(f.metrics.total_drift(), 0);
    }

    fn sequential_with_repair() -> DispatchConfig {
        DispatchConfig {
            mode: FanoutMode::Sequential,
            read_repair: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_no_repair_when_disabled() {
        let f = fixture(&["a", "b"], DispatchConfig::default());
        let (queue, mut rx) = WriteQueue::bounded(8, f.metrics.clone());
        let router = f.router.clone().with_write_queue(queue);
        f.nodes[0].insert("x", b"v1");
        f.nodes[1].insert("x", b"v2");

        router
            .dispatch(&CallContext::background(), read_req("x"))
            .await
            .settled()
            .await
            .unwrap();

        assert!(rx.recv_now().is_none());
        assert_eq!(f.metrics.drift(DriftKind::Read), 1);
    }

    #[tokio::test]
    async fn test_shadow_write_requires_queue() {
        let f = fixture(&["a"], DispatchConfig::default());
        let element = WriteElement {
            key: "x".into(),
            value: Value::raw(b"v".to_vec()),
            target: "a".into(),
        };
        assert_eq!(
            f.router.shadow_write(element.clone()).await,
            Err(QueueError::NotConfigured)
        );

        let (queue, mut rx) = WriteQueue::bounded(1, f.metrics.clone());
        let router = f.router.clone().with_write_queue(queue);
        router.shadow_write(element.clone()).await.unwrap();
        assert_eq!(rx.recv_now(), Some(element));
    }
}
