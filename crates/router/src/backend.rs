//! Abstraction over one physical key-value backend.
//!
//! Concrete gRPC adapters live in `pstore-net`; tests use in-memory mocks.

use pstore_common::{
    CountRequest, CountResponse, DeleteRequest, DeleteResponse, GetKeysRequest, GetKeysResponse,
    ReadRequest, ReadResponse, StoreError, WriteRequest, WriteResponse,
};
use std::sync::Arc;

/// Uniform capability surface over a backend's native schema.
///
/// Implementations hold a connection handle and nothing else; any
/// per-call deadline is enforced by the caller dropping the future.
#[async_trait::async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Stable identifier used for metric labels and write-queue routing.
    fn name(&self) -> &str;

    async fn read(&self, req: &ReadRequest) -> Result<ReadResponse, StoreError>;

    async fn write(&self, req: &WriteRequest) -> Result<WriteResponse, StoreError>;

    async fn get_keys(&self, req: &GetKeysRequest) -> Result<GetKeysResponse, StoreError>;

    async fn delete(&self, req: &DeleteRequest) -> Result<DeleteResponse, StoreError>;

    async fn count(&self, req: &CountRequest) -> Result<CountResponse, StoreError>;
}

#[async_trait::async_trait]
impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn read(&self, req: &ReadRequest) -> Result<ReadResponse, StoreError> {
        (**self).read(req).await
    }

    async fn write(&self, req: &WriteRequest) -> Result<WriteResponse, StoreError> {
        (**self).write(req).await
    }

    async fn get_keys(&self, req: &GetKeysRequest) -> Result<GetKeysResponse, StoreError> {
        (**self).get_keys(req).await
    }

    async fn delete(&self, req: &DeleteRequest) -> Result<DeleteResponse, StoreError> {
        (**self).delete(req).await
    }

    async fn count(&self, req: &CountRequest) -> Result<CountResponse, StoreError> {
        (**self).count(req).await
    }
}

/// The ordered, immutable set of backends a router fans out to.
///
/// Cheap to clone; the sequence is fixed at construction.
#[derive(Clone)]
pub struct Backends {
    inner: Arc<[Arc<dyn Backend>]>,
}

impl Backends {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self {
            inner: backends.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn Backend>> {
        self.inner.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Backend>> {
        self.inner.iter()
    }

    /// First backend whose name equals `name`.
    pub fn find(&self, name: &str) -> Option<&Arc<dyn Backend>> {
        self.inner.iter().find(|b| b.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.inner.iter().map(|b| b.name()).collect()
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
