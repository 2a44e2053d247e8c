//! Per-operation behaviour plugged into the generic dispatcher.
//!
//! Each request type knows how to invoke itself on a backend and how to
//! judge a secondary's answer against the primary's. The dispatcher is
//! otherwise identical for all five operations.

use crate::backend::Backend;
use crate::consistency::{self, Verdict};
use pstore_common::{
    Code, CountRequest, CountResponse, DeleteRequest, DeleteResponse, GetKeysRequest,
    GetKeysResponse, Operation, ReadRequest, ReadResponse, StoreError, Value, WriteRequest,
    WriteResponse,
};

#[async_trait::async_trait]
pub trait RoutedRequest: Clone + Send + Sync + 'static {
    type Response: Clone + Send + Sync + 'static;

    const OP: Operation;

    /// Verification calls the primary again alongside the secondaries.
    const REVISIT_PRIMARY: bool = false;

    /// Fan out even when the primary failed and short-circuit is on.
    const ALWAYS_FAN_OUT: bool = false;

    /// At most one drift increment per call, however many backends disagree.
    const DRIFT_ONCE_PER_CALL: bool = false;

    async fn invoke(&self, backend: &dyn Backend) -> Result<Self::Response, StoreError>;

    /// Key, prefix or counter name, for log lines.
    fn subject(&self) -> &str;

    fn verify(
        &self,
        primary: &Result<Self::Response, StoreError>,
        secondary: &Result<Self::Response, StoreError>,
    ) -> Verdict;

    /// Value to push to a disagreeing secondary through the write queue.
    fn repair(&self, _primary: &Self::Response) -> Option<(String, Value)> {
        None
    }
}

#[async_trait::async_trait]
impl RoutedRequest for ReadRequest {
    type Response = ReadResponse;
    const OP: Operation = Operation::Read;

    async fn invoke(&self, backend: &dyn Backend) -> Result<ReadResponse, StoreError> {
        backend.read(self).await
    }

    fn subject(&self) -> &str {
        &self.key
    }

    fn verify(
        &self,
        primary: &Result<ReadResponse, StoreError>,
        secondary: &Result<ReadResponse, StoreError>,
    ) -> Verdict {
        match (primary, secondary) {
            (Ok(p), Ok(s)) => consistency::compare_read(p, s).into(),
            (Ok(_), Err(e)) if !e.is_backend_failure() => Verdict::Missing,
            _ => Verdict::Skipped,
        }
    }

    fn repair(&self, primary: &ReadResponse) -> Option<(String, Value)> {
        Some((self.key.clone(), primary.value.clone()))
    }
}

#[async_trait::async_trait]
impl RoutedRequest for WriteRequest {
    type Response = WriteResponse;
    const OP: Operation = Operation::Write;

    async fn invoke(&self, backend: &dyn Backend) -> Result<WriteResponse, StoreError> {
        backend.write(self).await
    }

    fn subject(&self) -> &str {
        &self.key
    }

    // Write success is its own signal; timestamps are per-backend.
    fn verify(
        &self,
        _primary: &Result<WriteResponse, StoreError>,
        _secondary: &Result<WriteResponse, StoreError>,
    ) -> Verdict {
        Verdict::Skipped
    }
}

#[async_trait::async_trait]
impl RoutedRequest for GetKeysRequest {
    type Response = GetKeysResponse;
    const OP: Operation = Operation::GetKeys;

    async fn invoke(&self, backend: &dyn Backend) -> Result<GetKeysResponse, StoreError> {
        backend.get_keys(self).await
    }

    fn subject(&self) -> &str {
        if self.all_keys {
            "*"
        } else {
            &self.prefix
        }
    }

    fn verify(
        &self,
        primary: &Result<GetKeysResponse, StoreError>,
        secondary: &Result<GetKeysResponse, StoreError>,
    ) -> Verdict {
        match (primary, secondary) {
            (Ok(p), Ok(s)) => consistency::compare_keys(p, s).into(),
            _ => Verdict::Skipped,
        }
    }
}

#[async_trait::async_trait]
impl RoutedRequest for DeleteRequest {
    type Response = DeleteResponse;
    const OP: Operation = Operation::Delete;

    async fn invoke(&self, backend: &dyn Backend) -> Result<DeleteResponse, StoreError> {
        backend.delete(self).await
    }

    fn subject(&self) -> &str {
        &self.key
    }

    /// Both sides must have answered (OK or NotFound) for the codes to mean
    /// anything.
    fn verify(
        &self,
        primary: &Result<DeleteResponse, StoreError>,
        secondary: &Result<DeleteResponse, StoreError>,
    ) -> Verdict {
        let answered =
            |r: &Result<DeleteResponse, StoreError>| !matches!(r, Err(e) if e.is_backend_failure());
        if !answered(primary) || !answered(secondary) {
            return Verdict::Skipped;
        }
        consistency::compare_delete(Code::of(primary), Code::of(secondary)).into()
    }
}

#[async_trait::async_trait]
impl RoutedRequest for CountRequest {
    type Response = CountResponse;
    const OP: Operation = Operation::Count;
    const REVISIT_PRIMARY: bool = true;
    const ALWAYS_FAN_OUT: bool = true;
    const DRIFT_ONCE_PER_CALL: bool = true;

    async fn invoke(&self, backend: &dyn Backend) -> Result<CountResponse, StoreError> {
        backend.count(self).await
    }

    fn subject(&self) -> &str {
        &self.counter
    }

    fn verify(
        &self,
        primary: &Result<CountResponse, StoreError>,
        secondary: &Result<CountResponse, StoreError>,
    ) -> Verdict {
        match (primary, secondary) {
            (Ok(p), Ok(s)) => consistency::compare_count(p, s).into(),
            _ => Verdict::Skipped,
        }
    }
}
