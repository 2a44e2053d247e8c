//! Caller-facing gRPC service.
//!
//! Bridges the pstore `StoreService` to the [`Router`]. Every RPC is a
//! thin translation: decode, route, encode. Router errors become statuses
//! carrying the primary's code and message.

use crate::convert::{self, pstore as pconv};
use pstore_proto::pstore as pb;
use pstore_router::{CallContext, Router};
use tokio::time::Duration;

pub struct RouterService {
    router: Router,
}

impl RouterService {
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

impl std::fmt::Debug for RouterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterService").finish_non_exhaustive()
    }
}

/// Parse a `grpc-timeout` header value: at most 8 digits followed by one
/// unit of H, M, S, m, u or n.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || !value.is_ascii() {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount * 3600),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}

/// Derive the call context from the caller's deadline, if it sent one.
fn call_context<T>(request: &tonic::Request<T>) -> CallContext {
    request
        .metadata()
        .get("grpc-timeout")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_grpc_timeout)
        .map(CallContext::with_timeout)
        .unwrap_or_else(CallContext::background)
}

#[tonic::async_trait]
impl pb::store_service_server::StoreService for RouterService {
    async fn read(
        &self,
        request: tonic::Request<pb::ReadRequest>,
    ) -> Result<tonic::Response<pb::ReadResponse>, tonic::Status> {
        let ctx = call_context(&request);
        let req = pconv::read_request_from_proto(request.into_inner());
        let resp = self
            .router
            .read(&ctx, req)
            .await
            .map_err(convert::router_error_to_status)?;
        Ok(tonic::Response::new(pconv::read_response_to_proto(&resp)))
    }

    async fn write(
        &self,
        request: tonic::Request<pb::WriteRequest>,
    ) -> Result<tonic::Response<pb::WriteResponse>, tonic::Status> {
        let ctx = call_context(&request);
        let req = pconv::write_request_from_proto(request.into_inner());
        let resp = self
            .router
            .write(&ctx, req)
            .await
            .map_err(convert::router_error_to_status)?;
        Ok(tonic::Response::new(pconv::write_response_to_proto(&resp)))
    }

    async fn get_keys(
        &self,
        request: tonic::Request<pb::GetKeysRequest>,
    ) -> Result<tonic::Response<pb::GetKeysResponse>, tonic::Status> {
        let ctx = call_context(&request);
        let req = pconv::get_keys_request_from_proto(request.into_inner());
        let resp = self
            .router
            .get_keys(&ctx, req)
            .await
            .map_err(convert::router_error_to_status)?;
        Ok(tonic::Response::new(pconv::get_keys_response_to_proto(&resp)))
    }

    async fn delete(
        &self,
        request: tonic::Request<pb::DeleteRequest>,
    ) -> Result<tonic::Response<pb::DeleteResponse>, tonic::Status> {
        let ctx = call_context(&request);
        let req = pconv::delete_request_from_proto(request.into_inner());
        let resp = self
            .router
            .delete(&ctx, req)
            .await
            .map_err(convert::router_error_to_status)?;
        Ok(tonic::Response::new(pconv::delete_response_to_proto(&resp)))
    }

    async fn count(
        &self,
        request: tonic::Request<pb::CountRequest>,
    ) -> Result<tonic::Response<pb::CountResponse>, tonic::Status> {
        let ctx = call_context(&request);
        let req = pconv::count_request_from_proto(request.into_inner());
        let resp = self
            .router
            .count(&ctx, req)
            .await
            .map_err(convert::router_error_to_status)?;
        Ok(tonic::Response::new(pconv::count_response_to_proto(&resp)))
    }
}
