//! gRPC networking layer for the pstore router.
//!
//! Provides:
//! - `PstoreBackend`, `RstoreBackend`, `MstoreBackend`: implement `Backend`
//!   over tonic, one per backend schema
//! - `connect_backend`: builds the right adapter from a `BackendConfig`
//! - `RouterService`: bridges the caller-facing proto to the `Router`
//! - `build_server`: assembles the service into a tonic `Router`

#![allow(clippy::result_large_err)]

pub mod backends;
pub mod convert;
pub mod server;

pub use backends::{connect_backend, MstoreBackend, NetError, PstoreBackend, RstoreBackend};
pub use server::RouterService;

use pstore_proto::pstore::store_service_server::StoreServiceServer;

/// Build a tonic `Router` serving the caller-facing store service.
/// `max_message_bytes` bounds both directions.
pub fn build_server(
    router: pstore_router::Router,
    max_message_bytes: usize,
) -> tonic::transport::server::Router {
    let svc = StoreServiceServer::new(RouterService::new(router))
        .max_decoding_message_size(max_message_bytes)
        .max_encoding_message_size(max_message_bytes);

    tonic::transport::Server::builder().add_service(svc)
}
