//! gRPC backend adapters implementing `Backend`.
//!
//! One adapter per backend schema. Each holds a tonic client over a lazily
//! connected channel and translates between the domain types and its
//! native messages; failures are folded into `StoreError`.

use crate::convert;
use pstore_common::{
    CountRequest, CountResponse, DeleteRequest, DeleteResponse, GetKeysRequest, GetKeysResponse,
    ReadRequest, ReadResponse, StoreError, WriteRequest, WriteResponse,
};
use pstore_config::{BackendConfig, BackendKind};
use pstore_proto::mstore::store_service_client::StoreServiceClient as MstoreClient;
use pstore_router::Backend;
use std::sync::Arc;
use tonic::transport::{Channel, Endpoint};

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("invalid endpoint '{address}' for backend '{name}': {reason}")]
    InvalidEndpoint {
        name: String,
        address: String,
        reason: String,
    },
}

fn status(e: tonic::Status) -> StoreError {
    convert::status_to_store_error(&e)
}

// ---------------------------------------------------------------------------
// pstore / rstore
// ---------------------------------------------------------------------------

macro_rules! native_backend {
    ($(#[$doc:meta])* $backend:ident, $module:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $backend {
            name: String,
            client: pstore_proto::$module::store_service_client::StoreServiceClient<Channel>,
        }

        impl $backend {
            pub fn new(name: impl Into<String>, channel: Channel, max_message_bytes: usize) -> Self {
                let client =
                    pstore_proto::$module::store_service_client::StoreServiceClient::new(channel)
                        .max_decoding_message_size(max_message_bytes)
                        .max_encoding_message_size(max_message_bytes);
                Self {
                    name: name.into(),
                    client,
                }
            }
        }

        #[async_trait::async_trait]
        impl Backend for $backend {
            fn name(&self) -> &str {
                &self.name
            }

            async fn read(&self, req: &ReadRequest) -> Result<ReadResponse, StoreError> {
                let resp = self
                    .client
                    .clone()
                    .read(convert::$module::read_request_to_proto(req))
                    .await
                    .map_err(status)?;
                Ok(convert::$module::read_response_from_proto(resp.into_inner()))
            }

            async fn write(&self, req: &WriteRequest) -> Result<WriteResponse, StoreError> {
                let resp = self
                    .client
                    .clone()
                    .write(convert::$module::write_request_to_proto(req))
                    .await
                    .map_err(status)?;
                Ok(convert::$module::write_response_from_proto(resp.into_inner()))
            }

            async fn get_keys(
                &self,
                req: &GetKeysRequest,
            ) -> Result<GetKeysResponse, StoreError> {
                let resp = self
                    .client
                    .clone()
                    .get_keys(convert::$module::get_keys_request_to_proto(req))
                    .await
                    .map_err(status)?;
                Ok(convert::$module::get_keys_response_from_proto(resp.into_inner()))
            }

            async fn delete(&self, req: &DeleteRequest) -> Result<DeleteResponse, StoreError> {
                let resp = self
                    .client
                    .clone()
                    .delete(convert::$module::delete_request_to_proto(req))
                    .await
                    .map_err(status)?;
                Ok(convert::$module::delete_response_from_proto(resp.into_inner()))
            }

            async fn count(&self, req: &CountRequest) -> Result<CountResponse, StoreError> {
                let resp = self
                    .client
                    .clone()
                    .count(convert::$module::count_request_to_proto(req))
                    .await
                    .map_err(status)?;
                Ok(convert::$module::count_response_from_proto(resp.into_inner()))
            }
        }
    };
}

native_backend!(
    /// Backend speaking the router's own schema.
    PstoreBackend,
    pstore
);

native_backend!(
    /// Backend speaking the rstore schema.
    RstoreBackend,
    rstore
);

// ---------------------------------------------------------------------------
// mstore
// ---------------------------------------------------------------------------

/// Backend speaking the mstore schema (Get/Put/ListKeys/Remove/Tally).
#[derive(Debug, Clone)]
pub struct MstoreBackend {
    name: String,
    client: MstoreClient<Channel>,
}

impl MstoreBackend {
    pub fn new(name: impl Into<String>, channel: Channel, max_message_bytes: usize) -> Self {
        let client = MstoreClient::new(channel)
            .max_decoding_message_size(max_message_bytes)
            .max_encoding_message_size(max_message_bytes);
        Self {
            name: name.into(),
            client,
        }
    }
}

#[async_trait::async_trait]
impl Backend for MstoreBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, req: &ReadRequest) -> Result<ReadResponse, StoreError> {
        let resp = self
            .client
            .clone()
            .get(convert::mstore::get_request(req))
            .await
            .map_err(status)?;
        Ok(convert::mstore::read_response(resp.into_inner()))
    }

    async fn write(&self, req: &WriteRequest) -> Result<WriteResponse, StoreError> {
        let resp = self
            .client
            .clone()
            .put(convert::mstore::put_request(req))
            .await
            .map_err(status)?;
        Ok(convert::mstore::write_response(resp.into_inner()))
    }

    async fn get_keys(&self, req: &GetKeysRequest) -> Result<GetKeysResponse, StoreError> {
        let resp = self
            .client
            .clone()
            .list_keys(convert::mstore::list_keys_request(req))
            .await
            .map_err(status)?;
        Ok(convert::mstore::get_keys_response(resp.into_inner()))
    }

    async fn delete(&self, req: &DeleteRequest) -> Result<DeleteResponse, StoreError> {
        let resp = self
            .client
            .clone()
            .remove(convert::mstore::remove_request(req))
            .await
            .map_err(status)?;
        Ok(convert::mstore::delete_response(resp.into_inner()))
    }

    async fn count(&self, req: &CountRequest) -> Result<CountResponse, StoreError> {
        let resp = self
            .client
            .clone()
            .tally(convert::mstore::tally_request(req))
            .await
            .map_err(status)?;
        Ok(convert::mstore::count_response(resp.into_inner()))
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the adapter for one configured backend.
///
/// The channel connects lazily, so an unreachable backend does not block
/// startup; its calls fail with Unavailable until it comes up.
pub fn connect_backend(
    config: &BackendConfig,
    max_message_bytes: usize,
) -> Result<Arc<dyn Backend>, NetError> {
    let channel = Endpoint::from_shared(config.address.clone())
        .map_err(|e| NetError::InvalidEndpoint {
            name: config.name.clone(),
            address: config.address.clone(),
            reason: e.to_string(),
        })?
        .connect_lazy();

    let backend: Arc<dyn Backend> = match config.kind {
        BackendKind::Pstore => Arc::new(PstoreBackend::new(
            &config.name,
            channel,
            max_message_bytes,
        )),
        BackendKind::Rstore => Arc::new(RstoreBackend::new(
            &config.name,
            channel,
            max_message_bytes,
        )),
        BackendKind::Mstore => Arc::new(MstoreBackend::new(
            &config.name,
            channel,
            max_message_bytes,
        )),
    };
    tracing::info!(
        "backend '{}' ({:?}) at {}",
        config.name,
        config.kind,
        config.address
    );
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_is_lazy() {
        let config = BackendConfig {
            name: "mstore".into(),
            kind: BackendKind::Mstore,
            // Nothing listens here; construction must still succeed.
            address: "http://127.0.0.1:1".into(),
        };
        let backend = connect_backend(&config, 1024).unwrap();
        assert_eq!(backend.name(), "mstore");

        let err = backend
            .read(&ReadRequest { key: "k".into() })
            .await
            .unwrap_err();
        assert!(err.is_backend_failure());
    }

    #[tokio::test]
    async fn test_invalid_endpoint() {
        let config = BackendConfig {
            name: "bad".into(),
            kind: BackendKind::Pstore,
            address: "not a uri".into(),
        };
        match connect_backend(&config, 1024) {
            Err(NetError::InvalidEndpoint { name, .. }) => assert_eq!(name, "bad"),
            Ok(_) => panic!("expected invalid endpoint"),
        }
    }
}
