//! Conversions between proto types and domain types.

use pstore_common::{
    Code, CountRequest, CountResponse, DeleteRequest, DeleteResponse, GetKeysRequest,
    GetKeysResponse, ReadRequest, ReadResponse, StoreError, Value, WriteRequest, WriteResponse,
};
use pstore_proto::mstore as mpb;
use pstore_router::RouterError;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Fold a backend's gRPC status into the shared taxonomy.
pub fn status_to_store_error(status: &tonic::Status) -> StoreError {
    let message = status.message().to_string();
    match status.code() {
        tonic::Code::NotFound => StoreError::NotFound(message),
        tonic::Code::Unavailable => StoreError::Unavailable(message),
        tonic::Code::DeadlineExceeded => StoreError::DeadlineExceeded(message),
        _ => StoreError::Internal(message),
    }
}

pub fn code_to_tonic(code: Code) -> tonic::Code {
    match code {
        Code::Ok => tonic::Code::Ok,
        Code::NotFound => tonic::Code::NotFound,
        Code::Internal => tonic::Code::Internal,
        Code::Unavailable => tonic::Code::Unavailable,
        Code::DeadlineExceeded => tonic::Code::DeadlineExceeded,
    }
}

/// A primary failure keeps its code and message verbatim.
pub fn router_error_to_status(err: RouterError) -> tonic::Status {
    tonic::Status::new(code_to_tonic(err.code()), err.message())
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

pub fn value_to_any(value: &Value) -> prost_types::Any {
    prost_types::Any {
        type_url: value.type_url.clone(),
        value: value.payload.clone(),
    }
}

/// A missing value decodes as empty.
pub fn value_from_any(any: Option<prost_types::Any>) -> Value {
    any.map(|a| Value::new(a.type_url, a.value))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// pstore / rstore
// ---------------------------------------------------------------------------

/// Both schemas share message shapes and differ only in package, so their
/// conversions are generated from one definition.
macro_rules! native_schema {
    ($module:ident) => {
        pub mod $module {
            use super::{value_from_any, value_to_any};
            use pstore_common::{
                CountRequest, CountResponse, DeleteRequest, DeleteResponse, GetKeysRequest,
                GetKeysResponse, ReadRequest, ReadResponse, WriteRequest, WriteResponse,
            };
            use pstore_proto::$module as pb;

            pub fn read_request_to_proto(req: &ReadRequest) -> pb::ReadRequest {
                pb::ReadRequest {
                    key: req.key.clone(),
                }
            }

            pub fn read_request_from_proto(req: pb::ReadRequest) -> ReadRequest {
                ReadRequest { key: req.key }
            }

            pub fn read_response_to_proto(resp: &ReadResponse) -> pb::ReadResponse {
                pb::ReadResponse {
                    value: Some(value_to_any(&resp.value)),
                    timestamp: resp.timestamp,
                }
            }

            pub fn read_response_from_proto(resp: pb::ReadResponse) -> ReadResponse {
                ReadResponse {
                    timestamp: resp.timestamp,
                    value: value_from_any(resp.value),
                }
            }

            pub fn write_request_to_proto(req: &WriteRequest) -> pb::WriteRequest {
                pb::WriteRequest {
                    key: req.key.clone(),
                    value: Some(value_to_any(&req.value)),
                }
            }

            pub fn write_request_from_proto(req: pb::WriteRequest) -> WriteRequest {
                WriteRequest {
                    key: req.key,
                    value: value_from_any(req.value),
                }
            }

            pub fn write_response_to_proto(resp: &WriteResponse) -> pb::WriteResponse {
                pb::WriteResponse {
                    timestamp: resp.timestamp,
                }
            }

            pub fn write_response_from_proto(resp: pb::WriteResponse) -> WriteResponse {
                WriteResponse {
                    timestamp: resp.timestamp,
                }
            }

            pub fn get_keys_request_to_proto(req: &GetKeysRequest) -> pb::GetKeysRequest {
                pb::GetKeysRequest {
                    prefix: req.prefix.clone(),
                    avoid_suffix: req.avoid_suffix.clone(),
                    all_keys: req.all_keys,
                }
            }

            pub fn get_keys_request_from_proto(req: pb::GetKeysRequest) -> GetKeysRequest {
                GetKeysRequest {
                    prefix: req.prefix,
                    avoid_suffix: req.avoid_suffix,
                    all_keys: req.all_keys,
                }
            }

            pub fn get_keys_response_to_proto(resp: &GetKeysResponse) -> pb::GetKeysResponse {
                pb::GetKeysResponse {
                    keys: resp.keys.clone(),
                }
            }

            pub fn get_keys_response_from_proto(resp: pb::GetKeysResponse) -> GetKeysResponse {
                GetKeysResponse { keys: resp.keys }
            }

            pub fn delete_request_to_proto(req: &DeleteRequest) -> pb::DeleteRequest {
                pb::DeleteRequest {
                    key: req.key.clone(),
                }
            }

            pub fn delete_request_from_proto(req: pb::DeleteRequest) -> DeleteRequest {
                DeleteRequest { key: req.key }
            }

            pub fn delete_response_to_proto(_resp: &DeleteResponse) -> pb::DeleteResponse {
                pb::DeleteResponse {}
            }

            pub fn delete_response_from_proto(_resp: pb::DeleteResponse) -> DeleteResponse {
                DeleteResponse {}
            }

            pub fn count_request_to_proto(req: &CountRequest) -> pb::CountRequest {
                pb::CountRequest {
                    counter: req.counter.clone(),
                }
            }

            pub fn count_request_from_proto(req: pb::CountRequest) -> CountRequest {
                CountRequest {
                    counter: req.counter,
                }
            }

            pub fn count_response_to_proto(resp: &CountResponse) -> pb::CountResponse {
                pb::CountResponse { count: resp.count }
            }

            pub fn count_response_from_proto(resp: pb::CountResponse) -> CountResponse {
                CountResponse { count: resp.count }
            }
        }
    };
}

native_schema!(pstore);
native_schema!(rstore);

// ---------------------------------------------------------------------------
// mstore
// ---------------------------------------------------------------------------

pub mod mstore {
    use super::*;

    pub fn blob_from_value(value: &Value) -> mpb::Blob {
        mpb::Blob {
            type_url: value.type_url.clone(),
            payload: value.payload.clone(),
        }
    }

    pub fn value_from_blob(blob: Option<mpb::Blob>) -> Value {
        blob.map(|b| Value::new(b.type_url, b.payload))
            .unwrap_or_default()
    }

    pub fn get_request(req: &ReadRequest) -> mpb::GetRequest {
        mpb::GetRequest {
            key: req.key.clone(),
        }
    }

    pub fn read_response(resp: mpb::GetResponse) -> ReadResponse {
        ReadResponse {
            timestamp: resp.last_write,
            value: value_from_blob(resp.blob),
        }
    }

    pub fn put_request(req: &WriteRequest) -> mpb::PutRequest {
        mpb::PutRequest {
            key: req.key.clone(),
            blob: Some(blob_from_value(&req.value)),
        }
    }

    pub fn write_response(resp: mpb::PutResponse) -> WriteResponse {
        WriteResponse {
            timestamp: resp.last_write,
        }
    }

    pub fn list_keys_request(req: &GetKeysRequest) -> mpb::ListKeysRequest {
        mpb::ListKeysRequest {
            prefix: req.prefix.clone(),
            exclude_suffixes: req.avoid_suffix.clone(),
            everything: req.all_keys,
        }
    }

    pub fn get_keys_response(resp: mpb::ListKeysResponse) -> GetKeysResponse {
        GetKeysResponse { keys: resp.keys }
    }

    pub fn remove_request(req: &DeleteRequest) -> mpb::RemoveRequest {
        mpb::RemoveRequest {
            key: req.key.clone(),
        }
    }

    pub fn delete_response(_resp: mpb::RemoveResponse) -> DeleteResponse {
        DeleteResponse {}
    }

    pub fn tally_request(req: &CountRequest) -> mpb::TallyRequest {
        mpb::TallyRequest {
            counter_id: req.counter.clone(),
        }
    }

    pub fn count_response(resp: mpb::TallyResponse) -> CountResponse {
        CountResponse { count: resp.value }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
