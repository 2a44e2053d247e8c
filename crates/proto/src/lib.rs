//! Generated gRPC code for the pstore protobuf definitions.

/// Router-facing schema (Read, Write, GetKeys, Delete, Count).
pub mod pstore {
    tonic::include_proto!("pstore.v1");
}

/// rstore backend schema.
pub mod rstore {
    tonic::include_proto!("rstore.v1");
}

/// mstore backend schema (Get, Put, ListKeys, Remove, Tally).
pub mod mstore {
    tonic::include_proto!("mstore.v1");
}
