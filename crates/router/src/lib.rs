//! Replication-consistency routing in front of heterogeneous KV backends.
//!
//! Provides: the [`Backend`](backend::Backend) capability surface, a
//! pluggable primary [`SplitPolicy`](split::SplitPolicy), the fanout
//! [`Router`](dispatcher::Router) with its consistency checks, and the
//! shadow write queue.

pub mod backend;
pub mod chaos;
pub mod consistency;
pub mod context;
pub mod dispatcher;
pub mod operation;
pub mod split;
pub mod write_queue;

#[cfg(test)]
mod mock;

pub use backend::{Backend, Backends};
pub use context::CallContext;
pub use dispatcher::{Dispatch, DispatchConfig, FanoutMode, Router, RouterError};
pub use write_queue::{WriteElement, WriteQueue};
