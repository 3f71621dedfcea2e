//! Request/response correlation with the render worker.
//!
//! A single worker channel pair carries every render request. Each request
//! gets a recyclable correlation ID; responses may arrive in any order and
//! are routed back to the caller holding that ID.

mod id_pool;
mod multiplexer;
mod worker;

pub use id_pool::IdPool;
pub use multiplexer::{RequestMultiplexer, ResponseMailbox};
pub use worker::{WorkerHandle, WorkerSession};
