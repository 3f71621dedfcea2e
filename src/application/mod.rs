//! Application services: compilation, rendering and host integration.

pub mod collaborators;
pub mod compile;
pub mod engine;
pub mod error;
pub mod host;
pub(crate) mod lock;
pub mod render;
