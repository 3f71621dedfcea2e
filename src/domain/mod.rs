//! Pure value types shared by the engine: options, worker messages and manifests.

pub mod manifest;
pub mod options;
pub mod view;

pub use manifest::{Manifest, merge};
pub use options::EngineOptions;
pub use view::{RequestId, ViewRequest, ViewResponse};
