//! Compile a directory of view modules into one artifact and render views by
//! name through a long-lived worker.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;

pub use application::{
    engine::{Collaborators, EngineStatus, ViewEngine},
    error::EngineError,
    host::{RenderCallback, ViewHost, configure},
};
pub use domain::options::EngineOptions;
