pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod invocation;
pub mod logging;
pub mod modules;
pub mod planner;
pub mod target;
pub mod workspace;

pub use error::{Error, Result};
