//! Query execution module

mod config;
mod context;

pub use config::*;
pub use context::*;
