//! Poll loop, action coordinator and service lifecycle glue.

pub mod coordinator;
pub mod error;
pub mod poll;
pub mod service;

pub use coordinator::Coordinator;
pub use error::RuntimeError;
