//! Install Driver: D-Bus client for the RAUC update executor.

mod driver;
mod error;
mod proxy;

pub use driver::{run, ProgressMessage};
pub use error::InstallError;
