// Module naming follows project convention (PascalCase subsystem groups)
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod Messaging;
#[allow(non_snake_case)]
pub mod Store;
#[allow(non_snake_case)]
pub mod Isolate;
#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}

pub mod error;

pub use error::{HostError, Result};
