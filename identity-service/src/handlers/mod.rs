//! HTTP handlers for the identity engine.

pub mod authorize;
pub mod federated;
pub mod local;
pub mod metrics;
pub mod token;

pub use authorize::*;
pub use federated::*;
pub use local::*;
pub use token::*;
