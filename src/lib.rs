//! gRPC remote execution gateway.
//!
//! Callers authenticate with a password, an SSH key signature or their network
//! address, then run commands and move files as their own account on the host.

pub mod gateway;

pub use gateway::{GatewayConfig, GatewayError, GatewayServer};
