//! Remote execution gateway providing authenticated command execution and
//! file transfer under the caller's operating-system identity.
//!
//! This module is organized into the following submodules:
//!
//! - `proto`: Wire messages and generated service stubs
//! - `config`: Configuration resolution with environment variable support
//! - `error`: Error types and their gRPC status mapping
//! - `identity`: Account resolution and child environments
//! - `keycache`: Authorized keys indexed by fingerprint, kept in sync with disk
//! - `auth`: Credential extraction, strategies and the authentication layer
//! - `exec`: Command tokenizing and privilege-dropping execution
//! - `transfer`: Whole-file and streaming file transfer
//! - `service`: The gRPC service implementation
//! - `server`: Server assembly and lifecycle

pub mod auth;
pub mod config;
pub mod error;
pub mod exec;
pub mod identity;
pub mod keycache;
pub mod proto;
pub mod server;
pub mod service;
pub mod transfer;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use server::GatewayServer;
