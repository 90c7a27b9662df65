//! Authentication of gateway calls.
//!
//! Each call carries a credential in its metadata and is judged by exactly
//! one strategy, chosen from the fields that are present:
//!
//! - [`PasswordAuth`]: `password`, checked through PAM
//! - [`PublicKeyAuth`]: `pub-key-fingerprint`, `pub-key-algorithm` and
//!   `signed-data`, checked against the caller's authorized keys
//! - [`WhitelistAuth`]: neither, the peer address decides
//!
//! [`AuthDispatcher`] makes the decision and [`AuthLayer`] installs it in
//! front of the gRPC service.
//!
//! # Example
//!
//! ```ignore
//! let dispatcher = AuthDispatcher::new(
//!     privileges,
//!     Arc::new(PasswordAuth::system()),
//!     Arc::new(PublicKeyAuth::new(key_cache)),
//!     Arc::new(WhitelistAuth::new(["10.0.0.5"])),
//! );
//! Server::builder().layer(AuthLayer::new(dispatcher));
//! ```

mod credential;
mod dispatcher;
mod key;
mod layer;
mod pam;
mod password;
mod traits;
mod whitelist;

pub use credential::{
    ALGORITHM_KEY, Credential, FINGERPRINT_KEY, KeyProof, PASSWORD_KEY, SIGNED_DATA_KEY,
    StrategyKind, USER_KEY,
};
pub use dispatcher::{AuthDispatcher, AuthenticatedUser};
pub use key::{PublicKeyAuth, verify_signature};
pub use layer::{AuthLayer, AuthService};
pub use pam::PamVerifier;
pub use password::{PasswordAuth, PasswordVerifier, UnavailableVerifier};
pub use traits::{AuthRequest, AuthStrategy};
pub use whitelist::WhitelistAuth;

