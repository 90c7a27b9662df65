//! Configuration resolution for the gateway.
//!
//! Every setting is resolved with a three-tier priority:
//!
//! 1. **Parameter** - Explicitly provided value (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! Unparsable environment values are ignored with a warning.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GATEWAY_LISTEN` | `0.0.0.0:50051` | Listen address of the gRPC server |
//! | `GATEWAY_WHITELIST` | empty | Comma-separated peer addresses (`ip:port` or `ip`) |
//! | `GATEWAY_AUTHORIZED_KEYS` | unset | Authorized-keys file used for every user |
//! | `GATEWAY_FINGERPRINT_KIND` | `sha256` | Fingerprint encoding of the key cache (`sha256` or `md5`) |
//! | `GATEWAY_RELOAD_DEBOUNCE_MS` | 1000ms | Quiet period before a changed key file is reloaded |

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::gateway::keycache::{FingerprintKind, KeyCacheConfig};

/// Default listen address
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:50051";

/// Default key file reload debounce in milliseconds
pub const DEFAULT_RELOAD_DEBOUNCE_MS: u64 = 1000;

pub const LISTEN_ENV_VAR: &str = "GATEWAY_LISTEN";
pub const WHITELIST_ENV_VAR: &str = "GATEWAY_WHITELIST";
pub const AUTHORIZED_KEYS_ENV_VAR: &str = "GATEWAY_AUTHORIZED_KEYS";
pub const FINGERPRINT_KIND_ENV_VAR: &str = "GATEWAY_FINGERPRINT_KIND";
pub const RELOAD_DEBOUNCE_MS_ENV_VAR: &str = "GATEWAY_RELOAD_DEBOUNCE_MS";

/// Settings of one gateway instance.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub listen: SocketAddr,
    pub whitelist: Vec<String>,
    /// When set, this file is consulted for every user instead of
    /// `~/.ssh/authorized_keys`.
    pub authorized_keys: Option<PathBuf>,
    pub fingerprint_kind: FingerprintKind,
    pub reload_debounce: Duration,
}

impl GatewayConfig {
    /// Configuration from the environment and built-in defaults.
    pub fn from_env() -> Self {
        Self {
            listen: resolve_listen_addr(None),
            whitelist: resolve_whitelist(None),
            authorized_keys: resolve_authorized_keys(None),
            fingerprint_kind: resolve_fingerprint_kind(None),
            reload_debounce: Duration::from_millis(resolve_reload_debounce_ms(None)),
        }
    }

    pub fn key_cache(&self) -> KeyCacheConfig {
        KeyCacheConfig {
            fixed_path: self.authorized_keys.clone(),
            fingerprint_kind: self.fingerprint_kind,
            debounce: self.reload_debounce,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 50051))
}

/// Resolve the listen address with priority: parameter -> env var -> default
pub fn resolve_listen_addr(listen_param: Option<SocketAddr>) -> SocketAddr {
    if let Some(listen) = listen_param {
        return listen;
    }

    if let Ok(env_listen) = env::var(LISTEN_ENV_VAR) {
        match env_listen.parse::<SocketAddr>() {
            Ok(listen) => return listen,
            Err(e) => warn!("Ignoring {}={:?}: {}", LISTEN_ENV_VAR, env_listen, e),
        }
    }

    default_listen_addr()
}

/// Resolve the peer whitelist with priority: parameter -> env var -> default (empty)
pub fn resolve_whitelist(whitelist_param: Option<Vec<String>>) -> Vec<String> {
    if let Some(whitelist) = whitelist_param {
        return whitelist;
    }

    match env::var(WHITELIST_ENV_VAR) {
        Ok(env_whitelist) => parse_list(&env_whitelist),
        Err(_) => Vec::new(),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolve the fixed authorized-keys file with priority: parameter -> env var -> none
pub fn resolve_authorized_keys(path_param: Option<PathBuf>) -> Option<PathBuf> {
    if path_param.is_some() {
        return path_param;
    }

    env::var_os(AUTHORIZED_KEYS_ENV_VAR)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Resolve the fingerprint kind with priority: parameter -> env var -> default (sha256)
pub fn resolve_fingerprint_kind(kind_param: Option<FingerprintKind>) -> FingerprintKind {
    if let Some(kind) = kind_param {
        return kind;
    }

    if let Ok(env_kind) = env::var(FINGERPRINT_KIND_ENV_VAR) {
        match env_kind.parse::<FingerprintKind>() {
            Ok(kind) => return kind,
            Err(e) => warn!("Ignoring {}: {}", FINGERPRINT_KIND_ENV_VAR, e),
        }
    }

    FingerprintKind::default()
}

/// Resolve the reload debounce with priority: parameter -> env var -> default
pub fn resolve_reload_debounce_ms(debounce_param: Option<u64>) -> u64 {
    if let Some(debounce) = debounce_param {
        return debounce;
    }

    if let Ok(env_debounce) = env::var(RELOAD_DEBOUNCE_MS_ENV_VAR)
        && let Ok(debounce) = env_debounce.parse::<u64>()
    {
        return debounce;
    }

    DEFAULT_RELOAD_DEBOUNCE_MS
}
