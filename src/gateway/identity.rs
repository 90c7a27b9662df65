//! Operating-system identity resolution.
//!
//! A [`PrivilegeContext`] turns the authenticated user name into a
//! [`ResolvedIdentity`] (uid, gid, home directory) every time a request needs
//! one. Nothing is cached: account changes on the host take effect on the next
//! request.
//!
//! The account database sits behind the [`UserDatabase`] trait so that the
//! dispatcher and the handlers can be exercised without real accounts.
//! [`SystemUsers`] is the production implementation backed by `getpwnam_r`.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::gateway::error::GatewayError;

/// Variables replaced in a child environment by the target identity.
const IDENTITY_VARS: [&str; 3] = ["HOME", "USER", "LOGNAME"];

/// A user account resolved to numeric ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

impl ResolvedIdentity {
    /// Environment of a process started on behalf of this identity.
    pub fn environment(&self) -> UserEnv {
        UserEnv::inherit(self)
    }

    /// Expand a leading `~/` to this identity's home directory.
    ///
    /// Only the `~/` form is recognised; `~other/` and a bare `~` are left
    /// untouched. The joined path is cleaned lexically, so `..` components
    /// may climb out of the home directory but never above `/`.
    pub fn expand_path(&self, raw: &str) -> PathBuf {
        match raw.strip_prefix("~/") {
            Some(rest) => {
                let mut joined = self.home.clone().into_os_string();
                joined.push("/");
                joined.push(rest);
                clean(Path::new(&joined))
            }
            None => PathBuf::from(raw),
        }
    }
}

/// Lexically normalise a path: drop `.` components, fold `name/..` pairs
/// and discard `..` directly under the root.
fn clean(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Environment seen by commands run for a [`ResolvedIdentity`].
///
/// `HOME`, `USER` and `LOGNAME` come from the identity; every other variable
/// falls through to the gateway's own environment.
#[derive(Debug, Clone)]
pub struct UserEnv {
    overrides: HashMap<&'static str, String>,
}

impl UserEnv {
    fn inherit(identity: &ResolvedIdentity) -> Self {
        let home = identity.home.to_string_lossy().into_owned();
        let overrides = HashMap::from([
            ("HOME", home),
            ("USER", identity.username.clone()),
            ("LOGNAME", identity.username.clone()),
        ]);
        Self { overrides }
    }

    /// Look up a variable the way the child process will see it.
    pub fn lookup(&self, name: &str) -> Option<String> {
        match self.overrides.get(name) {
            Some(value) => Some(value.clone()),
            None => std::env::var(name).ok(),
        }
    }

    /// The complete child environment: the inherited variables minus the
    /// identity ones, followed by the identity values.
    pub fn child_vars(&self) -> Vec<(OsString, OsString)> {
        let mut vars: Vec<(OsString, OsString)> = std::env::vars_os()
            .filter(|(key, _)| !IDENTITY_VARS.iter().any(|name| key == name))
            .collect();
        for name in IDENTITY_VARS {
            if let Some(value) = self.overrides.get(name) {
                vars.push((OsString::from(name), OsString::from(value)));
            }
        }
        vars
    }
}

/// Source of user accounts.
#[async_trait]
pub trait UserDatabase: Send + Sync {
    /// Look up an account by name.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(identity))` - the account exists
    /// * `Ok(None)` - no such account
    /// * `Err(GatewayError::UserLookup)` - the database itself failed
    async fn lookup(&self, username: &str) -> Result<Option<ResolvedIdentity>, GatewayError>;
}

/// Account database of the host, queried through NSS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemUsers;

#[async_trait]
impl UserDatabase for SystemUsers {
    async fn lookup(&self, username: &str) -> Result<Option<ResolvedIdentity>, GatewayError> {
        let name = username.to_string();
        // NSS may consult the network (LDAP, sssd), keep it off the runtime threads.
        let user = tokio::task::spawn_blocking(move || nix::unistd::User::from_name(&name))
            .await
            .map_err(|e| GatewayError::UserLookup(e.to_string()))?
            .map_err(|e| GatewayError::UserLookup(e.to_string()))?;

        Ok(user.map(|user| ResolvedIdentity {
            username: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            home: user.dir,
        }))
    }
}

/// Resolves authenticated user names for the request handlers.
#[derive(Clone)]
pub struct PrivilegeContext {
    users: Arc<dyn UserDatabase>,
}

impl PrivilegeContext {
    pub fn new(users: Arc<dyn UserDatabase>) -> Self {
        Self { users }
    }

    /// Resolve `username`, treating a missing account as an authentication
    /// failure.
    pub async fn resolve(&self, username: &str) -> Result<ResolvedIdentity, GatewayError> {
        self.users
            .lookup(username)
            .await?
            .ok_or_else(|| GatewayError::UnknownUser(username.to_string()))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn alice() -> ResolvedIdentity {
        ResolvedIdentity {
            username: "alice".into(),
            uid: 1001,
            gid: 1001,
            home: PathBuf::from("/home/alice"),
        }
    }

    #[test]
    fn test_expand_home_prefix() {
        let identity = alice();
        assert_eq!(
            identity.expand_path("~/.bashrc"),
            PathBuf::from("/home/alice/.bashrc")
        );
        assert_eq!(
            identity.expand_path("~/a/./b/../c"),
            PathBuf::from("/home/alice/a/c")
        );
    }

    #[test]
    fn test_expand_cleans_the_joined_path() {
        let identity = alice();
        assert_eq!(identity.expand_path("~/../x"), PathBuf::from("/home/x"));
        assert_eq!(identity.expand_path("~/../../../etc"), PathBuf::from("/etc"));
        assert_eq!(identity.expand_path("~//etc/hosts"), PathBuf::from("/home/alice/etc/hosts"));
        assert_eq!(identity.expand_path("~/"), PathBuf::from("/home/alice"));
    }

    #[test]
    fn test_expand_leaves_other_paths_alone() {
        let identity = alice();
        assert_eq!(identity.expand_path("/etc/hosts"), PathBuf::from("/etc/hosts"));
        assert_eq!(identity.expand_path("~bob/x"), PathBuf::from("~bob/x"));
        assert_eq!(identity.expand_path("relative"), PathBuf::from("relative"));
    }

    #[test]
    fn test_environment_overrides_identity_vars() {
        let env = alice().environment();
        assert_eq!(env.lookup("HOME").as_deref(), Some("/home/alice"));
        assert_eq!(env.lookup("USER").as_deref(), Some("alice"));
        assert_eq!(env.lookup("LOGNAME").as_deref(), Some("alice"));
    }

    #[test]
    fn test_environment_falls_through_to_process_env() {
        let env = alice().environment();
        assert_eq!(env.lookup("PATH"), std::env::var("PATH").ok());
        assert_eq!(env.lookup("GATEWAY_SURELY_UNSET_VARIABLE"), None);
    }

    #[test]
    fn test_child_vars_contain_identity_once() {
        let vars = alice().environment().child_vars();
        for name in IDENTITY_VARS {
            let hits: Vec<_> = vars.iter().filter(|(k, _)| k == name).collect();
            assert_eq!(hits.len(), 1, "{name} should appear exactly once");
        }
        assert!(vars.contains(&(OsString::from("HOME"), OsString::from("/home/alice"))));
    }

    #[tokio::test]
    async fn test_resolve_unknown_user() {
        let context = PrivilegeContext::new(Arc::new(StaticUsers::default()));
        let err = context.resolve("ghost").await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownUser(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_resolve_lookup_failure_is_not_unknown_user() {
        let context = PrivilegeContext::new(Arc::new(StaticUsers::failing()));
        let err = context.resolve("alice").await.unwrap_err();
        assert!(matches!(err, GatewayError::UserLookup(_)));
    }

    #[tokio::test]
    async fn test_resolve_known_user() {
        let context = PrivilegeContext::new(Arc::new(StaticUsers::default().with(alice())));
        assert_eq!(context.resolve("alice").await.unwrap(), alice());
    }

    #[tokio::test]
    async fn test_system_users_reports_missing_account() {
        let found = SystemUsers
            .lookup("no-such-user-for-gateway-tests")
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
