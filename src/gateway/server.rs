//! Assembly and lifecycle of the gRPC server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{info, warn};

use crate::gateway::auth::{
    AuthDispatcher, AuthLayer, PasswordAuth, PasswordVerifier, PublicKeyAuth, WhitelistAuth,
};
use crate::gateway::config::GatewayConfig;
use crate::gateway::error::GatewayError;
use crate::gateway::identity::{PrivilegeContext, SystemUsers, UserDatabase};
use crate::gateway::keycache::KeyCache;
use crate::gateway::proto::connection_service_server::ConnectionServiceServer;
use crate::gateway::service::GatewayService;

/// A configured gateway, ready to serve.
///
/// # Example
///
/// ```ignore
/// let server = GatewayServer::new(GatewayConfig::from_env());
/// server.serve(tokio::signal::ctrl_c().map(|_| ())).await?;
/// ```
pub struct GatewayServer {
    config: GatewayConfig,
    users: Arc<dyn UserDatabase>,
    passwords: Option<Arc<dyn PasswordVerifier>>,
}

impl GatewayServer {
    /// Gateway using the host's accounts and PAM.
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            users: Arc::new(SystemUsers),
            passwords: None,
        }
    }

    /// Replace the account database.
    pub fn with_users(mut self, users: Arc<dyn UserDatabase>) -> Self {
        self.users = users;
        self
    }

    /// Replace the password backend.
    pub fn with_password_verifier(mut self, verifier: Arc<dyn PasswordVerifier>) -> Self {
        self.passwords = Some(verifier);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(self.config.listen)
            .await
            .map_err(|e| GatewayError::io("bind", self.config.listen.to_string(), e))?;
        self.serve_with_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    ///
    /// The key cache lives exactly as long as the server: it is started
    /// before the first connection is accepted and closed after the last
    /// call has finished.
    pub async fn serve_with_listener<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send,
    {
        let local: Option<SocketAddr> = listener.local_addr().ok();
        let key_cache = KeyCache::start(self.config.key_cache()).await?;

        let privileges = PrivilegeContext::new(self.users);
        let password = match self.passwords {
            Some(verifier) => PasswordAuth::new(verifier),
            None => PasswordAuth::system(),
        };
        let whitelist = WhitelistAuth::new(&self.config.whitelist);
        if whitelist.is_empty() {
            info!("Address whitelist is empty; callers must present a password or key");
        }
        let dispatcher = AuthDispatcher::new(
            privileges.clone(),
            Arc::new(password),
            Arc::new(PublicKeyAuth::new(Arc::clone(&key_cache))),
            Arc::new(whitelist),
        );

        match local {
            Some(addr) => info!("Gateway listening on {}", addr),
            None => warn!("Gateway listening on an unknown address"),
        }

        let result = Server::builder()
            .layer(AuthLayer::new(dispatcher))
            .add_service(ConnectionServiceServer::new(GatewayService::new(privileges)))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await;

        key_cache.close().await;
        info!("Gateway stopped");
        result.map_err(GatewayError::from)
    }
}
