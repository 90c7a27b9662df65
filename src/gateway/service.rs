//! `connection.ConnectionService` implementation.
//!
//! Every call reaching this service has already passed the authentication
//! layer. The handlers resolve the caller's account afresh, then hand the work
//! to the [`CommandExecutor`] or the [`FileTransferEngine`].

use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info};

use crate::gateway::auth::{AuthenticatedUser, USER_KEY};
use crate::gateway::error::GatewayError;
use crate::gateway::exec::CommandExecutor;
use crate::gateway::identity::{PrivilegeContext, ResolvedIdentity};
use crate::gateway::proto::connection_service_server::ConnectionService;
use crate::gateway::proto::{
    CloseRequest, CloseResponse, CommandRequest, CommandResponse, ConnectRequest,
    ConnectResponse, FetchFileRequest, FetchFileResponse, FileTransferMessage, PutFileRequest,
    PutFileResponse,
};
use crate::gateway::transfer::{FileTransferEngine, TransferStream};

#[derive(Clone)]
pub struct GatewayService {
    privileges: PrivilegeContext,
    executor: CommandExecutor,
    transfers: FileTransferEngine,
}

impl GatewayService {
    pub fn new(privileges: PrivilegeContext) -> Self {
        Self {
            privileges,
            executor: CommandExecutor,
            transfers: FileTransferEngine,
        }
    }

    /// Account the call runs as.
    async fn identity(&self, username: &str) -> Result<ResolvedIdentity, Status> {
        Ok(self.privileges.resolve(username).await?)
    }
}

/// Name of the caller.
///
/// The name set by the authentication layer wins; the `user` metadata is only
/// consulted when the service is mounted without the layer.
fn caller<T>(request: &Request<T>) -> Result<String, GatewayError> {
    if let Some(user) = request.extensions().get::<AuthenticatedUser>() {
        return Ok(user.username.clone());
    }
    request
        .metadata()
        .get(USER_KEY)
        .and_then(|value| value.to_str().ok())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or(GatewayError::MissingUser)
}

#[tonic::async_trait]
impl ConnectionService for GatewayService {
    async fn connect(
        &self,
        request: Request<ConnectRequest>,
    ) -> Result<Response<ConnectResponse>, Status> {
        let username = caller(&request)?;
        let identity = self.identity(&username).await?;
        info!("Connection established for {}", identity.username);
        Ok(Response::new(ConnectResponse {
            success: true,
            message: "Connected".to_string(),
        }))
    }

    async fn close(&self, request: Request<CloseRequest>) -> Result<Response<CloseResponse>, Status> {
        let username = caller(&request)?;
        let identity = self.identity(&username).await?;
        info!("Connection closed for {}", identity.username);
        Ok(Response::new(CloseResponse {
            success: true,
            message: "Closed".to_string(),
        }))
    }

    async fn exec_command(
        &self,
        request: Request<CommandRequest>,
    ) -> Result<Response<CommandResponse>, Status> {
        let username = caller(&request)?;
        let identity = self.identity(&username).await?;
        let command = request.into_inner().command;
        debug!("ExecCommand for {}: {}", identity.username, command);

        let response = self.executor.run(&identity, &command).await;
        debug!(
            "ExecCommand for {} exited with {}",
            identity.username, response.exit_code
        );
        Ok(Response::new(response))
    }

    async fn put_file(
        &self,
        request: Request<PutFileRequest>,
    ) -> Result<Response<PutFileResponse>, Status> {
        let username = caller(&request)?;
        let identity = self.identity(&username).await?;
        let response = self
            .transfers
            .put_file(&identity, request.into_inner())
            .await;
        Ok(Response::new(response))
    }

    async fn fetch_file(
        &self,
        request: Request<FetchFileRequest>,
    ) -> Result<Response<FetchFileResponse>, Status> {
        let username = caller(&request)?;
        let identity = self.identity(&username).await?;
        let response = self
            .transfers
            .fetch_file(&identity, request.into_inner())
            .await;
        Ok(Response::new(response))
    }

    type TransferFileStream = TransferStream;

    async fn transfer_file(
        &self,
        request: Request<Streaming<FileTransferMessage>>,
    ) -> Result<Response<Self::TransferFileStream>, Status> {
        let username = caller(&request)?;
        let identity = self.identity(&username).await?;
        let outbound = self
            .transfers
            .transfer(&identity, request.into_inner())
            .await?;
        Ok(Response::new(outbound))
    }
}
