//! File transfer on behalf of a resolved identity.
//!
//! Two flavours are offered:
//!
//! - whole-file [`put_file`](FileTransferEngine::put_file) and
//!   [`fetch_file`](FileTransferEngine::fetch_file), which move the entire
//!   payload in one message and report I/O problems inside the response;
//! - the streaming [`transfer`](FileTransferEngine::transfer) protocol, where
//!   one stream carries exactly one upload or download in bounded chunks.
//!
//! A leading `~/` in a remote path always refers to the caller's home
//! directory.
//!
//! # Streaming protocol
//!
//! ```text
//! upload:   client -> Control(UPLOAD, info)  Data*  <end>
//!           server -> Control(UPLOAD, info with bytes received)
//!
//! download: client -> Control(DOWNLOAD, info)
//!           server -> Control(DOWNLOAD, info with real size)  Data*  <end>
//! ```
//!
//! Uploaded files are handed over to the caller's uid and gid. Whole-file
//! puts keep the ownership of the gateway process.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use futures::{Stream, StreamExt};
use tokio::fs::{DirBuilder, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::gateway::error::GatewayError;
use crate::gateway::identity::ResolvedIdentity;
use crate::gateway::proto::control_message::Operation;
use crate::gateway::proto::file_transfer_message::Payload;
use crate::gateway::proto::{
    FetchFileRequest, FetchFileResponse, FileInfo, FileTransferMessage, PutFileRequest,
    PutFileResponse,
};

/// Size of the data frames sent during a download.
pub const CHUNK_SIZE: usize = 32 * 1024;

const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

/// Outbound half of a streaming transfer.
pub type TransferStream = Pin<Box<dyn Stream<Item = Result<FileTransferMessage, Status>> + Send>>;

/// State of one streaming transfer.
#[derive(Debug)]
pub struct TransferSession {
    pub id: Uuid,
    pub operation: Operation,
    pub path: PathBuf,
    /// Size announced by the client; zero when unknown.
    pub declared_size: i64,
    pub transferred: i64,
}

impl TransferSession {
    fn new(operation: Operation, path: PathBuf, declared_size: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            path,
            declared_size,
            transferred: 0,
        }
    }
}

/// Moves files between callers and the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransferEngine;

impl FileTransferEngine {
    /// Write `request.file_data` to `request.remote_path`, creating missing
    /// parent directories.
    pub async fn put_file(
        &self,
        identity: &ResolvedIdentity,
        request: PutFileRequest,
    ) -> PutFileResponse {
        let path = identity.expand_path(&request.remote_path);
        debug!("PutFile {} bytes to {}", request.file_data.len(), path.display());

        match write_whole(&path, &request.file_data).await {
            Ok(()) => PutFileResponse {
                success: true,
                message: "File transferred".to_string(),
            },
            Err(e) => {
                warn!("PutFile to {} failed: {}", path.display(), e);
                PutFileResponse {
                    success: false,
                    message: e.to_string(),
                }
            }
        }
    }

    /// Read the whole of `request.remote_path`.
    pub async fn fetch_file(
        &self,
        identity: &ResolvedIdentity,
        request: FetchFileRequest,
    ) -> FetchFileResponse {
        let path = identity.expand_path(&request.remote_path);
        debug!("FetchFile {}", path.display());

        match tokio::fs::read(&path).await {
            Ok(file_data) => FetchFileResponse {
                success: true,
                message: "File fetched".to_string(),
                file_data,
            },
            Err(e) => {
                warn!("FetchFile of {} failed: {}", path.display(), e);
                FetchFileResponse {
                    success: false,
                    message: e.to_string(),
                    file_data: Vec::new(),
                }
            }
        }
    }

    /// Serve one streaming transfer.
    ///
    /// An upload is consumed completely before this returns, so its outcome
    /// (including a size mismatch) is reported as the call status. A download
    /// returns as soon as the source is open; its chunks are produced by a
    /// background task that stops when the caller goes away.
    ///
    /// # Errors
    ///
    /// * `InvalidTransfer` - the first frame is missing, is not a control
    ///   frame, lacks file info or names an unknown operation
    /// * `SourceUnavailable` - the download source cannot be opened
    /// * `SizeMismatch` - fewer or more bytes than announced were uploaded
    /// * `StreamReceive` - the inbound stream failed mid upload
    /// * `Io` - a local filesystem step failed
    pub async fn transfer<S>(
        &self,
        identity: &ResolvedIdentity,
        inbound: S,
    ) -> Result<TransferStream, GatewayError>
    where
        S: Stream<Item = Result<FileTransferMessage, Status>> + Send,
    {
        let mut inbound = std::pin::pin!(inbound);

        let first = match inbound.next().await {
            Some(Ok(message)) => message,
            Some(Err(status)) => {
                return Err(GatewayError::InvalidTransfer(format!(
                    "failed to receive initial message: {}",
                    status.message()
                )));
            }
            None => {
                return Err(GatewayError::InvalidTransfer(
                    "failed to receive initial message: stream closed".to_string(),
                ));
            }
        };
        let Some(Payload::Control(control)) = first.payload else {
            return Err(GatewayError::InvalidTransfer(
                "expected ControlMessage as first message".to_string(),
            ));
        };
        let operation = Operation::try_from(control.operation).map_err(|_| {
            GatewayError::InvalidTransfer(format!("unknown operation: {}", control.operation))
        })?;
        let info = control.info.ok_or_else(|| {
            GatewayError::InvalidTransfer(format!(
                "missing FileInfo in {}",
                operation.as_str_name().to_lowercase()
            ))
        })?;

        let path = identity.expand_path(&info.remote_path);
        let session = TransferSession::new(operation, path, info.file_size);
        info!(
            "Transfer {} started: {} {} for {}",
            session.id,
            operation.as_str_name(),
            session.path.display(),
            identity.username
        );

        match operation {
            Operation::Upload => upload(session, identity, info, inbound).await,
            Operation::Download => download(session, info).await,
        }
    }
}

async fn write_whole(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(parent)
            .await?;
    }
    let mut file = create_truncated(path).await?;
    file.write_all(data).await?;
    file.flush().await
}

async fn create_truncated(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_MODE)
        .open(path)
        .await
}

async fn upload<S>(
    mut session: TransferSession,
    identity: &ResolvedIdentity,
    info: FileInfo,
    mut inbound: Pin<&mut S>,
) -> Result<TransferStream, GatewayError>
where
    S: Stream<Item = Result<FileTransferMessage, Status>>,
{
    let path = session.path.clone();
    if let Some(parent) = path.parent() {
        DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(parent)
            .await
            .map_err(|e| GatewayError::io("create directories for", parent, e))?;
    }
    let mut file = create_truncated(&path)
        .await
        .map_err(|e| GatewayError::io("create file", &path, e))?;

    while let Some(message) = inbound.next().await {
        let message = message.map_err(|status| {
            error!(
                "Transfer {} receive failed after {} bytes: {}",
                session.id,
                session.transferred,
                status.message()
            );
            GatewayError::StreamReceive(status.message().to_string())
        })?;
        let Some(Payload::Data(chunk)) = message.payload else {
            return Err(GatewayError::InvalidTransfer(
                "expected FileData message during upload".to_string(),
            ));
        };
        file.write_all(&chunk.data)
            .await
            .map_err(|e| GatewayError::io("write to file", &path, e))?;
        session.transferred += chunk.data.len() as i64;
    }
    file.flush()
        .await
        .map_err(|e| GatewayError::io("write to file", &path, e))?;
    drop(file);

    if session.declared_size != 0 && session.declared_size != session.transferred {
        error!(
            "Transfer {} size mismatch for {}",
            session.id,
            path.display()
        );
        return Err(GatewayError::SizeMismatch {
            expected: session.declared_size,
            received: session.transferred,
        });
    }

    hand_over(&path, identity.uid, identity.gid).await?;
    info!(
        "Transfer {} finished: received {} bytes into {}",
        session.id,
        session.transferred,
        path.display()
    );

    let ack = FileTransferMessage::control(
        Operation::Upload,
        FileInfo {
            file_size: session.transferred,
            ..info
        },
    );
    Ok(Box::pin(tokio_stream::once(Ok(ack))))
}

/// Give an uploaded file to its new owner.
async fn hand_over(path: &Path, uid: u32, gid: u32) -> Result<(), GatewayError> {
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || std::os::unix::fs::chown(&target, Some(uid), Some(gid)))
        .await
        .map_err(|e| GatewayError::io("change ownership of", path, std::io::Error::other(e)))?
        .map_err(|e| GatewayError::io("change ownership of", path, e))
}

async fn download(
    mut session: TransferSession,
    info: FileInfo,
) -> Result<TransferStream, GatewayError> {
    let path = session.path.clone();
    let mut file = File::open(&path)
        .await
        .map_err(|source| GatewayError::SourceUnavailable {
            path: path.clone(),
            source,
        })?;
    let size = file
        .metadata()
        .await
        .map_err(|e| GatewayError::io("stat file", &path, e))?
        .len() as i64;

    let (tx, rx) = mpsc::channel(4);
    let header = FileTransferMessage::control(
        Operation::Download,
        FileInfo {
            file_size: size,
            ..info
        },
    );

    tokio::spawn(async move {
        if tx.send(Ok(header)).await.is_err() {
            debug!("Transfer {} abandoned before the first frame", session.id);
            return;
        }
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match file.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    error!(
                        "Transfer {} read of {} failed: {}",
                        session.id,
                        session.path.display(),
                        e
                    );
                    let err = GatewayError::io("read file", &session.path, e);
                    let _ = tx.send(Err(Status::from(err))).await;
                    return;
                }
            };
            let frame = FileTransferMessage::data(buffer[..n].to_vec());
            if tx.send(Ok(frame)).await.is_err() {
                debug!(
                    "Transfer {} abandoned after {} bytes",
                    session.id, session.transferred
                );
                return;
            }
            session.transferred += n as i64;
        }
        info!(
            "Transfer {} finished: sent {} bytes from {}",
            session.id,
            session.transferred,
            session.path.display()
        );
    });

    Ok(Box::pin(ReceiverStream::new(rx)))
}
