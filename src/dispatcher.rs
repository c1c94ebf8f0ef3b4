//! Request routing between external callers and the session layer.
//!
//! This is the only place an [`AppError`] is turned into the `{success, error}`
//! response shape.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ConnectionProfile;
use crate::error::{AppError, ErrorKind, Result};
use crate::events::SessionEvent;
use crate::filesystem::{FileEntry, entry, local};
use crate::session::{BroadcastOutcome, SessionId, SessionRegistry};
use crate::transfer::with_transfer_session;
use crate::transport::{ShellConnector, TransferClient, TransferConnector};

const DEFAULT_REMOTE_DIR: &str = "/";

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    CreateSession {
        #[serde(default)]
        session_id: Option<SessionId>,
        connection: ConnectionProfile,
    },
    #[serde(rename_all = "camelCase")]
    Write { session_id: SessionId, data: String },
    #[serde(rename_all = "camelCase")]
    Resize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    #[serde(rename_all = "camelCase")]
    Disconnect { session_id: SessionId },
    Broadcast { command: String },
    ListDirectory {
        connection: ConnectionProfile,
        #[serde(default)]
        path: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Upload {
        connection: ConnectionProfile,
        local_path: PathBuf,
        remote_path: String,
    },
    #[serde(rename_all = "camelCase")]
    Download {
        connection: ConnectionProfile,
        remote_path: String,
        local_path: PathBuf,
    },
    ListLocalDirectory { path: PathBuf },
    #[serde(rename_all = "camelCase")]
    ReadFile {
        connection: ConnectionProfile,
        remote_path: String,
    },
    #[serde(rename_all = "camelCase")]
    WriteFile {
        connection: ConnectionProfile,
        remote_path: String,
        contents: String,
    },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::CreateSession { .. } => "create-session",
            Request::Write { .. } => "write",
            Request::Resize { .. } => "resize",
            Request::Disconnect { .. } => "disconnect",
            Request::Broadcast { .. } => "broadcast",
            Request::ListDirectory { .. } => "list-directory",
            Request::Upload { .. } => "upload",
            Request::Download { .. } => "download",
            Request::ListLocalDirectory { .. } => "list-local-directory",
            Request::ReadFile { .. } => "read-file",
            Request::WriteFile { .. } => "write-file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    #[serde(rename_all = "camelCase")]
    Session { session_id: SessionId },
    Files { files: Vec<FileEntry> },
    Results { results: Vec<BroadcastOutcome> },
    Contents { contents: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(flatten)]
    pub payload: Option<Payload>,
}

impl Response {
    fn with(payload: Option<Payload>) -> Self {
        Self {
            success: true,
            error: None,
            error_kind: None,
            payload,
        }
    }

    pub fn failure(error: &AppError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            payload: None,
        }
    }
}

pub struct CommandDispatcher<C: ShellConnector, F: TransferConnector> {
    registry: Arc<SessionRegistry<C>>,
    transfers: F,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl<C: ShellConnector, F: TransferConnector> CommandDispatcher<C, F> {
    /// Returns the dispatcher and the receiver every session it creates
    /// reports to.
    pub fn new(
        registry: Arc<SessionRegistry<C>>,
        transfers: F,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                registry,
                transfers,
                events,
            },
            rx,
        )
    }

    pub fn registry(&self) -> &Arc<SessionRegistry<C>> {
        &self.registry
    }

    pub async fn create_session(
        &self,
        session_id: Option<SessionId>,
        connection: &ConnectionProfile,
    ) -> Result<SessionId> {
        self.registry
            .create(session_id, connection, self.events.clone())
            .await
    }

    pub async fn write(&self, session_id: &SessionId, data: &[u8]) -> Result<()> {
        let session = self
            .registry
            .get(session_id)
            .ok_or_else(|| AppError::NotFound(session_id.clone()))?;
        session.write(data).await
    }

    pub async fn resize(&self, session_id: &SessionId, cols: u16, rows: u16) -> Result<()> {
        let session = self
            .registry
            .get(session_id)
            .ok_or_else(|| AppError::NotFound(session_id.clone()))?;
        session.resize(cols, rows).await
    }

    /// Succeeds for ids that are already gone, so racing closers all see success.
    pub async fn disconnect(&self, session_id: &SessionId) -> Result<()> {
        if !self.registry.disconnect(session_id).await {
            debug!("Session {} was not live at disconnect", session_id);
        }
        Ok(())
    }

    pub async fn broadcast(&self, command: &str) -> Vec<BroadcastOutcome> {
        let results = self.registry.broadcast(command.as_bytes()).await;
        debug!(
            "Broadcast reached {}/{} session(s)",
            results.iter().filter(|r| r.success).count(),
            results.len()
        );
        results
    }

    /// Lists a remote directory on its own transfer connection.
    pub async fn list_directory(
        &self,
        connection: &ConnectionProfile,
        path: Option<&str>,
    ) -> Result<Vec<FileEntry>> {
        let path = path
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_REMOTE_DIR)
            .to_string();
        let entries = with_transfer_session(&self.transfers, connection, |client| async move {
            client.list_dir(&path).await
        })
        .await?;
        Ok(entry::normalize(entries))
    }

    pub async fn upload(
        &self,
        connection: &ConnectionProfile,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<()> {
        let local_path = local_path.to_path_buf();
        let remote_path = remote_path.to_string();
        with_transfer_session(&self.transfers, connection, |client| async move {
            client.upload(&local_path, &remote_path).await
        })
        .await
    }

    pub async fn download(
        &self,
        connection: &ConnectionProfile,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<()> {
        let local_path = local_path.to_path_buf();
        let remote_path = remote_path.to_string();
        with_transfer_session(&self.transfers, connection, |client| async move {
            client.download(&remote_path, &local_path).await
        })
        .await
    }

    /// Reads a remote text file for editing.
    pub async fn read_file(
        &self,
        connection: &ConnectionProfile,
        remote_path: &str,
    ) -> Result<String> {
        let path = remote_path.to_string();
        let bytes = with_transfer_session(&self.transfers, connection, |client| async move {
            client.read_file(&path).await
        })
        .await?;
        String::from_utf8(bytes)
            .map_err(|_| AppError::Transfer(format!("{} is not valid UTF-8", remote_path)))
    }

    pub async fn write_file(
        &self,
        connection: &ConnectionProfile,
        remote_path: &str,
        contents: &str,
    ) -> Result<()> {
        let path = remote_path.to_string();
        let data = contents.as_bytes().to_vec();
        with_transfer_session(&self.transfers, connection, |client| async move {
            client.write_file(&path, &data).await
        })
        .await
    }

    pub async fn list_local_directory(&self, path: &Path) -> Result<Vec<FileEntry>> {
        local::list_dir(path).await
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        let name = request.name();
        let result = match request {
            Request::CreateSession {
                session_id,
                connection,
            } => self
                .create_session(session_id, &connection)
                .await
                .map(|session_id| Some(Payload::Session { session_id })),
            Request::Write { session_id, data } => self
                .write(&session_id, data.as_bytes())
                .await
                .map(|_| None),
            Request::Resize {
                session_id,
                cols,
                rows,
            } => self.resize(&session_id, cols, rows).await.map(|_| None),
            Request::Disconnect { session_id } => self.disconnect(&session_id).await.map(|_| None),
            Request::Broadcast { command } => Ok(Some(Payload::Results {
                results: self.broadcast(&command).await,
            })),
            Request::ListDirectory { connection, path } => self
                .list_directory(&connection, path.as_deref())
                .await
                .map(|files| Some(Payload::Files { files })),
            Request::Upload {
                connection,
                local_path,
                remote_path,
            } => self
                .upload(&connection, &local_path, &remote_path)
                .await
                .map(|_| None),
            Request::Download {
                connection,
                remote_path,
                local_path,
            } => self
                .download(&connection, &remote_path, &local_path)
                .await
                .map(|_| None),
            Request::ListLocalDirectory { path } => self
                .list_local_directory(&path)
                .await
                .map(|files| Some(Payload::Files { files })),
            Request::ReadFile {
                connection,
                remote_path,
            } => self
                .read_file(&connection, &remote_path)
                .await
                .map(|contents| Some(Payload::Contents { contents })),
            Request::WriteFile {
                connection,
                remote_path,
                contents,
            } => self
                .write_file(&connection, &remote_path, &contents)
                .await
                .map(|_| None),
        };

        match result {
            Ok(payload) => Response::with(payload),
            Err(e) => {
                warn!("{} failed: {}", name, e);
                Response::failure(&e)
            }
        }
    }
}
