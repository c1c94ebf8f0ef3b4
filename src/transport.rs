//! Boundary to the remote-shell and file-transfer implementations.
//!
//! The session layer only talks to these traits. `crate::ssh` and
//! `crate::filesystem::sftp` provide the russh-backed implementations.

use std::future::Future;
use std::path::Path;

use tokio::sync::mpsc;

use crate::config::ConnectionProfile;
use crate::error::{AppError, Result};
use crate::events::TransportEvent;
use crate::filesystem::RemoteEntry;

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    pub cols: u16,
    pub rows: u16,
}

impl PtySize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

/// One live, authenticated interactive channel.
pub trait ShellTransport: Send + Sync + 'static {
    fn write(&self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Transports without a pty reject geometry changes.
    fn resize(&self, cols: u16, rows: u16) -> impl Future<Output = Result<()>> + Send {
        async move {
            Err(AppError::Unsupported(format!(
                "resize to {cols}x{rows} on a transport without a pty"
            )))
        }
    }

    /// Releases the channel. Must be safe to call more than once.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Opens interactive shell transports.
pub trait ShellConnector: Send + Sync + 'static {
    type Shell: ShellTransport;

    /// Inbound data, recoverable errors and closure are delivered on the
    /// returned receiver in arrival order.
    fn open(
        &self,
        profile: &ConnectionProfile,
        size: PtySize,
    ) -> impl Future<Output = Result<(Self::Shell, mpsc::Receiver<TransportEvent>)>> + Send;
}

/// A connection dedicated to file operations.
pub trait TransferClient: Send + Sync + 'static {
    fn list_dir(&self, path: &str) -> impl Future<Output = Result<Vec<RemoteEntry>>> + Send;

    fn upload(&self, local_path: &Path, remote_path: &str)
    -> impl Future<Output = Result<()>> + Send;

    fn download(
        &self,
        remote_path: &str,
        local_path: &Path,
    ) -> impl Future<Output = Result<()>> + Send;

    fn read_file(&self, remote_path: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn write_file(&self, remote_path: &str, data: &[u8])
    -> impl Future<Output = Result<()>> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Opens transfer connections.
///
/// An implementation that fails after part of the connection was set up must
/// release that part before returning the error.
pub trait TransferConnector: Send + Sync + 'static {
    type Client: TransferClient;

    fn open(&self, profile: &ConnectionProfile)
    -> impl Future<Output = Result<Self::Client>> + Send;
}
