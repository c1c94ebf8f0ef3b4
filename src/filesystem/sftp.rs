//! One-shot SFTP connections over russh-sftp.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use russh::Disconnect;
use russh_sftp::client::SftpSession;
use russh_sftp::client::fs::File;
use russh_sftp::protocol::OpenFlags;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::RemoteEntry;
use crate::config::{AppSettings, ConnectionProfile};
use crate::error::{AppError, Result};
use crate::ssh::{SshHandle, connect_authenticated};
use crate::transport::{TransferClient, TransferConnector};

#[derive(Clone)]
pub struct SftpConnector {
    settings: AppSettings,
}

impl SftpConnector {
    pub fn new(settings: AppSettings) -> Self {
        Self { settings }
    }
}

impl TransferConnector for SftpConnector {
    type Client = SftpClient;

    async fn open(&self, profile: &ConnectionProfile) -> Result<SftpClient> {
        let inactivity = self.settings.inactivity_timeout.map(Duration::from_secs);
        let handle = connect_authenticated(profile, &self.settings, inactivity).await?;

        match start_sftp(&handle).await {
            Ok(sftp) => {
                debug!("SFTP session open on {}", profile.host_port());
                Ok(SftpClient {
                    handle,
                    sftp,
                    closed: AtomicBool::new(false),
                })
            }
            Err(e) => {
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "", "English")
                    .await;
                Err(e)
            }
        }
    }
}

async fn start_sftp(handle: &SshHandle) -> Result<SftpSession> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| AppError::Connect(format!("Failed to open SFTP channel: {}", e)))?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| AppError::Connect(format!("SFTP subsystem rejected: {}", e)))?;
    SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| AppError::Connect(format!("SFTP session creation failed: {}", e)))
}

/// An SFTP session on its own SSH connection.
pub struct SftpClient {
    handle: SshHandle,
    sftp: SftpSession,
    closed: AtomicBool,
}

impl SftpClient {
    async fn open_for_read(&self, path: &str) -> Result<File> {
        self.sftp
            .open_with_flags(path, OpenFlags::READ)
            .await
            .map_err(|e| AppError::Transfer(format!("Failed to open {} for reading: {}", path, e)))
    }

    async fn open_for_write(&self, path: &str) -> Result<File> {
        self.sftp
            .open_with_flags(
                path,
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            )
            .await
            .map_err(|e| AppError::Transfer(format!("Failed to open {} for writing: {}", path, e)))
    }
}

impl TransferClient for SftpClient {
    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let read_dir = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| AppError::Transfer(format!("read_dir failed for '{}': {}", path, e)))?;

        let entries: Vec<RemoteEntry> = read_dir
            .filter(|entry| entry.file_name() != "." && entry.file_name() != "..")
            .map(|entry| {
                let file_type = entry.file_type();
                let kind = if file_type.is_dir() {
                    "d"
                } else if file_type.is_symlink() {
                    "l"
                } else {
                    "-"
                };
                let metadata = entry.metadata();
                RemoteEntry::new(
                    entry.file_name(),
                    kind,
                    metadata.size.unwrap_or(0),
                    metadata.mtime.map(|secs| i64::from(secs) * 1000).unwrap_or(0),
                )
            })
            .collect();

        debug!("SFTP read_dir '{}': {} entries", path, entries.len());
        Ok(entries)
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let mut local = tokio::fs::File::open(local_path).await?;
        let mut remote = self.open_for_write(remote_path).await?;
        let copied = tokio::io::copy(&mut local, &mut remote).await?;
        remote.shutdown().await?;
        debug!(
            "Uploaded {} -> {} ({} bytes)",
            local_path.display(),
            remote_path,
            copied
        );
        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let mut remote = self.open_for_read(remote_path).await?;
        let mut local = tokio::fs::File::create(local_path).await?;
        let copied = tokio::io::copy(&mut remote, &mut local).await?;
        local.flush().await?;
        remote.shutdown().await?;
        debug!(
            "Downloaded {} -> {} ({} bytes)",
            remote_path,
            local_path.display(),
            copied
        );
        Ok(())
    }

    async fn read_file(&self, remote_path: &str) -> Result<Vec<u8>> {
        let mut remote = self.open_for_read(remote_path).await?;
        let mut contents = Vec::new();
        remote.read_to_end(&mut contents).await?;
        remote.shutdown().await?;
        Ok(contents)
    }

    async fn write_file(&self, remote_path: &str, data: &[u8]) -> Result<()> {
        let mut remote = self.open_for_write(remote_path).await?;
        remote.write_all(data).await?;
        remote.shutdown().await?;
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.sftp.close().await {
            debug!("SFTP close: {}", e);
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            warn!("Failed to disconnect SFTP connection: {}", e);
        }
    }
}
