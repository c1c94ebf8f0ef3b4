//! Interactive shell channels over russh.
//!
//! Each channel is driven by one task that owns the `russh::Channel` and
//! multiplexes inbound messages with queued commands, so a resize or write
//! never waits behind a pending read.

use bytes::Bytes;
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::{SshHandle, connect_authenticated};
use crate::config::{AppSettings, ConnectionProfile};
use crate::error::{AppError, Result};
use crate::events::TransportEvent;
use crate::transport::{PtySize, ShellConnector, ShellTransport};

const COMMAND_QUEUE: usize = 32;

enum ShellCommand {
    Write(Vec<u8>, oneshot::Sender<Result<()>>),
    Resize {
        cols: u16,
        rows: u16,
        reply: oneshot::Sender<Result<()>>,
    },
    Close(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct SshConnector {
    settings: AppSettings,
}

impl SshConnector {
    pub fn new(settings: AppSettings) -> Self {
        Self { settings }
    }
}

impl ShellConnector for SshConnector {
    type Shell = SshShell;

    async fn open(
        &self,
        profile: &ConnectionProfile,
        size: PtySize,
    ) -> Result<(SshShell, mpsc::Receiver<TransportEvent>)> {
        let handle = connect_authenticated(profile, &self.settings, None).await?;

        let channel = match open_shell_channel(&handle, &self.settings.terminal_type, size).await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "", "English")
                    .await;
                return Err(e);
            }
        };

        let (event_tx, event_rx) = mpsc::channel(self.settings.event_buffer.max(1));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        tokio::spawn(run_channel(
            handle,
            channel,
            command_rx,
            event_tx,
            profile.host_port(),
        ));

        Ok((
            SshShell {
                commands: command_tx,
            },
            event_rx,
        ))
    }
}

async fn open_shell_channel(
    handle: &SshHandle,
    term: &str,
    size: PtySize,
) -> Result<Channel<Msg>> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| AppError::Connect(format!("Failed to open SSH channel: {}", e)))?;
    channel
        .request_pty(true, term, size.cols as u32, size.rows as u32, 0, 0, &[])
        .await
        .map_err(|e| AppError::Connect(format!("Failed to request PTY: {}", e)))?;
    channel
        .request_shell(true)
        .await
        .map_err(|e| AppError::Connect(format!("Failed to start remote shell: {}", e)))?;
    Ok(channel)
}

/// Handle to a shell channel task.
pub struct SshShell {
    commands: mpsc::Sender<ShellCommand>,
}

impl SshShell {
    async fn request<T>(
        &self,
        command: ShellCommand,
        reply: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AppError::Io("SSH channel is closed".to_string()))?;
        reply
            .await
            .map_err(|_| AppError::Io("SSH channel closed before replying".to_string()))?
    }
}

impl ShellTransport for SshShell {
    async fn write(&self, data: &[u8]) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(ShellCommand::Write(data.to_vec(), tx), rx).await
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(ShellCommand::Resize { cols, rows, reply }, rx)
            .await
    }

    async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(ShellCommand::Close(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

async fn run_channel(
    handle: SshHandle,
    mut channel: Channel<Msg>,
    mut commands: mpsc::Receiver<ShellCommand>,
    events: mpsc::Sender<TransportEvent>,
    target: String,
) {
    let mut close_reply = None;

    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    if events.send(TransportEvent::Data(Bytes::copy_from_slice(&data))).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!("Remote shell on {} exited with {}", target, exit_status);
                }
                Some(ChannelMsg::ExitSignal { signal_name, error_message, .. }) => {
                    let message = format!("remote shell killed by {:?}: {}", signal_name, error_message);
                    let _ = events.send(TransportEvent::Error(message)).await;
                }
                Some(ChannelMsg::Failure) => {
                    let _ = events
                        .send(TransportEvent::Error("remote rejected a channel request".to_string()))
                        .await;
                }
                Some(ChannelMsg::Eof) => debug!("EOF from {}", target),
                Some(ChannelMsg::Close) | None => {
                    info!("SSH channel to {} closed by server", target);
                    break;
                }
                Some(_) => {}
            },
            command = commands.recv() => match command {
                Some(ShellCommand::Write(data, reply)) => {
                    let result = channel
                        .data(&data[..])
                        .await
                        .map_err(|e| AppError::Io(format!("Failed to write to SSH channel: {}", e)));
                    let _ = reply.send(result);
                }
                Some(ShellCommand::Resize { cols, rows, reply }) => {
                    let result = channel
                        .window_change(cols as u32, rows as u32, 0, 0)
                        .await
                        .map_err(|e| AppError::Io(format!("Failed to resize SSH channel: {}", e)));
                    let _ = reply.send(result);
                }
                Some(ShellCommand::Close(reply)) => {
                    close_reply = Some(reply);
                    break;
                }
                None => break,
            },
        }
    }

    let _ = channel.eof().await;
    let _ = channel.close().await;
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "English")
        .await
    {
        warn!("Failed to disconnect from {}: {}", target, e);
    }
    let _ = events.send(TransportEvent::Closed).await;
    if let Some(reply) = close_reply {
        let _ = reply.send(());
    }
    debug!("Channel task for {} finished", target);
}
