//! Scripted in-memory transports for unit tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::{ConnectionProfile, Credential};
use crate::error::{AppError, Result};
use crate::events::{SessionEvent, TransportEvent};
use crate::filesystem::RemoteEntry;
use crate::transport::{PtySize, ShellConnector, ShellTransport, TransferClient, TransferConnector};

/// A profile whose host, name and id are all `host`.
pub(crate) fn profile(host: &str) -> ConnectionProfile {
    let mut profile = ConnectionProfile::new(
        host.to_string(),
        22,
        "tester".to_string(),
        Credential::Password {
            password: "secret".to_string(),
        },
    );
    profile.id = host.to_string();
    profile.name = host.to_string();
    profile
}

/// Collects whatever events arrive within a short grace period.
pub(crate) async fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    tokio::time::sleep(Duration::from_millis(30)).await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[derive(Default)]
struct ShellState {
    opens: AtomicUsize,
    closes: AtomicUsize,
    no_pty: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
    fail_connect: Mutex<HashSet<String>>,
    fail_writes: Mutex<HashSet<String>>,
    written: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    remotes: Mutex<HashMap<String, mpsc::Sender<TransportEvent>>>,
}

/// Shell connector whose remote side is driven by the test.
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    state: Arc<ShellState>,
}

impl MockConnector {
    pub(crate) fn without_pty() -> Self {
        let connector = Self::default();
        connector.state.no_pty.store(true, Ordering::SeqCst);
        connector
    }

    pub(crate) fn fail_connect(&self, host: &str) {
        self.state.fail_connect.lock().insert(host.to_string());
    }

    pub(crate) fn fail_writes(&self, host: &str) {
        self.state.fail_writes.lock().insert(host.to_string());
    }

    pub(crate) fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock() = Some(delay);
    }

    pub(crate) fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn written(&self, host: &str) -> Vec<Vec<u8>> {
        self.state
            .written
            .lock()
            .get(host)
            .cloned()
            .unwrap_or_default()
    }

    /// Sender for the remote side of the most recent shell opened to `host`.
    pub(crate) fn remote(&self, host: &str) -> Option<mpsc::Sender<TransportEvent>> {
        self.state.remotes.lock().get(host).cloned()
    }
}

pub(crate) struct MockShell {
    host: String,
    state: Arc<ShellState>,
    closed: AtomicBool,
}

impl ShellTransport for MockShell {
    async fn write(&self, data: &[u8]) -> Result<()> {
        if self.state.fail_writes.lock().contains(&self.host) {
            return Err(AppError::Io("broken pipe".to_string()));
        }
        self.state
            .written
            .lock()
            .entry(self.host.clone())
            .or_default()
            .push(data.to_vec());
        Ok(())
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        if self.state.no_pty.load(Ordering::SeqCst) {
            return Err(AppError::Unsupported(format!("resize to {cols}x{rows}")));
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl ShellConnector for MockConnector {
    type Shell = MockShell;

    async fn open(
        &self,
        profile: &ConnectionProfile,
        _size: PtySize,
    ) -> Result<(MockShell, mpsc::Receiver<TransportEvent>)> {
        let delay = *self.state.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);

        if self.state.fail_connect.lock().contains(&profile.host) {
            return Err(AppError::Connect(format!(
                "{}: connection refused",
                profile.host_port()
            )));
        }

        let (tx, rx) = mpsc::channel(64);
        self.state.remotes.lock().insert(profile.host.clone(), tx);
        let shell = MockShell {
            host: profile.host.clone(),
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        };
        Ok((shell, rx))
    }
}

#[derive(Default)]
struct TransferState {
    opens: AtomicUsize,
    closes: AtomicUsize,
    fail_open: AtomicBool,
    fail_ops: AtomicBool,
    op_delay: Mutex<Option<Duration>>,
    listing: Mutex<Vec<RemoteEntry>>,
    listed_paths: Mutex<Vec<String>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
}

/// Transfer connector backed by an in-memory remote filesystem.
#[derive(Clone, Default)]
pub(crate) struct MockTransferConnector {
    state: Arc<TransferState>,
}

impl MockTransferConnector {
    pub(crate) fn with_listing(entries: Vec<RemoteEntry>) -> Self {
        let connector = Self::default();
        *connector.state.listing.lock() = entries;
        connector
    }

    pub(crate) fn fail_open(&self) {
        self.state.fail_open.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_operations(&self) {
        self.state.fail_ops.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_op_delay(&self, delay: Duration) {
        *self.state.op_delay.lock() = Some(delay);
    }

    pub(crate) fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn listed_paths(&self) -> Vec<String> {
        self.state.listed_paths.lock().clone()
    }

    pub(crate) fn put_file(&self, path: &str, contents: &[u8]) {
        self.state
            .files
            .lock()
            .insert(path.to_string(), contents.to_vec());
    }

    pub(crate) fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.files.lock().get(path).cloned()
    }
}

pub(crate) struct MockTransferClient {
    state: Arc<TransferState>,
}

impl MockTransferClient {
    async fn step(&self, what: &str) -> Result<()> {
        let delay = *self.state.op_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.fail_ops.load(Ordering::SeqCst) {
            return Err(AppError::Transfer(format!("{what}: permission denied")));
        }
        Ok(())
    }

    fn remote_file(&self, path: &str) -> Result<Vec<u8>> {
        self.state
            .files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| AppError::Transfer(format!("{path}: no such file")))
    }
}

impl TransferClient for MockTransferClient {
    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        self.step("list").await?;
        self.state.listed_paths.lock().push(path.to_string());
        Ok(self.state.listing.lock().clone())
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        self.step("upload").await?;
        let contents = tokio::fs::read(local_path).await?;
        self.state
            .files
            .lock()
            .insert(remote_path.to_string(), contents);
        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        self.step("download").await?;
        let contents = self.remote_file(remote_path)?;
        tokio::fs::write(local_path, contents).await?;
        Ok(())
    }

    async fn read_file(&self, remote_path: &str) -> Result<Vec<u8>> {
        self.step("read").await?;
        self.remote_file(remote_path)
    }

    async fn write_file(&self, remote_path: &str, data: &[u8]) -> Result<()> {
        self.step("write").await?;
        self.state
            .files
            .lock()
            .insert(remote_path.to_string(), data.to_vec());
        Ok(())
    }

    async fn close(&self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl TransferConnector for MockTransferConnector {
    type Client = MockTransferClient;

    async fn open(&self, profile: &ConnectionProfile) -> Result<MockTransferClient> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(AppError::Connect(format!(
                "{}: authentication failed",
                profile.host_port()
            )));
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        Ok(MockTransferClient {
            state: Arc::clone(&self.state),
        })
    }
}
