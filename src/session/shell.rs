//! A single interactive session and its lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::SessionTable;
use super::{SessionId, SessionState};
use crate::config::ConnectionProfile;
use crate::error::{AppError, Result};
use crate::events::{SessionEvent, TransportEvent};
use crate::transport::{PtySize, ShellConnector, ShellTransport};

/// Owns one transport connection for its whole life.
///
/// A session is connected at most once. Once it reaches
/// [`SessionState::Disconnected`] its transport is released and the session is
/// dropped from the registry; it is never reset or reused.
pub struct Session<T: ShellTransport> {
    id: SessionId,
    state: watch::Sender<SessionState>,
    connect_started: AtomicBool,
    /// Set by the first teardown caller; later callers wait for it to finish.
    closing: AtomicBool,
    transport: OnceLock<Arc<T>>,
    geometry: Mutex<PtySize>,
    write_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    /// Taken when `Disconnected` is emitted so nothing can follow it.
    sink: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
    table: Weak<SessionTable<T>>,
}

impl<T: ShellTransport> Session<T> {
    pub(crate) fn new(
        id: SessionId,
        size: PtySize,
        sink: mpsc::UnboundedSender<SessionEvent>,
        table: Weak<SessionTable<T>>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            id,
            state,
            connect_started: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            transport: OnceLock::new(),
            geometry: Mutex::new(size),
            write_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            sink: Mutex::new(Some(sink)),
            table,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        !self.closing.load(Ordering::SeqCst) && self.state() == SessionState::Connected
    }

    /// Last geometry acknowledged by the transport.
    pub fn geometry(&self) -> PtySize {
        *self.geometry.lock()
    }

    /// Opens the transport. Calling this a second time is a programming error
    /// and fails with [`AppError::InvalidState`] without touching the session.
    pub async fn connect<C>(self: &Arc<Self>, connector: &C, profile: &ConnectionProfile) -> Result<()>
    where
        C: ShellConnector<Shell = T>,
    {
        if self.connect_started.swap(true, Ordering::SeqCst) {
            return Err(AppError::InvalidState(format!(
                "connect called twice on session {}",
                self.id
            )));
        }
        if self.closing.load(Ordering::SeqCst) {
            return Err(AppError::Connect(format!(
                "session {} was disconnected before connecting",
                self.id
            )));
        }

        self.state.send_replace(SessionState::Connecting);
        info!("Session {} connecting to {}", self.id, profile.host_port());

        let size = self.geometry();
        let opened = tokio::select! {
            _ = self.cancel.cancelled() => Err(AppError::Connect(format!(
                "session {} was disconnected while connecting",
                self.id
            ))),
            result = connector.open(profile, size) => result,
        };

        let (transport, events) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Session {} failed to connect: {}", self.id, e);
                self.finish().await;
                return Err(e);
            }
        };

        let transport = Arc::new(transport);
        let _ = self.transport.set(Arc::clone(&transport));

        // A disconnect that landed while the transport was being opened may
        // not have seen it.
        if self.closing.load(Ordering::SeqCst) || !self.promote_to_connected() {
            transport.close().await;
            self.finish().await;
            return Err(AppError::Connect(format!(
                "session {} was disconnected while connecting",
                self.id
            )));
        }
        info!("Session {} connected", self.id);

        tokio::spawn(Arc::clone(self).pump(events));
        Ok(())
    }

    /// Forwards raw input to the remote shell. Writes are serialized per session.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let transport = self.live_transport()?;
        let _guard = tokio::select! {
            _ = self.cancel.cancelled() => return Err(self.closed_error()),
            guard = self.write_lock.lock() => guard,
        };
        // re-check after waiting behind an earlier write
        self.live_transport()?;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.closed_error()),
            result = transport.write(data) => result,
        }
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let transport = self.live_transport()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.closed_error()),
            result = transport.resize(cols, rows) => {
                result?;
                *self.geometry.lock() = PtySize::new(cols, rows);
                debug!("Session {} resized to {}x{}", self.id, cols, rows);
                Ok(())
            }
        }
    }

    /// Idempotent. Every caller returns only after teardown has completed, and
    /// exactly one `Disconnected` event is emitted however many callers race.
    pub async fn disconnect(&self) {
        self.finish().await;
    }

    /// `Connecting -> Connected` only; a finished session stays finished.
    fn promote_to_connected(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Connected;
                true
            } else {
                false
            }
        })
    }

    fn live_transport(&self) -> Result<Arc<T>> {
        if !self.is_connected() {
            return Err(self.closed_error());
        }
        self.transport
            .get()
            .cloned()
            .ok_or_else(|| self.closed_error())
    }

    fn closed_error(&self) -> AppError {
        AppError::Io(format!("session {} is not connected", self.id))
    }

    fn emit(&self, event: SessionEvent) {
        let sink = self.sink.lock();
        if let Some(tx) = sink.as_ref()
            && tx.send(event).is_err()
        {
            debug!("Session {} has no subscriber left", self.id);
        }
    }

    async fn pump(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                event = events.recv() => event,
            };

            match event {
                Some(TransportEvent::Data(data)) => self.emit(SessionEvent::Data {
                    session_id: self.id.clone(),
                    data,
                }),
                Some(TransportEvent::Error(error)) => {
                    warn!("Session {} transport error: {}", self.id, error);
                    self.emit(SessionEvent::Error {
                        session_id: self.id.clone(),
                        error,
                    });
                }
                Some(TransportEvent::Closed) | None => {
                    info!("Session {} closed by remote", self.id);
                    self.finish().await;
                    return;
                }
            }
        }
    }

    async fn finish(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            let mut state = self.state.subscribe();
            let _ = state
                .wait_for(|state| *state == SessionState::Disconnected)
                .await;
            return;
        }

        self.cancel.cancel();
        if let Some(table) = self.table.upgrade() {
            table.remove(&self.id);
        }
        if let Some(transport) = self.transport.get() {
            transport.close().await;
        }

        let sink = self.sink.lock().take();
        if let Some(tx) = sink {
            let _ = tx.send(SessionEvent::Disconnected {
                session_id: self.id.clone(),
            });
        }
        self.state.send_replace(SessionState::Disconnected);
        info!("Session {} disconnected", self.id);
    }
}
