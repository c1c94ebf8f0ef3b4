//! Process-wide table of live sessions.
//!
//! The registry is the only owner of [`Session`] values. Everything else holds
//! a [`SessionId`] and resolves it here, so absence always means "gone".

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{Session, SessionId, SessionState};
use crate::config::{AppSettings, ConnectionProfile};
use crate::error::{AppError, Result};
use crate::events::SessionEvent;
use crate::transport::{PtySize, ShellConnector, ShellTransport};

/// Shared between the registry and its sessions so that a session can drop
/// its own entry when it ends.
pub(crate) struct SessionTable<T: ShellTransport> {
    sessions: DashMap<SessionId, Arc<Session<T>>>,
}

impl<T: ShellTransport> SessionTable<T> {
    fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub(crate) fn remove(&self, id: &SessionId) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            debug!("Removed session {} from registry", id);
        }
        removed
    }
}

/// Per-session result of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastOutcome {
    pub session_id: SessionId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct SessionRegistry<C: ShellConnector> {
    connector: C,
    settings: AppSettings,
    table: Arc<SessionTable<C::Shell>>,
}

impl<C: ShellConnector> SessionRegistry<C> {
    pub fn new(connector: C, settings: AppSettings) -> Self {
        Self {
            connector,
            settings,
            table: Arc::new(SessionTable::new()),
        }
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// Registers a new session and connects it.
    ///
    /// The entry is visible (as `Connecting`) before the connect attempt
    /// completes. On failure the session removes itself again.
    pub async fn create(
        &self,
        requested: Option<SessionId>,
        profile: &ConnectionProfile,
        subscriber: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<SessionId> {
        profile.validate()?;

        let id = requested.unwrap_or_else(SessionId::generate);
        let size = PtySize::new(self.settings.initial_cols, self.settings.initial_rows);
        let session = Arc::new(Session::new(
            id.clone(),
            size,
            subscriber,
            Arc::downgrade(&self.table),
        ));

        match self.table.sessions.entry(id.clone()) {
            Entry::Occupied(_) => return Err(AppError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&session));
            }
        }
        info!(
            "Registered session {} for {}@{}",
            id,
            profile.username,
            profile.host_port()
        );

        session.connect(&self.connector, profile).await?;
        Ok(id)
    }

    /// Non-owning lookup. `None` means the session never existed or has ended.
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session<C::Shell>>> {
        self.table
            .sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.table.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.table.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.table
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Asks the session to tear itself down; the session removes its own entry.
    ///
    /// Returns `false` when the id is unknown or its teardown already began.
    pub async fn disconnect(&self, id: &SessionId) -> bool {
        match self.get(id) {
            Some(session) => {
                session.disconnect().await;
                true
            }
            None => {
                debug!("Disconnect for {}: already gone", id);
                false
            }
        }
    }

    /// Writes `data` to every connected session.
    ///
    /// A failing session does not stop delivery to the others. Sessions that
    /// are removed while the broadcast is in flight are skipped.
    pub async fn broadcast(&self, data: &[u8]) -> Vec<BroadcastOutcome> {
        let targets: Vec<_> = self
            .table
            .sessions
            .iter()
            .filter(|entry| entry.value().state() == SessionState::Connected)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let attempts = targets.iter().map(|session| async move {
            (session.id().clone(), session.write(data).await)
        });

        join_all(attempts)
            .await
            .into_iter()
            .filter_map(|(session_id, result)| match result {
                Ok(()) => Some(BroadcastOutcome {
                    session_id,
                    success: true,
                    error: None,
                }),
                Err(_) if !self.contains(&session_id) => {
                    debug!("Broadcast skipped session {} removed mid-flight", session_id);
                    None
                }
                Err(e) => Some(BroadcastOutcome {
                    session_id,
                    success: false,
                    error: Some(e.to_string()),
                }),
            })
            .collect()
    }

    /// Disconnects every remaining session, then clears the table.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self
            .table
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        info!("Shutting down {} session(s)", sessions.len());

        join_all(sessions.iter().map(|session| session.disconnect())).await;
        self.table.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{MockConnector, drain, profile};

    fn registry(connector: &MockConnector) -> SessionRegistry<MockConnector> {
        SessionRegistry::new(connector.clone(), AppSettings::default())
    }

    #[tokio::test]
    async fn test_create_then_disconnect_removes_entry() {
        let connector = MockConnector::default();
        let registry = registry(&connector);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = registry.create(None, &profile("a"), tx).await.unwrap();
        let session = registry.get(&id).unwrap();
        assert_eq!(session.state(), SessionState::Connected);

        assert!(registry.disconnect(&id).await);
        assert!(registry.get(&id).is_none());
        assert!(registry.is_empty());

        let events = drain(&mut rx).await;
        assert_eq!(
            events,
            vec![SessionEvent::Disconnected { session_id: id.clone() }]
        );
        assert!(!registry.disconnect(&id).await);
        assert!(drain(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_requested_id_must_be_unique() {
        let connector = MockConnector::default();
        let registry = registry(&connector);
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = SessionId::from("term-1");
        registry
            .create(Some(id.clone()), &profile("a"), tx.clone())
            .await
            .unwrap();
        let err = registry
            .create(Some(id.clone()), &profile("b"), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));
        assert_eq!(connector.opens(), 1);
        assert!(registry.get(&id).unwrap().is_connected());
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_no_entry() {
        let connector = MockConnector::default();
        connector.fail_connect("down");
        let registry = registry(&connector);
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = SessionId::from("s1");
        let err = registry
            .create(Some(id.clone()), &profile("down"), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Connect(_)));
        assert!(registry.get(&id).is_none());
    }

    #[tokio::test]
    async fn test_entry_visible_while_connecting() {
        let connector = MockConnector::default();
        connector.set_connect_delay(Duration::from_millis(100));
        let registry = Arc::new(registry(&connector));
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = SessionId::from("slow");
        let pending = {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            tokio::spawn(async move { registry.create(Some(id), &profile("a"), tx).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            registry.get(&id).map(|s| s.state()),
            Some(SessionState::Connecting)
        );

        pending.await.unwrap().unwrap();
        assert_eq!(
            registry.get(&id).map(|s| s.state()),
            Some(SessionState::Connected)
        );
    }

    #[tokio::test]
    async fn test_broadcast_isolates_failures() {
        let connector = MockConnector::default();
        connector.fail_writes("b");
        let registry = registry(&connector);
        let (tx, _rx) = mpsc::unbounded_channel();

        for host in ["a", "b", "c"] {
            registry.create(None, &profile(host), tx.clone()).await.unwrap();
        }

        let results = registry.broadcast(b"uptime\n").await;
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|r| !r.success).count(), 1);
        assert_eq!(connector.written("a"), vec![b"uptime\n".to_vec()]);
        assert_eq!(connector.written("c"), vec![b"uptime\n".to_vec()]);
        let failed = results.iter().find(|r| !r.success).unwrap();
        assert!(failed.error.as_deref().unwrap().contains("broken pipe"));
    }

    #[tokio::test]
    async fn test_broadcast_skips_disconnected_sessions() {
        let connector = MockConnector::default();
        let registry = registry(&connector);
        let (tx, _rx) = mpsc::unbounded_channel();

        let a = registry.create(None, &profile("a"), tx.clone()).await.unwrap();
        let b = registry.create(None, &profile("b"), tx).await.unwrap();
        registry.disconnect(&b).await;

        let results = registry.broadcast(b"id\n").await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].session_id, a);
        assert!(results[0].success);
    }

    #[tokio::test]
    async fn test_remote_closure_removes_entry() {
        let connector = MockConnector::default();
        let registry = registry(&connector);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = registry.create(None, &profile("a"), tx).await.unwrap();
        connector
            .remote("a")
            .unwrap()
            .send(crate::events::TransportEvent::Closed)
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::Disconnected { .. })
        ));
        assert!(!registry.contains(&id));
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_everything() {
        let connector = MockConnector::default();
        let registry = registry(&connector);
        let (tx, mut rx) = mpsc::unbounded_channel();

        for host in ["a", "b"] {
            registry.create(None, &profile(host), tx.clone()).await.unwrap();
        }
        assert_eq!(registry.len(), 2);

        registry.shutdown().await;
        assert!(registry.is_empty());
        assert_eq!(connector.closes(), 2);
        let events = drain(&mut rx).await;
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_independent_registries_do_not_collide() {
        let connector = MockConnector::default();
        let first = registry(&connector);
        let second = registry(&connector);
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = SessionId::from("shared-name");
        first
            .create(Some(id.clone()), &profile("a"), tx.clone())
            .await
            .unwrap();
        second.create(Some(id.clone()), &profile("a"), tx).await.unwrap();

        first.shutdown().await;
        assert!(second.contains(&id));
    }
}
