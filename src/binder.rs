//! Maps presentation tabs onto shared sessions.
//!
//! The binding table (connection id -> most recently confirmed session) is
//! the single source of truth for reuse. Tabs only carry the session id they
//! were opened with and never own the session.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ConnectionProfile;
use crate::dispatcher::CommandDispatcher;
use crate::error::{AppError, Result};
use crate::events::SessionEvent;
use crate::session::SessionId;
use crate::transport::{ShellConnector, TransferConnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TabKind {
    Terminal,
    Sftp,
    Editor,
}

/// Mirror of the bound session's lifecycle, for display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: String,
    pub kind: TabKind,
    pub connection_id: String,
    pub session_id: SessionId,
    pub name: String,
    pub status: TabStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl Tab {
    fn new(kind: TabKind, connection_id: &str, session_id: SessionId, name: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            connection_id: connection_id.to_string(),
            session_id,
            name,
            status: TabStatus::Connecting,
            file_path: None,
        }
    }
}

#[derive(Default)]
struct BinderState {
    tabs: Vec<Tab>,
    active: Option<String>,
    bindings: HashMap<String, SessionId>,
}

impl BinderState {
    fn tab_mut(&mut self, tab_id: &str) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|tab| tab.id == tab_id)
    }

    fn push_active(&mut self, tab: Tab) -> String {
        let id = tab.id.clone();
        self.tabs.push(tab);
        self.active = Some(id.clone());
        id
    }
}

pub struct TabBinder<C: ShellConnector, F: TransferConnector> {
    dispatcher: Arc<CommandDispatcher<C, F>>,
    state: Mutex<BinderState>,
}

impl<C: ShellConnector, F: TransferConnector> TabBinder<C, F> {
    pub fn new(dispatcher: Arc<CommandDispatcher<C, F>>) -> Self {
        Self {
            dispatcher,
            state: Mutex::new(BinderState::default()),
        }
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher<C, F>> {
        &self.dispatcher
    }

    /// Focuses the live terminal tab for `profile` if there is one, otherwise
    /// opens a new session for it.
    pub async fn open_terminal(&self, profile: &ConnectionProfile) -> Result<String> {
        {
            let mut state = self.state.lock();
            let existing = state
                .tabs
                .iter()
                .find(|tab| {
                    tab.kind == TabKind::Terminal
                        && tab.connection_id == profile.id
                        && tab.status != TabStatus::Disconnected
                })
                .map(|tab| tab.id.clone());
            if let Some(tab_id) = existing {
                debug!("Focusing existing terminal tab {} for {}", tab_id, profile.id);
                state.active = Some(tab_id.clone());
                return Ok(tab_id);
            }
        }
        self.connect_terminal(profile).await
    }

    /// Always opens a fresh session, superseding any previous binding.
    pub async fn reconnect_terminal(&self, profile: &ConnectionProfile) -> Result<String> {
        self.connect_terminal(profile).await
    }

    async fn connect_terminal(&self, profile: &ConnectionProfile) -> Result<String> {
        let session_id = SessionId::generate();
        let tab_id = self.state.lock().push_active(Tab::new(
            TabKind::Terminal,
            &profile.id,
            session_id.clone(),
            profile.display_name().to_string(),
        ));

        if let Err(e) = self
            .dispatcher
            .create_session(Some(session_id.clone()), profile)
            .await
        {
            if let Some(tab) = self.state.lock().tab_mut(&tab_id) {
                tab.status = TabStatus::Disconnected;
            }
            return Err(e);
        }

        let registry = self.dispatcher.registry();
        let (outcome, stale) = {
            let mut state = self.state.lock();
            let live = registry
                .get(&session_id)
                .is_some_and(|session| session.is_connected());
            match state.tab_mut(&tab_id) {
                None => (Confirm::TabGone, None),
                Some(tab) if !live => {
                    tab.status = TabStatus::Disconnected;
                    (Confirm::SessionGone, None)
                }
                Some(tab) => {
                    tab.status = TabStatus::Connected;
                    let previous = state
                        .bindings
                        .insert(profile.id.clone(), session_id.clone());
                    (Confirm::Bound, previous.filter(|prev| *prev != session_id))
                }
            }
        };

        if let Some(stale) = stale
            && registry.contains(&stale)
        {
            info!(
                "Session {} supersedes {} for connection {}",
                session_id, stale, profile.id
            );
            self.disconnect_quietly(&stale).await;
        }

        match outcome {
            Confirm::Bound => Ok(tab_id),
            Confirm::SessionGone => Err(AppError::Connect(format!(
                "session {} ended before it could be attached",
                session_id
            ))),
            Confirm::TabGone => {
                debug!("Tab {} closed while connecting, dropping {}", tab_id, session_id);
                self.disconnect_quietly(&session_id).await;
                Err(AppError::InvalidState(format!(
                    "tab {} was closed while connecting",
                    tab_id
                )))
            }
        }
    }

    /// Opens a file browser on the live session bound to `profile`.
    pub fn open_sftp(&self, profile: &ConnectionProfile) -> Result<String> {
        self.open_secondary(
            profile,
            TabKind::Sftp,
            format!("{} (SFTP)", profile.display_name()),
            None,
        )
    }

    /// Opens an editor for `file_path` on the live session bound to `profile`.
    pub fn open_editor(&self, profile: &ConnectionProfile, file_path: &str) -> Result<String> {
        let file_name = Path::new(file_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.to_string());
        self.open_secondary(
            profile,
            TabKind::Editor,
            format!("Edit: {}", file_name),
            Some(file_path.to_string()),
        )
    }

    /// Never creates a session; without a live binding the request fails.
    fn open_secondary(
        &self,
        profile: &ConnectionProfile,
        kind: TabKind,
        name: String,
        file_path: Option<String>,
    ) -> Result<String> {
        let mut state = self.state.lock();
        let session_id = state
            .bindings
            .get(&profile.id)
            .filter(|id| {
                self.dispatcher
                    .registry()
                    .get(id)
                    .is_some_and(|session| session.is_connected())
            })
            .cloned()
            .ok_or_else(|| AppError::NoActiveSession(profile.display_name().to_string()))?;

        let mut tab = Tab::new(kind, &profile.id, session_id, name);
        tab.status = TabStatus::Connected;
        tab.file_path = file_path;
        debug!("Opening {:?} tab on session {}", kind, tab.session_id);
        Ok(state.push_active(tab))
    }

    /// Removes a tab. Only closing a terminal tab disconnects its session.
    pub async fn close_tab(&self, tab_id: &str) -> Result<()> {
        let to_disconnect = {
            let mut state = self.state.lock();
            let index = state
                .tabs
                .iter()
                .position(|tab| tab.id == tab_id)
                .ok_or_else(|| AppError::Validation(format!("Unknown tab {}", tab_id)))?;
            let tab = state.tabs.remove(index);

            if state.active.as_deref() == Some(tab_id) {
                state.active = state.tabs.last().map(|tab| tab.id.clone());
            }

            if tab.kind == TabKind::Terminal {
                if state.bindings.get(&tab.connection_id) == Some(&tab.session_id) {
                    state.bindings.remove(&tab.connection_id);
                }
                Some(tab.session_id)
            } else {
                None
            }
        };

        if let Some(session_id) = to_disconnect {
            self.disconnect_quietly(&session_id).await;
        }
        Ok(())
    }

    async fn disconnect_quietly(&self, session_id: &SessionId) {
        if let Err(e) = self.dispatcher.disconnect(session_id).await {
            warn!("Failed to disconnect {}: {}", session_id, e);
        }
    }

    /// Applies a session event to the tabs bound to it.
    ///
    /// Tabs are never removed here; they only mirror the new status.
    pub fn handle_event(&self, event: &SessionEvent) {
        let SessionEvent::Disconnected { session_id } = event else {
            return;
        };
        let mut state = self.state.lock();
        for tab in state
            .tabs
            .iter_mut()
            .filter(|tab| tab.session_id == *session_id)
        {
            tab.status = TabStatus::Disconnected;
        }
        state.bindings.retain(|_, bound| bound != session_id);
    }

    pub fn bound_session(&self, connection_id: &str) -> Option<SessionId> {
        self.state.lock().bindings.get(connection_id).cloned()
    }

    pub fn tabs(&self) -> Vec<Tab> {
        self.state.lock().tabs.clone()
    }

    pub fn tab(&self, tab_id: &str) -> Option<Tab> {
        self.state
            .lock()
            .tabs
            .iter()
            .find(|tab| tab.id == tab_id)
            .cloned()
    }

    pub fn active_tab(&self) -> Option<Tab> {
        let state = self.state.lock();
        let active = state.active.as_deref()?;
        state.tabs.iter().find(|tab| tab.id == active).cloned()
    }

    pub fn set_active(&self, tab_id: &str) -> bool {
        let mut state = self.state.lock();
        if state.tabs.iter().any(|tab| tab.id == tab_id) {
            state.active = Some(tab_id.to_string());
            true
        } else {
            false
        }
    }
}

enum Confirm {
    Bound,
    SessionGone,
    TabGone,
}
