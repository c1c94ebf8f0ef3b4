pub mod config;
pub mod filesystem;
pub mod session;
pub mod ssh;

mod binder;
mod dispatcher;
mod error;
mod events;
mod transfer;
mod transport;
mod utils;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use binder::{Tab, TabBinder, TabKind, TabStatus};
pub use config::{AppSettings, ConfigManager, ConnectionProfile, Credential};
pub use dispatcher::{CommandDispatcher, Payload, Request, Response};
pub use error::{AppError, ErrorKind, Result};
pub use events::{SessionEvent, TransportEvent};
pub use filesystem::{FileEntry, FileType, RemoteEntry, SftpClient, SftpConnector};
pub use session::{BroadcastOutcome, Session, SessionId, SessionRegistry, SessionState};
pub use ssh::{SshConnector, SshShell};
pub use transfer::with_transfer_session;
pub use transport::{PtySize, ShellConnector, ShellTransport, TransferClient, TransferConnector};
pub use utils::{expand_tilde, init_tracing};

pub type SshRegistry = SessionRegistry<SshConnector>;
pub type SshDispatcher = CommandDispatcher<SshConnector, SftpConnector>;
pub type SshTabBinder = TabBinder<SshConnector, SftpConnector>;
