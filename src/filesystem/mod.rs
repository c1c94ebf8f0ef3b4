//! File listings and the SFTP transfer client.

pub mod entry;
pub mod local;
pub mod sftp;

pub use entry::{FileEntry, FileType, RemoteEntry};
pub use sftp::{SftpClient, SftpConnector};
