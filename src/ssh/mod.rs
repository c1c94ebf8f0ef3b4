//! russh-backed shell transport.

pub mod client;
pub mod shell;

pub use client::{SshHandle, SshHandler, connect_authenticated};
pub use shell::{SshConnector, SshShell};
