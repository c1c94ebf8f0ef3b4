//! sshmux command line client.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use sshmux::{
    AppError, AppSettings, CommandDispatcher, ConfigManager, ConnectionProfile, Credential,
    FileEntry, FileType, Result, SessionEvent, SessionRegistry, SftpConnector, SshConnector,
    SshDispatcher, TabBinder, init_tracing,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Multiplexed SSH shell and SFTP sessions.
#[derive(Parser, Debug)]
#[command(name = "sshmux")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[arg(long, global = true, default_value = "sshmux.log", value_name = "FILE")]
    log_file: PathBuf,

    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Open an interactive shell; stdin lines are sent to the remote
    Shell {
        #[command(flatten)]
        target: Target,
    },

    /// List a remote directory
    Ls {
        #[command(flatten)]
        target: Target,

        /// Remote path (defaults to /)
        path: Option<String>,
    },

    /// Copy a local file to the remote host
    Upload {
        #[command(flatten)]
        target: Target,
        local: PathBuf,
        remote: String,
    },

    /// Copy a remote file to the local machine
    Download {
        #[command(flatten)]
        target: Target,
        remote: String,
        local: PathBuf,
    },

    /// List a local directory
    Lls {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Run one command on several hosts at once
    Broadcast {
        /// Command line sent to every session
        #[arg(short = 'c', long)]
        command: String,

        /// Destinations, `user@host[:port]` or saved connection names
        #[arg(required = true, num_args = 1..)]
        destinations: Vec<String>,

        /// Seconds to collect output before disconnecting
        #[arg(long, default_value = "2")]
        wait: u64,

        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Manage saved connections
    #[command(subcommand)]
    Connections(ConnectionsCommands),
}

#[derive(Subcommand, Debug, Clone)]
enum ConnectionsCommands {
    /// List saved connections
    List,

    /// Save a connection (credentials are not stored)
    Add {
        /// `user@host[:port]`
        destination: String,

        #[arg(short, long)]
        name: Option<String>,
    },

    /// Remove a saved connection by id or name
    Remove { id: String },
}

#[derive(Args, Debug, Clone)]
struct Target {
    /// `user@host[:port]` or the name of a saved connection
    destination: String,

    #[command(flatten)]
    auth: AuthArgs,
}

#[derive(Args, Debug, Clone, Default)]
struct AuthArgs {
    /// Override the port
    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    password: Option<String>,

    /// Private key file
    #[arg(short = 'i', long, value_name = "FILE")]
    identity: Option<String>,

    /// Passphrase for the private key
    #[arg(long)]
    passphrase: Option<String>,
}

impl AuthArgs {
    fn credential(&self) -> Option<Credential> {
        if let Some(path) = &self.identity {
            return Some(Credential::KeyFile {
                path: path.clone(),
                passphrase: self.passphrase.clone(),
            });
        }
        self.password.as_ref().map(|password| Credential::Password {
            password: password.clone(),
        })
    }
}

fn parse_destination(destination: &str, default_port: u16) -> Result<ConnectionProfile> {
    let (username, host_port) = destination.split_once('@').ok_or_else(|| {
        AppError::Validation(format!(
            "'{}' is neither a saved connection nor user@host[:port]",
            destination
        ))
    })?;
    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| AppError::Validation(format!("Invalid port '{}'", port)))?;
            (host, port)
        }
        None => (host_port, default_port),
    };
    let profile = ConnectionProfile::new(
        host.to_string(),
        port,
        username.to_string(),
        Credential::None,
    );
    profile.validate()?;
    Ok(profile)
}

fn resolve_profile(
    config: &ConfigManager,
    destination: &str,
    auth: &AuthArgs,
) -> Result<ConnectionProfile> {
    let mut profile = match config.find_connection(destination) {
        Some(saved) => saved.clone(),
        None => parse_destination(destination, config.settings().default_port)?,
    };
    if let Some(port) = auth.port {
        profile.port = port;
    }
    if let Some(credential) = auth.credential() {
        profile.credential = credential;
    }
    Ok(profile)
}

fn print_listing(files: &[FileEntry]) {
    for file in files {
        let kind = match file.file_type {
            FileType::Directory => "d",
            FileType::File => "-",
        };
        println!(
            "{} {:>12} {} {}",
            kind,
            file.size,
            file.modified.format("%Y-%m-%d %H:%M"),
            file.name
        );
    }
}

async fn run_shell(
    dispatcher: Arc<SshDispatcher>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    profile: ConnectionProfile,
) -> Result<()> {
    let binder = TabBinder::new(Arc::clone(&dispatcher));
    let tab_id = binder.open_terminal(&profile).await?;
    let session_id = binder
        .tab(&tab_id)
        .map(|tab| tab.session_id)
        .ok_or_else(|| AppError::InvalidState(format!("tab {} vanished", tab_id)))?;
    info!("Shell {} open on {}", session_id, profile.host_port());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                binder.handle_event(&event);
                if event.session_id() != &session_id {
                    continue;
                }
                match event {
                    SessionEvent::Data { data, .. } => {
                        stdout.write_all(&data).await?;
                        stdout.flush().await?;
                    }
                    SessionEvent::Error { error, .. } => eprintln!("sshmux: {}", error),
                    SessionEvent::Disconnected { .. } => break,
                }
            }
            line = stdin.next_line() => match line? {
                Some(line) => {
                    let mut input = line.into_bytes();
                    input.push(b'\n');
                    dispatcher.write(&session_id, &input).await?;
                }
                None => {
                    binder.close_tab(&tab_id).await?;
                    break;
                }
            },
        }
    }
    Ok(())
}

async fn run_broadcast(
    dispatcher: Arc<SshDispatcher>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    profiles: Vec<ConnectionProfile>,
    command: String,
    wait: Duration,
) -> Result<()> {
    let mut names = std::collections::HashMap::new();
    for profile in &profiles {
        match dispatcher.create_session(None, profile).await {
            Ok(id) => {
                names.insert(id, profile.display_name().to_string());
            }
            Err(e) => eprintln!("{}: {}", profile.display_name(), e),
        }
    }

    let line = format!("{}\n", command);
    for outcome in dispatcher.broadcast(&line).await {
        if let Some(error) = outcome.error {
            let name = names.get(&outcome.session_id).map(String::as_str).unwrap_or("?");
            eprintln!("{}: {}", name, error);
        }
    }

    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Some(SessionEvent::Data { session_id, data }) => {
                    let name = names.get(&session_id).map(String::as_str).unwrap_or("?");
                    for line in String::from_utf8_lossy(&data).lines() {
                        println!("[{}] {}", name, line);
                    }
                }
                Some(_) => {}
                None => break,
            },
        }
    }
    Ok(())
}

fn run_connections(config: &mut ConfigManager, command: ConnectionsCommands) -> Result<()> {
    match command {
        ConnectionsCommands::List => {
            for conn in config.connections() {
                let last_used = conn
                    .last_used
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{}  {}@{}  last used {}",
                    conn.display_name(),
                    conn.username,
                    conn.host_port(),
                    last_used
                );
            }
        }
        ConnectionsCommands::Add { destination, name } => {
            let mut profile = parse_destination(&destination, config.settings().default_port)?;
            if let Some(name) = name {
                profile.name = name;
            }
            config.add_connection(profile)?;
        }
        ConnectionsCommands::Remove { id } => {
            let id = config
                .find_connection(&id)
                .map(|c| c.id.clone())
                .unwrap_or(id);
            config.remove_connection(&id)?;
        }
    }
    Ok(())
}

async fn run(
    command: Commands,
    config: &mut ConfigManager,
    dispatcher: Arc<SshDispatcher>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
) -> Result<()> {
    match command {
        Commands::Shell { target } => {
            let profile = resolve_profile(config, &target.destination, &target.auth)?;
            config.touch_last_used(&profile.id)?;
            run_shell(dispatcher, events, profile).await
        }
        Commands::Ls { target, path } => {
            let profile = resolve_profile(config, &target.destination, &target.auth)?;
            let files = dispatcher.list_directory(&profile, path.as_deref()).await?;
            print_listing(&files);
            Ok(())
        }
        Commands::Upload {
            target,
            local,
            remote,
        } => {
            let profile = resolve_profile(config, &target.destination, &target.auth)?;
            dispatcher.upload(&profile, &local, &remote).await
        }
        Commands::Download {
            target,
            remote,
            local,
        } => {
            let profile = resolve_profile(config, &target.destination, &target.auth)?;
            dispatcher.download(&profile, &remote, &local).await
        }
        Commands::Lls { path } => {
            let files = dispatcher.list_local_directory(&path).await?;
            print_listing(&files);
            Ok(())
        }
        Commands::Broadcast {
            command,
            destinations,
            wait,
            auth,
        } => {
            let profiles = destinations
                .iter()
                .map(|d| resolve_profile(config, d, &auth))
                .collect::<Result<Vec<_>>>()?;
            run_broadcast(
                dispatcher,
                events,
                profiles,
                command,
                Duration::from_secs(wait),
            )
            .await
        }
        Commands::Connections(command) => run_connections(config, command),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, &cli.log_file)?;

    let mut config = match &cli.config {
        Some(path) => ConfigManager::with_path(path)?,
        None => ConfigManager::new()?,
    };
    let settings: AppSettings = config.settings().clone();

    let registry = Arc::new(SessionRegistry::new(
        SshConnector::new(settings.clone()),
        settings.clone(),
    ));
    let (dispatcher, events) =
        CommandDispatcher::new(Arc::clone(&registry), SftpConnector::new(settings));

    let result = run(cli.command, &mut config, Arc::new(dispatcher), events).await;

    registry.shutdown().await;
    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}
