use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, AuthResult, KeyboardInteractiveAuthResponse};
use russh::keys::{self, PrivateKeyWithHashAlg, ssh_key};
use russh::{Disconnect, MethodKind};
use tracing::{debug, info, warn};

use crate::config::{AppSettings, ConnectionProfile, Credential};
use crate::error::{AppError, Result};
use crate::utils::expand_tilde;

pub struct SshHandler;

impl client::Handler for SshHandler {
    type Error = AppError;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

pub type SshHandle = client::Handle<SshHandler>;

/// Connects and authenticates, bounded by `connection_timeout`.
///
/// `inactivity_timeout` is left unset for interactive shells.
pub async fn connect_authenticated(
    profile: &ConnectionProfile,
    settings: &AppSettings,
    inactivity_timeout: Option<Duration>,
) -> Result<SshHandle> {
    let deadline = Duration::from_secs(settings.connection_timeout.max(1));
    match tokio::time::timeout(deadline, connect_inner(profile, inactivity_timeout)).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Connect(format!(
            "{}: timed out after {}s",
            profile.host_port(),
            deadline.as_secs()
        ))),
    }
}

async fn connect_inner(
    profile: &ConnectionProfile,
    inactivity_timeout: Option<Duration>,
) -> Result<SshHandle> {
    let config = Arc::new(client::Config {
        inactivity_timeout,
        ..Default::default()
    });

    let mut session = client::connect(config, profile.host_port(), SshHandler)
        .await
        .map_err(|e| AppError::Connect(format!("{}: {}", profile.host_port(), e)))?;
    debug!("SSH handshake with {} complete", profile.host_port());

    if let Err(e) = authenticate(&mut session, profile).await {
        if let Err(err) = session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!("Disconnect after failed auth: {}", err);
        }
        return Err(e);
    }

    info!("Authenticated {}@{}", profile.username, profile.host_port());
    Ok(session)
}

async fn authenticate(session: &mut SshHandle, profile: &ConnectionProfile) -> Result<()> {
    let username = &profile.username;

    let auth_result = session.authenticate_none(username).await?;
    let remaining = match auth_result {
        AuthResult::Success => return Ok(()),
        AuthResult::Failure {
            remaining_methods, ..
        } => remaining_methods,
    };

    match &profile.credential {
        Credential::None => Err(AppError::Authentication(
            "server requires credentials".to_string(),
        )),
        Credential::Password { password } => {
            if remaining.contains(&MethodKind::KeyboardInteractive)
                && keyboard_interactive(session, username, password).await?
            {
                return Ok(());
            }
            let auth_result = session.authenticate_password(username, password).await?;
            if !auth_result.success() {
                return Err(AppError::Authentication(
                    "Authentication failed".to_string(),
                ));
            }
            Ok(())
        }
        Credential::PrivateKey { key, passphrase } => {
            let private_key = keys::decode_secret_key(key, passphrase.as_deref())
                .map_err(|e| AppError::Authentication(e.to_string()))?;
            publickey(session, username, private_key).await
        }
        Credential::KeyFile { path, passphrase } => {
            let key_path = expand_tilde(path)?;
            let private_key = keys::load_secret_key(&key_path, passphrase.as_deref())
                .map_err(|e| AppError::Authentication(format!("{}: {}", key_path.display(), e)))?;
            publickey(session, username, private_key).await
        }
    }
}

async fn keyboard_interactive(
    session: &mut SshHandle,
    username: &str,
    password: &str,
) -> Result<bool> {
    let mut step = session
        .authenticate_keyboard_interactive_start(username, None)
        .await?;

    loop {
        match step {
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::Failure { .. } => {
                warn!("Keyboard-interactive auth rejected for {}", username);
                return Ok(false);
            }
            KeyboardInteractiveAuthResponse::InfoRequest { ref prompts, .. } => {
                let responses = prompts
                    .iter()
                    .map(|p| if p.echo { String::new() } else { password.to_string() })
                    .collect();
                step = session
                    .authenticate_keyboard_interactive_respond(responses)
                    .await?;
            }
        }
    }
}

async fn publickey(
    session: &mut SshHandle,
    username: &str,
    private_key: keys::PrivateKey,
) -> Result<()> {
    let algo = session.best_supported_rsa_hash().await?.flatten();
    let key = PrivateKeyWithHashAlg::new(Arc::new(private_key), algo);

    let auth_result = session.authenticate_publickey(username, key).await?;
    if !auth_result.success() {
        return Err(AppError::Authentication(
            "Public key authentication failed".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires a running ssh server"]
    async fn test_connect_docker() {
        let profile = ConnectionProfile::new(
            "127.0.0.1".to_string(),
            2222,
            "dockeruser".to_string(),
            Credential::Password {
                password: "dockerpass".to_string(),
            },
        );
        let handle = connect_authenticated(&profile, &AppSettings::default(), None)
            .await
            .unwrap();
        handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_connect_error() {
        let profile = ConnectionProfile::new(
            "127.0.0.1".to_string(),
            1,
            "nobody".to_string(),
            Credential::None,
        );
        let settings = AppSettings {
            connection_timeout: 2,
            ..Default::default()
        };
        let err = connect_authenticated(&profile, &settings, None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Connect);
    }
}
