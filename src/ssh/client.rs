//! SSH transport built on russh

use super::{ExitOutcome, OutputChunk, OutputSink, RemoteGateway, SshTarget};
use crate::error::{FleetError, Result};
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Client-side session handler
struct SessionHandler;

#[async_trait]
impl client::Handler for SessionHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        debug!("Server key fingerprint: {}", server_public_key.fingerprint());
        Ok(true)
    }
}

/// Remote gateway over SSH with public key authentication
pub struct RusshGateway {
    config: Arc<client::Config>,
    connect_timeout: Duration,
}

impl RusshGateway {
    pub fn new(connect_timeout: Duration) -> Self {
        let config = client::Config {
            keepalive_interval: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
            connect_timeout,
        }
    }

    async fn connect(&self, target: &SshTarget, private_key: &str) -> Result<Handle<SessionHandler>> {
        let key_pair = decode_key(private_key)?;
        let mut session = self.open_transport(target).await?;

        let authenticated = match session
            .authenticate_publickey(target.username.as_str(), Arc::new(key_pair))
            .await
        {
            Ok(authenticated) => authenticated,
            Err(e) => {
                close(&mut session).await;
                return Err(FleetError::Transport(e.to_string()));
            }
        };

        if !authenticated {
            close(&mut session).await;
            return Err(FleetError::Auth(format!(
                "public key rejected for {}@{} (client-authentication)",
                target.username, target.host
            )));
        }

        Ok(session)
    }

    async fn open_transport(&self, target: &SshTarget) -> Result<Handle<SessionHandler>> {
        let addr = (target.host.as_str(), target.port);
        let connecting = client::connect(self.config.clone(), addr, SessionHandler);
        tokio::time::timeout(self.connect_timeout, connecting)
            .await
            .map_err(|_| {
                FleetError::Transport(format!(
                    "timed out connecting to {}:{} after {:?}",
                    target.host, target.port, self.connect_timeout
                ))
            })?
            .map_err(|e| FleetError::Transport(e.to_string()))
    }
}

fn decode_key(private_key: &str) -> Result<key::KeyPair> {
    russh_keys::decode_secret_key(private_key, None)
        .map_err(|e| FleetError::Auth(format!("{} (client-authentication)", e)))
}

/// Decodes a byte stream into text without splitting multi-byte characters
/// that straddle two packets
#[derive(Debug, Default)]
struct Utf8Stream {
    pending: Vec<u8>,
}

impl Utf8Stream {
    /// Append `data` and return the text that is complete so far
    fn push(&mut self, data: &[u8]) -> String {
        self.pending.extend_from_slice(data);

        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    return text;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Invalid bytes in the middle of the stream
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        // Incomplete character at the end, wait for more
                        None => {
                            self.pending.drain(..valid);
                            return text;
                        }
                    }
                }
            }
        }
    }

    /// Whatever is left once the stream has ended
    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

impl Default for RusshGateway {
    fn default() -> Self {
        Self::new(Duration::from_secs(20))
    }
}

#[async_trait]
impl RemoteGateway for RusshGateway {
    async fn exec(&self, target: &SshTarget, command: &str, output: OutputSink) -> Result<ExitOutcome> {
        let private_key = target.require_key()?;

        info!("Opening SSH session to {}@{}:{}", target.username, target.host, target.port);
        let mut session = self.connect(target, private_key).await?;

        let result = run_command(&mut session, command, &output).await;
        close(&mut session).await;

        match &result {
            Ok(outcome) => debug!(
                "SSH session to {} finished with {:?}",
                target.host, outcome.exit_status
            ),
            Err(e) => warn!("SSH session to {} failed: {}", target.host, e),
        }
        result
    }
}

async fn run_command(
    session: &mut Handle<SessionHandler>,
    command: &str,
    output: &OutputSink,
) -> Result<ExitOutcome> {
    let mut channel = session
        .channel_open_session()
        .await
        .map_err(|e| FleetError::Transport(e.to_string()))?;
    channel
        .exec(true, command)
        .await
        .map_err(|e| FleetError::Transport(e.to_string()))?;

    let mut outcome = ExitOutcome::default();
    let mut stdout = Utf8Stream::default();
    let mut stderr = Utf8Stream::default();
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => {
                forward(output, OutputChunk::Stdout(stdout.push(data)));
            }
            ChannelMsg::ExtendedData { ref data, .. } => {
                forward(output, OutputChunk::Stderr(stderr.push(data)));
            }
            ChannelMsg::ExitStatus { exit_status } => {
                outcome.exit_status = Some(exit_status);
            }
            ChannelMsg::ExitSignal { signal_name, .. } => {
                outcome.signal = Some(format!("{:?}", signal_name));
            }
            _ => {}
        }
    }
    forward(output, OutputChunk::Stdout(stdout.finish()));
    forward(output, OutputChunk::Stderr(stderr.finish()));

    Ok(outcome)
}

fn forward(output: &OutputSink, chunk: OutputChunk) {
    if !chunk.text().is_empty() {
        let _ = output.send(chunk);
    }
}

/// Close the session. Called once per opened session on every path.
async fn close(session: &mut Handle<SessionHandler>) {
    if let Err(e) = session
        .disconnect(Disconnect::ByApplication, "", "English")
        .await
    {
        debug!("Error while closing SSH session: {}", e);
    }
}
