//! Remote execution gateway
//!
//! One invocation opens exactly one remote-shell session, runs one command,
//! pushes stdout/stderr chunks to the caller as they arrive and resolves with
//! the remote exit outcome. There is no retry and no cancellation: a session
//! runs until the remote process ends or the transport fails.

pub mod client;

use crate::error::{FleetError, Result};
use crate::model::{Server, ServerRepository};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use client::RusshGateway;

/// Where to connect and as whom
#[derive(Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Private key material; `None` is a configuration error
    pub private_key: Option<Arc<str>>,
}

impl std::fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SshTarget {
    /// Resolve a server's connection details through the key store
    pub async fn for_server(repo: &dyn ServerRepository, server: &Server) -> Result<Self> {
        let private_key = match &server.ssh_key_id {
            Some(key_id) => repo.find_ssh_key(key_id).await?.map(|key| key.private_key),
            None => None,
        };

        Ok(Self {
            host: server.ip_address.clone(),
            port: server.port,
            username: server.username.clone(),
            private_key,
        })
    }

    /// The key material, or the configuration error raised before any I/O
    pub fn require_key(&self) -> Result<&str> {
        self.private_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                FleetError::Config("No SSH Key found, please assign one to this server".to_string())
            })
    }
}

/// A chunk of remote output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(String),
    Stderr(String),
}

impl OutputChunk {
    pub fn text(&self) -> &str {
        match self {
            OutputChunk::Stdout(text) | OutputChunk::Stderr(text) => text,
        }
    }
}

/// Push-based output stream; unbounded, so the remote side is never throttled
pub type OutputSink = mpsc::UnboundedSender<OutputChunk>;

/// How the remote process ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitOutcome {
    pub exit_status: Option<u32>,
    pub signal: Option<String>,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// Runs a command on a remote host
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn exec(&self, target: &SshTarget, command: &str, output: OutputSink) -> Result<ExitOutcome>;
}

/// Captured output of a completed remote command
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
    pub outcome: ExitOutcome,
}

/// Run a command and collect its output instead of streaming it
pub async fn capture(gateway: &dyn RemoteGateway, target: &SshTarget, command: &str) -> Result<Captured> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = gateway.exec(target, command, tx).await?;

    let mut captured = Captured {
        outcome,
        ..Default::default()
    };
    while let Ok(chunk) = rx.try_recv() {
        match chunk {
            OutputChunk::Stdout(text) => captured.stdout.push_str(&text),
            OutputChunk::Stderr(text) => captured.stderr.push_str(&text),
        }
    }
    Ok(captured)
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    /// Scripted response for one command
    #[derive(Debug, Clone, Default)]
    pub struct Reply {
        pub stdout: String,
        pub stderr: String,
        pub exit_status: u32,
    }

    /// Gateway double that records commands and replays canned replies
    #[derive(Default)]
    pub struct FakeGateway {
        pub commands: Mutex<Vec<String>>,
        replies: Mutex<Vec<(String, Reply)>>,
        fail_with: Mutex<Option<fn() -> FleetError>>,
    }

    impl FakeGateway {
        pub fn new() -> Self {
            Self::default()
        }

        /// Reply to any command containing `needle`
        pub fn reply(&self, needle: &str, reply: Reply) {
            self.replies.lock().unwrap().push((needle.to_string(), reply));
        }

        pub fn fail(&self, error: fn() -> FleetError) {
            *self.fail_with.lock().unwrap() = Some(error);
        }

        pub fn calls(&self) -> usize {
            self.commands.lock().unwrap().len()
        }

        pub fn recorded(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteGateway for FakeGateway {
        async fn exec(&self, target: &SshTarget, command: &str, output: OutputSink) -> Result<ExitOutcome> {
            target.require_key()?;
            self.commands.lock().unwrap().push(command.to_string());

            if let Some(error) = *self.fail_with.lock().unwrap() {
                return Err(error());
            }

            let reply = self
                .replies
                .lock()
                .unwrap()
                .iter()
                .find(|(needle, _)| command.contains(needle.as_str()))
                .map(|(_, reply)| reply.clone())
                .unwrap_or_default();

            if !reply.stdout.is_empty() {
                let _ = output.send(OutputChunk::Stdout(reply.stdout));
            }
            if !reply.stderr.is_empty() {
                let _ = output.send(OutputChunk::Stderr(reply.stderr));
            }
            Ok(ExitOutcome {
                exit_status: Some(reply.exit_status),
                signal: None,
            })
        }
    }
}
