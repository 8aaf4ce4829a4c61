use crate::error::{RelayError, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// The device's "send one message" primitive.
///
/// One call is one attempt. Implementations resolve exactly once: `Ok(())`
/// when the message left the device, `Err(RelayError::SendFailed)` otherwise.
/// Retrying is the dispatch engine's job, never the sender's.
#[async_trait]
pub trait NativeSender: Send + Sync {
    async fn send(&self, phone_number: &str, body: &str) -> Result<()>;
}

/// Success/failure callback pair handed to a callback-style native API.
///
/// Whichever callback fires first resolves the paired [`PendingSend`]; any
/// later call on either callback (or a clone) is ignored.
#[derive(Clone)]
pub struct SendCallbacks {
    slot: Arc<Mutex<Option<oneshot::Sender<Result<()>>>>>,
}

impl SendCallbacks {
    /// Returns false if the send was already resolved.
    pub fn on_success(&self) -> bool {
        self.resolve(Ok(()))
    }

    /// Returns false if the send was already resolved.
    pub fn on_failure(&self, reason: impl Into<String>) -> bool {
        self.resolve(Err(RelayError::SendFailed(reason.into())))
    }

    fn resolve(&self, result: Result<()>) -> bool {
        match self.slot.lock().unwrap().take() {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => {
                tracing::warn!("[SEND] Ignoring callback for an already resolved send");
                false
            }
        }
    }
}

/// Future side of [`callback_bridge`].
pub struct PendingSend {
    rx: oneshot::Receiver<Result<()>>,
}

impl PendingSend {
    pub async fn wait(self) -> Result<()> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(RelayError::SendFailed(
                "send callbacks dropped without resolving".to_string(),
            )),
        }
    }
}

/// Adapt a dual-callback send API into a single-resolution future.
pub fn callback_bridge() -> (SendCallbacks, PendingSend) {
    let (tx, rx) = oneshot::channel();
    (
        SendCallbacks {
            slot: Arc::new(Mutex::new(Some(tx))),
        },
        PendingSend { rx },
    )
}

/// Sends by running an external program as `<program> [args..] <phone> <body>`.
/// Exit status 0 means the message was handed off.
#[derive(Debug, Clone)]
pub struct CommandSender {
    program: String,
    args: Vec<String>,
}

impl CommandSender {
    /// `command_line` is split on whitespace: the first word is the program,
    /// the rest are leading arguments.
    pub fn new(command_line: &str) -> Result<Self> {
        let mut words = command_line.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| RelayError::Config("send command is empty".to_string()))?;

        Ok(Self {
            program,
            args: words.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl NativeSender for CommandSender {
    async fn send(&self, phone_number: &str, body: &str) -> Result<()> {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(phone_number)
            .arg(body)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                RelayError::SendFailed(format!("failed to run {}: {}", self.program, e))
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(RelayError::SendFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )))
        }
    }
}
