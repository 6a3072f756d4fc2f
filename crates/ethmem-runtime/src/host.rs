//! Transports to the isolated model host.
//!
//! [`ProcessTransport`] runs the host as a child process and exchanges
//! length-prefixed JSON frames over its stdin/stdout. [`InProcessTransport`]
//! hands requests to a channel, for hosts living in the same process.

use async_trait::async_trait;
use ethmem_wire::codec::{read_frame, write_frame};
use ethmem_wire::model_rpc::{ModelEvent, ModelEventKind, ModelRequest};
use ethmem_wire::WireError;
use std::process::Stdio;
use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::lifecycle::{ModelError, ModelTransport};

/// Forward frames read from `reader` into `events` until EOF. A lost host
/// is reported as a `HOST_ERROR` event.
pub fn spawn_event_reader<R>(mut reader: R, events: mpsc::Sender<ModelEvent>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match read_frame::<_, ModelEvent>(&mut reader).await {
                Ok(event) => {
                    if events.send(event).await.is_err() {
                        debug!("Model event receiver dropped");
                        return;
                    }
                }
                Err(WireError::Json(e)) => {
                    warn!(error = %e, "Skipping malformed model host frame");
                }
                Err(e) => {
                    let reason = match e {
                        WireError::ConnectionClosed => "model host exited".to_string(),
                        other => other.to_string(),
                    };
                    warn!(reason = %reason, "Model host stream ended");
                    let mut lost = ModelEvent::new(ModelEventKind::HostError, None);
                    lost.error = Some(reason);
                    let _ = events.send(lost).await;
                    return;
                }
            }
        }
    });
}

/// Model host running as a child process.
pub struct ProcessTransport {
    command: String,
    args: Vec<String>,
    events: mpsc::Sender<ModelEvent>,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
}

impl ProcessTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>, events: mpsc::Sender<ModelEvent>) -> Self {
        Self {
            command: command.into(),
            args,
            events,
            stdin: Mutex::new(None),
            child: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ModelTransport for ProcessTransport {
    async fn boot(&self) -> Result<(), ModelError> {
        let mut stdin = self.stdin.lock().await;
        let mut running = self.child.lock().await;
        let alive = match running.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        };
        if alive && stdin.is_some() {
            return Ok(());
        }
        if running.take().is_some() {
            info!(command = %self.command, "Restarting model host");
        }
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!(command = %self.command, error = %e, "Failed to start model host");
                ModelError::HostUnavailable(e.to_string())
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ModelError::HostUnavailable("host stdout not captured".into()))?;
        *stdin = Some(
            child
                .stdin
                .take()
                .ok_or_else(|| ModelError::HostUnavailable("host stdin not captured".into()))?,
        );
        spawn_event_reader(stdout, self.events.clone());
        info!(command = %self.command, pid = ?child.id(), "Model host started");
        *running = Some(child);
        Ok(())
    }

    async fn send(&self, request: ModelRequest) -> Result<(), ModelError> {
        let mut stdin = self.stdin.lock().await;
        let writer = stdin
            .as_mut()
            .ok_or_else(|| ModelError::HostUnavailable("model host not started".into()))?;
        if let Err(e) = write_frame(writer, &request).await {
            // A broken pipe means the host is gone; the next boot restarts it.
            *stdin = None;
            return Err(ModelError::Transport(e.to_string()));
        }
        Ok(())
    }
}

/// Model host reachable through a channel in the same process.
pub struct InProcessTransport {
    requests: mpsc::Sender<ModelRequest>,
}

impl InProcessTransport {
    /// Transport plus the receiving end the host reads from.
    pub fn new() -> (Self, mpsc::Receiver<ModelRequest>) {
        let (requests, rx) = mpsc::channel(64);
        (Self { requests }, rx)
    }
}

#[async_trait]
impl ModelTransport for InProcessTransport {
    async fn send(&self, request: ModelRequest) -> Result<(), ModelError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| ModelError::HostUnavailable("in-process host stopped".into()))
    }
}
