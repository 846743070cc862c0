//! Restart and shutdown requests handed to the hosting process.
//!
//! The service only records what was asked. Whoever owns the process
//! subscribes, shuts the server down gracefully, and then exits or
//! re-executes itself.

use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use tts_core::TtsError;

/// Process-level command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Re-execute the process with the same arguments.
    Restart,
    /// Terminate the process.
    Exit,
}

impl FromStr for ControlCommand {
    type Err = TtsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restart" => Ok(Self::Restart),
            "exit" => Ok(Self::Exit),
            _ => Err(TtsError::invalid_input(format!("unknown command: {s}"))),
        }
    }
}

/// Shared handle for issuing and observing control commands.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: Arc<watch::Sender<Option<ControlCommand>>>,
}

impl Default for ControlHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Ask the host to restart the process.
    pub fn request_restart(&self) {
        self.request(ControlCommand::Restart);
    }

    /// Ask the host to shut the process down.
    pub fn request_shutdown(&self) {
        self.request(ControlCommand::Exit);
    }

    /// Record `command`. A later command replaces an unhandled earlier one.
    pub fn request(&self, command: ControlCommand) {
        info!(command = ?command, "control command requested");
        self.tx.send_replace(Some(command));
    }

    /// Most recent command, if any.
    pub fn pending(&self) -> Option<ControlCommand> {
        *self.tx.borrow()
    }

    /// Watch for commands.
    pub fn subscribe(&self) -> watch::Receiver<Option<ControlCommand>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        assert_eq!("restart".parse::<ControlCommand>().unwrap(), ControlCommand::Restart);
        assert_eq!("exit".parse::<ControlCommand>().unwrap(), ControlCommand::Exit);
        assert!("reboot".parse::<ControlCommand>().is_err());
    }

    #[tokio::test]
    async fn test_subscriber_sees_request() {
        let handle = ControlHandle::new();
        let mut rx = handle.subscribe();
        assert_eq!(handle.pending(), None);

        handle.request_shutdown();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(ControlCommand::Exit));
    }
}
