//! Command dispatcher
//!
//! Turns a resolved command into wire messages and writes them to the
//! instrument's port. Transport failures never escape: every call ends in a
//! [`DispatchResult`] for the feedback controller.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::commands;
use crate::error::{ErrorKind, PortError};
use crate::mapping::{CommandKind, ResolvedCommand, VolumeAction};
use crate::midi::CcMessage;
use crate::ports::{PortName, PortRegistry};
use crate::volume::VolumeModel;

/// Outcome of one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchResult {
    pub success: bool,
    pub error: Option<ErrorKind>,
}

impl DispatchResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(kind: ErrorKind) -> Self {
        Self {
            success: false,
            error: Some(kind),
        }
    }
}

impl From<Result<(), ErrorKind>> for DispatchResult {
    fn from(result: Result<(), ErrorKind>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(kind) => Self::failed(kind),
        }
    }
}

/// Values used for plain (non-volume) CC keys and volume steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub cc_value: u8,
    pub cc_channel: u8,
    pub volume_step: u8,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            cc_value: 64,
            cc_channel: 0,
            volume_step: 1,
        }
    }
}

pub struct CommandDispatcher {
    registry: Arc<PortRegistry>,
    volume: Arc<VolumeModel>,
    port: PortName,
    settings: DispatchSettings,
}

impl CommandDispatcher {
    pub fn new(
        registry: Arc<PortRegistry>,
        volume: Arc<VolumeModel>,
        port: impl Into<PortName>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            registry,
            volume,
            port: port.into(),
            settings,
        }
    }

    /// Send a resolved command; blocks only on the port's write lock
    pub fn dispatch(&self, command: &ResolvedCommand) -> DispatchResult {
        let result = match command.kind {
            CommandKind::Pedal(code) | CommandKind::Tab(code) => {
                self.send_frames(&commands::press_release(code))
            },
            CommandKind::Cc { controller } => self.send_cc(CcMessage::new(
                self.settings.cc_channel,
                controller,
                self.settings.cc_value,
            )),
            CommandKind::Volume(action) => self.dispatch_volume(action),
        };

        match result {
            Ok(()) => info!("Sent {} for key {}", command, command.index),
            Err(kind) => error!("Failed to send {} for key {}: {}", command, command.index, kind),
        }
        result.into()
    }

    fn dispatch_volume(&self, action: VolumeAction) -> Result<(), ErrorKind> {
        let step = self.settings.volume_step;
        let cc = match action {
            VolumeAction::Select(source) => Ok(self.volume.select(source)),
            VolumeAction::Up => self.volume.increment(step),
            VolumeAction::Down => self.volume.decrement(step),
            VolumeAction::ToggleMute => self.volume.toggle_mute(),
        }
        .map_err(|e| {
            warn!("Volume {:?} ignored: {}", action, e);
            ErrorKind::from(e)
        })?;

        self.send_cc(cc)
    }

    fn send_cc(&self, cc: CcMessage) -> Result<(), ErrorKind> {
        self.registry
            .send(&self.port, &cc.encode())
            .map_err(|e| self.port_failure(e))?;
        info!("→ {}", cc);
        Ok(())
    }

    fn send_frames(&self, frames: &[Vec<u8>]) -> Result<(), ErrorKind> {
        self.registry
            .send_all(&self.port, frames)
            .map_err(|e| self.port_failure(e))
    }

    fn port_failure(&self, e: PortError) -> ErrorKind {
        warn!("MIDI port '{}': {}", self.port, e);
        ErrorKind::from(&e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MemoryBackend;
    use crate::volume::VolumeSource;

    const PORT: &str = "USB MIDI Device";

    fn setup() -> (CommandDispatcher, MemoryBackend) {
        let backend = MemoryBackend::new([PORT]);
        let registry = Arc::new(PortRegistry::new(Arc::new(backend.clone())));
        registry.open(Some(PORT)).unwrap();
        let dispatcher = CommandDispatcher::new(
            registry,
            Arc::new(VolumeModel::new()),
            PORT,
            DispatchSettings::default(),
        );
        (dispatcher, backend)
    }

    fn cmd(kind: CommandKind) -> ResolvedCommand {
        ResolvedCommand {
            index: 0,
            name: "test".to_string(),
            kind,
        }
    }

    fn sent(backend: &MemoryBackend) -> Vec<Vec<u8>> {
        backend.writes().into_iter().map(|w| w.bytes).collect()
    }

    #[test]
    fn test_pedal_sends_on_then_off() {
        let (dispatcher, backend) = setup();
        let result = dispatcher.dispatch(&cmd(CommandKind::Pedal(0x12)));

        assert_eq!(result, DispatchResult::ok());
        assert_eq!(
            sent(&backend),
            vec![
                vec![0xF0, 0x43, 0x00, 0x12, 0x7F, 0xF7],
                vec![0xF0, 0x43, 0x00, 0x12, 0x00, 0xF7],
            ]
        );
    }

    #[test]
    fn test_cc_uses_configured_value_and_channel() {
        let (dispatcher, backend) = setup();
        dispatcher.dispatch(&cmd(CommandKind::Cc { controller: 0x66 }));
        assert_eq!(sent(&backend), vec![vec![0xB0, 0x66, 64]]);
    }

    #[test]
    fn test_volume_select_then_step() {
        let (dispatcher, backend) = setup();
        dispatcher.dispatch(&cmd(CommandKind::Volume(VolumeAction::Select(
            VolumeSource::Voice1,
        ))));
        dispatcher.dispatch(&cmd(CommandKind::Volume(VolumeAction::Up)));
        dispatcher.dispatch(&cmd(CommandKind::Volume(VolumeAction::ToggleMute)));

        assert_eq!(
            sent(&backend),
            vec![vec![0xBE, 0x72, 80], vec![0xBE, 0x72, 81], vec![0xBE, 0x72, 0]]
        );
    }

    #[test]
    fn test_volume_step_without_selection_fails() {
        let (dispatcher, backend) = setup();
        let result = dispatcher.dispatch(&cmd(CommandKind::Volume(VolumeAction::Down)));

        assert_eq!(result, DispatchResult::failed(ErrorKind::NoSelection));
        assert!(backend.writes().is_empty());
    }

    #[test]
    fn test_closed_port_becomes_failed_result() {
        let backend = MemoryBackend::new([PORT]);
        let registry = Arc::new(PortRegistry::new(Arc::new(backend)));
        let dispatcher = CommandDispatcher::new(
            registry,
            Arc::new(VolumeModel::new()),
            PORT,
            DispatchSettings::default(),
        );

        let result = dispatcher.dispatch(&cmd(CommandKind::Tab(0x4D)));
        assert_eq!(result, DispatchResult::failed(ErrorKind::PortClosed));
    }

    #[test]
    fn test_write_failure_becomes_send_error() {
        let (dispatcher, backend) = setup();
        backend.fail_writes(PORT);

        let result = dispatcher.dispatch(&cmd(CommandKind::Pedal(0x12)));
        assert_eq!(result, DispatchResult::failed(ErrorKind::SendError));
    }
}
