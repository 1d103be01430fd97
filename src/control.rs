//! Deck controls
//!
//! A control owns one key slot (physical key plus page offset): it decides
//! what the key looks like and what a press does. The set of control kinds
//! is closed; the config picks one per slot by name.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, warn};

use crate::dispatch::{CommandDispatcher, DispatchResult};
use crate::error::{ErrorKind, MappingError};
use crate::feedback::FeedbackPhase;
use crate::mapping::{resolve_color, wrap_label, KeyMapping, KeyMappingResolver, Resolution};

/// Characters per label line on a key
pub const LABEL_WIDTH: usize = 6;

/// Everything a renderer needs to paint one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFace {
    pub label: String,
    pub text_color: String,
    pub background_color: String,
    pub phase: FeedbackPhase,
}

impl KeyFace {
    fn error(text: &str, phase: FeedbackPhase) -> Self {
        Self {
            label: text.to_string(),
            text_color: "red".to_string(),
            background_color: "black".to_string(),
            phase,
        }
    }
}

/// Key text shown while a failure flash is active
pub fn error_label(kind: Option<ErrorKind>) -> &'static str {
    match kind {
        Some(ErrorKind::UnknownCommand) | Some(ErrorKind::ConfigInvalid) => "INVALID\nKEY",
        Some(ErrorKind::NoSelection) => "NO\nVOLUME\nSELECTED",
        Some(ErrorKind::PortNotFound)
        | Some(ErrorKind::NoHardwarePort)
        | Some(ErrorKind::PortClosed) => "MIDI\nPORT\nERROR",
        _ => "SEND\nFAILED",
    }
}

/// Shared collaborators handed to every control
#[derive(Clone)]
pub struct ControlContext {
    pub resolver: Arc<KeyMappingResolver>,
    pub mappings_file: PathBuf,
    pub dispatcher: Arc<CommandDispatcher>,
}

/// Capability interface of a key slot
#[async_trait]
pub trait Control: Send + Sync {
    /// Prepare the control and return its initial face
    async fn initialize(&self) -> KeyFace;

    /// Handle a press. `None` means nothing was attempted and no
    /// feedback should be shown.
    async fn pressed(&self) -> Option<DispatchResult>;

    /// Face for the given feedback phase
    fn render(&self, phase: FeedbackPhase, error: Option<ErrorKind>) -> KeyFace;
}

/// Closed set of control kinds, selected by `type` in the config
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlKind {
    /// Sends the command assigned in the key mapping file
    #[default]
    KeyMapping,
    /// Fixed label, never sends anything
    Text {
        text: String,
        #[serde(default = "default_text_color")]
        color: String,
        #[serde(default = "default_text_background")]
        background_color: String,
    },
}

fn default_text_color() -> String {
    "white".to_string()
}

fn default_text_background() -> String {
    "lightblue".to_string()
}

impl ControlKind {
    /// Instantiate the control for a table index
    pub fn build(&self, index: u32, ctx: &ControlContext) -> Arc<dyn Control> {
        match self {
            ControlKind::KeyMapping => Arc::new(KeyMappingControl::new(index, ctx.clone())),
            ControlKind::Text {
                text,
                color,
                background_color,
            } => Arc::new(TextControl {
                face: KeyFace {
                    label: wrap_label(text, LABEL_WIDTH),
                    text_color: resolve_color(color),
                    background_color: resolve_color(background_color),
                    phase: FeedbackPhase::Normal,
                },
            }),
        }
    }
}

/// Key bound to an entry of the mapping file
pub struct KeyMappingControl {
    index: u32,
    ctx: ControlContext,
    mapping: Mutex<Option<KeyMapping>>,
}

impl KeyMappingControl {
    pub fn new(index: u32, ctx: ControlContext) -> Self {
        Self {
            index,
            ctx,
            mapping: Mutex::new(None),
        }
    }

    /// Reload the table (cheap when unchanged) and refresh the cached record
    async fn refresh(&self) -> Result<Resolution, MappingError> {
        let table = self.ctx.resolver.load(&self.ctx.mappings_file).await?;
        *self.mapping.lock() = table.mapping(self.index).cloned();
        Ok(self.ctx.resolver.resolve(&table, self.index, 0))
    }
}

#[async_trait]
impl Control for KeyMappingControl {
    async fn initialize(&self) -> KeyFace {
        if let Err(e) = self.refresh().await {
            warn!("Key {}: {}", self.index, e);
            *self.mapping.lock() = None;
        }
        self.render(FeedbackPhase::Normal, None)
    }

    async fn pressed(&self) -> Option<DispatchResult> {
        let resolution = match self.refresh().await {
            Ok(resolution) => resolution,
            Err(e @ MappingError::Io { .. }) => {
                warn!("Key {} pressed but mappings are unavailable: {}", self.index, e);
                return None;
            },
            Err(e) => {
                error!("Key {}: {}", self.index, e);
                return Some(DispatchResult::failed(ErrorKind::ConfigInvalid));
            },
        };

        match resolution {
            Resolution::Command(command) => Some(self.ctx.dispatcher.dispatch(&command)),
            Resolution::Unmapped(reason) => {
                warn!("No command for key {}: {}", self.index, reason);
                reason.error_kind().map(DispatchResult::failed)
            },
        }
    }

    fn render(&self, phase: FeedbackPhase, error: Option<ErrorKind>) -> KeyFace {
        if phase == FeedbackPhase::FlashFailure {
            return KeyFace::error(error_label(error), phase);
        }

        let guard = self.mapping.lock();
        let Some(mapping) = guard.as_ref() else {
            return KeyFace::error("NO\nMAP", phase);
        };

        let background = if phase == FeedbackPhase::FlashSuccess {
            resolve_color("bright_green")
        } else {
            resolve_color(&mapping.background_color)
        };

        KeyFace {
            label: wrap_label(mapping.key_name.trim(), LABEL_WIDTH),
            text_color: resolve_color(&mapping.text_color),
            background_color: background,
            phase,
        }
    }
}

/// Static label
pub struct TextControl {
    face: KeyFace,
}

#[async_trait]
impl Control for TextControl {
    async fn initialize(&self) -> KeyFace {
        self.face.clone()
    }

    async fn pressed(&self) -> Option<DispatchResult> {
        None
    }

    fn render(&self, _phase: FeedbackPhase, _error: Option<ErrorKind>) -> KeyFace {
        self.face.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchSettings;
    use crate::ports::{MemoryBackend, PortRegistry};
    use crate::volume::VolumeModel;
    use tempfile::TempDir;

    const PORT: &str = "USB MIDI Device";

    fn context(dir: &TempDir, json: &str) -> (ControlContext, MemoryBackend) {
        let path = dir.path().join("key_mappings.json");
        std::fs::write(&path, json).unwrap();

        let backend = MemoryBackend::new([PORT]);
        let registry = Arc::new(PortRegistry::new(Arc::new(backend.clone())));
        registry.open(None).unwrap();
        let dispatcher = Arc::new(CommandDispatcher::new(
            registry,
            Arc::new(VolumeModel::new()),
            PORT,
            DispatchSettings::default(),
        ));
        let ctx = ControlContext {
            resolver: Arc::new(KeyMappingResolver::new()),
            mappings_file: path,
            dispatcher,
        };
        (ctx, backend)
    }

    const MAPPINGS: &str = r#"[
        {"key_no": 0, "key_name": "Start/Stop", "source_list_name": "pedal_midis",
         "text_color": "white", "background_color": "ketron_blue"},
        {"key_no": 1, "key_name": "Bogus", "source_list_name": "tab_midis"}
    ]"#;

    #[tokio::test]
    async fn test_key_mapping_control_face_and_press() {
        let dir = TempDir::new().unwrap();
        let (ctx, backend) = context(&dir, MAPPINGS);
        let control = ControlKind::KeyMapping.build(0, &ctx);

        let face = control.initialize().await;
        assert_eq!(face.label, "Start/\nStop");
        assert_eq!(face.background_color, "#0066CC");

        assert_eq!(control.pressed().await, Some(DispatchResult::ok()));
        assert_eq!(backend.writes().len(), 2);

        let flash = control.render(FeedbackPhase::FlashSuccess, None);
        assert_eq!(flash.background_color, "#00FF00");
    }

    #[tokio::test]
    async fn test_unmapped_and_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let (ctx, backend) = context(&dir, MAPPINGS);

        let unmapped = ControlKind::KeyMapping.build(9, &ctx);
        assert_eq!(unmapped.initialize().await.label, "NO\nMAP");
        assert_eq!(unmapped.pressed().await, None);

        let unknown = ControlKind::KeyMapping.build(1, &ctx);
        assert_eq!(
            unknown.pressed().await,
            Some(DispatchResult::failed(ErrorKind::UnknownCommand))
        );
        assert_eq!(
            unknown
                .render(FeedbackPhase::FlashFailure, Some(ErrorKind::UnknownCommand))
                .label,
            "INVALID\nKEY"
        );
        assert!(backend.writes().is_empty());
    }

    #[tokio::test]
    async fn test_text_control_never_sends() {
        let dir = TempDir::new().unwrap();
        let (ctx, backend) = context(&dir, MAPPINGS);
        let kind: ControlKind =
            serde_yaml::from_str("type: text\ntext: KETRON SD\nbackground_color: ketron_blue\n")
                .unwrap();
        let control = kind.build(0, &ctx);

        let face = control.initialize().await;
        assert_eq!(face.label, "KETRON\nSD");
        assert_eq!(face.background_color, "#0066CC");
        assert_eq!(control.pressed().await, None);
        assert!(backend.writes().is_empty());
    }

    #[test]
    fn test_error_labels() {
        assert_eq!(error_label(Some(ErrorKind::SendError)), "SEND\nFAILED");
        assert_eq!(error_label(Some(ErrorKind::NoSelection)), "NO\nVOLUME\nSELECTED");
        assert_eq!(error_label(None), "SEND\nFAILED");
    }
}
