//! Ketron Deck
//!
//! Routes key presses from a 15-key deck to a Ketron arranger over MIDI:
//! pedal and tab commands as SysEx press/release pairs, slider levels as
//! Control Change. Volume levels are tracked locally so relative keys
//! (up, down, mute) can send absolute values.

pub mod cli;
pub mod commands;
pub mod config;
pub mod control;
pub mod deck;
pub mod dispatch;
pub mod error;
pub mod feedback;
pub mod mapping;
pub mod midi;
pub mod paths;
pub mod ports;
pub mod volume;

pub use config::AppConfig;
pub use control::{Control, ControlContext, ControlKind, KeyFace};
pub use deck::Deck;
pub use dispatch::{CommandDispatcher, DispatchResult, DispatchSettings};
pub use error::{ConfigError, ErrorKind, MappingError, PortError, VolumeError};
pub use feedback::{FeedbackController, FeedbackPhase, FeedbackUpdate};
pub use mapping::{KeyMappingResolver, MappingTable, Page, Resolution, ResolvedCommand};
pub use midi::{CcMessage, MidiMessage};
pub use ports::{MemoryBackend, MidiBackend, MidirBackend, PortRegistry};
pub use volume::{VolumeModel, VolumeSource, VolumeState};
