//! MIDI wire messages
//!
//! Encoding for the small subset of MIDI the deck emits:
//! Control Change for volume sliders and SysEx for pedal/tab commands.

use std::fmt;

/// Status nibble for Control Change
pub const CONTROL_CHANGE: u8 = 0xB0;
/// SysEx start byte
pub const SYSEX_START: u8 = 0xF0;
/// SysEx end byte
pub const SYSEX_END: u8 = 0xF7;

/// Messages the deck puts on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },

    /// System Exclusive: payload between 0xF0 and 0xF7
    SysEx { data: Vec<u8> },
}

impl MidiMessage {
    /// Encode the message to MIDI bytes
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            MidiMessage::ControlChange { channel, cc, value } => {
                vec![CONTROL_CHANGE | (channel & 0x0F), cc & 0x7F, value & 0x7F]
            }
            MidiMessage::SysEx { ref data } => {
                let mut result = Vec::with_capacity(data.len() + 2);
                result.push(SYSEX_START);
                result.extend(data.iter().map(|b| b & 0x7F));
                result.push(SYSEX_END);
                result
            }
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            MidiMessage::SysEx { ref data } => write!(f, "SysEx {}", format_hex(data)),
        }
    }
}

/// A Control Change destined for the instrument
///
/// `channel` is 0-based on the wire (channel 16 is 15).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcMessage {
    pub channel: u8,
    pub controller: u8,
    pub value: u8,
}

impl CcMessage {
    pub fn new(channel: u8, controller: u8, value: u8) -> Self {
        Self {
            channel: channel.min(15),
            controller: controller.min(127),
            value: value.min(127),
        }
    }

    /// Three wire bytes: status, controller, value
    pub fn encode(&self) -> [u8; 3] {
        [
            CONTROL_CHANGE | (self.channel & 0x0F),
            self.controller & 0x7F,
            self.value & 0x7F,
        ]
    }
}

impl From<CcMessage> for MidiMessage {
    fn from(cc: CcMessage) -> Self {
        MidiMessage::ControlChange {
            channel: cc.channel,
            cc: cc.controller,
            value: cc.value,
        }
    }
}

impl fmt::Display for CcMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        MidiMessage::from(*self).fmt(f)
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
