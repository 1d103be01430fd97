//! Volume model
//!
//! Local mirror of the instrument's nine volume sliders. The instrument
//! never reports its levels back, so relative changes (up/down/mute) are
//! computed here and sent as absolute Control Change values.

use parking_lot::Mutex;
use std::fmt;
use tracing::debug;

use crate::commands::slider;
use crate::error::VolumeError;
use crate::midi::CcMessage;

/// Level every source assumes at startup
pub const DEFAULT_VOLUME: u8 = 80;
/// Level restored by unmuting a source that was never muted
pub const DEFAULT_UNMUTE_VOLUME: u8 = 64;
/// Highest MIDI data value
pub const MAX_VOLUME: u8 = 127;

/// Wire channel shared by every source except master ("channel 15")
pub const SOURCE_CHANNEL: u8 = 14;
/// Wire channel of the master volume ("channel 16")
pub const MASTER_CHANNEL: u8 = 15;

/// Independently addressable volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VolumeSource {
    Lower,
    Voice1,
    Voice2,
    Drawbars,
    Style,
    Drum,
    Chord,
    RealChord,
    Master,
}

impl VolumeSource {
    pub const ALL: [VolumeSource; 9] = [
        VolumeSource::Lower,
        VolumeSource::Voice1,
        VolumeSource::Voice2,
        VolumeSource::Drawbars,
        VolumeSource::Style,
        VolumeSource::Drum,
        VolumeSource::Chord,
        VolumeSource::RealChord,
        VolumeSource::Master,
    ];

    /// Map a key or dictionary name to its source (case-insensitive)
    pub fn from_key_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_uppercase();
        let source = match upper.as_str() {
            "LOWER" | "LOWERS" => VolumeSource::Lower,
            "VOICE1" | "VOICE 1" => VolumeSource::Voice1,
            "VOICE2" | "VOICE 2" => VolumeSource::Voice2,
            "DRAWBARS" | "DRAW ORGAN" => VolumeSource::Drawbars,
            "STYLE" => VolumeSource::Style,
            "DRUM" | "DRUMS" => VolumeSource::Drum,
            "CHORD" | "CHORDS" => VolumeSource::Chord,
            "REALCHORD" | "REAL CHORD" | "REAL CHORDS" => VolumeSource::RealChord,
            "MASTER" | "MASTER VOLUME" => VolumeSource::Master,
            _ => return None,
        };
        Some(source)
    }

    /// Controller number the source's slider listens on
    pub fn controller(self) -> u8 {
        match self {
            VolumeSource::Lower => slider::LOWERS,
            VolumeSource::Voice1 => slider::VOICE1,
            VolumeSource::Voice2 => slider::VOICE2,
            VolumeSource::Drawbars => slider::DRAWBARS,
            VolumeSource::Style => slider::STYLE,
            VolumeSource::Drum => slider::DRUM,
            VolumeSource::Chord => slider::CHORD,
            VolumeSource::RealChord => slider::REALCHORD,
            VolumeSource::Master => slider::EXPRESSION,
        }
    }

    /// 0-based wire channel
    pub fn channel(self) -> u8 {
        match self {
            VolumeSource::Master => MASTER_CHANNEL,
            _ => SOURCE_CHANNEL,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for VolumeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VolumeSource::Lower => "Lower",
            VolumeSource::Voice1 => "Voice1",
            VolumeSource::Voice2 => "Voice2",
            VolumeSource::Drawbars => "Drawbars",
            VolumeSource::Style => "Style",
            VolumeSource::Drum => "Drum",
            VolumeSource::Chord => "Chord",
            VolumeSource::RealChord => "RealChord",
            VolumeSource::Master => "Master",
        };
        f.write_str(s)
    }
}

/// Per-source level and mute memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeState {
    pub value: u8,
    pub muted: bool,
    pub pre_mute_value: Option<u8>,
}

impl Default for VolumeState {
    fn default() -> Self {
        Self {
            value: DEFAULT_VOLUME,
            muted: false,
            pre_mute_value: None,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    states: [VolumeState; 9],
    last_selected: Option<VolumeSource>,
}

impl Inner {
    fn cc(&self, source: VolumeSource) -> CcMessage {
        CcMessage::new(
            source.channel(),
            source.controller(),
            self.states[source.index()].value,
        )
    }

    fn selected(&self) -> Result<VolumeSource, VolumeError> {
        self.last_selected.ok_or(VolumeError::NoSelection)
    }
}

/// Thread-safe volume model
///
/// Every operation takes the single model lock, so select and the relative
/// operations that read `last_selected` are atomic with respect to each other.
#[derive(Debug, Default)]
pub struct VolumeModel {
    inner: Mutex<Inner>,
}

impl VolumeModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `source` the target of relative operations; returns its current level
    pub fn select(&self, source: VolumeSource) -> CcMessage {
        let mut inner = self.inner.lock();
        inner.last_selected = Some(source);
        debug!("Volume source selected: {}", source);
        inner.cc(source)
    }

    pub fn increment(&self, amount: u8) -> Result<CcMessage, VolumeError> {
        self.adjust(i16::from(amount))
    }

    pub fn decrement(&self, amount: u8) -> Result<CcMessage, VolumeError> {
        self.adjust(-i16::from(amount))
    }

    fn adjust(&self, delta: i16) -> Result<CcMessage, VolumeError> {
        let mut inner = self.inner.lock();
        let source = inner.selected()?;
        let state = &mut inner.states[source.index()];
        state.value = (i16::from(state.value) + delta).clamp(0, i16::from(MAX_VOLUME)) as u8;
        debug!("{} volume -> {}", source, state.value);
        Ok(inner.cc(source))
    }

    /// Mute the selected source, or restore it when it sits at zero
    pub fn toggle_mute(&self) -> Result<CcMessage, VolumeError> {
        let mut inner = self.inner.lock();
        let source = inner.selected()?;
        let state = &mut inner.states[source.index()];

        if state.value == 0 {
            state.value = state.pre_mute_value.unwrap_or(DEFAULT_UNMUTE_VOLUME);
            state.muted = false;
        } else {
            state.pre_mute_value = Some(state.value);
            state.value = 0;
            state.muted = true;
        }
        debug!(
            "{} {} (value {})",
            source,
            if state.muted { "muted" } else { "unmuted" },
            state.value
        );
        Ok(inner.cc(source))
    }

    /// Set an absolute level, clamped to 0-127. Does not change the selection.
    pub fn set_volume(&self, source: VolumeSource, value: i32) -> CcMessage {
        let mut inner = self.inner.lock();
        let state = &mut inner.states[source.index()];
        state.value = value.clamp(0, i32::from(MAX_VOLUME)) as u8;
        if state.value != 0 {
            state.muted = false;
        }
        inner.cc(source)
    }

    pub fn get(&self, source: VolumeSource) -> u8 {
        self.inner.lock().states[source.index()].value
    }

    pub fn state(&self, source: VolumeSource) -> VolumeState {
        self.inner.lock().states[source.index()]
    }

    pub fn last_selected(&self) -> Option<VolumeSource> {
        self.inner.lock().last_selected
    }

    /// Every source with its current level, in declaration order
    pub fn snapshot(&self) -> Vec<(VolumeSource, VolumeState)> {
        let inner = self.inner.lock();
        VolumeSource::ALL
            .iter()
            .map(|&s| (s, inner.states[s.index()]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_voice1_select_adjust_mute() {
        let model = VolumeModel::new();

        let cc = model.select(VolumeSource::Voice1);
        assert_eq!(cc, CcMessage::new(14, slider::VOICE1, 80));
        assert_eq!(cc.encode(), [0xBE, 0x72, 80]);

        assert_eq!(model.increment(5).unwrap().value, 85);

        let muted = model.toggle_mute().unwrap();
        assert_eq!(muted.value, 0);
        assert!(model.state(VolumeSource::Voice1).muted);
        assert_eq!(model.state(VolumeSource::Voice1).pre_mute_value, Some(85));

        let restored = model.toggle_mute().unwrap();
        assert_eq!(restored.value, 85);
        assert!(!model.state(VolumeSource::Voice1).muted);
    }

    #[test]
    fn test_master_uses_expression_on_channel_16() {
        let model = VolumeModel::new();
        let cc = model.select(VolumeSource::Master);
        assert_eq!(cc.encode(), [0xBF, 0x07, 80]);
    }

    #[test]
    fn test_relative_ops_need_selection() {
        let model = VolumeModel::new();
        assert_eq!(model.increment(1), Err(VolumeError::NoSelection));
        assert_eq!(model.decrement(1), Err(VolumeError::NoSelection));
        assert_eq!(model.toggle_mute(), Err(VolumeError::NoSelection));
        assert_eq!(model.last_selected(), None);
    }

    #[test]
    fn test_unmute_without_memory_restores_64() {
        let model = VolumeModel::new();
        model.set_volume(VolumeSource::Style, 0);
        model.select(VolumeSource::Style);

        assert_eq!(model.toggle_mute().unwrap().value, DEFAULT_UNMUTE_VOLUME);
    }

    #[test]
    fn test_set_volume_clamps() {
        let model = VolumeModel::new();
        assert_eq!(model.set_volume(VolumeSource::Drum, 500).value, 127);
        assert_eq!(model.set_volume(VolumeSource::Drum, -3).value, 0);
        assert_eq!(model.last_selected(), None);
    }

    #[test]
    fn test_adjust_only_touches_selected_source() {
        let model = VolumeModel::new();
        model.select(VolumeSource::Chord);
        model.decrement(30).unwrap();

        for (source, state) in model.snapshot() {
            let expected = if source == VolumeSource::Chord { 50 } else { 80 };
            assert_eq!(state.value, expected, "{source}");
        }
    }

    #[test]
    fn test_key_name_aliases() {
        assert_eq!(VolumeSource::from_key_name("Draw Organ"), Some(VolumeSource::Drawbars));
        assert_eq!(VolumeSource::from_key_name("LOWERS"), Some(VolumeSource::Lower));
        assert_eq!(VolumeSource::from_key_name("Real Chords"), Some(VolumeSource::RealChord));
        assert_eq!(VolumeSource::from_key_name("master volume"), Some(VolumeSource::Master));
        assert_eq!(VolumeSource::from_key_name("Drums"), Some(VolumeSource::Drum));
        assert_eq!(VolumeSource::from_key_name("Start/Stop"), None);
    }

    fn any_source() -> impl Strategy<Value = VolumeSource> {
        proptest::sample::select(VolumeSource::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_increment_then_decrement(source in any_source(), start in 0u8..=127, amount in 0u8..=127) {
            let model = VolumeModel::new();
            model.set_volume(source, i32::from(start));
            model.select(source);

            let up = model.increment(amount).unwrap().value;
            let down = model.decrement(amount).unwrap().value;

            if u16::from(start) + u16::from(amount) > 127 {
                prop_assert_eq!(up, 127);
                prop_assert_eq!(down, 127 - amount);
            } else {
                prop_assert_eq!(down, start);
            }
        }

        #[test]
        fn prop_values_stay_in_range(ops in proptest::collection::vec((0u8..3, 0u8..=127), 0..40)) {
            let model = VolumeModel::new();
            model.select(VolumeSource::Style);
            for (op, amount) in ops {
                let cc = match op {
                    0 => model.increment(amount),
                    1 => model.decrement(amount),
                    _ => model.toggle_mute(),
                }.unwrap();
                prop_assert!(cc.value <= 127);
            }
        }

        #[test]
        fn prop_double_toggle_restores(source in any_source(), start in 1u8..=127) {
            let model = VolumeModel::new();
            model.set_volume(source, i32::from(start));
            model.select(source);

            model.toggle_mute().unwrap();
            prop_assert_eq!(model.toggle_mute().unwrap().value, start);
        }
    }
}
