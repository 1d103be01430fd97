//! Key mapping table and resolver
//!
//! Maps a physical key (plus page offset) to a named instrument command.
//! The table is loaded from `key_mappings.json` (or YAML), re-parsed only
//! when the file's modification time changes.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::commands::{self, CommandClass};
use crate::error::{ErrorKind, MappingError};
use crate::volume::VolumeSource;

/// Physical keys on one page of the deck
pub const KEYS_PER_PAGE: u32 = 15;
/// Offset added to key indices on the second page
pub const SECOND_PAGE_OFFSET: u32 = KEYS_PER_PAGE;

/// Which half of the mapping table the deck is showing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Page {
    #[default]
    First,
    Second,
}

impl Page {
    pub fn offset(self) -> u32 {
        match self {
            Page::First => 0,
            Page::Second => SECOND_PAGE_OFFSET,
        }
    }
}

/// One record of the mapping file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeyMapping {
    pub key_no: u32,
    #[serde(default)]
    pub key_name: String,
    #[serde(default)]
    pub source_list_name: Option<CommandClass>,
    #[serde(default = "default_text_color")]
    pub text_color: String,
    #[serde(default = "default_background_color")]
    pub background_color: String,
}

fn default_text_color() -> String {
    "white".to_string()
}

fn default_background_color() -> String {
    "black".to_string()
}

/// A table slot: a usable mapping, or a record that failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingEntry {
    Valid(KeyMapping),
    Invalid { reason: String },
}

/// Parsed mapping file, indexed by `key_no`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingTable {
    entries: HashMap<u32, MappingEntry>,
}

impl MappingTable {
    /// Parse mapping file contents.
    ///
    /// Accepts a bare array or `{"key_mappings": [...]}`. A malformed record
    /// is logged and kept as [`MappingEntry::Invalid`] when its `key_no` can
    /// be read, dropped otherwise.
    pub fn parse(content: &str, yaml: bool, path: &Path) -> Result<Self, MappingError> {
        let invalid = |reason: String| MappingError::ConfigInvalid {
            path: path.to_path_buf(),
            reason,
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let document: serde_json::Value = if yaml {
            serde_yaml::from_str(content).map_err(|e| invalid(e.to_string()))?
        } else {
            serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?
        };

        let records = match document {
            serde_json::Value::Array(records) => records,
            serde_json::Value::Object(mut map) => match map.remove("key_mappings") {
                Some(serde_json::Value::Array(records)) => records,
                _ => return Err(invalid("expected a \"key_mappings\" array".to_string())),
            },
            _ => return Err(invalid("expected an array of key mappings".to_string())),
        };

        let mut entries = HashMap::new();
        for (index, record) in records.into_iter().enumerate() {
            let key_no = record.get("key_no").and_then(|v| v.as_u64());

            let entry = match serde_json::from_value::<KeyMapping>(record) {
                Ok(mapping) => MappingEntry::Valid(mapping),
                Err(e) => {
                    warn!(
                        "Skipping invalid key mapping #{} in {}: {}",
                        index,
                        path.display(),
                        e
                    );
                    MappingEntry::Invalid {
                        reason: e.to_string(),
                    }
                },
            };

            let Some(key_no) = key_no.and_then(|k| u32::try_from(k).ok()) else {
                continue;
            };
            if entries.insert(key_no, entry).is_some() {
                warn!("Duplicate key_no {} in {}, last entry wins", key_no, path.display());
            }
        }

        Ok(Self { entries })
    }

    pub fn get(&self, key_no: u32) -> Option<&MappingEntry> {
        self.entries.get(&key_no)
    }

    /// The valid mapping at an index, if any
    pub fn mapping(&self, key_no: u32) -> Option<&KeyMapping> {
        match self.entries.get(&key_no) {
            Some(MappingEntry::Valid(mapping)) => Some(mapping),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a table index to a command
    pub fn resolve_index(&self, index: u32) -> Resolution {
        let mapping = match self.entries.get(&index) {
            None => return Resolution::Unmapped(Unmapped::NoEntry),
            Some(MappingEntry::Invalid { reason }) => {
                return Resolution::Unmapped(Unmapped::Invalid {
                    reason: reason.clone(),
                })
            },
            Some(MappingEntry::Valid(mapping)) => mapping,
        };

        let name = mapping.key_name.trim();
        if name.is_empty() {
            return Resolution::Unmapped(Unmapped::EmptyName);
        }

        if let Some(action) = reserved_volume_action(name) {
            return Resolution::Command(ResolvedCommand {
                index,
                name: name.to_uppercase(),
                kind: CommandKind::Volume(action),
            });
        }

        let Some(class) = mapping.source_list_name else {
            return Resolution::Unmapped(Unmapped::Invalid {
                reason: "missing source_list_name".to_string(),
            });
        };

        if class == CommandClass::Cc {
            if let Some(source) = VolumeSource::from_key_name(name) {
                return Resolution::Command(ResolvedCommand {
                    index,
                    name: name.to_string(),
                    kind: CommandKind::Volume(VolumeAction::Select(source)),
                });
            }
        }

        match commands::lookup(class, name) {
            Some((canonical, code)) => {
                let kind = match class {
                    CommandClass::Pedal => CommandKind::Pedal(code),
                    CommandClass::Tab => CommandKind::Tab(code),
                    CommandClass::Cc => CommandKind::Cc {
                        controller: (code & 0x7F) as u8,
                    },
                };
                Resolution::Command(ResolvedCommand {
                    index,
                    name: canonical.to_string(),
                    kind,
                })
            },
            None => Resolution::Unmapped(Unmapped::UnknownCommand {
                class,
                name: name.to_string(),
            }),
        }
    }
}

/// "VOLUME UP", "VOLUME DOWN", "MUTE" and "MASTER VOLUME" work in any class
fn reserved_volume_action(name: &str) -> Option<VolumeAction> {
    match name.to_uppercase().as_str() {
        "VOLUME UP" => Some(VolumeAction::Up),
        "VOLUME DOWN" => Some(VolumeAction::Down),
        "MUTE" => Some(VolumeAction::ToggleMute),
        "MASTER VOLUME" => Some(VolumeAction::Select(VolumeSource::Master)),
        _ => None,
    }
}

/// Operation on the volume model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeAction {
    Select(VolumeSource),
    Up,
    Down,
    ToggleMute,
}

/// What a resolved key sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Pedal(u16),
    Tab(u16),
    Cc { controller: u8 },
    Volume(VolumeAction),
}

/// A key resolved to a concrete command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    /// Table index (physical key plus page offset)
    pub index: u32,
    /// Canonical command name
    pub name: String,
    pub kind: CommandKind,
}

impl fmt::Display for ResolvedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CommandKind::Pedal(code) => write!(f, "pedal '{}' (0x{:02X})", self.name, code),
            CommandKind::Tab(code) => write!(f, "tab '{}' (0x{:02X})", self.name, code),
            CommandKind::Cc { controller } => {
                write!(f, "cc '{}' (0x{:02X})", self.name, controller)
            },
            CommandKind::Volume(action) => write!(f, "volume '{}' ({:?})", self.name, action),
        }
    }
}

/// Why a key did not resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unmapped {
    NoEntry,
    EmptyName,
    UnknownCommand { class: CommandClass, name: String },
    Invalid { reason: String },
}

impl Unmapped {
    /// Error to report for this key; `None` for keys that are simply unassigned
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Unmapped::NoEntry | Unmapped::EmptyName => None,
            Unmapped::UnknownCommand { .. } => Some(ErrorKind::UnknownCommand),
            Unmapped::Invalid { .. } => Some(ErrorKind::ConfigInvalid),
        }
    }
}

impl fmt::Display for Unmapped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unmapped::NoEntry => f.write_str("no mapping"),
            Unmapped::EmptyName => f.write_str("empty key name"),
            Unmapped::UnknownCommand { class, name } => {
                write!(f, "'{}' not found in {} commands", name, class)
            },
            Unmapped::Invalid { reason } => write!(f, "invalid mapping: {}", reason),
        }
    }
}

/// Result of resolving a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Command(ResolvedCommand),
    Unmapped(Unmapped),
}

struct CachedTable {
    path: PathBuf,
    mtime: SystemTime,
    table: Arc<MappingTable>,
}

/// Loads mapping tables, memoized by `(path, mtime)`
#[derive(Default)]
pub struct KeyMappingResolver {
    cache: Mutex<Option<CachedTable>>,
}

impl KeyMappingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a mapping file, re-parsing only when it changed since the last load.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<Arc<MappingTable>, MappingError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| MappingError::Io {
            path: path.clone(),
            source,
        };

        let meta = tokio::fs::metadata(&path).await.map_err(io_err)?;
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        {
            let guard = self.cache.lock();
            if let Some(cached) = guard.as_ref() {
                if cached.path == path && cached.mtime == mtime {
                    return Ok(cached.table.clone());
                }
            }
        }

        let bytes = tokio::fs::read(&path).await.map_err(io_err)?;
        let content = decode_text(&bytes).map_err(|reason| MappingError::ConfigInvalid {
            path: path.clone(),
            reason,
        })?;
        let table = Arc::new(MappingTable::parse(&content, is_yaml(&path), &path)?);

        info!("Loaded {} key mappings from {}", table.len(), path.display());

        *self.cache.lock() = Some(CachedTable {
            path,
            mtime,
            table: table.clone(),
        });

        Ok(table)
    }

    /// Look up `key_no + page_offset` in a loaded table
    pub fn resolve(&self, table: &MappingTable, key_no: u32, page_offset: u32) -> Resolution {
        let index = key_no.saturating_add(page_offset);
        let resolution = table.resolve_index(index);
        if let Resolution::Unmapped(reason) = &resolution {
            debug!("Key {} (index {}) unmapped: {}", key_no, index, reason);
        }
        resolution
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("yaml" | "yml")
    )
}

/// Decode file bytes: UTF-16 (LE/BE) with BOM, or UTF-8 with optional BOM
fn decode_text(bytes: &[u8]) -> Result<String, String> {
    fn utf16(body: &[u8], be: bool) -> Result<String, String> {
        if body.len() % 2 != 0 {
            return Err("truncated UTF-16 text".to_string());
        }
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|c| {
                if be {
                    u16::from_be_bytes([c[0], c[1]])
                } else {
                    u16::from_le_bytes([c[0], c[1]])
                }
            })
            .collect();
        String::from_utf16(&units).map_err(|e| e.to_string())
    }

    match bytes {
        [0xFF, 0xFE, body @ ..] => utf16(body, false),
        [0xFE, 0xFF, body @ ..] => utf16(body, true),
        [0xEF, 0xBB, 0xBF, body @ ..] => {
            String::from_utf8(body.to_vec()).map_err(|e| e.to_string())
        },
        _ => String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string()),
    }
}

/// Named colors from the arranger's panel palette
pub const COLOR_PALETTE: &[(&str, u32)] = &[
    ("red", 0x200000),
    ("green", 0x002000),
    ("bright_green", 0x00FF00),
    ("blue", 0x000020),
    ("ketron_blue", 0x0066CC),
    ("purple", 0x800080),
    ("yellow", 0x808000),
    ("orange", 0x701E02),
    ("white", 0x606060),
    ("teal", 0x004040),
    ("offwhite", 0xA47474),
];

/// Color names the renderer understands directly
const STANDARD_COLORS: &[&str] = &[
    "blue", "green", "red", "yellow", "orange", "purple", "white", "black", "grey", "gray",
    "cyan", "magenta", "pink", "brown", "teal", "navy", "maroon", "lime", "silver", "gold",
    "lightblue", "lightgreen", "lightgray", "darkblue", "darkgreen", "darkred",
];

/// Resolve a mapping color: standard names pass through, palette names
/// become `#RRGGBB`, anything else (including hex) is left as is.
pub fn resolve_color(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    if STANDARD_COLORS.contains(&lower.as_str()) {
        return name.trim().to_string();
    }
    COLOR_PALETTE
        .iter()
        .find(|(palette_name, _)| *palette_name == lower)
        .map(|(_, rgb)| format!("#{:06X}", rgb))
        .unwrap_or_else(|| name.trim().to_string())
}

/// Wrap a label to at most `max` characters per line.
///
/// Breaks at spaces where possible; words longer than a line are split.
/// A literal `\n` in the label forces a break.
pub fn wrap_label(text: &str, max: usize) -> String {
    let max = max.max(1);
    let mut lines: Vec<String> = Vec::new();

    for segment in text.split("\\n").flat_map(|s| s.split('\n')) {
        let mut current = String::new();
        for word in segment.split_whitespace() {
            let word_len = word.chars().count();
            let current_len = current.chars().count();

            if word_len > max {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                let chars: Vec<char> = word.chars().collect();
                lines.extend(chars.chunks(max).map(|c| c.iter().collect::<String>()));
            } else if current.is_empty() {
                current.push_str(word);
            } else if current_len + 1 + word_len > max {
                lines.push(std::mem::replace(&mut current, word.to_string()));
            } else {
                current.push(' ');
                current.push_str(word);
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"{
        "key_mappings": [
            {"key_no": 0, "key_name": "Start/Stop", "source_list_name": "pedal_midis",
             "text_color": "white", "background_color": "ketron_blue"},
            {"key_no": 1, "key_name": "VOICE1", "source_list_name": "cc_midis"},
            {"key_no": 2, "key_name": "Volume Up", "source_list_name": "tab_midis"},
            {"key_no": 3, "key_name": "Not A Command", "source_list_name": "tab_midis"},
            {"key_no": 4, "key_name": "   ", "source_list_name": "pedal_midis"},
            {"key_no": 5, "key_name": "Arr.A", "source_list_name": "knob_midis"},
            {"key_no": 6, "key_name": "PLAYER", "source_list_name": "cc_midis"},
            {"key_name": "orphan"},
            {"key_no": 15, "key_name": "Record", "source_list_name": "pedal_midis"}
        ]
    }"#;

    fn table() -> MappingTable {
        MappingTable::parse(SAMPLE, false, Path::new("key_mappings.json")).unwrap()
    }

    fn command(res: Resolution) -> ResolvedCommand {
        match res {
            Resolution::Command(cmd) => cmd,
            other => panic!("expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_pedal_command() {
        let cmd = command(table().resolve_index(0));
        assert_eq!(cmd.name, "Start/Stop");
        assert_eq!(cmd.kind, CommandKind::Pedal(0x12));
    }

    #[test]
    fn test_resolve_volume_keys() {
        let table = table();
        assert_eq!(
            command(table.resolve_index(1)).kind,
            CommandKind::Volume(VolumeAction::Select(VolumeSource::Voice1))
        );
        // Reserved names ignore the class
        assert_eq!(
            command(table.resolve_index(2)).kind,
            CommandKind::Volume(VolumeAction::Up)
        );
        assert_eq!(
            command(table.resolve_index(6)).kind,
            CommandKind::Cc { controller: 0x66 }
        );
    }

    #[test]
    fn test_unmapped_keys_never_fail() {
        let table = table();
        assert_eq!(table.resolve_index(9), Resolution::Unmapped(Unmapped::NoEntry));
        assert_eq!(table.resolve_index(4), Resolution::Unmapped(Unmapped::EmptyName));

        match table.resolve_index(3) {
            Resolution::Unmapped(reason) => {
                assert_eq!(reason.error_kind(), Some(ErrorKind::UnknownCommand))
            },
            other => panic!("unexpected {:?}", other),
        }
        match table.resolve_index(5) {
            Resolution::Unmapped(reason) => {
                assert_eq!(reason.error_kind(), Some(ErrorKind::ConfigInvalid))
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_records_do_not_block_the_table() {
        let table = table();
        // The orphan without key_no is dropped, everything else loads
        assert_eq!(table.len(), 8);
        assert!(table.mapping(0).is_some());
        assert!(table.mapping(5).is_none());
    }

    #[test]
    fn test_second_page_offset() {
        let resolver = KeyMappingResolver::new();
        let table = table();

        let cmd = command(resolver.resolve(&table, 0, Page::Second.offset()));
        assert_eq!(cmd.index, 15);
        assert_eq!(cmd.name, "Record");
        assert_eq!(cmd.kind, CommandKind::Pedal(0x90));
    }

    #[test]
    fn test_bare_array_and_yaml() {
        let json = r#"[{"key_no": 7, "key_name": "fill", "source_list_name": "pedal_midis"}]"#;
        let table = MappingTable::parse(json, false, Path::new("k.json")).unwrap();
        assert_eq!(command(table.resolve_index(7)).name, "Fill");

        let yaml = "key_mappings:\n  - key_no: 7\n    key_name: START_STOP\n    source_list_name: tab\n";
        let table = MappingTable::parse(yaml, true, Path::new("k.yaml")).unwrap();
        assert_eq!(command(table.resolve_index(7)).kind, CommandKind::Tab(0x4D));
    }

    #[test]
    fn test_malformed_document_is_config_invalid() {
        let err = MappingTable::parse("{not json", false, Path::new("k.json")).unwrap_err();
        assert!(matches!(err, MappingError::ConfigInvalid { .. }));

        let err = MappingTable::parse(r#"{"keys": []}"#, false, Path::new("k.json")).unwrap_err();
        assert!(matches!(err, MappingError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_decode_utf16_with_bom() {
        let text = r#"[{"key_no": 0, "key_name": "Stop"}]"#;
        let mut bytes = vec![0xFF, 0xFE];
        bytes.extend(text.encode_utf16().flat_map(|u| u.to_le_bytes()));
        assert_eq!(decode_text(&bytes).unwrap(), text);

        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(text.as_bytes());
        assert_eq!(decode_text(&bytes).unwrap(), text);
    }

    #[tokio::test]
    async fn test_load_is_memoized_by_mtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key_mappings.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let resolver = KeyMappingResolver::new();
        let first = resolver.load(&path).await.unwrap();
        let second = resolver.load(&path).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // Rewrite with a newer mtime
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(br#"[{"key_no": 0, "key_name": "Fill", "source_list_name": "pedal_midis"}]"#)
            .unwrap();
        file.set_modified(SystemTime::now() + std::time::Duration::from_secs(5))
            .unwrap();
        drop(file);

        let third = resolver.load(&path).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.len(), 1);
        assert_eq!(command(third.resolve_index(0)).name, "Fill");
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let resolver = KeyMappingResolver::new();
        let err = resolver.load("/nonexistent/key_mappings.json").await.unwrap_err();
        assert!(matches!(err, MappingError::Io { .. }));
    }

    #[test]
    fn test_wrap_label() {
        assert_eq!(wrap_label("Start/Stop", 6), "Start/\nStop");
        assert_eq!(wrap_label("Arr A", 6), "Arr A");
        assert_eq!(wrap_label("Fill To Arr", 6), "Fill\nTo Arr");
        assert_eq!(wrap_label("Volume Up", 6), "Volume\nUp");
        assert_eq!(wrap_label("NO\\nMAP", 6), "NO\nMAP");
        assert_eq!(wrap_label("", 6), "");
    }

    #[test]
    fn test_resolve_color() {
        assert_eq!(resolve_color("ketron_blue"), "#0066CC");
        assert_eq!(resolve_color("OffWhite"), "#A47474");
        // Standard names are left for the renderer
        assert_eq!(resolve_color("red"), "red");
        assert_eq!(resolve_color("#112233"), "#112233");
    }
}
