//! Output port registry
//!
//! Owns every open MIDI output connection by name. All writes to a port go
//! through that port's own mutex, so byte sequences from concurrent callers
//! never interleave while writes to different ports run in parallel.
//!
//! The transport sits behind [`MidiBackend`]; [`MidirBackend`] talks to the
//! OS MIDI stack and [`MemoryBackend`] records writes in memory.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::PortError;
use crate::midi::format_hex;

/// Name of an output port as reported by the backend
pub type PortName = String;

/// Substrings of loopback and software ports that are never auto-selected
pub const VIRTUAL_PORT_PATTERNS: &[&str] = &["midi through", "gs wavetable synth"];

/// Substrings of hardware ports preferred by auto-connect, in priority order
pub const PREFERRED_HARDWARE_PATTERNS: &[&str] =
    &["USB MIDI", "CH345", "MIDI", "Roland", "M-Audio", "Yamaha", "Korg"];

/// An open, writable connection
pub trait OutputConnection: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<(), String>;
}

/// Transport collaborator: enumerates and connects output ports
pub trait MidiBackend: Send + Sync {
    fn list_output_ports(&self) -> Result<Vec<PortName>, PortError>;

    fn connect(&self, name: &str) -> Result<Box<dyn OutputConnection>, PortError>;
}

/// Backend using the `midir` crate
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }
}

impl Default for MidirBackend {
    fn default() -> Self {
        Self::new("Ketron-Deck")
    }
}

struct MidirConnection(midir::MidiOutputConnection);

impl OutputConnection for MidirConnection {
    fn send(&mut self, bytes: &[u8]) -> Result<(), String> {
        self.0.send(bytes).map_err(|e| e.to_string())
    }
}

impl MidiBackend for MidirBackend {
    fn list_output_ports(&self) -> Result<Vec<PortName>, PortError> {
        let midi_out = midir::MidiOutput::new(&format!("{}-Scanner", self.client_name))?;

        let mut port_names = Vec::new();
        for port in midi_out.ports() {
            if let Ok(name) = midi_out.port_name(&port) {
                port_names.push(name);
            }
        }

        Ok(port_names)
    }

    fn connect(&self, name: &str) -> Result<Box<dyn OutputConnection>, PortError> {
        let midi_out = midir::MidiOutput::new(&format!("{}-Output", self.client_name))?;

        let port = midi_out
            .ports()
            .into_iter()
            .find(|p| midi_out.port_name(p).map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| PortError::PortNotFound(name.to_string()))?;

        let connection = midi_out.connect(&port, &self.client_name)?;
        Ok(Box::new(MidirConnection(connection)))
    }
}

/// A single write recorded by [`MemoryBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub port: PortName,
    pub bytes: Vec<u8>,
}

/// In-memory backend for dry runs and tests
///
/// Every write is appended to a shared log, keeping only the newest
/// `history_limit` entries when a limit is set; ports listed in `failing`
/// reject writes.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    ports: Arc<Mutex<Vec<PortName>>>,
    writes: Arc<Mutex<VecDeque<RecordedWrite>>>,
    history_limit: Option<usize>,
    connects: Arc<DashMap<PortName, usize>>,
    failing: Arc<DashMap<PortName, ()>>,
}

impl MemoryBackend {
    pub fn new<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ports: Arc::new(Mutex::new(ports.into_iter().map(Into::into).collect())),
            ..Self::default()
        }
    }

    /// Like [`MemoryBackend::new`], but only the newest `limit` writes are kept
    pub fn bounded<I, S>(ports: I, limit: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            history_limit: Some(limit),
            ..Self::new(ports)
        }
    }

    /// Recorded writes, oldest first
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().iter().cloned().collect()
    }

    /// Stop listing a port, as if the device had been unplugged
    pub fn remove_port(&self, name: &str) {
        self.ports.lock().retain(|p| p != name);
    }

    /// How many times `connect` succeeded for a port
    pub fn connect_count(&self, name: &str) -> usize {
        self.connects.get(name).map(|c| *c).unwrap_or(0)
    }

    /// Make every write to `name` fail
    pub fn fail_writes(&self, name: &str) {
        self.failing.insert(name.to_string(), ());
    }
}

struct MemoryConnection {
    port: PortName,
    writes: Arc<Mutex<VecDeque<RecordedWrite>>>,
    history_limit: Option<usize>,
    failing: Arc<DashMap<PortName, ()>>,
}

impl OutputConnection for MemoryConnection {
    fn send(&mut self, bytes: &[u8]) -> Result<(), String> {
        if self.failing.contains_key(&self.port) {
            return Err("device unplugged".to_string());
        }
        let mut log = self.writes.lock();
        log.push_back(RecordedWrite {
            port: self.port.clone(),
            bytes: bytes.to_vec(),
        });
        if let Some(limit) = self.history_limit {
            while log.len() > limit {
                log.pop_front();
            }
        }
        Ok(())
    }
}

impl MidiBackend for MemoryBackend {
    fn list_output_ports(&self) -> Result<Vec<PortName>, PortError> {
        Ok(self.ports.lock().clone())
    }

    fn connect(&self, name: &str) -> Result<Box<dyn OutputConnection>, PortError> {
        if !self.ports.lock().iter().any(|p| p == name) {
            return Err(PortError::PortNotFound(name.to_string()));
        }
        *self.connects.entry(name.to_string()).or_insert(0) += 1;
        Ok(Box::new(MemoryConnection {
            port: name.to_string(),
            writes: self.writes.clone(),
            history_limit: self.history_limit,
            failing: self.failing.clone(),
        }))
    }
}

/// An open port: the connection plus its exclusive write lock
pub struct PortHandle {
    name: PortName,
    id: u64,
    conn: Mutex<Option<Box<dyn OutputConnection>>>,
}

impl PortHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique per successful connect; unchanged by idempotent re-opens
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    fn write_frames<B: AsRef<[u8]>>(&self, frames: &[B]) -> Result<(), PortError> {
        let mut guard = self.conn.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| PortError::PortClosed(self.name.clone()))?;

        for frame in frames {
            let bytes = frame.as_ref();
            conn.send(bytes).map_err(|reason| PortError::SendError {
                port: self.name.clone(),
                reason,
            })?;
            debug!("→ {} | {}", self.name, format_hex(bytes));
        }
        Ok(())
    }
}

/// Registry of open output ports
pub struct PortRegistry {
    backend: Arc<dyn MidiBackend>,
    ports: DashMap<PortName, Arc<PortHandle>>,
    /// Serializes open/close so a name is never connected twice
    lifecycle: Mutex<()>,
    next_id: AtomicU64,
}

impl PortRegistry {
    pub fn new(backend: Arc<dyn MidiBackend>) -> Self {
        Self {
            backend,
            ports: DashMap::new(),
            lifecycle: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Output port names currently offered by the backend
    pub fn list_ports(&self) -> Result<Vec<PortName>, PortError> {
        self.backend.list_output_ports()
    }

    /// Open a port by name, or auto-select a hardware port when `name` is None.
    ///
    /// Returns the name of the open port. Re-opening an open port reuses
    /// the existing connection, even if the backend no longer lists it.
    /// A blank name is treated as None.
    pub fn open(&self, name: Option<&str>) -> Result<PortName, PortError> {
        let name = name.filter(|n| !n.trim().is_empty());

        if let Some(requested) = name {
            if self.is_open(requested) {
                debug!("MIDI port '{}' already open", requested);
                return Ok(requested.to_string());
            }
        }

        let available = self.list_ports()?;

        let target = match name {
            Some(requested) => match_port_name(&available, requested)
                .ok_or_else(|| PortError::PortNotFound(requested.to_string()))?,
            None => select_hardware_port(&available).ok_or(PortError::NoHardwarePort)?,
        };

        if let Some(requested) = name {
            if requested != target {
                info!("Port '{}' not found exactly, using '{}'", requested, target);
            }
        }

        let _guard = self.lifecycle.lock();

        if let Some(existing) = self.ports.get(&target) {
            if existing.is_open() {
                debug!("MIDI port '{}' already open", target);
                return Ok(target);
            }
        }

        let conn = self.backend.connect(&target)?;
        let handle = Arc::new(PortHandle {
            name: target.clone(),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            conn: Mutex::new(Some(conn)),
        });
        self.ports.insert(target.clone(), handle);

        info!("Opened MIDI output port: {}", target);
        Ok(target)
    }

    /// The handle for an open port
    pub fn handle(&self, name: &str) -> Option<Arc<PortHandle>> {
        self.ports
            .get(name)
            .map(|h| h.value().clone())
            .filter(|h| h.is_open())
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.handle(name).is_some()
    }

    /// Names of all open ports
    pub fn open_ports(&self) -> Vec<PortName> {
        let mut names: Vec<PortName> = self
            .ports
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Write one message to a port under its exclusive lock
    pub fn send(&self, port: &str, bytes: &[u8]) -> Result<(), PortError> {
        self.send_all(port, &[bytes])
    }

    /// Write several messages back-to-back under a single lock acquisition
    pub fn send_all<B: AsRef<[u8]>>(&self, port: &str, frames: &[B]) -> Result<(), PortError> {
        // Clone the Arc so the map shard is not held while writing
        let handle = self
            .ports
            .get(port)
            .map(|h| h.value().clone())
            .ok_or_else(|| PortError::PortClosed(port.to_string()))?;

        handle.write_frames(frames)
    }

    /// Close a port; later sends fail with `PortClosed`
    pub fn close(&self, port: &str) {
        let _guard = self.lifecycle.lock();
        if let Some((_, handle)) = self.ports.remove(port) {
            // Waits for an in-flight write to finish
            if handle.conn.lock().take().is_some() {
                info!("Closed MIDI output port: {}", port);
            }
        }
    }

    pub fn close_all(&self) {
        let names: Vec<PortName> = self.ports.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.close(&name);
        }
    }
}

impl Drop for PortRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Resolve a requested port name against the available ones.
///
/// Exact match first. USB adapters on Linux get a new client number after
/// a replug ("CH345:CH345 MIDI 1 24:0" becomes "... 16:0"), so the
/// fallbacks strip that suffix and then try prefix and substring matches,
/// all case-insensitive. Virtual ports are only reachable by exact name.
pub fn match_port_name(available: &[PortName], requested: &str) -> Option<PortName> {
    if let Some(exact) = available.iter().find(|p| *p == requested) {
        return Some(exact.clone());
    }

    let lower = requested.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }

    let hardware: Vec<&PortName> = available.iter().filter(|p| !is_virtual_port(p)).collect();

    if let Some(device) = strip_client_suffix(requested) {
        let device = device.to_lowercase();
        if let Some(p) = hardware.iter().find(|p| p.to_lowercase().starts_with(&device)) {
            return Some((*p).clone());
        }
    }

    hardware
        .iter()
        .find(|p| p.to_lowercase().starts_with(&lower))
        .or_else(|| hardware.iter().find(|p| p.to_lowercase().contains(&lower)))
        .map(|p| (*p).clone())
}

fn is_virtual_port(name: &str) -> bool {
    let lower = name.to_lowercase();
    VIRTUAL_PORT_PATTERNS.iter().any(|pat| lower.contains(pat))
}

/// "Device Name 24:0" -> Some("Device Name")
fn strip_client_suffix(name: &str) -> Option<&str> {
    let (device, suffix) = name.trim_end().rsplit_once(' ')?;
    let (client, port) = suffix.split_once(':')?;
    let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    (numeric(client) && numeric(port) && !device.trim().is_empty()).then(|| device.trim_end())
}

/// Auto-connect heuristic: drop loopback/software ports, prefer known
/// hardware vendors, else take the first remaining port.
pub fn select_hardware_port(available: &[PortName]) -> Option<PortName> {
    let candidates: Vec<&PortName> = available
        .iter()
        .filter(|name| {
            let skip = is_virtual_port(name);
            if skip {
                debug!("Skipping virtual MIDI port: {}", name);
            }
            !skip
        })
        .collect();

    if candidates.is_empty() {
        warn!("No hardware MIDI output ports among {:?}", available);
        return None;
    }

    PREFERRED_HARDWARE_PATTERNS
        .iter()
        .find_map(|pattern| {
            let pattern = pattern.to_lowercase();
            candidates
                .iter()
                .find(|name| name.to_lowercase().contains(&pattern))
        })
        .or_else(|| candidates.first())
        .map(|name| (*name).clone())
}
