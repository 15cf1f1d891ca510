//! Signal tracing and trace capture files.
//!
//! Parts register the lines worth watching with [`TelemetryHost::add_trace`],
//! tagged with one or more [`TraceCategory`] values. Every raise on a traced
//! line is recorded as a [`TraceEvent`] with its cycle stamp. The recorded
//! history can be written as a Value Change Dump for waveform viewers, or
//! saved to a compact capture file.
//!
//! ## Capture file format
//!
//! ```text
//! +------------------+
//! | Magic "BTRC"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use crate::irq::IrqId;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// Magic bytes identifying a trace capture file.
const MAGIC: &[u8; 4] = b"BTRC";
/// Current capture format version.
const FORMAT_VERSION: u32 = 1;
/// Recorded events kept before the oldest are discarded.
pub const DEFAULT_MAX_EVENTS: usize = 1 << 20;

/// Grouping used to enable or hide traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceCategory {
    InputPin,
    OutputPin,
    Misc,
    Display,
    Serial,
}

impl TraceCategory {
    pub const ALL: [TraceCategory; 5] = [
        TraceCategory::InputPin,
        TraceCategory::OutputPin,
        TraceCategory::Misc,
        TraceCategory::Display,
        TraceCategory::Serial,
    ];
}

/// A registered trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceInfo {
    /// Name of the owning part
    pub owner: String,
    pub line: u32,
    /// Full line name, `<owner>.<line>`
    pub name: String,
    pub categories: Vec<TraceCategory>,
}

/// One recorded raise on a traced line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub cycle: u64,
    pub line: u32,
    pub value: u8,
}

/// Everything needed to replay a recorded run offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    pub clock_hz: u32,
    pub traces: Vec<TraceInfo>,
    pub events: Vec<TraceEvent>,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("capture encoding: {0}")]
    Encode(#[from] bincode::Error),
    #[error("file too small")]
    Truncated,
    #[error("not a trace capture file (bad magic)")]
    BadMagic,
    #[error("unsupported capture version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("decompress error: {0}")]
    Decompress(String),
}

pub struct TelemetryHost {
    traces: Vec<TraceInfo>,
    enabled: Vec<TraceCategory>,
    events: Vec<TraceEvent>,
    max_events: usize,
    /// Events discarded to stay within `max_events`
    dropped: u64,
}

impl TelemetryHost {
    pub fn new() -> Self {
        TelemetryHost {
            traces: Vec::new(),
            enabled: TraceCategory::ALL.to_vec(),
            events: Vec::new(),
            max_events: DEFAULT_MAX_EVENTS,
            dropped: 0,
        }
    }

    /// Bound the recorded history (at least one event). Older events are
    /// discarded first.
    pub fn set_max_events(&mut self, max: usize) {
        self.max_events = max.max(1);
        if self.events.len() > self.max_events {
            self.discard(self.events.len() - self.max_events);
        }
    }

    pub fn max_events(&self) -> usize { self.max_events }

    /// Number of events discarded so far.
    pub fn dropped(&self) -> u64 { self.dropped }

    fn discard(&mut self, n: usize) {
        if self.dropped == 0 {
            log::warn!("Trace history full ({} events), discarding oldest", self.max_events);
        }
        self.events.drain(..n);
        self.dropped += n as u64;
    }

    /// Restrict which categories get traced. Affects later registrations only.
    pub fn set_enabled_categories(&mut self, categories: &[TraceCategory]) {
        self.enabled = categories.to_vec();
    }

    /// Trace `line` if any of `categories` is enabled. Returns whether the
    /// trace was added.
    pub fn add_trace(&mut self, owner: &str, line: IrqId, name: &str, categories: &[TraceCategory]) -> bool {
        if !categories.iter().any(|c| self.enabled.contains(c)) {
            log::debug!("Trace {} skipped (category disabled)", name);
            return false;
        }
        if self.is_traced(line) {
            return false;
        }
        self.traces.push(TraceInfo {
            owner: owner.to_string(),
            line: line.0,
            name: name.to_string(),
            categories: categories.to_vec(),
        });
        true
    }

    pub fn is_traced(&self, line: IrqId) -> bool {
        self.traces.iter().any(|t| t.line == line.0)
    }

    pub fn traces(&self) -> &[TraceInfo] { &self.traces }

    /// Record a raise; untraced lines are ignored. A full history drops its
    /// oldest quarter in one go, so the cost stays amortised.
    pub fn record(&mut self, cycle: u64, line: IrqId, value: u8) {
        if !self.is_traced(line) {
            return;
        }
        if self.events.len() >= self.max_events {
            let n = (self.max_events / 4).max(1);
            self.discard(n);
        }
        self.events.push(TraceEvent { cycle, line: line.0, value });
    }

    pub fn events(&self) -> &[TraceEvent] { &self.events }

    pub fn events_for(&self, line: IrqId) -> Vec<TraceEvent> {
        self.events.iter().filter(|e| e.line == line.0).copied().collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }

    pub fn capture(&self, clock_hz: u32) -> Capture {
        Capture { clock_hz, traces: self.traces.clone(), events: self.events.clone() }
    }

    /// Write captured events as a Value Change Dump (1 ns timescale).
    pub fn write_vcd<W: Write>(&self, out: &mut W, clock_hz: u32) -> std::io::Result<()> {
        write_vcd(&self.capture(clock_hz), out)
    }

    /// Save captured events to a capture file.
    pub fn save_capture(&self, clock_hz: u32, path: &Path) -> Result<(), CaptureError> {
        save_to_file(&self.capture(clock_hz), path)
    }
}

impl Default for TelemetryHost {
    fn default() -> Self {
        Self::new()
    }
}

/// VCD identifiers are printable ASCII from '!' upwards.
fn vcd_id(index: usize) -> String {
    let mut n = index;
    let mut id = String::new();
    loop {
        id.push((b'!' + (n % 94) as u8) as char);
        n /= 94;
        if n == 0 { break; }
        n -= 1;
    }
    id
}

pub fn write_vcd<W: Write>(capture: &Capture, out: &mut W) -> std::io::Result<()> {
    let hz = capture.clock_hz.max(1) as u64;
    writeln!(out, "$timescale 1ns $end")?;
    writeln!(out, "$scope module board $end")?;
    for (i, t) in capture.traces.iter().enumerate() {
        writeln!(out, "$var wire 1 {} {} $end", vcd_id(i), t.name)?;
    }
    writeln!(out, "$upscope $end")?;
    writeln!(out, "$enddefinitions $end")?;
    let mut last_time = None;
    for e in &capture.events {
        let Some(idx) = capture.traces.iter().position(|t| t.line == e.line) else { continue };
        let ns = u64::try_from(e.cycle as u128 * 1_000_000_000 / hz as u128).unwrap_or(u64::MAX);
        if last_time != Some(ns) {
            writeln!(out, "#{}", ns)?;
            last_time = Some(ns);
        }
        writeln!(out, "{}{}", if e.value != 0 { 1 } else { 0 }, vcd_id(idx))?;
    }
    Ok(())
}

/// Save a capture with header and deflate compression.
pub fn save_to_file(capture: &Capture, path: &Path) -> Result<(), CaptureError> {
    let payload = bincode::serialize(capture)?;
    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(8 + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&compressed);

    std::fs::write(path, &out)?;
    Ok(())
}

/// Load a capture, verifying magic and version.
pub fn load_capture(path: &Path) -> Result<Capture, CaptureError> {
    let data = std::fs::read(path)?;
    if data.len() < 8 {
        return Err(CaptureError::Truncated);
    }
    if &data[0..4] != MAGIC {
        return Err(CaptureError::BadMagic);
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(CaptureError::Version { found: version, expected: FORMAT_VERSION });
    }
    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[8..])
        .map_err(|e| CaptureError::Decompress(format!("{:?}", e)))?;
    Ok(bincode::deserialize(&decompressed)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_with_trace() -> TelemetryHost {
        let mut th = TelemetryHost::new();
        assert!(th.add_trace("BTN1", IrqId(0), "BTN1.BUTTON_OUT",
            &[TraceCategory::InputPin, TraceCategory::Misc]));
        th
    }

    #[test]
    fn test_record_only_traced() {
        let mut th = host_with_trace();
        th.record(10, IrqId(0), 0);
        th.record(10, IrqId(1), 0);
        th.record(20, IrqId(0), 1);
        assert_eq!(th.events().len(), 2);
        assert_eq!(th.events_for(IrqId(0))[1], TraceEvent { cycle: 20, line: 0, value: 1 });
        th.clear();
        assert!(th.events().is_empty());
    }

    #[test]
    fn test_category_filter() {
        let mut th = TelemetryHost::new();
        th.set_enabled_categories(&[TraceCategory::Display]);
        assert!(!th.add_trace("BTN1", IrqId(0), "BTN1.BUTTON_OUT", &[TraceCategory::InputPin]));
        assert!(th.add_trace("LCD", IrqId(1), "LCD.E", &[TraceCategory::Display, TraceCategory::Misc]));
        assert_eq!(th.traces().len(), 1);
    }

    #[test]
    fn test_duplicate_trace() {
        let mut th = host_with_trace();
        assert!(!th.add_trace("BTN1", IrqId(0), "BTN1.BUTTON_OUT", &[TraceCategory::Misc]));
        assert_eq!(th.traces().len(), 1);
    }

    #[test]
    fn test_vcd_output() {
        let mut th = host_with_trace();
        th.record(0, IrqId(0), 0);
        th.record(8000, IrqId(0), 1);
        let mut out = Vec::new();
        th.write_vcd(&mut out, 16_000_000).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("$var wire 1 ! BTN1.BUTTON_OUT $end"));
        assert!(text.contains("#0\n0!\n"));
        assert!(text.contains("#500000\n1!\n"));
    }

    #[test]
    fn test_vcd_ids_unique() {
        assert_eq!(vcd_id(0), "!");
        assert_eq!(vcd_id(93), "~");
        assert_ne!(vcd_id(94), vcd_id(0));
        assert_eq!(vcd_id(94).len(), 2);
    }

    #[test]
    fn test_capture_file() {
        let mut th = host_with_trace();
        th.record(0, IrqId(0), 0);
        th.record(8000, IrqId(0), 1);
        let path = std::env::temp_dir().join(format!("avr-parts-capture-{}.btrc", std::process::id()));
        th.save_capture(16_000_000, &path).unwrap();
        let cap = load_capture(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(cap, th.capture(16_000_000));
        assert_eq!(cap.events.len(), 2);
    }

    #[test]
    fn test_capture_bad_magic() {
        let path = std::env::temp_dir().join(format!("avr-parts-badmagic-{}.btrc", std::process::id()));
        std::fs::write(&path, b"ABES\x01\x00\x00\x00junk").unwrap();
        let err = load_capture(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, CaptureError::BadMagic));
    }

    #[test]
    fn test_capture_truncated() {
        let path = std::env::temp_dir().join(format!("avr-parts-short-{}.btrc", std::process::id()));
        std::fs::write(&path, b"BTRC").unwrap();
        let err = load_capture(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, CaptureError::Truncated));
    }

    #[test]
    fn test_history_bounded() {
        let mut th = host_with_trace();
        th.set_max_events(8);
        for cycle in 0..20 {
            th.record(cycle, IrqId(0), (cycle % 2) as u8);
        }
        assert!(th.events().len() <= 8);
        assert_eq!(th.events().last().map(|e| e.cycle), Some(19));
        assert_eq!(th.dropped() + th.events().len() as u64, 20);
        // Oldest first, no gaps in what is kept
        let cycles: Vec<u64> = th.events().iter().map(|e| e.cycle).collect();
        let first = cycles[0];
        assert_eq!(cycles, (first..20).collect::<Vec<_>>());

        th.set_max_events(2);
        assert_eq!(th.events().len(), 2);
        assert_eq!(th.events()[0].cycle, 18);
        th.clear();
        assert_eq!(th.dropped(), 0);
        assert_eq!(TelemetryHost::new().max_events(), DEFAULT_MAX_EVENTS);
    }
}
