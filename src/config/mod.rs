//! Configuration management for Cymbal GW
//!
//! Loads and validates the YAML configuration. Every field has a default,
//! so an empty file (or no file at all) describes the stock two-hammer
//! instrument.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::fs;
use tracing::warn;

use crate::dispatcher::{Action, DispatchSettings, KEYMAP};
use crate::input::RecordLayout;
use crate::notes::{DurationTable, NotePlacement, NoteTable};
use crate::protocol::{in_bounds, DeviceId, MAX_POSITION, MIN_POSITION};
use crate::sequencer::Timing;
use crate::transport::device::DEFAULT_SPEED_HZ;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default = "default_notes")]
    pub notes: BTreeMap<char, NoteConfig>,
    /// Duration symbol → delay in milliseconds
    #[serde(default = "default_durations")]
    pub durations: BTreeMap<char, u64>,
}

/// Hammer bus configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    /// Character device the frames are written to
    #[serde(default = "default_bus_device")]
    pub device: String,
    /// SPI clock applied when the device is opened; `null` keeps the
    /// node's current setting
    #[serde(default = "default_speed_hz")]
    pub speed_hz: Option<u32>,
}

/// Bus transport selection
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Write frames to `bus.device`
    Device,
    /// Log frames only
    Console,
}

/// Keyboard input configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    #[serde(default = "default_input_device")]
    pub device: String,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,
    #[serde(default)]
    pub record_layout: RecordLayout,
}

/// Mechanical timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingConfig {
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
    /// Strike payload for notes and strike keys (10ms units)
    #[serde(default = "default_strike_duration")]
    pub strike_duration: u32,
    #[serde(default = "default_gesture_pause")]
    pub gesture_pause_ms: u64,
}

/// Dispatcher state configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_initial_device")]
    pub initial_device: u8,
    #[serde(default = "default_toggle_devices")]
    pub toggle_devices: [u8; 2],
}

/// Note placement
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct NoteConfig {
    pub device: u8,
    pub position: u8,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_yaml(&contents).with_context(|| format!("Invalid config file: {}", path))
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        // An empty document parses as null
        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.bus.transport == TransportKind::Device && self.bus.device.is_empty() {
            anyhow::bail!("bus.device cannot be empty with the device transport");
        }

        if self.bus.speed_hz == Some(0) {
            anyhow::bail!("bus.speed_hz must be greater than zero");
        }

        if self.input.poll_timeout_ms == 0 {
            anyhow::bail!("input.poll_timeout_ms must be greater than zero");
        }

        let [first, second] = self.dispatcher.toggle_devices;
        if first == second {
            anyhow::bail!("dispatcher.toggle_devices must name two different devices");
        }
        for id in [first, second, self.dispatcher.initial_device] {
            if DeviceId(id).is_broadcast() {
                anyhow::bail!("dispatcher devices cannot use the broadcast id");
            }
        }
        if !self
            .dispatcher
            .toggle_devices
            .contains(&self.dispatcher.initial_device)
        {
            anyhow::bail!(
                "dispatcher.initial_device {} must be one of the toggle devices {:?}",
                self.dispatcher.initial_device,
                self.dispatcher.toggle_devices
            );
        }

        for (note, placement) in &self.notes {
            if DeviceId(placement.device).is_broadcast() {
                anyhow::bail!("Note '{}' cannot be placed on the broadcast id", note);
            }
            if !in_bounds(placement.position as i32) {
                anyhow::bail!(
                    "Note '{}' position {} is out of range ({}-{})",
                    note,
                    placement.position,
                    MIN_POSITION,
                    MAX_POSITION
                );
            }
        }

        if self.durations.is_empty() {
            anyhow::bail!("At least one duration symbol must be defined");
        }

        let unmapped = self.unplayable_note_keys();
        if !unmapped.is_empty() {
            warn!(
                "Note keys without a note table entry will be skipped: {:?}",
                unmapped
            );
        }

        Ok(())
    }

    /// Note symbols bound to a key but missing from `notes`
    pub fn unplayable_note_keys(&self) -> Vec<char> {
        KEYMAP
            .iter()
            .filter_map(|(_, action)| match action {
                Action::Note(note) if !self.notes.contains_key(note) => Some(*note),
                _ => None,
            })
            .collect()
    }

    pub fn note_table(&self) -> NoteTable {
        NoteTable::new(self.notes.iter().map(|(note, placement)| {
            (
                *note,
                NotePlacement {
                    device: DeviceId(placement.device),
                    position: placement.position,
                },
            )
        }))
    }

    pub fn duration_table(&self) -> DurationTable {
        DurationTable::new(
            self.durations
                .iter()
                .map(|(symbol, ms)| (*symbol, Duration::from_millis(*ms))),
        )
    }

    pub fn sequencer_timing(&self) -> Timing {
        Timing {
            settle: Duration::from_millis(self.timing.settle_ms),
            strike_duration: self.timing.strike_duration,
            gesture_pause: Duration::from_millis(self.timing.gesture_pause_ms),
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        let [first, second] = self.dispatcher.toggle_devices;
        DispatchSettings {
            initial_device: DeviceId(self.dispatcher.initial_device),
            toggle_devices: (DeviceId(first), DeviceId(second)),
            poll_timeout: Duration::from_millis(self.input.poll_timeout_ms),
        }
    }
}

impl Default for AppConfig {
    /// Stock instrument: default tables and timing
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            input: InputConfig::default(),
            timing: TimingConfig::default(),
            dispatcher: DispatcherConfig::default(),
            notes: default_notes(),
            durations: default_durations(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            device: default_bus_device(),
            speed_hz: default_speed_hz(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            device: default_input_device(),
            poll_timeout_ms: default_poll_timeout(),
            record_layout: RecordLayout::default(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle(),
            strike_duration: default_strike_duration(),
            gesture_pause_ms: default_gesture_pause(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            initial_device: default_initial_device(),
            toggle_devices: default_toggle_devices(),
        }
    }
}

// Default value functions
fn default_transport() -> TransportKind { TransportKind::Device }
fn default_bus_device() -> String { "/dev/spidev0.0".to_string() }
fn default_speed_hz() -> Option<u32> { Some(DEFAULT_SPEED_HZ) }
fn default_input_device() -> String {
    "/dev/input/by-path/platform-fd500000.pcie-pci-0000:01:00.0-usb-0:1.4:1.0-event-kbd".to_string()
}
fn default_poll_timeout() -> u64 { 1000 }
fn default_settle() -> u64 { 120 }
fn default_strike_duration() -> u32 { 2 }
fn default_gesture_pause() -> u64 { 200 }
fn default_initial_device() -> u8 { 1 }
fn default_toggle_devices() -> [u8; 2] { [1, 2] }
fn default_notes() -> BTreeMap<char, NoteConfig> {
    NoteTable::default()
        .iter()
        .map(|(note, placement)| {
            (
                note,
                NoteConfig {
                    device: placement.device.0,
                    position: placement.position,
                },
            )
        })
        .collect()
}
fn default_durations() -> BTreeMap<char, u64> {
    DurationTable::default()
        .iter()
        .map(|(symbol, delay)| (symbol, delay.as_millis() as u64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_document_is_stock_instrument() {
        let config = AppConfig::from_yaml("").unwrap();

        assert_eq!(config.bus.transport, TransportKind::Device);
        assert_eq!(config.bus.device, "/dev/spidev0.0");
        assert_eq!(config.input.record_layout, RecordLayout::Compact);
        assert_eq!(config.note_table(), NoteTable::default());
        assert_eq!(config.duration_table(), DurationTable::default());
        assert_eq!(config.sequencer_timing(), Timing::default());
        assert_eq!(config.dispatch_settings(), DispatchSettings::default());
        assert_eq!(config.bus.speed_hz, Some(10_000));
        assert!(config.unplayable_note_keys().is_empty());
    }

    #[test]
    fn test_bus_speed_setting() {
        let config = AppConfig::from_yaml("bus:\n  speed_hz: 20000\n").unwrap();
        assert_eq!(config.bus.speed_hz, Some(20_000));

        let config = AppConfig::from_yaml("bus:\n  speed_hz: null\n").unwrap();
        assert_eq!(config.bus.speed_hz, None);

        assert!(AppConfig::from_yaml("bus:\n  speed_hz: 0\n").is_err());
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = AppConfig::from_yaml(
            r#"
bus:
  transport: console
timing:
  settle_ms: 150
input:
  record_layout: wide
"#,
        )
        .unwrap();

        assert_eq!(config.bus.transport, TransportKind::Console);
        assert_eq!(config.timing.settle_ms, 150);
        assert_eq!(config.timing.strike_duration, 2);
        assert_eq!(config.input.record_layout, RecordLayout::Wide);
        assert_eq!(config.notes.len(), 12);
    }

    #[test]
    fn test_custom_tables() {
        let config = AppConfig::from_yaml(
            r#"
notes:
  G: { device: 1, position: 45 }
  C: { device: 2, position: 38 }
durations:
  o: 250
  O: 400
  ".": 120
"#,
        )
        .unwrap();

        let notes = config.note_table();
        assert_eq!(notes.len(), 2);
        // Accepted, but ten note keys have nothing to play
        let unplayable = config.unplayable_note_keys();
        assert_eq!(unplayable.len(), 10);
        assert!(!unplayable.contains(&'G'));
        assert!(unplayable.contains(&'d'));
        assert_eq!(notes.get('C').unwrap().device, DeviceId(2));
        assert_eq!(
            config.duration_table().lookup('.').unwrap(),
            Duration::from_millis(120)
        );
    }

    #[test]
    fn test_example_file_matches_defaults() {
        let config = AppConfig::from_yaml(include_str!("../../config.example.yaml")).unwrap();

        assert_eq!(config.note_table(), NoteTable::default());
        assert_eq!(config.duration_table(), DurationTable::default());
        assert_eq!(config.sequencer_timing(), Timing::default());
    }

    #[test]
    fn test_rejects_out_of_range_note() {
        let result = AppConfig::from_yaml(
            r#"
notes:
  G: { device: 1, position: 90 }
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_broadcast_note_device() {
        let result = AppConfig::from_yaml(
            r#"
notes:
  G: { device: 255, position: 45 }
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bad_toggle_pair() {
        assert!(AppConfig::from_yaml("dispatcher:\n  toggle_devices: [1, 1]\n").is_err());
        assert!(AppConfig::from_yaml("dispatcher:\n  initial_device: 3\n").is_err());
        assert!(AppConfig::from_yaml("dispatcher:\n  toggle_devices: [1, 255]\n").is_err());
    }

    #[test]
    fn test_rejects_zero_poll_timeout() {
        assert!(AppConfig::from_yaml("input:\n  poll_timeout_ms: 0\n").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() -> Result<()> {
        let file = NamedTempFile::new()?;
        std::fs::write(
            file.path(),
            "bus:\n  transport: console\ndispatcher:\n  initial_device: 2\n",
        )?;

        let config = AppConfig::load(&file.path().to_string_lossy()).await?;

        assert_eq!(config.bus.transport, TransportKind::Console);
        assert_eq!(config.dispatch_settings().initial_device, DeviceId(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        assert!(AppConfig::load("/nonexistent/cymbal.yaml").await.is_err());
    }
}
