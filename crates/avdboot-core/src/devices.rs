//! Device registry: snapshots of the emulators known to the device bridge
//!
//! `adb devices` prints a header followed by one `<serial>\t<state>` line per
//! attached device. Only emulator serials are kept so that a physical phone
//! plugged into the build machine is never mistaken for the instance we boot.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::errors::QueryError;

/// Serial naming scheme the device bridge uses for emulator instances
pub const EMULATOR_SERIAL_PATTERN: &str = r"^(emulator-\d+)\s+(\S+)";

fn serial_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(EMULATOR_SERIAL_PATTERN).expect("serial pattern is valid"))
}

// ----------------------------------------------------------------------------
// Device State
// ----------------------------------------------------------------------------

/// Connection state reported by the device bridge
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceState {
    /// Online and authorized
    Device,
    Offline,
    Unauthorized,
    /// Any token the bridge reports that we do not recognize
    Other(String),
}

impl DeviceState {
    pub fn parse(token: &str) -> Self {
        match token {
            "device" => DeviceState::Device,
            "offline" => DeviceState::Offline,
            "unauthorized" => DeviceState::Unauthorized,
            other => DeviceState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeviceState::Device => "device",
            DeviceState::Offline => "offline",
            DeviceState::Unauthorized => "unauthorized",
            DeviceState::Other(token) => token,
        }
    }

    /// Whether the device is ready to accept commands
    pub fn is_ready(&self) -> bool {
        matches!(self, DeviceState::Device)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Device Snapshot
// ----------------------------------------------------------------------------

/// A device that is present now but was absent from the baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDevice {
    pub serial: String,
    pub state: DeviceState,
}

/// Immutable serial → state view of the device bridge at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    devices: BTreeMap<String, DeviceState>,
}

impl DeviceSnapshot {
    /// Parse `adb devices` output, skipping headers, physical devices and
    /// malformed lines
    pub fn parse(output: &str) -> Self {
        let devices = output
            .lines()
            .filter_map(|line| {
                let captures = serial_regex().captures(line.trim_end())?;
                Some((
                    captures[1].to_string(),
                    DeviceState::parse(&captures[2]),
                ))
            })
            .collect();

        Self { devices }
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, DeviceState)>,
        S: Into<String>,
    {
        Self {
            devices: entries
                .into_iter()
                .map(|(serial, state)| (serial.into(), state))
                .collect(),
        }
    }

    pub fn get(&self, serial: &str) -> Option<&DeviceState> {
        self.devices.get(serial)
    }

    pub fn contains(&self, serial: &str) -> bool {
        self.devices.contains_key(serial)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeviceState)> {
        self.devices
            .iter()
            .map(|(serial, state)| (serial.as_str(), state))
    }

    /// First serial (in serial order) that the baseline does not know about,
    /// whatever its state
    pub fn first_new_since(&self, baseline: &DeviceSnapshot) -> Option<NewDevice> {
        self.devices
            .iter()
            .find(|(serial, _)| !baseline.contains(serial))
            .map(|(serial, state)| NewDevice {
                serial: serial.clone(),
                state: state.clone(),
            })
    }
}

// ----------------------------------------------------------------------------
// Registry Trait
// ----------------------------------------------------------------------------

/// Source of device snapshots
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Query the device bridge for the current device list
    async fn snapshot(&self) -> Result<DeviceSnapshot, QueryError>;

    /// Take a fresh snapshot and return the first device missing from `baseline`
    async fn find_new_device(
        &self,
        baseline: &DeviceSnapshot,
    ) -> Result<Option<NewDevice>, QueryError> {
        Ok(self.snapshot().await?.first_new_since(baseline))
    }
}
