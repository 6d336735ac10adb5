use serde::{Deserialize, Serialize};

/// One decoded sighting of a droid, built from a single advertisement event.
///
/// Instances are immutable; a later sighting of the same address supersedes
/// the earlier one rather than being merged into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroidAdvertisement {
    /// Link-layer address, stable for one power-cycle of the toy
    pub address: u64,
    /// Signal strength in dBm at the time of the sighting
    pub rssi: i16,
    /// Friendly name recovered through best-effort enrichment, if any
    pub display_name: Option<String>,
    pub faction_code: u8,
    pub personality_code: u8,
    pub affiliation_code: u8,
    /// Droid is paired with a remote
    pub paired: bool,
    /// A personality chip is inserted
    pub chip_present: bool,
    /// Full manufacturer-data block, retained for diagnostics
    pub raw_payload: Vec<u8>,
}

impl DroidAdvertisement {
    /// Beacon spec that would make this engine broadcast as the sighted droid.
    pub fn impersonation_spec(&self) -> BeaconSpec {
        BeaconSpec::Impersonation(ImpersonationBeacon {
            faction_code: self.faction_code,
            personality_code: self.personality_code,
            affiliation_code: self.affiliation_code,
        })
    }
}

/// Fields recovered from a droid-frame manufacturer-data block, before the
/// link-layer context (address, RSSI) is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DroidBroadcast {
    pub faction_code: u8,
    pub personality_code: u8,
    pub affiliation_code: u8,
    pub paired: bool,
    pub chip_present: bool,
}

/// What a beacon session broadcasts. Exactly one variant per session;
/// immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeaconSpec {
    Location(LocationBeacon),
    Impersonation(ImpersonationBeacon),
}

impl BeaconSpec {
    pub fn kind(&self) -> BeaconKind {
        match self {
            BeaconSpec::Location(_) => BeaconKind::Location,
            BeaconSpec::Impersonation(_) => BeaconKind::Droid,
        }
    }
}

/// Wire-level beacon family. Droid firmware tracks its reaction cooldown
/// per kind, which is why the engine keys its pacing on this and not on the
/// full spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BeaconKind {
    Location,
    Droid,
}

/// Park-location beacon. Droids within `rssi_floor` react with audio from
/// the location's group and then hold off for `cooldown_ticks` x 5 seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationBeacon {
    pub location_id: u8,
    /// Multiples of 5 seconds; 0xFF is the observed firmware override value
    pub cooldown_ticks: u8,
    /// Weakest signal the droid will react to, as a raw protocol byte
    pub rssi_floor: u8,
}

/// Beacon that presents this advertiser as another droid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpersonationBeacon {
    pub faction_code: u8,
    pub personality_code: u8,
    pub affiliation_code: u8,
}

/// Action families accepted by the droid's command characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOpcode {
    Audio,
    Script,
    Drive,
}

/// A single framed write to the command characteristic.
///
/// Frames are produced by the builders in `protocol` and re-checked against
/// the packet structure before transmission; a malformed frame never reaches
/// the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub opcode: CommandOpcode,
    bytes: Vec<u8>,
}

impl CommandFrame {
    pub(crate) fn new(opcode: CommandOpcode, bytes: Vec<u8>) -> Self {
        Self { opcode, bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Scan session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

/// Beacon session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconState {
    Idle,
    Advertising,
}

/// Connection session states. `Ready` is only reachable through `Connecting`
/// and a successful service discovery plus LOGON handshake; link loss drops
/// any state back to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Ready,
}

/// Droid motors addressable by drive frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motor {
    Left = 0,
    Right = 1,
    Head = 2,
}

impl Motor {
    pub fn id(self) -> u8 {
        self as u8
    }
}
