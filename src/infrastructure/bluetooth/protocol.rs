//! Droid Wire Protocol
//!
//! This module contains the protocol definitions for droid advertisements
//! and command traffic. Everything here is reverse-documented community
//! knowledge: droid firmware ships no public contract, so the layout and
//! the command tables are treated as versioned data that later firmware
//! waves may extend.

use crate::domain::models::{
    BeaconSpec, CommandFrame, CommandOpcode, DroidBroadcast, Motor,
};
use thiserror::Error;

/// Manufacturer id carried in the first two block bytes, little-endian
pub const MANUFACTURER_ID: u16 = 0x0A83;

/// Magic marker at the start of every droid manufacturer-data block
pub const MAGIC: [u8; 2] = [0x83, 0x0A];

/// Advertised local name all droids use
pub const DROID_LOCAL_NAME: &str = "DROID";

/// Fixed manufacturer-data block length
pub const BLOCK_LEN: usize = 6;

/// Droid control BLE Service UUID
pub const SERVICE_UUID: &str = "09b600a0-3e42-41fc-b474-e9c0c8f0c801";

/// Command characteristic UUID - where command frames are written
pub const COMMAND_CHAR_UUID: &str = "09b600b1-3e42-41fc-b474-e9c0c8f0c801";

/// Notify characteristic UUID - where the droid reports state
pub const NOTIFY_CHAR_UUID: &str = "09b600b0-3e42-41fc-b474-e9c0c8f0c801";

/// Authentication handshake written after connecting, before any command.
/// Three raw bytes; deliberately not shaped like a command frame.
pub const LOGON: [u8; 3] = [0x22, 0x20, 0x01];

/// Firmware misses single LOGON writes often enough that the handshake is
/// repeated this many times
pub const LOGON_REPEATS: u32 = 3;

/// Gap between consecutive characteristic writes in milliseconds
pub const COMMAND_DELAY_MS: u64 = 100;

/// Confirmation chirp played once a session reaches ready: group 0, clip 2
pub const CONNECT_SOUND: (u8, u8) = (0x00, 0x02);

/// One cooldown tick in a location beacon is this many seconds
pub const COOLDOWN_TICK_SECS: u64 = 5;

/// Droid firmware holds off at least this long before reacting again to a
/// beacon of the same type from the same advertiser
pub const BEACON_INTERVAL_FLOOR_SECS: u64 = 60;

/// Observed gap droids keep between reactions to droid-presence beacons
pub const DROID_REACTION_GAP_SECS: u64 = 120;

/// Default minimum-RSSI byte for location beacons, the "mid" threshold
/// observed from park emitters
pub const DEFAULT_RSSI_FLOOR: u8 = 0xA6;

/// Byte offsets into the manufacturer-data block.
///
/// ```text
/// [0-1] : Magic marker 0x83, 0x0A (manufacturer id 0x0A83 little-endian)
/// [2]   : Droid frame: faction code      | Location frame: location id
/// [3]   : Droid frame: personality code  | Location frame: cooldown ticks (x5 s)
/// [4]   : Droid frame: affiliation code  | Location frame: minimum-RSSI byte
/// [5]   : Status bitmask (see [`status`]); bit 0x02 discriminates the variants
/// ```
pub mod offset {
    pub const FIELD_A: usize = 2;
    pub const FIELD_B: usize = 3;
    pub const FIELD_C: usize = 4;
    pub const STATUS: usize = 5;
}

/// Status byte bits
pub mod status {
    /// Set on every beacon the firmware emits
    pub const ACTIVE: u8 = 0x01;
    /// Set: droid-presence frame. Clear: location beacon.
    pub const DROID_FRAME: u8 = 0x02;
    /// Droid is paired with a remote
    pub const PAIRED: u8 = 0x04;
    /// A personality chip is inserted
    pub const CHIP_INSERTED: u8 = 0x08;
}

/// Decode a manufacturer-data block into droid-presence fields.
///
/// Returns `None` for anything that is not a droid frame: foreign
/// manufacturer data, location beacons, and blocks shorter than the fixed
/// layout. Scanning runs against noisy partial radio data, so none of these
/// are errors. Codes without a catalog entry decode unchanged.
pub fn decode(raw: &[u8]) -> Option<DroidBroadcast> {
    if raw.len() < BLOCK_LEN {
        return None;
    }
    if raw[..2] != MAGIC {
        return None;
    }
    let status = raw[offset::STATUS];
    if status & status::DROID_FRAME == 0 {
        return None;
    }
    Some(DroidBroadcast {
        faction_code: raw[offset::FIELD_A],
        personality_code: raw[offset::FIELD_B],
        affiliation_code: raw[offset::FIELD_C],
        paired: status & status::PAIRED != 0,
        chip_present: status & status::CHIP_INSERTED != 0,
    })
}

/// Encode a beacon spec into the fixed-length manufacturer-data block.
///
/// Total: every valid spec has exactly one encoding, and the firmware does
/// not validate codes, so out-of-range values pass through unchanged.
/// Impersonation blocks carry the status a live chipped droid broadcasts,
/// which makes `decode` a left inverse of `encode` for that variant.
pub fn encode(spec: &BeaconSpec) -> [u8; BLOCK_LEN] {
    match spec {
        BeaconSpec::Location(loc) => [
            MAGIC[0],
            MAGIC[1],
            loc.location_id,
            loc.cooldown_ticks,
            loc.rssi_floor,
            status::ACTIVE,
        ],
        BeaconSpec::Impersonation(droid) => [
            MAGIC[0],
            MAGIC[1],
            droid.faction_code,
            droid.personality_code,
            droid.affiliation_code,
            status::ACTIVE | status::DROID_FRAME | status::CHIP_INSERTED,
        ],
    }
}

/// Errors from [`validate_frame`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length {0} outside 5..=35 bytes")]
    Length(usize),
    #[error("length header 0x{found:02X}, expected 0x{expected:02X}")]
    LengthHeader { found: u8, expected: u8 },
    #[error("logic guard 0x{found:02X} wrong for command 0x{command:02X}")]
    LogicGuard { found: u8, command: u8 },
    #[error("payload header 0x{found:02X}, expected 0x{expected:02X}")]
    PayloadHeader { found: u8, expected: u8 },
}

/// Check a frame against the command packet structure:
///
/// ```text
/// byte 0: 0x1F + total frame length
/// byte 1: 0x42 if command id is 0x0F, else 0x00   (logic guard)
/// byte 2: command id
/// byte 3: 0x40 + payload length
/// byte 4…: payload (max 31 bytes)
/// ```
///
/// Sessions run this before every transmission so a malformed frame never
/// reaches the radio.
pub fn validate_frame(bytes: &[u8]) -> Result<(), FrameError> {
    let len = bytes.len();
    if !(5..=35).contains(&len) {
        return Err(FrameError::Length(len));
    }
    let expected_len_header = 0x1F + len as u8;
    if bytes[0] != expected_len_header {
        return Err(FrameError::LengthHeader {
            found: bytes[0],
            expected: expected_len_header,
        });
    }
    let command = bytes[2];
    let expected_guard = if command == 0x0F { 0x42 } else { 0x00 };
    if bytes[1] != expected_guard {
        return Err(FrameError::LogicGuard {
            found: bytes[1],
            command,
        });
    }
    let expected_payload_header = 0x40 + (len as u8 - 4);
    if bytes[3] != expected_payload_header {
        return Err(FrameError::PayloadHeader {
            found: bytes[3],
            expected: expected_payload_header,
        });
    }
    Ok(())
}

// Audio controller preamble: guard + command 0x0F + payload header + routing
const AUDIO_BASE: [u8; 6] = [0x27, 0x42, 0x0F, 0x44, 0x44, 0x00];

/// Select the active audio group; must precede [`audio_clip_frame`]
pub fn audio_group_frame(group: u8) -> CommandFrame {
    let mut bytes = AUDIO_BASE.to_vec();
    bytes.extend_from_slice(&[0x1F, group]);
    CommandFrame::new(CommandOpcode::Audio, bytes)
}

/// Play a clip from the previously selected group
pub fn audio_clip_frame(clip: u8) -> CommandFrame {
    let mut bytes = AUDIO_BASE.to_vec();
    bytes.extend_from_slice(&[0x18, clip]);
    CommandFrame::new(CommandOpcode::Audio, bytes)
}

/// Run an animation script stored on the droid
pub fn script_frame(script_id: u8) -> CommandFrame {
    CommandFrame::new(
        CommandOpcode::Script,
        vec![0x25, 0x00, 0x0C, 0x42, script_id, 0x02],
    )
}

// Throttle below this magnitude is treated as a stop request
const DRIVE_DEADBAND: f32 = 0.05;
// Motors stall below 0x60
const DRIVE_SPEED_FLOOR: u8 = 0x60;
// Default acceleration ramp, 300 ms
const DRIVE_RAMP: [u8; 2] = [0x01, 0x2C];

/// Direct motor drive. Throttle is -1.0..=1.0; magnitudes inside the
/// deadband produce the stop frame for that motor.
pub fn drive_frame(motor: Motor, throttle: f32) -> CommandFrame {
    let magnitude = throttle.abs().min(1.0);
    if magnitude < DRIVE_DEADBAND {
        return motor_stop_frame(motor);
    }

    // Direction: 0x00 forward, 0x80 reverse, or-ed with the motor id
    let direction = if throttle > 0.0 { 0x00 } else { 0x80 };
    let span = f32::from(0xFF_u8 - DRIVE_SPEED_FLOOR);
    let speed = DRIVE_SPEED_FLOOR + (magnitude * span) as u8;

    CommandFrame::new(
        CommandOpcode::Drive,
        vec![
            0x27,
            0x00,
            0x05,
            0x44,
            direction | motor.id(),
            speed,
            DRIVE_RAMP[0],
            DRIVE_RAMP[1],
        ],
    )
}

/// Zero one motor
pub fn motor_stop_frame(motor: Motor) -> CommandFrame {
    CommandFrame::new(
        CommandOpcode::Drive,
        vec![0x27, 0x00, 0x05, 0x44, motor.id(), 0x00, 0x00, 0x00],
    )
}

/// Smooth head rotation for R-series domes. Positive turns right.
pub fn head_turn_frame(value: f32) -> CommandFrame {
    let magnitude = value.abs().min(1.0);
    if magnitude < DRIVE_DEADBAND {
        return motor_stop_frame(Motor::Head);
    }

    let direction = if value > 0.0 { 0x00 } else { 0xFF };
    let speed = (magnitude * 0xFF as f32) as u8;

    CommandFrame::new(
        CommandOpcode::Drive,
        vec![
            0x2B, 0x42, 0x0F, 0x48, 0x44, 0x02, direction, speed, 0x00, 0x64,
            0x00, 0x01,
        ],
    )
}

/// BB-series roll. Direction and speed are raw firmware bytes.
pub fn bb_drive_frame(direction: u8, speed: u8) -> CommandFrame {
    CommandFrame::new(
        CommandOpcode::Drive,
        vec![
            0x2B, 0x42, 0x0F, 0x48, 0x44, 0x05, direction, speed, 0x01, 0x90,
            0x00, 0x00,
        ],
    )
}

/// BB-series rotate in place
pub fn bb_rotate_frame(direction: u8, speed: u8) -> CommandFrame {
    CommandFrame::new(
        CommandOpcode::Drive,
        vec![
            0x2B, 0x42, 0x0F, 0x48, 0x44, 0x04, direction, speed, 0x00, 0x05,
            0x00, 0x00,
        ],
    )
}

/// Trigger attached accessory hardware; droids without one ignore it
pub fn accessory_frame() -> CommandFrame {
    CommandFrame::new(
        CommandOpcode::Drive,
        vec![0x27, 0x42, 0x0F, 0x44, 0x44, 0x00, 0x10, 0x08],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ImpersonationBeacon, LocationBeacon};
    use proptest::prelude::*;

    #[test]
    fn decode_documented_scenario() {
        let raw = [0x83, 0x0A, 0x01, 0x02, 0x01, 0x03];
        let broadcast = decode(&raw).expect("droid frame");
        assert_eq!(broadcast.faction_code, 1);
        assert_eq!(broadcast.personality_code, 2);
        assert_eq!(broadcast.affiliation_code, 1);
        assert!(!broadcast.paired);
        assert!(!broadcast.chip_present);
    }

    #[test]
    fn decode_reads_flag_bits() {
        let raw = [0x83, 0x0A, 0x05, 0x0A, 0x05, 0x0F];
        let broadcast = decode(&raw).unwrap();
        assert!(broadcast.paired);
        assert!(broadcast.chip_present);
    }

    #[test]
    fn decode_rejects_wrong_magic() {
        assert!(decode(&[0x83, 0x01, 0x01, 0x02, 0x01, 0x03]).is_none());
        assert!(decode(&[0x4C, 0x00, 0x01, 0x02, 0x01, 0x03]).is_none());
    }

    #[test]
    fn decode_rejects_location_frames() {
        let spec = BeaconSpec::Location(LocationBeacon {
            location_id: 5,
            cooldown_ticks: 0x02,
            rssi_floor: DEFAULT_RSSI_FLOOR,
        });
        assert!(decode(&encode(&spec)).is_none());
    }

    #[test]
    fn decode_tolerates_trailing_bytes() {
        let raw = [0x83, 0x0A, 0x01, 0x02, 0x01, 0x03, 0xDE, 0xAD];
        assert!(decode(&raw).is_some());
    }

    #[test]
    fn location_block_layout() {
        let spec = BeaconSpec::Location(LocationBeacon {
            location_id: 0x07,
            cooldown_ticks: 0xFF,
            rssi_floor: 0xA6,
        });
        assert_eq!(encode(&spec), [0x83, 0x0A, 0x07, 0xFF, 0xA6, 0x01]);
    }

    #[test]
    fn impersonation_block_layout() {
        let spec = BeaconSpec::Impersonation(ImpersonationBeacon {
            faction_code: 0x09,
            personality_code: 0x08,
            affiliation_code: 0x09,
        });
        assert_eq!(encode(&spec), [0x83, 0x0A, 0x09, 0x08, 0x09, 0x0B]);
    }

    #[test]
    fn frame_builders_pass_validation() {
        for frame in [
            audio_group_frame(2),
            audio_clip_frame(5),
            script_frame(3),
            drive_frame(Motor::Left, 0.8),
            drive_frame(Motor::Right, -0.4),
            motor_stop_frame(Motor::Head),
            head_turn_frame(-1.0),
            bb_drive_frame(0x00, 0xC0),
            bb_rotate_frame(0x01, 0x80),
            accessory_frame(),
        ] {
            validate_frame(frame.bytes()).expect("builder frame must validate");
        }
    }

    #[test]
    fn drive_frame_reverses_and_scales() {
        let frame = drive_frame(Motor::Right, -1.0);
        assert_eq!(frame.bytes()[4], 0x81);
        assert_eq!(frame.bytes()[5], 0xFF);

        let frame = drive_frame(Motor::Left, 0.01);
        assert_eq!(frame.bytes(), motor_stop_frame(Motor::Left).bytes());
    }

    #[test]
    fn validate_rejects_bad_headers() {
        // length header off by one
        assert!(matches!(
            validate_frame(&[0x28, 0x00, 0x05, 0x44, 0x00, 0x00, 0x00, 0x00]),
            Err(FrameError::LengthHeader { .. })
        ));
        // audio-controller command without its guard
        assert!(matches!(
            validate_frame(&[0x27, 0x00, 0x0F, 0x44, 0x44, 0x00, 0x1F, 0x00]),
            Err(FrameError::LogicGuard { .. })
        ));
        // payload header inconsistent with length
        assert!(matches!(
            validate_frame(&[0x27, 0x00, 0x05, 0x45, 0x00, 0x00, 0x00, 0x00]),
            Err(FrameError::PayloadHeader { .. })
        ));
        assert!(matches!(
            validate_frame(&LOGON),
            Err(FrameError::Length(3))
        ));
    }

    proptest! {
        #[test]
        fn no_magic_never_decodes(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assume!(bytes.len() < 2 || bytes[..2] != MAGIC);
            prop_assert!(decode(&bytes).is_none());
        }

        #[test]
        fn truncated_blocks_never_decode(bytes in proptest::collection::vec(any::<u8>(), 0..BLOCK_LEN)) {
            prop_assert!(decode(&bytes).is_none());
        }

        #[test]
        fn impersonation_roundtrip(faction in any::<u8>(), personality in any::<u8>(), affiliation in any::<u8>()) {
            let spec = BeaconSpec::Impersonation(ImpersonationBeacon {
                faction_code: faction,
                personality_code: personality,
                affiliation_code: affiliation,
            });
            let broadcast = decode(&encode(&spec)).expect("impersonation frames decode");
            prop_assert_eq!(broadcast.faction_code, faction);
            prop_assert_eq!(broadcast.personality_code, personality);
            prop_assert_eq!(broadcast.affiliation_code, affiliation);
            prop_assert!(!broadcast.paired);
        }
    }
}
