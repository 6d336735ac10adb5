//! BLE Connection Module
//!
//! Pairing with one droid's control service and driving its command
//! characteristic. The session walks `Disconnected -> Connecting ->
//! Connected -> Ready`; link loss from any state lands back in
//! `Disconnected`, and a droid address can only carry one session at a
//! time.

use crate::domain::models::{CommandFrame, ConnectionState, Motor};
use crate::infrastructure::bluetooth::protocol::{self, FrameError};
use crate::infrastructure::bluetooth::radio::{
    GattLink, RadioAdapter, ServiceProbe,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Droid control service UUID
    pub service_uuid: String,
    /// Command characteristic UUID
    pub command_char_uuid: String,
    /// Budget for opening the GATT link in milliseconds
    pub connect_timeout_ms: u64,
    /// Budget for one write acknowledgement in milliseconds
    pub write_ack_timeout_ms: u64,
    /// LOGON handshake repetitions
    pub logon_repeats: u32,
    /// Delay between consecutive writes in milliseconds
    pub command_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            service_uuid: protocol::SERVICE_UUID.to_string(),
            command_char_uuid: protocol::COMMAND_CHAR_UUID.to_string(),
            connect_timeout_ms: 15_000,
            write_ack_timeout_ms: 2_000,
            logon_repeats: protocol::LOGON_REPEATS,
            command_delay_ms: protocol::COMMAND_DELAY_MS,
        }
    }
}

/// The connected device is not a compatible droid.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("droid control service {0} not present")]
    ServiceMissing(Uuid),
    #[error("command characteristic {0} not present")]
    CharacteristicMissing(Uuid),
}

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("connection attempt to {0:#014X} timed out")]
    Timeout(u64),
    #[error("pairing with {address:#014X} rejected: {reason}")]
    Rejected { address: u64, reason: String },
    #[error("{0:#014X} already has a session connecting or connected")]
    AlreadyActive(u64),
    #[error("bad UUID in connection configuration: {0}")]
    InvalidUuid(String),
    #[error("not a compatible droid: {0}")]
    Incompatible(#[from] ProtocolError),
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("session is {0:?}; commands need a ready session")]
    NotReady(ConnectionState),
    #[error("malformed frame refused before transmission: {0}")]
    InvalidFrame(#[from] FrameError),
    #[error("write unacknowledged after one retry")]
    Timeout,
    #[error("link to droid lost: {0}")]
    LinkLost(String),
}

/// Connection factory. Owns the engine-wide registry of addresses with a
/// session in flight, so two pairings can never race for one droid.
pub struct DroidConnector {
    radio: Arc<dyn RadioAdapter>,
    config: ConnectionConfig,
    active: Arc<Mutex<HashSet<u64>>>,
}

impl DroidConnector {
    pub fn new(radio: Arc<dyn RadioAdapter>, config: ConnectionConfig) -> Self {
        Self {
            radio,
            config,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Pair with the droid at `address` and bring the session to `Ready`.
    ///
    /// Cancel-safe: dropping the returned future mid-flight abandons the
    /// attempt and frees the address for a later call.
    pub async fn connect(&self, address: u64) -> Result<DroidLink, ConnectError> {
        {
            let mut active = self.active.lock().expect("connection registry lock");
            if !active.insert(address) {
                debug!(
                    "Rejecting connect to {:#014X}: session already in flight",
                    address
                );
                return Err(ConnectError::AlreadyActive(address));
            }
        }
        // The slot travels with the reservation: through `establish`, then
        // into the handle. Any early return or a caller dropping the future
        // mid-connect frees the address.
        let reservation = Reservation {
            address,
            registry: Arc::clone(&self.active),
            released: false,
        };

        self.establish(address, reservation).await
    }

    async fn establish(
        &self,
        address: u64,
        reservation: Reservation,
    ) -> Result<DroidLink, ConnectError> {
        info!("Connecting to droid {:#014X}", address);

        let service_uuid = Uuid::parse_str(&self.config.service_uuid)
            .map_err(|e| ConnectError::InvalidUuid(e.to_string()))?;
        let command_uuid = Uuid::parse_str(&self.config.command_char_uuid)
            .map_err(|e| ConnectError::InvalidUuid(e.to_string()))?;

        // Step 1: open the GATT link within the pairing budget
        let connect_budget = Duration::from_millis(self.config.connect_timeout_ms);
        let link = match timeout(connect_budget, self.radio.open_link(address)).await {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                return Err(ConnectError::Rejected {
                    address,
                    reason: e.to_string(),
                })
            }
            Err(_) => return Err(ConnectError::Timeout(address)),
        };

        let mut session = DroidLink {
            address,
            link,
            state: ConnectionState::Connected,
            config: self.config.clone(),
            reservation,
        };

        // Step 2: locate the command characteristic
        match session
            .link
            .probe_command_characteristic(service_uuid, command_uuid)
            .await
        {
            Ok(ServiceProbe::Resolved) => {
                info!("Found droid control service");
            }
            Ok(ServiceProbe::ServiceMissing) => {
                session.link.close().await;
                return Err(ProtocolError::ServiceMissing(service_uuid).into());
            }
            Ok(ServiceProbe::CharacteristicMissing) => {
                session.link.close().await;
                return Err(ProtocolError::CharacteristicMissing(command_uuid).into());
            }
            Err(e) => {
                session.link.close().await;
                return Err(ConnectError::Rejected {
                    address,
                    reason: e.to_string(),
                });
            }
        }

        // Step 3: LOGON handshake. Firmware misses single writes often
        // enough that it is repeated with a short gap.
        for attempt in 1..=self.config.logon_repeats {
            debug!("Sending LOGON attempt {attempt}");
            if let Err(e) = session.write_acked(&protocol::LOGON).await {
                session.link.close().await;
                return Err(ConnectError::Rejected {
                    address,
                    reason: format!("LOGON handshake failed: {e}"),
                });
            }
            tokio::time::sleep(Duration::from_millis(self.config.command_delay_ms))
                .await;
        }
        session.state = ConnectionState::Ready;

        // Step 4: confirmation chirp. Best-effort; a droid that paired but
        // stays quiet is still a usable session.
        let (group, clip) = protocol::CONNECT_SOUND;
        if let Err(e) = session.play_audio(group, clip).await {
            warn!("Connected, but the hello chirp failed: {e}");
        }

        info!("Droid {:#014X} ready", address);
        Ok(session)
    }

    /// Addresses with a session currently connecting or connected.
    pub fn active_addresses(&self) -> Vec<u64> {
        self.active
            .lock()
            .expect("connection registry lock")
            .iter()
            .copied()
            .collect()
    }
}

/// Exclusive claim on an address in the connector's registry. Exactly one
/// owner at a time, so the slot is freed exactly once.
struct Reservation {
    address: u64,
    registry: Arc<Mutex<HashSet<u64>>>,
    released: bool,
}

impl Reservation {
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Ok(mut registry) = self.registry.lock() {
            registry.remove(&self.address);
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release();
    }
}

/// One logical pairing with a droid. Owned exclusively by its creator and
/// destroyed on disconnect; no handle outlives its session.
pub struct DroidLink {
    address: u64,
    link: Box<dyn GattLink>,
    state: ConnectionState,
    config: ConnectionConfig,
    reservation: Reservation,
}

impl std::fmt::Debug for DroidLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DroidLink")
            .field("address", &self.address)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl DroidLink {
    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Write a command frame and await its acknowledgement.
    ///
    /// Only valid in `Ready`. The frame is re-validated first; a malformed
    /// frame is refused without contacting the radio.
    pub async fn send(&mut self, frame: &CommandFrame) -> Result<(), CommandError> {
        if self.state != ConnectionState::Ready {
            return Err(CommandError::NotReady(self.state));
        }
        protocol::validate_frame(frame.bytes())?;
        if !self.link.is_connected() {
            let reason = "connection dropped".to_string();
            self.mark_lost();
            return Err(CommandError::LinkLost(reason));
        }
        self.write_acked(frame.bytes()).await
    }

    /// Trigger an audio clip: select the group, then play the clip.
    pub async fn play_audio(&mut self, group: u8, clip: u8) -> Result<(), CommandError> {
        self.send(&protocol::audio_group_frame(group)).await?;
        tokio::time::sleep(Duration::from_millis(self.config.command_delay_ms)).await;
        self.send(&protocol::audio_clip_frame(clip)).await
    }

    /// Run an animation script stored on the droid.
    pub async fn run_script(&mut self, script_id: u8) -> Result<(), CommandError> {
        self.send(&protocol::script_frame(script_id)).await
    }

    /// Direct motor drive, throttle -1.0..=1.0.
    pub async fn drive(&mut self, motor: Motor, throttle: f32) -> Result<(), CommandError> {
        self.send(&protocol::drive_frame(motor, throttle)).await
    }

    /// Smooth dome rotation for R-series droids.
    pub async fn turn_head(&mut self, value: f32) -> Result<(), CommandError> {
        self.send(&protocol::head_turn_frame(value)).await
    }

    /// Zero every motor.
    pub async fn stop_all_motors(&mut self) -> Result<(), CommandError> {
        for motor in [Motor::Left, Motor::Right, Motor::Head] {
            self.send(&protocol::motor_stop_frame(motor)).await?;
        }
        Ok(())
    }

    /// Fire attached accessory hardware, if any.
    pub async fn trigger_accessory(&mut self) -> Result<(), CommandError> {
        self.send(&protocol::accessory_frame()).await
    }

    /// Tear the link down. Always valid; a no-op once disconnected.
    pub async fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        info!("Disconnecting from droid {:#014X}", self.address);
        self.link.close().await;
        self.mark_lost();
    }

    /// One write with a bounded ack wait and exactly one retry. Endless
    /// retries would mask a dead link.
    async fn write_acked(&mut self, bytes: &[u8]) -> Result<(), CommandError> {
        let ack_window = Duration::from_millis(self.config.write_ack_timeout_ms);
        for attempt in 0..2 {
            match timeout(ack_window, self.link.write_command(bytes)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => {
                    let reason = e.to_string();
                    self.mark_lost();
                    return Err(CommandError::LinkLost(reason));
                }
                Err(_) if attempt == 0 => {
                    warn!("Write unacknowledged, retrying once");
                }
                Err(_) => {}
            }
        }
        Err(CommandError::Timeout)
    }

    fn mark_lost(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.reservation.release();
    }
}
