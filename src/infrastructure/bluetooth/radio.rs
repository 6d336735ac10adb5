//! Radio Boundary
//!
//! Sessions never talk to a platform Bluetooth stack directly; they go
//! through these traits. Production uses the WinRT backend, tests drive the
//! sessions with a scripted fake, and the session logic cannot tell the
//! difference.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One raw advertisement event as delivered by the platform radio.
#[derive(Debug, Clone)]
pub struct Sighting {
    pub address: u64,
    pub rssi: i16,
    /// Advertised local name, if the event carried one
    pub local_name: Option<String>,
    /// Full manufacturer-data block, manufacturer id bytes included
    pub manufacturer_data: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum RadioError {
    #[error("bluetooth stack unavailable: {0}")]
    Unavailable(String),
    #[error("device {0:#014X} not reachable")]
    DeviceUnreachable(u64),
    #[error("radio operation failed: {0}")]
    Backend(String),
}

/// Outcome of locating the droid control service on a connected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceProbe {
    Resolved,
    ServiceMissing,
    CharacteristicMissing,
}

/// Platform radio capability consumed by the sessions.
#[async_trait]
pub trait RadioAdapter: Send + Sync {
    /// Begin continuous discovery. Every advertisement event goes into
    /// `sink` until [`stop_discovery`](Self::stop_discovery) is called.
    async fn start_discovery(
        &self,
        sink: mpsc::UnboundedSender<Sighting>,
    ) -> Result<(), RadioError>;

    async fn stop_discovery(&self) -> Result<(), RadioError>;

    /// (Re)start local advertising with the given manufacturer-data block.
    /// A block is the full wire payload, magic bytes included.
    async fn start_advertising(&self, block: Vec<u8>) -> Result<(), RadioError>;

    async fn stop_advertising(&self) -> Result<(), RadioError>;

    /// Open a GATT link to `address`.
    async fn open_link(&self, address: u64) -> Result<Box<dyn GattLink>, RadioError>;

    /// Best-effort friendly-name lookup through the platform device
    /// registry. `None` simply means the platform had nothing to offer.
    async fn device_name(&self, address: u64) -> Option<String>;
}

/// One open GATT connection.
#[async_trait]
pub trait GattLink: Send {
    /// Locate the command characteristic under the droid control service.
    async fn probe_command_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<ServiceProbe, RadioError>;

    /// Write a frame to the command characteristic, returning once the
    /// device acknowledges delivery.
    async fn write_command(&mut self, frame: &[u8]) -> Result<(), RadioError>;

    fn is_connected(&self) -> bool;

    async fn close(&mut self);
}
