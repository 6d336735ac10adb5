//! Droid Engine Service
//!
//! Main coordinator over one radio: a scan session, a beacon session, and
//! a connection factory, wired together from [`EngineSettings`]. Scanning
//! and beaconing own distinct radio resources (discovery vs the local
//! advertising slot) and may run at the same time; connections are
//! serialized per droid address by the connector's registry.

use crate::domain::catalog::Catalog;
use crate::domain::models::{BeaconSpec, DroidAdvertisement, LocationBeacon};
use crate::domain::settings::EngineSettings;
use crate::infrastructure::bluetooth::beacon::{BeaconError, DroidBeacon};
use crate::infrastructure::bluetooth::connection::{
    ConnectError, ConnectionConfig, DroidConnector, DroidLink,
};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::radio::RadioAdapter;
use crate::infrastructure::bluetooth::scanner::{DroidScanner, ScanError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

pub struct DroidEngine {
    scanner: DroidScanner,
    beacon: DroidBeacon,
    connector: DroidConnector,
    catalog: Catalog,
}

impl DroidEngine {
    pub fn new(radio: Arc<dyn RadioAdapter>, settings: &EngineSettings) -> Self {
        let catalog = Self::load_catalog(settings);

        let config = ConnectionConfig {
            service_uuid: settings.ble_service_uuid.clone(),
            command_char_uuid: settings.ble_command_char_uuid.clone(),
            connect_timeout_ms: settings.connect_timeout_ms,
            write_ack_timeout_ms: settings.write_ack_timeout_ms,
            logon_repeats: settings.logon_repeats,
            command_delay_ms: settings.command_delay_ms,
        };

        Self {
            scanner: DroidScanner::new(Arc::clone(&radio)),
            beacon: DroidBeacon::with_floor(
                Arc::clone(&radio),
                Duration::from_secs(settings.beacon_interval_floor_secs),
            ),
            connector: DroidConnector::new(radio, config),
            catalog,
        }
    }

    pub fn with_defaults(radio: Arc<dyn RadioAdapter>) -> Self {
        Self::new(radio, &EngineSettings::default())
    }

    /// Engine over the platform Bluetooth stack.
    #[cfg(windows)]
    pub fn with_system_radio(settings: &EngineSettings) -> anyhow::Result<Self> {
        let radio = crate::infrastructure::bluetooth::winrt::WinRtRadio::new()?;
        Ok(Self::new(Arc::new(radio), settings))
    }

    fn load_catalog(settings: &EngineSettings) -> Catalog {
        let Some(path) = &settings.catalog_overlay_path else {
            return Catalog::builtin();
        };
        match std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|json| Catalog::with_overlay_json(&json).map_err(Into::into))
        {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(
                    "Catalog overlay {} not usable ({e}); using built-in tables",
                    path.display()
                );
                Catalog::builtin()
            }
        }
    }

    // --- Scan session ---

    pub async fn start_scan(
        &mut self,
    ) -> Result<mpsc::UnboundedReceiver<DroidAdvertisement>, ScanError> {
        self.scanner.start().await
    }

    pub async fn stop_scan(&mut self) -> Result<(), ScanError> {
        self.scanner.stop().await
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Most recent advertisement per sighted address.
    pub fn scan_results(&self) -> Vec<DroidAdvertisement> {
        self.scanner.sightings()
    }

    // --- Beacon session ---

    pub async fn start_beacon(
        &mut self,
        spec: BeaconSpec,
        interval: Duration,
    ) -> Result<(), BeaconError> {
        self.beacon.start(spec, interval).await
    }

    pub async fn stop_beacon(&mut self) {
        self.beacon.stop().await
    }

    pub fn is_advertising(&self) -> bool {
        self.beacon.is_advertising()
    }

    /// Location beacon built from the catalog preset for `location_id`;
    /// unknown ids fall back to the standard cooldown.
    pub fn location_spec(&self, location_id: u8) -> BeaconSpec {
        let cooldown_ticks = self
            .catalog
            .location(location_id)
            .map(|preset| preset.cooldown_ticks)
            .unwrap_or(0x02);
        BeaconSpec::Location(LocationBeacon {
            location_id,
            cooldown_ticks,
            rssi_floor: protocol::DEFAULT_RSSI_FLOOR,
        })
    }

    // --- Connection session ---

    pub async fn connect(&self, address: u64) -> Result<DroidLink, ConnectError> {
        self.connector.connect(address).await
    }

    // --- Catalog ---

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Human-readable identity of a sighted droid.
    pub fn describe(&self, droid: &DroidAdvertisement) -> String {
        match &droid.display_name {
            Some(name) => format!(
                "{} [{}]",
                name,
                self.catalog
                    .describe(droid.faction_code, droid.personality_code)
            ),
            None => self
                .catalog
                .describe(droid.faction_code, droid.personality_code),
        }
    }
}
