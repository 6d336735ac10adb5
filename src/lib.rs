//! Droid Toolbox
//!
//! BLE protocol engine for the Galaxy's Edge droid toys: passive-scan
//! decoding of their manufacturer-data advertisements, location and
//! droid-impersonation beacons, and an authenticated command session for
//! audio, scripts and motor drive.
//!
//! The engine is UI-free. Callers start sessions through [`DroidEngine`]
//! and consume typed results; everything radio-facing sits behind the
//! traits in [`infrastructure::bluetooth::radio`], so the whole engine runs
//! against a scripted fake in tests.
//!
//! ```no_run
//! use droid_toolbox::{DroidEngine, EngineSettings};
//! use std::time::Duration;
//!
//! # async fn run(radio: std::sync::Arc<dyn droid_toolbox::infrastructure::bluetooth::radio::RadioAdapter>) -> anyhow::Result<()> {
//! let mut engine = DroidEngine::new(radio, &EngineSettings::default());
//!
//! // Scan for droids while beaconing as the Droid Depot
//! let mut droids = engine.start_scan().await?;
//! engine
//!     .start_beacon(engine.location_spec(5), Duration::from_secs(60))
//!     .await?;
//!
//! while let Some(droid) = droids.recv().await {
//!     println!("{}", engine.describe(&droid));
//!     let mut link = engine.connect(droid.address).await?;
//!     link.play_audio(1, 3).await?;
//!     link.disconnect().await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod domain;
pub mod infrastructure;

pub use domain::catalog::{Catalog, CatalogKind, LocationPreset};
pub use domain::models::{
    BeaconKind, BeaconSpec, BeaconState, CommandFrame, CommandOpcode,
    ConnectionState, DroidAdvertisement, DroidBroadcast, ImpersonationBeacon,
    LocationBeacon, Motor, ScanState,
};
pub use domain::settings::{EngineSettings, LogSettings, SettingsService};
pub use infrastructure::bluetooth::beacon::{BeaconError, DroidBeacon};
pub use infrastructure::bluetooth::connection::{
    CommandError, ConnectError, ConnectionConfig, DroidConnector, DroidLink,
    ProtocolError,
};
pub use infrastructure::bluetooth::protocol;
pub use infrastructure::bluetooth::scanner::{DroidScanner, ScanError};
pub use infrastructure::bluetooth::service::DroidEngine;
