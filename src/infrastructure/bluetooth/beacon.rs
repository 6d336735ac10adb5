//! BLE Beacon Module
//!
//! Owns the local advertising slot: encodes a [`BeaconSpec`] and
//! periodically re-issues it so nearby droids keep seeing a live broadcast.
//!
//! Droid firmware applies a local cooldown (minimum 60 seconds) before
//! reacting again to a beacon of the same type from the same advertiser,
//! so the session enforces that floor on its refresh interval. Switching
//! beacon *type* is not gated: firmware tracks its cooldown per type, and
//! alternating types makes droids react more often. That is observed
//! protocol behavior the engine exposes on purpose; treat it as
//! provisional, it may not survive a firmware revision.

use crate::domain::models::{BeaconKind, BeaconSpec, BeaconState};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::radio::{RadioAdapter, RadioError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum BeaconError {
    #[error("refresh interval {got:?} is below the {floor:?} droid reaction floor")]
    IntervalBelowFloor { got: Duration, floor: Duration },
    #[error("radio unavailable: {0}")]
    RadioUnavailable(#[source] RadioError),
}

/// Pacing for beacon emissions, keyed by beacon kind.
///
/// Same kind inside the floor: wait out the remainder. Different kind:
/// no wait, per the firmware's per-type cooldown tracking.
pub struct CooldownGate {
    floor: Duration,
    last: Option<(BeaconKind, Instant)>,
}

impl CooldownGate {
    pub fn new(floor: Duration) -> Self {
        Self { floor, last: None }
    }

    pub fn required_delay(&self, kind: BeaconKind, now: Instant) -> Duration {
        match self.last {
            Some((last_kind, at)) if last_kind == kind => {
                self.floor.saturating_sub(now.duration_since(at))
            }
            _ => Duration::ZERO,
        }
    }

    pub fn note_emission(&mut self, kind: BeaconKind, at: Instant) {
        self.last = Some((kind, at));
    }
}

/// Beacon session. `Idle <-> Advertising`; one spec per run.
pub struct DroidBeacon {
    radio: Arc<dyn RadioAdapter>,
    floor: Duration,
    gate: Arc<Mutex<CooldownGate>>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
    current: Option<BeaconSpec>,
}

impl DroidBeacon {
    pub fn new(radio: Arc<dyn RadioAdapter>) -> Self {
        Self::with_floor(
            radio,
            Duration::from_secs(protocol::BEACON_INTERVAL_FLOOR_SECS),
        )
    }

    pub fn with_floor(radio: Arc<dyn RadioAdapter>, floor: Duration) -> Self {
        Self {
            radio,
            floor,
            gate: Arc::new(Mutex::new(CooldownGate::new(floor))),
            shutdown: None,
            task: None,
            current: None,
        }
    }

    /// Begin broadcasting `spec`, refreshing every `interval`.
    ///
    /// Rejects intervals below the reaction floor rather than silently
    /// clamping them. Restarting with the same beacon kind inside the floor
    /// delays the first emission until the remainder has passed.
    pub async fn start(
        &mut self,
        spec: BeaconSpec,
        interval: Duration,
    ) -> Result<(), BeaconError> {
        if interval < self.floor {
            return Err(BeaconError::IntervalBelowFloor {
                got: interval,
                floor: self.floor,
            });
        }

        self.stop().await;

        let kind = spec.kind();
        let block = protocol::encode(&spec).to_vec();
        let initial_delay = self
            .gate
            .lock()
            .expect("beacon gate lock")
            .required_delay(kind, Instant::now());

        info!(?kind, ?interval, "Starting beacon");

        if initial_delay.is_zero() {
            // Emit right away so a dead radio surfaces here, not in a task
            Self::emit(&*self.radio, &self.gate, kind, &block)
                .await
                .map_err(BeaconError::RadioUnavailable)?;
        } else {
            debug!(
                ?initial_delay,
                "Same beacon kind restarted inside the floor; holding first emission"
            );
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let radio = Arc::clone(&self.radio);
        let gate = Arc::clone(&self.gate);
        let mut wait = if initial_delay.is_zero() {
            interval
        } else {
            initial_delay
        };

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                if let Err(e) = Self::emit(&*radio, &gate, kind, &block).await {
                    warn!("Beacon refresh failed: {e}");
                }
                wait = interval;
            }
        });

        self.shutdown = Some(shutdown_tx);
        self.task = Some(task);
        self.current = Some(spec);
        Ok(())
    }

    /// Stop advertising immediately. A no-op when already idle.
    pub async fn stop(&mut self) {
        let Some(shutdown) = self.shutdown.take() else {
            return;
        };

        info!("Stopping beacon");
        let _ = shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        if let Err(e) = self.radio.stop_advertising().await {
            warn!("Advertising did not stop cleanly: {e}");
        }
        self.current = None;
    }

    pub fn state(&self) -> BeaconState {
        if self.task.is_some() {
            BeaconState::Advertising
        } else {
            BeaconState::Idle
        }
    }

    pub fn is_advertising(&self) -> bool {
        self.state() == BeaconState::Advertising
    }

    pub fn current_spec(&self) -> Option<BeaconSpec> {
        self.current
    }

    /// Restart the platform advertisement so receivers see a fresh
    /// broadcast rather than one stale carrier.
    async fn emit(
        radio: &dyn RadioAdapter,
        gate: &Mutex<CooldownGate>,
        kind: BeaconKind,
        block: &[u8],
    ) -> Result<(), RadioError> {
        let _ = radio.stop_advertising().await;
        radio.start_advertising(block.to_vec()).await?;
        gate.lock()
            .expect("beacon gate lock")
            .note_emission(kind, Instant::now());
        Ok(())
    }
}

impl Drop for DroidBeacon {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ImpersonationBeacon, LocationBeacon};
    use crate::infrastructure::bluetooth::radio::fake::FakeRadio;
    use std::sync::atomic::Ordering;

    fn location_spec() -> BeaconSpec {
        BeaconSpec::Location(LocationBeacon {
            location_id: 3,
            cooldown_ticks: 0x02,
            rssi_floor: protocol::DEFAULT_RSSI_FLOOR,
        })
    }

    fn droid_spec() -> BeaconSpec {
        BeaconSpec::Impersonation(ImpersonationBeacon {
            faction_code: 0x05,
            personality_code: 0x0A,
            affiliation_code: 0x05,
        })
    }

    #[test]
    fn gate_paces_same_kind_only() {
        let mut gate = CooldownGate::new(Duration::from_secs(60));
        let t0 = Instant::now();
        assert_eq!(gate.required_delay(BeaconKind::Location, t0), Duration::ZERO);

        gate.note_emission(BeaconKind::Location, t0);
        let t1 = t0 + Duration::from_secs(20);
        assert_eq!(
            gate.required_delay(BeaconKind::Location, t1),
            Duration::from_secs(40)
        );
        // Type switch bypasses the cooldown
        assert_eq!(gate.required_delay(BeaconKind::Droid, t1), Duration::ZERO);

        // Floor satisfied
        let t2 = t0 + Duration::from_secs(61);
        assert_eq!(gate.required_delay(BeaconKind::Location, t2), Duration::ZERO);
    }

    #[tokio::test]
    async fn rejects_interval_below_floor() {
        let radio = Arc::new(FakeRadio::new());
        let mut beacon = DroidBeacon::new(radio);
        let err = beacon
            .start(location_spec(), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, BeaconError::IntervalBelowFloor { .. }));
        assert!(!beacon.is_advertising());
    }

    #[tokio::test]
    async fn advertises_encoded_block_immediately() {
        let radio = Arc::new(FakeRadio::new());
        let mut beacon =
            DroidBeacon::with_floor(radio.clone(), Duration::from_secs(1));

        beacon
            .start(location_spec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(beacon.is_advertising());
        assert_eq!(beacon.current_spec(), Some(location_spec()));

        let blocks = radio.advert_blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], protocol::encode(&location_spec()).to_vec());

        beacon.stop().await;
        beacon.stop().await; // idempotent
        assert!(!beacon.is_advertising());
        assert!(!radio.advertising.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn same_kind_restart_waits_out_the_floor() {
        let radio = Arc::new(FakeRadio::new());
        let floor = Duration::from_millis(150);
        let mut beacon = DroidBeacon::with_floor(radio.clone(), floor);

        beacon.start(location_spec(), floor).await.unwrap();
        beacon.stop().await;
        assert_eq!(radio.advert_blocks().len(), 1);

        // Immediate same-kind restart must not emit inside the floor
        beacon.start(location_spec(), floor).await.unwrap();
        assert_eq!(radio.advert_blocks().len(), 1);

        tokio::time::sleep(floor * 2).await;
        assert!(radio.advert_blocks().len() >= 2);
        beacon.stop().await;
    }

    #[tokio::test]
    async fn kind_switch_bypasses_the_floor() {
        let radio = Arc::new(FakeRadio::new());
        let mut beacon =
            DroidBeacon::with_floor(radio.clone(), Duration::from_secs(60));

        beacon
            .start(location_spec(), Duration::from_secs(60))
            .await
            .unwrap();
        beacon.stop().await;
        assert_eq!(radio.advert_blocks().len(), 1);

        // Different kind advertises immediately despite the 60s floor
        beacon
            .start(droid_spec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(radio.advert_blocks().len(), 2);
        assert_eq!(
            radio.advert_blocks()[1],
            protocol::encode(&droid_spec()).to_vec()
        );
        beacon.stop().await;
    }

    #[tokio::test]
    async fn refresh_loop_reissues_the_block() {
        let radio = Arc::new(FakeRadio::new());
        let floor = Duration::from_millis(50);
        let mut beacon = DroidBeacon::with_floor(radio.clone(), floor);

        beacon.start(droid_spec(), floor).await.unwrap();
        tokio::time::sleep(Duration::from_millis(220)).await;
        beacon.stop().await;

        let blocks = radio.advert_blocks();
        assert!(blocks.len() >= 3, "expected refreshes, got {}", blocks.len());
        assert!(blocks.windows(2).all(|w| w[0] == w[1]));
    }
}
