//! BLE Scanner Module
//!
//! Continuous droid discovery: filters raw advertisement events down to
//! genuine droids, deduplicates them by address, and surfaces them to the
//! caller as a lazy stream.

use crate::domain::models::{DroidAdvertisement, ScanState};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::radio::{RadioAdapter, RadioError, Sighting};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("radio unavailable: {0}")]
    RadioUnavailable(#[source] RadioError),
}

/// Scan session. `Idle <-> Scanning`, restartable, one caller-visible
/// stream of [`DroidAdvertisement`] per session.
pub struct DroidScanner {
    radio: Arc<dyn RadioAdapter>,
    sink: Arc<Mutex<Option<mpsc::UnboundedSender<DroidAdvertisement>>>>,
    cache: Arc<Mutex<HashMap<u64, DroidAdvertisement>>>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl DroidScanner {
    pub fn new(radio: Arc<dyn RadioAdapter>) -> Self {
        Self {
            radio,
            sink: Arc::new(Mutex::new(None)),
            cache: Arc::new(Mutex::new(HashMap::new())),
            shutdown: None,
            task: None,
        }
    }

    /// Start scanning and return the stream of discovered droids.
    ///
    /// Calling this while already scanning leaves the radio untouched; the
    /// returned receiver simply replaces the previous one as the session's
    /// single consumer.
    pub async fn start(
        &mut self,
    ) -> Result<mpsc::UnboundedReceiver<DroidAdvertisement>, ScanError> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        if self.task.is_some() {
            debug!("Scan already running, handing out a fresh stream");
            *self.sink.lock().expect("scanner sink lock") = Some(out_tx);
            return Ok(out_rx);
        }

        info!("Starting droid scan");
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Sighting>();
        self.radio
            .start_discovery(event_tx)
            .await
            .map_err(ScanError::RadioUnavailable)?;

        self.cache.lock().expect("scanner cache lock").clear();
        *self.sink.lock().expect("scanner sink lock") = Some(out_tx);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let radio = Arc::clone(&self.radio);
        let sink = Arc::clone(&self.sink);
        let cache = Arc::clone(&self.cache);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    event = event_rx.recv() => match event {
                        Some(sighting) => {
                            Self::process(&*radio, &sink, &cache, sighting).await;
                        }
                        // Radio dropped the feed; nothing more will arrive
                        None => break,
                    },
                }
            }
            trace!("Scan processing loop ended");
        });

        self.shutdown = Some(shutdown_tx);
        self.task = Some(task);
        Ok(out_rx)
    }

    /// Stop scanning. A no-op when already idle.
    pub async fn stop(&mut self) -> Result<(), ScanError> {
        let Some(shutdown) = self.shutdown.take() else {
            return Ok(());
        };

        info!("Stopping droid scan");
        let _ = shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        *self.sink.lock().expect("scanner sink lock") = None;
        if let Err(e) = self.radio.stop_discovery().await {
            warn!("Radio discovery did not stop cleanly: {e}");
        }
        Ok(())
    }

    pub fn state(&self) -> ScanState {
        if self.task.is_some() {
            ScanState::Scanning
        } else {
            ScanState::Idle
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.state() == ScanState::Scanning
    }

    /// Snapshot of the deduplication cache: the most recent advertisement
    /// seen from each address since the scan started.
    pub fn sightings(&self) -> Vec<DroidAdvertisement> {
        self.cache
            .lock()
            .expect("scanner cache lock")
            .values()
            .cloned()
            .collect()
    }

    async fn process(
        radio: &dyn RadioAdapter,
        sink: &Mutex<Option<mpsc::UnboundedSender<DroidAdvertisement>>>,
        cache: &Mutex<HashMap<u64, DroidAdvertisement>>,
        sighting: Sighting,
    ) {
        // Droids always advertise under the same local name; anything else
        // is dropped without comment, it is just park radio noise.
        if sighting.local_name.as_deref() != Some(protocol::DROID_LOCAL_NAME) {
            return;
        }

        let Some(broadcast) = protocol::decode(&sighting.manufacturer_data) else {
            trace!(
                address = format_args!("{:#014X}", sighting.address),
                "Named like a droid but payload did not decode"
            );
            return;
        };

        // Best-effort enrichment; a failed lookup never suppresses the
        // already-decoded advertisement.
        let display_name = radio.device_name(sighting.address).await;

        let advertisement = DroidAdvertisement {
            address: sighting.address,
            rssi: sighting.rssi,
            display_name,
            faction_code: broadcast.faction_code,
            personality_code: broadcast.personality_code,
            affiliation_code: broadcast.affiliation_code,
            paired: broadcast.paired,
            chip_present: broadcast.chip_present,
            raw_payload: sighting.manufacturer_data,
        };

        debug!(
            address = format_args!("{:#014X}", advertisement.address),
            rssi = advertisement.rssi,
            personality = advertisement.personality_code,
            "Droid sighted"
        );

        // Last write wins per address
        cache
            .lock()
            .expect("scanner cache lock")
            .insert(advertisement.address, advertisement.clone());

        if let Some(sink) = sink.lock().expect("scanner sink lock").as_ref() {
            // A dropped receiver is fine; the cache keeps accumulating
            let _ = sink.send(advertisement);
        }
    }
}

impl Drop for DroidScanner {
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
    use crate::infrastructure::bluetooth::radio::fake::FakeRadio;
    use std::sync::atomic::Ordering;

    fn droid_sighting(address: u64, rssi: i16, block: &[u8]) -> Sighting {
        Sighting {
            address,
            rssi,
            local_name: Some("DROID".to_string()),
            manufacturer_data: block.to_vec(),
        }
    }

    const BLOCK: [u8; 6] = [0x83, 0x0A, 0x01, 0x02, 0x01, 0x03];

    #[tokio::test]
    async fn decodes_and_emits_droids() {
        let radio = Arc::new(FakeRadio::with_sightings(vec![droid_sighting(
            0xAA_BB, -60, &BLOCK,
        )]));
        let mut scanner = DroidScanner::new(radio);

        let mut stream = scanner.start().await.unwrap();
        let droid = stream.recv().await.unwrap();
        assert_eq!(droid.address, 0xAA_BB);
        assert_eq!(droid.faction_code, 1);
        assert_eq!(droid.personality_code, 2);
        assert!(!droid.paired);
        assert_eq!(droid.raw_payload, BLOCK.to_vec());

        // A sighting converts straight into a beacon that mimics it
        let spec = droid.impersonation_spec();
        let reencoded = protocol::encode(&spec);
        assert_eq!(&reencoded[2..5], &BLOCK[2..5]);
    }

    #[tokio::test]
    async fn wrong_local_name_is_filtered() {
        let mut noisy = droid_sighting(0x01, -40, &BLOCK);
        noisy.local_name = Some("DROIDX".to_string());
        let radio = Arc::new(FakeRadio::with_sightings(vec![
            noisy,
            droid_sighting(0x02, -50, &BLOCK),
        ]));
        let mut scanner = DroidScanner::new(radio);

        let mut stream = scanner.start().await.unwrap();
        let droid = stream.recv().await.unwrap();
        // Only the properly named droid came through
        assert_eq!(droid.address, 0x02);
        assert_eq!(scanner.sightings().len(), 1);
    }

    #[tokio::test]
    async fn foreign_manufacturer_data_is_filtered() {
        let radio = Arc::new(FakeRadio::with_sightings(vec![
            droid_sighting(0x01, -40, &[0x4C, 0x00, 0x10, 0x05, 0x0B, 0x1C]),
            droid_sighting(0x02, -50, &BLOCK),
        ]));
        let mut scanner = DroidScanner::new(radio);

        let mut stream = scanner.start().await.unwrap();
        assert_eq!(stream.recv().await.unwrap().address, 0x02);
    }

    #[tokio::test]
    async fn dedup_is_last_write_wins() {
        let radio = Arc::new(FakeRadio::with_sightings(vec![
            droid_sighting(0x07, -70, &BLOCK),
            droid_sighting(0x07, -42, &[0x83, 0x0A, 0x05, 0x0A, 0x05, 0x0B]),
        ]));
        let mut scanner = DroidScanner::new(radio);

        let mut stream = scanner.start().await.unwrap();
        // Both sightings surface on the stream...
        assert_eq!(stream.recv().await.unwrap().rssi, -70);
        assert_eq!(stream.recv().await.unwrap().rssi, -42);

        // ...but the cache holds exactly one entry, the most recent
        let cached = scanner.sightings();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].rssi, -42);
        assert_eq!(cached[0].personality_code, 0x0A);
        assert!(cached[0].chip_present);
    }

    #[tokio::test]
    async fn enrichment_backfills_name_and_failure_is_harmless() {
        let radio = FakeRadio::with_sightings(vec![
            droid_sighting(0x10, -55, &BLOCK),
            droid_sighting(0x11, -56, &BLOCK),
        ]);
        radio
            .names
            .lock()
            .unwrap()
            .insert(0x10, "R5-D4".to_string());
        let mut scanner = DroidScanner::new(Arc::new(radio));

        let mut stream = scanner.start().await.unwrap();
        let named = stream.recv().await.unwrap();
        assert_eq!(named.display_name.as_deref(), Some("R5-D4"));

        // No platform name for the second droid: still emitted
        let unnamed = stream.recv().await.unwrap();
        assert_eq!(unnamed.address, 0x11);
        assert!(unnamed.display_name.is_none());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_scan_restartable() {
        let radio = Arc::new(FakeRadio::with_sightings(vec![droid_sighting(
            0x01, -40, &BLOCK,
        )]));
        let mut scanner = DroidScanner::new(radio.clone());

        assert!(!scanner.is_scanning());
        scanner.stop().await.unwrap(); // stop while idle: no-op

        let mut stream = scanner.start().await.unwrap();
        assert!(scanner.is_scanning());
        assert!(stream.recv().await.is_some());

        scanner.stop().await.unwrap();
        scanner.stop().await.unwrap();
        assert!(!scanner.is_scanning());
        assert!(!radio.discovery_running.load(Ordering::SeqCst));

        // Restart delivers a fresh stream and a fresh cache
        let mut stream = scanner.start().await.unwrap();
        assert!(stream.recv().await.is_some());
        assert_eq!(scanner.sightings().len(), 1);
    }

    #[tokio::test]
    async fn start_while_scanning_leaves_radio_alone() {
        let radio = Arc::new(FakeRadio::with_sightings(vec![droid_sighting(
            0x01, -40, &BLOCK,
        )]));
        let mut scanner = DroidScanner::new(radio.clone());

        let _first = scanner.start().await.unwrap();
        let mut second = scanner.start().await.unwrap();
        assert!(scanner.is_scanning());

        // The replayed feed already ran; cache reflects a single start
        assert!(radio.discovery_running.load(Ordering::SeqCst));
        scanner.stop().await.unwrap();
        // The second receiver is now the live one, and it terminates
        while second.recv().await.is_some() {}
    }
}
