//! Windows Radio Backend
//!
//! [`RadioAdapter`] and [`GattLink`] over the WinRT Bluetooth stack.
//! WinRT async operations are awaited on blocking threads via `.get()` so
//! the session layer only ever sees Send futures it can race against its
//! own timeouts.

use crate::infrastructure::bluetooth::radio::{
    GattLink, RadioAdapter, RadioError, ServiceProbe, Sighting,
};
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementPublisher, BluetoothLEAdvertisementReceivedEventArgs,
    BluetoothLEAdvertisementWatcher, BluetoothLEManufacturerData,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCommunicationStatus, GattSession,
};
use windows::Devices::Bluetooth::{BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter};

fn backend_err(e: windows::core::Error) -> RadioError {
    RadioError::Backend(e.to_string())
}

fn join_err(e: tokio::task::JoinError) -> RadioError {
    RadioError::Backend(e.to_string())
}

fn to_guid(uuid: Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

/// Platform radio over WinRT.
pub struct WinRtRadio {
    watcher: Mutex<Option<BluetoothLEAdvertisementWatcher>>,
    publisher: Mutex<Option<BluetoothLEAdvertisementPublisher>>,
}

impl WinRtRadio {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            watcher: Mutex::new(None),
            publisher: Mutex::new(None),
        })
    }

    fn sighting_from(
        args: &BluetoothLEAdvertisementReceivedEventArgs,
    ) -> windows::core::Result<Sighting> {
        let advertisement = args.Advertisement()?;
        let name = advertisement.LocalName()?.to_string();

        // Reassemble the full wire block: company id bytes plus payload
        let mut manufacturer_data = Vec::new();
        let sections = advertisement.ManufacturerData()?;
        if sections.Size()? > 0 {
            let section = sections.GetAt(0)?;
            manufacturer_data.extend_from_slice(&section.CompanyId()?.to_le_bytes());
            let buffer = section.Data()?;
            let reader = DataReader::FromBuffer(&buffer)?;
            let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
            reader.ReadBytes(&mut bytes)?;
            manufacturer_data.extend_from_slice(&bytes);
        }

        Ok(Sighting {
            address: args.BluetoothAddress()?,
            rssi: args.RawSignalStrengthInDBm()?,
            local_name: if name.is_empty() { None } else { Some(name) },
            manufacturer_data,
        })
    }
}

#[async_trait]
impl RadioAdapter for WinRtRadio {
    async fn start_discovery(
        &self,
        sink: mpsc::UnboundedSender<Sighting>,
    ) -> Result<(), RadioError> {
        let mut slot = self.watcher.lock().expect("watcher lock");
        if slot.is_some() {
            return Ok(());
        }

        let watcher = BluetoothLEAdvertisementWatcher::new().map_err(backend_err)?;
        watcher
            .SetScanningMode(BluetoothLEScanningMode::Active)
            .map_err(backend_err)?;

        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let sighting = Self::sighting_from(args)?;
                    let _ = sink.send(sighting);
                }
                Ok(())
            },
        );

        watcher.Received(&handler).map_err(backend_err)?;
        watcher.Start().map_err(|e| RadioError::Unavailable(e.to_string()))?;
        info!("WinRT advertisement watcher started");
        *slot = Some(watcher);
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), RadioError> {
        if let Some(watcher) = self.watcher.lock().expect("watcher lock").take() {
            watcher.Stop().map_err(backend_err)?;
            info!("WinRT advertisement watcher stopped");
        }
        Ok(())
    }

    async fn start_advertising(&self, block: Vec<u8>) -> Result<(), RadioError> {
        if block.len() < 2 {
            return Err(RadioError::Backend(
                "manufacturer block shorter than its id".into(),
            ));
        }
        let company_id = u16::from_le_bytes([block[0], block[1]]);

        let mut slot = self.publisher.lock().expect("publisher lock");
        if let Some(previous) = slot.take() {
            if let Err(e) = previous.Stop() {
                warn!("Previous advertisement did not stop cleanly: {e}");
            }
        }

        let publisher = BluetoothLEAdvertisementPublisher::new().map_err(backend_err)?;
        let writer = DataWriter::new().map_err(backend_err)?;
        writer.WriteBytes(&block[2..]).map_err(backend_err)?;
        let buffer = writer.DetachBuffer().map_err(backend_err)?;
        let section =
            BluetoothLEManufacturerData::Create(company_id, &buffer).map_err(backend_err)?;
        publisher
            .Advertisement()
            .map_err(backend_err)?
            .ManufacturerData()
            .map_err(backend_err)?
            .Append(&section)
            .map_err(backend_err)?;

        publisher
            .Start()
            .map_err(|e| RadioError::Unavailable(e.to_string()))?;
        *slot = Some(publisher);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), RadioError> {
        if let Some(publisher) = self.publisher.lock().expect("publisher lock").take() {
            publisher.Stop().map_err(backend_err)?;
        }
        Ok(())
    }

    async fn open_link(&self, address: u64) -> Result<Box<dyn GattLink>, RadioError> {
        let device = tokio::task::spawn_blocking(move || {
            BluetoothLEDevice::FromBluetoothAddressAsync(address)?.get()
        })
        .await
        .map_err(join_err)?
        .map_err(|_| RadioError::DeviceUnreachable(address))?;

        // Keep a GattSession pinned so Windows maintains the connection
        // instead of dropping it between writes.
        let session = {
            let device = device.clone();
            tokio::task::spawn_blocking(move || -> windows::core::Result<GattSession> {
                let session = GattSession::FromDeviceIdAsync(&device.BluetoothDeviceId()?)?.get()?;
                session.SetMaintainConnection(true)?;
                Ok(session)
            })
            .await
            .map_err(join_err)?
        };
        let session = match session {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("GattSession unavailable, continuing without it: {e}");
                None
            }
        };

        Ok(Box::new(WinRtLink {
            device,
            _session: session,
            command: None,
        }))
    }

    async fn device_name(&self, address: u64) -> Option<String> {
        let name = tokio::task::spawn_blocking(move || {
            let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)
                .ok()?
                .get()
                .ok()?;
            device.Name().ok().map(|n| n.to_string())
        })
        .await
        .ok()
        .flatten()?;
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

/// One open GATT connection over WinRT.
pub struct WinRtLink {
    device: BluetoothLEDevice,
    _session: Option<GattSession>,
    command: Option<GattCharacteristic>,
}

#[async_trait]
impl GattLink for WinRtLink {
    async fn probe_command_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<ServiceProbe, RadioError> {
        let device = self.device.clone();
        let service_guid = to_guid(service);
        let characteristic_guid = to_guid(characteristic);

        let probed = tokio::task::spawn_blocking(
            move || -> windows::core::Result<Result<GattCharacteristic, ServiceProbe>> {
                let services = device.GetGattServicesForUuidAsync(service_guid)?.get()?;
                if services.Status()? != GattCommunicationStatus::Success
                    || services.Services()?.Size()? == 0
                {
                    return Ok(Err(ServiceProbe::ServiceMissing));
                }
                let service = services.Services()?.GetAt(0)?;
                let _ = service.RequestAccessAsync()?.get()?;

                let characteristics = service
                    .GetCharacteristicsForUuidAsync(characteristic_guid)?
                    .get()?;
                if characteristics.Status()? != GattCommunicationStatus::Success
                    || characteristics.Characteristics()?.Size()? == 0
                {
                    return Ok(Err(ServiceProbe::CharacteristicMissing));
                }
                Ok(Ok(characteristics.Characteristics()?.GetAt(0)?))
            },
        )
        .await
        .map_err(join_err)?
        .map_err(backend_err)?;

        match probed {
            Ok(command) => {
                self.command = Some(command);
                Ok(ServiceProbe::Resolved)
            }
            Err(missing) => Ok(missing),
        }
    }

    async fn write_command(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        let Some(command) = self.command.clone() else {
            return Err(RadioError::Backend(
                "command characteristic not resolved".into(),
            ));
        };
        let bytes = frame.to_vec();

        let status = tokio::task::spawn_blocking(
            move || -> windows::core::Result<GattCommunicationStatus> {
                let writer = DataWriter::new()?;
                writer.WriteBytes(&bytes)?;
                let buffer = writer.DetachBuffer()?;
                let result = command.WriteValueWithResultAsync(&buffer)?.get()?;
                result.Status()
            },
        )
        .await
        .map_err(join_err)?
        .map_err(backend_err)?;

        if status == GattCommunicationStatus::Success {
            Ok(())
        } else {
            Err(RadioError::Backend(format!(
                "write not acknowledged: {status:?}"
            )))
        }
    }

    fn is_connected(&self) -> bool {
        self.device
            .ConnectionStatus()
            .map(|s| s == BluetoothConnectionStatus::Connected)
            .unwrap_or(false)
    }

    async fn close(&mut self) {
        self.command = None;
        if let Err(e) = self.device.Close() {
            warn!("Device close reported: {e}");
        }
    }
}
