//! Bluetooth LE transport for JBD packs, built on the `bluest` crate.
//!
//! JBD packs expose a GATT service with one characteristic that accepts
//! request writes and one that delivers the fragmented responses as
//! notifications. This module adapts that link to the [`Transport`]
//! interface: a spawned forwarder owns the notification stream and feeds
//! a bounded queue that the session client drains one fragment at a time.

use crate::client::{Error, Transport};
use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device, Uuid};
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

/// GATT service advertised by JBD packs.
const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ff00_0000_1000_8000_00805f9b34fb);
/// Characteristic delivering response notifications (BMS to host).
const RX_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000ff01_0000_1000_8000_00805f9b34fb);
/// Characteristic accepting request writes (host to BMS).
const TX_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000ff02_0000_1000_8000_00805f9b34fb);

const SCAN_TIMEOUT: Duration = Duration::from_secs(30);
const FRAGMENT_QUEUE: usize = 16;

/// Errors specific to the Bluetooth LE transport.
#[derive(Debug, thiserror::Error)]
pub enum BleError {
    #[error("no default Bluetooth adapter found")]
    NoAdapter,
    #[error("device '{0}' not found")]
    DeviceNotFound(String),
    #[error("device does not expose the JBD GATT service")]
    ServiceNotFound,
    #[error("device does not expose the JBD GATT characteristics")]
    CharacteristicNotFound,
    #[error("notification subscription failed")]
    SubscriptionFailed,
    #[error("notification stream ended")]
    StreamEnded,
    #[error(transparent)]
    Ble(#[from] bluest::Error),
}

impl From<BleError> for Error {
    fn from(err: BleError) -> Self {
        Error::Transport(Box::new(err))
    }
}

type Result<T> = std::result::Result<T, Error>;

/// [`Transport`] implementation over a `bluest` GATT connection.
///
/// The advertised device name identifies the pack; discovery runs on the
/// first connect and the resolved device is cached for reconnects.
pub struct BleTransport {
    device_name: String,
    adapter: Option<Adapter>,
    device: Option<Device>,
    write: Option<Characteristic>,
    notify: Option<Characteristic>,
    fragments: Option<mpsc::Receiver<Vec<u8>>>,
    notify_task: Option<JoinHandle<()>>,
}

impl BleTransport {
    /// Creates a transport targeting the pack advertised under
    /// `device_name`. Nothing is resolved yet; adapter acquisition and
    /// device discovery happen on the first connect.
    pub fn new(device_name: &str) -> Self {
        Self {
            device_name: device_name.to_string(),
            adapter: None,
            device: None,
            write: None,
            notify: None,
            fragments: None,
            notify_task: None,
        }
    }

    async fn discover_device(
        adapter: &Adapter,
        name: &str,
    ) -> std::result::Result<Device, BleError> {
        let required_services = [SERVICE_UUID];
        let mut scan = adapter.scan(&required_services).await?;
        while let Some(discovered) = scan.next().await {
            if let Ok(device_name) = discovered.device.name_async().await {
                if device_name == name {
                    return Ok(discovered.device);
                }
            }
        }
        Err(BleError::DeviceNotFound(name.to_string()))
    }

    async fn connect_inner(&mut self) -> std::result::Result<(), BleError> {
        let adapter = match self.adapter.clone() {
            Some(adapter) => adapter,
            None => {
                let adapter = Adapter::default().await.ok_or(BleError::NoAdapter)?;
                adapter.wait_available().await?;
                self.adapter = Some(adapter.clone());
                adapter
            }
        };
        let device = match self.device.clone() {
            Some(device) => device,
            None => {
                log::debug!("scanning for '{}'", self.device_name);
                let device = timeout(
                    SCAN_TIMEOUT,
                    Self::discover_device(&adapter, &self.device_name),
                )
                .await
                .map_err(|_| BleError::DeviceNotFound(self.device_name.clone()))??;
                self.device = Some(device.clone());
                device
            }
        };
        adapter.connect_device(&device).await?;
        log::debug!("connected to '{}'", self.device_name);

        // Characteristics can go stale across disconnects, rediscover on
        // every connect.
        let service = device
            .discover_services_with_uuid(SERVICE_UUID)
            .await?
            .first()
            .ok_or(BleError::ServiceNotFound)?
            .clone();
        self.write = Some(
            service
                .discover_characteristics_with_uuid(TX_CHARACTERISTIC_UUID)
                .await?
                .first()
                .ok_or(BleError::CharacteristicNotFound)?
                .clone(),
        );
        self.notify = Some(
            service
                .discover_characteristics_with_uuid(RX_CHARACTERISTIC_UUID)
                .await?
                .first()
                .ok_or(BleError::CharacteristicNotFound)?
                .clone(),
        );
        Ok(())
    }

    async fn subscribe_inner(&mut self) -> std::result::Result<(), BleError> {
        if self.notify_task.is_some() {
            return Ok(());
        }
        let characteristic = self
            .notify
            .clone()
            .ok_or(BleError::CharacteristicNotFound)?;
        let (fragment_tx, fragment_rx) = mpsc::channel(FRAGMENT_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut stream = match characteristic.notify().await {
                Ok(stream) => {
                    let _ = ready_tx.send(None);
                    stream
                }
                Err(err) => {
                    let _ = ready_tx.send(Some(err));
                    return;
                }
            };
            while let Some(notification) = stream.next().await {
                match notification {
                    Ok(data) => {
                        if fragment_tx.send(data).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        log::warn!("notification stream error: {err}");
                        break;
                    }
                }
            }
            log::debug!("notification stream ended");
        });
        match ready_rx.await {
            Ok(None) => {
                self.fragments = Some(fragment_rx);
                self.notify_task = Some(task);
                Ok(())
            }
            Ok(Some(err)) => Err(BleError::from(err)),
            Err(_) => Err(BleError::SubscriptionFailed),
        }
    }

    async fn disconnect_inner(&mut self) -> std::result::Result<(), BleError> {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        self.fragments = None;
        self.write = None;
        self.notify = None;
        if let (Some(adapter), Some(device)) = (&self.adapter, &self.device) {
            adapter.disconnect_device(device).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(&mut self) -> Result<()> {
        self.connect_inner().await.map_err(Error::from)
    }

    async fn subscribe(&mut self) -> Result<()> {
        self.subscribe_inner().await.map_err(Error::from)
    }

    async fn write_request(&mut self, request: &[u8]) -> Result<()> {
        let write = self.write.as_ref().ok_or(Error::NotConnected)?;
        log::trace!("characteristic write: {request:02X?}");
        write
            .write(request)
            .await
            .map_err(|err| Error::from(BleError::from(err)))
    }

    async fn next_fragment(&mut self) -> Result<Vec<u8>> {
        let fragments = self.fragments.as_mut().ok_or(Error::NotConnected)?;
        match fragments.recv().await {
            Some(fragment) => {
                log::trace!("notification: {fragment:02X?}");
                Ok(fragment)
            }
            None => Err(Error::from(BleError::StreamEnded)),
        }
    }

    fn discard_pending(&mut self) {
        if let Some(fragments) = self.fragments.as_mut() {
            let mut discarded = 0;
            while fragments.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                log::debug!("discarded {discarded} stale notification fragments");
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.disconnect_inner().await.map_err(Error::from)
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
    }
}
