//! Provides an asynchronous client for polling a JBD BMS (Battery
//! Management System) over a fragmenting notification transport.
//!
//! The client is generic over [`Transport`], so the same session logic
//! drives the Bluetooth LE transport of the `bluest_async` module and the
//! mock transports used in tests. This module is suitable for
//! applications built on the Tokio runtime.
//!
//! # Example
//!
//! ```no_run
//! use jbdbms_lib::bluest_async::BleTransport;
//! use jbdbms_lib::client::{Error, JbdBMS};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let mut bms = JbdBMS::new(BleTransport::new("JBD-XXXXXX"));
//!     bms.set_timeout(Duration::from_secs(5));
//!
//!     let telemetry = bms.update().await?;
//!     println!("{telemetry}");
//!
//!     bms.disconnect().await;
//!     Ok(())
//! }
//! ```

use crate::protocol::{self, BasicInfo, FrameAssembler};
use crate::telemetry::Telemetry;
use async_trait::async_trait;
use std::time::Duration;

/// Errors specific to the asynchronous session client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error originating from the JBD protocol library.
    #[error("JBD error: {0}")]
    JbdError(#[from] crate::Error),
    /// An error raised by the underlying transport.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// An operation that needs an established link was called without one.
    #[error("not connected")]
    NotConnected,
}

/// A specialized `Result` type for operations within the `client` module.
type Result<T> = std::result::Result<T, Error>;

/// Narrow interface to the notification link used by [`JbdBMS`].
///
/// Implementations deliver notification payloads in arrival order;
/// fragment boundaries are transport artifacts and carry no meaning.
/// Responses never come back from `write_request` directly, only through
/// `next_fragment`.
#[async_trait]
pub trait Transport {
    /// Establish the link. May be called again after a disconnect, or on
    /// a link that is already up.
    async fn connect(&mut self) -> Result<()>;
    /// Enable notification delivery. Must be idempotent.
    async fn subscribe(&mut self) -> Result<()>;
    /// Send one request frame to the device.
    async fn write_request(&mut self, request: &[u8]) -> Result<()>;
    /// Await the next notification payload.
    async fn next_fragment(&mut self) -> Result<Vec<u8>>;
    /// Drop notification payloads still queued from earlier cycles.
    fn discard_pending(&mut self) {}
    /// Tear down the link.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Default time budget for one update cycle's response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// The main struct for polling a JBD BMS through a [`Transport`].
///
/// One session owns its transport exclusively, and `update()` takes
/// `&mut self`, which keeps request/response cycles strictly serial; a
/// response can never be attributed to the wrong request.
pub struct JbdBMS<T: Transport> {
    transport: T,
    connected: bool,
    keep_alive: bool,
    timeout: Duration,
}

impl<T: Transport> JbdBMS<T> {
    /// Creates a new session over `transport`.
    ///
    /// The session starts disconnected, keeps the connection alive
    /// between update cycles and waits up to [`DEFAULT_TIMEOUT`] for each
    /// response.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            connected: false,
            keep_alive: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the time budget for one response.
    ///
    /// The budget covers reassembly of all notification fragments of one
    /// frame, not each fragment individually.
    pub fn set_timeout(&mut self, timeout: Duration) {
        log::trace!("set timeout to {timeout:?}");
        self.timeout = timeout;
    }

    /// Controls whether the connection stays up between update cycles.
    ///
    /// Keep-alive is on by default. With keep-alive off the session
    /// disconnects after every cycle and re-establishes on the next one,
    /// which is considerably slower.
    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        log::trace!("set keep-alive to {keep_alive}");
        self.keep_alive = keep_alive;
    }

    /// Whether the session currently holds an established connection.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Polls the BMS once and returns the telemetry result set.
    ///
    /// Connects and subscribes first if the session is not established;
    /// only failures of that establishment escalate as errors. Everything
    /// data-level - a timed out or unparseable response, a checksum
    /// mismatch, a failed request write - yields the empty result set
    /// instead, and the session stays usable for the next cycle.
    pub async fn update(&mut self) -> Result<Telemetry> {
        self.ensure_connected().await?;

        self.transport.discard_pending();
        let request = protocol::basic_info_request();
        log::trace!("write request: {request:02X?}");
        let telemetry = match self.transport.write_request(&request).await {
            Ok(()) => self.receive_telemetry().await,
            Err(err) => {
                log::warn!("request write failed: {err}");
                Telemetry::default()
            }
        };

        if !self.keep_alive {
            // Force a fresh connection on the next cycle.
            self.disconnect().await;
        }
        Ok(telemetry)
    }

    async fn receive_telemetry(&mut self) -> Telemetry {
        let mut assembler = FrameAssembler::new();
        let frame = match tokio::time::timeout(
            self.timeout,
            Self::collect_frame(&mut self.transport, &mut assembler),
        )
        .await
        {
            Ok(Ok(frame)) => frame,
            Ok(Err(err)) => {
                log::warn!("notification stream failed: {err}");
                return Telemetry::default();
            }
            Err(_) => {
                log::warn!(
                    "no complete frame within {:?}, {} bytes buffered",
                    self.timeout,
                    assembler.bytes_received()
                );
                return Telemetry::default();
            }
        };
        match protocol::validate(&frame).and_then(BasicInfo::decode) {
            Ok(info) => Telemetry::from(info),
            Err(err) => {
                log::warn!("discarding frame: {err}");
                Telemetry::default()
            }
        }
    }

    async fn collect_frame(transport: &mut T, assembler: &mut FrameAssembler) -> Result<Vec<u8>> {
        loop {
            let fragment = transport.next_fragment().await?;
            log::trace!("read fragment: {fragment:02X?}");
            if let Some(frame) = assembler.push(&fragment) {
                return Ok(frame);
            }
        }
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.connected {
            log::trace!("reusing established connection");
            return Ok(());
        }
        log::debug!("connecting");
        self.transport.connect().await?;
        // Subscription is part of establishment; without it the link is
        // torn down again and the failure escalates.
        if let Err(err) = self.transport.subscribe().await {
            if let Err(teardown) = self.transport.disconnect().await {
                log::warn!("disconnect failed: {teardown}");
            }
            return Err(err);
        }
        self.connected = true;
        Ok(())
    }

    /// Tears down the connection.
    ///
    /// Idempotent; transport failures during teardown are logged and
    /// absorbed, and the session always ends up disconnected.
    pub async fn disconnect(&mut self) {
        if self.connected {
            log::debug!("disconnecting");
            if let Err(err) = self.transport.disconnect().await {
                log::warn!("disconnect failed: {err}");
            }
        }
        self.connected = false;
    }
}
