//! Device session: transfer completions, transmit pacing and shutdown
//!
//! A [`Session`] owns the protocol engine for one device and drives it from
//! two directions:
//!
//! - input completions decode the received packet and re-arm the input request
//! - output completions, producer triggers and output attachment all attempt
//!   a transmit, of which at most one is ever in flight
//!
//! The transport must report completions asynchronously. Calling
//! [`Session::on_output_complete`] or [`Session::on_input_complete`] from
//! inside [`Transport::submit_output`] or [`Transport::submit_input`] would
//! re-enter the session lock and deadlock. The same holds for a
//! [`MidiSink`]: it runs under the session lock while a packet is decoded and
//! must not call back into the session, e.g. [`Session::trigger_output`].
//!
//! Every submission happens under the liveness gate, and [`Session::shutdown`]
//! clears the flag and cancels under that same gate. A completion racing with
//! shutdown therefore either submits before the cancel or not at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::core::{DeviceFamily, Port, ProtocolVariant};
use crate::engine::{engine_for, LinkStats, MidiSink, MidiSource, PortTable, ProtocolEngine};
use crate::error::{MuxError, Result};
use crate::packet::OutputPacket;

/// Settle time allowed for the initial input request
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Packet transport underneath a session.
///
/// Submissions are fire-and-forget: completion is reported later through
/// [`Session::on_output_complete`] and [`Session::on_input_complete`].
pub trait Transport: Send + Sync {
    /// Queue one outbound packet
    fn submit_output(&self, packet: &OutputPacket) -> Result<()>;

    /// Queue one inbound transfer request
    fn submit_input(&self) -> Result<()>;

    /// Wait up to `timeout` for outstanding setup requests.
    /// Returns false on timeout.
    fn settle(&self, timeout: Duration) -> bool {
        let _ = timeout;
        true
    }

    /// Cancel every outstanding request
    fn cancel_all(&self) {}
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn submit_output(&self, packet: &OutputPacket) -> Result<()> {
        (**self).submit_output(packet)
    }

    fn submit_input(&self) -> Result<()> {
        (**self).submit_input()
    }

    fn settle(&self, timeout: Duration) -> bool {
        (**self).settle(timeout)
    }

    fn cancel_all(&self) {
        (**self).cancel_all()
    }
}

/// Outcome reported with a transfer completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Transfer finished normally
    Completed,
    /// Transfer failed with a transport-specific code
    Failed(i32),
    /// Transfer was cancelled because the device is going away
    Shutdown,
}

/// Session parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Device family, which fixes the framing and the port counts
    pub family: DeviceFamily,
    /// How long `open` waits for the first input request to settle
    pub settle_timeout: Duration,
}

impl SessionConfig {
    /// Configuration with the default settle timeout
    pub fn new(family: DeviceFamily) -> Self {
        SessionConfig {
            family,
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
        }
    }
}

/// Builder for session configuration
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    family: Option<DeviceFamily>,
    settle_timeout: Duration,
}

impl SessionBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        SessionBuilder {
            family: None,
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
        }
    }

    /// Set the device family
    pub fn with_family(mut self, family: DeviceFamily) -> Self {
        self.family = Some(family);
        self
    }

    /// Identify the device family from its descriptors
    pub fn with_descriptor(mut self, device_subclass: u8, product: &str) -> Result<Self> {
        self.family = Some(DeviceFamily::identify(device_subclass, product)?);
        Ok(self)
    }

    /// Set the settle timeout used by `open`
    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<SessionConfig> {
        let family = self
            .family
            .ok_or_else(|| MuxError::invalid_config("device family not set"))?;
        Ok(SessionConfig {
            family,
            settle_timeout: self.settle_timeout,
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Link {
    engine: Box<dyn ProtocolEngine>,
    output_active: bool,
    stats: LinkStats,
}

/// One open device
pub struct Session<T: Transport> {
    config: SessionConfig,
    transport: T,
    ports: PortTable,
    link: Mutex<Link>,
    alive: AtomicBool,
    gate: Mutex<()>,
}

impl<T: Transport> Session<T> {
    /// Arm the first input request and wait for it to settle
    pub fn open(config: SessionConfig, transport: T) -> Result<Self> {
        let session = Session {
            config,
            transport,
            ports: PortTable::for_family(config.family),
            link: Mutex::new(Link {
                engine: engine_for(config.family),
                output_active: false,
                stats: LinkStats::default(),
            }),
            alive: AtomicBool::new(true),
            gate: Mutex::new(()),
        };
        debug!(
            family = %config.family,
            variant = ?config.family.variant(),
            "opening session"
        );

        if let Err(err) = session.transport.submit_input() {
            error!(%err, "failed to arm input request");
            return Err(err);
        }
        if !session.transport.settle(config.settle_timeout) {
            debug!(
                timeout_ms = config.settle_timeout.as_millis() as u64,
                "input request did not settle"
            );
        }
        Ok(session)
    }

    /// Device family of this session
    pub fn family(&self) -> DeviceFamily {
        self.config.family
    }

    /// Framing used on the wire
    pub fn variant(&self) -> ProtocolVariant {
        self.config.family.variant()
    }

    /// Configuration the session was opened with
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Registered port consumers and producers
    pub fn ports(&self) -> &PortTable {
        &self.ports
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Register the consumer for an input port
    pub fn attach_input(&self, port: Port, sink: Arc<dyn MidiSink>) -> Result<()> {
        self.ports.attach_input(port, sink)
    }

    /// Remove the consumer for an input port
    pub fn detach_input(&self, port: Port) -> Result<()> {
        self.ports.detach_input(port)
    }

    /// Register a producer and start transmitting whatever it has pending
    pub fn attach_output(&self, port: Port, source: Arc<dyn MidiSource>) -> Result<()> {
        self.ports.attach_output(port, source)?;
        self.trigger_output();
        Ok(())
    }

    /// Remove the producer for an output port
    pub fn detach_output(&self, port: Port) -> Result<()> {
        self.ports.detach_output(port)
    }

    /// Producer notification: new data may be pending.
    ///
    /// Does nothing while a packet is in flight; its completion picks the data up.
    pub fn trigger_output(&self) {
        if !self.is_alive() {
            return;
        }
        let mut link = self.lock();
        if link.output_active || !self.is_alive() {
            return;
        }
        self.transmit(&mut link);
    }

    /// Outbound transfer finished
    pub fn on_output_complete(&self, status: TransferStatus) {
        if status == TransferStatus::Shutdown || !self.is_alive() {
            return;
        }
        let mut link = self.lock();
        if !self.is_alive() {
            return;
        }
        if let TransferStatus::Failed(code) = status {
            warn!(code, "output transfer failed");
            link.stats.transfer_errors += 1;
        }
        link.output_active = false;
        self.transmit(&mut link);
    }

    /// Inbound transfer finished with `data` received
    pub fn on_input_complete(&self, status: TransferStatus, data: &[u8]) {
        if status == TransferStatus::Shutdown || !self.is_alive() {
            return;
        }
        let mut link = self.lock();
        if !self.is_alive() {
            return;
        }
        if let TransferStatus::Failed(code) = status {
            warn!(code, "input transfer failed");
            link.stats.transfer_errors += 1;
        }
        if !data.is_empty() {
            let Link { engine, stats, .. } = &mut *link;
            engine.decode(data, &self.ports, stats);
        }

        let _gate = self.gate();
        if !self.is_alive() {
            debug!("session shut down during decode, input not re-armed");
            return;
        }
        if let Err(err) = self.transport.submit_input() {
            error!(%err, "failed to re-arm input request");
            link.stats.submit_failures += 1;
        }
    }

    /// Stop all traffic. Completions arriving afterwards are ignored.
    ///
    /// Does not wait for a decode in progress; that completion sees the cleared
    /// flag before it re-arms.
    pub fn shutdown(&self) {
        let _gate = self.gate();
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!(family = %self.config.family, "shutting down session");
        self.transport.cancel_all();
    }

    /// Whether the session still accepts completions
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Whether an outbound packet is in flight
    pub fn is_output_active(&self) -> bool {
        self.is_alive() && self.lock().output_active
    }

    /// Snapshot of the link counters
    pub fn stats(&self) -> LinkStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transmit(&self, link: &mut Link) {
        let Link {
            engine,
            output_active,
            stats,
        } = link;
        let Some(packet) = engine.encode(&self.ports, stats) else {
            *output_active = false;
            return;
        };
        let _gate = self.gate();
        if !self.is_alive() {
            *output_active = false;
            return;
        }
        match self.transport.submit_output(&packet) {
            Ok(()) => {
                *output_active = true;
                stats.packets_sent += 1;
            }
            Err(err) => {
                error!(%err, len = packet.len(), "output submission failed");
                *output_active = false;
                stats.submit_failures += 1;
            }
        }
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
