use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pipelink_frame::{FrameConfig, FrameError, FrameReader, FrameWriter, DEFAULT_MAX_PAYLOAD};
use pipelink_tlv::Tlv;
use pipelink_transport::{IpcStream, UnixDomainSocket};
use tracing::{debug, info, warn};

use crate::error::{ChannelError, Result};

/// Sink for inbound data payloads.
pub type DataSink = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Sink for inbound stop requests.
pub type StopSink = Box<dyn FnMut() + Send + 'static>;

/// Role-specific dispatch for frames arriving on the pump thread.
///
/// A role is a [`Channel`] plus an implementation of this trait; the pump
/// calls `handle_incoming` for every decoded inbound TLV. Handlers run on
/// the pump thread and must not block it for long.
pub trait InboundHandler: Send + Sync + 'static {
    /// Handle one decoded inbound TLV.
    ///
    /// The return value reports whether the message was recognized; the
    /// pump ignores it beyond diagnostics.
    fn handle_incoming(&self, tlv: Tlv) -> bool;

    /// Runs exactly once when the pump exits, whatever the cause.
    fn handle_closed(&self) {}
}

/// Configuration for a channel endpoint.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Deadline for connecting and for the handshake frame to arrive.
    pub connect_timeout: Duration,
    /// Maximum frame payload accepted in either direction.
    pub max_payload_size: usize,
    /// How long `close` waits for the pump thread before abandoning it.
    pub pump_join_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            pump_join_timeout: Duration::from_secs(2),
        }
    }
}

/// A framed duplex messaging channel to a named endpoint.
///
/// Constructed inert; `connect` opens the stream, reads the handshake
/// frame, and starts the receive pump. Outbound frames are serialized
/// under one send lock, which also guards the request sequence counter so
/// sequence numbers appear on the wire in allocation order. The first
/// send or receive failure latches the channel inactive; later sends fail
/// without touching the stream. `close` is idempotent and callable from
/// any thread.
pub struct Channel {
    endpoint: PathBuf,
    config: ChannelConfig,
    active: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    tx: Mutex<TxState>,
    stream: Mutex<Option<IpcStream>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

struct TxState {
    writer: Option<FrameWriter<IpcStream>>,
    next_seq: i32,
}

impl Channel {
    /// Create an inert channel for `endpoint`. No I/O occurs.
    pub fn new(endpoint: impl Into<PathBuf>) -> Self {
        Self::with_config(endpoint, ChannelConfig::default())
    }

    /// Create an inert channel with explicit configuration.
    pub fn with_config(endpoint: impl Into<PathBuf>, config: ChannelConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            active: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
            tx: Mutex::new(TxState {
                writer: None,
                next_seq: 1,
            }),
            stream: Mutex::new(None),
            pump: Mutex::new(None),
        }
    }

    /// The endpoint this channel targets.
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Whether the channel is connected and has not failed or been closed.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Connect to the endpoint and return the handshake payload.
    ///
    /// Opens the stream within the configured deadline, reads exactly one
    /// frame, decodes it as a leaf TLV, and hands its payload back. The
    /// pump thread starts only after a good handshake; any earlier failure
    /// leaves the channel fully disposed.
    pub fn connect(&self, handler: Arc<dyn InboundHandler>) -> Result<Vec<u8>> {
        if self.active.load(Ordering::SeqCst) {
            return Err(ChannelError::AlreadyConnected);
        }
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }

        let stream =
            UnixDomainSocket::connect_deadline(&self.endpoint, self.config.connect_timeout)?;
        let reader_stream = stream.try_clone()?;
        let control = stream.try_clone()?;

        // The handshake read runs under the connect deadline; the pump
        // blocks without one.
        let frame_config = FrameConfig {
            max_payload_size: self.config.max_payload_size,
            read_timeout: Some(self.config.connect_timeout),
            write_timeout: None,
        };
        let mut reader = FrameReader::with_config_ipc(reader_stream, frame_config.clone())?;
        let writer = FrameWriter::with_config_ipc(
            stream,
            FrameConfig {
                read_timeout: None,
                ..frame_config
            },
        )?;

        let handshake = match read_handshake(&mut reader) {
            Ok(payload) => payload,
            Err(err) => {
                let _ = control.shutdown();
                return Err(err);
            }
        };
        if let Err(err) = reader.get_ref().set_read_timeout(None) {
            let _ = control.shutdown();
            return Err(err.into());
        }

        let pump = match self.spawn_pump(reader, handler) {
            Ok(pump) => pump,
            Err(err) => {
                let _ = control.shutdown();
                return Err(err);
            }
        };

        self.tx.lock().writer = Some(writer);
        *self.stream.lock() = Some(control);
        *self.pump.lock() = Some(pump);

        info!(endpoint = ?self.endpoint, "channel connected");
        Ok(handshake)
    }

    fn spawn_pump(
        &self,
        mut reader: FrameReader<IpcStream>,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<JoinHandle<()>> {
        let active = Arc::clone(&self.active);
        let cancelled = Arc::clone(&self.cancelled);
        active.store(true, Ordering::SeqCst);

        std::thread::Builder::new()
            .name("pipelink-pump".to_string())
            .spawn(move || {
                pump_loop(&mut reader, handler.as_ref(), &active, &cancelled);
                handler.handle_closed();
            })
            .map_err(|err| {
                self.active.store(false, Ordering::SeqCst);
                ChannelError::Transport(err.into())
            })
    }

    /// Send one payload as a frame.
    ///
    /// Returns [`ChannelError::Inactive`] without touching the stream once
    /// the channel has gone inactive.
    pub fn put_data(&self, payload: &[u8]) -> Result<()> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(ChannelError::Inactive);
        }
        let mut tx = self.tx.lock();
        self.write_frame_locked(&mut tx, payload)
    }

    /// Encode and send one TLV as a frame.
    pub fn send_tlv(&self, tlv: &Tlv) -> Result<()> {
        self.put_data(&tlv.encode())
    }

    /// Allocate the next sequence number, build a TLV with it, and send —
    /// all inside the send lock, so sequence numbers hit the wire in
    /// allocation order.
    pub(crate) fn send_with_seq<F>(&self, build: F) -> Result<i32>
    where
        F: FnOnce(i32) -> pipelink_tlv::Result<Tlv>,
    {
        if !self.active.load(Ordering::SeqCst) {
            return Err(ChannelError::Inactive);
        }
        let mut tx = self.tx.lock();
        let seq = tx.next_seq;
        let tlv = build(seq)?;
        let encoded = tlv.encode();
        self.write_frame_locked(&mut tx, &encoded)?;
        tx.next_seq = seq.wrapping_add(1);
        Ok(seq)
    }

    fn write_frame_locked(&self, tx: &mut TxState, payload: &[u8]) -> Result<()> {
        let writer = tx.writer.as_mut().ok_or(ChannelError::Inactive)?;
        match writer.send(payload) {
            Ok(()) => Ok(()),
            Err(err) => {
                // First failure latches the channel; nothing else writes.
                self.active.store(false, Ordering::SeqCst);
                Err(ChannelError::Frame(err))
            }
        }
    }

    /// Shut the channel down. Idempotent and callable from any thread.
    ///
    /// Latches the channel inactive, flushes whatever the peer has not
    /// drained, shuts the stream down to unblock the pump's read, and
    /// joins the pump with a bounded wait.
    pub fn close(&self) {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);

        {
            let mut tx = self.tx.lock();
            if let Some(writer) = tx.writer.as_mut() {
                let _ = writer.flush();
            }
            tx.writer = None;
        }

        // Setting flags does not wake a read blocked on the stream; only
        // shutting the socket down does.
        if let Some(stream) = self.stream.lock().take() {
            let _ = stream.shutdown();
        }

        if let Some(pump) = self.pump.lock().take() {
            let deadline = Instant::now() + self.config.pump_join_timeout;
            while !pump.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if pump.is_finished() {
                let _ = pump.join();
            } else {
                warn!("pump thread did not exit before the join deadline");
            }
        }

        if was_active {
            info!(endpoint = ?self.endpoint, "channel closed");
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("endpoint", &self.endpoint)
            .field("active", &self.is_active())
            .finish()
    }
}

fn read_handshake(reader: &mut FrameReader<IpcStream>) -> Result<Vec<u8>> {
    let frame = reader.read_frame().map_err(|err| match err {
        FrameError::Io(io)
            if matches!(
                io.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ) =>
        {
            ChannelError::Handshake("timed out waiting for handshake frame".to_string())
        }
        other => ChannelError::Frame(other),
    })?;

    let tlv = Tlv::decode(&frame)
        .map_err(|err| ChannelError::Handshake(format!("handshake frame is not a TLV: {err}")))?;
    match tlv.data() {
        Some(payload) => Ok(payload.to_vec()),
        None => Err(ChannelError::Handshake(
            "handshake TLV is not a leaf".to_string(),
        )),
    }
}

fn pump_loop(
    reader: &mut FrameReader<IpcStream>,
    handler: &dyn InboundHandler,
    active: &AtomicBool,
    cancelled: &AtomicBool,
) {
    while active.load(Ordering::SeqCst) && !cancelled.load(Ordering::SeqCst) {
        match reader.read_frame() {
            Ok(frame) => match Tlv::decode(&frame) {
                Ok(tlv) => {
                    let recognized = handler.handle_incoming(tlv);
                    if !recognized {
                        debug!("ignoring unrecognized inbound message");
                    }
                }
                // A malformed body must not sever a healthy channel.
                Err(err) => debug!(%err, "dropping frame with undecodable body"),
            },
            Err(FrameError::ConnectionClosed) => {
                debug!("peer closed the stream; pump exiting");
                break;
            }
            Err(err) => {
                if !cancelled.load(Ordering::SeqCst) {
                    warn!(%err, "pump read failed");
                }
                break;
            }
        }
    }
    active.store(false, Ordering::SeqCst);
}
