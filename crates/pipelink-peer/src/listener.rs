use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use pipelink_tlv::Tlv;
use tracing::debug;

use crate::channel::{Channel, ChannelConfig, DataSink, InboundHandler};
use crate::codes;
use crate::error::Result;

/// The request/response side of the protocol.
///
/// Issues sequence-numbered requests and blocks the caller until the
/// matching response arrives on the pump thread; unsolicited callback
/// payloads go to a user-supplied sink. Responses and waiters live in two
/// maps under one lock, keyed by sequence number.
pub struct ListenerChannel {
    channel: Channel,
    state: Arc<ListenerState>,
}

struct ListenerState {
    callback: Mutex<Option<DataSink>>,
    tables: Mutex<CorrelationTables>,
}

#[derive(Default)]
struct CorrelationTables {
    /// Responses parked until their waiter consumes them.
    responses: HashMap<i32, Tlv>,
    /// One-shot wakers registered by blocked waiters.
    waiters: HashMap<i32, Arc<Gate>>,
}

/// One-shot wakeup gate. Created by the waiter, signaled at most once by
/// the pump, discarded after a single wait.
struct Gate {
    fired: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            fired: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn signal(&self) {
        let mut fired = self.fired.lock();
        *fired = true;
        self.cv.notify_all();
    }

    /// Wait until signaled or until `timeout` elapses; `None` waits
    /// forever. Returns whether the gate fired.
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut fired = self.fired.lock();
        match timeout {
            None => {
                while !*fired {
                    self.cv.wait(&mut fired);
                }
                true
            }
            Some(timeout) => {
                let deadline = std::time::Instant::now() + timeout;
                while !*fired {
                    if self.cv.wait_until(&mut fired, deadline).timed_out() {
                        break;
                    }
                }
                *fired
            }
        }
    }
}

impl ListenerChannel {
    /// Create an inert listener for `endpoint`. No I/O occurs.
    pub fn new(endpoint: impl Into<PathBuf>) -> Self {
        Self::with_config(endpoint, ChannelConfig::default())
    }

    /// Create an inert listener with explicit channel configuration.
    pub fn with_config(endpoint: impl Into<PathBuf>, config: ChannelConfig) -> Self {
        Self {
            channel: Channel::with_config(endpoint, config),
            state: Arc::new(ListenerState {
                callback: Mutex::new(None),
                tables: Mutex::new(CorrelationTables::default()),
            }),
        }
    }

    /// Connect and return the handshake payload.
    pub fn connect(&self) -> Result<Vec<u8>> {
        self.channel
            .connect(Arc::clone(&self.state) as Arc<dyn InboundHandler>)
    }

    /// Whether the underlying channel is active.
    pub fn is_active(&self) -> bool {
        self.channel.is_active()
    }

    /// Replace the sink invoked for unsolicited callback payloads.
    pub fn set_callback(&self, sink: impl FnMut(&[u8]) + Send + 'static) {
        *self.state.callback.lock() = Some(Box::new(sink));
    }

    /// Request the peer's metadata and block until the response arrives.
    ///
    /// Returns the response's data payload, or `None` when the response
    /// carries none.
    pub fn get_metadata(&self) -> Result<Option<Vec<u8>>> {
        self.request(codes::METADATA_REQUEST)
    }

    /// Request the peer's pending outbound data and block until the
    /// response arrives.
    pub fn get_data_to_send(&self) -> Result<Option<Vec<u8>>> {
        self.request(codes::OUTBOUND_REQUEST)
    }

    /// Push freshly received upstream data to the peer. No response is
    /// expected.
    pub fn push_new_data(&self, data: &[u8]) -> Result<()> {
        let tlv = Tlv::new_leaf(codes::NEW_DATA_PUSH, data.to_vec())?;
        self.channel.send_tlv(&tlv)
    }

    fn request(&self, request_type: u8) -> Result<Option<Vec<u8>>> {
        let seq = self.channel.send_with_seq(|seq| {
            let mut request = Tlv::new_parent(request_type)?;
            request.add_child(Tlv::new_leaf(
                codes::CHILD_SELECTOR,
                vec![codes::SELECTOR_FETCH],
            )?)?;
            request.add_child(Tlv::new_leaf(
                codes::CHILD_SEQUENCE,
                seq.to_le_bytes().to_vec(),
            )?)?;
            Ok(request)
        })?;
        Ok(self.wait_for_response(seq, None))
    }

    /// Block until the response for `id` arrives, up to `timeout`
    /// (`None` waits forever).
    ///
    /// Returns the response's data payload; `None` on timeout and for a
    /// response without a data child. A response that arrived before this
    /// call is consumed immediately.
    pub fn wait_for_response(&self, id: i32, timeout: Option<Duration>) -> Option<Vec<u8>> {
        let gate = {
            let mut tables = self.state.tables.lock();
            if let Some(response) = tables.responses.remove(&id) {
                tables.waiters.remove(&id);
                return response_payload(&response);
            }
            // Register before releasing the lock: the pump only signals
            // wakers that already exist.
            let gate = Arc::new(Gate::new());
            tables.waiters.insert(id, Arc::clone(&gate));
            gate
        };

        let _fired = gate.wait(timeout);

        // Re-check under the lock whether the wait ended by signal or by
        // timeout; the response may have raced in either way.
        let mut tables = self.state.tables.lock();
        tables.waiters.remove(&id);
        tables
            .responses
            .remove(&id)
            .and_then(|response| response_payload(&response))
    }

    /// Shut down the channel and release every blocked waiter.
    pub fn close(&self) {
        self.channel.close();
        self.state.dispose();
    }
}

impl Drop for ListenerChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl ListenerState {
    /// Wake every blocked waiter. Parked responses stay consumable.
    fn release_waiters(&self) {
        let mut tables = self.tables.lock();
        for (_, gate) in tables.waiters.drain() {
            gate.signal();
        }
    }

    fn dispose(&self) {
        let mut tables = self.tables.lock();
        for (_, gate) in tables.waiters.drain() {
            gate.signal();
        }
        tables.responses.clear();
    }
}

impl InboundHandler for ListenerState {
    fn handle_incoming(&self, tlv: Tlv) -> bool {
        match tlv.type_code() {
            codes::CALLBACK => {
                if let Some(data) = tlv.get_child(codes::CHILD_DATA, 0).and_then(Tlv::data) {
                    let mut callback = self.callback.lock();
                    if let Some(sink) = callback.as_mut() {
                        sink(data);
                    }
                }
                true
            }
            code if codes::is_correlated_request(code) => {
                let Some(id) = tlv
                    .get_child(codes::CHILD_SEQUENCE, 0)
                    .and_then(|child| child.as_i32().ok())
                else {
                    debug!(
                        code = codes::message_name(code),
                        "response without a sequence child"
                    );
                    return false;
                };

                let mut tables = self.tables.lock();
                // Store before signaling: a woken waiter must find the
                // response in the map.
                tables.responses.insert(id, tlv);
                if let Some(gate) = tables.waiters.get(&id) {
                    gate.signal();
                }
                true
            }
            _ => false,
        }
    }

    fn handle_closed(&self) {
        self.release_waiters();
    }
}

fn response_payload(response: &Tlv) -> Option<Vec<u8>> {
    response
        .get_child(codes::CHILD_DATA, 0)
        .and_then(|child| child.data().map(<[u8]>::to_vec))
}
