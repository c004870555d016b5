use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use pipelink_tlv::Tlv;

use crate::channel::{Channel, ChannelConfig, DataSink, InboundHandler, StopSink};
use crate::codes;
use crate::error::Result;

/// The execution side of the protocol.
///
/// Sends fire-and-forget results, errors, return statuses, and execution
/// configuration to the peer; dispatches inbound "new data" and "stop"
/// pushes to user-supplied sinks.
pub struct CommandChannel {
    channel: Channel,
    state: Arc<CommandState>,
}

struct CommandState {
    on_new_data: Mutex<Option<DataSink>>,
    on_stop: Mutex<Option<StopSink>>,
}

impl CommandChannel {
    /// Create an inert command channel for `endpoint`. No I/O occurs.
    pub fn new(endpoint: impl Into<PathBuf>) -> Self {
        Self::with_config(endpoint, ChannelConfig::default())
    }

    /// Create an inert command channel with explicit configuration.
    pub fn with_config(endpoint: impl Into<PathBuf>, config: ChannelConfig) -> Self {
        Self {
            channel: Channel::with_config(endpoint, config),
            state: Arc::new(CommandState {
                on_new_data: Mutex::new(None),
                on_stop: Mutex::new(None),
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

    /// Replace the sink invoked for inbound new-data payloads.
    pub fn set_new_data_sink(&self, sink: impl FnMut(&[u8]) + Send + 'static) {
        *self.state.on_new_data.lock() = Some(Box::new(sink));
    }

    /// Replace the sink invoked for inbound stop requests.
    pub fn set_stop_sink(&self, sink: impl FnMut() + Send + 'static) {
        *self.state.on_stop.lock() = Some(Box::new(sink));
    }

    /// Send an execution result payload.
    pub fn send_result(&self, data: &[u8]) -> Result<()> {
        self.send_leaf(codes::RESULT, data)
    }

    /// Send an execution error payload.
    pub fn send_error(&self, data: &[u8]) -> Result<()> {
        self.send_leaf(codes::ERROR_REPORT, data)
    }

    /// Report that the execution finished successfully.
    pub fn send_return_success(&self) -> Result<()> {
        self.send_leaf(codes::RETURN_SUCCESS, &[])
    }

    /// Report that the execution failed.
    pub fn send_return_failed(&self) -> Result<()> {
        self.send_leaf(codes::RETURN_FAILED, &[])
    }

    /// Announce that results will keep streaming in.
    pub fn send_conf_ongoing_result(&self) -> Result<()> {
        self.channel.send_tlv(&conf_ongoing_result()?)
    }

    /// Ask the peer to wait `wait_ms` milliseconds before stopping.
    pub fn send_conf_stop_wait(&self, wait_ms: i32) -> Result<()> {
        self.channel.send_tlv(&conf_stop_wait(wait_ms)?)
    }

    fn send_leaf(&self, type_code: u8, data: &[u8]) -> Result<()> {
        let tlv = Tlv::new_leaf(type_code, data.to_vec())?;
        self.channel.send_tlv(&tlv)
    }

    /// Shut down the channel.
    pub fn close(&self) {
        self.channel.close();
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn conf_ongoing_result() -> pipelink_tlv::Result<Tlv> {
    let mut config = Tlv::new_parent(codes::CONFIG)?;
    config.add_child(Tlv::new_leaf(codes::CHILD_ONGOING, vec![0x01])?)?;
    Ok(config)
}

fn conf_stop_wait(wait_ms: i32) -> pipelink_tlv::Result<Tlv> {
    let mut config = Tlv::new_parent(codes::CONFIG)?;
    config.add_child(Tlv::new_leaf(
        codes::CHILD_STOP_WAIT,
        wait_ms.to_le_bytes().to_vec(),
    )?)?;
    Ok(config)
}

impl InboundHandler for CommandState {
    fn handle_incoming(&self, tlv: Tlv) -> bool {
        match tlv.type_code() {
            codes::STOP => {
                let mut on_stop = self.on_stop.lock();
                if let Some(sink) = on_stop.as_mut() {
                    sink();
                }
                true
            }
            codes::NEW_DATA => {
                if let Some(data) = tlv.data() {
                    let mut on_new_data = self.on_new_data.lock();
                    if let Some(sink) = on_new_data.as_mut() {
                        sink(data);
                    }
                }
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn conf_ongoing_result_wire_shape() {
        let wire = conf_ongoing_result().unwrap().encode();
        assert_eq!(
            wire.as_ref(),
            &[0xB1, 0x06, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn conf_stop_wait_wire_shape() {
        let wire = conf_stop_wait(1500).unwrap().encode();
        assert_eq!(
            wire.as_ref(),
            &[0xB1, 0x09, 0x00, 0x00, 0x00, 0x03, 0x04, 0x00, 0x00, 0x00, 0xDC, 0x05, 0x00, 0x00]
        );
    }

    #[test]
    fn stop_push_invokes_sink() {
        let command = CommandChannel::new("/nonexistent/endpoint.sock");
        let stops = Arc::new(AtomicUsize::new(0));
        let sink_stops = Arc::clone(&stops);
        command.set_stop_sink(move || {
            sink_stops.fetch_add(1, Ordering::SeqCst);
        });

        let stop = Tlv::new_leaf(codes::STOP, Vec::new()).unwrap();
        assert!(command.state.handle_incoming(stop));
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn new_data_push_invokes_sink_with_payload() {
        let command = CommandChannel::new("/nonexistent/endpoint.sock");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        command.set_new_data_sink(move |data| sink_seen.lock().push(data.to_vec()));

        let push = Tlv::new_leaf(codes::NEW_DATA, b"stdin".to_vec()).unwrap();
        assert!(command.state.handle_incoming(push));
        assert_eq!(seen.lock().as_slice(), &[b"stdin".to_vec()]);
    }

    #[test]
    fn pushes_without_sinks_are_consumed() {
        let command = CommandChannel::new("/nonexistent/endpoint.sock");
        assert!(command
            .state
            .handle_incoming(Tlv::new_leaf(codes::STOP, Vec::new()).unwrap()));
        assert!(command
            .state
            .handle_incoming(Tlv::new_leaf(codes::NEW_DATA, b"x".to_vec()).unwrap()));
    }

    #[test]
    fn unknown_type_is_not_handled() {
        let command = CommandChannel::new("/nonexistent/endpoint.sock");
        let stray = Tlv::new_leaf(codes::CALLBACK, Vec::new()).unwrap();
        assert!(!command.state.handle_incoming(stray));
    }
}
