//! End-to-end role scenarios over a real socket, with a scripted host on
//! the other side.

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pipelink_frame::{FrameReader, FrameWriter};
use pipelink_peer::codes;
use pipelink_peer::{ChannelConfig, CommandChannel, ListenerChannel};
use pipelink_tlv::Tlv;
use pipelink_transport::{IpcStream, UnixDomainSocket};

fn temp_endpoint(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "pipelink-e2e-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir.join("host.sock")
}

fn cleanup(endpoint: &PathBuf) {
    if let Some(parent) = endpoint.parent() {
        let _ = std::fs::remove_dir_all(parent);
    }
}

/// Scripted host side: accepts one connection, sends the handshake, then
/// reads and writes raw TLV frames as each test directs.
struct Host {
    reader: FrameReader<IpcStream>,
    writer: FrameWriter<IpcStream>,
}

impl Host {
    fn accept(socket: &UnixDomainSocket, handshake: &[u8]) -> Self {
        let stream = socket.accept().expect("host should accept");
        let reader_stream = stream.try_clone().expect("host stream should clone");
        let mut writer = FrameWriter::new(stream);
        let reader = FrameReader::new(reader_stream);

        let hello = Tlv::new_leaf(0x01, handshake.to_vec()).expect("handshake leaf");
        writer.send(&hello.encode()).expect("handshake send");

        Self { reader, writer }
    }

    fn read_tlv(&mut self) -> Tlv {
        let frame = self.reader.read_frame().expect("host read");
        Tlv::decode(&frame).expect("host decode")
    }

    fn send_tlv(&mut self, tlv: &Tlv) {
        self.writer.send(&tlv.encode()).expect("host send");
    }

    fn respond(&mut self, request: &Tlv, payload: Option<&[u8]>) {
        let seq = request
            .get_child(codes::CHILD_SEQUENCE, 0)
            .expect("request carries a sequence child")
            .as_i32()
            .expect("sequence child is a 4-byte integer");
        self.send_tlv(&response(request.type_code(), seq, payload));
    }
}

fn response(type_code: u8, seq: i32, payload: Option<&[u8]>) -> Tlv {
    let mut tlv = Tlv::new_parent(type_code).expect("response parent");
    tlv.add_child(
        Tlv::new_leaf(codes::CHILD_SEQUENCE, seq.to_le_bytes().to_vec()).expect("sequence leaf"),
    )
    .expect("add sequence");
    if let Some(payload) = payload {
        tlv.add_child(Tlv::new_leaf(codes::CHILD_DATA, payload.to_vec()).expect("data leaf"))
            .expect("add data");
    }
    tlv
}

#[test]
fn listener_requests_correlate_with_responses() {
    let endpoint = temp_endpoint("correlate");
    let socket = UnixDomainSocket::bind(&endpoint).unwrap();

    let host = thread::spawn(move || {
        let mut host = Host::accept(&socket, b"unit-42");

        let first = host.read_tlv();
        assert_eq!(first.type_code(), codes::METADATA_REQUEST);
        assert_eq!(
            first
                .get_child(codes::CHILD_SELECTOR, 0)
                .unwrap()
                .as_u8()
                .unwrap(),
            codes::SELECTOR_FETCH
        );
        assert_eq!(
            first
                .get_child(codes::CHILD_SEQUENCE, 0)
                .unwrap()
                .as_i32()
                .unwrap(),
            1,
            "first request carries sequence 1"
        );
        host.respond(&first, Some(b"M"));

        let second = host.read_tlv();
        assert_eq!(second.type_code(), codes::OUTBOUND_REQUEST);
        assert_eq!(
            second
                .get_child(codes::CHILD_SEQUENCE, 0)
                .unwrap()
                .as_i32()
                .unwrap(),
            2,
            "sequence numbers are monotone on the wire"
        );
        host.respond(&second, Some(b"outbound-bytes"));

        host
    });

    let listener = ListenerChannel::new(&endpoint);
    let handshake = listener.connect().unwrap();
    assert_eq!(handshake, b"unit-42");

    assert_eq!(listener.get_metadata().unwrap().as_deref(), Some(b"M".as_ref()));
    assert_eq!(
        listener.get_data_to_send().unwrap().as_deref(),
        Some(b"outbound-bytes".as_ref())
    );

    let _host = host.join().unwrap();
    listener.close();
    cleanup(&endpoint);
}

#[test]
fn early_response_is_delivered_on_next_wait() {
    let endpoint = temp_endpoint("early");
    let socket = UnixDomainSocket::bind(&endpoint).unwrap();

    let host = thread::spawn(move || {
        let mut host = Host::accept(&socket, b"");
        // Response for a sequence number nobody is waiting on yet.
        host.send_tlv(&response(codes::METADATA_REQUEST, 5, Some(b"parked")));
        host
    });

    let listener = ListenerChannel::new(&endpoint);
    listener.connect().unwrap();
    let _host = host.join().unwrap();

    // Let the pump park the response first.
    thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    let payload = listener.wait_for_response(5, Some(Duration::from_secs(5)));
    assert_eq!(payload.as_deref(), Some(b"parked".as_ref()));
    assert!(
        start.elapsed() < Duration::from_millis(100),
        "a parked response must not block"
    );

    listener.close();
    cleanup(&endpoint);
}

#[test]
fn wait_times_out_when_host_stays_silent() {
    let endpoint = temp_endpoint("timeout");
    let socket = UnixDomainSocket::bind(&endpoint).unwrap();

    let (done_tx, done_rx) = mpsc::channel::<()>();
    let host = thread::spawn(move || {
        let host = Host::accept(&socket, b"");
        // Stay connected but never respond.
        let _ = done_rx.recv();
        host
    });

    let listener = ListenerChannel::new(&endpoint);
    listener.connect().unwrap();

    let start = Instant::now();
    let payload = listener.wait_for_response(42, Some(Duration::from_millis(50)));
    assert!(payload.is_none());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_secs(2));

    done_tx.send(()).unwrap();
    let _host = host.join().unwrap();
    listener.close();
    cleanup(&endpoint);
}

#[test]
fn callbacks_reach_the_user_sink() {
    let endpoint = temp_endpoint("callback");
    let socket = UnixDomainSocket::bind(&endpoint).unwrap();

    let host = thread::spawn(move || {
        let mut host = Host::accept(&socket, b"");

        let mut callback = Tlv::new_parent(codes::CALLBACK).unwrap();
        callback
            .add_child(Tlv::new_leaf(codes::CHILD_DATA, b"unsolicited".to_vec()).unwrap())
            .unwrap();
        host.send_tlv(&callback);
        host
    });

    let listener = ListenerChannel::new(&endpoint);
    let (sink_tx, sink_rx) = mpsc::channel();
    listener.set_callback(move |data| {
        let _ = sink_tx.send(data.to_vec());
    });
    listener.connect().unwrap();

    let delivered = sink_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(delivered, b"unsolicited");

    let _host = host.join().unwrap();
    listener.close();
    cleanup(&endpoint);
}

#[test]
fn unknown_top_level_type_does_not_sever_the_channel() {
    let endpoint = temp_endpoint("unknown");
    let socket = UnixDomainSocket::bind(&endpoint).unwrap();

    let host = thread::spawn(move || {
        let mut host = Host::accept(&socket, b"");

        host.send_tlv(&Tlv::new_leaf(0x5A, b"stray".to_vec()).unwrap());

        let request = host.read_tlv();
        assert_eq!(request.type_code(), codes::METADATA_REQUEST);
        host.respond(&request, Some(b"still-alive"));
        host
    });

    let listener = ListenerChannel::new(&endpoint);
    listener.connect().unwrap();

    assert_eq!(
        listener.get_metadata().unwrap().as_deref(),
        Some(b"still-alive".as_ref())
    );

    let _host = host.join().unwrap();
    listener.close();
    cleanup(&endpoint);
}

#[test]
fn command_role_sends_and_dispatches() {
    let endpoint = temp_endpoint("command");
    let socket = UnixDomainSocket::bind(&endpoint).unwrap();

    let host = thread::spawn(move || {
        let mut host = Host::accept(&socket, b"exec");

        let result = host.read_tlv();
        assert_eq!(result.type_code(), codes::RESULT);
        assert_eq!(result.data(), Some(b"output".as_ref()));

        let config = host.read_tlv();
        assert_eq!(config.type_code(), codes::CONFIG);
        assert_eq!(
            config
                .get_child(codes::CHILD_STOP_WAIT, 0)
                .unwrap()
                .as_i32()
                .unwrap(),
            250
        );

        let status = host.read_tlv();
        assert_eq!(status.type_code(), codes::RETURN_SUCCESS);
        assert_eq!(status.data(), Some(&[][..]));

        host.send_tlv(&Tlv::new_leaf(codes::NEW_DATA, b"more-input".to_vec()).unwrap());
        host.send_tlv(&Tlv::new_leaf(codes::STOP, Vec::new()).unwrap());
        host
    });

    let command = CommandChannel::new(&endpoint);
    let (data_tx, data_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel();
    command.set_new_data_sink(move |data| {
        let _ = data_tx.send(data.to_vec());
    });
    command.set_stop_sink(move || {
        let _ = stop_tx.send(());
    });

    let handshake = command.connect().unwrap();
    assert_eq!(handshake, b"exec");

    command.send_result(b"output").unwrap();
    command.send_conf_stop_wait(250).unwrap();
    command.send_return_success().unwrap();

    assert_eq!(
        data_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        b"more-input"
    );
    stop_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("stop sink should fire");

    let _host = host.join().unwrap();
    command.close();
    cleanup(&endpoint);
}

#[test]
fn command_role_failure_helpers_hit_the_wire() {
    let endpoint = temp_endpoint("cmd-failure");
    let socket = UnixDomainSocket::bind(&endpoint).unwrap();

    let host = thread::spawn(move || {
        let mut host = Host::accept(&socket, b"");

        let error = host.read_tlv();
        assert_eq!(error.type_code(), codes::ERROR_REPORT);
        assert_eq!(error.data(), Some(b"missing input".as_ref()));

        let config = host.read_tlv();
        assert_eq!(config.type_code(), codes::CONFIG);
        assert!(config.is_parent());
        let ongoing = config.get_child(codes::CHILD_ONGOING, 0).unwrap();
        assert!(ongoing.as_bool().unwrap());
        assert_eq!(config.get_child_count(codes::CHILD_STOP_WAIT), 0);

        let status = host.read_tlv();
        assert_eq!(status.type_code(), codes::RETURN_FAILED);
        assert_eq!(status.data(), Some(&[][..]));
        host
    });

    let command = CommandChannel::new(&endpoint);
    command.connect().unwrap();

    command.send_error(b"missing input").unwrap();
    command.send_conf_ongoing_result().unwrap();
    command.send_return_failed().unwrap();

    let _host = host.join().unwrap();
    command.close();
    cleanup(&endpoint);
}

#[test]
fn concurrent_sends_arrive_whole_and_totally_ordered() {
    let endpoint = temp_endpoint("concurrent");
    let socket = UnixDomainSocket::bind(&endpoint).unwrap();

    const SENDERS: usize = 4;
    const PER_SENDER: usize = 25;

    let host = thread::spawn(move || {
        let mut host = Host::accept(&socket, b"");
        let mut seen = Vec::new();
        for _ in 0..SENDERS * PER_SENDER {
            let tlv = host.read_tlv();
            assert_eq!(tlv.type_code(), codes::NEW_DATA_PUSH);
            seen.push(tlv.data().unwrap().to_vec());
        }
        seen
    });

    let listener = Arc::new(ListenerChannel::new(&endpoint));
    listener.connect().unwrap();

    let mut handles = Vec::new();
    for sender in 0..SENDERS {
        let listener = Arc::clone(&listener);
        handles.push(thread::spawn(move || {
            for i in 0..PER_SENDER {
                let payload = format!("{sender}:{i}");
                listener.push_new_data(payload.as_bytes()).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let seen = host.join().unwrap();
    assert_eq!(seen.len(), SENDERS * PER_SENDER);

    // Every frame arrived intact, and each sender's frames kept their
    // relative order.
    for sender in 0..SENDERS {
        let from_sender: Vec<_> = seen
            .iter()
            .filter_map(|payload| {
                let text = String::from_utf8(payload.clone()).unwrap();
                let (who, idx) = text.split_once(':').unwrap();
                (who == sender.to_string()).then(|| idx.parse::<usize>().unwrap())
            })
            .collect();
        let expected: Vec<_> = (0..PER_SENDER).collect();
        assert_eq!(from_sender, expected);
    }

    listener.close();
    cleanup(&endpoint);
}

#[test]
fn dispose_is_idempotent_across_threads() {
    let endpoint = temp_endpoint("dispose");
    let socket = UnixDomainSocket::bind(&endpoint).unwrap();

    let host = thread::spawn(move || Host::accept(&socket, b""));

    let listener = Arc::new(ListenerChannel::new(&endpoint));
    listener.connect().unwrap();
    let _host = host.join().unwrap();

    let closers: Vec<_> = (0..3)
        .map(|_| {
            let listener = Arc::clone(&listener);
            thread::spawn(move || listener.close())
        })
        .collect();
    for closer in closers {
        closer.join().unwrap();
    }

    listener.close();
    assert!(!listener.is_active());
    assert!(listener
        .wait_for_response(1, Some(Duration::from_millis(10)))
        .is_none());

    cleanup(&endpoint);
}

#[test]
fn connect_honors_short_deadline() {
    let endpoint = temp_endpoint("deadline");

    let config = ChannelConfig {
        connect_timeout: Duration::from_millis(60),
        ..ChannelConfig::default()
    };
    let listener = ListenerChannel::with_config(&endpoint, config);

    let start = Instant::now();
    assert!(listener.connect().is_err());
    assert!(start.elapsed() >= Duration::from_millis(60));

    cleanup(&endpoint);
}
