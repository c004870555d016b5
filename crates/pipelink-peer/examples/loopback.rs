//! Loopback demo — an in-process host serving one listener channel.
//!
//! Run with:
//!   cargo run --example loopback
//!
//! The host thread binds the endpoint, answers the two request kinds, and
//! pushes one callback; the main thread drives a `ListenerChannel` against
//! it.

use std::fs;
use std::thread;
use std::time::Duration;

use pipelink_frame::{FrameReader, FrameWriter};
use pipelink_peer::{codes, ListenerChannel};
use pipelink_tlv::Tlv;
use pipelink_transport::UnixDomainSocket;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let sock_dir = std::env::temp_dir().join(format!("pipelink-loopback-{}", std::process::id()));
    fs::create_dir_all(&sock_dir)?;
    let sock_path = sock_dir.join("host.sock");

    let socket = UnixDomainSocket::bind(&sock_path)?;
    eprintln!("Host listening on {}", sock_path.display());

    let host = thread::spawn(move || -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let stream = socket.accept()?;
        let reader_stream = stream.try_clone()?;
        let mut writer = FrameWriter::new(stream);
        let mut reader = FrameReader::new(reader_stream);

        // Handshake: one leaf TLV whose payload names this host.
        let hello = Tlv::new_leaf(0x01, b"loopback-host".to_vec())?;
        writer.send(&hello.encode())?;

        // One unsolicited callback before any request arrives.
        let mut callback = Tlv::new_parent(codes::CALLBACK)?;
        callback.add_child(Tlv::new_leaf(codes::CHILD_DATA, b"welcome".to_vec())?)?;
        writer.send(&callback.encode())?;

        // Answer requests until the peer hangs up.
        loop {
            let frame = match reader.read_frame() {
                Ok(frame) => frame,
                Err(_) => break,
            };
            let request = match Tlv::decode(&frame) {
                Ok(tlv) => tlv,
                Err(_) => continue,
            };

            match request.type_code() {
                codes::METADATA_REQUEST | codes::OUTBOUND_REQUEST => {
                    let Some(seq) = request
                        .get_child(codes::CHILD_SEQUENCE, 0)
                        .and_then(|child| child.as_i32().ok())
                    else {
                        continue;
                    };
                    let payload: &[u8] = if request.type_code() == codes::METADATA_REQUEST {
                        b"metadata-v1"
                    } else {
                        b"queued-bytes"
                    };

                    let mut response = Tlv::new_parent(request.type_code())?;
                    response.add_child(Tlv::new_leaf(
                        codes::CHILD_SEQUENCE,
                        seq.to_le_bytes().to_vec(),
                    )?)?;
                    response.add_child(Tlv::new_leaf(codes::CHILD_DATA, payload.to_vec())?)?;
                    writer.send(&response.encode())?;
                }
                codes::NEW_DATA_PUSH => {
                    eprintln!(
                        "Host received {} pushed bytes",
                        request.data().map_or(0, <[u8]>::len)
                    );
                }
                other => {
                    eprintln!("Host ignoring {}", codes::message_name(other));
                }
            }
        }
        Ok(())
    });

    let listener = ListenerChannel::new(&sock_path);
    listener.set_callback(|data| {
        eprintln!("Callback payload: {}", String::from_utf8_lossy(data));
    });

    let handshake = listener.connect()?;
    eprintln!("Connected to {}", String::from_utf8_lossy(&handshake));

    if let Some(metadata) = listener.get_metadata()? {
        eprintln!("Metadata: {}", String::from_utf8_lossy(&metadata));
    }
    if let Some(outbound) = listener.get_data_to_send()? {
        eprintln!("Outbound: {}", String::from_utf8_lossy(&outbound));
    }
    listener.push_new_data(b"upstream-traffic")?;

    // Give the host a moment to log the push before tearing down.
    thread::sleep(Duration::from_millis(100));
    listener.close();

    host.join().expect("host thread panicked").ok();
    let _ = fs::remove_dir_all(&sock_dir);
    Ok(())
}
