//! End-to-end tests: real sockets driven by a real poller.

#![cfg(unix)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pvwire_codec::{
    answer_echo, CodecConfig, Connection, ControlMessage, Message, MessageHandler, Result,
    SendControl, TransportSender,
};
use pvwire_frame::command::ECHO_RESPONSE;
use pvwire_poller::{Poller, PollerConfig};
use pvwire_transport::{DatagramSocket, Socket, StreamSocket};

const WAIT: Duration = Duration::from_secs(10);

struct Peer {
    events: Mutex<Sender<(bool, u8, Vec<u8>)>>,
    application_bytes: AtomicU64,
    closed: AtomicUsize,
}

impl Peer {
    fn new() -> (Arc<Self>, Receiver<(bool, u8, Vec<u8>)>) {
        let (tx, rx) = mpsc::channel();
        let peer = Arc::new(Self {
            events: Mutex::new(tx),
            application_bytes: AtomicU64::new(0),
            closed: AtomicUsize::new(0),
        });
        (peer, rx)
    }

    fn record(&self, message: &Message) {
        let _ = self.events.lock().send((
            message.is_control(),
            message.command(),
            message.payload.to_vec(),
        ));
    }
}

impl MessageHandler for Peer {
    fn process_control_message(&self, connection: &Connection, message: Message) -> Result<()> {
        if !answer_echo(connection, &message)? {
            self.record(&message);
        }
        Ok(())
    }

    fn process_application_message(&self, connection: &Connection, message: Message) -> Result<()> {
        self.application_bytes
            .fetch_add(message.payload.len() as u64, Ordering::SeqCst);
        if message.command() == 0x7F {
            // Reply straight from the dispatching thread.
            let reply = message.payload.clone();
            connection.enqueue_send_request(Arc::new(move |control: &mut SendControl<'_>| {
                control.put_message(0, 0x7E, &reply)
            }))?;
        }
        self.record(&message);
        Ok(())
    }

    fn on_closed(&self, _connection: &Connection) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn running_poller() -> Poller {
    let poller = Poller::new(PollerConfig::default()).unwrap();
    poller.run().unwrap();
    poller
}

fn config(server: bool) -> CodecConfig {
    CodecConfig {
        send_poll_interval: Duration::from_millis(5),
        server,
        ..CodecConfig::default()
    }
}

fn stream_pair(
    poller: &Poller,
) -> (
    (Arc<Connection>, Arc<Peer>, Receiver<(bool, u8, Vec<u8>)>),
    (Arc<Connection>, Arc<Peer>, Receiver<(bool, u8, Vec<u8>)>),
) {
    let (a, b) = StreamSocket::pair().unwrap();
    let (client_peer, client_rx) = Peer::new();
    let (server_peer, server_rx) = Peer::new();
    let client = Connection::new(Arc::new(a), client_peer.clone(), config(false));
    let server = Connection::new(Arc::new(b), server_peer.clone(), config(true));
    client.register(poller).unwrap();
    server.register(poller).unwrap();
    ((client, client_peer, client_rx), (server, server_peer, server_rx))
}

#[test]
fn echo_round_trip_over_stream_pair() {
    let poller = running_poller();
    let ((client, _, client_rx), (server, _, _)) = stream_pair(&poller);
    assert!(client.is_registered());
    assert!(server.is_registered());

    client
        .enqueue_send_request(Arc::new(ControlMessage::echo_request(&b"ping"[..])))
        .unwrap();

    let (control, command, payload) = client_rx.recv_timeout(WAIT).unwrap();
    assert!(control);
    assert_eq!(command, ECHO_RESPONSE);
    assert_eq!(payload, b"ping");

    client.close().unwrap();
    server.close().unwrap();
    poller.stop().unwrap();
}

#[test]
fn handler_reply_from_loop_thread() {
    let poller = running_poller();
    let ((client, _, client_rx), (_server, _, server_rx)) = stream_pair(&poller);

    client
        .enqueue_send_request(Arc::new(|control: &mut SendControl<'_>| {
            control.put_message(0, 0x7F, b"request")
        }))
        .unwrap();

    assert_eq!(server_rx.recv_timeout(WAIT).unwrap().1, 0x7F);
    let (control, command, payload) = client_rx.recv_timeout(WAIT).unwrap();
    assert!(!control);
    assert_eq!(command, 0x7E);
    assert_eq!(payload, b"request");
}

struct Bulk {
    index: u8,
    size: usize,
}

impl TransportSender for Bulk {
    fn send(&self, control: &mut SendControl<'_>) -> Result<()> {
        control.start_message(0, self.index)?;
        let chunk = [self.index; 4096];
        let mut left = self.size;
        while left > 0 {
            let n = left.min(chunk.len());
            control.put_slice(&chunk[..n])?;
            left -= n;
        }
        control.end_message()?;
        Ok(())
    }
}

#[test]
fn bulk_transfer_survives_backpressure() {
    const MESSAGES: u8 = 64;
    const SIZE: usize = 256 * 1024;

    let poller = running_poller();
    let ((client, _, _), (_server, server_peer, server_rx)) = stream_pair(&poller);

    let producers: Vec<_> = (0..4u8)
        .map(|lane| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                for index in (lane..MESSAGES).step_by(4) {
                    client
                        .enqueue_send_request(Arc::new(Bulk { index, size: SIZE }))
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let mut seen = Vec::new();
    while seen.len() < MESSAGES as usize {
        let (_, command, payload) = server_rx.recv_timeout(WAIT).unwrap();
        assert_eq!(payload.len(), SIZE);
        assert!(payload.iter().all(|b| *b == command));
        seen.push(command);
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..MESSAGES).collect::<Vec<_>>());
    assert_eq!(
        server_peer.application_bytes.load(Ordering::SeqCst),
        MESSAGES as u64 * SIZE as u64
    );
    assert_eq!(client.pending_sends(), 0);
}

#[test]
fn peer_close_is_observed() {
    let poller = running_poller();
    let ((client, _, _), (server, server_peer, _)) = stream_pair(&poller);

    client.close().unwrap();

    let deadline = Instant::now() + WAIT;
    while (server_peer.closed.load(Ordering::SeqCst) == 0 || poller.registered() > 0)
        && Instant::now() < deadline
    {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(!server.is_open());
    assert_eq!(server_peer.closed.load(Ordering::SeqCst), 1);
    assert_eq!(poller.registered(), 0);
}

#[test]
fn datagram_reply_returns_to_sender() {
    let poller = running_poller();
    let server_socket = DatagramSocket::bind("127.0.0.1:0").unwrap();
    let client_socket = DatagramSocket::bind("127.0.0.1:0").unwrap();
    let server_addr = server_socket.local_addr().unwrap();
    let client_addr = client_socket.local_addr().unwrap();

    let (server_peer, _) = Peer::new();
    let (client_peer, client_rx) = Peer::new();
    let server = Connection::new(Arc::new(server_socket), server_peer, config(true));
    let client = Connection::new(Arc::new(client_socket), client_peer, config(false));
    server.register(&poller).unwrap();
    client.register(&poller).unwrap();

    client
        .enqueue_send_request(Arc::new(move |control: &mut SendControl<'_>| {
            control.set_recipient(server_addr);
            control.put_message(0, 0x7F, b"search")
        }))
        .unwrap();

    let (_, command, payload) = client_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(command, 0x7E);
    assert_eq!(payload, b"search");
    assert_eq!(server.last_read_address(), Some(client_addr));
    assert_eq!(client.last_read_address(), Some(server_addr));
}

#[test]
fn caller_driven_polling_without_loop_thread() {
    let poller = Poller::new(PollerConfig::default()).unwrap();
    let ((client, _, client_rx), (_server, _, _)) = stream_pair(&poller);

    client
        .enqueue_send_request(Arc::new(ControlMessage::echo_request(&b"manual"[..])))
        .unwrap();

    let deadline = Instant::now() + WAIT;
    let reply = loop {
        poller.poll_once(Some(Duration::from_millis(20))).unwrap();
        if let Ok(reply) = client_rx.try_recv() {
            break reply;
        }
        assert!(Instant::now() < deadline, "no echo response");
    };
    assert_eq!(reply.1, ECHO_RESPONSE);
    assert_eq!(reply.2, b"manual");
}
