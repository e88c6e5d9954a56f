//! Minimal echo server: accepts TCP clients and sends every message back.
//!
//! Run with:
//!   cargo run --example echo-server -- 127.0.0.1:5075
//!
//! Control `ECHO_REQUEST`s are answered with `ECHO_RESPONSE`; application
//! messages are returned with the same command and payload.

use std::net::TcpListener;
use std::sync::Arc;

use pvwire::codec::{
    answer_echo, Connection, Message, MessageHandler, Result as CodecResult, SendControl,
};
use pvwire::poller::Poller;
use pvwire::transport::StreamSocket;
use pvwire::Config;
use tracing::info;

struct Echo;

impl MessageHandler for Echo {
    fn process_control_message(&self, connection: &Connection, message: Message) -> CodecResult<()> {
        answer_echo(connection, &message)?;
        Ok(())
    }

    fn process_application_message(
        &self,
        connection: &Connection,
        message: Message,
    ) -> CodecResult<()> {
        let command = message.command();
        let payload = message.payload;
        connection.enqueue_send_request(Arc::new(move |control: &mut SendControl<'_>| {
            control.put_message(0, command, &payload)
        }))
    }

    fn on_closed(&self, connection: &Connection) {
        info!(peer = ?connection.remote_address(), "client disconnected");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:5075".to_string());
    let mut config = match std::env::var("PVWIRE_CONFIG") {
        Ok(path) => Config::from_path(path)?,
        Err(_) => Config::default(),
    };
    config.codec.server = true;
    config.init_logging();

    let poller = Poller::new(config.poller.clone())?;
    poller.run()?;

    let listener = TcpListener::bind(&addr)?;
    info!(%addr, "listening");

    for stream in listener.incoming() {
        let socket = StreamSocket::from_tcp(stream?)?;
        let connection = Connection::new(Arc::new(socket), Arc::new(Echo), config.codec.clone());
        connection.register(&poller)?;
        info!(peer = ?connection.remote_address(), "client connected");
    }
    Ok(())
}
