#![cfg(unix)]

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pvwire::codec::{Connection, Message, MessageHandler, Result, SendControl};
use pvwire::frame::FLAG_CONTROL;
use pvwire::poller::Poller;
use pvwire::transport::StreamSocket;
use pvwire::Config;

struct Forward(Mutex<mpsc::Sender<(bool, u8)>>);

impl MessageHandler for Forward {
    fn process_control_message(&self, _connection: &Connection, message: Message) -> Result<()> {
        let _ = self.0.lock().send((true, message.command()));
        Ok(())
    }

    fn process_application_message(&self, _connection: &Connection, message: Message) -> Result<()> {
        let _ = self.0.lock().send((false, message.command()));
        Ok(())
    }
}

#[test]
fn configured_stack_delivers_messages() {
    let config = Config::from_json_str(
        r#"{ "poller": { "thread_name": "facade-test" }, "codec": { "send_poll_interval": 5 } }"#,
    )
    .unwrap();
    let poller = Poller::new(config.poller.clone()).unwrap();
    poller.run().unwrap();

    let (a, b) = StreamSocket::pair().unwrap();
    let (tx, rx) = mpsc::channel();
    let quiet = Arc::new(Forward(Mutex::new(mpsc::channel().0)));
    let sender = Connection::new(Arc::new(a), quiet, config.codec.clone());
    let receiver = Connection::new(
        Arc::new(b),
        Arc::new(Forward(Mutex::new(tx))),
        config.codec.clone(),
    );
    sender.register(&poller).unwrap();
    receiver.register(&poller).unwrap();

    sender
        .enqueue_send_request(Arc::new(|control: &mut SendControl<'_>| {
            control.put_message(FLAG_CONTROL, 0x00, &[])?;
            control.put_message(0, 0x01, b"payload")
        }))
        .unwrap();

    let wait = Duration::from_secs(10);
    assert_eq!(rx.recv_timeout(wait).unwrap(), (true, 0x00));
    assert_eq!(rx.recv_timeout(wait).unwrap(), (false, 0x01));

    sender.close().unwrap();
    poller.stop().unwrap();
}
