use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard, RwLock};
use pvwire_frame::{command_name, Frame, FrameError, FrameReader, FrameWriter, FLAG_SERVER};
use pvwire_poller::{Interest, Listener, Poller, PollerError, Readiness, RegistrationHandle};
use pvwire_transport::{Socket, SocketKind};
use tracing::{debug, trace, warn};

use crate::cache::SerializationCache;
use crate::config::{CodecConfig, DatagramErrorPolicy, DEFAULT_SEND_BUFFER_SIZE, MAX_DATAGRAM_SIZE};
use crate::error::{CodecError, Result};
use crate::handler::{Message, MessageHandler};
use crate::registration::Registration;
use crate::sender::{SendControl, SenderGuard, TransportSender};
use crate::stats::ConnectionStats;

/// How write readiness is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WriteMode {
    /// Write readiness drains the send buffer and queue.
    ProcessSendQueue = 0,
    /// A writer is blocked on a full socket; readiness only wakes it.
    WaitForReadySignal = 1,
}

/// Lifecycle of a connection. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Open,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Everything guarded by the writer lock.
pub(crate) struct WriteState {
    pub(crate) buffer: FrameWriter,
    pub(crate) recipient: Option<SocketAddr>,
}

/// A framed, flow-controlled connection over one socket.
///
/// Inbound bytes are read when the poller reports readiness, split into
/// messages and handed to the [`MessageHandler`]. Outbound messages are
/// produced by [`TransportSender`]s: an idle connection runs the sender on
/// the calling thread; a busy one queues it for whichever thread owns the
/// writer, or for the next write readiness.
pub struct Connection {
    socket: Arc<dyn Socket>,
    handler: Arc<dyn MessageHandler>,
    config: CodecConfig,
    state: AtomicU8,
    write_mode: AtomicU8,
    write_ready: AtomicBool,
    writer: Mutex<WriteState>,
    pending: Mutex<VecDeque<Arc<dyn TransportSender>>>,
    reader: Mutex<FrameReader>,
    registration: RwLock<Option<Arc<dyn Registration>>>,
    last_read_address: Mutex<Option<SocketAddr>>,
    cache: Mutex<SerializationCache>,
    stats: ConnectionStats,
}

impl Connection {
    /// Wrap `socket`. The connection starts open but unregistered.
    pub fn new(
        socket: Arc<dyn Socket>,
        handler: Arc<dyn MessageHandler>,
        config: CodecConfig,
    ) -> Arc<Self> {
        let send_limit = match config.send_buffer_size {
            0 => socket
                .send_buffer_size()
                .unwrap_or(DEFAULT_SEND_BUFFER_SIZE),
            size => size,
        };
        let mut buffer = FrameWriter::new(send_limit, config.frame.max_payload_size);
        if config.server {
            buffer.set_direction_flags(FLAG_SERVER);
        }

        let chunk_size = match socket.kind() {
            SocketKind::Stream => config.receive_buffer_size,
            SocketKind::Datagram => config.receive_buffer_size.max(MAX_DATAGRAM_SIZE),
        };
        let reader = FrameReader::with_config(chunk_size, config.frame.clone());

        Arc::new(Self {
            socket,
            handler,
            state: AtomicU8::new(ConnectionState::Open as u8),
            write_mode: AtomicU8::new(WriteMode::ProcessSendQueue as u8),
            write_ready: AtomicBool::new(false),
            writer: Mutex::new(WriteState {
                buffer,
                recipient: None,
            }),
            pending: Mutex::new(VecDeque::new()),
            reader: Mutex::new(reader),
            registration: RwLock::new(None),
            last_read_address: Mutex::new(None),
            cache: Mutex::new(SerializationCache::new(config.serialization_cache)),
            stats: ConnectionStats::default(),
            config,
        })
    }

    /// Register the socket with `poller` for read readiness.
    pub fn register(self: &Arc<Self>, poller: &Poller) -> Result<()> {
        self.ensure_open()?;
        let fd = self.socket.raw_fd().ok_or(CodecError::Closed)?;
        let listener: Arc<dyn Listener> = Arc::clone(self) as Arc<dyn Listener>;
        poller.register(fd, listener, Interest::READ)?;
        Ok(())
    }

    /// Use `registration` for interest changes and nested polling.
    pub fn attach(&self, registration: Arc<dyn Registration>) {
        if self.is_open() {
            *self.registration.write() = Some(registration);
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registration.read().is_some()
    }

    fn registration(&self) -> Option<Arc<dyn Registration>> {
        self.registration.read().clone()
    }

    // ---- write path ----

    /// Have `sender` write its message.
    ///
    /// Runs the sender right away when the writer is idle and nothing is
    /// queued; otherwise the sender is queued and runs in FIFO order. An
    /// error of a sender that ran on this call is returned.
    pub fn enqueue_send_request(&self, sender: Arc<dyn TransportSender>) -> Result<()> {
        self.ensure_open()?;

        let Some(mut writer) = self.writer.try_lock() else {
            self.pending.lock().push_back(sender);
            trace!("writer busy, sender queued");
            self.schedule_send().map_err(|err| self.fail(err))?;
            return self.recheck_queue();
        };

        let immediate = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                Some(sender)
            } else {
                pending.push_back(sender);
                None
            }
        };

        let mut result = match immediate {
            Some(sender) => self
                .run_sender(&mut writer, sender.as_ref())
                .and_then(|()| self.flush_buffer(&mut writer, true).map(drop)),
            None => Ok(()),
        };
        if !matches!(&result, Err(err) if err.is_fatal()) {
            if let Err(err) = self.drain_queue(&mut writer, true) {
                result = Err(err);
            }
        }
        let completed = self.complete_if_flushed(&writer);
        self.unlock_writer(writer);

        let result = result.map_err(|err| self.fail(err));
        if self.is_open() {
            completed?;
            self.recheck_queue()?;
        }
        result
    }

    /// Handle write readiness.
    pub fn process_write(&self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        if self.write_mode() == WriteMode::WaitForReadySignal {
            self.write_ready.store(true, Ordering::Release);
            return Ok(());
        }
        // A busy writer drains everything itself before it lets go.
        let Some(mut writer) = self.writer.try_lock() else {
            return Ok(());
        };
        let result = self
            .flush_buffer(&mut writer, false)
            .and_then(|flushed| match flushed {
                true => self.drain_queue(&mut writer, false),
                false => Ok(false),
            });
        let completed = match &result {
            Ok(true) => self.complete_if_flushed(&writer),
            _ => Ok(()),
        };
        self.unlock_writer(writer);

        if result.map_err(|err| self.fail(err))? {
            completed?;
            self.recheck_queue()?;
        }
        Ok(())
    }

    /// Ask the poller for write readiness.
    pub fn schedule_send(&self) -> Result<()> {
        if let Some(registration) = self.registration() {
            registration.add_interest(Interest::WRITE)?;
        }
        Ok(())
    }

    /// Stop listening for write readiness.
    pub fn send_completed(&self) -> Result<()> {
        if let Some(registration) = self.registration() {
            match registration.remove_interest(Interest::WRITE) {
                Ok(()) | Err(PollerError::NotRegistered { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Run queued senders until the queue is empty.
    ///
    /// Returns `false` when a non-blocking flush left bytes behind.
    fn drain_queue(&self, state: &mut WriteState, blocking: bool) -> Result<bool> {
        loop {
            let next = self.pending.lock().pop_front();
            let Some(sender) = next else {
                return self.flush_buffer(state, blocking);
            };
            self.ensure_open()?;

            let flushed = match self
                .run_sender(state, sender.as_ref())
                .and_then(|()| self.flush_buffer(state, blocking))
            {
                Ok(flushed) => flushed,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(error = %err, "queued sender failed");
                    true
                }
            };
            if !flushed {
                return Ok(false);
            }
        }
    }

    /// Drain senders queued while the writer was being released.
    ///
    /// Every enqueuer that found the writer busy calls this after pushing,
    /// and every writer calls it after unlocking, so a queued sender always
    /// has a thread that will run it.
    fn recheck_queue(&self) -> Result<()> {
        while self.has_pending() {
            let Some(mut writer) = self.writer.try_lock() else {
                return Ok(());
            };
            let result = self.drain_queue(&mut writer, true);
            let completed = self.complete_if_flushed(&writer);
            self.unlock_writer(writer);
            result.map_err(|err| self.fail(err))?;
            completed?;
        }
        Ok(())
    }

    /// Drop write interest once everything is on the wire.
    ///
    /// Called with the writer held, so no other thread can be waiting in
    /// `send_buffer_full` on the interest being removed.
    fn complete_if_flushed(&self, writer: &MutexGuard<'_, WriteState>) -> Result<()> {
        if self.is_open() && writer.buffer.flushable().is_empty() {
            self.send_completed()
        } else {
            Ok(())
        }
    }

    /// Release the writer, freeing its buffer if the connection closed
    /// while it was held.
    fn unlock_writer(&self, mut writer: MutexGuard<'_, WriteState>) {
        if !self.is_open() {
            writer.buffer.release();
            writer.recipient = None;
        }
    }

    fn unlock_reader(&self, mut reader: MutexGuard<'_, FrameReader>) {
        if !self.is_open() {
            reader.release();
        }
    }

    fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    fn run_sender(&self, state: &mut WriteState, sender: &dyn TransportSender) -> Result<()> {
        // Datagrams left over from a non-blocking drain still belong to the
        // previous recipient and must not be merged with the next message.
        if self.socket.kind() == SocketKind::Datagram && !state.buffer.flushable().is_empty() {
            self.flush_buffer(state, true)?;
        }
        state.recipient = None;
        let result = {
            let _guard = SenderGuard::lock(sender);
            let mut control = SendControl {
                connection: self,
                state: &mut *state,
            };
            sender.send(&mut control)
        };

        let result = match result {
            Ok(()) if state.buffer.is_message_open() => match state.buffer.end_message() {
                Ok(_) => {
                    self.stats.record_message_sent();
                    Ok(())
                }
                Err(err) => Err(err.into()),
            },
            Ok(()) => Ok(()),
            Err(err) => {
                state.buffer.abort_message();
                Err(err)
            }
        };
        result.map_err(reject_malformed)
    }

    /// Write completed messages to the socket.
    ///
    /// Blocking flushes wait out a full socket through `send_buffer_full`;
    /// non-blocking ones schedule write readiness and return `false`.
    pub(crate) fn flush_buffer(&self, state: &mut WriteState, blocking: bool) -> Result<bool> {
        let mut tries = 0u32;
        let mut last_progress = Instant::now();

        while !state.buffer.flushable().is_empty() {
            self.ensure_open()?;
            match self.write_once(state)? {
                Some(written) if written > 0 => {
                    tries = 0;
                    last_progress = Instant::now();
                }
                _ if !blocking => {
                    self.schedule_send()?;
                    return Ok(false);
                }
                _ => {
                    if last_progress.elapsed() >= self.config.send_timeout {
                        warn!(
                            peer = ?self.remote_address(),
                            timeout = ?self.config.send_timeout,
                            "send stalled, giving up"
                        );
                        return Err(CodecError::SendTimeout(self.config.send_timeout));
                    }
                    tries += 1;
                    self.send_buffer_full(tries)?;
                }
            }
        }
        Ok(true)
    }

    /// One write attempt. `None` means the socket would block.
    fn write_once(&self, state: &mut WriteState) -> Result<Option<usize>> {
        let socket = &self.socket;
        let datagram = socket.kind() == SocketKind::Datagram;

        let result = if datagram && !socket.is_connected() {
            let last_read = *self.last_read_address.lock();
            let Some(dest) = state.recipient.or(last_read) else {
                let dropped = state.buffer.flushable().len();
                state.buffer.consume(dropped);
                warn!(dropped, "no recipient for datagram, dropping");
                return Err(CodecError::NoRecipient);
            };
            state.buffer.write_to(|buf| socket.send_to(buf, dest))
        } else {
            state.buffer.write_to(|buf| socket.write(buf))
        };

        match result {
            Ok(written) => {
                self.stats.record_bytes_sent(written);
                trace!(written, "wrote to socket");
                Ok(Some(written))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) if datagram => {
                let dropped = state.buffer.flushable().len();
                state.buffer.consume(dropped);
                warn!(error = %err, dropped, "datagram send failed, dropping");
                Ok(Some(dropped))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Wait for the socket to accept more bytes.
    fn send_buffer_full(&self, tries: u32) -> Result<()> {
        if tries == 1 {
            debug!(peer = ?self.remote_address(), "send buffer full, waiting for write readiness");
        }
        self.write_ready.store(false, Ordering::Release);
        self.set_write_mode(WriteMode::WaitForReadySignal);
        let result = self.schedule_send().and_then(|()| self.write_poll_one());
        self.set_write_mode(WriteMode::ProcessSendQueue);
        result?;
        self.ensure_open()
    }

    fn write_poll_one(&self) -> Result<()> {
        if self.write_ready.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        match self.registration() {
            Some(registration) => {
                registration.poll_once(Some(self.config.send_poll_interval))?;
            }
            None => thread::sleep(self.config.send_poll_interval),
        }
        Ok(())
    }

    pub fn write_mode(&self) -> WriteMode {
        match self.write_mode.load(Ordering::Acquire) {
            0 => WriteMode::ProcessSendQueue,
            _ => WriteMode::WaitForReadySignal,
        }
    }

    fn set_write_mode(&self, mode: WriteMode) {
        self.write_mode.store(mode as u8, Ordering::Release);
    }

    // ---- read path ----

    /// Read everything the socket offers and dispatch complete messages.
    pub fn process_read(&self) -> Result<()> {
        self.ensure_open()?;
        let result = match self.socket.kind() {
            SocketKind::Stream => self.read_stream(),
            SocketKind::Datagram => self.read_datagrams(),
        };
        result.map_err(|err| self.fail(err))
    }

    /// Block up to the poll interval for more input, dispatching whatever
    /// arrives. For handlers that need more bytes before they can continue.
    pub fn read_poll_one(&self) -> Result<usize> {
        self.ensure_open()?;
        let registration = self.registration().ok_or(CodecError::NotRegistered)?;
        Ok(registration.poll_once(Some(self.config.send_poll_interval))?)
    }

    fn read_stream(&self) -> Result<()> {
        let source = self.socket.peer_addr();
        loop {
            if !self.is_open() {
                return Ok(());
            }

            let mut reader = self.reader.lock();
            match reader.next_frame() {
                Ok(Some(frame)) => {
                    self.unlock_reader(reader);
                    self.dispatch(frame, source);
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    self.unlock_reader(reader);
                    return Err(self.invalid_stream(err));
                }
            }

            let filled = reader.fill_from(|buf| self.socket.read(buf));
            self.unlock_reader(reader);
            match filled {
                Ok(0) => {
                    debug!(peer = ?source, "peer closed the stream");
                    self.close()?;
                    return Ok(());
                }
                Ok(read) => self.stats.record_bytes_received(read),
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn read_datagrams(&self) -> Result<()> {
        loop {
            if !self.is_open() {
                return Ok(());
            }

            let mut reader = self.reader.lock();
            reader.clear();
            let mut source = None;
            let received = reader.fill_from(|buf| {
                let (read, from) = self.socket.receive(buf)?;
                source = Some(from);
                Ok(read)
            });
            // Decoded outside the lock so nested reads get a fresh buffer.
            let mut datagram = reader.split();
            self.unlock_reader(reader);

            match received {
                Ok(read) => self.stats.record_bytes_received(read),
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == ErrorKind::ConnectionRefused => {
                    debug!(error = %err, "datagram peer unreachable");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
            if source.is_some() {
                *self.last_read_address.lock() = source;
            }

            loop {
                match datagram.next_frame_exact() {
                    Ok(Some(frame)) => self.dispatch(frame, source),
                    Ok(None) => break,
                    Err(err) => {
                        self.invalid_datagram(err, source)?;
                        break;
                    }
                }
            }
        }
    }

    fn dispatch(&self, frame: Frame, source: Option<SocketAddr>) {
        self.stats.record_message_received();
        let message = Message {
            header: frame.header,
            payload: frame.payload,
            source,
        };
        let control = message.is_control();
        let command = message.command();
        trace!(
            command = command_name(control, command),
            len = message.payload.len(),
            "dispatching message"
        );

        let result = if control {
            self.handler.process_control_message(self, message)
        } else {
            self.handler.process_application_message(self, message)
        };
        if let Err(err) = result {
            warn!(error = %err, command, control, "message handler failed");
        }
    }

    fn invalid_stream(&self, err: FrameError) -> CodecError {
        warn!(peer = ?self.socket.peer_addr(), error = %err, "invalid data on stream, closing");
        self.handler.on_invalid_data(self, &err);
        CodecError::Frame(err)
    }

    fn invalid_datagram(&self, err: FrameError, source: Option<SocketAddr>) -> Result<()> {
        self.handler.on_invalid_data(self, &err);
        match self.config.datagram_error_policy {
            DatagramErrorPolicy::Discard => {
                warn!(?source, error = %err, "discarding invalid datagram");
                Ok(())
            }
            DatagramErrorPolicy::Close => {
                warn!(?source, error = %err, "invalid datagram, closing");
                Err(CodecError::Frame(err))
            }
        }
    }

    // ---- lifecycle ----

    /// Close the connection. Later calls are no-ops.
    ///
    /// Deregisters from the poller, closes the socket, drops queued senders
    /// and releases the buffers. Threads blocked on a full socket fail with
    /// [`CodecError::Closed`].
    pub fn close(&self) -> Result<()> {
        if self
            .state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(());
        }
        debug!(peer = ?self.remote_address(), "closing connection");

        let registration = self.registration.write().take();
        if let Some(registration) = registration {
            if let Err(err) = registration.deregister() {
                debug!(error = %err, "deregistration failed");
            }
        }
        let closed = self.socket.close();

        let dropped = std::mem::take(&mut *self.pending.lock());
        if !dropped.is_empty() {
            debug!(dropped = dropped.len(), "dropping queued senders");
        }
        drop(dropped);
        // Whoever holds a buffer right now fails on its next state check.
        if let Some(mut writer) = self.writer.try_lock() {
            writer.buffer.release();
        }
        if let Some(mut reader) = self.reader.try_lock() {
            reader.release();
        }
        self.cache.lock().clear();

        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
        self.write_ready.store(true, Ordering::Release);
        self.handler.on_closed(self);
        closed.map_err(CodecError::from)
    }

    /// Close on fatal errors, then hand the error back.
    fn fail(&self, err: CodecError) -> CodecError {
        if err.is_fatal() && self.is_open() {
            debug!(error = %err, "fatal connection error");
            if let Err(close_err) = self.close() {
                debug!(error = %close_err, "close after failure");
            }
        }
        err
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CodecError::Closed)
        }
    }

    // ---- accessors ----

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn kind(&self) -> SocketKind {
        self.socket.kind()
    }

    /// The peer of a connected socket, else the last datagram source.
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.socket.peer_addr().or_else(|| self.last_read_address())
    }

    /// Source of the most recent datagram.
    pub fn last_read_address(&self) -> Option<SocketAddr> {
        *self.last_read_address.lock()
    }

    pub fn local_address(&self) -> Option<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Senders waiting for the writer.
    pub fn pending_sends(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn cache(&self) -> &Mutex<SerializationCache> {
        &self.cache
    }

    /// Forget a cached field encoding.
    pub fn invalidate_cached(&self, identity: u64) -> bool {
        self.cache.lock().invalidate(identity)
    }

    pub fn clear_serialization_cache(&self) {
        self.cache.lock().clear();
    }
}

/// Producer mistakes discard one message; they say nothing about the socket.
fn reject_malformed(err: CodecError) -> CodecError {
    match err {
        CodecError::Frame(
            err @ (FrameError::PayloadTooLarge { .. }
            | FrameError::NoOpenMessage
            | FrameError::MessageAlreadyOpen),
        ) => CodecError::Rejected(err),
        other => other,
    }
}

impl Listener for Connection {
    fn on_registered(&self, result: std::result::Result<&RegistrationHandle, &PollerError>) {
        match result {
            Ok(handle) => {
                debug!(token = handle.token(), peer = ?self.remote_address(), "connection registered");
                self.attach(Arc::new(handle.clone()));
            }
            Err(err) => warn!(error = %err, "connection registration failed"),
        }
    }

    fn on_ready(&self, handle: &RegistrationHandle, readiness: Readiness) {
        if !self.is_registered() {
            self.attach(Arc::new(handle.clone()));
        }
        if readiness.readable || readiness.read_closed || readiness.error {
            if let Err(err) = self.process_read() {
                debug!(token = handle.token(), error = %err, "read failed");
            }
        }
        if readiness.writable && self.is_open() {
            if let Err(err) = self.process_write() {
                debug!(token = handle.token(), error = %err, "write failed");
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("kind", &self.kind())
            .field("state", &self.state())
            .field("remote", &self.remote_address())
            .field("write_mode", &self.write_mode())
            .finish()
    }
}
