use std::collections::HashMap;
use std::io::ErrorKind;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Poll, Registry, Token, Waker};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::config::PollerConfig;
use crate::error::{PollerError, Result};
use crate::interest::{Interest, Readiness};

const WAKER_TOKEN: Token = Token(0);
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Receives readiness for one registered descriptor.
///
/// `on_ready` runs on whichever thread performed the dispatch cycle: the loop
/// thread started by [`Poller::run`], or a thread calling
/// [`poll_once`](Poller::poll_once) itself. It may call `poll_once` again
/// (nested dispatch) and may change its own interest set.
pub trait Listener: Send + Sync {
    /// Called once, before `register` returns, with the outcome.
    fn on_registered(&self, result: std::result::Result<&RegistrationHandle, &PollerError>) {
        let _ = result;
    }

    /// Called when the OS reports readiness matching the interest set.
    fn on_ready(&self, handle: &RegistrationHandle, readiness: Readiness);
}

struct Registration {
    fd: RawFd,
    listener: Arc<dyn Listener>,
    interest: Interest,
    /// Whether the descriptor is currently known to the OS primitive.
    armed: bool,
}

#[derive(Default)]
struct Cycle {
    generation: u64,
    dispatched: usize,
}

struct Shared {
    poll: Mutex<Poll>,
    registry: Registry,
    waker: Waker,
    registrations: Mutex<HashMap<Token, Registration>>,
    next_token: AtomicUsize,
    events_capacity: usize,
    running: AtomicBool,
    stopping: AtomicBool,
    loop_thread: Mutex<Option<ThreadId>>,
    cycle: Mutex<Cycle>,
    cycle_done: Condvar,
}

impl Shared {
    fn new(config: &PollerConfig) -> Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        Ok(Self {
            poll: Mutex::new(poll),
            registry,
            waker,
            registrations: Mutex::new(HashMap::new()),
            next_token: AtomicUsize::new(WAKER_TOKEN.0 + 1),
            events_capacity: config.events_capacity.max(1),
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            loop_thread: Mutex::new(None),
            cycle: Mutex::new(Cycle::default()),
            cycle_done: Condvar::new(),
        })
    }

    fn register(&self, fd: RawFd, listener: Arc<dyn Listener>, interest: Interest) -> Result<Token> {
        let mut registrations = self.registrations.lock();
        if registrations.values().any(|reg| reg.fd == fd) {
            return Err(PollerError::AlreadyRegistered { fd });
        }

        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        let os_interest = interest.to_mio();
        if let Some(os_interest) = os_interest {
            self.registry
                .register(&mut SourceFd(&fd), token, os_interest)?;
        }
        registrations.insert(
            token,
            Registration {
                fd,
                listener,
                interest,
                armed: os_interest.is_some(),
            },
        );
        debug!(fd, token = token.0, ?interest, "registered descriptor");
        Ok(token)
    }

    fn update_interest<F>(&self, token: Token, update: F) -> Result<()>
    where
        F: FnOnce(Interest) -> Interest,
    {
        let mut registrations = self.registrations.lock();
        let reg = registrations
            .get_mut(&token)
            .ok_or(PollerError::NotRegistered { token: token.0 })?;

        let interest = update(reg.interest);
        if interest == reg.interest {
            return Ok(());
        }

        let os_interest = interest.to_mio();
        match (reg.armed, os_interest) {
            (true, Some(os)) => self.registry.reregister(&mut SourceFd(&reg.fd), token, os)?,
            (false, Some(os)) => self.registry.register(&mut SourceFd(&reg.fd), token, os)?,
            (true, None) => self.registry.deregister(&mut SourceFd(&reg.fd))?,
            (false, None) => {}
        }
        reg.armed = os_interest.is_some();
        reg.interest = interest;
        trace!(token = token.0, ?interest, "interest changed");
        Ok(())
    }

    fn interest(&self, token: Token) -> Result<Interest> {
        self.registrations
            .lock()
            .get(&token)
            .map(|reg| reg.interest)
            .ok_or(PollerError::NotRegistered { token: token.0 })
    }

    fn deregister(&self, token: Token) -> Result<()> {
        let reg = self
            .registrations
            .lock()
            .remove(&token)
            .ok_or(PollerError::NotRegistered { token: token.0 })?;
        debug!(fd = reg.fd, token = token.0, "deregistered descriptor");
        if reg.armed {
            self.registry.deregister(&mut SourceFd(&reg.fd))?;
        }
        Ok(())
    }

    fn on_loop_thread(&self) -> bool {
        *self.loop_thread.lock() == Some(thread::current().id())
    }

    fn poll_once(self: &Arc<Self>, timeout: Option<Duration>) -> Result<usize> {
        // Another thread owns the loop: ride along with its next cycle.
        if self.running.load(Ordering::Acquire) && !self.on_loop_thread() {
            return Ok(self.wait_for_cycle(timeout));
        }
        let Some(poll) = self.poll.try_lock() else {
            return Ok(self.wait_for_cycle(timeout));
        };
        let mut events = Events::with_capacity(self.events_capacity);
        self.wait_and_dispatch(poll, &mut events, timeout)
    }

    /// Wait for events, release the OS lock, then dispatch.
    fn wait_and_dispatch(
        self: &Arc<Self>,
        mut poll: MutexGuard<'_, Poll>,
        events: &mut Events,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            match poll.poll(events, remaining) {
                Ok(()) => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        drop(poll);
        Ok(self.dispatch(events))
    }

    fn dispatch(self: &Arc<Self>, events: &Events) -> usize {
        let mut dispatched = 0;
        for event in events.iter() {
            let token = event.token();
            if token == WAKER_TOKEN {
                continue;
            }
            let listener = self
                .registrations
                .lock()
                .get(&token)
                .map(|reg| Arc::clone(&reg.listener));
            let Some(listener) = listener else {
                trace!(token = token.0, "event for removed registration");
                continue;
            };

            let handle = RegistrationHandle {
                shared: Arc::downgrade(self),
                token,
            };
            listener.on_ready(&handle, Readiness::from_event(event));
            dispatched += 1;
        }
        self.finish_cycle(dispatched);
        dispatched
    }

    fn finish_cycle(&self, dispatched: usize) {
        let mut cycle = self.cycle.lock();
        cycle.generation = cycle.generation.wrapping_add(1);
        cycle.dispatched = dispatched;
        drop(cycle);
        self.cycle_done.notify_all();
    }

    fn wait_for_cycle(&self, timeout: Option<Duration>) -> usize {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut cycle = self.cycle.lock();
        let start = cycle.generation;
        while cycle.generation == start {
            match deadline {
                Some(deadline) => {
                    if self.cycle_done.wait_until(&mut cycle, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cycle_done.wait(&mut cycle),
            }
        }
        if cycle.generation == start {
            0
        } else {
            cycle.dispatched
        }
    }

    fn run_loop(self: Arc<Self>) {
        *self.loop_thread.lock() = Some(thread::current().id());
        debug!("poller loop started");

        let mut events = Events::with_capacity(self.events_capacity);
        while !self.stopping.load(Ordering::Acquire) {
            let poll = self.poll.lock();
            if let Err(err) = self.wait_and_dispatch(poll, &mut events, None) {
                warn!(error = %err, "poll failed");
                thread::sleep(ERROR_BACKOFF);
            }
        }

        *self.loop_thread.lock() = None;
        self.running.store(false, Ordering::Release);
        // Wake threads still waiting on a cycle that will never come.
        self.finish_cycle(0);
        debug!("poller loop stopped");
    }
}

/// A readiness multiplexer over raw descriptors.
///
/// Descriptors are registered edge-triggered: a listener must consume
/// everything (read or write until `WouldBlock`) before the next
/// notification is guaranteed.
///
/// The poller can be driven two ways. [`run`](Poller::run) starts a named
/// loop thread that waits and dispatches until [`stop`](Poller::stop). Without
/// a loop thread, callers drive dispatch themselves with
/// [`poll_once`](Poller::poll_once).
pub struct Poller {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    config: PollerConfig,
}

impl Poller {
    /// Create a poller; no thread is started.
    pub fn new(config: PollerConfig) -> Result<Self> {
        let shared = Arc::new(Shared::new(&config)?);
        Ok(Self {
            shared,
            thread: Mutex::new(None),
            config,
        })
    }

    /// Watch `fd` for `interest`.
    ///
    /// The listener's `on_registered` is called with the outcome before this
    /// returns. A descriptor can only have one active registration.
    pub fn register(
        &self,
        fd: RawFd,
        listener: Arc<dyn Listener>,
        interest: Interest,
    ) -> Result<RegistrationHandle> {
        match self.shared.register(fd, Arc::clone(&listener), interest) {
            Ok(token) => {
                let handle = RegistrationHandle {
                    shared: Arc::downgrade(&self.shared),
                    token,
                };
                listener.on_registered(Ok(&handle));
                Ok(handle)
            }
            Err(err) => {
                warn!(fd, error = %err, "registration failed");
                listener.on_registered(Err(&err));
                Err(err)
            }
        }
    }

    /// Start the loop thread.
    pub fn run(&self) -> Result<()> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PollerError::AlreadyRunning);
        }
        self.shared.stopping.store(false, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || shared.run_loop());
        match spawned {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.running.store(false, Ordering::Release);
                Err(err.into())
            }
        }
    }

    /// Stop the loop thread and wait for it to exit.
    ///
    /// Called from a listener on the loop thread itself, the loop exits after
    /// the current cycle instead of being joined.
    pub fn stop(&self) -> Result<()> {
        let Some(handle) = self.thread.lock().take() else {
            return Ok(());
        };
        self.shared.stopping.store(true, Ordering::Release);
        self.shared.waker.wake()?;

        if handle.thread().id() == thread::current().id() {
            return Ok(());
        }
        if handle.join().is_err() {
            warn!("poller loop thread panicked");
            self.shared.running.store(false, Ordering::Release);
        }
        Ok(())
    }

    /// Whether the loop thread is alive.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Perform one wait-and-dispatch cycle.
    ///
    /// Returns the number of registrations dispatched. While the loop thread
    /// runs, calls from other threads wait for the loop's next cycle instead
    /// of polling themselves.
    pub fn poll_once(&self, timeout: Option<Duration>) -> Result<usize> {
        self.shared.poll_once(timeout)
    }

    /// Number of active registrations.
    pub fn registered(&self) -> usize {
        self.shared.registrations.lock().len()
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "failed to stop poller loop");
        }
        self.shared.registrations.lock().clear();
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("running", &self.is_running())
            .field("registered", &self.registered())
            .finish()
    }
}

/// Handle to one registration, handed to listeners and kept by owners.
///
/// The handle does not keep the poller alive; once the poller is dropped
/// every operation fails with [`PollerError::Stopped`].
#[derive(Clone)]
pub struct RegistrationHandle {
    shared: Weak<Shared>,
    token: Token,
}

impl RegistrationHandle {
    fn shared(&self) -> Result<Arc<Shared>> {
        self.shared.upgrade().ok_or(PollerError::Stopped)
    }

    /// Registration token, unique per poller.
    pub fn token(&self) -> usize {
        self.token.0
    }

    /// Replace the interest set.
    pub fn set_interest(&self, interest: Interest) -> Result<()> {
        self.shared()?.update_interest(self.token, |_| interest)
    }

    /// Add kinds to the interest set.
    pub fn add_interest(&self, interest: Interest) -> Result<()> {
        self.shared()?
            .update_interest(self.token, |current| current.add(interest))
    }

    /// Remove kinds from the interest set.
    pub fn remove_interest(&self, interest: Interest) -> Result<()> {
        self.shared()?
            .update_interest(self.token, |current| current.remove(interest))
    }

    /// Current interest set.
    pub fn interest(&self) -> Result<Interest> {
        self.shared()?.interest(self.token)
    }

    /// Remove the registration. The listener receives no further events.
    pub fn deregister(&self) -> Result<()> {
        self.shared()?.deregister(self.token)
    }

    pub fn is_registered(&self) -> bool {
        self.interest().is_ok()
    }

    /// Same as [`Poller::poll_once`].
    pub fn poll_once(&self, timeout: Option<Duration>) -> Result<usize> {
        self.shared()?.poll_once(timeout)
    }
}

impl std::fmt::Debug for RegistrationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationHandle")
            .field("token", &self.token.0)
            .finish()
    }
}
