//! Readiness multiplexer for pvwire connections.
//!
//! One [`Poller`] watches many socket descriptors and dispatches readiness
//! to a [`Listener`] per descriptor. Dispatch happens either on a dedicated
//! loop thread ([`Poller::run`]) or on whichever thread calls
//! [`Poller::poll_once`]; listeners may re-enter `poll_once` to block for
//! more input without deadlocking the loop.
//!
//! Built on `mio`, so registration is edge-triggered. Unix only.

pub mod config;
pub mod error;
pub mod interest;
pub mod poller;

pub use config::PollerConfig;
pub use error::{PollerError, Result};
pub use interest::{Interest, Readiness};
pub use poller::{Listener, Poller, RegistrationHandle};
