use std::time::Duration;

use pvwire_poller::{Interest, PollerError, RegistrationHandle};

/// The poller operations a connection needs from its registration.
///
/// Implemented by [`RegistrationHandle`]; connections can also be attached
/// to other implementations, e.g. to drive them without a real poller.
pub trait Registration: Send + Sync {
    fn add_interest(&self, interest: Interest) -> Result<(), PollerError>;

    fn remove_interest(&self, interest: Interest) -> Result<(), PollerError>;

    /// Run (or wait for) one dispatch cycle.
    fn poll_once(&self, timeout: Option<Duration>) -> Result<usize, PollerError>;

    fn deregister(&self) -> Result<(), PollerError>;
}

impl Registration for RegistrationHandle {
    fn add_interest(&self, interest: Interest) -> Result<(), PollerError> {
        RegistrationHandle::add_interest(self, interest)
    }

    fn remove_interest(&self, interest: Interest) -> Result<(), PollerError> {
        RegistrationHandle::remove_interest(self, interest)
    }

    fn poll_once(&self, timeout: Option<Duration>) -> Result<usize, PollerError> {
        RegistrationHandle::poll_once(self, timeout)
    }

    fn deregister(&self) -> Result<(), PollerError> {
        RegistrationHandle::deregister(self)
    }
}
