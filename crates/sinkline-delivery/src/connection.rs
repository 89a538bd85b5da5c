//! Per-worker connection state machine.

use std::fmt;

use tracing::debug;

use crate::{
    error::{DeliveryError, Result},
    transport::Transport,
};

/// Lifecycle state of a worker's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No usable connection; the initial state.
    Disconnected,
    /// Connect in progress.
    Connecting,
    /// Deliveries may be attempted.
    Connected,
    /// Terminal; entered on pool shutdown.
    ShuttingDown,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}

/// Owns a transport and tracks whether it is connected.
///
/// Only the owning worker thread touches a `Connection`; it is never shared.
/// Once [`shutdown`](Connection::shutdown) has run, every further transition
/// is refused or ignored.
#[derive(Debug)]
pub struct Connection<T> {
    transport: T,
    state: ConnectionState,
}

impl<T: Transport> Connection<T> {
    /// Wraps a transport in the `Disconnected` state.
    pub fn new(transport: T) -> Self {
        Self { transport, state: ConnectionState::Disconnected }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether deliveries may be attempted.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Connects the transport unless already connected.
    ///
    /// # Errors
    ///
    /// Returns the transport's connect error, leaving the connection
    /// `Disconnected`, or `ConnectFailed` once shutdown has started.
    pub fn connect(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::ShuttingDown => {
                Err(DeliveryError::connect("connection is shutting down"))
            },
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                self.state = ConnectionState::Connecting;
                match self.transport.connect() {
                    Ok(()) => {
                        self.state = ConnectionState::Connected;
                        Ok(())
                    },
                    Err(error) => {
                        self.state = ConnectionState::Disconnected;
                        Err(error)
                    },
                }
            },
        }
    }

    /// Moves to `Disconnected`, releasing the transport connection if one is
    /// held. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => {
                self.transport.disconnect();
                self.state = ConnectionState::Disconnected;
                debug!("connection closed");
            },
            ConnectionState::Disconnected | ConnectionState::ShuttingDown => {},
        }
    }

    /// Disconnects and enters the terminal `ShuttingDown` state.
    pub fn shutdown(&mut self) {
        if self.state == ConnectionState::ShuttingDown {
            return;
        }
        self.disconnect();
        self.state = ConnectionState::ShuttingDown;
    }

    /// Borrow the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

#[cfg(test)]
mod tests {
    use sinkline_core::{ActionResult, Message};

    use super::*;
    use crate::transport::Outcome;

    #[derive(Default)]
    struct CountingTransport {
        fail_connect: bool,
        connects: u32,
        disconnects: u32,
    }

    impl Transport for CountingTransport {
        fn connect(&mut self) -> Result<()> {
            self.connects += 1;
            if self.fail_connect {
                Err(DeliveryError::connect("refused"))
            } else {
                Ok(())
            }
        }

        fn disconnect(&mut self) {
            self.disconnects += 1;
        }

        fn deliver(&mut self, _message: &Message) -> Outcome {
            Outcome::Action(ActionResult::Success)
        }
    }

    #[test]
    fn starts_disconnected_and_connects() {
        let mut connection = Connection::new(CountingTransport::default());
        assert_eq!(connection.state(), ConnectionState::Disconnected);

        connection.connect().unwrap();
        assert!(connection.is_connected());

        connection.connect().unwrap();
        assert_eq!(connection.transport().connects, 1);
    }

    #[test]
    fn failed_connect_stays_disconnected() {
        let mut connection =
            Connection::new(CountingTransport { fail_connect: true, ..Default::default() });

        assert!(connection.connect().is_err());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut connection = Connection::new(CountingTransport::default());
        connection.connect().unwrap();

        connection.disconnect();
        connection.disconnect();

        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(connection.transport().disconnects, 1);
    }

    #[test]
    fn shutdown_is_terminal() {
        let mut connection = Connection::new(CountingTransport::default());
        connection.connect().unwrap();

        connection.shutdown();
        connection.shutdown();
        connection.disconnect();

        assert_eq!(connection.state(), ConnectionState::ShuttingDown);
        assert_eq!(connection.transport().disconnects, 1);
        assert!(connection.connect().is_err());
        assert_eq!(connection.transport().connects, 1);
    }
}
