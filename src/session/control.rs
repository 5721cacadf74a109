use crate::config::Config;
use crate::sync::{Mutex, acquire};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Connection {
    Disconnected,
    /// Waiting for the connect delay, reported only
    Connecting,
    /// Detached for the reconnect delay, then connected again
    Reconnecting,
    Connected,
}

#[derive(Copy, Clone, Debug)]
struct Inner {
    current: Connection,
    next: Connection,
    remaining_ms: u32,
}

impl Inner {
    fn changing(&self) -> bool {
        self.current != self.next
    }
}

/// Connection record shared between the tick context and the USB context
pub struct Control {
    inner: Mutex<Inner>,
    connect_delay_ms: u32,
    disconnect_delay_ms: u32,
    reconnect_delay_ms: u32,
}

impl Control {
    pub fn new(config: &Config) -> Self {
        let inner = Inner { current: Connection::Disconnected, next: Connection::Disconnected, remaining_ms: 0 };
        Self {
            inner: Mutex::new(inner),
            connect_delay_ms: config.connect_delay_ms,
            disconnect_delay_ms: config.disconnect_delay_ms,
            reconnect_delay_ms: config.reconnect_delay_ms(),
        }
    }

    /// Attach after the connect delay, or detach after the disconnect delay
    pub fn enable(&self, enable: bool) {
        let mut inner = acquire!(self.inner);
        match enable {
            true if inner.next == Connection::Disconnected => {
                inner.remaining_ms = self.connect_delay_ms;
                inner.next = Connection::Connected;
            }
            true => (),
            false => {
                inner.remaining_ms = self.disconnect_delay_ms;
                inner.next = Connection::Disconnected;
            }
        }
    }

    /// Detach and attach again, ignored unless connected and settled
    pub fn remount(&self) {
        let mut inner = acquire!(self.inner);
        if !inner.changing() && inner.current == Connection::Connected {
            inner.next = Connection::Reconnecting;
            inner.remaining_ms = self.disconnect_delay_ms;
        }
    }

    pub(crate) fn restart_disconnect_delay(&self) {
        let mut inner = acquire!(self.inner);
        if inner.current == Connection::Connected {
            inner.remaining_ms = self.disconnect_delay_ms;
        }
    }

    pub(crate) fn force(&self, connection: Connection) {
        let mut inner = acquire!(self.inner);
        inner.current = connection;
        inner.next = connection;
        inner.remaining_ms = 0;
    }

    pub fn connection(&self) -> Connection {
        let inner = acquire!(self.inner);
        match (inner.current, inner.next) {
            (Connection::Disconnected, Connection::Connected) => Connection::Connecting,
            (current, _) => current,
        }
    }

    pub fn is_changing(&self) -> bool {
        acquire!(self.inner).changing()
    }

    /// Advance the countdown, returns the transition once the delay has elapsed
    pub(crate) fn tick(&self, elapsed_ms: u32) -> Option<(Connection, Connection)> {
        let mut inner = acquire!(self.inner);
        if !inner.changing() {
            return None;
        }
        if inner.remaining_ms > 0 {
            inner.remaining_ms -= elapsed_ms.min(inner.remaining_ms);
            return None;
        }
        let previous = inner.current;
        inner.current = inner.next;
        if inner.current == Connection::Reconnecting {
            inner.next = Connection::Connected;
            inner.remaining_ms = self.reconnect_delay_ms;
        }
        debug!("Connection {:?} -> {:?}", previous, inner.current);
        Some((previous, inner.current))
    }
}

#[cfg(test)]
mod test {
    use super::{Connection, Control};
    use crate::config::Config;

    fn run(control: &Control, elapsed_ms: u32) -> Option<(Connection, Connection)> {
        let mut transition = None;
        for _ in 0..elapsed_ms / 100 + 1 {
            if let Some(t) = control.tick(100) {
                transition = Some(t);
            }
        }
        transition
    }

    #[test]
    fn test_connect() {
        let control = Control::new(&Config::default());
        assert_eq!(control.tick(100), None);
        control.enable(true);
        assert_eq!(control.connection(), Connection::Connecting);
        assert_eq!(control.tick(0), Some((Connection::Disconnected, Connection::Connected)));
        assert_eq!(control.connection(), Connection::Connected);
        assert!(!control.is_changing());
    }

    #[test]
    fn test_remount() {
        let control = Control::new(&Config::default());
        // Not connected yet
        control.remount();
        assert!(!control.is_changing());

        control.force(Connection::Connected);
        control.remount();
        assert_eq!(control.tick(400), None);
        // Traffic postpones the detach
        control.restart_disconnect_delay();
        assert_eq!(control.tick(400), None);
        assert_eq!(control.tick(100), None);
        assert_eq!(control.tick(100), Some((Connection::Connected, Connection::Reconnecting)));
        assert_eq!(control.connection(), Connection::Reconnecting);
        assert_eq!(run(&control, 1000), None);
        assert_eq!(run(&control, 100), Some((Connection::Reconnecting, Connection::Connected)));
    }

    #[test]
    fn test_disable() {
        let control = Control::new(&Config::default());
        control.force(Connection::Connected);
        control.enable(false);
        // Already transitioning, remount is ignored
        control.remount();
        assert_eq!(run(&control, 500), Some((Connection::Connected, Connection::Disconnected)));
        assert_eq!(control.connection(), Connection::Disconnected);
    }
}
