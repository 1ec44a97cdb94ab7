//! Event registrations attached to I/O points.

use bitflags::bitflags;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::io::IoValue;

bitflags! {
    /// Edge selection of a registration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Edge: u8 {
        /// false -> true
        const RISING = 0b01;
        /// true -> false
        const FALLING = 0b10;
        /// Either transition.
        const BOTH = Self::RISING.bits() | Self::FALLING.bits();
    }
}

impl Edge {
    /// Edge observed for a transition from `before` to `after`.
    pub fn between(before: bool, after: bool) -> Option<Self> {
        match (before, after) {
            (false, true) => Some(Self::RISING),
            (true, false) => Some(Self::FALLING),
            _ => None,
        }
    }
}

/// Callback invoked with the I/O name and its value at detection time.
pub type EventCallback = Arc<dyn Fn(&str, &IoValue) + Send + Sync>;

/// How a registration fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventOptions {
    /// Transitions of boolean points that trigger the callback.
    pub edge: Edge,
    /// Run the callback on its own thread instead of inline.
    pub as_thread: bool,
    /// Hold the firing for this many milliseconds (rounded up to cycles).
    pub delay_ms: u32,
    /// Re-arm a pending delayed firing on repeated detection, and cancel it
    /// once the value no longer matches the captured one.
    pub overwrite: bool,
}

impl Default for EventOptions {
    fn default() -> Self {
        Self {
            edge: Edge::BOTH,
            as_thread: false,
            delay_ms: 0,
            overwrite: true,
        }
    }
}

impl EventOptions {
    /// Inline firing on `edge` without delay.
    pub fn on(edge: Edge) -> Self {
        Self {
            edge,
            ..Self::default()
        }
    }

    /// Same options with a delay.
    pub fn delayed(self, delay_ms: u32, overwrite: bool) -> Self {
        Self {
            delay_ms,
            overwrite,
            ..self
        }
    }

    /// Same options dispatched on a separate thread.
    pub fn threaded(self) -> Self {
        Self {
            as_thread: true,
            ..self
        }
    }
}

/// Identity of a registration, stable for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(u64);

impl RegistrationId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A callback bound to an I/O point.
pub struct EventRegistration {
    id: RegistrationId,
    callback: EventCallback,
    options: EventOptions,
}

impl EventRegistration {
    /// New registration with a fresh identity.
    pub fn new(callback: EventCallback, options: EventOptions) -> Self {
        Self {
            id: RegistrationId::next(),
            callback,
            options,
        }
    }

    /// Registration identity.
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// Firing options.
    pub fn options(&self) -> &EventOptions {
        &self.options
    }

    /// Does a detected edge (or a whole-value change, `None`) trigger this registration?
    pub fn matches(&self, detected: Option<Edge>) -> bool {
        match detected {
            Some(edge) => self.options.edge.contains(edge),
            None => true,
        }
    }

    pub(crate) fn callback(&self) -> &EventCallback {
        &self.callback
    }
}

impl fmt::Debug for EventRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistration")
            .field("id", &self.id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> EventCallback {
        Arc::new(|_: &str, _: &IoValue| {})
    }

    #[test]
    fn edge_matching() {
        let rising = EventRegistration::new(noop(), EventOptions::on(Edge::RISING));
        let both = EventRegistration::new(noop(), EventOptions::default());

        assert!(rising.matches(Edge::between(false, true)));
        assert!(!rising.matches(Edge::between(true, false)));
        assert!(both.matches(Some(Edge::FALLING)));
        // whole-value points match any edge selection
        assert!(rising.matches(None));
        assert_eq!(Edge::between(true, true), None);
    }

    #[test]
    fn ids_are_unique() {
        let a = EventRegistration::new(noop(), EventOptions::default());
        let b = EventRegistration::new(noop(), EventOptions::default());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn option_builders() {
        let opts = EventOptions::on(Edge::FALLING).delayed(150, false).threaded();
        assert_eq!(opts.edge, Edge::FALLING);
        assert_eq!(opts.delay_ms, 150);
        assert!(!opts.overwrite);
        assert!(opts.as_thread);
    }
}
