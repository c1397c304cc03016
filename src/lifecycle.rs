//! The four-stage readiness gate shared by [`UdpClient`](crate::UdpClient)
//! and [`UdpServer`](crate::UdpServer).
//!
//! States only ever advance: `Initialized → Ready → Started → Dead`.
//! Every comparison uses the ordinal level, never identity, so "mature
//! enough" means `current >= required` and "not too mature" means
//! `current <= required`. Pausing and resuming listeners does not touch
//! this coarse state.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::types::CourierError;

/// Where a client or server currently is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LifecycleState {
    /// Constructed, no handlers assigned yet.
    Initialized = 0,
    /// Handlers assigned, not yet started.
    Ready = 1,
    /// Listeners running; the instance can send and receive.
    Started = 2,
    /// Terminated. Terminal and non-reversible.
    Dead = 3,
}

impl LifecycleState {
    fn from_level(level: u8) -> Self {
        match level {
            0 => LifecycleState::Initialized,
            1 => LifecycleState::Ready,
            2 => LifecycleState::Started,
            _ => LifecycleState::Dead,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Initialized => "initialized",
            LifecycleState::Ready => "ready",
            LifecycleState::Started => "started",
            LifecycleState::Dead => "dead",
        };
        f.write_str(name)
    }
}

/// Atomic holder for a [`LifecycleState`], with the two bound checks every
/// public mutating operation brackets itself with.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    level: AtomicU8,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            level: AtomicU8::new(LifecycleState::Initialized as u8),
        }
    }

    pub(crate) fn current(&self) -> LifecycleState {
        LifecycleState::from_level(self.level.load(Ordering::Acquire))
    }

    /// Move to a later state. Callers gate with the checks below first,
    /// so a backwards move is unreachable.
    pub(crate) fn advance(&self, to: LifecycleState) {
        self.level.store(to as u8, Ordering::Release);
    }

    /// Fail unless the current state has reached `required`.
    pub(crate) fn require_at_least(&self, required: LifecycleState) -> Result<(), CourierError> {
        let actual = self.current();
        if actual < required {
            return Err(CourierError::IllegalLifecycle { required, actual });
        }
        Ok(())
    }

    /// Fail if the current state has progressed past `required`.
    pub(crate) fn require_at_most(&self, required: LifecycleState) -> Result<(), CourierError> {
        let actual = self.current();
        if actual > required {
            return Err(CourierError::IllegalLifecycle { required, actual });
        }
        Ok(())
    }

    /// Both bounds at once: the single-state window most operations use.
    pub(crate) fn require_exactly(&self, required: LifecycleState) -> Result<(), CourierError> {
        self.require_at_least(required)?;
        self.require_at_most(required)
    }
}
