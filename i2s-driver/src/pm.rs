//! Power-management locks.
//!
//! A running channel must keep its source clock alive: PLL- and XTAL-derived
//! clocks need the APB frequency held at its maximum, the APLL needs light
//! sleep disabled. Each channel holds at most one [`PmLock`] while started;
//! the global counters show how many are outstanding.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::config::ClockSource;

/// What a lock keeps the system from doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PmLockKind {
    /// Keep the APB clock at its maximum frequency.
    ApbFreqMax,
    /// Keep the chip out of light sleep.
    NoLightSleep,
}

impl PmLockKind {
    pub fn for_source(source: ClockSource) -> Self {
        match source {
            ClockSource::Apll => PmLockKind::NoLightSleep,
            _ => PmLockKind::ApbFreqMax,
        }
    }

    fn counter(self) -> &'static AtomicU32 {
        match self {
            PmLockKind::ApbFreqMax => &APB_FREQ_MAX,
            PmLockKind::NoLightSleep => &NO_LIGHT_SLEEP,
        }
    }
}

static APB_FREQ_MAX: AtomicU32 = AtomicU32::new(0);
static NO_LIGHT_SLEEP: AtomicU32 = AtomicU32::new(0);

/// Number of locks of `kind` currently held.
pub fn held(kind: PmLockKind) -> u32 {
    kind.counter().load(Ordering::Acquire)
}

/// A lock of one kind that can be acquired and released repeatedly.
#[derive(Debug)]
pub struct PmLock {
    kind: PmLockKind,
    acquired: bool,
}

impl PmLock {
    pub fn new(kind: PmLockKind) -> Self {
        Self {
            kind,
            acquired: false,
        }
    }

    pub fn kind(&self) -> PmLockKind {
        self.kind
    }

    pub fn acquire(&mut self) {
        if !self.acquired {
            self.kind.counter().fetch_add(1, Ordering::AcqRel);
            self.acquired = true;
        }
    }

    pub fn release(&mut self) {
        if self.acquired {
            self.kind.counter().fetch_sub(1, Ordering::AcqRel);
            self.acquired = false;
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }
}

impl Drop for PmLock {
    fn drop(&mut self) {
        self.release();
    }
}
