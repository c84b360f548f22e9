//! Edge-triggered, delay-then-verify confirmation of noisy digital inputs.
//!
//! ## Protocol
//!
//! ```text
//!            edge + settle          verify delay, live == expected
//!  Idle ─────────────────► PendingVerify ───────────────────────────► Confirmed ──► Idle
//!                               │
//!                               │ verify delay, live != expected
//!                               └──────────────────────────────────► Discarded ──► Idle
//! ```
//!
//! The GPIO interrupt calls [`EdgeLatch::record`] with the level it sampled.
//! That is the only code that runs in interrupt context: three atomic stores,
//! no allocation, no logging.
//!
//! [`DebouncedInput::poll`] runs on the cooperative loop (every 500 ms in the
//! firmware). It picks up the latched edge and, once the edge has settled or
//! the sampled level already differs from the last level seen, reads the live
//! level as the *expected* value and arms a verification `verify_delay_ms`
//! later. When that deadline passes the live level is read again: a match
//! updates the confirmed value, a mismatch is logged and dropped. A dropped
//! edge is never retried; a real change produces a fresh edge.

use std::{
    ops::{Index, IndexMut},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use embedded_hal::digital::{Error as _, InputPin};
use tracing::{debug, info, warn};

use crate::types::Input;

/// Time an edge must age before it is scheduled, unless its sampled level
/// already differs from the last observed level.
pub const EDGE_SETTLE_MS: u64 = 50;

/// Single-producer/single-consumer mailbox between the GPIO interrupt and the
/// polling loop. Holds only the most recent edge.
#[derive(Debug, Default)]
pub struct EdgeLatch {
    pending: AtomicBool,
    level: AtomicBool,
    at_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub level: bool,
    pub at_ms: u64,
}

impl EdgeLatch {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            level: AtomicBool::new(false),
            at_ms: AtomicU64::new(0),
        }
    }

    /// Interrupt-context entry point: store the sampled level and timestamp.
    pub fn record(&self, level: bool, now_ms: u64) {
        self.level.store(level, Ordering::Relaxed);
        self.at_ms.store(now_ms, Ordering::Relaxed);
        self.pending.store(true, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    fn take(&self) -> Option<Edge> {
        if !self.pending.swap(false, Ordering::Acquire) {
            return None;
        }
        Some(Edge {
            level: self.level.load(Ordering::Relaxed),
            at_ms: self.at_ms.load(Ordering::Relaxed),
        })
    }
}

/// Something that can report a confirmed on/off state.
pub trait InputSignal {
    fn is_active(&self) -> bool;
}

impl<T: InputSignal + ?Sized> InputSignal for &T {
    fn is_active(&self) -> bool {
        (**self).is_active()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Live level matched the expected level; the confirmed value is now `active`.
    Confirmed { active: bool },
    /// Live level did not match; nothing changed.
    Discarded { expected: bool, observed: bool },
    /// The pin could not be read; treated like a mismatch.
    Unreadable { expected: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub input: Input,
    pub outcome: VerifyOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingVerify {
    expected: bool,
    due_ms: u64,
}

/// A digital sensor line whose value is only trusted after verification.
pub struct DebouncedInput<P> {
    input: Input,
    pin: P,
    latch: Arc<EdgeLatch>,
    verify_delay_ms: u64,

    confirmed: bool,
    last_level: bool,
    edge: Option<Edge>,
    pending: Option<PendingVerify>,

    changed_at_ms: u64,
    verified_at_ms: Option<u64>,
    last_active_ms: Option<u64>,
    last_inactive_ms: Option<u64>,
}

impl<P: InputPin> DebouncedInput<P> {
    pub fn new(input: Input, pin: P, verify_delay_ms: u64) -> Self {
        Self {
            input,
            pin,
            latch: Arc::new(EdgeLatch::new()),
            verify_delay_ms,
            confirmed: false,
            last_level: false,
            edge: None,
            pending: None,
            changed_at_ms: 0,
            verified_at_ms: None,
            last_active_ms: None,
            last_inactive_ms: None,
        }
    }

    /// Samples the line and takes that level as confirmed, discarding any
    /// edge or verification in flight.
    pub fn init(&mut self, now_ms: u64) {
        let level = match self.read_level() {
            Some(level) => level,
            None => {
                warn!(
                    "input {} unreadable at init; assuming inactive",
                    self.input.as_str()
                );
                false
            }
        };
        self.latch.take();
        self.confirmed = level;
        self.last_level = level;
        self.edge = None;
        self.pending = None;
        self.changed_at_ms = now_ms;
        info!("input {} initialised, active={level}", self.input.as_str());
    }

    /// Handle to give to the interrupt handler of this line.
    pub fn edge_latch(&self) -> Arc<EdgeLatch> {
        Arc::clone(&self.latch)
    }

    /// Same as the interrupt path, for callers that sample edges in the loop.
    pub fn on_edge(&self, level: bool, now_ms: u64) {
        self.latch.record(level, now_ms);
    }

    /// Advances the protocol: schedules verification for a settled edge and
    /// runs a verification whose deadline has passed.
    pub fn poll(&mut self, now_ms: u64) -> Option<VerifyOutcome> {
        if let Some(edge) = self.latch.take() {
            self.changed_at_ms = edge.at_ms;
            self.edge = Some(edge);
        }

        if let Some(edge) = self.edge {
            let settled = now_ms.saturating_sub(edge.at_ms) >= EDGE_SETTLE_MS;
            if settled || edge.level != self.last_level {
                self.schedule_verify(now_ms);
            }
        }

        match self.pending {
            Some(pending) if now_ms >= pending.due_ms => self.verify(now_ms),
            _ => None,
        }
    }

    /// Reads the live level and commits it if it matches the level expected
    /// when the verification was armed. Returns `None` without reading the
    /// line when no verification is armed.
    pub fn verify(&mut self, now_ms: u64) -> Option<VerifyOutcome> {
        let pending = self.pending.take()?;
        self.verified_at_ms = Some(now_ms);

        let outcome = match self.read_level() {
            None => VerifyOutcome::Unreadable {
                expected: pending.expected,
            },
            Some(observed) if observed != pending.expected => VerifyOutcome::Discarded {
                expected: pending.expected,
                observed,
            },
            Some(active) => {
                self.confirmed = active;
                if active {
                    self.last_active_ms = Some(now_ms);
                } else {
                    self.last_inactive_ms = Some(now_ms);
                }
                VerifyOutcome::Confirmed { active }
            }
        };

        match outcome {
            VerifyOutcome::Confirmed { active } => {
                info!("input {}: active={active}", self.input.as_str());
            }
            VerifyOutcome::Discarded { expected, observed } => warn!(
                "input {} false trigger discarded (expected {}, got {} after {}ms delay)",
                self.input.as_str(),
                level_name(expected),
                level_name(observed),
                self.verify_delay_ms
            ),
            VerifyOutcome::Unreadable { .. } => {
                warn!(
                    "input {} unreadable during verify; edge discarded",
                    self.input.as_str()
                );
            }
        }

        Some(outcome)
    }

    pub fn input(&self) -> Input {
        self.input
    }

    pub fn verify_delay_ms(&self) -> u64 {
        self.verify_delay_ms
    }

    pub fn set_verify_delay_ms(&mut self, delay_ms: u64) {
        self.verify_delay_ms = delay_ms;
    }

    /// Whether an edge or a verification is outstanding.
    pub fn is_pending(&self) -> bool {
        self.latch.is_pending() || self.edge.is_some() || self.pending.is_some()
    }

    /// The level the armed verification expects to read, if one is armed.
    pub fn expected_level(&self) -> Option<bool> {
        self.pending.map(|pending| pending.expected)
    }

    pub fn changed_at_ms(&self) -> u64 {
        self.changed_at_ms
    }

    pub fn verified_at_ms(&self) -> Option<u64> {
        self.verified_at_ms
    }

    pub fn last_active_ms(&self) -> Option<u64> {
        self.last_active_ms
    }

    pub fn last_inactive_ms(&self) -> Option<u64> {
        self.last_inactive_ms
    }

    pub fn pin_mut(&mut self) -> &mut P {
        &mut self.pin
    }

    fn schedule_verify(&mut self, now_ms: u64) {
        let Some(expected) = self.read_level() else {
            // Keep the edge; the next poll tries again.
            return;
        };
        self.edge = None;
        self.last_level = expected;
        self.pending = Some(PendingVerify {
            expected,
            due_ms: now_ms.saturating_add(self.verify_delay_ms),
        });
        debug!(
            "input {} edge scheduled for verify in {}ms (expect {})",
            self.input.as_str(),
            self.verify_delay_ms,
            level_name(expected)
        );
    }

    fn read_level(&mut self) -> Option<bool> {
        match self.pin.is_high() {
            Ok(level) => Some(level),
            Err(err) => {
                debug!("input {} read failed: {:?}", self.input.as_str(), err.kind());
                None
            }
        }
    }
}

impl<P> InputSignal for DebouncedInput<P> {
    fn is_active(&self) -> bool {
        self.confirmed
    }
}

fn level_name(active: bool) -> &'static str {
    if active {
        "active"
    } else {
        "inactive"
    }
}

/// One signal per [`Input`], indexed by input identity.
pub struct InputBank<S> {
    inputs: [S; Input::COUNT],
}

impl<S: InputSignal> InputBank<S> {
    /// Builds one signal per input; slot order always follows [`Input::ALL`].
    pub fn from_fn(mut signal: impl FnMut(Input) -> S) -> Self {
        Self {
            inputs: Input::ALL.map(|input| signal(input)),
        }
    }

    pub fn is_active(&self, input: Input) -> bool {
        self.inputs[input.index()].is_active()
    }
}

impl<P: InputPin> InputBank<DebouncedInput<P>> {
    pub fn init(&mut self, now_ms: u64) {
        for input in &mut self.inputs {
            input.init(now_ms);
        }
    }

    /// Polls every line, returning the verifications that ran.
    pub fn poll(&mut self, now_ms: u64) -> Vec<InputEvent> {
        self.inputs
            .iter_mut()
            .filter_map(|input| {
                input.poll(now_ms).map(|outcome| InputEvent {
                    input: input.input(),
                    outcome,
                })
            })
            .collect()
    }
}

impl<S> Index<Input> for InputBank<S> {
    type Output = S;

    fn index(&self, input: Input) -> &S {
        &self.inputs[input.index()]
    }
}

impl<S> IndexMut<Input> for InputBank<S> {
    fn index_mut(&mut self, input: Input) -> &mut S {
        &mut self.inputs[input.index()]
    }
}
