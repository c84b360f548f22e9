use std::ops::{Index, IndexMut};

use embedded_hal::digital::{Error as _, OutputPin};
use tracing::warn;

use crate::types::{Output, Stage};

/// An addressable on/off actuator.
pub trait RelayOutput {
    fn turn_on(&mut self);
    fn turn_off(&mut self);
    fn is_on(&self) -> bool;
}

impl<T: RelayOutput + ?Sized> RelayOutput for &mut T {
    fn turn_on(&mut self) {
        (**self).turn_on();
    }

    fn turn_off(&mut self) {
        (**self).turn_off();
    }

    fn is_on(&self) -> bool {
        (**self).is_on()
    }
}

/// Drives a relay from an active-high GPIO.
///
/// The commanded state is cached so `is_on` needs no pin access; it only
/// changes when the pin write succeeds.
pub struct PinRelay<P> {
    output: Output,
    pin: P,
    on: bool,
}

impl<P: OutputPin> PinRelay<P> {
    /// Wraps `pin` and drives it low.
    pub fn new(output: Output, pin: P) -> Self {
        let mut relay = Self {
            output,
            pin,
            on: true,
        };
        relay.turn_off();
        relay
    }

    pub fn output(&self) -> Output {
        self.output
    }

    pub fn pin_mut(&mut self) -> &mut P {
        &mut self.pin
    }
}

impl<P: OutputPin> RelayOutput for PinRelay<P> {
    fn turn_on(&mut self) {
        match self.pin.set_high() {
            Ok(()) => self.on = true,
            Err(err) => warn!(
                "relay {} failed to switch on: {:?}",
                self.output.as_str(),
                err.kind()
            ),
        }
    }

    fn turn_off(&mut self) {
        match self.pin.set_low() {
            Ok(()) => self.on = false,
            Err(err) => warn!(
                "relay {} failed to switch off: {:?}",
                self.output.as_str(),
                err.kind()
            ),
        }
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

/// One relay handle per [`Output`], indexed by board order.
pub struct RelayBank<R> {
    relays: [R; Output::COUNT],
}

impl<R: RelayOutput> RelayBank<R> {
    /// Builds one relay per output; slot order always follows [`Output::ALL`].
    pub fn from_fn(mut relay: impl FnMut(Output) -> R) -> Self {
        Self {
            relays: Output::ALL.map(|output| relay(output)),
        }
    }

    pub fn all_off(&mut self) {
        for relay in &mut self.relays {
            relay.turn_off();
        }
    }

    /// Switches to `stage`: everything off first, then exactly the stage's set on.
    pub fn apply(&mut self, stage: Stage) {
        self.all_off();
        for output in stage.relays() {
            self.relays[output.index()].turn_on();
        }
    }

    pub fn is_on(&self, output: Output) -> bool {
        self.relays[output.index()].is_on()
    }

    /// Outputs currently energised, in board order.
    pub fn energised(&self) -> impl Iterator<Item = Output> + '_ {
        Output::ALL
            .into_iter()
            .filter(move |output| self.is_on(*output))
    }
}

impl<R> Index<Output> for RelayBank<R> {
    type Output = R;

    fn index(&self, output: Output) -> &R {
        &self.relays[output.index()]
    }
}

impl<R> IndexMut<Output> for RelayBank<R> {
    fn index_mut(&mut self, output: Output) -> &mut R {
        &mut self.relays[output.index()]
    }
}
