//! Host stand-in for the relay board, the two sensor lines and the house.
//!
//! Output pins are plain flags; the [`Plant`] reads them back to decide how
//! the indoor temperature moves. Input lines call [`EdgeLatch::record`] on
//! every level change, the way the GPIO interrupt does on the board.

use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use athermostat_common::{EdgeLatch, Input, Output};
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use tracing::info;

/// Outdoor temperature at or below which the heat pump is locked out.
pub const OUT_TEMP_LOCKOUT_F: f32 = 30.0;

/// Heat pump runtime below `DEFROST_BELOW_F` outdoors before the outdoor
/// unit runs a defrost cycle.
const DEFROST_INTERVAL_MS: u64 = 45 * 60_000;
const DEFROST_DURATION_MS: u64 = 5 * 60_000;
const DEFROST_BELOW_F: f32 = 40.0;

/// Fraction of the indoor/outdoor difference lost per second.
const LOSS_PER_S: f32 = 1.0 / 36_000.0;
const FURNACE_STAGE_F_PER_S: f32 = 0.005;
const COMPRESSOR_F_PER_S: f32 = 0.004;

/// Monotonic milliseconds, optionally running faster than wall time.
#[derive(Debug, Clone)]
pub struct SimClock {
    start: Instant,
    scale: u64,
}

impl SimClock {
    pub fn new(scale: u64) -> Self {
        Self {
            start: Instant::now(),
            scale: scale.max(1),
        }
    }

    pub fn now_ms(&self) -> u64 {
        let elapsed: u64 = self
            .start
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX);
        elapsed.saturating_mul(self.scale)
    }
}

#[derive(Debug, Clone)]
pub struct SimOutputPin {
    high: Arc<AtomicBool>,
}

impl ErrorType for SimOutputPin {
    type Error = Infallible;
}

impl OutputPin for SimOutputPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high.store(true, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SimInputPin {
    level: Arc<AtomicBool>,
}

impl ErrorType for SimInputPin {
    type Error = Infallible;
}

impl InputPin for SimInputPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.level.load(Ordering::Relaxed))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.level.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Default)]
struct SimLine {
    level: Arc<AtomicBool>,
    interrupt: Option<Arc<EdgeLatch>>,
}

impl SimLine {
    fn drive(&self, level: bool, now_ms: u64) {
        let previous = self.level.swap(level, Ordering::Relaxed);
        if previous != level {
            if let Some(latch) = &self.interrupt {
                latch.record(level, now_ms);
            }
        }
    }
}

/// Relay outputs and sensor inputs of one controller board.
#[derive(Debug, Default)]
pub struct SimBoard {
    outputs: [Arc<AtomicBool>; Output::COUNT],
    lines: [SimLine; Input::COUNT],
}

impl SimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output_pin(&self, output: Output) -> SimOutputPin {
        SimOutputPin {
            high: Arc::clone(&self.outputs[output.index()]),
        }
    }

    pub fn is_high(&self, output: Output) -> bool {
        self.outputs[output.index()].load(Ordering::Relaxed)
    }

    pub fn input_pin(&self, input: Input) -> SimInputPin {
        SimInputPin {
            level: Arc::clone(&self.lines[input.index()].level),
        }
    }

    pub fn attach_interrupt(&mut self, input: Input, latch: Arc<EdgeLatch>) {
        self.lines[input.index()].interrupt = Some(latch);
    }

    /// Sets a sensor line, firing its interrupt if the level changed.
    pub fn drive(&self, input: Input, level: bool, now_ms: u64) {
        self.lines[input.index()].drive(level, now_ms);
    }

    /// A contact bounce: the line flips and settles back before anyone reads it.
    pub fn glitch(&self, input: Input, now_ms: u64) {
        let line = &self.lines[input.index()];
        let level = line.level.load(Ordering::Relaxed);
        line.drive(!level, now_ms);
        line.drive(level, now_ms);
    }
}

/// Single-zone house with a dual-fuel heat pump.
#[derive(Debug, Clone)]
pub struct Plant {
    indoor_f: f32,
    outdoor_f: f32,
    last_step_ms: Option<u64>,
    cold_hp_runtime_ms: u64,
    defrost_until_ms: Option<u64>,
}

impl Plant {
    pub fn new(indoor_f: f32, outdoor_f: f32) -> Self {
        Self {
            indoor_f,
            outdoor_f,
            last_step_ms: None,
            cold_hp_runtime_ms: 0,
            defrost_until_ms: None,
        }
    }

    pub fn indoor_f(&self) -> f32 {
        self.indoor_f
    }

    pub fn outdoor_f(&self) -> f32 {
        self.outdoor_f
    }

    pub fn out_temp_ok(&self) -> bool {
        self.outdoor_f > OUT_TEMP_LOCKOUT_F
    }

    pub fn is_defrosting(&self) -> bool {
        self.defrost_until_ms.is_some()
    }

    /// Advances the model to `now_ms` with the relays as they are on `board`.
    pub fn step(&mut self, now_ms: u64, board: &SimBoard) {
        let elapsed_ms = self
            .last_step_ms
            .map_or(0, |last| now_ms.saturating_sub(last));
        self.last_step_ms = Some(now_ms);
        let dt_s = elapsed_ms as f32 / 1000.0;

        let mut rate = -(self.indoor_f - self.outdoor_f) * LOSS_PER_S;
        if board.is_high(Output::Fan1) {
            let furnace_stages = [Output::W1, Output::W2]
                .into_iter()
                .filter(|output| board.is_high(*output))
                .count();
            rate += furnace_stages as f32 * FURNACE_STAGE_F_PER_S;

            let compressors = [Output::Comp1, Output::Comp2]
                .into_iter()
                .filter(|output| board.is_high(*output))
                .count() as f32
                * COMPRESSOR_F_PER_S;
            if board.is_high(Output::Rev) || self.is_defrosting() {
                rate -= compressors;
            } else {
                rate += compressors;
            }
        }
        self.indoor_f += rate * dt_s;

        let heat_pump_heating = board.is_high(Output::Comp1) && !board.is_high(Output::Rev);
        if heat_pump_heating && self.outdoor_f < DEFROST_BELOW_F {
            self.cold_hp_runtime_ms += elapsed_ms;
        }

        match self.defrost_until_ms {
            Some(until) if now_ms >= until => {
                info!("outdoor unit defrost complete");
                self.defrost_until_ms = None;
            }
            Some(_) => {}
            None if self.cold_hp_runtime_ms >= DEFROST_INTERVAL_MS => {
                info!(
                    "outdoor unit entering defrost (outdoor={:.1}F)",
                    self.outdoor_f
                );
                self.defrost_until_ms = Some(now_ms + DEFROST_DURATION_MS);
                self.cold_hp_runtime_ms = 0;
            }
            None => {}
        }
    }

    /// Drives the sensor lines from the model.
    pub fn drive_inputs(&self, board: &SimBoard, now_ms: u64) {
        board.drive(Input::OutTempOk, self.out_temp_ok(), now_ms);
        board.drive(Input::DefrostMode, self.is_defrosting(), now_ms);
    }
}

#[cfg(test)]
mod tests {
    use athermostat_common::{
        Action, ControllerConfig, DebouncedInput, HeatLevel, InputBank, InputSignal, Mode,
        PinRelay, RelayBank, ThermostatController, ThermostatSettings,
    };
    use pretty_assertions::assert_eq;

    use super::*;

    fn energise(board: &SimBoard, outputs: &[Output]) {
        for output in outputs {
            board.output_pin(*output).set_high().unwrap();
        }
    }

    #[test]
    fn clock_scales_elapsed_time() {
        let clock = SimClock::new(0);
        assert_eq!(clock.scale, 1);
        let fast = SimClock::new(60);
        assert_eq!(fast.now_ms() % 60, 0);
    }

    #[test]
    fn house_drifts_toward_outdoor_without_equipment() {
        let board = SimBoard::new();
        let mut plant = Plant::new(68.0, 30.0);
        plant.step(0, &board);
        plant.step(3_600_000, &board);
        assert!(plant.indoor_f() < 68.0);
        assert!(plant.indoor_f() > 30.0);
    }

    #[test]
    fn furnace_and_heat_pump_raise_temperature() {
        for outputs in [
            &[Output::Fan1, Output::W1][..],
            &[Output::Fan1, Output::FurnCoolLow, Output::Comp1][..],
        ] {
            let board = SimBoard::new();
            energise(&board, outputs);
            let mut plant = Plant::new(65.0, 50.0);
            plant.step(0, &board);
            plant.step(600_000, &board);
            assert!(plant.indoor_f() > 65.0, "{outputs:?} did not heat");
        }
    }

    #[test]
    fn reversing_valve_turns_compressor_into_cooling() {
        let board = SimBoard::new();
        energise(
            &board,
            &[Output::Fan1, Output::Rev, Output::FurnCoolLow, Output::Comp1],
        );
        let mut plant = Plant::new(78.0, 78.0);
        plant.step(0, &board);
        plant.step(600_000, &board);
        assert!(plant.indoor_f() < 78.0);
    }

    #[test]
    fn cold_heat_pump_runtime_triggers_defrost_cycle() {
        let board = SimBoard::new();
        energise(&board, &[Output::Fan1, Output::FurnCoolLow, Output::Comp1]);
        let mut plant = Plant::new(66.0, 35.0);

        plant.step(0, &board);
        plant.step(DEFROST_INTERVAL_MS - 1, &board);
        assert!(!plant.is_defrosting());
        plant.step(DEFROST_INTERVAL_MS, &board);
        assert!(plant.is_defrosting());

        plant.step(DEFROST_INTERVAL_MS + DEFROST_DURATION_MS, &board);
        assert!(!plant.is_defrosting());
    }

    #[test]
    fn line_interrupt_fires_only_on_change() {
        let mut board = SimBoard::new();
        let latch = Arc::new(EdgeLatch::new());
        board.attach_interrupt(Input::DefrostMode, Arc::clone(&latch));

        board.drive(Input::DefrostMode, false, 10);
        assert!(!latch.is_pending());

        board.drive(Input::DefrostMode, true, 20);
        assert!(latch.is_pending());
        assert!(board.input_pin(Input::DefrostMode).is_high().unwrap());
    }

    #[test]
    fn glitch_never_reaches_confirmed_state() {
        let mut board = SimBoard::new();
        let mut input = DebouncedInput::new(
            Input::DefrostMode,
            board.input_pin(Input::DefrostMode),
            2_000,
        );
        board.attach_interrupt(Input::DefrostMode, input.edge_latch());
        input.init(0);

        board.glitch(Input::DefrostMode, 1_000);
        for now in (1_500..=6_000).step_by(500) {
            input.poll(now);
        }
        assert!(!input.is_active());
    }

    #[test]
    fn controller_drives_board_through_pin_relays() {
        let mut board = SimBoard::new();
        let relays = RelayBank::from_fn(|output| PinRelay::new(output, board.output_pin(output)));
        let inputs =
            InputBank::from_fn(|input| DebouncedInput::new(input, board.input_pin(input), 2_000));
        let mut ctrl = ThermostatController::new(
            ControllerConfig::default(),
            ThermostatSettings {
                mode: Mode::Heat,
                ..ThermostatSettings::default()
            },
            relays,
            inputs,
        );
        for input in Input::ALL {
            board.attach_interrupt(input, ctrl.inputs()[input].edge_latch());
        }

        let plant = Plant::new(60.0, 50.0);
        plant.drive_inputs(&board, 0);
        ctrl.inputs_mut().init(0);
        ctrl.begin(0);
        assert!(ctrl.is_input_active(Input::OutTempOk));

        ctrl.set_current_temperature(plant.indoor_f(), 180_000);
        ctrl.update(180_000);
        assert_eq!(ctrl.action(), Action::Heating);
        assert_eq!(ctrl.heat_level(), HeatLevel::HpLow);
        assert!(board.is_high(Output::Comp1));
        assert!(!board.is_high(Output::W1));

        ctrl.force_idle(181_000);
        assert!(Output::ALL.into_iter().all(|output| !board.is_high(output)));
    }
}
