use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::{
    config::{ControllerConfig, ThermostatSettings},
    input::{InputBank, InputSignal},
    relay::{RelayBank, RelayOutput},
    types::{Action, CoolLevel, ControllerStatus, HeatLevel, Input, Mode, Output, Stage},
};

/// Last temperature reading and whether it can still be trusted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureSample {
    value_f: f32,
    valid: bool,
    last_update_ms: u64,
}

impl Default for TemperatureSample {
    fn default() -> Self {
        Self {
            value_f: f32::NAN,
            valid: false,
            last_update_ms: 0,
        }
    }
}

impl TemperatureSample {
    pub fn value_f(&self) -> f32 {
        self.value_f
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn last_update_ms(&self) -> u64 {
        self.last_update_ms
    }

    fn record(&mut self, value_f: f32, now_ms: u64) {
        self.value_f = value_f;
        self.valid = true;
        self.last_update_ms = now_ms;
    }

    /// Invalidates the sample once it is older than `timeout_ms`. Returns
    /// true on the tick that invalidates it.
    fn expire(&mut self, now_ms: u64, timeout_ms: u64) -> bool {
        if self.valid && now_ms.saturating_sub(self.last_update_ms) > timeout_ms {
            self.valid = false;
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FanIdle {
    Waiting { since_ms: u64 },
    Running { since_ms: u64 },
}

/// Staged dual-fuel heating / two-stage cooling controller.
///
/// `update` is meant to run once per second on the same loop that mutates
/// mode, setpoints and configuration; nothing here locks.
pub struct ThermostatController<R, S> {
    pub config: ControllerConfig,
    settings: ThermostatSettings,

    relays: RelayBank<R>,
    inputs: InputBank<S>,

    action: Action,
    stage: Stage,
    temperature: TemperatureSample,
    /// Heat level to restore when the defrost cycle ends.
    defrost: Option<HeatLevel>,

    last_action_change_ms: u64,
    action_start_ms: u64,
    last_escalation_ms: u64,
    fan_idle: FanIdle,
}

impl<R: RelayOutput, S: InputSignal> ThermostatController<R, S> {
    pub fn new(
        config: ControllerConfig,
        mut settings: ThermostatSettings,
        relays: RelayBank<R>,
        inputs: InputBank<S>,
    ) -> Self {
        settings.sanitize();
        Self {
            config,
            settings,
            relays,
            inputs,
            action: Action::Off,
            stage: Stage::Idle,
            temperature: TemperatureSample::default(),
            defrost: None,
            last_action_change_ms: 0,
            action_start_ms: 0,
            last_escalation_ms: 0,
            fan_idle: FanIdle::Waiting { since_ms: 0 },
        }
    }

    /// Starts the timing guards at `now_ms` so a fresh boot also honours the
    /// minimum off time, then enters the persisted mode.
    pub fn begin(&mut self, now_ms: u64) {
        self.relays.all_off();
        self.last_action_change_ms = now_ms;
        self.action_start_ms = now_ms;
        self.fan_idle = FanIdle::Waiting { since_ms: now_ms };

        let mode = self.settings.mode;
        self.settings.mode = Mode::Off;
        self.set_mode(mode, now_ms);
        info!("thermostat initialized, mode={}", self.settings.mode);
    }

    pub fn settings(&self) -> &ThermostatSettings {
        &self.settings
    }

    pub fn mode(&self) -> Mode {
        self.settings.mode
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn heat_level(&self) -> HeatLevel {
        self.stage.heat_level()
    }

    pub fn cool_level(&self) -> CoolLevel {
        self.stage.cool_level()
    }

    pub fn heat_setpoint(&self) -> f32 {
        self.settings.heat_setpoint_f
    }

    pub fn cool_setpoint(&self) -> f32 {
        self.settings.cool_setpoint_f
    }

    pub fn is_force_furnace(&self) -> bool {
        self.settings.force_furnace
    }

    pub fn is_force_no_hp(&self) -> bool {
        self.settings.force_no_hp
    }

    pub fn is_defrost_active(&self) -> bool {
        self.defrost.is_some()
    }

    pub fn temperature(&self) -> &TemperatureSample {
        &self.temperature
    }

    pub fn has_valid_temperature(&self) -> bool {
        self.temperature.is_valid()
    }

    pub fn relays(&self) -> &RelayBank<R> {
        &self.relays
    }

    pub fn inputs(&self) -> &InputBank<S> {
        &self.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut InputBank<S> {
        &mut self.inputs
    }

    pub fn is_output_on(&self, output: Output) -> bool {
        self.relays.is_on(output)
    }

    pub fn is_input_active(&self, input: Input) -> bool {
        self.inputs.is_active(input)
    }

    /// Status lookup by wire name, e.g. `"comp1"`.
    pub fn is_on(&self, name: &str) -> Option<bool> {
        name.parse::<Output>().ok().map(|output| self.is_output_on(output))
    }

    /// Status lookup by wire name, e.g. `"defrost_mode"`.
    pub fn is_active(&self, name: &str) -> Option<bool> {
        name.parse::<Input>().ok().map(|input| self.is_input_active(input))
    }

    /// Time spent in the current heating/cooling action.
    pub fn runtime_ms(&self, now_ms: u64) -> u64 {
        if self.action.is_conditioning() {
            now_ms.saturating_sub(self.action_start_ms)
        } else {
            0
        }
    }

    /// Records a temperature reading. Non-finite readings are rejected.
    pub fn set_current_temperature(&mut self, temp_f: f32, now_ms: u64) -> bool {
        if !temp_f.is_finite() {
            warn!("rejecting non-finite temperature reading");
            return false;
        }
        self.temperature.record(temp_f, now_ms);
        true
    }

    pub fn set_heat_setpoint(&mut self, temp_f: f32) -> bool {
        if !temp_f.is_finite() || (self.settings.heat_setpoint_f - temp_f).abs() <= f32::EPSILON
        {
            return false;
        }
        self.settings.heat_setpoint_f = temp_f;
        true
    }

    pub fn set_cool_setpoint(&mut self, temp_f: f32) -> bool {
        if !temp_f.is_finite() || (self.settings.cool_setpoint_f - temp_f).abs() <= f32::EPSILON
        {
            return false;
        }
        self.settings.cool_setpoint_f = temp_f;
        true
    }

    pub fn set_force_furnace(&mut self, force: bool) -> bool {
        let changed = self.settings.force_furnace != force;
        self.settings.force_furnace = force;
        changed
    }

    pub fn set_force_no_hp(&mut self, no_hp: bool) -> bool {
        let changed = self.settings.force_no_hp != no_hp;
        self.settings.force_no_hp = no_hp;
        changed
    }

    /// Switches mode. Any running cycle is torn down immediately, without
    /// waiting for the minimum on time; a non-off mode restarts the off timer.
    pub fn set_mode(&mut self, mode: Mode, now_ms: u64) -> bool {
        if mode == self.settings.mode {
            return false;
        }
        info!("mode change: {} -> {}", self.settings.mode, mode);
        self.settings.mode = mode;

        self.relays.all_off();
        self.stage = Stage::Idle;
        self.defrost = None;
        self.fan_idle = FanIdle::Waiting { since_ms: now_ms };

        if mode == Mode::Off {
            self.action = Action::Off;
        } else {
            self.action = Action::Idle;
            self.last_action_change_ms = now_ms;
            self.action_start_ms = now_ms;
        }
        true
    }

    /// One control tick.
    pub fn update(&mut self, now_ms: u64) {
        if self.settings.mode == Mode::Off {
            return;
        }

        if self
            .temperature
            .expire(now_ms, self.config.sensor_stale_timeout_ms)
        {
            warn!(
                "temperature stale (>{}s), marking invalid",
                self.config.sensor_stale_timeout_ms / 1000
            );
        }

        self.handle_defrost_input(now_ms);

        if self.enforce_max_run(now_ms) {
            return;
        }

        if !self.temperature.is_valid() {
            return;
        }

        match self.settings.mode {
            Mode::Off => {}
            Mode::Heat => self.update_heating(now_ms),
            Mode::Cool => self.update_cooling(now_ms),
            Mode::HeatCool => match self.action {
                Action::Heating => self.update_heating(now_ms),
                Action::Cooling => self.update_cooling(now_ms),
                Action::Off | Action::Idle | Action::FanRunning => {
                    if self.calls_for_heat() {
                        self.update_heating(now_ms);
                    } else if self.calls_for_cool() {
                        self.update_cooling(now_ms);
                    } else {
                        self.update_fan_idle(now_ms);
                    }
                }
            },
            Mode::FanOnly => self.update_fan_only(now_ms),
        }
    }

    pub fn can_turn_on(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_action_change_ms) >= self.config.min_off_time_ms
    }

    pub fn can_turn_off(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.action_start_ms) >= self.config.min_on_time_ms
    }

    pub fn can_escalate(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_escalation_ms) >= self.config.escalation_delay_ms
    }

    /// Turns every relay off and parks the controller in idle, bypassing all
    /// timing guards.
    pub fn force_idle(&mut self, now_ms: u64) {
        if self.settings.mode == Mode::Off {
            self.relays.all_off();
            return;
        }
        self.shut_down(now_ms);
    }

    pub fn status(&self, now_ms: u64) -> ControllerStatus {
        ControllerStatus {
            mode: self.settings.mode.as_str(),
            action: self.action.as_str(),
            heat_level: self.heat_level().as_str(),
            cool_level: self.cool_level().as_str(),
            current_temp: self
                .temperature
                .is_valid()
                .then_some(self.temperature.value_f()),
            heat_setpoint: self.settings.heat_setpoint_f,
            cool_setpoint: self.settings.cool_setpoint_f,
            force_furnace: self.settings.force_furnace,
            force_no_hp: self.settings.force_no_hp,
            defrost: self.is_defrost_active(),
            runtime_ms: self.runtime_ms(now_ms),
            outputs: Output::ALL
                .into_iter()
                .map(|output| (output.as_str(), self.relays.is_on(output)))
                .collect::<BTreeMap<_, _>>(),
            inputs: Input::ALL
                .into_iter()
                .map(|input| (input.as_str(), self.inputs.is_active(input)))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn calls_for_heat(&self) -> bool {
        self.temperature.value_f() < self.settings.heat_setpoint_f - self.config.heat_deadband_f
    }

    fn calls_for_cool(&self) -> bool {
        self.temperature.value_f() > self.settings.cool_setpoint_f + self.config.cool_deadband_f
    }

    fn heat_pump_allowed(&self) -> bool {
        self.inputs.is_active(Input::OutTempOk)
            && !self.settings.force_furnace
            && !self.settings.force_no_hp
    }

    fn handle_defrost_input(&mut self, now_ms: u64) {
        if self.inputs.is_active(Input::DefrostMode) {
            if self.defrost.is_none() && self.action == Action::Heating {
                self.enter_defrost();
            }
        } else if self.defrost.is_some() {
            self.exit_defrost(now_ms);
        }
    }

    fn enforce_max_run(&mut self, now_ms: u64) -> bool {
        if !self.action.is_conditioning() {
            return false;
        }
        if now_ms.saturating_sub(self.action_start_ms) < self.config.max_run_time_ms {
            return false;
        }
        warn!(
            "max run time exceeded ({}s), forcing idle",
            self.config.max_run_time_ms / 1000
        );
        self.relays.all_off();
        self.action = Action::Idle;
        self.stage = Stage::Idle;
        self.defrost = None;
        self.last_action_change_ms = now_ms;
        true
    }

    fn update_heating(&mut self, now_ms: u64) {
        if self.defrost.is_some() {
            return;
        }

        match self.action {
            Action::Idle | Action::FanRunning => {
                if !self.calls_for_heat() {
                    self.update_fan_idle(now_ms);
                    return;
                }
                if !self.can_turn_on(now_ms) {
                    return;
                }

                info!(
                    "starting heat (temp={:.1} setpoint={:.1})",
                    self.temperature.value_f(),
                    self.settings.heat_setpoint_f
                );
                self.start_action(Action::Heating, now_ms);
                let level = if self.heat_pump_allowed() {
                    HeatLevel::HpLow
                } else {
                    HeatLevel::FurnaceLow
                };
                self.apply_heat_level(level);
            }
            Action::Heating => {
                if self.temperature.value_f()
                    >= self.settings.heat_setpoint_f + self.config.heat_overrun_f
                {
                    if self.can_turn_off(now_ms) {
                        info!(
                            "stopping heat (temp={:.1} setpoint={:.1})",
                            self.temperature.value_f(),
                            self.settings.heat_setpoint_f
                        );
                        self.stop_action(now_ms);
                    }
                    return;
                }

                if self.can_escalate(now_ms) {
                    self.escalate_heat(now_ms);
                }

                // Losing outdoor permission moves off the heat pump at once,
                // without waiting for the escalation delay.
                if self.stage.heat_level().is_heat_pump()
                    && !self.inputs.is_active(Input::OutTempOk)
                    && !self.settings.force_furnace
                    && !self.settings.force_no_hp
                {
                    info!("outdoor temp not ok, switching heat pump -> furnace");
                    self.apply_heat_level(HeatLevel::FurnaceLow);
                    self.last_escalation_ms = now_ms;
                }
            }
            Action::Off | Action::Cooling => {}
        }
    }

    fn escalate_heat(&mut self, now_ms: u64) {
        let force_furnace = self.settings.force_furnace;
        let next = match self.stage.heat_level() {
            HeatLevel::HpLow if !force_furnace => HeatLevel::HpHigh,
            HeatLevel::HpLow | HeatLevel::HpHigh => HeatLevel::FurnaceLow,
            HeatLevel::FurnaceLow => HeatLevel::FurnaceHigh,
            HeatLevel::FurnaceHigh | HeatLevel::Idle | HeatLevel::Defrost => return,
        };
        info!(
            "escalating {} -> {} (out_temp_ok={} force_furnace={})",
            self.stage.as_str(),
            next.as_str(),
            self.inputs.is_active(Input::OutTempOk),
            force_furnace
        );
        self.apply_heat_level(next);
        self.last_escalation_ms = now_ms;
    }

    fn update_cooling(&mut self, now_ms: u64) {
        match self.action {
            Action::Idle | Action::FanRunning => {
                if !self.calls_for_cool() {
                    self.update_fan_idle(now_ms);
                    return;
                }
                if !self.can_turn_on(now_ms) {
                    return;
                }

                info!(
                    "starting cool (temp={:.1} setpoint={:.1})",
                    self.temperature.value_f(),
                    self.settings.cool_setpoint_f
                );
                self.start_action(Action::Cooling, now_ms);
                self.apply_cool_level(CoolLevel::Cool);
            }
            Action::Cooling => {
                if self.temperature.value_f()
                    <= self.settings.cool_setpoint_f - self.config.cool_overrun_f
                {
                    if self.can_turn_off(now_ms) {
                        info!(
                            "stopping cool (temp={:.1} setpoint={:.1})",
                            self.temperature.value_f(),
                            self.settings.cool_setpoint_f
                        );
                        self.stop_action(now_ms);
                    }
                    return;
                }

                if self.stage == Stage::Cool && self.can_escalate(now_ms) {
                    info!("escalating to supplemental cooling");
                    self.apply_cool_level(CoolLevel::CoolSupp);
                    self.last_escalation_ms = now_ms;
                }
            }
            Action::Off | Action::Heating => {}
        }
    }

    fn update_fan_only(&mut self, now_ms: u64) {
        if self.action == Action::FanRunning {
            return;
        }
        self.action = Action::FanRunning;
        self.stage = Stage::Idle;
        self.relays.all_off();
        self.relays[Output::Fan1].turn_on();
        self.last_action_change_ms = now_ms;
    }

    fn update_fan_idle(&mut self, now_ms: u64) {
        if !matches!(self.action, Action::Idle | Action::FanRunning) {
            return;
        }

        match self.fan_idle {
            FanIdle::Running { .. } if !self.config.fan_idle_enabled => {
                debug!("fan idle disabled, stopping fan");
                self.stop_fan_idle(now_ms);
            }
            _ if !self.config.fan_idle_enabled => {}
            FanIdle::Running { since_ms } => {
                if now_ms.saturating_sub(since_ms) > self.config.fan_idle_run_ms() {
                    debug!("fan idle cycle complete");
                    self.stop_fan_idle(now_ms);
                }
            }
            FanIdle::Waiting { since_ms } => {
                if now_ms.saturating_sub(since_ms) > self.config.fan_idle_wait_ms() {
                    debug!("starting fan idle cycle");
                    self.relays[Output::Fan1].turn_on();
                    self.action = Action::FanRunning;
                    self.fan_idle = FanIdle::Running { since_ms: now_ms };
                }
            }
        }
    }

    fn stop_fan_idle(&mut self, now_ms: u64) {
        self.relays[Output::Fan1].turn_off();
        self.action = Action::Idle;
        self.fan_idle = FanIdle::Waiting { since_ms: now_ms };
    }

    fn enter_defrost(&mut self) {
        let previous = self.stage.heat_level();
        info!("entering defrost (was {})", previous.as_str());
        self.defrost = Some(previous);
        self.apply_heat_level(HeatLevel::Defrost);
    }

    fn exit_defrost(&mut self, now_ms: u64) {
        let Some(previous) = self.defrost.take() else {
            return;
        };
        info!("exiting defrost, restoring {}", previous.as_str());

        if self.action == Action::Heating && previous != HeatLevel::Idle {
            self.apply_heat_level(previous);
        } else {
            self.relays.all_off();
            self.stage = Stage::Idle;
            self.action = Action::Idle;
            self.last_action_change_ms = now_ms;
            self.fan_idle = FanIdle::Waiting { since_ms: now_ms };
        }
    }

    fn start_action(&mut self, action: Action, now_ms: u64) {
        self.action = action;
        self.last_action_change_ms = now_ms;
        self.action_start_ms = now_ms;
        self.last_escalation_ms = now_ms;
        self.fan_idle = FanIdle::Waiting { since_ms: now_ms };
    }

    fn stop_action(&mut self, now_ms: u64) {
        self.relays.all_off();
        self.action = Action::Idle;
        self.stage = Stage::Idle;
        self.last_action_change_ms = now_ms;
        self.fan_idle = FanIdle::Waiting { since_ms: now_ms };
    }

    fn shut_down(&mut self, now_ms: u64) {
        let was_conditioning = self.action.is_conditioning();
        self.relays.all_off();
        self.stage = Stage::Idle;
        self.defrost = None;
        self.action = Action::Idle;
        self.fan_idle = FanIdle::Waiting { since_ms: now_ms };
        if was_conditioning {
            self.last_action_change_ms = now_ms;
        }
    }

    fn apply_heat_level(&mut self, level: HeatLevel) {
        self.apply_stage(Stage::from(level));
    }

    fn apply_cool_level(&mut self, level: CoolLevel) {
        self.apply_stage(Stage::from(level));
    }

    fn apply_stage(&mut self, stage: Stage) {
        self.stage = stage;
        self.relays.apply(stage);
        info!("stage: {}", stage.as_str());
    }
}
