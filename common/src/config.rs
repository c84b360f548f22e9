use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    types::{Input, Mode},
};

pub const DEFAULT_HEAT_SETPOINT_F: f32 = 68.0;
pub const DEFAULT_COOL_SETPOINT_F: f32 = 76.0;

/// Tuning for the staged heat/cool state machine.
///
/// Temperatures are degrees Fahrenheit, durations milliseconds unless the
/// field name says minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Degrees below the heat setpoint before a heating cycle starts.
    pub heat_deadband_f: f32,
    /// Degrees above the cool setpoint before a cooling cycle starts.
    pub cool_deadband_f: f32,
    /// Degrees above the heat setpoint before heating stops.
    pub heat_overrun_f: f32,
    /// Degrees below the cool setpoint before cooling stops.
    pub cool_overrun_f: f32,

    pub min_on_time_ms: u64,
    pub min_off_time_ms: u64,
    /// Carried for the configuration API; the state machine does not consume it.
    pub min_idle_time_ms: u64,
    pub max_run_time_ms: u64,
    pub escalation_delay_ms: u64,
    pub sensor_stale_timeout_ms: u64,

    pub fan_idle_enabled: bool,
    pub fan_idle_wait_min: u32,
    pub fan_idle_run_min: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            heat_deadband_f: 0.5,
            cool_deadband_f: 0.5,
            heat_overrun_f: 0.5,
            cool_overrun_f: 0.5,
            min_on_time_ms: 180_000,
            min_off_time_ms: 180_000,
            min_idle_time_ms: 60_000,
            max_run_time_ms: 1_800_000,
            escalation_delay_ms: 600_000,
            sensor_stale_timeout_ms: 300_000,
            fan_idle_enabled: false,
            fan_idle_wait_min: 15,
            fan_idle_run_min: 5,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("heat_deadband_f", self.heat_deadband_f),
            ("cool_deadband_f", self.cool_deadband_f),
            ("heat_overrun_f", self.heat_overrun_f),
            ("cool_overrun_f", self.cool_overrun_f),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidOffset { field, value });
            }
        }

        if self.max_run_time_ms == 0 {
            return Err(ConfigError::ZeroDuration("max_run_time_ms"));
        }
        if self.sensor_stale_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("sensor_stale_timeout_ms"));
        }
        if self.fan_idle_enabled {
            if self.fan_idle_wait_min == 0 {
                return Err(ConfigError::ZeroDuration("fan_idle_wait_min"));
            }
            if self.fan_idle_run_min == 0 {
                return Err(ConfigError::ZeroDuration("fan_idle_run_min"));
            }
        }

        Ok(())
    }

    pub fn fan_idle_wait_ms(&self) -> u64 {
        u64::from(self.fan_idle_wait_min) * 60_000
    }

    pub fn fan_idle_run_ms(&self) -> u64 {
        u64::from(self.fan_idle_run_min) * 60_000
    }
}

/// User-facing thermostat state that survives a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermostatSettings {
    pub heat_setpoint_f: f32,
    pub cool_setpoint_f: f32,
    pub mode: Mode,
    pub force_furnace: bool,
    pub force_no_hp: bool,
}

impl Default for ThermostatSettings {
    fn default() -> Self {
        Self {
            heat_setpoint_f: DEFAULT_HEAT_SETPOINT_F,
            cool_setpoint_f: DEFAULT_COOL_SETPOINT_F,
            mode: Mode::Off,
            force_furnace: false,
            force_no_hp: false,
        }
    }
}

impl ThermostatSettings {
    pub fn sanitize(&mut self) {
        if !self.heat_setpoint_f.is_finite() {
            self.heat_setpoint_f = DEFAULT_HEAT_SETPOINT_F;
        }
        if !self.cool_setpoint_f.is_finite() {
            self.cool_setpoint_f = DEFAULT_COOL_SETPOINT_F;
        }
    }
}

/// Confirmation delays for the debounced sensor lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputTimingConfig {
    pub out_temp_ok_verify_ms: u64,
    pub defrost_mode_verify_ms: u64,
}

impl Default for InputTimingConfig {
    fn default() -> Self {
        Self {
            out_temp_ok_verify_ms: 4_000,
            defrost_mode_verify_ms: 2_000,
        }
    }
}

impl InputTimingConfig {
    pub fn verify_delay_ms(&self, input: Input) -> u64 {
        match input {
            Input::OutTempOk => self.out_temp_ok_verify_ms,
            Input::DefrostMode => self.defrost_mode_verify_ms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub controller: ControllerConfig,
    pub settings: ThermostatSettings,
    pub inputs: InputTimingConfig,
}

impl RuntimeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let mut runtime: Self = serde_json::from_str(json)?;
        runtime.settings.sanitize();
        runtime.controller.validate()?;
        Ok(runtime)
    }
}
