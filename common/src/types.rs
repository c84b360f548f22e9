use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// User-selected operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Off,
    Heat,
    Cool,
    HeatCool,
    FanOnly,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Heat => "heat",
            Self::Cool => "cool",
            Self::HeatCool => "heat_cool",
            Self::FanOnly => "fan_only",
        }
    }
}

impl FromStr for Mode {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "heat" => Ok(Self::Heat),
            "cool" => Ok(Self::Cool),
            "heat_cool" => Ok(Self::HeatCool),
            "fan_only" => Ok(Self::FanOnly),
            _ => Err(ParseError::UnknownMode(value.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the system is doing right now, as decided by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Off,
    Idle,
    Heating,
    Cooling,
    #[serde(rename = "fan")]
    FanRunning,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Idle => "idle",
            Self::Heating => "heating",
            Self::Cooling => "cooling",
            Self::FanRunning => "fan",
        }
    }

    /// Heating or cooling: the actions guarded by min-on, min-off and max-run.
    pub fn is_conditioning(self) -> bool {
        matches!(self, Self::Heating | Self::Cooling)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatLevel {
    Idle,
    HpLow,
    HpHigh,
    FurnaceLow,
    FurnaceHigh,
    Defrost,
}

impl HeatLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::HpLow => "hp_low",
            Self::HpHigh => "hp_high",
            Self::FurnaceLow => "furnace_low",
            Self::FurnaceHigh => "furnace_high",
            Self::Defrost => "defrost",
        }
    }

    pub fn is_heat_pump(self) -> bool {
        matches!(self, Self::HpLow | Self::HpHigh)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoolLevel {
    Idle,
    Cool,
    CoolSupp,
}

impl CoolLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Cool => "cool",
            Self::CoolSupp => "cool_supp",
        }
    }
}

/// The single relay configuration the equipment is in.
///
/// Heating and cooling stages share one enum so that a heat stage and a cool
/// stage can never be active at the same time. [`Stage::heat_level`] and
/// [`Stage::cool_level`] project it onto the reported levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    HpLow,
    HpHigh,
    FurnaceLow,
    FurnaceHigh,
    Defrost,
    Cool,
    CoolSupp,
}

impl Stage {
    pub fn heat_level(self) -> HeatLevel {
        match self {
            Self::HpLow => HeatLevel::HpLow,
            Self::HpHigh => HeatLevel::HpHigh,
            Self::FurnaceLow => HeatLevel::FurnaceLow,
            Self::FurnaceHigh => HeatLevel::FurnaceHigh,
            Self::Defrost => HeatLevel::Defrost,
            Self::Idle | Self::Cool | Self::CoolSupp => HeatLevel::Idle,
        }
    }

    pub fn cool_level(self) -> CoolLevel {
        match self {
            Self::Cool => CoolLevel::Cool,
            Self::CoolSupp => CoolLevel::CoolSupp,
            Self::Idle
            | Self::HpLow
            | Self::HpHigh
            | Self::FurnaceLow
            | Self::FurnaceHigh
            | Self::Defrost => CoolLevel::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cool | Self::CoolSupp => self.cool_level().as_str(),
            _ => self.heat_level().as_str(),
        }
    }

    /// Relays that must be energised in this stage; every other relay is off.
    pub fn relays(self) -> &'static [Output] {
        use Output::*;
        match self {
            Self::Idle => &[],
            Self::HpLow => &[Fan1, FurnCoolLow, Comp1],
            Self::HpHigh => &[Fan1, FurnCoolLow, Comp1, Comp2],
            Self::FurnaceLow => &[Fan1, W1],
            Self::FurnaceHigh => &[Fan1, W1, W2],
            Self::Defrost => &[Fan1, FurnCoolLow, W1, Comp1],
            Self::Cool => &[Fan1, Rev, FurnCoolLow, Comp1],
            Self::CoolSupp => &[Fan1, Rev, FurnCoolLow, FurnCoolHigh, Comp1, Comp2],
        }
    }
}

impl From<HeatLevel> for Stage {
    fn from(level: HeatLevel) -> Self {
        match level {
            HeatLevel::Idle => Self::Idle,
            HeatLevel::HpLow => Self::HpLow,
            HeatLevel::HpHigh => Self::HpHigh,
            HeatLevel::FurnaceLow => Self::FurnaceLow,
            HeatLevel::FurnaceHigh => Self::FurnaceHigh,
            HeatLevel::Defrost => Self::Defrost,
        }
    }
}

impl From<CoolLevel> for Stage {
    fn from(level: CoolLevel) -> Self {
        match level {
            CoolLevel::Idle => Self::Idle,
            CoolLevel::Cool => Self::Cool,
            CoolLevel::CoolSupp => Self::CoolSupp,
        }
    }
}

/// Relay output lines, in board order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Output {
    /// Blower fan.
    Fan1,
    /// Reversing valve (cooling).
    Rev,
    /// Heat-pump / low-stage cooling call.
    FurnCoolLow,
    /// High-stage cooling call.
    FurnCoolHigh,
    /// Furnace stage 1.
    W1,
    /// Furnace stage 2.
    W2,
    Comp1,
    Comp2,
}

impl Output {
    pub const COUNT: usize = 8;

    pub const ALL: [Output; Self::COUNT] = [
        Self::Fan1,
        Self::Rev,
        Self::FurnCoolLow,
        Self::FurnCoolHigh,
        Self::W1,
        Self::W2,
        Self::Comp1,
        Self::Comp2,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fan1 => "fan1",
            Self::Rev => "rev",
            Self::FurnCoolLow => "furn_cool_low",
            Self::FurnCoolHigh => "furn_cool_high",
            Self::W1 => "w1",
            Self::W2 => "w2",
            Self::Comp1 => "comp1",
            Self::Comp2 => "comp2",
        }
    }
}

impl FromStr for Output {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|output| output.as_str() == value)
            .ok_or_else(|| ParseError::UnknownOutput(value.to_string()))
    }
}

/// Debounced digital sensor lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Input {
    /// Outdoor temperature is high enough for the heat pump.
    OutTempOk,
    /// The outdoor unit is running a defrost cycle.
    DefrostMode,
}

impl Input {
    pub const COUNT: usize = 2;

    pub const ALL: [Input; Self::COUNT] = [Self::OutTempOk, Self::DefrostMode];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OutTempOk => "out_temp_ok",
            Self::DefrostMode => "defrost_mode",
        }
    }
}

impl FromStr for Input {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|input| input.as_str() == value)
            .ok_or_else(|| ParseError::UnknownInput(value.to_string()))
    }
}

/// Status document served to the API and published on the state topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub mode: &'static str,
    pub action: &'static str,
    pub heat_level: &'static str,
    pub cool_level: &'static str,
    pub current_temp: Option<f32>,
    pub heat_setpoint: f32,
    pub cool_setpoint: f32,
    pub force_furnace: bool,
    pub force_no_hp: bool,
    pub defrost: bool,
    pub runtime_ms: u64,
    pub outputs: BTreeMap<&'static str, bool>,
    pub inputs: BTreeMap<&'static str, bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names_round_trip() {
        for mode in [
            Mode::Off,
            Mode::Heat,
            Mode::Cool,
            Mode::HeatCool,
            Mode::FanOnly,
        ] {
            assert_eq!(mode.as_str().parse::<Mode>().unwrap(), mode);
        }
        assert_eq!(" HEAT_COOL ".parse::<Mode>().unwrap(), Mode::HeatCool);
        assert!(matches!(
            "auto".parse::<Mode>(),
            Err(ParseError::UnknownMode(_))
        ));
    }

    #[test]
    fn serde_names_match_status_names() {
        assert_eq!(
            serde_json::to_string(&Mode::HeatCool).unwrap(),
            "\"heat_cool\""
        );
        assert_eq!(
            serde_json::to_string(&Action::FanRunning).unwrap(),
            "\"fan\""
        );
        assert_eq!(
            serde_json::to_string(&HeatLevel::FurnaceHigh).unwrap(),
            "\"furnace_high\""
        );
    }

    #[test]
    fn stage_projects_onto_exactly_one_level() {
        let stages = [
            Stage::Idle,
            Stage::HpLow,
            Stage::HpHigh,
            Stage::FurnaceLow,
            Stage::FurnaceHigh,
            Stage::Defrost,
            Stage::Cool,
            Stage::CoolSupp,
        ];
        for stage in stages {
            assert!(
                stage.heat_level() == HeatLevel::Idle || stage.cool_level() == CoolLevel::Idle,
                "{stage:?} reports both a heat and a cool level"
            );
        }
    }

    #[test]
    fn relay_table_matches_wiring() {
        use Output::*;
        assert_eq!(Stage::HpLow.relays(), &[Fan1, FurnCoolLow, Comp1]);
        assert_eq!(Stage::Defrost.relays(), &[Fan1, FurnCoolLow, W1, Comp1]);
        assert_eq!(
            Stage::CoolSupp.relays(),
            &[Fan1, Rev, FurnCoolLow, FurnCoolHigh, Comp1, Comp2]
        );
        assert!(Stage::Idle.relays().is_empty());
        // Furnace stages never run a compressor and heating never reverses the valve.
        for stage in [Stage::FurnaceLow, Stage::FurnaceHigh] {
            assert!(!stage.relays().contains(&Comp1));
        }
        for stage in [Stage::HpLow, Stage::HpHigh, Stage::Defrost] {
            assert!(!stage.relays().contains(&Rev));
        }
    }

    #[test]
    fn io_names_resolve() {
        for output in Output::ALL {
            assert_eq!(output.as_str().parse::<Output>().unwrap(), output);
            assert_eq!(Output::ALL[output.index()], output);
        }
        assert_eq!("defrost_mode".parse::<Input>().unwrap(), Input::DefrostMode);
        assert!("fan2".parse::<Output>().is_err());
    }
}
