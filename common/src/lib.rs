pub mod config;
pub mod error;
pub mod input;
pub mod relay;
pub mod thermostat;
pub mod types;

pub use config::{ControllerConfig, InputTimingConfig, RuntimeConfig, ThermostatSettings};
pub use error::{ConfigError, ParseError};
pub use input::{DebouncedInput, EdgeLatch, InputBank, InputEvent, InputSignal, VerifyOutcome};
pub use relay::{PinRelay, RelayBank, RelayOutput};
pub use thermostat::ThermostatController;
pub use types::{Action, ControllerStatus, CoolLevel, HeatLevel, Input, Mode, Output, Stage};
