use std::{str::FromStr, time::Duration};

use anyhow::Context;
use tracing::{debug, info, warn};

use athermostat_common::{
    DebouncedInput, Input, InputBank, Mode, Output, PinRelay, RelayBank, RuntimeConfig,
    ThermostatController,
};

use crate::sim::{Plant, SimBoard, SimClock, SimInputPin, SimOutputPin};

type BoardController = ThermostatController<PinRelay<SimOutputPin>, DebouncedInput<SimInputPin>>;

const CONTROL_PERIOD: Duration = Duration::from_secs(1);
const INPUT_POLL_PERIOD: Duration = Duration::from_millis(500);
const STATUS_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
struct SimOptions {
    time_scale: u64,
    outdoor_f: f32,
    indoor_f: f32,
    /// Injects a contact bounce on the defrost line this often; 0 disables.
    glitch_every_s: u64,
}

impl SimOptions {
    fn from_env() -> Self {
        Self {
            time_scale: env_or("SIM_TIME_SCALE", 1),
            outdoor_f: env_or("SIM_OUTDOOR_F", 35.0),
            indoor_f: env_or("SIM_INDOOR_F", 66.0),
            glitch_every_s: env_or("SIM_GLITCH_EVERY_S", 0),
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut runtime = load_runtime_config().await?;
    if let Ok(raw) = std::env::var("THERMOSTAT_MODE") {
        runtime.settings.mode = raw
            .parse::<Mode>()
            .with_context(|| format!("invalid THERMOSTAT_MODE {raw:?}"))?;
    }
    let options = SimOptions::from_env();

    let clock = SimClock::new(options.time_scale);
    let mut board = SimBoard::new();
    let mut plant = Plant::new(options.indoor_f, options.outdoor_f);
    let mut controller = build_controller(&mut board, &runtime);

    let start_ms = clock.now_ms();
    plant.drive_inputs(&board, start_ms);
    controller.inputs_mut().init(start_ms);
    controller.set_current_temperature(plant.indoor_f(), start_ms);
    controller.begin(start_ms);
    info!(
        "controller running: mode={} indoor={:.1}F outdoor={:.1}F time_scale={}x",
        controller.mode(),
        plant.indoor_f(),
        plant.outdoor_f(),
        options.time_scale
    );

    let mut control = tokio::time::interval(CONTROL_PERIOD);
    let mut input_poll = tokio::time::interval(INPUT_POLL_PERIOD);
    let mut status = tokio::time::interval(STATUS_PERIOD);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut last_glitch_ms = start_ms;

    loop {
        tokio::select! {
            _ = control.tick() => {
                let now_ms = clock.now_ms();
                plant.step(now_ms, &board);
                plant.drive_inputs(&board, now_ms);

                let glitch_every_ms = options.glitch_every_s.saturating_mul(1000);
                if glitch_every_ms > 0 && now_ms.saturating_sub(last_glitch_ms) >= glitch_every_ms {
                    board.glitch(Input::DefrostMode, now_ms);
                    last_glitch_ms = now_ms;
                }

                controller.set_current_temperature(plant.indoor_f(), now_ms);
                controller.update(now_ms);
            }
            _ = input_poll.tick() => {
                for event in controller.inputs_mut().poll(clock.now_ms()) {
                    debug!("input {} verified: {:?}", event.input.as_str(), event.outcome);
                }
            }
            _ = status.tick() => log_status(&controller, clock.now_ms()),
            result = &mut shutdown => {
                if let Err(err) = result {
                    warn!("ctrl-c listener failed: {err}");
                }
                break;
            }
        }
    }

    controller.force_idle(clock.now_ms());
    info!("controller stopped, all relays off");
    Ok(())
}

/// Wires one relay per output and one debounced input per sensor line to
/// `board`, with the line interrupts feeding the inputs' edge latches.
fn build_controller(board: &mut SimBoard, runtime: &RuntimeConfig) -> BoardController {
    let relays = RelayBank::from_fn(|output| PinRelay::new(output, board.output_pin(output)));
    let inputs = InputBank::from_fn(|input| {
        DebouncedInput::new(
            input,
            board.input_pin(input),
            runtime.inputs.verify_delay_ms(input),
        )
    });
    for input in Input::ALL {
        board.attach_interrupt(input, inputs[input].edge_latch());
    }

    ThermostatController::new(
        runtime.controller.clone(),
        runtime.settings.clone(),
        relays,
        inputs,
    )
}

async fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let Ok(path) = std::env::var("THERMOSTAT_CONFIG") else {
        info!("THERMOSTAT_CONFIG not set, using default runtime config");
        return Ok(RuntimeConfig::default());
    };

    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read runtime config {path}"))?;
    RuntimeConfig::from_json_str(&raw).with_context(|| format!("invalid runtime config {path}"))
}

fn log_status(controller: &BoardController, now_ms: u64) {
    match serde_json::to_string(&controller.status(now_ms)) {
        Ok(body) => info!("status: {body}"),
        Err(err) => warn!("status serialization failed: {err}"),
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}
