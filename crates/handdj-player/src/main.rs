//! HandDJ Player - live-steered track playback
//!
//! Decodes a track, hands it to the engine and reads commands from stdin.
//! A gesture tracker (or anything else) can drive it by writing
//! `feed <control> <value>` lines.
//!
//! ## Usage
//!
//! ```text
//! handdj-player <track> [--config <path>] [--export <out.wav>]
//! ```
//!
//! ## Commands
//!
//! - `play [secs]`, `pause`, `resume`, `stop`, `seek <secs>`
//! - `set <param> <value>` - volume, speed, pitch, reverb, treble
//! - `feed <control> <raw>` - smoothed control reading (pitch, reverb, volume)
//! - `reset`, `status`, `export <path>`, `quit`

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam::channel::Receiver;

use handdj_core::audio::{OutputDevice, SimulatedDevice};
use handdj_core::config::{default_config_path, load_config, EngineConfig};
use handdj_core::control::Control;
use handdj_core::playback::{ChannelObserver, PlaybackEvent, PlaybackStatus};
use handdj_core::{AudioEngine, ParamName};

struct Args {
    track: PathBuf,
    config: Option<PathBuf>,
    export: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut track = None;
    let mut config = None;
    let mut export = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(args.next().context("--config needs a path")?)),
            "--export" => export = Some(PathBuf::from(args.next().context("--export needs a path")?)),
            other if other.starts_with("--") => bail!("Unknown flag: {}", other),
            other => track = Some(PathBuf::from(other)),
        }
    }

    Ok(Args {
        track: track.context("usage: handdj-player <track> [--config <path>] [--export <out.wav>]")?,
        config,
        export,
    })
}

#[cfg(feature = "cpal-backend")]
fn open_device() -> Box<dyn OutputDevice> {
    match handdj_core::audio::CpalDevice::open_default() {
        Ok(device) => {
            log::info!("Audio output: {} at {} Hz", device.name(), device.device_rate());
            Box::new(device)
        }
        Err(e) => {
            log::warn!("Could not open audio output ({}), using simulated device", e);
            Box::new(SimulatedDevice::new())
        }
    }
}

#[cfg(not(feature = "cpal-backend"))]
fn open_device() -> Box<dyn OutputDevice> {
    log::warn!("Built without cpal-backend: using simulated device (no sound)");
    Box::new(SimulatedDevice::new())
}

/// Log engine events as they arrive
fn spawn_event_logger(rx: Receiver<PlaybackEvent>) {
    thread::Builder::new()
        .name("handdj-events".to_string())
        .spawn(move || {
            for event in rx.iter() {
                match event {
                    PlaybackEvent::Status(PlaybackStatus::Error(msg)) => log::error!("Status: Error: {}", msg),
                    PlaybackEvent::Status(status) => log::info!("Status: {}", status),
                    PlaybackEvent::Progress {
                        position_secs,
                        duration_secs,
                    } => log::debug!("Progress: {:.1}s / {:.1}s", position_secs, duration_secs),
                }
            }
        })
        .expect("Failed to spawn event logger thread");
}

/// Run one stdin command; returns false on quit
fn run_command(engine: &AudioEngine, line: &str) -> Result<bool> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Ok(true);
    };
    let mut number = |what: &str| -> Result<f32> {
        parts
            .next()
            .ok_or_else(|| anyhow!("{} needs {}", command, what))?
            .parse::<f32>()
            .with_context(|| format!("{} is not a number", what))
    };

    match command {
        "play" => {
            let start = if line.split_whitespace().count() > 1 {
                number("a start position")?
            } else {
                0.0
            };
            engine.play(start as f64)?;
        }
        "pause" => {
            if !engine.pause() {
                println!("not playing");
            }
        }
        "resume" => {
            if !engine.resume() {
                println!("not paused");
            }
        }
        "stop" => engine.stop(),
        "seek" => engine.seek(number("a position")? as f64)?,
        "set" => {
            let name: ParamName = parts.next().context("set needs a parameter name")?.parse()?;
            let value = parts
                .next()
                .context("set needs a value")?
                .parse::<f32>()
                .context("value is not a number")?;
            let stored = engine.set_parameter(name, value)?;
            println!("{} = {:.3}", name, stored);
        }
        "feed" => {
            let control: Control = parts.next().context("feed needs a control name")?.parse()?;
            let raw = parts
                .next()
                .context("feed needs a value")?
                .parse::<f32>()
                .context("value is not a number")?;
            engine.feed(control, raw)?;
        }
        "reset" => engine.reset_parameters(),
        "status" => {
            let params = engine.parameters();
            println!(
                "{:?} {:.1}s / {:.1}s ({:.0}%) | vol {:.2} speed {:.2} pitch {:.2} reverb {:.2} treble {:+.1} dB",
                engine.state(),
                engine.get_position(),
                engine.get_duration(),
                engine.progress(),
                params.volume,
                params.speed,
                params.pitch,
                params.reverb_amount,
                params.treble_db
            );
        }
        "export" => {
            let path = parts.next().context("export needs a path")?;
            engine.export_wav(&PathBuf::from(path))?;
            println!("exported to {}", path);
        }
        "quit" | "exit" => return Ok(false),
        other => println!("unknown command: {}", other),
    }
    Ok(true)
}

fn main() -> Result<()> {
    // Set RUST_LOG=debug for render and progress detail
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    log::info!("handdj-player starting up");

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let config: EngineConfig = load_config(&config_path);

    let (observer, events) = ChannelObserver::new();
    spawn_event_logger(events);

    let engine = AudioEngine::new(&config, open_device(), Arc::new(observer));
    engine
        .load_file(&args.track)
        .with_context(|| format!("Failed to load {:?}", args.track))?;

    if let Some(out) = &args.export {
        engine
            .export_wav(out)
            .with_context(|| format!("Failed to export {:?}", out))?;
        log::info!("Exported to {:?}", out);
        engine.cleanup();
        return Ok(());
    }

    engine.play(0.0).context("Failed to start playback")?;
    println!("Commands: play [s] | pause | resume | stop | seek <s> | set <param> <v> | feed <control> <raw> | reset | status | export <path> | quit");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        match run_command(&engine, line.trim()) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("error: {:#}", e),
        }
    }

    engine.cleanup();
    log::info!("handdj-player shut down");
    Ok(())
}
