//! live-voice: duplex voice session host.
//!
//! Runs as a child process and talks JSON lines on stdin/stdout. Logs go to
//! stderr (and optionally a rolling file) so stdout stays a clean event
//! channel.

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use live_voice::audio::{list_devices, list_output_devices};
use live_voice::config::{api_key_from_env, get_config_path, read_live_config};
use live_voice::ipc::bridge::{emit_event, spawn_stdin_reader};
use live_voice::ipc::{AudioDeviceInfo, LiveCommand, LiveEvent};
use live_voice::{DeviceBackend, SessionController};

/// Directory for the optional rolling log file.
const LOG_DIR_VAR: &str = "LIVE_VOICE_LOG_DIR";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing()?;

    // Emit starting event immediately so the parent knows we're alive.
    emit_event(&LiveEvent::Starting {});

    let config = read_live_config();
    info!(path = %get_config_path().display(), ?config, "Configuration loaded");

    let api_key = api_key_from_env();
    if api_key.is_none() {
        warn!("No API key in GEMINI_API_KEY or API_KEY; connecting will fail");
    }

    let backend = DeviceBackend::with_endpoint(
        config.output_device.clone(),
        &config.endpoint,
        api_key,
        config.connect_timeout(),
    );
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let mut controller =
        SessionController::new(backend, config.session_settings(), events_tx, updates_tx);

    let mut cmd_rx = spawn_stdin_reader();

    emit_event(&LiveEvent::Ready {});
    emit_event(&controller.snapshot());
    info!("Live voice ready");

    // One loop owns the controller; every input is handled to completion
    // before the next one is looked at.
    loop {
        tokio::select! {
            Some(envelope) = events_rx.recv() => {
                controller.handle_event(envelope);
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(command) => {
                        if !handle_command(&mut controller, command) {
                            break;
                        }
                    }
                    None => {
                        info!("stdin closed, shutting down");
                        break;
                    }
                }
            }
        }
        flush_updates(&mut updates_rx);
    }

    controller.disconnect();
    flush_updates(&mut updates_rx);
    info!("Live voice shutting down");
    Ok(())
}

/// stderr always; a daily rolling file too when `LIVE_VOICE_LOG_DIR` is set.
/// The returned guard must live until exit so buffered lines get written.
fn init_tracing() -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match std::env::var_os(LOG_DIR_VAR) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "live-voice.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}

fn flush_updates(updates: &mut mpsc::UnboundedReceiver<LiveEvent>) {
    while let Ok(event) = updates.try_recv() {
        emit_event(&event);
    }
}

/// Handle a single command from the parent process.
/// Returns `false` if the main loop should exit.
fn handle_command(controller: &mut SessionController<DeviceBackend>, cmd: LiveCommand) -> bool {
    match cmd {
        LiveCommand::Ping {} => {
            emit_event(&LiveEvent::Pong {});
        }

        LiveCommand::Stop {} => {
            emit_event(&LiveEvent::Stopping {});
            return false;
        }

        LiveCommand::Toggle {} => controller.toggle(),
        LiveCommand::Connect {} => controller.connect(),
        LiveCommand::Disconnect {} => controller.disconnect(),
        LiveCommand::ClearTranscript {} => controller.clear_transcript(),

        LiveCommand::GetState {} => {
            emit_event(&controller.snapshot());
        }

        LiveCommand::GetSpectrum {} => {
            let snapshot = controller.spectrum().unwrap_or_default();
            emit_event(&LiveEvent::Spectrum {
                bins: snapshot.bins,
                intensity: snapshot.intensity,
            });
        }

        LiveCommand::ListAudioDevices {} => {
            emit_event(&LiveEvent::AudioDevices {
                input: AudioDeviceInfo::from_names(list_devices()),
                output: AudioDeviceInfo::from_names(list_output_devices()),
            });
        }
    }

    true
}
