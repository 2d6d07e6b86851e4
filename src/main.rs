use bevy::app::ScheduleRunnerPlugin;
use bevy::log::LogPlugin;
use bevy::prelude::*;
use std::path::Path;
use std::time::Duration;

use serial_lines::config::{CONFIG_FILE, SerialLinesConfig};
use serial_lines::serial::{SerialLine, SerialLines, SerialLinesPlugin, SerialValues};

/// drain interval for remembered lines
#[derive(Resource)]
pub struct DrainTimer(Timer);

/// column shown by [`show_column_value`]
#[derive(Resource)]
pub struct ValueColumn(usize);

fn main() -> serial_lines::error::Result<()> {
    let config = SerialLinesConfig::load_or_default(CONFIG_FILE);
    if !Path::new(CONFIG_FILE).exists() {
        config.save(CONFIG_FILE)?;
    }

    App::new()
        .add_plugins(
            MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f64(
                1.0 / 60.0,
            ))),
        )
        .add_plugins(LogPlugin::default())
        .add_plugins(SerialLinesPlugin::new(config)?)
        .insert_resource(DrainTimer(Timer::new(
            Duration::from_secs(2),
            TimerMode::Repeating,
        )))
        .insert_resource(ValueColumn(0))
        .add_systems(Update, (show_last_line, show_column_value, drain_lines))
        .run();
    Ok(())
}

fn show_last_line(mut lines: MessageReader<SerialLine>) {
    if let Some(last) = lines.read().last() {
        info!(
            "[{}] Last line: {}",
            last.received_at.format("%H:%M:%S%.3f"),
            last.line
        );
    }
}

fn show_column_value(mut values: MessageReader<SerialValues>, column: Res<ValueColumn>) {
    for values in values.read() {
        if let Some(value) = values.value(column.0) {
            info!("Last value [{}]: {}", column.0, value);
        }
    }
}

fn drain_lines(serial: Option<Res<SerialLines>>, mut timer: ResMut<DrainTimer>, time: Res<Time>) {
    if !timer.0.tick(time.delta()).just_finished() {
        return;
    }
    let Some(serial) = serial else {
        return;
    };
    let lines = serial.drain_all(false);
    if !lines.is_empty() {
        info!(
            "Consumed {} remembered lines from {}",
            lines.len(),
            serial.port_name().unwrap_or("serial port")
        );
    }
}
