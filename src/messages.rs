// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::motor::MotorTelemetry;

// Command from teleop/scripts -> runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DriveCommand {
    /// m/s, positive = forward
    pub linear: f32,
    /// rad/s, positive = counter-clockwise
    pub angular: f32,
}

// Limited velocities that were actually sent to the controller
// Has default values because we don't always have a command to follow
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct DriveActuation {
    pub linear: f32,
    pub angular: f32,
}

impl From<&DriveCommand> for DriveActuation {
    fn from(cmd: &DriveCommand) -> Self {
        Self {
            linear: cmd.linear,
            angular: cmd.angular,
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    LinkDown,
}

/// Telemetry snapshot for logging.
/// Velocities are wheel speeds in mm/s derived from the commanded duty cycles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TelemetryRecord {
    /// Tenths of a volt
    pub voltage: i16,
    pub duty_cycle_1: i16,
    pub duty_cycle_2: i16,
    pub current_1: i16,
    pub current_2: i16,
    pub velocity_1: i16,
    pub velocity_2: i16,
    pub temperature_1: i16,
    pub temperature_2: i16,
}

impl TelemetryRecord {
    /// Build a record from cached motor telemetry and wheel velocities (mm/s)
    pub fn from_telemetry(
        motor1: &MotorTelemetry,
        motor2: &MotorTelemetry,
        velocities: [i16; 2],
    ) -> Self {
        // Both channels report the same rail; prefer whichever has answered
        let voltage = if motor1.battery != 0 {
            motor1.battery
        } else {
            motor2.battery
        };
        Self {
            voltage,
            duty_cycle_1: motor1.duty_cycle,
            duty_cycle_2: motor2.duty_cycle,
            current_1: motor1.current,
            current_2: motor2.current,
            velocity_1: velocities[0],
            velocity_2: velocities[1],
            temperature_1: motor1.temperature,
            temperature_2: motor2.temperature,
        }
    }
}
