// Cached per-motor telemetry for one controller

use serde::Serialize;

use super::packet::{GetType, TargetId, TargetType};

/// One of the two motor channels of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motor {
    One,
    Two,
}

impl Motor {
    pub const ALL: [Motor; 2] = [Motor::One, Motor::Two];

    /// Map a user-facing selector (1 or 2) to a motor
    pub fn from_selector(selector: u8) -> Option<Self> {
        match selector {
            1 => Some(Motor::One),
            2 => Some(Motor::Two),
            _ => None,
        }
    }

    /// Resolve the addressing fields of a reply.
    /// Anything other than a motor output 1 or 2 has no destination.
    pub fn from_target(target_type: u8, target_id: u8) -> Option<Self> {
        if target_type != TargetType::Motor as u8 {
            return None;
        }
        match target_id {
            1 => Some(Motor::One),
            2 => Some(Motor::Two),
            _ => None,
        }
    }

    pub fn target_id(self) -> TargetId {
        match self {
            Motor::One => TargetId::One,
            Motor::Two => TargetId::Two,
        }
    }

    fn index(self) -> usize {
        match self {
            Motor::One => 0,
            Motor::Two => 1,
        }
    }
}

/// Last known readings of one motor channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MotorTelemetry {
    /// -2047..=2047
    pub duty_cycle: i16,
    /// Tenths of a volt
    pub battery: i16,
    /// Amps
    pub current: i16,
    /// Degrees Celsius
    pub temperature: i16,
}

impl MotorTelemetry {
    /// Store a reading in the field matching the request that produced it
    pub fn apply(&mut self, kind: GetType, value: i16) {
        match kind {
            GetType::DutyCycle => self.duty_cycle = value,
            GetType::Battery => self.battery = value,
            GetType::Current => self.current = value,
            GetType::Temperature => self.temperature = value,
        }
    }
}

/// Telemetry for both channels of a controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryStore {
    motors: [MotorTelemetry; 2],
}

impl TelemetryStore {
    pub fn get(&self, motor: Motor) -> &MotorTelemetry {
        &self.motors[motor.index()]
    }

    pub(crate) fn get_mut(&mut self, motor: Motor) -> &mut MotorTelemetry {
        &mut self.motors[motor.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_mapping() {
        assert_eq!(Motor::from_selector(1), Some(Motor::One));
        assert_eq!(Motor::from_selector(2), Some(Motor::Two));
        assert_eq!(Motor::from_selector(0), None);
        assert_eq!(Motor::from_selector(3), None);
    }

    #[test]
    fn test_target_resolution_fails_closed() {
        assert_eq!(Motor::from_target(b'M', 1), Some(Motor::One));
        assert_eq!(Motor::from_target(b'M', 2), Some(Motor::Two));
        assert_eq!(Motor::from_target(b'M', b'*'), None);
        assert_eq!(Motor::from_target(b'P', 1), None);
    }

    #[test]
    fn test_apply_routes_duty_cycle() {
        let mut telemetry = MotorTelemetry::default();
        telemetry.apply(GetType::DutyCycle, -512);
        assert_eq!(telemetry.duty_cycle, -512);
        assert_eq!(telemetry.temperature, 0);
    }
}
