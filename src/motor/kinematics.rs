// Differential drive inverse kinematics for a two-channel base
// Converts body-frame velocities (linear, angular) to left/right duty cycles.

use super::packet::MAX_VALUE;

/// Drive geometry
pub const WHEEL_BASE: f32 = 0.40; // meters (distance between wheels)
pub const MAX_WHEEL_SPEED: f32 = 1.5; // m/s reached at full duty cycle

/// Duty cycle commands for the two motor channels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WheelDuty {
    pub left: i16,  // Motor 1
    pub right: i16, // Motor 2
}

impl WheelDuty {
    pub fn new(left: i16, right: i16) -> Self {
        Self { left, right }
    }

    pub fn zero() -> Self {
        Self::default()
    }
}

/// Convert a wheel speed in m/s to a duty cycle
fn speed_to_duty(speed: f32, max_wheel_speed: f32) -> i16 {
    let duty = (speed / max_wheel_speed * MAX_VALUE as f32).round() as i32;
    duty.clamp(-(MAX_VALUE as i32), MAX_VALUE as i32) as i16
}

/// Convert body-frame velocities to wheel duty cycles
///
/// # Arguments
/// * `linear` - Forward velocity in m/s (positive = forward)
/// * `angular` - Rotational velocity in rad/s (positive = counter-clockwise)
pub fn body_to_wheel_duty(linear: f32, angular: f32) -> WheelDuty {
    body_to_wheel_duty_with_params(linear, angular, WHEEL_BASE, MAX_WHEEL_SPEED)
}

/// Convert body-frame velocities to wheel duty cycles with custom geometry
pub fn body_to_wheel_duty_with_params(
    linear: f32,
    angular: f32,
    wheel_base: f32,
    max_wheel_speed: f32,
) -> WheelDuty {
    let half_track = wheel_base / 2.0;
    let mut left = linear - angular * half_track;
    let mut right = linear + angular * half_track;

    // Scale both wheels together so turning keeps its curvature at saturation
    let peak = left.abs().max(right.abs());
    if peak > max_wheel_speed {
        let scale = max_wheel_speed / peak;
        left *= scale;
        right *= scale;
    }

    WheelDuty {
        left: speed_to_duty(left, max_wheel_speed),
        right: speed_to_duty(right, max_wheel_speed),
    }
}

/// Convert wheel duty cycles back to wheel speeds in m/s
pub fn duty_to_speed(duty: i16) -> f32 {
    duty as f32 / MAX_VALUE as f32 * MAX_WHEEL_SPEED
}
