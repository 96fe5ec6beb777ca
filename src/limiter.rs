// Cascaded speed limiter: jerk, then acceleration, then velocity
//
// Each control tick takes a raw velocity target and a monotonically increasing
// tick counter and returns the bounded velocity plus the factor that was applied.
// The order of the stages matters: later stages may tighten what earlier ones
// produced, so swapping them changes the reachable trajectories.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default tick counter frequency (1 kHz millisecond ticks)
pub const DEFAULT_TICK_FREQUENCY: u32 = 1000;

/// Default gap after which the command input is considered lost (seconds)
pub const DEFAULT_INPUT_TIMEOUT: f32 = 0.1;

/// Kinematic bounds of one axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedLimiterConfig {
    pub min_vel: f32,
    pub max_vel: f32,
    pub min_acc: f32,
    pub max_acc: f32,
    pub min_jerk: f32,
    pub max_jerk: f32,
}

impl SpeedLimiterConfig {
    /// Same bound in both directions for every quantity
    pub fn symmetric(vel: f32, acc: f32, jerk: f32) -> Self {
        Self {
            min_vel: -vel,
            max_vel: vel,
            min_acc: -acc,
            max_acc: acc,
            min_jerk: -jerk,
            max_jerk: jerk,
        }
    }
}

/// Output of one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limited {
    pub velocity: f32,
    /// Ratio of the output to the pre-cascade velocity (1.0 if that was zero).
    /// The initializing tick and a stale-input reset also report 1.0 while the
    /// velocity is held at rest, whatever the target was.
    pub factor: f32,
}

impl Limited {
    fn unscaled(velocity: f32) -> Self {
        Self {
            velocity,
            factor: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Uninitialized,
    Active,
}

/// Per-instance history
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LimiterState {
    /// Latest output velocity
    pub v: f32,
    /// Previous output
    pub v0: f32,
    /// Output before v0
    pub v1: f32,
    /// Seconds between the last two ticks
    pub dt: f32,
    pub last_tick: u32,
    pub current_tick: u32,
    pub phase: Phase,
}

impl LimiterState {
    fn clear_history(&mut self) {
        self.v = 0.0;
        self.v0 = 0.0;
        self.v1 = 0.0;
        self.dt = 0.0;
    }
}

/// Jerk/acceleration/velocity limiter for one axis
#[derive(Debug, Clone)]
pub struct SpeedLimiter {
    config: SpeedLimiterConfig,
    frequency: u32,
    input_timeout: f32,
    exponential_mapping: bool,
    state: LimiterState,
}

impl SpeedLimiter {
    pub fn new(config: SpeedLimiterConfig) -> Self {
        Self {
            config,
            frequency: DEFAULT_TICK_FREQUENCY,
            input_timeout: DEFAULT_INPUT_TIMEOUT,
            exponential_mapping: false,
            state: LimiterState::default(),
        }
    }

    /// Frequency of the tick counter passed to [`SpeedLimiter::limit`]
    pub fn with_frequency(mut self, frequency: u32) -> Self {
        self.frequency = frequency.max(1);
        self
    }

    /// Inter-tick gap (seconds) after which history is reset
    pub fn with_input_timeout(mut self, seconds: f32) -> Self {
        self.input_timeout = seconds;
        self
    }

    /// Compress the response near zero for finer low speed control
    pub fn with_exponential_mapping(mut self, enabled: bool) -> Self {
        self.exponential_mapping = enabled;
        self
    }

    pub fn config(&self) -> &SpeedLimiterConfig {
        &self.config
    }

    pub fn state(&self) -> &LimiterState {
        &self.state
    }

    /// Forget all history, keeping the configuration
    pub fn reset(&mut self) {
        self.state = LimiterState::default();
    }

    /// Bound `target` for the tick `tick`
    pub fn limit(&mut self, target: f32, tick: u32) -> Limited {
        let state = &mut self.state;
        state.current_tick = tick;

        if state.phase == Phase::Uninitialized {
            state.last_tick = tick;
            state.phase = Phase::Active;
            state.v = state.v0;
            return Limited::unscaled(state.v);
        }

        state.dt = tick.wrapping_sub(state.last_tick) as f32 / self.frequency as f32;

        if state.dt > self.input_timeout {
            debug!(
                "Speed limiter input stale ({:.3}s > {:.3}s), resetting history",
                state.dt, self.input_timeout
            );
            state.clear_history();
            state.last_tick = tick;
            return Limited::unscaled(state.v);
        }

        let mut v = target;
        if self.exponential_mapping {
            v = exponential_map(v, &self.config);
        }

        let pre_cascade = v;
        let (v0, v1, dt) = (state.v0, state.v1, state.dt);
        let cfg = &self.config;
        limit_jerk(&mut v, v0, v1, dt, cfg.min_jerk, cfg.max_jerk);
        limit_acceleration(&mut v, v0, dt, cfg.min_acc, cfg.max_acc);
        limit_velocity(&mut v, cfg.min_vel, cfg.max_vel);

        state.last_tick = tick;
        state.v = v;
        state.v1 = v0;
        state.v0 = v;

        Limited {
            velocity: v,
            factor: scale_factor(pre_cascade, v),
        }
    }
}

/// Lower bound first, then upper; an inverted pair yields `max` instead of panicking
fn bound(x: f32, min: f32, max: f32) -> f32 {
    x.max(min).min(max)
}

fn scale_factor(before: f32, after: f32) -> f32 {
    if before != 0.0 { after / before } else { 1.0 }
}

/// v * |v / norm|^3, keeping the sign of v
fn exponential_map(v: f32, config: &SpeedLimiterConfig) -> f32 {
    let norm = if v > 0.0 {
        config.max_vel
    } else {
        config.min_vel.abs()
    };
    if norm == 0.0 {
        return v;
    }
    v * (v / norm).abs().powi(3)
}

/// Bound the change of acceleration between ticks
fn limit_jerk(v: &mut f32, v0: f32, v1: f32, dt: f32, j_min: f32, j_max: f32) -> f32 {
    let before = *v;

    let dv = *v - v0;
    let dv0 = v0 - v1;

    let dt2 = 2.0 * dt * dt;
    let da = bound(dv - dv0, j_min * dt2, j_max * dt2);

    *v = v0 + dv0 + da;
    scale_factor(before, *v)
}

/// Bound the velocity change between ticks
fn limit_acceleration(v: &mut f32, v0: f32, dt: f32, a_min: f32, a_max: f32) -> f32 {
    let before = *v;

    let dv = bound(*v - v0, a_min * dt, a_max * dt);

    *v = v0 + dv;
    scale_factor(before, *v)
}

fn limit_velocity(v: &mut f32, v_min: f32, v_max: f32) -> f32 {
    let before = *v;
    *v = bound(*v, v_min, v_max);
    scale_factor(before, *v)
}
