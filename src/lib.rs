//! Sabertooth dual-motor drive runtime.
//!
//! Packet Serial codec and controller API in [`motor`], the cascaded
//! jerk/acceleration/velocity limiter in [`limiter`], and the zenoh-driven
//! control loop in [`runtime`].

pub mod config;
pub mod limiter;
pub mod messages;
pub mod motor;
pub mod runtime;
