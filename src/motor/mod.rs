// Motor control module for a Sabertooth dual-channel base
//
// Provides:
// - Packet Serial frame codec (pure, no I/O)
// - Serial transport with bounded reply waits
// - High-level controller API and cached telemetry
// - Differential drive kinematics (body velocity -> duty cycles)
// - A simulated controller for running without hardware

pub mod kinematics;
pub mod packet;
pub mod sabertooth;
pub mod sim;
mod state;
pub mod transport;

pub use kinematics::{WheelDuty, body_to_wheel_duty};
pub use sabertooth::{DEFAULT_ADDRESS, Reading, Sabertooth};
pub use sim::SimulatedController;
pub use state::{Motor, MotorTelemetry, TelemetryStore};
pub use transport::{SabertoothError, SerialTransport, Transport};
