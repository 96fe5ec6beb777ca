// High-level command API for a Sabertooth dual motor controller
//
// Owns the controller address, the link and the cached telemetry. SET commands
// are fire-and-forget; every GET waits (bounded) for its reply before the next
// request goes out, since replies carry no correlation id.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::packet::{
    GetType, SetType, TargetId, TargetType, clamp_value, decode_reply_from, encode_get, encode_set,
};
use super::state::{Motor, MotorTelemetry, TelemetryStore};
use super::transport::{Result, SabertoothError, Transport};

/// Default Packet Serial address of a Sabertooth
pub const DEFAULT_ADDRESS: u8 = 128;

/// Default upper bound on the wait for a GET reply
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(50);

const SHUTDOWN_VALUE: i16 = 1;
const STARTUP_VALUE: i16 = 0;

/// A validated reading that was written to the telemetry store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub motor: Motor,
    pub kind: GetType,
    pub value: i16,
}

/// Handle on one controller on the serial bus
pub struct Sabertooth<T: Transport> {
    address: u8,
    transport: T,
    telemetry: TelemetryStore,
    reply_timeout: Duration,
    rejected_replies: u64,
}

impl<T: Transport> Sabertooth<T> {
    /// Create a handle for the controller at `address`
    pub fn new(transport: T, address: u8) -> Self {
        info!("Sabertooth handle at address {}", address);
        Self {
            address,
            transport,
            telemetry: TelemetryStore::default(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            rejected_replies: 0,
        }
    }

    /// Override the bounded wait used for GET replies
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Cached telemetry of a motor
    pub fn telemetry(&self, motor: Motor) -> &MotorTelemetry {
        self.telemetry.get(motor)
    }

    /// Number of received frames that failed validation or routing
    pub fn rejected_replies(&self) -> u64 {
        self.rejected_replies
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Set the power of a motor (selector 1 or 2), between -2047 and 2047.
    /// Out of range power is clamped; an invalid selector sends nothing.
    pub fn throttle(&mut self, motor: u8, power: i16) -> Result<()> {
        let Some(motor) = Motor::from_selector(motor) else {
            warn!("Ignoring throttle for invalid motor selector {}", motor);
            return Ok(());
        };
        let power = clamp_value(power);
        self.telemetry.get_mut(motor).duty_cycle = power;
        self.send_set(SetType::Value, motor.target_id(), power)
    }

    /// Stop both motors
    pub fn stop(&mut self) -> Result<()> {
        self.throttle(1, 0)?;
        self.throttle(2, 0)
    }

    /// Put both motors in hard brake state
    pub fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down motors on controller {}", self.address);
        self.send_set(SetType::Shutdown, TargetId::Both, SHUTDOWN_VALUE)
    }

    /// Return both motors from shutdown to normal operation
    pub fn startup(&mut self) -> Result<()> {
        info!("Starting up motors on controller {}", self.address);
        self.send_set(SetType::Shutdown, TargetId::Both, STARTUP_VALUE)
    }

    /// Set the serial watchdog in milliseconds.
    /// 0 uses the controller's configured default, a negative value disables it.
    pub fn set_timeout(&mut self, value: i16) -> Result<()> {
        self.send_set(SetType::Timeout, TargetId::Both, clamp_value(value))
    }

    /// Reset the serial watchdog without taking any action
    pub fn keep_alive(&mut self) -> Result<()> {
        self.send_set(SetType::KeepAlive, TargetId::Both, 0)
    }

    /// Read the battery voltage, in tenths of a volt, through both channels
    pub fn read_battery(&mut self) -> Result<()> {
        let first = self.request(GetType::Battery, Motor::One);
        let second = self.request(GetType::Battery, Motor::Two);
        first.and(second).map(|_| ())
    }

    /// Read a motor current, in amps
    pub fn read_current(&mut self, motor: u8) -> Result<Option<Reading>> {
        self.request_selector(GetType::Current, motor)
    }

    /// Read a motor temperature, in degrees Celsius
    pub fn read_temperature(&mut self, motor: u8) -> Result<Option<Reading>> {
        self.request_selector(GetType::Temperature, motor)
    }

    /// Read a motor duty cycle, -2047..=2047
    pub fn read_duty_cycle(&mut self, motor: u8) -> Result<Option<Reading>> {
        self.request_selector(GetType::DutyCycle, motor)
    }

    /// Validate a received buffer and store its value.
    /// Corrupt, foreign or unroutable frames are dropped without touching the state.
    pub fn process_reply(&mut self, buf: &[u8]) -> Option<Reading> {
        let reply = match decode_reply_from(self.address, buf) {
            Ok(reply) => reply,
            Err(e) => {
                self.rejected_replies += 1;
                debug!("Dropping reply {:02X?}: {}", buf, e);
                return None;
            }
        };

        let Some(kind) = GetType::from_subtype(reply.subtype) else {
            self.rejected_replies += 1;
            debug!("Dropping reply with unknown subtype 0x{:02X}", reply.subtype);
            return None;
        };

        let Some(motor) = Motor::from_target(reply.target_type, reply.target_id) else {
            self.rejected_replies += 1;
            debug!(
                "Dropping reply for unmapped target {:?}/{}",
                reply.target_type as char, reply.target_id
            );
            return None;
        };

        self.telemetry.get_mut(motor).apply(kind, reply.value);
        debug!("{:?} {:?} = {}", motor, kind, reply.value);
        Some(Reading {
            motor,
            kind,
            value: reply.value,
        })
    }

    fn send_set(&mut self, set_type: SetType, target: TargetId, value: i16) -> Result<()> {
        let frame = encode_set(self.address, set_type, TargetType::Motor, target, value);
        self.transport.send(&frame)
    }

    fn request_selector(&mut self, kind: GetType, motor: u8) -> Result<Option<Reading>> {
        let Some(motor) = Motor::from_selector(motor) else {
            warn!("Ignoring {:?} read for invalid motor selector {}", kind, motor);
            return Ok(None);
        };
        self.request(kind, motor)
    }

    /// Send one GET and wait for its reply
    fn request(&mut self, kind: GetType, motor: Motor) -> Result<Option<Reading>> {
        let frame = encode_get(self.address, kind, TargetType::Motor, motor.target_id());
        // A reply that missed an earlier deadline must not answer this request
        self.transport.discard_input()?;
        self.transport.send(&frame)?;

        match self.transport.receive(self.reply_timeout)? {
            Some(reply) => Ok(self.process_reply(&reply)),
            None => Err(SabertoothError::Timeout {
                address: self.address,
            }),
        }
    }
}

impl<T: Transport> Drop for Sabertooth<T> {
    fn drop(&mut self) {
        // Try to stop motors when the handle is dropped
        if let Err(e) = self.stop() {
            warn!("Failed to stop motors on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::packet::{
        ADDRESS_FLAG, OPCODE_GET, OPCODE_SET, REPLY_FRAME_LEN, encode_reply,
    };
    use std::collections::VecDeque;

    /// Records every frame and plays back queued replies
    #[derive(Default)]
    struct ScriptedTransport {
        sent: Vec<Vec<u8>>,
        replies: VecDeque<[u8; REPLY_FRAME_LEN]>,
        /// Number of frames sent when each discard happened
        discards: Vec<usize>,
    }

    impl Transport for ScriptedTransport {
        fn send(&mut self, frame: &[u8]) -> Result<()> {
            self.sent.push(frame.to_vec());
            Ok(())
        }

        fn receive(&mut self, _timeout: Duration) -> Result<Option<[u8; REPLY_FRAME_LEN]>> {
            Ok(self.replies.pop_front())
        }

        fn discard_input(&mut self) -> Result<()> {
            self.discards.push(self.sent.len());
            Ok(())
        }
    }

    fn controller() -> Sabertooth<ScriptedTransport> {
        Sabertooth::new(ScriptedTransport::default(), DEFAULT_ADDRESS)
    }

    fn reply(kind: GetType, target: TargetId, value: i16) -> [u8; REPLY_FRAME_LEN] {
        encode_reply(DEFAULT_ADDRESS, kind, TargetType::Motor, target, value)
    }

    #[test]
    fn test_throttle_sends_set_and_mirrors_duty_cycle() {
        let mut st = controller();
        st.throttle(1, 1500).unwrap();

        assert_eq!(st.transport().sent.len(), 1);
        assert_eq!(
            st.transport().sent[0],
            vec![0x80, 0x28, 0x00, 0x28, 0x5C, 0x0B, 0x4D, 0x01, 0x35]
        );
        assert_eq!(st.telemetry(Motor::One).duty_cycle, 1500);
        assert_eq!(st.telemetry(Motor::Two).duty_cycle, 0);
    }

    #[test]
    fn test_throttle_clamps_power() {
        let mut st = controller();
        st.throttle(2, -5000).unwrap();
        assert_eq!(st.telemetry(Motor::Two).duty_cycle, -2047);
        let frame = &st.transport().sent[0];
        assert_eq!(frame[2], 0x01);
        assert_eq!(frame[7], 2);
    }

    #[test]
    fn test_invalid_selector_is_noop() {
        let mut st = controller();
        st.throttle(0, 100).unwrap();
        st.throttle(3, 100).unwrap();
        assert_eq!(st.read_current(7).unwrap(), None);
        assert_eq!(st.read_temperature(0).unwrap(), None);
        assert_eq!(st.read_duty_cycle(9).unwrap(), None);

        assert!(st.transport().sent.is_empty());
        assert_eq!(*st.telemetry(Motor::One), MotorTelemetry::default());
        assert_eq!(*st.telemetry(Motor::Two), MotorTelemetry::default());
    }

    #[test]
    fn test_stop_zeroes_both_motors() {
        let mut st = controller();
        st.throttle(1, 700).unwrap();
        st.throttle(2, -700).unwrap();
        st.stop().unwrap();

        let sent = &st.transport().sent;
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[2][4..6], [0, 0]);
        assert_eq!(sent[3][7], 2);
        assert_eq!(st.telemetry(Motor::One).duty_cycle, 0);
        assert_eq!(st.telemetry(Motor::Two).duty_cycle, 0);
    }

    #[test]
    fn test_shutdown_and_startup_target_both() {
        let mut st = controller();
        st.shutdown().unwrap();
        st.startup().unwrap();

        let sent = &st.transport().sent;
        assert_eq!(sent[0][1], OPCODE_SET);
        assert_eq!(sent[0][2], SetType::Shutdown as u8);
        assert_eq!(sent[0][4], 1);
        assert_eq!(sent[0][7], b'*');
        assert_eq!(sent[1][2], SetType::Shutdown as u8);
        assert_eq!(sent[1][4], 0);
    }

    #[test]
    fn test_set_timeout_uses_timeout_subtype() {
        let mut st = controller();
        st.set_timeout(-1).unwrap();
        st.set_timeout(3000).unwrap();

        let sent = &st.transport().sent;
        assert_eq!(sent[0][2], SetType::Timeout as u8 + 1);
        assert_eq!(sent[0][4], 1);
        // clamped to 2047
        assert_eq!(sent[1][2], SetType::Timeout as u8);
        assert_eq!(sent[1][4..6], [0x7F, 0x0F]);
    }

    #[test]
    fn test_keep_alive() {
        let mut st = controller();
        st.keep_alive().unwrap();
        assert_eq!(st.transport().sent[0][2], SetType::KeepAlive as u8);
    }

    #[test]
    fn test_read_current_updates_state() {
        let mut st = controller();
        st.transport_mut()
            .replies
            .push_back(reply(GetType::Current, TargetId::Two, -12));

        let reading = st.read_current(2).unwrap().unwrap();
        assert_eq!(reading.motor, Motor::Two);
        assert_eq!(reading.value, -12);
        assert_eq!(st.telemetry(Motor::Two).current, -12);

        let sent = &st.transport().sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), 7);
        assert_eq!(sent[0][1], OPCODE_GET);
        assert_eq!(sent[0][2], GetType::Current as u8);
    }

    #[test]
    fn test_read_battery_queries_both_channels() {
        let mut st = controller();
        st.transport_mut()
            .replies
            .push_back(reply(GetType::Battery, TargetId::One, 248));
        st.transport_mut()
            .replies
            .push_back(reply(GetType::Battery, TargetId::Two, 247));

        st.read_battery().unwrap();
        assert_eq!(st.transport().sent.len(), 2);
        assert_eq!(st.telemetry(Motor::One).battery, 248);
        assert_eq!(st.telemetry(Motor::Two).battery, 247);
    }

    #[test]
    fn test_read_times_out_without_reply() {
        let mut st = controller();
        let err = st.read_temperature(1).unwrap_err();
        assert!(matches!(err, SabertoothError::Timeout { address: 128 }));
        assert_eq!(st.telemetry(Motor::One).temperature, 0);
    }

    #[test]
    fn test_duty_cycle_reply_goes_to_duty_cycle() {
        let mut st = controller();
        st.transport_mut()
            .replies
            .push_back(reply(GetType::DutyCycle, TargetId::One, -900));

        st.read_duty_cycle(1).unwrap();
        assert_eq!(st.telemetry(Motor::One).duty_cycle, -900);
        assert_eq!(st.telemetry(Motor::One).temperature, 0);
    }

    #[test]
    fn test_corrupt_reply_is_dropped_and_counted() {
        let mut st = controller();
        let mut frame = reply(GetType::Temperature, TargetId::One, 41);
        frame[5] ^= 0x02;

        assert_eq!(st.process_reply(&frame), None);
        assert_eq!(st.rejected_replies(), 1);
        assert_eq!(*st.telemetry(Motor::One), MotorTelemetry::default());
    }

    #[test]
    fn test_unmapped_target_is_dropped() {
        let mut st = controller();
        let frame = encode_reply(DEFAULT_ADDRESS, GetType::Current, TargetType::Power, TargetId::One, 5);
        assert_eq!(st.process_reply(&frame), None);

        let frame = reply(GetType::Current, TargetId::Both, 5);
        assert_eq!(st.process_reply(&frame), None);

        assert_eq!(st.rejected_replies(), 2);
        assert_eq!(*st.telemetry(Motor::One), MotorTelemetry::default());
        assert_eq!(*st.telemetry(Motor::Two), MotorTelemetry::default());
    }

    #[test]
    fn test_reply_from_other_address_is_dropped() {
        let mut st = controller();
        st.transport_mut()
            .replies
            .push_back(reply(GetType::Current, TargetId::One, 37));
        st.read_current(1).unwrap();
        assert_eq!(st.telemetry(Motor::One).current, 37);

        // Clearing bit 7 of the address keeps chk1 intact
        let mut frame = reply(GetType::Current, TargetId::One, 99);
        frame[0] ^= ADDRESS_FLAG;
        assert_eq!(st.process_reply(&frame), None);

        let frame = encode_reply(129, GetType::Current, TargetType::Motor, TargetId::One, 99);
        assert_eq!(st.process_reply(&frame), None);

        assert_eq!(st.rejected_replies(), 2);
        assert_eq!(st.telemetry(Motor::One).current, 37);
    }

    #[test]
    fn test_reply_with_high_bit_in_data_is_dropped() {
        let mut st = controller();
        let mut frame = reply(GetType::Current, TargetId::One, 37);
        frame[4] ^= ADDRESS_FLAG;

        assert_eq!(st.process_reply(&frame), None);
        assert_eq!(st.rejected_replies(), 1);
        assert_eq!(st.telemetry(Motor::One).current, 0);
    }

    #[test]
    fn test_input_is_discarded_before_each_get() {
        let mut st = controller();
        st.throttle(1, 100).unwrap();
        st.transport_mut()
            .replies
            .push_back(reply(GetType::Current, TargetId::One, 1));
        st.read_current(1).unwrap();
        let _ = st.read_temperature(2);

        // No discard for the SET, one right before each GET went out
        assert_eq!(st.transport().discards, vec![1, 2]);
        assert_eq!(st.transport().sent[1][1], OPCODE_GET);
        assert_eq!(st.transport().sent[2][1], OPCODE_GET);
    }
}
