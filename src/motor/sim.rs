// In-memory stand-in for a Sabertooth, used when no hardware is attached
//
// Accepts SET/GET frames like the real controller and answers GETs with
// REPLY frames built from its own state.

use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

use super::packet::{
    GET_FRAME_LEN, GetType, OPCODE_GET, OPCODE_SET, REPLY_FRAME_LEN, SET_FRAME_LEN, SetType,
    TargetType, checksum, encode_reply,
};
use super::state::Motor;
use super::transport::{Result, Transport};

/// Simulated battery rail, in tenths of a volt
const SIM_BATTERY: i16 = 240;
/// Simulated ambient temperature, in degrees Celsius
const SIM_AMBIENT_TEMP: i16 = 25;

/// Simulated dual-channel controller
#[derive(Debug)]
pub struct SimulatedController {
    address: u8,
    duty_cycles: [i16; 2],
    shutdown: bool,
    serial_timeout: i16,
    pending: VecDeque<[u8; REPLY_FRAME_LEN]>,
    frames_ignored: usize,
}

impl SimulatedController {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            duty_cycles: [0; 2],
            shutdown: false,
            serial_timeout: 0,
            pending: VecDeque::new(),
            frames_ignored: 0,
        }
    }

    pub fn duty_cycle(&self, motor: Motor) -> i16 {
        match motor {
            Motor::One => self.duty_cycles[0],
            Motor::Two => self.duty_cycles[1],
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub fn serial_timeout(&self) -> i16 {
        self.serial_timeout
    }

    /// Frames dropped for a bad address, length or checksum
    pub fn frames_ignored(&self) -> usize {
        self.frames_ignored
    }

    fn valid_frame(&self, frame: &[u8]) -> bool {
        let expected_len = match frame.get(1) {
            Some(&OPCODE_SET) => SET_FRAME_LEN,
            Some(&OPCODE_GET) => GET_FRAME_LEN,
            _ => return false,
        };
        frame.len() == expected_len
            && frame[0] == self.address
            && checksum(&frame[..3]) == frame[3]
            && checksum(&frame[4..expected_len - 1]) == frame[expected_len - 1]
    }

    fn targets(&self, target_type: u8, target_id: u8) -> Vec<Motor> {
        if target_type != TargetType::Motor as u8 {
            return Vec::new();
        }
        match target_id {
            b'*' => Motor::ALL.to_vec(),
            id => Motor::from_target(target_type, id).into_iter().collect(),
        }
    }

    fn handle_set(&mut self, frame: &[u8]) {
        let magnitude = i16::from(frame[4]) | (i16::from(frame[5]) << 7);
        let value = if frame[2] & 1 == 1 { -magnitude } else { magnitude };
        let set_type = frame[2] & !1;

        match set_type {
            t if t == SetType::Value as u8 => {
                for motor in self.targets(frame[6], frame[7]) {
                    let slot = match motor {
                        Motor::One => &mut self.duty_cycles[0],
                        Motor::Two => &mut self.duty_cycles[1],
                    };
                    *slot = if self.shutdown { 0 } else { value };
                }
            }
            t if t == SetType::Shutdown as u8 => {
                self.shutdown = value != 0;
                if self.shutdown {
                    self.duty_cycles = [0; 2];
                }
            }
            t if t == SetType::Timeout as u8 => self.serial_timeout = value,
            _ => {}
        }
    }

    fn handle_get(&mut self, frame: &[u8]) {
        let Some(kind) = GetType::from_subtype(frame[2]) else {
            return;
        };
        let Some(motor) = Motor::from_target(frame[4], frame[5]) else {
            return;
        };

        let duty = self.duty_cycle(motor);
        let value = match kind {
            GetType::DutyCycle => duty,
            GetType::Battery => SIM_BATTERY,
            // Roughly 1 A per 100 duty counts
            GetType::Current => duty / 100,
            GetType::Temperature => SIM_AMBIENT_TEMP + duty.abs() / 200,
        };

        self.pending.push_back(encode_reply(
            self.address,
            kind,
            TargetType::Motor,
            motor.target_id(),
            value,
        ));
    }
}

impl Transport for SimulatedController {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        if !self.valid_frame(frame) {
            debug!("Simulated controller ignoring frame {:02X?}", frame);
            self.frames_ignored += 1;
            return Ok(());
        }

        match frame[1] {
            OPCODE_SET => self.handle_set(frame),
            _ => self.handle_get(frame),
        }
        Ok(())
    }

    fn receive(&mut self, _timeout: Duration) -> Result<Option<[u8; REPLY_FRAME_LEN]>> {
        Ok(self.pending.pop_front())
    }

    fn discard_input(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }
}
