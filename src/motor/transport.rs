// Byte link to the motor controller
//
// SET frames are written and forgotten. A GET is followed by exactly one
// bounded wait for a REPLY frame; on timeout nothing is assumed to have arrived.
// Frames are re-aligned on the address byte, the only byte with bit 7 set.

use serialport::{self, ClearBuffer, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::debug;

use super::packet::{REPLY_FRAME_LEN, is_address_byte};

/// Default serial configuration for a Sabertooth in Packet Serial mode
pub const DEFAULT_BAUDRATE: u32 = 9600;

/// Per-read timeout on the port; the overall reply deadline is enforced above it
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(5);

/// Error types for Sabertooth communication
#[derive(Debug, thiserror::Error)]
pub enum SabertoothError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout waiting for reply from controller {address}")]
    Timeout { address: u8 },
}

pub type Result<T> = std::result::Result<T, SabertoothError>;

/// A link able to carry Packet Serial frames
pub trait Transport {
    /// Write a complete frame
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Wait at most `timeout` for one complete reply frame
    fn receive(&mut self, timeout: Duration) -> Result<Option<[u8; REPLY_FRAME_LEN]>>;

    /// Drop anything received but not yet read, such as a reply that arrived
    /// after its request timed out
    fn discard_input(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Serial port transport
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open a new connection to the controller
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(PORT_POLL_TIMEOUT)
            .open()?;

        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        debug!("TX {:02X?}", frame);
        self.port.write_all(frame)?;
        self.port.flush()?;
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<[u8; REPLY_FRAME_LEN]>> {
        let frame = read_frame(&mut self.port, timeout)?;
        if let Some(frame) = &frame {
            debug!("RX {:02X?}", frame);
        }
        Ok(frame)
    }

    fn discard_input(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

/// Read one reply-sized frame from `reader`, giving up once `timeout` elapses.
///
/// Bytes before an address byte are skipped, and a new address byte restarts
/// the frame, so the tail of a late or truncated reply never shifts the next
/// one. Read timeouts on the underlying reader are retried until the deadline.
pub fn read_frame<R: Read + ?Sized>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Option<[u8; REPLY_FRAME_LEN]>> {
    let deadline = Instant::now() + timeout;
    let mut frame = [0u8; REPLY_FRAME_LEN];
    let mut filled = 0;
    let mut byte = [0u8; 1];

    while Instant::now() < deadline {
        match reader.read(&mut byte) {
            Ok(0) => std::thread::sleep(Duration::from_micros(200)),
            Ok(_) => {
                let b = byte[0];
                if is_address_byte(b) {
                    if filled > 0 {
                        debug!("Discarding partial frame {:02X?}", &frame[..filled]);
                    }
                    frame[0] = b;
                    filled = 1;
                } else if filled == 0 {
                    debug!("Skipping byte 0x{:02X} outside a frame", b);
                    continue;
                } else {
                    frame[filled] = b;
                    filled += 1;
                }

                if filled == REPLY_FRAME_LEN {
                    return Ok(Some(frame));
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(SabertoothError::Io(e)),
        }
    }

    if filled > 0 {
        debug!("Reply deadline hit with partial frame {:02X?}", &frame[..filled]);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::packet::{GetType, TargetId, TargetType, decode_reply, encode_reply};
    use std::io::Cursor;

    /// Reader that hands out bytes in small chunks and then times out
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl Trickle {
        fn new(data: Vec<u8>, chunk: usize) -> Self {
            Self { data, pos: 0, chunk }
        }
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.data.len() {
                return Err(std::io::Error::new(ErrorKind::TimedOut, "no data"));
            }
            let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn current_reply(target: TargetId, value: i16) -> [u8; REPLY_FRAME_LEN] {
        encode_reply(128, GetType::Current, TargetType::Motor, target, value)
    }

    #[test]
    fn test_read_frame_assembles_chunks() {
        let reply = current_reply(TargetId::One, 12);
        let mut reader = Trickle::new(reply.to_vec(), 2);
        let frame = read_frame(&mut reader, Duration::from_millis(50)).unwrap();
        assert_eq!(frame, Some(reply));
    }

    #[test]
    fn test_read_frame_times_out_on_partial_frame() {
        let reply = current_reply(TargetId::One, 12);
        let mut reader = Trickle::new(reply[..3].to_vec(), 3);
        let start = Instant::now();
        let frame = read_frame(&mut reader, Duration::from_millis(10)).unwrap();
        assert_eq!(frame, None);
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_read_frame_zero_timeout_reads_nothing() {
        let mut reader = Cursor::new(current_reply(TargetId::One, 1).to_vec());
        let frame = read_frame(&mut reader, Duration::ZERO).unwrap();
        assert_eq!(frame, None);
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_read_frame_resyncs_after_late_reply() {
        let late = current_reply(TargetId::One, 37);
        let next = current_reply(TargetId::Two, -5);

        // Only the head of the first reply makes it before the deadline
        let mut reader = Trickle::new(late[..5].to_vec(), 9);
        assert_eq!(read_frame(&mut reader, Duration::from_millis(10)).unwrap(), None);

        // Its tail shows up in front of the next reply
        reader.data.extend_from_slice(&late[5..]);
        reader.data.extend_from_slice(&next);
        let frame = read_frame(&mut reader, Duration::from_millis(50))
            .unwrap()
            .unwrap();
        assert_eq!(frame, next);
        assert_eq!(decode_reply(&frame).unwrap().value, -5);
    }

    #[test]
    fn test_read_frame_restarts_on_address_byte() {
        let truncated = current_reply(TargetId::One, 37);
        let next = current_reply(TargetId::Two, 8);
        let mut data = truncated[..6].to_vec();
        data.extend_from_slice(&next);

        let mut reader = Trickle::new(data, 4);
        let frame = read_frame(&mut reader, Duration::from_millis(50)).unwrap();
        assert_eq!(frame, Some(next));
    }
}
