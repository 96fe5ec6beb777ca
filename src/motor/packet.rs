// Sabertooth Packet Serial frame codec
//
// Frame formats:
//   SET   [address, 0x28, subtype, chk1, value_lo, value_hi, target_type, target_id, chk2]
//   GET   [address, 0x29, subtype, chk1, target_type, target_id, chk2]
//   REPLY [address, 0x49, subtype, chk1, value_lo, value_hi, target_type, target_id, chk2]
//
// Values travel as two 7-bit groups of the magnitude. The sign lives in the low
// bit of the subtype byte (subtype + 1 = negative).

/// Basic command numbers
pub const OPCODE_SET: u8 = 0x28;
pub const OPCODE_GET: u8 = 0x29;
pub const OPCODE_REPLY: u8 = 0x49;

/// Frame lengths per opcode
pub const SET_FRAME_LEN: usize = 9;
pub const GET_FRAME_LEN: usize = 7;
pub const REPLY_FRAME_LEN: usize = 9;

/// Largest magnitude the controller accepts for a value byte pair
pub const MAX_VALUE: i16 = 0x07FF;
pub const MIN_VALUE: i16 = -0x07FF;

const CHECKSUM_MASK: u8 = 0x7F;

/// Only the address byte has bit 7 set; everything after it is 7-bit data
pub const ADDRESS_FLAG: u8 = 0x80;

// Byte offsets shared by every frame
const IDX_ADDRESS: usize = 0;
const IDX_OPCODE: usize = 1;
const IDX_SUBTYPE: usize = 2;
const IDX_CHECKSUM_1: usize = 3;
const IDX_PAYLOAD: usize = 4;

/// SET sub-commands
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetType {
    Value = 0x00,
    KeepAlive = 0x10,
    Shutdown = 0x20,
    Timeout = 0x30,
}

/// GET sub-commands
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetType {
    DutyCycle = 0x00,
    Battery = 0x10,
    Current = 0x20,
    Temperature = 0x30,
}

impl GetType {
    /// Map a reply subtype byte back to the request it answers.
    /// The low bit only carries the sign, so 0x21 is still a current reading.
    pub fn from_subtype(subtype: u8) -> Option<Self> {
        match subtype & !1 {
            0x00 => Some(GetType::DutyCycle),
            0x10 => Some(GetType::Battery),
            0x20 => Some(GetType::Current),
            0x30 => Some(GetType::Temperature),
            _ => None,
        }
    }
}

/// Output class addressed by a command
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Motor = b'M',
    Power = b'P',
    Ramp = b'E',
    Auxiliary = b'Q',
}

/// Output instance addressed by a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetId {
    One,
    Two,
    Both,
}

impl TargetId {
    pub fn as_byte(self) -> u8 {
        match self {
            TargetId::One => 1,
            TargetId::Two => 2,
            TargetId::Both => b'*',
        }
    }
}

/// Errors raised while validating a received frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("Unexpected opcode 0x{0:02X}")]
    Opcode(u8),

    #[error("Byte {index} (0x{byte:02X}) is not 7-bit data")]
    DataByte { index: usize, byte: u8 },

    #[error("Reply from address {actual}, expected {expected}")]
    Address { expected: u8, actual: u8 },

    #[error("Header checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    HeaderChecksum { expected: u8, actual: u8 },

    #[error("Payload checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    PayloadChecksum { expected: u8, actual: u8 },
}

pub type Result<T> = std::result::Result<T, PacketError>;

/// A validated reply frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub address: u8,
    /// Subtype echoed by the controller, sign bit included
    pub subtype: u8,
    pub value: i16,
    pub target_type: u8,
    pub target_id: u8,
}

/// 7-bit sum used by both checksums
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) & CHECKSUM_MASK
}

/// True for the byte that opens a frame
pub fn is_address_byte(byte: u8) -> bool {
    byte & ADDRESS_FLAG != 0
}

/// Clamp a value into the range the controller can represent
pub fn clamp_value(value: i16) -> i16 {
    value.clamp(MIN_VALUE, MAX_VALUE)
}

/// Split a signed value into (subtype offset, low 7 bits, high 7 bits)
fn encode_value(value: i16) -> (u8, u8, u8) {
    let magnitude = clamp_value(value).unsigned_abs();
    let sign = u8::from(value < 0);
    (
        sign,
        (magnitude & 0x7F) as u8,
        ((magnitude >> 7) & 0x7F) as u8,
    )
}

/// Join two 7-bit groups back into a magnitude and apply the subtype sign bit
fn decode_value(subtype: u8, low: u8, high: u8) -> i16 {
    let magnitude = i16::from(low & 0x7F) | (i16::from(high & 0x7F) << 7);
    if subtype & 1 == 1 { -magnitude } else { magnitude }
}

/// Fill the header (address, opcode, subtype, chk1) of a frame
fn write_header(frame: &mut [u8], address: u8, opcode: u8, subtype: u8) {
    frame[IDX_ADDRESS] = address;
    frame[IDX_OPCODE] = opcode;
    frame[IDX_SUBTYPE] = subtype;
    frame[IDX_CHECKSUM_1] = checksum(&frame[..IDX_CHECKSUM_1]);
}

/// Build a frame carrying a signed value (SET or REPLY)
fn build_value_frame(
    address: u8,
    opcode: u8,
    subtype: u8,
    target_type: u8,
    target_id: u8,
    value: i16,
) -> [u8; SET_FRAME_LEN] {
    let (sign, low, high) = encode_value(value);
    let mut frame = [0u8; SET_FRAME_LEN];
    write_header(&mut frame, address, opcode, subtype + sign);
    frame[4] = low;
    frame[5] = high;
    frame[6] = target_type;
    frame[7] = target_id;
    frame[8] = checksum(&frame[IDX_PAYLOAD..8]);
    frame
}

/// Encode a SET command. Values outside the representable range are clamped.
pub fn encode_set(
    address: u8,
    set_type: SetType,
    target_type: TargetType,
    target_id: TargetId,
    value: i16,
) -> [u8; SET_FRAME_LEN] {
    build_value_frame(
        address,
        OPCODE_SET,
        set_type as u8,
        target_type as u8,
        target_id.as_byte(),
        value,
    )
}

/// Encode a GET command
pub fn encode_get(
    address: u8,
    get_type: GetType,
    target_type: TargetType,
    target_id: TargetId,
) -> [u8; GET_FRAME_LEN] {
    let mut frame = [0u8; GET_FRAME_LEN];
    write_header(&mut frame, address, OPCODE_GET, get_type as u8);
    frame[4] = target_type as u8;
    frame[5] = target_id.as_byte();
    frame[6] = checksum(&frame[IDX_PAYLOAD..6]);
    frame
}

/// Encode a REPLY frame, as the controller would send it
pub fn encode_reply(
    address: u8,
    get_type: GetType,
    target_type: TargetType,
    target_id: TargetId,
    value: i16,
) -> [u8; REPLY_FRAME_LEN] {
    build_value_frame(
        address,
        OPCODE_REPLY,
        get_type as u8,
        target_type as u8,
        target_id.as_byte(),
        value,
    )
}

/// Validate a received REPLY frame and extract its value
pub fn decode_reply(frame: &[u8]) -> Result<Reply> {
    if frame.len() != REPLY_FRAME_LEN {
        return Err(PacketError::Length {
            expected: REPLY_FRAME_LEN,
            actual: frame.len(),
        });
    }

    if frame[IDX_OPCODE] != OPCODE_REPLY {
        return Err(PacketError::Opcode(frame[IDX_OPCODE]));
    }

    // The checksums are 7-bit, so a flipped high bit would slip through them
    if let Some((index, &byte)) = frame
        .iter()
        .enumerate()
        .skip(IDX_OPCODE)
        .find(|&(_, &b)| is_address_byte(b))
    {
        return Err(PacketError::DataByte { index, byte });
    }

    let expected = checksum(&frame[..IDX_CHECKSUM_1]);
    if expected != frame[IDX_CHECKSUM_1] {
        return Err(PacketError::HeaderChecksum {
            expected,
            actual: frame[IDX_CHECKSUM_1],
        });
    }

    let last = frame.len() - 1;
    let expected = checksum(&frame[IDX_PAYLOAD..last]);
    if expected != frame[last] {
        return Err(PacketError::PayloadChecksum {
            expected,
            actual: frame[last],
        });
    }

    let subtype = frame[IDX_SUBTYPE];
    Ok(Reply {
        address: frame[IDX_ADDRESS],
        subtype,
        value: decode_value(subtype, frame[4], frame[5]),
        target_type: frame[6],
        target_id: frame[7],
    })
}

/// Validate a REPLY frame that must come from the controller at `address`
pub fn decode_reply_from(address: u8, frame: &[u8]) -> Result<Reply> {
    let reply = decode_reply(frame)?;
    if reply.address != address {
        return Err(PacketError::Address {
            expected: address,
            actual: reply.address,
        });
    }
    Ok(reply)
}
