//! Encoding and decoding of RobStride protocol frames.
//!
//! This module implements the pure codec for the actuator's private CAN
//! protocol. It performs no I/O; the [`bus`](crate::bus) module moves the
//! resulting frames on and off the wire.
//!
//! ## Identifier layout
//!
//! Every frame uses a 29-bit extended identifier split into three fields:
//!
//! ```text
//! [ type(5) | middle(16) | low(8) ]
//! ```
//!
//! - Requests carry `(host, node)` in `(middle, low)`.
//! - Read-parameter replies swap the halves: the node moves into the
//!   middle field and the host's low byte into the low field, so the
//!   reply identifier for any request is fully determined by the request.
//! - Change-address requests are the exception: the middle field packs
//!   `(new_address, host_low)` and the low byte carries the old address.
//!
//! ## Payload layout
//!
//! Payloads are always 8 bytes, zero padded. Parameter frames put the
//! 16-bit register index in bytes 0..2 (little-endian, bytes 2..4 zero)
//! and the value in bytes 4..8 (little-endian `f32` or `u32`). Command
//! frames (enable, disable, change address) carry an all-zero payload.
//!
//! ## Functions
//!
//! - [`encode_param`]: build a read/write parameter request
//! - [`encode_command`]: build an enable/disable request
//! - [`encode_change_address`]: build an address reassignment request
//! - [`reply_id`]: the identifier a read request's reply will arrive under
//! - [`decode_reply`]: parse a read-parameter reply
//! - [`decode_request`]: parse a request (used by the simulated backend)

use crate::consts::{
    CMD_CHANGE_ADDRESS, CMD_DISABLE, CMD_ENABLE, CMD_READ_PARAM, CMD_WRITE_PARAM, NODE_ADDRESS_MAX,
};
use crate::error::{Error, Result};

/// The closed set of command types used by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    /// Enable motion control (`0x03`). No reply expected.
    Enable,
    /// Disable/stop (`0x04`). No reply expected.
    Disable,
    /// Reassign the node's bus address (`0x07`). No reply expected;
    /// confirmed by re-probing.
    ChangeAddress,
    /// Read a parameter register (`0x11`). Reply echoes the index and
    /// carries the value.
    ReadParam,
    /// Write a parameter register (`0x12`). No reply required.
    WriteParam,
}

impl CommandType {
    /// The raw type byte occupying the identifier's high five bits.
    pub const fn raw(self) -> u8 {
        match self {
            CommandType::Enable => CMD_ENABLE,
            CommandType::Disable => CMD_DISABLE,
            CommandType::ChangeAddress => CMD_CHANGE_ADDRESS,
            CommandType::ReadParam => CMD_READ_PARAM,
            CommandType::WriteParam => CMD_WRITE_PARAM,
        }
    }

    /// Maps a raw type byte back into the closed set.
    ///
    /// Returns `None` for bytes outside the registry.
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            CMD_ENABLE => Some(CommandType::Enable),
            CMD_DISABLE => Some(CommandType::Disable),
            CMD_CHANGE_ADDRESS => Some(CommandType::ChangeAddress),
            CMD_READ_PARAM => Some(CommandType::ReadParam),
            CMD_WRITE_PARAM => Some(CommandType::WriteParam),
            _ => None,
        }
    }
}

/// A value carried in the trailing four payload bytes.
///
/// Radian positions and gains travel as `f32`; small integer registers
/// (run mode, address) travel as `u32`. Both are little-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    /// IEEE-754 single precision, little-endian.
    F32(f32),
    /// Unsigned 32-bit integer, little-endian.
    U32(u32),
}

impl ParamValue {
    /// Wire encoding of the value.
    pub fn to_le_bytes(self) -> [u8; 4] {
        match self {
            ParamValue::F32(v) => v.to_le_bytes(),
            ParamValue::U32(v) => v.to_le_bytes(),
        }
    }
}

/// One CAN frame: a 29-bit extended identifier plus up to 8 data bytes.
///
/// The protocol always sends exactly 8 bytes; `dlc` exists so that short
/// frames read off a real bus can be rejected as malformed rather than
/// silently zero-extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// 29-bit extended identifier.
    pub id: u32,
    /// Number of valid bytes in `data`.
    pub dlc: u8,
    /// Payload, zero padded past `dlc`.
    pub data: [u8; 8],
}

impl Frame {
    /// Builds a frame from an identifier and raw data read off the bus.
    pub fn new(id: u32, bytes: &[u8]) -> Self {
        let mut data = [0u8; 8];
        let dlc = bytes.len().min(8);
        data[..dlc].copy_from_slice(&bytes[..dlc]);
        Frame {
            id,
            dlc: dlc as u8,
            data,
        }
    }

    /// The valid payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }
}

fn request_id(command: CommandType, host: u16, node: u8) -> u32 {
    (u32::from(command.raw() & 0x1F) << 24) | (u32::from(host) << 8) | u32::from(node)
}

/// The identifier under which the reply to a read request will arrive:
/// the node moves into the middle field, the host's low byte into the
/// low field.
pub fn reply_id(command: CommandType, host: u16, node: u8) -> u32 {
    (u32::from(command.raw() & 0x1F) << 24) | (u32::from(node) << 8) | u32::from(host & 0x00FF)
}

/// Encodes a read or write parameter request.
///
/// For reads the value field is ignored by the device and should be
/// [`ParamValue::U32`]`(0)`.
pub fn encode_param(
    command: CommandType,
    host: u16,
    node: u8,
    index: u16,
    value: ParamValue,
) -> Frame {
    let mut data = [0u8; 8];
    data[..2].copy_from_slice(&index.to_le_bytes());
    data[4..].copy_from_slice(&value.to_le_bytes());
    Frame {
        id: request_id(command, host, node),
        dlc: 8,
        data,
    }
}

/// Encodes an enable or disable command frame (all-zero payload).
pub fn encode_command(command: CommandType, host: u16, node: u8) -> Frame {
    Frame {
        id: request_id(command, host, node),
        dlc: 8,
        data: [0u8; 8],
    }
}

/// Encodes an address reassignment request.
///
/// Both addresses ride in the identifier: the new address in the middle
/// field's high byte next to the host's low byte, the old address in the
/// low byte. The payload is all zeros.
pub fn encode_change_address(old: u8, new: u8, host: u16) -> Frame {
    let id = (u32::from(CMD_CHANGE_ADDRESS) << 24)
        | (u32::from(new) << 16)
        | (u32::from(host & 0x00FF) << 8)
        | u32::from(old);
    Frame {
        id,
        dlc: 8,
        data: [0u8; 8],
    }
}

/// A decoded read-parameter reply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reply {
    /// Node the reply came from.
    pub node: u8,
    /// Low byte of the host address the reply was directed at.
    pub host_low: u8,
    /// Echoed parameter index.
    pub index: u16,
    /// Raw little-endian value bytes.
    pub value: [u8; 4],
}

impl Reply {
    /// The value as little-endian `f32` (radian positions, gains).
    pub fn value_f32(&self) -> f32 {
        f32::from_le_bytes(self.value)
    }

    /// The value as little-endian `u32` (run mode, address register).
    pub fn value_u32(&self) -> u32 {
        u32::from_le_bytes(self.value)
    }
}

/// Decodes a read-parameter reply frame.
///
/// Fails with [`Error::MalformedFrame`] when the payload is not 8 bytes,
/// the type byte is not [`CommandType::ReadParam`], or the node field
/// exceeds the 0–127 address space.
pub fn decode_reply(frame: &Frame) -> Result<Reply> {
    if frame.dlc != 8 {
        return Err(Error::MalformedFrame("reply payload is not 8 bytes"));
    }
    let raw_type = ((frame.id >> 24) & 0x1F) as u8;
    if CommandType::from_raw(raw_type) != Some(CommandType::ReadParam) {
        return Err(Error::MalformedFrame("reply type is not read-parameter"));
    }
    let middle = ((frame.id >> 8) & 0xFFFF) as u16;
    if middle > u16::from(NODE_ADDRESS_MAX) {
        return Err(Error::MalformedFrame("reply node field out of range"));
    }
    let mut value = [0u8; 4];
    value.copy_from_slice(&frame.data[4..8]);
    Ok(Reply {
        node: middle as u8,
        host_low: (frame.id & 0xFF) as u8,
        index: u16::from_le_bytes([frame.data[0], frame.data[1]]),
        value,
    })
}

/// A decoded request frame, as a node (or the simulated backend) sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Request {
    /// Operation selected by the identifier's type field.
    pub command: CommandType,
    /// Requesting host. For [`CommandType::ChangeAddress`] only the low
    /// byte is present on the wire.
    pub host: u16,
    /// Addressed node. For [`CommandType::ChangeAddress`] this is the old
    /// address.
    pub node: u8,
    /// Parameter index for read/write frames, the new address for
    /// change-address frames, zero otherwise.
    pub index: u16,
    /// Raw little-endian value bytes (bytes 4..8 of the payload).
    pub value: [u8; 4],
}

/// Decodes a request frame.
///
/// Fails with [`Error::MalformedFrame`] for a payload that is not 8 bytes,
/// a type byte outside the closed command set, or a node field beyond the
/// address space.
pub fn decode_request(frame: &Frame) -> Result<Request> {
    if frame.dlc != 8 {
        return Err(Error::MalformedFrame("request payload is not 8 bytes"));
    }
    let raw_type = ((frame.id >> 24) & 0x1F) as u8;
    let command = CommandType::from_raw(raw_type)
        .ok_or(Error::MalformedFrame("unknown command type"))?;
    let node = (frame.id & 0xFF) as u8;
    if node > NODE_ADDRESS_MAX {
        return Err(Error::MalformedFrame("node address out of range"));
    }
    let middle = ((frame.id >> 8) & 0xFFFF) as u16;
    let mut value = [0u8; 4];
    value.copy_from_slice(&frame.data[4..8]);
    let (host, index) = match command {
        // [ 0x07 | new(8) | host_low(8) | old(8) ]
        CommandType::ChangeAddress => (middle & 0x00FF, middle >> 8),
        _ => (middle, u16::from_le_bytes([frame.data[0], frame.data[1]])),
    };
    Ok(Request {
        command,
        host,
        node,
        index,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{DEFAULT_HOST_ADDRESS, PARAM_LOC_REF, PARAM_MECHPOS, PARAM_RUN_MODE};

    #[test]
    fn test_request_id_matches_known_frames() {
        // Captured: host 0x00AA, node 0x7F, write loc_ref -> 0x1200AA7F.
        let frame = encode_param(
            CommandType::WriteParam,
            0x00AA,
            0x7F,
            PARAM_LOC_REF,
            ParamValue::F32(0.0),
        );
        assert_eq!(frame.id, 0x1200_AA7F);
        assert_eq!(&frame.data[..4], &[0x16, 0x70, 0x00, 0x00]);
    }

    #[test]
    fn test_reply_id_swaps_node_and_host() {
        // Captured: probe of node 5 from host 0x00AA replies on 0x110005AA.
        assert_eq!(reply_id(CommandType::ReadParam, 0x00AA, 5), 0x1100_05AA);
    }

    #[test]
    fn test_enable_payload_from_capture() {
        // enable sequence frame 1: run_mode = position (05 70 00 00 01 00 00 00)
        let frame = encode_param(
            CommandType::WriteParam,
            DEFAULT_HOST_ADDRESS,
            127,
            PARAM_RUN_MODE,
            ParamValue::U32(1),
        );
        assert_eq!(frame.data, [0x05, 0x70, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]);
        // enable sequence frame 2: all-zero payload under type 0x03
        let frame = encode_command(CommandType::Enable, DEFAULT_HOST_ADDRESS, 127);
        assert_eq!(frame.id, 0x0300_AA7F);
        assert_eq!(frame.data, [0u8; 8]);
    }

    #[test]
    fn test_param_request_round_trip() {
        for (command, value) in [
            (CommandType::ReadParam, ParamValue::U32(0)),
            (CommandType::WriteParam, ParamValue::F32(1.5708)),
            (CommandType::WriteParam, ParamValue::U32(1)),
        ] {
            let frame = encode_param(command, 0xBEEF, 64, PARAM_MECHPOS, value);
            let req = decode_request(&frame).unwrap();
            assert_eq!(req.command, command);
            assert_eq!(req.host, 0xBEEF);
            assert_eq!(req.node, 64);
            assert_eq!(req.index, PARAM_MECHPOS);
            assert_eq!(req.value, value.to_le_bytes());
        }
    }

    #[test]
    fn test_command_request_round_trip() {
        for command in [CommandType::Enable, CommandType::Disable] {
            let frame = encode_command(command, 0x00AA, 127);
            let req = decode_request(&frame).unwrap();
            assert_eq!(req.command, command);
            assert_eq!(req.host, 0x00AA);
            assert_eq!(req.node, 127);
        }
    }

    #[test]
    fn test_change_address_round_trip() {
        let frame = encode_change_address(5, 6, 0x00AA);
        assert_eq!(frame.id, 0x0706_AA05);
        let req = decode_request(&frame).unwrap();
        assert_eq!(req.command, CommandType::ChangeAddress);
        assert_eq!(req.node, 5);
        assert_eq!(req.index, 6);
        assert_eq!(req.host, 0x00AA);
    }

    #[test]
    fn test_reply_round_trip() {
        let radians = 0.5f32;
        let mut data = [0u8; 8];
        data[..2].copy_from_slice(&PARAM_MECHPOS.to_le_bytes());
        data[4..].copy_from_slice(&radians.to_le_bytes());
        let frame = Frame::new(reply_id(CommandType::ReadParam, 0x00AA, 5), &data);
        let reply = decode_reply(&frame).unwrap();
        assert_eq!(reply.node, 5);
        assert_eq!(reply.host_low, 0xAA);
        assert_eq!(reply.index, PARAM_MECHPOS);
        assert_eq!(reply.value_f32(), radians);
    }

    #[test]
    fn test_decode_rejects_short_payload() {
        let frame = Frame::new(reply_id(CommandType::ReadParam, 0x00AA, 5), &[0x19, 0x70]);
        assert!(matches!(
            decode_reply(&frame),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_rejects_out_of_range_node() {
        // Middle field 0x0200 exceeds the 0-127 address space.
        let frame = Frame::new(0x1102_00AA, &[0u8; 8]);
        assert!(decode_reply(&frame).is_err());
        // Low byte 0xF0 exceeds it on the request side.
        let frame = Frame::new(0x1100_AAF0, &[0u8; 8]);
        assert!(decode_request(&frame).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let frame = Frame::new(0x1F00_AA05, &[0u8; 8]);
        assert!(decode_request(&frame).is_err());
    }
}
