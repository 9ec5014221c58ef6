//! Constants used across the RobStride CAN protocol implementation.
//!
//! This module defines the protocol-wide constants: command type bytes,
//! parameter register indices, identifier field layout, and session
//! defaults.
//!
//! These values are fixed by the device firmware's private protocol and
//! are not discovered at runtime. They were captured from known-good
//! frames exchanged with real actuators.
//!
//! ## Key Concepts
//!
//! - **Command types**: the high 5 bits of every 29-bit extended
//!   identifier select the operation (enable, disable, read/write
//!   parameter, change address).
//! - **Parameter indices**: 16-bit register numbers in the device's
//!   `0x70xx` parameter space, read and written via the
//!   [`ReadParam`](crate::frame::CommandType::ReadParam) /
//!   [`WriteParam`](crate::frame::CommandType::WriteParam) frames.
//! - **Addressing**: node addresses occupy 0–127; the host (master)
//!   address is a 16-bit value embedded in every request identifier.

/// Enable motion control on a node. All-zero payload, no reply expected.
pub const CMD_ENABLE: u8 = 0x03;

/// Disable/stop a node. All-zero payload, no reply expected.
pub const CMD_DISABLE: u8 = 0x04;

/// Reassign a node's bus address. The old and new addresses ride in the
/// identifier itself; the payload is all zeros and no reply is expected —
/// the change is confirmed by re-probing both addresses.
pub const CMD_CHANGE_ADDRESS: u8 = 0x07;

/// Read a parameter register. The reply echoes the index and carries the
/// value in the trailing four payload bytes.
pub const CMD_READ_PARAM: u8 = 0x11;

/// Write a parameter register. No reply is required.
pub const CMD_WRITE_PARAM: u8 = 0x12;

/// Run-mode flag register. Writing [`RUN_MODE_POSITION`] selects closed
/// loop position control.
pub const PARAM_RUN_MODE: u16 = 0x7005;

/// Proportional gain register (float32).
pub const PARAM_GAIN_KP: u16 = 0x7010;

/// Integral gain register (float32).
pub const PARAM_GAIN_KI: u16 = 0x7011;

/// Derivative gain register (float32).
pub const PARAM_GAIN_KD: u16 = 0x7012;

/// Position target register, radians as float32 ("loc_ref").
pub const PARAM_LOC_REF: u16 = 0x7016;

/// Current CAN address register (uint32). Readable; changing the address
/// goes through [`CMD_CHANGE_ADDRESS`], not a register write.
pub const PARAM_CAN_ID: u16 = 0x7018;

/// Mechanical position readback register, radians as float32 ("mechpos").
/// Probing this register doubles as the liveness check during scans.
pub const PARAM_MECHPOS: u16 = 0x7019;

/// Run-mode value selecting position control.
pub const RUN_MODE_POSITION: u32 = 1;

/// Highest valid node address. Addresses occupy the low identifier byte
/// of request frames and must stay within 7 bits.
pub const NODE_ADDRESS_MAX: u8 = 127;

/// Default 16-bit host/master address embedded in request identifiers.
pub const DEFAULT_HOST_ADDRESS: u16 = 0x00AA;

/// Mask covering all 29 bits of an extended identifier. Request/reply
/// correlation always matches the full identifier.
pub const EXT_ID_MASK: u32 = 0x1FFF_FFFF;

/// Mechanical position range of the actuator, radians (±4π).
pub const POSITION_RANGE_RAD: f32 = 12.566_371;

/// Per-operation reply deadline that keeps a multi-node sync pass inside
/// one animation frame. Used as the default for
/// [`RobstrideClient`](crate::client::RobstrideClient).
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 30;

/// How long a node is given to adopt a new address before the post-change
/// probes start.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 100;

/// How many probe rounds `change_address` runs before giving up and
/// reporting the change unconfirmed.
pub const DEFAULT_REPROBE_ATTEMPTS: u32 = 3;
