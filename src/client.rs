//! The protocol driver: discovery, addressing, and motion control.
//!
//! [`RobstrideClient`] owns one [`BusTransport`] channel and carries the
//! per-session protocol state (host address, reply deadline, address
//! change policy). Every operation is single-shot: one request, at most
//! one awaited reply, no internal retries. The bus gives no sequence
//! numbers, so correlation is purely by identifier. The client therefore
//! never has more than one request in flight, and multi-node work
//! (scans, per-frame sync passes) runs node by node.
//!
//! ## Operation summary
//!
//! - [`probe`](RobstrideClient::probe) / [`scan`](RobstrideClient::scan):
//!   liveness probing via mechanical-position reads
//! - [`change_address`](RobstrideClient::change_address): address
//!   reassignment confirmed by re-probing
//! - [`enable`](RobstrideClient::enable) /
//!   [`disable`](RobstrideClient::disable): fire-and-forget motion control
//! - [`set_run_mode`](RobstrideClient::set_run_mode) /
//!   [`set_gains`](RobstrideClient::set_gains): register writes
//! - [`send_position`](RobstrideClient::send_position) /
//!   [`read_position`](RobstrideClient::read_position): the position
//!   command/feedback pair

use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::bus::BusTransport;
use crate::consts::{
    DEFAULT_HOST_ADDRESS, DEFAULT_REPLY_TIMEOUT_MS, DEFAULT_REPROBE_ATTEMPTS,
    DEFAULT_SETTLE_DELAY_MS, EXT_ID_MASK, NODE_ADDRESS_MAX, PARAM_GAIN_KD, PARAM_GAIN_KI,
    PARAM_GAIN_KP, PARAM_LOC_REF, PARAM_MECHPOS, PARAM_RUN_MODE,
};
use crate::error::{Error, Result};
use crate::frame::{
    CommandType, ParamValue, Reply, encode_change_address, encode_command, encode_param,
    decode_reply, reply_id,
};

/// Driver for a session against one CAN channel.
///
/// Generic over the transport so the same protocol logic runs against
/// hardware ([`SocketCanBus`](crate::bus::SocketCanBus)) and the simulated
/// bus ([`SimBus`](crate::bus::SimBus)).
#[derive(Debug)]
pub struct RobstrideClient<B: BusTransport> {
    bus: B,
    host: u16,
    reply_timeout: Duration,
    settle_delay: Duration,
    reprobe_attempts: u32,
}

impl<B: BusTransport> RobstrideClient<B> {
    /// Wraps an opened channel with the default host address and timing
    /// policy.
    pub fn new(bus: B) -> Self {
        RobstrideClient {
            bus,
            host: DEFAULT_HOST_ADDRESS,
            reply_timeout: Duration::from_millis(DEFAULT_REPLY_TIMEOUT_MS),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            reprobe_attempts: DEFAULT_REPROBE_ATTEMPTS,
        }
    }

    /// Sets the 16-bit host/master address embedded in every request.
    pub fn set_host(&mut self, host: u16) {
        self.host = host;
    }

    /// The session's host address.
    pub fn host(&self) -> u16 {
        self.host
    }

    /// Sets the per-operation reply deadline. Keep it short (≤100ms);
    /// it bounds every probe and position read, and a sync pass pays it
    /// once per silent node.
    pub fn set_reply_timeout(&mut self, timeout: Duration) {
        self.reply_timeout = timeout;
    }

    /// Sets how long [`change_address`](Self::change_address) waits before
    /// the post-change probes, and between probe rounds.
    pub fn set_settle_delay(&mut self, delay: Duration) {
        self.settle_delay = delay;
    }

    /// Sets how many probe rounds [`change_address`](Self::change_address)
    /// runs before reporting the change unconfirmed.
    pub fn set_reprobe_attempts(&mut self, attempts: u32) {
        self.reprobe_attempts = attempts.max(1);
    }

    /// Releases the underlying channel.
    pub fn into_bus(self) -> B {
        self.bus
    }

    /// Direct access to the transport, mainly for simulated-bus setups.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// One read-parameter exchange: request, wait for the exact reply
    /// identifier, decode.
    fn read_param(&mut self, node: u8, index: u16) -> Result<Reply> {
        let request = encode_param(
            CommandType::ReadParam,
            self.host,
            node,
            index,
            ParamValue::U32(0),
        );
        self.bus.send(&request)?;
        let expected = reply_id(CommandType::ReadParam, self.host, node);
        let frame = self.bus.receive_once(expected, EXT_ID_MASK, self.reply_timeout)?;
        let reply = decode_reply(&frame)?;
        if reply.index != index {
            return Err(Error::MalformedFrame("reply echoes a different index"));
        }
        Ok(reply)
    }

    fn write_param(&mut self, node: u8, index: u16, value: ParamValue) -> Result<()> {
        let frame = encode_param(CommandType::WriteParam, self.host, node, index, value);
        self.bus.send(&frame)
    }

    /// Tests whether `node` currently answers on the bus.
    ///
    /// Sends one mechanical-position read and waits one reply deadline. A
    /// timeout or malformed reply both count as "not live"; only transport
    /// faults propagate.
    pub fn probe(&mut self, node: u8) -> Result<bool> {
        match self.read_param(node, PARAM_MECHPOS) {
            Ok(_) => Ok(true),
            Err(Error::Timeout) => Ok(false),
            Err(Error::MalformedFrame(reason)) => {
                warn!("probe of node {node}: malformed reply ({reason}), treating as absent");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Probes every address in `range` sequentially and returns the set
    /// that answered.
    ///
    /// One request is outstanding at a time: replies carry no sequence
    /// numbers, so each probe must conclude before the next is sent. There
    /// are no retries: a single missed reply reports the address absent,
    /// which is acceptable for a liveness probe. Addresses outside 0–127
    /// are skipped.
    pub fn scan(&mut self, range: impl IntoIterator<Item = u8>) -> Result<BTreeSet<u8>> {
        self.bus.drain();
        let mut live = BTreeSet::new();
        for address in range {
            if address > NODE_ADDRESS_MAX {
                continue;
            }
            if self.probe(address)? {
                let _ = live.insert(address);
            }
        }
        info!("scan found {} live node(s): {:?}", live.len(), live);
        Ok(live)
    }

    /// Moves the node at `old` to address `new`, persistently.
    ///
    /// The device sends no acknowledgement, so the change is confirmed by
    /// re-probing after a settle delay: `new` must answer and `old` must
    /// not, within the configured number of probe rounds, otherwise
    /// [`Error::AddressChangeUnconfirmed`] is returned and both addresses
    /// should be treated as possibly stale.
    ///
    /// A pre-probe warns when `new` is already occupied. The firmware
    /// accepts the reassignment anyway and the occupant is silently
    /// shadowed; nothing at the wire level can prevent that.
    pub fn change_address(&mut self, old: u8, new: u8) -> Result<()> {
        if old > NODE_ADDRESS_MAX || new > NODE_ADDRESS_MAX {
            return Err(Error::MalformedFrame("node address out of range"));
        }
        if self.probe(new)? {
            warn!("address change {old} -> {new}: target address is already live");
        }
        debug!("address change {old} -> {new}");
        self.bus.send(&encode_change_address(old, new, self.host))?;

        for attempt in 1..=self.reprobe_attempts {
            thread::sleep(self.settle_delay);
            let new_live = self.probe(new)?;
            let old_live = self.probe(old)?;
            if new_live && !old_live {
                info!("address change {old} -> {new} confirmed");
                return Ok(());
            }
            debug!(
                "address change {old} -> {new}: probe round {attempt} \
                 (new live: {new_live}, old live: {old_live})"
            );
        }
        warn!("address change {old} -> {new} unconfirmed");
        Err(Error::AddressChangeUnconfirmed {
            old,
            new,
            attempts: self.reprobe_attempts,
        })
    }

    /// Enables motion control on `node`. Fire-and-forget: success means
    /// the frame was accepted for transmission; actual motor state is only
    /// observable through subsequent position reads.
    pub fn enable(&mut self, node: u8) -> Result<()> {
        debug!("enable node {node}");
        self.bus.send(&encode_command(CommandType::Enable, self.host, node))
    }

    /// Disables `node`. Fire-and-forget, like [`enable`](Self::enable).
    pub fn disable(&mut self, node: u8) -> Result<()> {
        debug!("disable node {node}");
        self.bus.send(&encode_command(CommandType::Disable, self.host, node))
    }

    /// Writes the run-mode register. Position control wants
    /// [`RUN_MODE_POSITION`](crate::consts::RUN_MODE_POSITION).
    pub fn set_run_mode(&mut self, node: u8, mode: u32) -> Result<()> {
        debug!("node {node} run mode <- {mode}");
        self.write_param(node, PARAM_RUN_MODE, ParamValue::U32(mode))
    }

    /// Writes the three gain registers, one frame each.
    ///
    /// The protocol has no atomic multi-register write, so a bus fault
    /// between frames leaves the gains partially applied. Each register
    /// write is independently retryable; this function stops at the first
    /// send error.
    pub fn set_gains(&mut self, node: u8, kp: f32, ki: f32, kd: f32) -> Result<()> {
        debug!("node {node} gains <- kp {kp} ki {ki} kd {kd}");
        self.write_param(node, PARAM_GAIN_KP, ParamValue::F32(kp))?;
        self.write_param(node, PARAM_GAIN_KI, ParamValue::F32(ki))?;
        self.write_param(node, PARAM_GAIN_KD, ParamValue::F32(kd))
    }

    /// Writes a position target in radians.
    ///
    /// The node must already be enabled and in position run-mode for the
    /// command to have a defined mechanical effect; the protocol does not
    /// enforce that ordering and neither does this function.
    pub fn send_position(&mut self, node: u8, radians: f32) -> Result<()> {
        self.write_param(node, PARAM_LOC_REF, ParamValue::F32(radians))
    }

    /// Reads the mechanical position in radians.
    ///
    /// This is the sole feedback channel; there is no push telemetry.
    /// [`Error::Timeout`] is the normal negative outcome of polling a node
    /// that went quiet.
    pub fn read_position(&mut self, node: u8) -> Result<f32> {
        Ok(self.read_param(node, PARAM_MECHPOS)?.value_f32())
    }
}
