//! Error taxonomy for the protocol layer.
//!
//! Nothing in this crate retries automatically; every protocol function is
//! single-shot so that callers (discovery, the sync loop, a frontend)
//! control retry policy and backoff themselves. [`Error::Timeout`] is the
//! common, expected outcome of probing an address that is not there; it
//! is a negative result, not a fault.

use thiserror::Error;

/// Errors surfaced by the transport and protocol layers.
#[derive(Debug, Error)]
pub enum Error {
    /// No matching reply arrived within the caller's deadline. Expected
    /// and common: discovery treats it as "address absent", position
    /// reads as "no sample this cycle".
    #[error("no matching frame within the deadline")]
    Timeout,

    /// A reply arrived but could not be parsed: wrong payload length or
    /// identifier fields outside their valid ranges.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// The post-change re-probes contradicted expectation: the new address
    /// did not come up live, or the old one still answers. Both entries
    /// should be treated as possibly stale until a manual retry settles it.
    #[error("address change {old} -> {new} unconfirmed after {attempts} re-probes")]
    AddressChangeUnconfirmed {
        /// Address the node held before the change.
        old: u8,
        /// Address the node was asked to adopt.
        new: u8,
        /// Probe rounds attempted before giving up.
        attempts: u32,
    },

    /// The CAN channel could not be opened. Fatal for the session; there
    /// is no automatic fallback to the simulated backend.
    #[error("CAN channel unavailable: {0}")]
    TransportUnavailable(String),

    /// A send or receive failed below the protocol layer.
    #[error("transport I/O error")]
    Io(#[from] std::io::Error),

    /// The persisted configuration document did not parse.
    #[error("configuration parse error")]
    Config(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Whether this error is the ordinary negative outcome of a probe or
    /// poll rather than a fault worth logging.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}
