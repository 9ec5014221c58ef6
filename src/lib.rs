//! # robstride-can
//!
//! A driver for RobStride rotary actuators speaking their private CAN
//! protocol: node discovery, persistent address reassignment, position
//! control, and a per-frame Run/Learn loop that ties live motion data to
//! a host application's animation state.
//!
//! The protocol is request/reply over 29-bit extended identifiers, one
//! frame per exchange, with replies correlated only by identifier — no
//! sequence numbers. This driver therefore keeps exactly one request
//! outstanding per channel and bounds every wait with a caller-visible
//! timeout.
//!
//! ## Crate features
//! | Feature               | Description |
//! |-----------------------|-------------|
//! | `socketcan` (default) | Linux SocketCAN hardware backend ([`bus::SocketCanBus`]) |
//!
//! The simulated backend ([`bus::SimBus`]) is always built, so the whole
//! protocol stack runs and tests without hardware.
//!
//! ## Layers
//!
//! - [`frame`]: pure encode/decode of identifiers and 8-byte payloads
//! - [`bus`]: the transport seam — one trait, two backends
//! - [`client`]: discovery, addressing, and motion control over a channel
//! - [`registry`]: the in-memory node table
//! - [`sync`]: the per-animation-frame Run/Learn state machine
//! - [`config`]: JSON persistence of bus settings and the node list
//!
//! ## Usage
//!
//! ```rust
//! use robstride_can::bus::{SimBus, SimNode};
//! use robstride_can::client::RobstrideClient;
//!
//! let mut bus = SimBus::new();
//! bus.add_node(5, SimNode::default());
//!
//! let mut client = RobstrideClient::new(bus);
//! let live = client.scan(0..=127)?;
//! assert!(live.contains(&5));
//!
//! client.set_run_mode(5, robstride_can::consts::RUN_MODE_POSITION)?;
//! client.enable(5)?;
//! client.send_position(5, 1.5708)?;
//! let radians = client.read_position(5)?;
//! assert!((radians - 1.5708).abs() < 1e-6);
//! # Ok::<(), robstride_can::error::Error>(())
//! ```
//!
//! Against hardware, swap the bus:
//!
//! ```rust,no_run
//! # #[cfg(feature = "socketcan")] {
//! use robstride_can::bus::SocketCanBus;
//! use robstride_can::client::RobstrideClient;
//!
//! let bus = SocketCanBus::open("can0")?;
//! let mut client = RobstrideClient::new(bus);
//! # let _ = client.scan(0..=127)?;
//! # }
//! # Ok::<(), robstride_can::error::Error>(())
//! ```
//!
//! ## Integration notes
//!
//! - The bus is lossy and single-frame: a missed probe reply reports the
//!   address absent. Discovery is a liveness check, not a guarantee.
//! - Keep per-operation timeouts short (≤100ms); a sync pass over many
//!   nodes pays one round trip per node, serially.
//! - The SocketCAN link must be configured before the channel is opened:
//!   `ip link set can0 up type can bitrate 1000000`.

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results
)]

pub mod bus;
pub mod client;
pub mod config;
pub mod consts;
pub mod error;
pub mod frame;
pub mod registry;
pub mod sync;

pub use bus::{BusTransport, SimBus, SimNode};
pub use client::RobstrideClient;
pub use config::{CanConfig, Config, NodeConfig};
pub use error::{Error, Result};
pub use registry::{Node, NodeRegistry, SyncMode};
pub use sync::{Scene, SyncEngine};

#[cfg(feature = "socketcan")]
pub use bus::SocketCanBus;
