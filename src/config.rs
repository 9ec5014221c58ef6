//! JSON persistence of the bus settings and node list.
//!
//! The document format:
//!
//! ```json
//! {
//!   "can": { "interface": "socketcan", "channel": "can0", "bitrate": 1000000 },
//!   "nodes": [
//!     { "id": 1, "name": "Shoulder", "object": "Arm", "mode": "RUN",
//!       "kp": 1.0, "ki": 0.0, "kd": 0.0, "scale": 1.0, "offset": 0.0 }
//!   ]
//! }
//! ```
//!
//! Every field has a default, so partial documents load. An `object` name
//! that no longer resolves in the current scene is not an error here;
//! resolution happens when the entries are pushed into the registry
//! ([`NodeRegistry::upsert_from_config`](crate::registry::NodeRegistry::upsert_from_config)).
//! Saving includes every registered node, simulated or real.

use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::registry::{Node, NodeRegistry, SyncMode};

/// CAN channel settings.
///
/// `bitrate` is recorded for the operator; the SocketCAN backend cannot
/// set it (the link is configured at the OS level).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanConfig {
    /// Bus driver name, e.g. `"socketcan"`.
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Channel name, e.g. `"can0"`.
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Link bitrate in bit/s.
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
}

impl Default for CanConfig {
    fn default() -> Self {
        CanConfig {
            interface: default_interface(),
            channel: default_channel(),
            bitrate: default_bitrate(),
        }
    }
}

fn default_interface() -> String {
    "socketcan".to_string()
}

fn default_channel() -> String {
    "can0".to_string()
}

fn default_bitrate() -> u32 {
    1_000_000
}

fn default_name() -> String {
    "Node".to_string()
}

fn default_mode() -> String {
    "RUN".to_string()
}

fn default_kp() -> f32 {
    1.0
}

fn default_scale() -> f32 {
    1.0
}

/// One persisted node entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Bus address.
    pub id: u8,
    /// User-assigned label.
    #[serde(default = "default_name")]
    pub name: String,
    /// Linked scene object name; empty when unlinked.
    #[serde(default)]
    pub object: String,
    /// `"RUN"` or `"LEARN"`; anything else loads as `"RUN"`.
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Proportional gain.
    #[serde(default = "default_kp")]
    pub kp: f32,
    /// Integral gain.
    #[serde(default)]
    pub ki: f32,
    /// Derivative gain.
    #[serde(default)]
    pub kd: f32,
    /// Radians-to-rotation multiplier.
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// Radians-to-rotation offset.
    #[serde(default)]
    pub offset: f32,
}

impl NodeConfig {
    /// Snapshot of a registry entry.
    pub fn from_node(node: &Node) -> Self {
        NodeConfig {
            id: node.address,
            name: node.name.clone(),
            object: node.object.clone().unwrap_or_default(),
            mode: match node.mode {
                SyncMode::Run => "RUN".to_string(),
                SyncMode::Learn => "LEARN".to_string(),
            },
            kp: node.kp,
            ki: node.ki,
            kd: node.kd,
            scale: node.scale,
            offset: node.offset,
        }
    }

    /// Materializes a registry entry. The object link is carried over
    /// verbatim; resolution against the scene is the registry's job.
    pub fn into_node(self) -> Node {
        let mut node = Node::new(self.id);
        node.name = self.name;
        node.object = (!self.object.is_empty()).then_some(self.object);
        node.mode = match self.mode.as_str() {
            "LEARN" => SyncMode::Learn,
            _ => SyncMode::Run,
        };
        node.kp = self.kp;
        node.ki = self.ki;
        node.kd = self.kd;
        node.scale = self.scale;
        node.offset = self.offset;
        node
    }
}

/// The whole persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Bus settings.
    #[serde(default)]
    pub can: CanConfig,
    /// Node list.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

impl Config {
    /// Captures the current session: bus settings plus every registered
    /// node, simulated or real.
    pub fn from_registry(can: CanConfig, registry: &NodeRegistry) -> Self {
        Config {
            can,
            nodes: registry.iter().map(NodeConfig::from_node).collect(),
        }
    }

    /// Reads and parses a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&text)?;
        info!(
            "loaded config: {} node(s), channel {}",
            config.nodes.len(),
            config.can.channel
        );
        Ok(config)
    }

    /// Writes the document as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), text)?;
        info!("saved config: {} node(s)", self.nodes.len());
        Ok(())
    }
}
