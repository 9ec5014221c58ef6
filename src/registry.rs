//! In-memory table of known nodes.
//!
//! The registry is a pure state container keyed by node address: no I/O,
//! just the transition logic between scan results, configuration loads,
//! and the per-frame sync pass. It is mutated only from the scan path and
//! the config-load path, never concurrently with a sync pass; the host's
//! single-threaded frame callback makes that exclusivity natural, and the
//! plain `&mut` receivers keep it honest.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::consts::POSITION_RANGE_RAD;

/// Which direction a node synchronizes in. Mutually exclusive,
/// user-selected, applied per animation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// The scene object's authored rotation drives outbound motor
    /// commands. Never writes animation data.
    #[default]
    Run,
    /// Incoming encoder feedback drives and overwrites the object's
    /// rotation keyframes. The node stays disabled in this mode.
    Learn,
}

/// One known actuator and its user-assigned settings.
///
/// `name`, `object`, `mode`, the gains, `scale`/`offset`, and the rotation
/// bounds are user state that survives rescans (keyed by `address`).
/// `online` and `last_position` are ephemeral, refreshed by every scan or
/// poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Bus address, 0–127.
    pub address: u8,
    /// Human-readable label.
    pub name: String,
    /// Name of the linked scene object, if the link resolved.
    pub object: Option<String>,
    /// Run/Learn selection.
    pub mode: SyncMode,
    /// Proportional gain.
    pub kp: f32,
    /// Integral gain.
    pub ki: f32,
    /// Derivative gain.
    pub kd: f32,
    /// Multiplier between motor radians and scene rotation.
    pub scale: f32,
    /// Additive offset between motor radians and scene rotation.
    pub offset: f32,
    /// Lowest commandable rotation, radians.
    pub min_rotation: f32,
    /// Highest commandable rotation, radians.
    pub max_rotation: f32,
    /// Whether the node answered the most recent scan or poll.
    pub online: bool,
    /// Most recent encoder reading, radians.
    pub last_position: Option<f32>,
    /// Simulated nodes are exempt from scan eviction.
    pub simulated: bool,
}

impl Node {
    /// A freshly discovered node with default settings.
    pub fn new(address: u8) -> Self {
        Node {
            address,
            name: format!("Node {address}"),
            object: None,
            mode: SyncMode::Run,
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            scale: 1.0,
            offset: 0.0,
            min_rotation: -POSITION_RANGE_RAD,
            max_rotation: POSITION_RANGE_RAD,
            online: false,
            last_position: None,
            simulated: false,
        }
    }

    /// The node's current gain triple.
    pub fn gains(&self) -> (f32, f32, f32) {
        (self.kp, self.ki, self.kd)
    }
}

/// Registry of known nodes, ordered by address.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<u8, Node>,
}

impl NodeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        NodeRegistry::default()
    }

    /// The node at `address`, if known.
    pub fn get(&self, address: u8) -> Option<&Node> {
        self.nodes.get(&address)
    }

    /// Mutable access to the node at `address`.
    pub fn get_mut(&mut self, address: u8) -> Option<&mut Node> {
        self.nodes.get_mut(&address)
    }

    /// Inserts or replaces a node entry.
    pub fn insert(&mut self, node: Node) {
        let _ = self.nodes.insert(node.address, node);
    }

    /// Nodes in ascending address order, the fixed order the sync loop
    /// walks them in.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Mutable iteration in ascending address order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    /// The set of known addresses.
    pub fn addresses(&self) -> BTreeSet<u8> {
        self.nodes.keys().copied().collect()
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Reconciles the registry with a scan result.
    ///
    /// Live addresses not yet known are added with default settings,
    /// marked online. Known nodes that answered keep their user settings
    /// and are marked online. Known nodes absent from `live` are evicted
    /// entirely (their user-assigned settings are lost) unless they are
    /// simulated, which stay and remain online.
    pub fn apply_scan_result(&mut self, live: &BTreeSet<u8>) {
        let evict: Vec<u8> = self
            .nodes
            .values()
            .filter(|node| !node.simulated && !live.contains(&node.address))
            .map(|node| node.address)
            .collect();
        for address in evict {
            debug!("evicting node {address}: absent from scan");
            let _ = self.nodes.remove(&address);
        }
        for &address in live {
            let node = self.nodes.entry(address).or_insert_with(|| Node::new(address));
            node.online = true;
        }
    }

    /// Replaces the entire node list from loaded configuration entries.
    ///
    /// Each entry's scene-object name is kept only when `resolve` says it
    /// still exists in the current scene; otherwise the link is left unset
    /// (not an error; the object may come back).
    pub fn upsert_from_config(
        &mut self,
        entries: impl IntoIterator<Item = Node>,
        resolve: impl Fn(&str) -> bool,
    ) {
        self.nodes.clear();
        for mut node in entries {
            if let Some(object) = node.object.take() {
                if resolve(&object) {
                    node.object = Some(object);
                } else {
                    debug!(
                        "node {}: scene object '{object}' not found, link left unset",
                        node.address
                    );
                }
            }
            let _ = self.nodes.insert(node.address, node);
        }
    }

    /// Records a fresh encoder reading for `address`.
    pub fn set_position(&mut self, address: u8, radians: f32) {
        if let Some(node) = self.nodes.get_mut(&address) {
            node.last_position = Some(radians);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_adds_unknown_live_nodes_with_defaults() {
        let mut registry = NodeRegistry::new();
        registry.apply_scan_result(&BTreeSet::from([1, 5]));
        assert_eq!(registry.addresses(), BTreeSet::from([1, 5]));
        let node = registry.get(5).unwrap();
        assert!(node.online);
        assert_eq!(node.gains(), (1.0, 0.0, 0.0));
        assert_eq!((node.scale, node.offset), (1.0, 0.0));
    }

    #[test]
    fn test_scan_preserves_user_fields_for_surviving_nodes() {
        let mut registry = NodeRegistry::new();
        let mut node = Node::new(1);
        node.name = "Shoulder".into();
        node.kp = 3.0;
        node.mode = SyncMode::Learn;
        registry.insert(node);

        registry.apply_scan_result(&BTreeSet::from([1]));
        let node = registry.get(1).unwrap();
        assert_eq!(node.name, "Shoulder");
        assert_eq!(node.kp, 3.0);
        assert_eq!(node.mode, SyncMode::Learn);
        assert!(node.online);
    }

    #[test]
    fn test_scan_evicts_absent_nodes() {
        let mut registry = NodeRegistry::new();
        registry.insert(Node::new(1));
        registry.insert(Node::new(2));
        registry.apply_scan_result(&BTreeSet::from([2]));
        assert!(registry.get(1).is_none());
        assert!(registry.get(2).is_some());
    }

    #[test]
    fn test_scan_spares_simulated_nodes() {
        let mut registry = NodeRegistry::new();
        let mut sim = Node::new(9);
        sim.simulated = true;
        sim.online = true;
        registry.insert(sim);
        registry.apply_scan_result(&BTreeSet::new());
        assert!(registry.get(9).is_some());
    }

    #[test]
    fn test_upsert_from_config_relinks_resolvable_objects() {
        let mut registry = NodeRegistry::new();
        registry.insert(Node::new(3)); // replaced wholesale

        let mut a = Node::new(1);
        a.object = Some("Arm".into());
        let mut b = Node::new(2);
        b.object = Some("Gone".into());

        registry.upsert_from_config([a, b], |name| name == "Arm");
        assert_eq!(registry.addresses(), BTreeSet::from([1, 2]));
        assert_eq!(registry.get(1).unwrap().object.as_deref(), Some("Arm"));
        assert_eq!(registry.get(2).unwrap().object, None);
    }

    #[test]
    fn test_set_position_updates_last_known() {
        let mut registry = NodeRegistry::new();
        registry.insert(Node::new(1));
        registry.set_position(1, 0.5);
        assert_eq!(registry.get(1).unwrap().last_position, Some(0.5));
        registry.set_position(42, 1.0); // unknown address: no-op
    }
}
