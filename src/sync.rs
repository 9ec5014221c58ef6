//! Per-frame Run/Learn synchronization between nodes and scene objects.
//!
//! [`SyncEngine::sync_frame`] is driven once per animation-frame advance
//! during playback. For every registered node with a resolved object link
//! it does one of two things:
//!
//! - **Run**: the object's authored Z-rotation (animation curve if one
//!   exists, else the live value) is mapped through the node's
//!   scale/offset, clamped to its rotation bounds, and sent as a position
//!   target. A pure consumer of animation data; it never writes a keyframe.
//! - **Learn**: the encoder is polled, the reading mapped back through
//!   scale/offset, and the result written as the object's Z-rotation
//!   keyframe at the current frame, overwriting whatever key was there.
//!   Encoder data always wins for the current frame; the node is kept
//!   disabled so it can be moved by hand.
//!
//! Nodes are processed one at a time in ascending address order — the bus
//! allows only one outstanding request, so per-frame latency is the sum of
//! per-node round trips, each bounded by the client's reply timeout.
//!
//! Mode transitions take effect on the next processed frame. Each frame's
//! action is independent and idempotent per node, so no drain or handshake
//! is needed; if the host fires the frame callback twice for one rendered
//! frame, the duplicate Learn write lands on the same frame with the same
//! recomputed value (modulo live encoder drift) and is harmless.

use std::collections::HashMap;

use log::{debug, trace};

use crate::bus::BusTransport;
use crate::client::RobstrideClient;
use crate::consts::RUN_MODE_POSITION;
use crate::error::{Error, Result};
use crate::registry::{NodeRegistry, SyncMode};

/// The minimal scene-graph contract the sync loop needs from the host.
///
/// Objects are addressed by name. All rotations are the object's local
/// Z-rotation in radians.
pub trait Scene {
    /// Whether an object by this name exists in the current scene.
    fn has_object(&self, name: &str) -> bool;

    /// The authored Z-rotation at `frame`, evaluated from the object's
    /// animation curve. `None` when the object has no curve (or no
    /// object); the caller then falls back to [`current_z`](Self::current_z).
    fn authored_z(&self, name: &str, frame: i32) -> Option<f32>;

    /// The object's live Z-rotation value.
    fn current_z(&self, name: &str) -> Option<f32>;

    /// Sets the object's Z-rotation and inserts a keyframe at `frame`,
    /// replacing any existing key at that exact frame.
    fn set_z_keyframe(&mut self, name: &str, frame: i32, radians: f32);
}

/// Change threshold below which a Run-mode target is not resent.
const RESEND_EPSILON: f32 = 1e-6;

/// Per-session sync state: change-detection caches so gains and targets
/// only hit the bus when they actually changed, and per-node mode
/// bookkeeping so enable/disable and run-mode writes happen on
/// transitions, not every frame.
#[derive(Debug, Default)]
pub struct SyncEngine {
    last_gains: HashMap<u8, (f32, f32, f32)>,
    last_sent: HashMap<u8, f32>,
    last_mode: HashMap<u8, SyncMode>,
}

impl SyncEngine {
    /// A fresh engine with empty caches.
    pub fn new() -> Self {
        SyncEngine::default()
    }

    /// Drops all cached state, forcing the next frame to re-prepare every
    /// node. Call after a reconnect or a configuration load.
    pub fn reset(&mut self) {
        self.last_gains.clear();
        self.last_sent.clear();
        self.last_mode.clear();
    }

    /// Runs one synchronization pass for animation frame `frame`.
    ///
    /// Nodes without a resolved object link are skipped. A node that times
    /// out is skipped for this frame (and its last-known position left
    /// untouched); transport faults abort the pass.
    pub fn sync_frame<B: BusTransport, S: Scene>(
        &mut self,
        client: &mut RobstrideClient<B>,
        registry: &mut NodeRegistry,
        scene: &mut S,
        frame: i32,
    ) -> Result<()> {
        // Snapshot: the pass reads settings and writes back positions, and
        // the registry cannot be borrowed both ways across the loop.
        let nodes: Vec<_> = registry.iter().cloned().collect();
        for node in nodes {
            let Some(object) = node.object.as_deref() else {
                continue;
            };
            if !scene.has_object(object) {
                continue;
            }
            self.prepare_mode(client, node.address, node.mode)?;
            match node.mode {
                SyncMode::Run => {
                    self.run_pass(client, &node, scene, frame, object)?;
                }
                SyncMode::Learn => {
                    match client.read_position(node.address) {
                        Ok(raw) => {
                            registry.set_position(node.address, raw);
                            let value = node.offset + node.scale * raw;
                            scene.set_z_keyframe(object, frame, value);
                            trace!(
                                "node {} learn: raw {raw} -> '{object}' z {value} @ frame {frame}",
                                node.address
                            );
                        }
                        Err(Error::Timeout) => {
                            debug!("node {} learn: no sample this frame", node.address);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(())
    }

    /// Issues the enable/disable and run-mode writes owed on a mode
    /// transition (or on the first frame a node is processed).
    fn prepare_mode<B: BusTransport>(
        &mut self,
        client: &mut RobstrideClient<B>,
        address: u8,
        mode: SyncMode,
    ) -> Result<()> {
        if self.last_mode.get(&address) == Some(&mode) {
            return Ok(());
        }
        match mode {
            SyncMode::Run => {
                client.set_run_mode(address, RUN_MODE_POSITION)?;
                client.enable(address)?;
            }
            // Learn never enables: the operator moves the motor by hand.
            SyncMode::Learn => client.disable(address)?,
        }
        let _ = self.last_mode.insert(address, mode);
        // Stale across a mode change: force re-send on return to Run.
        let _ = self.last_sent.remove(&address);
        Ok(())
    }

    fn run_pass<B: BusTransport, S: Scene>(
        &mut self,
        client: &mut RobstrideClient<B>,
        node: &crate::registry::Node,
        scene: &S,
        frame: i32,
        object: &str,
    ) -> Result<()> {
        if self.last_gains.get(&node.address) != Some(&node.gains()) {
            client.set_gains(node.address, node.kp, node.ki, node.kd)?;
            let _ = self.last_gains.insert(node.address, node.gains());
        }
        let Some(z) = scene
            .authored_z(object, frame)
            .or_else(|| scene.current_z(object))
        else {
            return Ok(());
        };
        if node.scale == 0.0 {
            return Ok(());
        }
        let target = ((z - node.offset) / node.scale)
            .clamp(node.min_rotation, node.max_rotation);
        let unchanged = self
            .last_sent
            .get(&node.address)
            .is_some_and(|last| (last - target).abs() <= RESEND_EPSILON);
        if !unchanged {
            client.send_position(node.address, target)?;
            let _ = self.last_sent.insert(node.address, target);
            trace!(
                "node {} run: '{object}' z {z} -> target {target} @ frame {frame}",
                node.address
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{SimBus, SimNode};
    use crate::registry::Node;
    use std::time::Duration;

    #[derive(Default)]
    struct MockObject {
        current: f32,
        curve: HashMap<i32, f32>,
        keyframe_writes: Vec<(i32, f32)>,
    }

    #[derive(Default)]
    struct MockScene {
        objects: HashMap<String, MockObject>,
    }

    impl MockScene {
        fn with_object(name: &str) -> Self {
            let mut scene = MockScene::default();
            let _ = scene.objects.insert(name.to_string(), MockObject::default());
            scene
        }

        fn object(&self, name: &str) -> &MockObject {
            &self.objects[name]
        }

        fn object_mut(&mut self, name: &str) -> &mut MockObject {
            self.objects.get_mut(name).unwrap()
        }
    }

    impl Scene for MockScene {
        fn has_object(&self, name: &str) -> bool {
            self.objects.contains_key(name)
        }

        fn authored_z(&self, name: &str, frame: i32) -> Option<f32> {
            self.objects.get(name)?.curve.get(&frame).copied()
        }

        fn current_z(&self, name: &str) -> Option<f32> {
            Some(self.objects.get(name)?.current)
        }

        fn set_z_keyframe(&mut self, name: &str, frame: i32, radians: f32) {
            if let Some(object) = self.objects.get_mut(name) {
                object.current = radians;
                let _ = object.curve.insert(frame, radians);
                object.keyframe_writes.push((frame, radians));
            }
        }
    }

    fn setup(mode: SyncMode) -> (RobstrideClient<SimBus>, NodeRegistry, SyncEngine) {
        let mut bus = SimBus::new();
        bus.add_node(1, SimNode::default());
        let mut client = RobstrideClient::new(bus);
        client.set_settle_delay(Duration::ZERO);

        let mut registry = NodeRegistry::new();
        let mut node = Node::new(1);
        node.object = Some("Arm".into());
        node.mode = mode;
        registry.insert(node);

        (client, registry, SyncEngine::new())
    }

    #[test]
    fn test_run_sends_authored_rotation_without_writing_keyframes() {
        let (mut client, mut registry, mut engine) = setup(SyncMode::Run);
        let mut scene = MockScene::with_object("Arm");
        let _ = scene.object_mut("Arm").curve.insert(10, 1.5708);

        engine
            .sync_frame(&mut client, &mut registry, &mut scene, 10)
            .unwrap();

        let sim = client.bus_mut().node(1).unwrap().clone();
        assert!((sim.position - 1.5708).abs() < 1e-4);
        assert!(sim.enabled);
        assert_eq!(sim.run_mode, RUN_MODE_POSITION);
        assert!(scene.object("Arm").keyframe_writes.is_empty());
    }

    #[test]
    fn test_run_falls_back_to_live_value_without_curve() {
        let (mut client, mut registry, mut engine) = setup(SyncMode::Run);
        let mut scene = MockScene::with_object("Arm");
        scene.object_mut("Arm").current = 0.75;

        engine
            .sync_frame(&mut client, &mut registry, &mut scene, 3)
            .unwrap();
        assert!((client.bus_mut().node(1).unwrap().position - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_run_applies_mapping_and_bounds() {
        let (mut client, mut registry, mut engine) = setup(SyncMode::Run);
        {
            let node = registry.get_mut(1).unwrap();
            node.scale = 2.0;
            node.offset = 0.1;
            node.max_rotation = 0.5;
        }
        let mut scene = MockScene::with_object("Arm");
        // (2.1 - 0.1) / 2.0 = 1.0, clamped to the 0.5 bound.
        scene.object_mut("Arm").current = 2.1;

        engine
            .sync_frame(&mut client, &mut registry, &mut scene, 0)
            .unwrap();
        assert!((client.bus_mut().node(1).unwrap().position - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_run_resends_only_on_change() {
        let (mut client, mut registry, mut engine) = setup(SyncMode::Run);
        let mut scene = MockScene::with_object("Arm");
        scene.object_mut("Arm").current = 0.25;

        engine
            .sync_frame(&mut client, &mut registry, &mut scene, 1)
            .unwrap();
        // Perturb the sim directly; an unchanged target must not overwrite it.
        client.bus_mut().node_mut(1).unwrap().position = 9.0;
        engine
            .sync_frame(&mut client, &mut registry, &mut scene, 2)
            .unwrap();
        assert_eq!(client.bus_mut().node(1).unwrap().position, 9.0);

        scene.object_mut("Arm").current = 0.5;
        engine
            .sync_frame(&mut client, &mut registry, &mut scene, 3)
            .unwrap();
        assert!((client.bus_mut().node(1).unwrap().position - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_run_sends_gains_once_until_changed() {
        let (mut client, mut registry, mut engine) = setup(SyncMode::Run);
        let mut scene = MockScene::with_object("Arm");

        engine
            .sync_frame(&mut client, &mut registry, &mut scene, 1)
            .unwrap();
        assert_eq!(client.bus_mut().node(1).unwrap().kp, 1.0);

        // Perturb the sim's gain register; with no registry change the
        // next frame must not rewrite it.
        client.bus_mut().node_mut(1).unwrap().kp = 42.0;
        engine
            .sync_frame(&mut client, &mut registry, &mut scene, 2)
            .unwrap();
        assert_eq!(client.bus_mut().node(1).unwrap().kp, 42.0);

        registry.get_mut(1).unwrap().kp = 2.5;
        engine
            .sync_frame(&mut client, &mut registry, &mut scene, 3)
            .unwrap();
        assert_eq!(client.bus_mut().node(1).unwrap().kp, 2.5);
    }

    #[test]
    fn test_run_sends_all_zero_gains_on_first_frame() {
        let (mut client, mut registry, mut engine) = setup(SyncMode::Run);
        {
            let node = registry.get_mut(1).unwrap();
            node.kp = 0.0;
            node.ki = 0.0;
            node.kd = 0.0;
        }
        let mut scene = MockScene::with_object("Arm");

        engine
            .sync_frame(&mut client, &mut registry, &mut scene, 1)
            .unwrap();
        // The sim's firmware-default kp is 1.0; the configured zero must
        // land even though it equals an empty cache's default.
        assert_eq!(client.bus_mut().node(1).unwrap().kp, 0.0);
    }

    #[test]
    fn test_learn_keyframes_mapped_encoder_value_and_overwrites() {
        let (mut client, mut registry, mut engine) = setup(SyncMode::Learn);
        {
            let node = registry.get_mut(1).unwrap();
            node.scale = 2.0;
            node.offset = 0.1;
        }
        client.bus_mut().node_mut(1).unwrap().position = 0.5;

        let mut scene = MockScene::with_object("Arm");
        let _ = scene.object_mut("Arm").curve.insert(7, -3.0); // prior key

        engine
            .sync_frame(&mut client, &mut registry, &mut scene, 7)
            .unwrap();

        let object = scene.object("Arm");
        assert!((object.curve[&7] - 1.1).abs() < 1e-6);
        assert_eq!(object.keyframe_writes.len(), 1);
        assert!(!client.bus_mut().node(1).unwrap().enabled);
        assert_eq!(registry.get(1).unwrap().last_position, Some(0.5));
    }

    #[test]
    fn test_learn_timeout_skips_node_for_the_frame() {
        let (mut client, mut registry, mut engine) = setup(SyncMode::Learn);
        // No node on the bus at address 2: reads time out.
        let mut ghost = Node::new(2);
        ghost.object = Some("Arm".into());
        ghost.mode = SyncMode::Learn;
        registry.insert(ghost);

        let mut scene = MockScene::with_object("Arm");
        engine
            .sync_frame(&mut client, &mut registry, &mut scene, 1)
            .unwrap();
        // Node 1 still produced its keyframe; node 2 was skipped quietly.
        assert_eq!(scene.object("Arm").keyframe_writes.len(), 1);
        assert_eq!(registry.get(2).unwrap().last_position, None);
    }

    #[test]
    fn test_mode_transition_takes_effect_next_frame() {
        let (mut client, mut registry, mut engine) = setup(SyncMode::Run);
        let mut scene = MockScene::with_object("Arm");

        engine
            .sync_frame(&mut client, &mut registry, &mut scene, 1)
            .unwrap();
        assert!(client.bus_mut().node(1).unwrap().enabled);

        registry.get_mut(1).unwrap().mode = SyncMode::Learn;
        engine
            .sync_frame(&mut client, &mut registry, &mut scene, 2)
            .unwrap();
        assert!(!client.bus_mut().node(1).unwrap().enabled);
        assert_eq!(scene.object("Arm").keyframe_writes.len(), 1);
    }

    #[test]
    fn test_unlinked_or_missing_objects_are_skipped() {
        let (mut client, mut registry, mut engine) = setup(SyncMode::Run);
        registry.get_mut(1).unwrap().object = Some("NotInScene".into());
        let mut scene = MockScene::with_object("Arm");

        engine
            .sync_frame(&mut client, &mut registry, &mut scene, 1)
            .unwrap();
        // Nothing was prepared or sent.
        assert!(!client.bus_mut().node(1).unwrap().enabled);
    }
}
