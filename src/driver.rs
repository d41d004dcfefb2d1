use glam::{DVec2, DVec3};
use log::trace;

use crate::forces::{Force, Joint};
use crate::handles::{BodyKey, ForceKey};
use crate::world::World;

/// Default rectangular limit of the reference scene; bodies beyond it are
/// culled by the driver, not by the solver.
pub const WORLD_BOUNDS: DVec2 = DVec2::new(400.0, 300.0);

/// Linear stiffness of the pointer drag joint.
const DRAG_STIFFNESS: f64 = 1.0e4;

/// Fixed-tick accumulator: frames feed wall time in, at most
/// `max_substeps` physics steps run per frame and the excess backlog is
/// discarded so a slow frame cannot spiral.
#[derive(Debug)]
pub struct FixedStepDriver {
    accumulator: f64,
    max_substeps: u32,
}

impl Default for FixedStepDriver {
    fn default() -> Self {
        Self {
            accumulator: 0.0,
            max_substeps: 5,
        }
    }
}

impl FixedStepDriver {
    pub fn new(max_substeps: u32) -> Self {
        Self {
            accumulator: 0.0,
            max_substeps: max_substeps.max(1),
        }
    }

    /// Returns the number of physics steps taken this frame.
    pub fn advance(&mut self, world: &mut World, frame_dt: f64) -> u32 {
        self.accumulator += frame_dt.max(0.0);
        let dt = world.time_step();
        let mut steps = 0;
        while self.accumulator >= dt {
            if steps == self.max_substeps {
                trace!(
                    "discarding {:.1} ms of catch-up backlog",
                    self.accumulator * 1.0e3
                );
                self.accumulator %= dt;
                break;
            }
            world.step(dt);
            self.accumulator -= dt;
            steps += 1;
        }
        steps
    }
}

/// Removes every body whose position left the limit box. Returns how many
/// were destroyed.
pub fn cull_out_of_bounds(world: &mut World, bounds: DVec2) -> usize {
    let doomed: Vec<BodyKey> = world
        .bodies()
        .filter(|(_, body)| {
            let p = body.position();
            p.x.abs() > bounds.x || p.y.abs() > bounds.y
        })
        .map(|(key, _)| key)
        .collect();
    let count = doomed.len();
    for key in doomed {
        world.remove_body(key);
    }
    count
}

/// A live pointer drag: a one-body joint whose world anchor follows the
/// pointer.
#[derive(Debug, Clone, Copy)]
pub struct DragHandle {
    force: ForceKey,
    body: BodyKey,
}

impl DragHandle {
    pub fn body(&self) -> BodyKey {
        self.body
    }
}

/// Grabs `body` at `grab_point` (world space) with a soft joint.
pub fn begin_drag(world: &mut World, body: BodyKey, grab_point: DVec2) -> Option<DragHandle> {
    let target = world.body(body)?;
    if target.is_static() {
        return None;
    }
    let local = target.rotation().transpose() * (grab_point - target.position());
    let joint = Joint::to_world(
        &world.bodies,
        grab_point,
        body,
        local,
        DVec3::new(DRAG_STIFFNESS, DRAG_STIFFNESS, 0.0),
        None,
    );
    let force = world.add_force(Force::Joint(joint));
    world.body_mut(body)?.is_dragged = true;
    Some(DragHandle { force, body })
}

/// Follows a pointer move: retargets the anchor and records the pointer
/// velocity so the next velocity extraction folds it in.
pub fn update_drag(
    world: &mut World,
    handle: &DragHandle,
    anchor: DVec2,
    pointer_velocity: DVec2,
) {
    if let Some(Force::Joint(joint)) = world.force_mut(handle.force) {
        joint.set_world_anchor(anchor);
    }
    world.set_drag_velocity(handle.body, pointer_velocity);
}

pub fn end_drag(world: &mut World, handle: DragHandle) {
    world.remove_force(handle.force);
    if let Some(body) = world.body_mut(handle.body) {
        body.is_dragged = false;
        body.added_drag_velocity = DVec3::ZERO;
    }
}
