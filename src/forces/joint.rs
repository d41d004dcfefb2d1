use glam::{DVec2, DVec3};

use crate::handles::BodyKey;
use crate::world::RenderFeed;

use super::{Bodies, ForceBodies, MAX_ROWS, Row, RowDerivatives};

/// Rigid attachment between two bodies, or between a body and a fixed world
/// anchor. Three rows: two translational, one angular. The angular row is
/// scaled by a torque-arm surrogate so its dual is commensurate with the
/// translational ones.
#[derive(Debug, Clone)]
pub struct Joint {
    body_a: Option<BodyKey>,
    body_b: BodyKey,
    /// Local offset in A's frame, or a world position when unanchored.
    anchor_a: DVec2,
    anchor_b: DVec2,
    rest_angle: f64,
    torque_arm: f64,
    c0: DVec3,
    rows: [Row; 3],
}

impl Joint {
    /// Connects `a` and `b` at the given local anchors. `stiffness` is per
    /// row (x, y, angular); `f64::INFINITY` makes a row hard. The current
    /// relative rotation is captured as the rest angle.
    pub fn between(
        bodies: &Bodies,
        a: BodyKey,
        b: BodyKey,
        anchor_a: DVec2,
        anchor_b: DVec2,
        stiffness: DVec3,
        fracture: Option<f64>,
    ) -> Self {
        let mut joint = Self::raw(Some(a), b, anchor_a, anchor_b, stiffness, fracture);
        joint.capture_rest(bodies);
        joint
    }

    /// Pins body `b` to the world position `anchor_world`.
    pub fn to_world(
        bodies: &Bodies,
        anchor_world: DVec2,
        b: BodyKey,
        anchor_b: DVec2,
        stiffness: DVec3,
        fracture: Option<f64>,
    ) -> Self {
        let mut joint = Self::raw(None, b, anchor_world, anchor_b, stiffness, fracture);
        joint.capture_rest(bodies);
        joint
    }

    fn raw(
        body_a: Option<BodyKey>,
        body_b: BodyKey,
        anchor_a: DVec2,
        anchor_b: DVec2,
        stiffness: DVec3,
        fracture: Option<f64>,
    ) -> Self {
        let mut rows = [
            Row::soft(stiffness.x),
            Row::soft(stiffness.y),
            Row::soft(stiffness.z),
        ];
        rows[2].fracture = fracture.unwrap_or(f64::INFINITY);
        Self {
            body_a,
            body_b,
            anchor_a,
            anchor_b,
            rest_angle: 0.0,
            torque_arm: (anchor_a + anchor_b).length_squared(),
            c0: DVec3::ZERO,
            rows,
        }
    }

    fn capture_rest(&mut self, bodies: &Bodies) {
        // For a world anchor the arm is just the body-side offset.
        if self.body_a.is_none() {
            self.torque_arm = self.anchor_b.length_squared();
        }
        let (pa, ta) = self.world_anchor_a(bodies);
        let (pb, tb) = self.world_anchor_b(bodies);
        self.rest_angle = ta - tb;
        self.c0 = DVec3::new(pa.x - pb.x, pa.y - pb.y, 0.0);
    }

    /// Moves the world anchor; used by the drag handle. No effect on a
    /// two-body joint.
    pub fn set_world_anchor(&mut self, anchor: DVec2) {
        if self.body_a.is_none() {
            self.anchor_a = anchor;
        }
    }

    pub fn world_anchor(&self) -> Option<DVec2> {
        self.body_a.is_none().then_some(self.anchor_a)
    }

    fn world_anchor_a(&self, bodies: &Bodies) -> (DVec2, f64) {
        match self.body_a {
            Some(key) => {
                let body = &bodies[key];
                (
                    body.position() + body.rotation() * self.anchor_a,
                    body.angle(),
                )
            }
            None => (self.anchor_a, 0.0),
        }
    }

    fn world_anchor_b(&self, bodies: &Bodies) -> (DVec2, f64) {
        let body = &bodies[self.body_b];
        (
            body.position() + body.rotation() * self.anchor_b,
            body.angle(),
        )
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn bodies(&self) -> ForceBodies {
        match self.body_a {
            Some(a) => ForceBodies::two(a, self.body_b),
            None => ForceBodies::one(self.body_b),
        }
    }

    pub(crate) fn compute_constraints(&mut self, bodies: &Bodies, alpha: f64) {
        let (pa, ta) = self.world_anchor_a(bodies);
        let (pb, tb) = self.world_anchor_b(bodies);
        let raw = DVec3::new(
            pa.x - pb.x,
            pa.y - pb.y,
            (ta - tb - self.rest_angle) * self.torque_arm,
        );
        for i in 0..3 {
            self.rows[i].c = if self.rows[i].is_hard() {
                raw[i] - (1.0 - alpha) * self.c0[i]
            } else {
                raw[i]
            };
        }
    }

    pub(crate) fn derivatives(
        &self,
        bodies: &Bodies,
        body: BodyKey,
        out: &mut [RowDerivatives; MAX_ROWS],
    ) {
        for d in out.iter_mut() {
            *d = RowDerivatives::default();
        }
        if self.body_a == Some(body) {
            let arm = bodies[body].rotation() * self.anchor_a;
            out[0].j = DVec3::new(1.0, 0.0, -arm.y);
            out[0].h.z_axis.z = -arm.x;
            out[1].j = DVec3::new(0.0, 1.0, arm.x);
            out[1].h.z_axis.z = -arm.y;
            out[2].j = DVec3::new(0.0, 0.0, self.torque_arm);
        } else if self.body_b == body {
            let arm = bodies[body].rotation() * self.anchor_b;
            out[0].j = DVec3::new(-1.0, 0.0, arm.y);
            out[0].h.z_axis.z = arm.x;
            out[1].j = DVec3::new(0.0, -1.0, -arm.x);
            out[1].h.z_axis.z = arm.y;
            out[2].j = DVec3::new(0.0, 0.0, -self.torque_arm);
        }
    }

    pub(crate) fn emit_render(&self, bodies: &Bodies, feed: &mut RenderFeed) {
        let (pa, _) = self.world_anchor_a(bodies);
        let (pb, _) = self.world_anchor_b(bodies);
        let thickness = if self.rows[0].is_hard() { 1.0 } else { 0.45 };
        feed.push_line(pa, pb, thickness);
    }
}
