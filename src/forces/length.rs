use glam::{DVec2, DVec3};

use crate::handles::BodyKey;
use crate::math::perp;
use crate::world::RenderFeed;

use super::{Bodies, ForceBodies, MAX_ROWS, Row, RowDerivatives};

const DEGENERATE_EPS: f64 = 1.0e-9;
/// Stiffness substituted for zero compliance; near-hard but still on the
/// penalty path.
const RIGID_STIFFNESS: f64 = 1.0e12;

/// Distance constraint with a compliance knob: `compliance > 0` behaves like
/// a stiff spring with `k = 1/compliance`, zero compliance is near-hard.
/// Unlike [`super::Spring`] it contributes no Hessian.
#[derive(Debug, Clone)]
pub struct Length {
    body_a: BodyKey,
    body_b: BodyKey,
    anchor_a: DVec2,
    anchor_b: DVec2,
    rest_length: f64,
    rows: [Row; 1],
}

impl Length {
    /// `rest_length = None` captures the current anchor distance.
    pub fn new(
        bodies: &Bodies,
        a: BodyKey,
        b: BodyKey,
        anchor_a: DVec2,
        anchor_b: DVec2,
        compliance: f64,
        rest_length: Option<f64>,
    ) -> Self {
        let stiffness = if compliance > 0.0 {
            1.0 / compliance
        } else {
            RIGID_STIFFNESS
        };
        let mut length = Self {
            body_a: a,
            body_b: b,
            anchor_a,
            anchor_b,
            rest_length: 0.0,
            rows: [Row::soft(stiffness)],
        };
        length.rest_length =
            rest_length.unwrap_or_else(|| length.separation(bodies).length());
        length
    }

    pub fn rest_length(&self) -> f64 {
        self.rest_length
    }

    fn separation(&self, bodies: &Bodies) -> DVec2 {
        self.world_anchor(bodies, self.body_a, self.anchor_a)
            - self.world_anchor(bodies, self.body_b, self.anchor_b)
    }

    fn world_anchor(&self, bodies: &Bodies, key: BodyKey, local: DVec2) -> DVec2 {
        let body = &bodies[key];
        body.position() + body.rotation() * local
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn bodies(&self) -> ForceBodies {
        ForceBodies::two(self.body_a, self.body_b)
    }

    pub(crate) fn compute_constraints(&mut self, bodies: &Bodies) {
        self.rows[0].c = self.separation(bodies).length() - self.rest_length;
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
        let d = self.separation(bodies);
        let len = d.length();
        if len < DEGENERATE_EPS {
            return;
        }
        let n = d / len;

        let (sign, local) = if body == self.body_a {
            (1.0, self.anchor_a)
        } else if body == self.body_b {
            (-1.0, self.anchor_b)
        } else {
            return;
        };
        let arm = bodies[body].rotation() * local;
        out[0].j = DVec3::new(sign * n.x, sign * n.y, sign * n.dot(perp(arm)));
    }

    pub(crate) fn emit_render(&self, bodies: &Bodies, feed: &mut RenderFeed) {
        feed.push_line(
            self.world_anchor(bodies, self.body_a, self.anchor_a),
            self.world_anchor(bodies, self.body_b, self.anchor_b),
            1.0,
        );
    }
}
