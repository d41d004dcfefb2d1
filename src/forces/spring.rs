use glam::{DMat2, DVec2, DVec3};

use crate::handles::BodyKey;
use crate::math::{outer2, perp};
use crate::world::RenderFeed;

use super::{Bodies, ForceBodies, MAX_ROWS, Row, RowDerivatives};

const DEGENERATE_EPS: f64 = 1.0e-9;

/// Soft distance spring between two anchors. One penalty row with finite
/// stiffness; the penalty ramps toward the spring constant so the converged
/// force is `k * (length - rest)`.
#[derive(Debug, Clone)]
pub struct Spring {
    body_a: BodyKey,
    body_b: BodyKey,
    anchor_a: DVec2,
    anchor_b: DVec2,
    rest_length: f64,
    rows: [Row; 1],
}

impl Spring {
    /// `rest_length = None` captures the current anchor distance.
    pub fn new(
        bodies: &Bodies,
        a: BodyKey,
        b: BodyKey,
        anchor_a: DVec2,
        anchor_b: DVec2,
        stiffness: f64,
        rest_length: Option<f64>,
    ) -> Self {
        let mut spring = Self {
            body_a: a,
            body_b: b,
            anchor_a,
            anchor_b,
            rest_length: 0.0,
            rows: [Row::soft(stiffness)],
        };
        spring.rest_length =
            rest_length.unwrap_or_else(|| spring.separation(bodies).length());
        spring
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
            // Coincident anchors: the row goes quiescent until the
            // geometry recovers.
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
        let s_arm = perp(arm);

        out[0].j = DVec3::new(sign * n.x, sign * n.y, sign * n.dot(s_arm));

        // d^2 |d| / dq^2: lateral projector over the length, with the
        // rotational coupling through the rotated anchor.
        let lateral = (DMat2::IDENTITY - outer2(n, n)) * (1.0 / len);
        let mixed = lateral * s_arm;
        let angular = -n.dot(arm) + s_arm.dot(lateral * s_arm);

        out[0].h.x_axis = DVec3::new(lateral.x_axis.x, lateral.x_axis.y, mixed.x);
        out[0].h.y_axis = DVec3::new(lateral.y_axis.x, lateral.y_axis.y, mixed.y);
        out[0].h.z_axis = DVec3::new(mixed.x, mixed.y, angular);
    }

    pub(crate) fn emit_render(&self, bodies: &Bodies, feed: &mut RenderFeed) {
        feed.push_line(
            self.world_anchor(bodies, self.body_a, self.anchor_a),
            self.world_anchor(bodies, self.body_b, self.anchor_b),
            0.45,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use approx::assert_relative_eq;
    use glam::DMat3;
    use slotmap::SlotMap;

    fn setup(pos_b: DVec2) -> (Bodies, BodyKey, BodyKey) {
        let mut bodies: Bodies = SlotMap::with_key();
        let a = bodies.insert(Body::particle(DVec2::ZERO, 1.0));
        let b = bodies.insert(Body::particle(pos_b, 1.0));
        (bodies, a, b)
    }

    #[test]
    fn constraint_measures_stretch() {
        let (bodies, a, b) = setup(DVec2::new(3.0, 0.0));
        let mut spring = Spring::new(&bodies, a, b, DVec2::ZERO, DVec2::ZERO, 100.0, Some(2.0));
        spring.compute_constraints(&bodies);
        assert_relative_eq!(spring.rows()[0].c, 1.0);
    }

    #[test]
    fn rest_length_defaults_to_current_distance() {
        let (bodies, a, b) = setup(DVec2::new(0.0, -4.0));
        let spring = Spring::new(&bodies, a, b, DVec2::ZERO, DVec2::ZERO, 100.0, None);
        assert_relative_eq!(spring.rest_length(), 4.0);
    }

    #[test]
    fn jacobian_is_unit_direction() {
        let (bodies, a, b) = setup(DVec2::new(3.0, 4.0));
        let spring = Spring::new(&bodies, a, b, DVec2::ZERO, DVec2::ZERO, 100.0, Some(5.0));
        let mut derivs = [RowDerivatives::default(); MAX_ROWS];
        spring.derivatives(&bodies, a, &mut derivs);
        // a is at the origin: direction a - b is (-0.6, -0.8)
        assert_relative_eq!(derivs[0].j.x, -0.6, epsilon = 1e-12);
        assert_relative_eq!(derivs[0].j.y, -0.8, epsilon = 1e-12);
        spring.derivatives(&bodies, b, &mut derivs);
        assert_relative_eq!(derivs[0].j.x, 0.6, epsilon = 1e-12);
        assert_relative_eq!(derivs[0].j.y, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn degenerate_geometry_zeroes_derivatives() {
        let (bodies, a, b) = setup(DVec2::ZERO);
        let spring = Spring::new(&bodies, a, b, DVec2::ZERO, DVec2::ZERO, 100.0, Some(1.0));
        let mut derivs = [RowDerivatives::default(); MAX_ROWS];
        spring.derivatives(&bodies, a, &mut derivs);
        assert_eq!(derivs[0].j, DVec3::ZERO);
        assert_eq!(derivs[0].h, DMat3::ZERO);
    }
}
