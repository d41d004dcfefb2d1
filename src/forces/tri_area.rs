use glam::DVec3;

use crate::handles::BodyKey;
use crate::math::{cross2, perp};

use super::{Bodies, ForceBodies, MAX_ROWS, Row, RowDerivatives};

/// Preserves the signed area of a triangle of three particles. One soft row;
/// each vertex Jacobian is half the perpendicular of the opposite edge.
#[derive(Debug, Clone)]
pub struct TriArea {
    vertices: [BodyKey; 3],
    rest_area: f64,
    rows: [Row; 1],
}

impl TriArea {
    /// `rest_area = None` captures the current signed area.
    pub fn new(
        bodies: &Bodies,
        vertices: [BodyKey; 3],
        stiffness: f64,
        rest_area: Option<f64>,
    ) -> Self {
        let mut force = Self {
            vertices,
            rest_area: 0.0,
            rows: [Row::soft(stiffness)],
        };
        force.rest_area = rest_area.unwrap_or_else(|| force.signed_area(bodies));
        force
    }

    pub fn rest_area(&self) -> f64 {
        self.rest_area
    }

    fn signed_area(&self, bodies: &Bodies) -> f64 {
        let pa = bodies[self.vertices[0]].position();
        let pb = bodies[self.vertices[1]].position();
        let pc = bodies[self.vertices[2]].position();
        0.5 * cross2(pb - pa, pc - pa)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn bodies(&self) -> ForceBodies {
        ForceBodies::three(self.vertices[0], self.vertices[1], self.vertices[2])
    }

    pub(crate) fn compute_constraints(&mut self, bodies: &Bodies) {
        self.rows[0].c = self.signed_area(bodies) - self.rest_area;
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
        let Some(index) = self.vertices.iter().position(|&v| v == body) else {
            return;
        };
        let next = bodies[self.vertices[(index + 1) % 3]].position();
        let prev = bodies[self.vertices[(index + 2) % 3]].position();
        let edge = 0.5 * perp(prev - next);
        out[0].j = DVec3::new(edge.x, edge.y, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use approx::assert_relative_eq;
    use glam::DVec2;
    use slotmap::SlotMap;

    fn triangle() -> (Bodies, [BodyKey; 3]) {
        let mut bodies: Bodies = SlotMap::with_key();
        let a = bodies.insert(Body::particle(DVec2::ZERO, 1.0));
        let b = bodies.insert(Body::particle(DVec2::new(2.0, 0.0), 1.0));
        let c = bodies.insert(Body::particle(DVec2::new(0.0, 2.0), 1.0));
        (bodies, [a, b, c])
    }

    #[test]
    fn rest_area_is_captured() {
        let (bodies, keys) = triangle();
        let area = TriArea::new(&bodies, keys, 1000.0, None);
        assert_relative_eq!(area.rest_area(), 2.0);
    }

    #[test]
    fn constraint_tracks_area_change() {
        let (mut bodies, keys) = triangle();
        let mut area = TriArea::new(&bodies, keys, 1000.0, None);
        // Double the height: area goes from 2 to 4.
        let pose = bodies[keys[2]].pose();
        bodies[keys[2]].set_pose(DVec3::new(pose.x, 4.0, pose.z));
        area.compute_constraints(&bodies);
        assert_relative_eq!(area.rows()[0].c, 2.0);
    }

    #[test]
    fn vertex_jacobians_sum_to_zero() {
        let (bodies, keys) = triangle();
        let area = TriArea::new(&bodies, keys, 1000.0, None);
        let mut total = DVec3::ZERO;
        let mut derivs = [RowDerivatives::default(); MAX_ROWS];
        for &key in &keys {
            area.derivatives(&bodies, key, &mut derivs);
            total += derivs[0].j;
        }
        assert_relative_eq!(total.length(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn jacobian_matches_finite_difference() {
        let (mut bodies, keys) = triangle();
        let mut area = TriArea::new(&bodies, keys, 1000.0, None);
        let mut derivs = [RowDerivatives::default(); MAX_ROWS];
        area.derivatives(&bodies, keys[1], &mut derivs);

        let h = 1.0e-6;
        area.compute_constraints(&bodies);
        let c0 = area.rows()[0].c;
        let pose = bodies[keys[1]].pose();
        bodies[keys[1]].set_pose(pose + DVec3::new(h, 0.0, 0.0));
        area.compute_constraints(&bodies);
        let cx = area.rows()[0].c;
        bodies[keys[1]].set_pose(pose + DVec3::new(0.0, h, 0.0));
        area.compute_constraints(&bodies);
        let cy = area.rows()[0].c;

        assert_relative_eq!(derivs[0].j.x, (cx - c0) / h, epsilon = 1e-5);
        assert_relative_eq!(derivs[0].j.y, (cy - c0) / h, epsilon = 1e-5);
    }
}
