use glam::{DMat2, DVec2, DVec3};
use slotmap::SlotMap;

use crate::forces::Force;
use crate::handles::{BodyKey, ElementKey, ForceKey};

/// A rigid rectangular region, or a point particle when both extents are
/// zero. Pose and velocity are generalized 3-vectors `(x, y, theta)`.
#[derive(Debug, Clone)]
pub struct Body {
    pose: DVec3,
    velocity: DVec3,
    size: DVec2,
    mass: f64,
    moment: f64,
    radius: f64,
    pub friction: f64,
    pub color: u32,

    // Per-step scratch, written by the solver.
    pub(crate) prev_velocity: DVec3,
    pub(crate) last_pose: DVec3,
    pub(crate) inertial_pose: DVec3,
    pub is_dragged: bool,
    pub added_drag_velocity: DVec3,

    // Back-references to everything touching this body. Maintained by the
    // world; must always equal the set of forces/elements listing this body.
    pub(crate) forces: Vec<ForceKey>,
    pub(crate) elements: Vec<ElementKey>,
}

impl Body {
    /// A rectangle of extents `size` with the given density. Density zero
    /// makes the body static.
    pub fn rect(position: DVec2, rotation: f64, size: DVec2, density: f64, friction: f64) -> Self {
        let mass = density * size.x * size.y;
        Self::with_mass(DVec3::new(position.x, position.y, rotation), size, mass, friction)
    }

    /// A point particle with an explicit mass. Mass zero pins it in place.
    pub fn particle(position: DVec2, mass: f64) -> Self {
        Self::with_mass(
            DVec3::new(position.x, position.y, 0.0),
            DVec2::ZERO,
            mass,
            0.0,
        )
    }

    fn with_mass(pose: DVec3, size: DVec2, mass: f64, friction: f64) -> Self {
        let extent_sq = size.length_squared();
        // Particles get a unit gyration radius so the angular pivot of the
        // 3x3 block solve stays positive.
        let moment = if extent_sq > 0.0 {
            mass * extent_sq / 12.0
        } else {
            mass
        };
        Self {
            pose,
            velocity: DVec3::ZERO,
            size,
            mass,
            moment,
            radius: 0.5 * extent_sq.sqrt(),
            friction: friction.clamp(0.0, 1.0),
            color: 0xffffff,
            prev_velocity: DVec3::ZERO,
            last_pose: pose,
            inertial_pose: pose,
            is_dragged: false,
            added_drag_velocity: DVec3::ZERO,
            forces: Vec::new(),
            elements: Vec::new(),
        }
    }

    pub fn pose(&self) -> DVec3 {
        self.pose
    }

    pub fn position(&self) -> DVec2 {
        DVec2::new(self.pose.x, self.pose.y)
    }

    pub fn angle(&self) -> f64 {
        self.pose.z
    }

    pub fn set_pose(&mut self, pose: DVec3) {
        self.pose = pose;
    }

    pub(crate) fn translate(&mut self, delta: DVec3) {
        self.pose += delta;
    }

    pub fn velocity(&self) -> DVec3 {
        self.velocity
    }

    /// No-op on static bodies.
    pub fn set_velocity(&mut self, velocity: DVec3) {
        if self.is_static() {
            return;
        }
        self.velocity = velocity;
        self.prev_velocity = velocity;
    }

    pub(crate) fn set_velocity_internal(&mut self, velocity: DVec3) {
        self.velocity = velocity;
    }

    pub fn rotation(&self) -> DMat2 {
        DMat2::from_angle(self.pose.z)
    }

    pub fn size(&self) -> DVec2 {
        self.size
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn moment(&self) -> f64 {
        self.moment
    }

    /// Radius of the bounding circle used by the broadphase.
    pub fn bounding_radius(&self) -> f64 {
        self.radius
    }

    pub fn is_static(&self) -> bool {
        self.mass <= 0.0
    }

    /// True if any force references both this body and `other`. Scans the
    /// force back-reference list.
    pub fn is_constrained_to(&self, other: BodyKey, forces: &SlotMap<ForceKey, Force>) -> bool {
        self.forces
            .iter()
            .filter_map(|&fk| forces.get(fk))
            .any(|force| force.touches(other))
    }

    pub fn forces(&self) -> &[ForceKey] {
        &self.forces
    }

    pub fn elements(&self) -> &[ElementKey] {
        &self.elements
    }

    pub(crate) fn link_force(&mut self, key: ForceKey) {
        if !self.forces.contains(&key) {
            self.forces.push(key);
        }
    }

    pub(crate) fn unlink_force(&mut self, key: ForceKey) {
        self.forces.retain(|&k| k != key);
    }

    pub(crate) fn link_element(&mut self, key: ElementKey) {
        if !self.elements.contains(&key) {
            self.elements.push(key);
        }
    }

    pub(crate) fn unlink_element(&mut self, key: ElementKey) {
        self.elements.retain(|&k| k != key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rect_mass_properties() {
        let body = Body::rect(DVec2::ZERO, 0.0, DVec2::new(2.0, 4.0), 1.5, 0.5);
        assert_relative_eq!(body.mass(), 12.0);
        assert_relative_eq!(body.moment(), 12.0 * (4.0 + 16.0) / 12.0);
        assert_relative_eq!(body.bounding_radius(), 0.5 * 20.0_f64.sqrt());
        assert!(!body.is_static());
    }

    #[test]
    fn zero_density_rect_is_static() {
        let body = Body::rect(DVec2::ZERO, 0.0, DVec2::new(2.0, 4.0), 0.0, 0.5);
        assert!(body.is_static());
    }

    #[test]
    fn particle_has_positive_moment() {
        let body = Body::particle(DVec2::new(1.0, 2.0), 3.0);
        assert_relative_eq!(body.mass(), 3.0);
        assert!(body.moment() > 0.0);
        assert_relative_eq!(body.bounding_radius(), 0.0);
    }

    #[test]
    fn velocity_setter_is_noop_on_static_bodies() {
        let mut body = Body::rect(DVec2::ZERO, 0.0, DVec2::ONE, 0.0, 0.0);
        body.set_velocity(DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(body.velocity(), DVec3::ZERO);

        let mut dynamic = Body::rect(DVec2::ZERO, 0.0, DVec2::ONE, 1.0, 0.0);
        dynamic.set_velocity(DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(dynamic.velocity(), DVec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn rotation_matches_angle() {
        let body = Body::rect(
            DVec2::ZERO,
            std::f64::consts::FRAC_PI_2,
            DVec2::ONE,
            1.0,
            0.0,
        );
        let rotated = body.rotation() * DVec2::X;
        assert_relative_eq!(rotated.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(rotated.y, 1.0, epsilon = 1e-12);
    }
}
