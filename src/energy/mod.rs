// Distributed under the GNU Affero General Public License v3.0 or later.
// See accompanying file LICENSE or https://www.gnu.org/licenses/agpl-3.0.html for details.

mod material;

pub use material::Material;

use glam::{DMat2, DMat3, DVec2, DVec3};

use crate::handles::BodyKey;
use crate::math::{Svd2, cofactor2, outer2, svd2};
use crate::world::RenderFeed;

use crate::forces::Bodies;

/// Floor for the ramped effective stiffness.
pub const STIFFNESS_EPS: f64 = 1.0e-6;
/// Determinant below which an element counts as inverted and the recovery
/// penalty takes over.
const INVERSION_EPS: f64 = 1.0e-2;
/// Floor for projected Hessian eigenvalues.
const EIGEN_EPS: f64 = 1.0e-10;

/// How the per-element Hessian is made positive definite before it enters
/// the block solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectionMode {
    /// Clamp eigenvalues from below.
    #[default]
    Clamp,
    /// Take absolute values.
    Absolute,
    /// Pick between the two from the trust-region ratio of the last
    /// iteration.
    Adaptive,
}

impl ProjectionMode {
    fn project(&self, eigenvalue: f64, trust_ratio: f64) -> f64 {
        match self {
            ProjectionMode::Clamp => eigenvalue.max(EIGEN_EPS),
            ProjectionMode::Absolute => eigenvalue.abs().max(EIGEN_EPS),
            ProjectionMode::Adaptive => {
                if (trust_ratio - 1.0).abs() > 0.01 {
                    eigenvalue.abs().max(EIGEN_EPS)
                } else {
                    eigenvalue.max(EIGEN_EPS)
                }
            }
        }
    }
}

/// A hyperelastic triangle over three particle bodies.
#[derive(Debug, Clone)]
pub struct Element {
    vertices: [BodyKey; 3],
    dm_inv: DMat2,
    rest_area: f64,
    grad_n: [DVec2; 3],
    material: Material,
    mu: f64,
    la: f64,
    stiffness_target: f64,
    pub(crate) stiffness_eff: f64,
    pub(crate) strain: f64,
    energy: f64,
}

impl Element {
    /// Builds an element from Young's modulus and Poisson ratio
    /// (plane strain). Returns `None` for a degenerate or inverted rest
    /// triangle.
    pub fn from_young(
        bodies: &Bodies,
        vertices: [BodyKey; 3],
        material: Material,
        young: f64,
        poisson: f64,
    ) -> Option<Self> {
        let mu = young / (2.0 * (1.0 + poisson));
        let la = young * poisson / ((1.0 + poisson) * (1.0 - 2.0 * poisson));
        Self::build(bodies, vertices, material, mu, la, young)
    }

    /// Builds an element directly from the Lame parameters.
    pub fn from_lame(
        bodies: &Bodies,
        vertices: [BodyKey; 3],
        material: Material,
        mu: f64,
        la: f64,
    ) -> Option<Self> {
        let young = mu * (3.0 * la + 2.0 * mu) / (la + mu);
        Self::build(bodies, vertices, material, mu, la, young)
    }

    fn build(
        bodies: &Bodies,
        vertices: [BodyKey; 3],
        material: Material,
        mu: f64,
        la: f64,
        stiffness_target: f64,
    ) -> Option<Self> {
        let p0 = bodies.get(vertices[0])?.position();
        let p1 = bodies.get(vertices[1])?.position();
        let p2 = bodies.get(vertices[2])?.position();

        let dm = DMat2::from_cols(p1 - p0, p2 - p0);
        let det = dm.determinant();
        if det <= 0.0 {
            log::warn!("rejecting degenerate element with rest determinant {det}");
            return None;
        }

        let dm_inv = dm.inverse();
        // Shape function gradients are the columns of Dm^-T; the first one
        // balances the other two.
        let grad_n1 = DVec2::new(dm_inv.x_axis.x, dm_inv.y_axis.x);
        let grad_n2 = DVec2::new(dm_inv.x_axis.y, dm_inv.y_axis.y);
        let grad_n0 = -grad_n1 - grad_n2;

        Some(Self {
            vertices,
            dm_inv,
            rest_area: 0.5 * det,
            grad_n: [grad_n0, grad_n1, grad_n2],
            material,
            mu,
            la,
            stiffness_target,
            stiffness_eff: 1.0,
            strain: 0.0,
            energy: 0.0,
        })
    }

    pub fn vertices(&self) -> [BodyKey; 3] {
        self.vertices
    }

    pub fn touches(&self, key: BodyKey) -> bool {
        self.vertices.contains(&key)
    }

    pub fn rest_area(&self) -> f64 {
        self.rest_area
    }

    pub fn material(&self) -> Material {
        self.material
    }

    /// Cached `A0 * psi` from the latest evaluation.
    pub fn energy(&self) -> f64 {
        self.energy
    }

    pub fn effective_stiffness(&self) -> f64 {
        self.stiffness_eff
    }

    pub fn target_stiffness(&self) -> f64 {
        self.stiffness_target
    }

    /// Fraction the ramp has reached; scales gradient and Hessian when the
    /// energy ramp is enabled.
    pub(crate) fn ramp_fraction(&self) -> f64 {
        self.stiffness_eff / self.stiffness_target
    }

    /// Per-step warm-start decay of the ramped stiffness.
    pub(crate) fn initialize(&mut self, gamma: f64) {
        let lo = STIFFNESS_EPS.min(self.stiffness_target);
        self.stiffness_eff = (gamma * self.stiffness_eff).clamp(lo, self.stiffness_target);
    }

    /// Grows the ramp by the current strain measure.
    pub(crate) fn grow_stiffness(&mut self, beta_energy: f64) {
        self.stiffness_eff =
            (self.stiffness_eff + beta_energy * self.strain).min(self.stiffness_target);
    }

    pub(crate) fn refresh_strain(&mut self, bodies: &Bodies) {
        let (f, j) = self.deformation_gradient(bodies);
        self.strain = self.material.strain_measure(&f, j);
    }

    pub fn deformation_gradient(&self, bodies: &Bodies) -> (DMat2, f64) {
        let p0 = bodies[self.vertices[0]].position();
        let p1 = bodies[self.vertices[1]].position();
        let p2 = bodies[self.vertices[2]].position();
        let ds = DMat2::from_cols(p1 - p0, p2 - p0);
        let f = ds * self.dm_inv;
        (f, f.determinant())
    }

    /// Gradient and SPD-projected Hessian of the element energy with
    /// respect to the pose of `body`. The angular block is zero: elements
    /// act on particles.
    pub(crate) fn compute_energy_terms(
        &mut self,
        bodies: &Bodies,
        body: BodyKey,
        mode: ProjectionMode,
        trust_ratio: f64,
    ) -> (DVec3, DMat3) {
        let Some(index) = self.vertices.iter().position(|&v| v == body) else {
            return (DVec3::ZERO, DMat3::ZERO);
        };
        let grad_n = self.grad_n[index];
        let (f, j) = self.deformation_gradient(bodies);

        if j <= INVERSION_EPS {
            return self.inversion_terms(&f, j, grad_n);
        }

        self.energy = self.rest_area * self.material.psi(self.mu, self.la, &f, j);

        let p = self.material.piola(self.mu, self.la, &f, j);
        let grad = self.rest_area * (p * grad_n);

        let hess = self.projected_hessian(&f, grad_n, mode, trust_ratio) * self.rest_area;

        (DVec3::new(grad.x, grad.y, 0.0), embed2(&hess))
    }

    /// Large diagonal penalty pushing the element back toward positive
    /// volume once it inverts.
    fn inversion_terms(&mut self, f: &DMat2, j: f64, grad_n: DVec2) -> (DVec3, DMat3) {
        let a = 4.0 * self.mu.max(self.la);
        let depth = INVERSION_EPS - j;
        self.energy = self.rest_area * a * depth * depth;

        let grad = -(self.rest_area * a * depth) * (cofactor2(f) * grad_n);
        let h = self.rest_area * a;
        let hess = DMat2::from_diagonal(DVec2::splat(h));

        (DVec3::new(grad.x, grad.y, 0.0), embed2(&hess))
    }

    /// Assembles the per-vertex 2x2 Hessian from the projected eigensystem
    /// of `d2(psi)/dF2` in the Frobenius eigenmode basis of the SVD of `F`.
    fn projected_hessian(
        &self,
        f: &DMat2,
        grad_n: DVec2,
        mode: ProjectionMode,
        trust_ratio: f64,
    ) -> DMat2 {
        let Svd2 { u, s, v } = svd2(f);
        let eig = self.material.sigma_eigen(self.mu, self.la, s);

        let u1 = u.x_axis;
        let u2 = u.y_axis;
        let v1 = v.x_axis;
        let v2 = v.y_axis;

        let d11 = outer2(u1, v1);
        let d22 = outer2(u2, v2);
        let d12 = outer2(u1, v2);
        let d21 = outer2(u2, v1);

        let inv_sqrt2 = std::f64::consts::FRAC_1_SQRT_2;
        let twist_mode = (d12 - d21) * inv_sqrt2;
        let flip_mode = (d12 + d21) * inv_sqrt2;

        // Eigen-decompose the symmetric 2x2 scaling block.
        let mid = 0.5 * (eig.scale_aa + eig.scale_bb);
        let diff = 0.5 * (eig.scale_aa - eig.scale_bb);
        let radius = diff.hypot(eig.scale_ab);
        let scale_l1 = mid + radius;
        let scale_l2 = mid - radius;

        let (e1, e2) = if eig.scale_ab.abs() > 1.0e-14 {
            let e1 = DVec2::new(eig.scale_ab, scale_l1 - eig.scale_aa).normalize();
            (e1, DVec2::new(-e1.y, e1.x))
        } else if eig.scale_aa >= eig.scale_bb {
            (DVec2::X, DVec2::Y)
        } else {
            (DVec2::Y, DVec2::X)
        };

        let scale_mode1 = d11 * e1.x + d22 * e1.y;
        let scale_mode2 = d11 * e2.x + d22 * e2.y;

        let modes = [
            (scale_l1, scale_mode1),
            (scale_l2, scale_mode2),
            (eig.twist, twist_mode),
            (eig.flip, flip_mode),
        ];

        let mut hess = DMat2::ZERO;
        for (eigenvalue, mode_matrix) in modes {
            let projected = mode.project(eigenvalue, trust_ratio);
            let g = mode_matrix * grad_n;
            hess = hess + outer2(g, g) * projected;
        }
        hess
    }

    pub(crate) fn emit_render(&self, bodies: &Bodies, feed: &mut RenderFeed) {
        let thickness = self.ramp_fraction();
        for i in 0..3 {
            let from = bodies[self.vertices[i]].position();
            let to = bodies[self.vertices[(i + 1) % 3]].position();
            feed.push_line(from, to, thickness);
        }
    }
}

fn embed2(m: &DMat2) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(m.x_axis.x, m.x_axis.y, 0.0),
        DVec3::new(m.y_axis.x, m.y_axis.y, 0.0),
        DVec3::ZERO,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use approx::assert_relative_eq;
    use slotmap::SlotMap;

    const YOUNG: f64 = 3000.0;
    const POISSON: f64 = 0.3;

    fn unit_triangle() -> (Bodies, [BodyKey; 3]) {
        let mut bodies: Bodies = SlotMap::with_key();
        let a = bodies.insert(Body::particle(DVec2::ZERO, 1.0));
        let b = bodies.insert(Body::particle(DVec2::new(1.0, 0.0), 1.0));
        let c = bodies.insert(Body::particle(DVec2::new(0.0, 1.0), 1.0));
        (bodies, [a, b, c])
    }

    fn element(bodies: &Bodies, keys: [BodyKey; 3]) -> Element {
        Element::from_young(bodies, keys, Material::NeoHookean, YOUNG, POISSON)
            .expect("valid rest triangle")
    }

    #[test]
    fn rest_shape_properties() {
        let (bodies, keys) = unit_triangle();
        let el = element(&bodies, keys);
        assert_relative_eq!(el.rest_area(), 0.5);
        let total: DVec2 = el.grad_n.iter().copied().sum();
        assert_relative_eq!(total.length(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn rest_configuration_has_identity_gradient() {
        let (bodies, keys) = unit_triangle();
        let el = element(&bodies, keys);
        let (f, j) = el.deformation_gradient(&bodies);
        assert_relative_eq!(f.x_axis.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(f.y_axis.y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(f.x_axis.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(j, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn degenerate_rest_triangle_is_rejected() {
        let mut bodies: Bodies = SlotMap::with_key();
        let a = bodies.insert(Body::particle(DVec2::ZERO, 1.0));
        let b = bodies.insert(Body::particle(DVec2::new(1.0, 0.0), 1.0));
        let c = bodies.insert(Body::particle(DVec2::new(2.0, 0.0), 1.0));
        assert!(Element::from_young(&bodies, [a, b, c], Material::NeoHookean, YOUNG, POISSON)
            .is_none());
        // Clockwise winding is also rejected.
        let (bodies2, mut keys) = unit_triangle();
        keys.swap(1, 2);
        assert!(
            Element::from_young(&bodies2, keys, Material::NeoHookean, YOUNG, POISSON).is_none()
        );
    }

    #[test]
    fn gradient_matches_finite_difference_of_energy() {
        let (mut bodies, keys) = unit_triangle();
        let mut el = element(&bodies, keys);
        // Deform vertex b a little.
        bodies[keys[1]].set_pose(DVec3::new(1.08, 0.05, 0.0));

        let (grad, _) =
            el.compute_energy_terms(&bodies, keys[1], ProjectionMode::Clamp, 1.0);

        let h = 1.0e-7;
        let energy_at = |bodies: &Bodies, el: &Element| {
            let (f, j) = el.deformation_gradient(bodies);
            el.rest_area * el.material.psi(el.mu, el.la, &f, j)
        };
        let base_pose = bodies[keys[1]].pose();
        for (axis, expected) in [(0, grad.x), (1, grad.y)] {
            let mut offset = DVec3::ZERO;
            offset[axis] = h;
            bodies[keys[1]].set_pose(base_pose + offset);
            let ep = energy_at(&bodies, &el);
            bodies[keys[1]].set_pose(base_pose - offset);
            let em = energy_at(&bodies, &el);
            bodies[keys[1]].set_pose(base_pose);
            assert_relative_eq!(expected, (ep - em) / (2.0 * h), epsilon = 1e-4);
        }
    }

    #[test]
    fn projected_hessian_is_positive_definite() {
        let (mut bodies, keys) = unit_triangle();
        let mut el = element(&bodies, keys);
        // A strongly compressed configuration would have an indefinite
        // exact Hessian.
        bodies[keys[1]].set_pose(DVec3::new(0.4, 0.02, 0.0));
        bodies[keys[2]].set_pose(DVec3::new(0.05, 0.45, 0.0));

        for mode in [
            ProjectionMode::Clamp,
            ProjectionMode::Absolute,
            ProjectionMode::Adaptive,
        ] {
            for &key in &keys {
                let (_, hess) = el.compute_energy_terms(&bodies, key, mode, 0.5);
                // 2x2 block SPD check by leading minors.
                let h00 = hess.x_axis.x;
                let det2 = hess.x_axis.x * hess.y_axis.y - hess.x_axis.y * hess.y_axis.x;
                assert!(h00 >= 0.0, "{mode:?}: h00 = {h00}");
                assert!(det2 >= -1e-9, "{mode:?}: det = {det2}");
            }
        }
    }

    #[test]
    fn inversion_handler_engages_below_epsilon() {
        let (mut bodies, keys) = unit_triangle();
        let mut el = element(&bodies, keys);
        // Collapse vertex c through the opposite edge: negative area.
        bodies[keys[2]].set_pose(DVec3::new(0.3, -0.5, 0.0));
        let (_, j) = el.deformation_gradient(&bodies);
        assert!(j < 0.0);

        let (grad, hess) = el.compute_energy_terms(&bodies, keys[2], ProjectionMode::Clamp, 1.0);
        assert!(el.energy() > 0.0);
        assert!(grad.length() > 0.0);
        // Diagonal penalty Hessian.
        assert_relative_eq!(hess.x_axis.y, 0.0);
        assert!(hess.x_axis.x > 0.0);
        assert_relative_eq!(hess.x_axis.x, hess.y_axis.y);

        // The gradient points the vertex back toward positive volume: a
        // small step against it must increase the determinant.
        let step = 1.0e-4;
        let pose = bodies[keys[2]].pose();
        bodies[keys[2]].set_pose(pose - step * grad);
        let (_, j_after) = el.deformation_gradient(&bodies);
        assert!(j_after > j, "j {j} -> {j_after}");
    }

    #[test]
    fn stiffness_ramp_decays_and_grows_within_bounds() {
        let (bodies, keys) = unit_triangle();
        let mut el = element(&bodies, keys);
        assert_relative_eq!(el.effective_stiffness(), 1.0);

        el.initialize(0.99);
        assert!(el.effective_stiffness() <= el.target_stiffness());
        assert!(el.effective_stiffness() >= STIFFNESS_EPS);

        el.strain = 10.0;
        for _ in 0..10_000 {
            el.grow_stiffness(10.0);
        }
        assert_relative_eq!(el.effective_stiffness(), el.target_stiffness());

        el.refresh_strain(&bodies);
        assert_relative_eq!(el.strain, 0.0, epsilon = 1e-12);
    }
}
