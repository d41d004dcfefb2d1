use glam::{DMat2, DVec2};

use crate::math::cofactor2;

/// Eigenvalues of the energy density Hessian expressed in singular-value
/// coordinates: the coupled 2x2 scaling block plus the decoupled twist and
/// flip modes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SigmaEigen {
    /// d2(psi)/d(sigma_1)^2
    pub scale_aa: f64,
    /// d2(psi)/d(sigma_2)^2
    pub scale_bb: f64,
    /// d2(psi)/d(sigma_1)d(sigma_2)
    pub scale_ab: f64,
    pub twist: f64,
    pub flip: f64,
}

/// Hyperelastic constitutive models for triangle elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Material {
    NeoHookean,
    StVenantKirchhoff,
}

impl Material {
    /// Energy density for the deformation gradient `f` with `j = det f`.
    pub(crate) fn psi(&self, mu: f64, la: f64, f: &DMat2, j: f64) -> f64 {
        match self {
            Material::NeoHookean => {
                let i1 = f.x_axis.length_squared() + f.y_axis.length_squared();
                let a = 1.0 + mu / la;
                0.5 * mu * (i1 - 2.0) + 0.5 * la * (j - a) * (j - a)
            }
            Material::StVenantKirchhoff => {
                let l = green_strain(f);
                let trace = l.x_axis.x + l.y_axis.y;
                mu * frobenius_sq(&l) + 0.5 * la * trace * trace
            }
        }
    }

    /// First Piola-Kirchhoff stress `P = d(psi)/dF`.
    pub(crate) fn piola(&self, mu: f64, la: f64, f: &DMat2, j: f64) -> DMat2 {
        match self {
            Material::NeoHookean => {
                // J * F^-T is the cofactor matrix.
                let a = 1.0 + mu / la;
                *f * mu + cofactor2(f) * (la * (j - a))
            }
            Material::StVenantKirchhoff => {
                let l = green_strain(f);
                let trace = l.x_axis.x + l.y_axis.y;
                *f * (l * (2.0 * mu) + DMat2::from_diagonal(DVec2::splat(la * trace)))
            }
        }
    }

    /// Analytic Hessian eigenvalues in singular-value coordinates. The
    /// twist and flip ratios `(g1 +- g2) / (sigma_1 +- sigma_2)` reduce to
    /// the closed forms below, so no limit handling is needed at
    /// `sigma_1 == sigma_2`.
    pub(crate) fn sigma_eigen(&self, mu: f64, la: f64, s: DVec2) -> SigmaEigen {
        match self {
            Material::NeoHookean => {
                let j = s.x * s.y;
                let a = 1.0 + mu / la;
                SigmaEigen {
                    scale_aa: mu + la * s.y * s.y,
                    scale_bb: mu + la * s.x * s.x,
                    scale_ab: la * (2.0 * j - a),
                    twist: mu + la * (j - a),
                    flip: mu - la * (j - a),
                }
            }
            Material::StVenantKirchhoff => {
                let s1 = s.x * s.x;
                let s2 = s.y * s.y;
                let trace = 0.5 * (s1 + s2 - 2.0);
                SigmaEigen {
                    scale_aa: mu * (3.0 * s1 - 1.0) + la * (trace + s1),
                    scale_bb: mu * (3.0 * s2 - 1.0) + la * (trace + s2),
                    scale_ab: la * s.x * s.y,
                    twist: mu * (s1 - s.x * s.y + s2 - 1.0) + la * trace,
                    flip: mu * (s1 + s.x * s.y + s2 - 1.0) + la * trace,
                }
            }
        }
    }

    /// Scalar deformation magnitude driving the stiffness ramp.
    pub(crate) fn strain_measure(&self, f: &DMat2, j: f64) -> f64 {
        match self {
            Material::NeoHookean => {
                let fi = *f - DMat2::IDENTITY;
                frobenius_sq(&fi).sqrt() + (j - 1.0).abs()
            }
            Material::StVenantKirchhoff => {
                let l = green_strain(f);
                let trace = l.x_axis.x + l.y_axis.y;
                frobenius_sq(&l).sqrt() + trace.abs()
            }
        }
    }
}

/// Green strain `L = (F^T F - I) / 2`.
fn green_strain(f: &DMat2) -> DMat2 {
    let mut l = f.transpose() * *f;
    l.x_axis.x -= 1.0;
    l.y_axis.y -= 1.0;
    l * 0.5
}

fn frobenius_sq(m: &DMat2) -> f64 {
    m.x_axis.length_squared() + m.y_axis.length_squared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const MU: f64 = 300.0;
    const LA: f64 = 258.0;

    fn fd_piola(material: Material, f: &DMat2) -> DMat2 {
        let h = 1.0e-7;
        let mut p = DMat2::ZERO;
        for col in 0..2 {
            for row in 0..2 {
                let mut fp = *f;
                let mut fm = *f;
                fp.col_mut(col)[row] += h;
                fm.col_mut(col)[row] -= h;
                let ep = material.psi(MU, LA, &fp, fp.determinant());
                let em = material.psi(MU, LA, &fm, fm.determinant());
                p.col_mut(col)[row] = (ep - em) / (2.0 * h);
            }
        }
        p
    }

    fn generic_f() -> DMat2 {
        DMat2::from_cols(DVec2::new(1.1, 0.15), DVec2::new(-0.08, 0.92))
    }

    #[test]
    fn neo_hookean_rest_state_is_stress_free() {
        // The volumetric target a = 1 + mu/la makes P(I) cancel exactly.
        let p = Material::NeoHookean.piola(MU, LA, &DMat2::IDENTITY, 1.0);
        assert_relative_eq!(p.x_axis.x, 0.0, epsilon = 1e-10);
        assert_relative_eq!(p.y_axis.y, 0.0, epsilon = 1e-10);
        assert_relative_eq!(p.x_axis.y, 0.0, epsilon = 1e-10);
        assert_relative_eq!(p.y_axis.x, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn stvk_rest_state_is_stress_free() {
        let p = Material::StVenantKirchhoff.piola(MU, LA, &DMat2::IDENTITY, 1.0);
        assert_relative_eq!(p.x_axis.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(p.y_axis.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn neo_hookean_piola_matches_finite_difference() {
        let f = generic_f();
        let p = Material::NeoHookean.piola(MU, LA, &f, f.determinant());
        let fd = fd_piola(Material::NeoHookean, &f);
        for col in 0..2 {
            for row in 0..2 {
                assert_relative_eq!(p.col(col)[row], fd.col(col)[row], epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn stvk_piola_matches_finite_difference() {
        let f = generic_f();
        let p = Material::StVenantKirchhoff.piola(MU, LA, &f, f.determinant());
        let fd = fd_piola(Material::StVenantKirchhoff, &f);
        for col in 0..2 {
            for row in 0..2 {
                assert_relative_eq!(p.col(col)[row], fd.col(col)[row], epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn strain_measures_vanish_at_rest() {
        assert_relative_eq!(
            Material::NeoHookean.strain_measure(&DMat2::IDENTITY, 1.0),
            0.0
        );
        assert_relative_eq!(
            Material::StVenantKirchhoff.strain_measure(&DMat2::IDENTITY, 1.0),
            0.0
        );
    }

    #[test]
    fn strain_measures_grow_with_deformation() {
        let stretched = DMat2::from_diagonal(DVec2::new(1.5, 1.0));
        for material in [Material::NeoHookean, Material::StVenantKirchhoff] {
            let strain = material.strain_measure(&stretched, 1.5);
            assert!(strain > 0.4, "{material:?} strain too small: {strain}");
        }
    }

    #[test]
    fn sigma_eigen_scale_block_matches_psi_curvature() {
        // Compare the analytic d2(psi)/d(sigma)^2 block against finite
        // differences of psi over diagonal deformation gradients.
        let s = DVec2::new(1.2, 0.85);
        let h = 1.0e-5;
        for material in [Material::NeoHookean, Material::StVenantKirchhoff] {
            let eig = material.sigma_eigen(MU, LA, s);
            let psi_at = |s1: f64, s2: f64| {
                let f = DMat2::from_diagonal(DVec2::new(s1, s2));
                material.psi(MU, LA, &f, s1 * s2)
            };
            let d_aa = (psi_at(s.x + h, s.y) - 2.0 * psi_at(s.x, s.y) + psi_at(s.x - h, s.y))
                / (h * h);
            let d_bb = (psi_at(s.x, s.y + h) - 2.0 * psi_at(s.x, s.y) + psi_at(s.x, s.y - h))
                / (h * h);
            let d_ab = (psi_at(s.x + h, s.y + h) - psi_at(s.x + h, s.y - h)
                - psi_at(s.x - h, s.y + h)
                + psi_at(s.x - h, s.y - h))
                / (4.0 * h * h);
            assert_relative_eq!(eig.scale_aa, d_aa, epsilon = 1e-2, max_relative = 1e-4);
            assert_relative_eq!(eig.scale_bb, d_bb, epsilon = 1e-2, max_relative = 1e-4);
            assert_relative_eq!(eig.scale_ab, d_ab, epsilon = 1e-2, max_relative = 1e-4);
        }
    }
}
