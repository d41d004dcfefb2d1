// Distributed under the GNU Affero General Public License v3.0 or later.
// See accompanying file LICENSE or https://www.gnu.org/licenses/agpl-3.0.html for details.

use glam::{DMat2, DMat3, DVec2, DVec3};

/// Rotation matrix for a counter-clockwise angle in radians.
pub fn rotation(theta: f64) -> DMat2 {
    DMat2::from_angle(theta)
}

/// Planar cross product `a.x * b.y - a.y * b.x`.
pub fn cross2(a: DVec2, b: DVec2) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Rotates `v` by 90 degrees counter-clockwise (the `S` operator).
pub fn perp(v: DVec2) -> DVec2 {
    DVec2::new(-v.y, v.x)
}

/// Outer product `a * b^T`.
pub fn outer2(a: DVec2, b: DVec2) -> DMat2 {
    DMat2::from_cols(a * b.x, a * b.y)
}

/// Outer product `a * b^T`.
pub fn outer3(a: DVec3, b: DVec3) -> DMat3 {
    DMat3::from_cols(a * b.x, a * b.y, a * b.z)
}

/// Cofactor matrix of a 2x2, i.e. `d(det F)/dF`.
pub fn cofactor2(f: &DMat2) -> DMat2 {
    DMat2::from_cols(
        DVec2::new(f.y_axis.y, -f.y_axis.x),
        DVec2::new(-f.x_axis.y, f.x_axis.x),
    )
}

/// Solves `a * x = b` for a symmetric positive definite 3x3 system via an
/// LDL^T factorization.
///
/// Returns `None` if a pivot is not strictly positive, which means the
/// caller failed to regularize `a`. The solver treats that as fatal rather
/// than returning garbage.
pub fn solve_ldlt(a: &DMat3, b: DVec3) -> Option<DVec3> {
    // a is symmetric; read the lower triangle out of the columns.
    let a00 = a.x_axis.x;
    let a10 = a.x_axis.y;
    let a20 = a.x_axis.z;
    let a11 = a.y_axis.y;
    let a21 = a.y_axis.z;
    let a22 = a.z_axis.z;

    let d0 = a00;
    if d0 <= 0.0 {
        return None;
    }
    let l10 = a10 / d0;
    let l20 = a20 / d0;

    let d1 = a11 - l10 * l10 * d0;
    if d1 <= 0.0 {
        return None;
    }
    let l21 = (a21 - l20 * l10 * d0) / d1;

    let d2 = a22 - l20 * l20 * d0 - l21 * l21 * d1;
    if d2 <= 0.0 {
        return None;
    }

    // Forward substitution L z = b
    let z0 = b.x;
    let z1 = b.y - l10 * z0;
    let z2 = b.z - l20 * z0 - l21 * z1;

    // Diagonal D y = z
    let y0 = z0 / d0;
    let y1 = z1 / d1;
    let y2 = z2 / d2;

    // Back substitution L^T x = y
    let x2 = y2;
    let x1 = y1 - l21 * x2;
    let x0 = y0 - l10 * x1 - l20 * x2;

    Some(DVec3::new(x0, x1, x2))
}

/// Factors of a 2x2 singular value decomposition `f = u * diag(s) * v^T`.
///
/// `u` and `v` are proper rotations; if `f` contains a reflection the sign
/// is carried by `s.y` instead, so `det(f) == s.x * s.y` always holds. This
/// is the convention the energy Hessian projection relies on.
#[derive(Debug, Clone, Copy)]
pub struct Svd2 {
    pub u: DMat2,
    pub s: DVec2,
    pub v: DMat2,
}

/// Closed-form 2x2 SVD with the rotation-sign correction folded into
/// `s.y`: where a generic SVD would hand back `det(u * v^T) < 0`, the
/// smaller singular value and the matching column of `v` are flipped.
pub fn svd2(f: &DMat2) -> Svd2 {
    let a = f.x_axis.x;
    let c = f.x_axis.y;
    let b = f.y_axis.x;
    let d = f.y_axis.y;

    let e = (a + d) * 0.5;
    let h = (c - b) * 0.5;
    let fq = (a - d) * 0.5;
    let g = (b + c) * 0.5;

    let q = e.hypot(h);
    let r = fq.hypot(g);

    let a1 = g.atan2(fq);
    let a2 = h.atan2(e);

    let phi = (a1 + a2) * 0.5;
    let theta = (a1 - a2) * 0.5;

    Svd2 {
        u: DMat2::from_angle(phi),
        s: DVec2::new(q + r, q - r),
        v: DMat2::from_angle(theta),
    }
}
