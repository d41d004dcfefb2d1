mod joint;
mod length;
mod manifold;
mod spring;
mod tri_area;

pub use joint::Joint;
pub use length::Length;
pub use manifold::{FeatureId, Manifold};
pub use spring::Spring;
pub use tri_area::TriArea;

use glam::{DMat3, DVec3};
use slotmap::SlotMap;

use crate::body::Body;
use crate::handles::BodyKey;
use crate::world::RenderFeed;

pub(crate) type Bodies = SlotMap<BodyKey, Body>;

/// Lower bound for the adaptive penalty of every constraint row.
pub const PENALTY_MIN: f64 = 1.0;
/// Upper bound for the adaptive penalty of every constraint row.
pub const PENALTY_MAX: f64 = 1.0e9;
/// Largest number of rows any single force produces (two contacts of a
/// manifold, two rows each).
pub const MAX_ROWS: usize = 4;

/// One scalar constraint row contributing to the augmented Lagrangian.
#[derive(Debug, Clone, Copy)]
pub struct Row {
    /// Current constraint value `C_j(q)`.
    pub c: f64,
    /// Material stiffness `k_j`; infinite means a hard row driven by the
    /// dual multiplier.
    pub stiffness: f64,
    /// Adaptive penalty, always within `[PENALTY_MIN, min(PENALTY_MAX, k)]`.
    pub penalty: f64,
    /// Dual multiplier, always within `[fmin, fmax]`.
    pub lambda: f64,
    pub fmin: f64,
    pub fmax: f64,
    /// Disables the whole force permanently once `|lambda|` reaches it.
    pub fracture: f64,
}

impl Default for Row {
    fn default() -> Self {
        Self {
            c: 0.0,
            stiffness: f64::INFINITY,
            penalty: PENALTY_MIN,
            lambda: 0.0,
            fmin: f64::NEG_INFINITY,
            fmax: f64::INFINITY,
            fracture: f64::INFINITY,
        }
    }
}

impl Row {
    pub fn hard() -> Self {
        Self::default()
    }

    pub fn soft(stiffness: f64) -> Self {
        Self {
            stiffness,
            ..Self::default()
        }
    }

    pub fn is_hard(&self) -> bool {
        self.stiffness.is_infinite()
    }

    /// `min(k_j, PENALTY_MAX)`, the ceiling the penalty may grow to.
    pub(crate) fn penalty_limit(&self) -> f64 {
        self.stiffness.min(PENALTY_MAX)
    }

    /// Keeps the penalty inside `[PENALTY_MIN, min(PENALTY_MAX, k)]`. The
    /// lower bound collapses with the ceiling for zeroed (disabled) rows.
    pub(crate) fn clamp_penalty(&mut self) {
        let hi = self.penalty_limit();
        self.penalty = self.penalty.clamp(PENALTY_MIN.min(hi), hi);
    }

    /// Mixed penalty/dual force magnitude, clamped into the row bounds.
    /// Hard rows carry their dual, soft rows are pure penalty.
    pub(crate) fn clamped_force(&self) -> f64 {
        let lambda = if self.is_hard() { self.lambda } else { 0.0 };
        (self.penalty * self.c + lambda).clamp(self.fmin, self.fmax)
    }

    pub(crate) fn zero_out(&mut self) {
        self.stiffness = 0.0;
        self.penalty = 0.0;
        self.lambda = 0.0;
    }
}

/// Per-body Jacobian and Hessian of one row, filled on demand during the
/// primal block solve.
#[derive(Debug, Clone, Copy)]
pub struct RowDerivatives {
    pub j: DVec3,
    pub h: DMat3,
}

impl Default for RowDerivatives {
    fn default() -> Self {
        Self {
            j: DVec3::ZERO,
            h: DMat3::ZERO,
        }
    }
}

/// Bodies a force is attached to, at most three.
#[derive(Debug, Clone, Copy)]
pub struct ForceBodies {
    keys: [BodyKey; 3],
    len: usize,
}

impl ForceBodies {
    pub(crate) fn one(a: BodyKey) -> Self {
        Self {
            keys: [a, BodyKey::default(), BodyKey::default()],
            len: 1,
        }
    }

    pub(crate) fn two(a: BodyKey, b: BodyKey) -> Self {
        Self {
            keys: [a, b, BodyKey::default()],
            len: 2,
        }
    }

    pub(crate) fn three(a: BodyKey, b: BodyKey, c: BodyKey) -> Self {
        Self {
            keys: [a, b, c],
            len: 3,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = BodyKey> + '_ {
        self.keys[..self.len].iter().copied()
    }

    pub fn contains(&self, key: BodyKey) -> bool {
        self.keys[..self.len].contains(&key)
    }
}

/// The closed set of constraint forces the solver knows how to drive.
#[derive(Debug, Clone)]
pub enum Force {
    Joint(Joint),
    Spring(Spring),
    Length(Length),
    TriArea(TriArea),
    Manifold(Manifold),
}

impl Force {
    pub fn rows(&self) -> &[Row] {
        match self {
            Force::Joint(f) => f.rows(),
            Force::Spring(f) => f.rows(),
            Force::Length(f) => f.rows(),
            Force::TriArea(f) => f.rows(),
            Force::Manifold(f) => f.rows(),
        }
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [Row] {
        match self {
            Force::Joint(f) => f.rows_mut(),
            Force::Spring(f) => f.rows_mut(),
            Force::Length(f) => f.rows_mut(),
            Force::TriArea(f) => f.rows_mut(),
            Force::Manifold(f) => f.rows_mut(),
        }
    }

    pub fn bodies(&self) -> ForceBodies {
        match self {
            Force::Joint(f) => f.bodies(),
            Force::Spring(f) => f.bodies(),
            Force::Length(f) => f.bodies(),
            Force::TriArea(f) => f.bodies(),
            Force::Manifold(f) => f.bodies(),
        }
    }

    pub fn touches(&self, key: BodyKey) -> bool {
        self.bodies().contains(key)
    }

    /// One-shot per step. `false` requests removal of the force.
    pub(crate) fn initialize(&mut self, bodies: &Bodies) -> bool {
        match self {
            Force::Joint(_) | Force::Spring(_) | Force::Length(_) | Force::TriArea(_) => true,
            Force::Manifold(f) => f.initialize(bodies),
        }
    }

    /// Refreshes every `Row::c` for the current poses. `alpha` only affects
    /// position-stabilized rows.
    pub(crate) fn compute_constraints(&mut self, bodies: &Bodies, alpha: f64) {
        match self {
            Force::Joint(f) => f.compute_constraints(bodies, alpha),
            Force::Spring(f) => f.compute_constraints(bodies),
            Force::Length(f) => f.compute_constraints(bodies),
            Force::TriArea(f) => f.compute_constraints(bodies),
            Force::Manifold(f) => f.compute_constraints(bodies, alpha),
        }
    }

    /// Fills Jacobian and Hessian rows for `body` only.
    pub(crate) fn derivatives(
        &self,
        bodies: &Bodies,
        body: BodyKey,
        out: &mut [RowDerivatives; MAX_ROWS],
    ) {
        match self {
            Force::Joint(f) => f.derivatives(bodies, body, out),
            Force::Spring(f) => f.derivatives(bodies, body, out),
            Force::Length(f) => f.derivatives(bodies, body, out),
            Force::TriArea(f) => f.derivatives(bodies, body, out),
            Force::Manifold(f) => f.derivatives(body, out),
        }
    }

    pub(crate) fn emit_render(&self, bodies: &Bodies, feed: &mut RenderFeed) {
        match self {
            Force::Joint(f) => f.emit_render(bodies, feed),
            Force::Spring(f) => f.emit_render(bodies, feed),
            Force::Length(f) => f.emit_render(bodies, feed),
            Force::TriArea(_) => {}
            Force::Manifold(f) => f.emit_render(bodies, feed),
        }
    }

    /// Zeroes stiffness, penalty and dual on every row. The force stays in
    /// the world but contributes nothing until the scene is reset.
    pub fn disable(&mut self) {
        for row in self.rows_mut() {
            row.zero_out();
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.rows().iter().all(|r| r.stiffness == 0.0)
    }
}
