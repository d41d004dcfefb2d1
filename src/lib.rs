// Distributed under the GNU Affero General Public License v3.0 or later.
// See accompanying file LICENSE or https://www.gnu.org/licenses/agpl-3.0.html for details.

//! A 2D rigid- and soft-body physics core built around the Augmented
//! Vertex Block Descent solver: per-body 3-DoF block solves over an
//! augmented Lagrangian, persistent box-box contact manifolds with
//! Coulomb friction, and hyperelastic FEM triangles.

mod body;
mod driver;
mod energy;
mod fixtures;
mod forces;
mod handles;
mod math;
mod scene;
mod solver;
mod world;

pub use body::Body;
pub use driver::{
    DragHandle, FixedStepDriver, WORLD_BOUNDS, begin_drag, cull_out_of_bounds, end_drag,
    update_drag,
};
pub use energy::{Element, Material, ProjectionMode, STIFFNESS_EPS};
pub use fixtures::{cantilever_beam, cloth_grid, hex_soft_body};
pub use forces::{
    FeatureId, Force, Joint, Length, MAX_ROWS, Manifold, PENALTY_MAX, PENALTY_MIN, Row, Spring,
    TriArea,
};
pub use handles::{BodyKey, ElementKey, ForceKey};
pub use math::{Svd2, cofactor2, cross2, outer2, outer3, perp, rotation, solve_ldlt, svd2};
pub use scene::{BodyEntry, JointEntry, SceneDescription, SceneError, SpringEntry, parse_color};
pub use solver::SolverParams;
pub use world::{ContactLine, RenderFeed, World};
