// Distributed under the GNU Affero General Public License v3.0 or later.
// See accompanying file LICENSE or https://www.gnu.org/licenses/agpl-3.0.html for details.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use glam::{DMat3, DVec2, DVec3};
use log::{error, warn};

use crate::energy::ProjectionMode;
use crate::forces::{Force, MAX_ROWS, Manifold, RowDerivatives};
use crate::handles::{BodyKey, ForceKey};
use crate::math::{outer3, solve_ldlt};
use crate::world::World;

/// Rotational speed clamp applied before inertial prediction.
const MAX_ANGULAR_SPEED: f64 = 50.0;
/// Supplied `dt` may drift from the configured fixed step by this much
/// before a warning is logged.
const DT_DRIFT_TOLERANCE: f64 = 0.01;
/// Denominator guard for the trust-region ratio.
const TRUST_PRED_EPS: f64 = 1.0e-10;
/// Window of the published step-time average.
const TIMING_WINDOW: Duration = Duration::from_secs(1);

/// Tunable state of the AVBD stepper. All fields take effect on the next
/// `step`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverParams {
    /// Fixed tick length the world is tuned for.
    pub dt: f64,
    pub gravity: DVec2,
    /// Primal-dual iterations per step.
    pub iterations: u32,
    /// Position-stabilization leak for hard constraints.
    pub alpha: f64,
    /// Penalty growth rate.
    pub beta: f64,
    /// Warm-start decay for penalties and duals.
    pub gamma: f64,
    /// Stiffness ramp growth rate for elements.
    pub beta_energy: f64,
    pub use_energy_ramp: bool,
    /// Adds a final position-only iteration and converts residual error
    /// into a velocity correction.
    pub post_stabilization: bool,
    pub projection: ProjectionMode,
    /// Hard cap on total steps; `None` disables the cap.
    pub step_limit: Option<u64>,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            dt: 1.0 / 60.0,
            gravity: DVec2::new(0.0, -9.81),
            iterations: 10,
            alpha: 0.99,
            beta: 1.0e5,
            gamma: 0.99,
            beta_energy: 10.0,
            use_energy_ramp: false,
            post_stabilization: true,
            projection: ProjectionMode::Clamp,
            step_limit: None,
        }
    }
}

/// Internal stepper state surviving across steps.
#[derive(Debug)]
pub(crate) struct SolverState {
    pub paused: bool,
    pub urgent_stop: bool,
    /// Trust-region ratio of the previous iteration.
    pub trust_ratio: f64,
    pub prev_elastic_energy: f64,
    pub step_count: u64,
    timings: VecDeque<(Instant, Duration)>,
}

impl Default for SolverState {
    fn default() -> Self {
        Self {
            paused: false,
            urgent_stop: false,
            trust_ratio: 1.0,
            prev_elastic_energy: 0.0,
            step_count: 0,
            timings: VecDeque::new(),
        }
    }
}

impl SolverState {
    fn record(&mut self, elapsed: Duration) {
        let now = Instant::now();
        self.timings.push_back((now, elapsed));
        while let Some(&(when, _)) = self.timings.front() {
            if now.duration_since(when) > TIMING_WINDOW {
                self.timings.pop_front();
            } else {
                break;
            }
        }
    }

    fn average(&self) -> Option<Duration> {
        if self.timings.is_empty() {
            return None;
        }
        let total: Duration = self.timings.iter().map(|&(_, d)| d).sum();
        Some(total / self.timings.len() as u32)
    }
}

impl World {
    /// Sliding average of `step` wall time over the last second.
    pub fn average_step_time(&self) -> Option<Duration> {
        self.state.average()
    }

    /// Advances the simulation by one fixed tick.
    ///
    /// No-op while paused or after an urgent stop. The sub-phase ordering
    /// is normative: broadphase, force initialization, element
    /// initialization, inertial prediction, then the primal-dual
    /// iterations with velocity extraction on the last regular one.
    pub fn step(&mut self, dt: f64) {
        if self.state.paused || self.state.urgent_stop {
            return;
        }
        if let Some(limit) = self.params.step_limit
            && self.state.step_count >= limit
        {
            warn!("step limit {limit} reached, stopping");
            self.state.urgent_stop = true;
            return;
        }
        if (dt - self.params.dt).abs() > DT_DRIFT_TOLERANCE {
            warn!(
                "step dt {dt:.5} drifts from configured {:.5}",
                self.params.dt
            );
        }
        let started = Instant::now();

        self.feed.clear();
        self.broadphase();
        self.initialize_forces();
        self.initialize_elements();
        self.predict_inertial(dt);

        let iterations = self.params.iterations as usize;
        let total = iterations + usize::from(self.params.post_stabilization);

        for iteration in 0..total {
            let stabilization_pass = iteration == iterations;
            let alpha = if stabilization_pass {
                0.0
            } else {
                self.params.alpha
            };

            let Some(predicted_decrease) = self.primal_solve(dt, alpha) else {
                // Diagnostics were emitted at the failure site; the latch
                // keeps all future steps inert until a reset.
                return;
            };

            if self.params.projection == ProjectionMode::Adaptive {
                self.update_trust_region(predicted_decrease);
            }
            if !stabilization_pass {
                self.dual_update(alpha);
            }
            if iteration + 1 == iterations {
                self.extract_velocities(dt);
            }
        }

        self.state.step_count += 1;
        self.state.record(started.elapsed());
    }

    /// Bounding-circle pair admission over all bodies. Already-constrained
    /// pairs (joints, live manifolds, shared elements count via forces)
    /// are skipped; every admitted pair gets a fresh manifold.
    fn broadphase(&mut self) {
        let keys: Vec<BodyKey> = self.bodies.keys().collect();
        for i in 0..keys.len() {
            for j in (i + 1)..keys.len() {
                let (a, b) = (keys[i], keys[j]);
                let body_a = &self.bodies[a];
                let body_b = &self.bodies[b];
                let reach = body_a.bounding_radius() + body_b.bounding_radius();
                if body_a.position().distance_squared(body_b.position()) > reach * reach {
                    continue;
                }
                if body_a.is_constrained_to(b, &self.forces) {
                    continue;
                }
                self.add_force(Force::Manifold(Manifold::new(a, b)));
            }
        }
    }

    /// Runs `initialize` on every force in order, removing the ones that
    /// report separation, then applies the warm-start decay to the
    /// surviving rows.
    fn initialize_forces(&mut self) {
        let post_stabilization = self.params.post_stabilization;
        let alpha = self.params.alpha;
        let gamma = self.params.gamma;

        let keys: Vec<ForceKey> = self.forces.keys().collect();
        for key in keys {
            let alive = match self.forces.get_mut(key) {
                Some(force) => force.initialize(&self.bodies),
                None => continue,
            };
            if !alive {
                self.remove_force(key);
                continue;
            }

            let force = &mut self.forces[key];
            force.emit_render(&self.bodies, &mut self.feed);
            for row in force.rows_mut() {
                if post_stabilization {
                    row.penalty *= gamma;
                } else {
                    row.lambda *= alpha * gamma;
                    row.penalty *= gamma;
                }
                row.clamp_penalty();
            }
        }
    }

    fn initialize_elements(&mut self) {
        let gamma = self.params.gamma;
        for (_, element) in self.elements.iter_mut() {
            element.initialize(gamma);
            element.emit_render(&self.bodies, &mut self.feed);
        }
    }

    /// Free-flight prediction plus the adaptive warm start: the position is
    /// advanced by the fraction of last step's acceleration that was
    /// aligned with gravity, while the inertial target keeps full gravity.
    fn predict_inertial(&mut self, dt: f64) {
        let gravity = self.params.gravity;
        let gravity3 = DVec3::new(gravity.x, gravity.y, 0.0);
        let g_len_sq = gravity.length_squared();

        for (_, body) in self.bodies.iter_mut() {
            let mut velocity = body.velocity();
            velocity.z = velocity.z.clamp(-MAX_ANGULAR_SPEED, MAX_ANGULAR_SPEED);
            body.set_velocity_internal(velocity);

            body.last_pose = body.pose();

            if body.is_static() {
                let advance = velocity * dt;
                body.inertial_pose = body.pose() + advance;
                body.translate(advance);
                continue;
            }

            let accel = (velocity - body.prev_velocity) / dt;
            let accel_weight = if g_len_sq > 0.0 {
                (DVec2::new(accel.x, accel.y).dot(gravity) / g_len_sq).clamp(0.0, 1.0)
            } else {
                0.0
            };

            body.inertial_pose = body.pose() + velocity * dt + gravity3 * (dt * dt);
            body.translate(velocity * dt + gravity3 * (accel_weight * dt * dt));
        }
    }

    /// One pass of per-body 3x3 block solves. Returns the accumulated
    /// predicted energy decrease, or `None` after tripping the urgent
    /// stop.
    fn primal_solve(&mut self, dt: f64, alpha: f64) -> Option<f64> {
        let World {
            bodies,
            forces,
            elements,
            params,
            state,
            ..
        } = self;

        let inv_dt_sq = 1.0 / (dt * dt);
        let mut predicted_decrease = 0.0;
        let mut derivs = [RowDerivatives::default(); MAX_ROWS];

        let keys: Vec<BodyKey> = bodies.keys().collect();
        for &key in &keys {
            if bodies[key].is_static() {
                continue;
            }
            let (mass, moment, pose, inertial) = {
                let body = &bodies[key];
                (body.mass(), body.moment(), body.pose(), body.inertial_pose)
            };

            let mass_term =
                DMat3::from_diagonal(DVec3::new(mass, mass, moment)) * inv_dt_sq;
            let mut lhs = mass_term;
            let mut rhs = mass_term * (pose - inertial);
            let mut energy_gradient = DVec3::ZERO;

            // --- forces, in attachment order ---
            let force_count = bodies[key].forces.len();
            for index in 0..force_count {
                let fk = bodies[key].forces[index];
                let Some(force) = forces.get_mut(fk) else {
                    continue;
                };
                force.compute_constraints(bodies, alpha);
                force.derivatives(bodies, key, &mut derivs);

                for (row, deriv) in force.rows().iter().zip(derivs.iter()) {
                    let f = row.clamped_force();
                    // Diagonal geometric stiffness from the Hessian column
                    // norms keeps the block solve SPD without the full
                    // (possibly indefinite) constraint Hessian.
                    let geometric = DMat3::from_diagonal(
                        f.abs()
                            * DVec3::new(
                                deriv.h.x_axis.length(),
                                deriv.h.y_axis.length(),
                                deriv.h.z_axis.length(),
                            ),
                    );
                    rhs += deriv.j * f;
                    lhs += outer3(deriv.j, deriv.j) * row.penalty + geometric;
                }
            }

            // --- elements, after forces ---
            let element_count = bodies[key].elements.len();
            for index in 0..element_count {
                let ek = bodies[key].elements[index];
                let Some(element) = elements.get_mut(ek) else {
                    continue;
                };
                let (mut gradient, mut hessian) = element.compute_energy_terms(
                    bodies,
                    key,
                    params.projection,
                    state.trust_ratio,
                );
                if !gradient.is_finite() {
                    error!("non-finite energy gradient, stopping solver");
                    state.urgent_stop = true;
                    return None;
                }
                if params.use_energy_ramp {
                    let scale = element.ramp_fraction();
                    gradient *= scale;
                    hessian *= scale;
                    let regularizer = gradient.length() * 0.01;
                    hessian.x_axis.x += regularizer;
                    hessian.y_axis.y += regularizer;
                }
                rhs += gradient;
                lhs += hessian;
                energy_gradient += gradient;
            }

            let Some(dx) = solve_ldlt(&lhs, rhs) else {
                error!("non-SPD block system for body {key:?}, stopping solver");
                state.urgent_stop = true;
                return None;
            };
            bodies[key].translate(-dx);
            predicted_decrease += 0.5 * dx.dot(energy_gradient);
        }

        Some(predicted_decrease)
    }

    fn update_trust_region(&mut self, predicted_decrease: f64) {
        let total: f64 = self.elements.values().map(|e| e.energy()).sum();
        let actual_decrease = self.state.prev_elastic_energy - total;
        self.state.trust_ratio = if predicted_decrease.abs() > TRUST_PRED_EPS {
            actual_decrease / predicted_decrease
        } else {
            1.0
        };
        self.state.prev_elastic_energy = total;
    }

    /// Augmented-Lagrangian dual ascent plus penalty and stiffness growth.
    /// Sees the poses produced by the primal pass of the same iteration.
    fn dual_update(&mut self, alpha: f64) {
        let World {
            bodies,
            forces,
            elements,
            params,
            ..
        } = self;

        for (_, force) in forces.iter_mut() {
            force.compute_constraints(bodies, alpha);
            let mut fractured = false;
            for row in force.rows_mut() {
                let carried = if row.is_hard() { row.lambda } else { 0.0 };
                let lambda = (carried + row.penalty * row.c).clamp(row.fmin, row.fmax);
                row.lambda = lambda;

                if lambda.abs() >= row.fracture {
                    fractured = true;
                    break;
                }
                // Grow the penalty only while the dual is strictly
                // interior; a saturated dual means the bound, not the
                // penalty, is binding.
                if lambda > row.fmin && lambda < row.fmax {
                    let ceiling = row.penalty_limit();
                    row.penalty = (row.penalty + params.beta * row.c.abs()).min(ceiling);
                }
            }
            if fractured {
                warn!("fracture threshold crossed, disabling force");
                force.disable();
            } else if let Force::Manifold(manifold) = force {
                manifold.enforce_cone();
            }
        }

        for (_, element) in elements.iter_mut() {
            element.refresh_strain(bodies);
            element.grow_stiffness(params.beta_energy);
        }
    }

    /// Converts the position update into velocities, folding in any drag
    /// velocity injected by the interaction layer.
    fn extract_velocities(&mut self, dt: f64) {
        for (_, body) in self.bodies.iter_mut() {
            if body.is_static() {
                continue;
            }
            body.prev_velocity = body.velocity();
            let mut velocity = (body.pose() - body.last_pose) / dt;
            if body.is_dragged {
                velocity += body.added_drag_velocity;
                body.added_drag_velocity = DVec3::ZERO;
            }
            body.set_velocity_internal(velocity);
        }
    }
}
