use glam::{DVec2, DVec3};
use slotmap::SlotMap;

use crate::body::Body;
use crate::energy::{Element, ProjectionMode};
use crate::forces::Force;
use crate::handles::{BodyKey, ElementKey, ForceKey};
use crate::solver::{SolverParams, SolverState};

/// A line segment for the renderer. The thickness tag encodes constraint
/// engagement (the renderer maps it to strong/medium/weak colors).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactLine {
    pub from: DVec2,
    pub to: DVec2,
    pub thickness: f64,
}

/// Per-step shapes generated by forces and elements, rebuilt on every
/// `step` and read-only in between.
#[derive(Debug, Default)]
pub struct RenderFeed {
    points: Vec<DVec2>,
    lines: Vec<ContactLine>,
}

impl RenderFeed {
    pub(crate) fn clear(&mut self) {
        self.points.clear();
        self.lines.clear();
    }

    pub(crate) fn push_point(&mut self, point: DVec2) {
        self.points.push(point);
    }

    pub(crate) fn push_line(&mut self, from: DVec2, to: DVec2, thickness: f64) {
        self.lines.push(ContactLine {
            from,
            to,
            thickness,
        });
    }

    pub fn points(&self) -> &[DVec2] {
        &self.points
    }

    pub fn lines(&self) -> &[ContactLine] {
        &self.lines
    }
}

/// The ownership tree of the simulation: bodies, forces and elements in
/// slot maps, referenced by stable keys, plus solver parameters and the
/// per-step render feed. All mutation of simulation state happens inside
/// `step`; everything else links and unlinks the tree.
pub struct World {
    pub(crate) bodies: SlotMap<BodyKey, Body>,
    pub(crate) forces: SlotMap<ForceKey, Force>,
    pub(crate) elements: SlotMap<ElementKey, Element>,
    pub(crate) params: SolverParams,
    pub(crate) state: SolverState,
    pub(crate) feed: RenderFeed,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            bodies: SlotMap::with_key(),
            forces: SlotMap::with_key(),
            elements: SlotMap::with_key(),
            params: SolverParams::default(),
            state: SolverState::default(),
            feed: RenderFeed::default(),
        }
    }

    // --- bodies ---

    pub fn add_body(&mut self, body: Body) -> BodyKey {
        self.bodies.insert(body)
    }

    pub fn body(&self, key: BodyKey) -> Option<&Body> {
        self.bodies.get(key)
    }

    pub fn body_mut(&mut self, key: BodyKey) -> Option<&mut Body> {
        self.bodies.get_mut(key)
    }

    pub fn bodies(&self) -> impl Iterator<Item = (BodyKey, &Body)> {
        self.bodies.iter()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Two-phase destruction: every force and element touching the body is
    /// detached from its peers and dropped first, then the body slot is
    /// released.
    pub fn remove_body(&mut self, key: BodyKey) {
        let Some(body) = self.bodies.get(key) else {
            return;
        };
        let forces: Vec<ForceKey> = body.forces.clone();
        let elements: Vec<ElementKey> = body.elements.clone();
        for fk in forces {
            self.remove_force(fk);
        }
        for ek in elements {
            self.remove_element(ek);
        }
        self.bodies.remove(key);
    }

    // --- forces ---

    pub fn add_force(&mut self, force: Force) -> ForceKey {
        let attached = force.bodies();
        let key = self.forces.insert(force);
        for bk in attached.iter() {
            if let Some(body) = self.bodies.get_mut(bk) {
                body.link_force(key);
            }
        }
        key
    }

    pub fn force(&self, key: ForceKey) -> Option<&Force> {
        self.forces.get(key)
    }

    pub fn force_mut(&mut self, key: ForceKey) -> Option<&mut Force> {
        self.forces.get_mut(key)
    }

    pub fn forces(&self) -> impl Iterator<Item = (ForceKey, &Force)> {
        self.forces.iter()
    }

    pub fn force_count(&self) -> usize {
        self.forces.len()
    }

    pub fn remove_force(&mut self, key: ForceKey) {
        let Some(force) = self.forces.remove(key) else {
            return;
        };
        for bk in force.bodies().iter() {
            if let Some(body) = self.bodies.get_mut(bk) {
                body.unlink_force(key);
            }
        }
    }

    // --- elements ---

    pub fn add_element(&mut self, element: Element) -> ElementKey {
        let vertices = element.vertices();
        let key = self.elements.insert(element);
        for bk in vertices {
            if let Some(body) = self.bodies.get_mut(bk) {
                body.link_element(key);
            }
        }
        key
    }

    pub fn element(&self, key: ElementKey) -> Option<&Element> {
        self.elements.get(key)
    }

    pub fn elements(&self) -> impl Iterator<Item = (ElementKey, &Element)> {
        self.elements.iter()
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn remove_element(&mut self, key: ElementKey) {
        let Some(element) = self.elements.remove(key) else {
            return;
        };
        for bk in element.vertices() {
            if let Some(body) = self.bodies.get_mut(bk) {
                body.unlink_element(key);
            }
        }
    }

    /// Scene reset: drops all content and clears latched solver state,
    /// including `urgent_stop`.
    pub fn clear(&mut self) {
        self.bodies.clear();
        self.forces.clear();
        self.elements.clear();
        self.feed.clear();
        self.state = SolverState::default();
    }

    /// Total cached elastic energy across all elements.
    pub fn elastic_energy(&self) -> f64 {
        self.elements.values().map(|e| e.energy()).sum()
    }

    // --- parameter surface; all take effect on the next step ---

    pub fn params(&self) -> &SolverParams {
        &self.params
    }

    pub fn time_step(&self) -> f64 {
        self.params.dt
    }

    /// Exactly zero gravity is nudged to keep the adaptive warm-start
    /// weight well defined.
    pub fn set_gravity(&mut self, gravity: DVec2) {
        self.params.gravity = if gravity == DVec2::ZERO {
            DVec2::new(0.0, 1.0e-6)
        } else {
            gravity
        };
    }

    pub fn set_alpha(&mut self, alpha: f64) {
        self.params.alpha = alpha.clamp(0.0, 1.0);
    }

    pub fn set_beta(&mut self, beta: f64) {
        self.params.beta = beta.max(0.0);
    }

    pub fn set_beta_energy(&mut self, beta_energy: f64) {
        self.params.beta_energy = beta_energy.max(0.0);
    }

    pub fn set_gamma(&mut self, gamma: f64) {
        self.params.gamma = gamma.clamp(0.0, 1.0);
    }

    pub fn set_iterations(&mut self, iterations: u32) {
        self.params.iterations = iterations.max(1);
    }

    pub fn set_post_stabilization(&mut self, enabled: bool) {
        self.params.post_stabilization = enabled;
    }

    pub fn set_projection_mode(&mut self, mode: ProjectionMode) {
        self.params.projection = mode;
    }

    pub fn set_use_energy_ramp(&mut self, enabled: bool) {
        self.params.use_energy_ramp = enabled;
    }

    /// `None` disables the step cap entirely.
    pub fn set_step_limit(&mut self, limit: Option<u64>) {
        self.params.step_limit = limit;
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.state.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    /// Latched on NaN or a failed factorization; cleared only by `clear`.
    pub fn urgent_stop(&self) -> bool {
        self.state.urgent_stop
    }

    pub fn step_count(&self) -> u64 {
        self.state.step_count
    }

    // --- render feed ---

    pub fn contact_points(&self) -> &[DVec2] {
        self.feed.points()
    }

    pub fn contact_lines(&self) -> &[ContactLine] {
        self.feed.lines()
    }

    // --- interaction helpers ---

    pub fn set_drag_velocity(&mut self, key: BodyKey, velocity: DVec2) {
        if let Some(body) = self.bodies.get_mut(key) {
            body.added_drag_velocity = DVec3::new(velocity.x, velocity.y, 0.0);
        }
    }
}
