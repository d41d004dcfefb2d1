// Distributed under the GNU Affero General Public License v3.0 or later.
// See accompanying file LICENSE or https://www.gnu.org/licenses/agpl-3.0.html for details.

use glam::{DMat2, DVec2, DVec3};

use crate::body::Body;
use crate::handles::BodyKey;
use crate::math::cross2;
use crate::world::RenderFeed;

use super::{Bodies, ForceBodies, MAX_ROWS, Row, RowDerivatives};

/// Slack added to the normal constraint so resting contacts keep a sliver
/// of engagement.
const COLLISION_MARGIN: f64 = 0.0005;
/// Tangential displacement below which a saturated-free contact counts as
/// sticking.
const STICK_THRESHOLD: f64 = 0.01;
// Reference-face selection is biased against switching faces on near-ties.
const RELATIVE_FACE_TOL: f64 = 0.95;
const ABSOLUTE_FACE_TOL: f64 = 0.01;

const NO_EDGE: u8 = 0;
const EDGE1: u8 = 1;
const EDGE2: u8 = 2;
const EDGE3: u8 = 3;
const EDGE4: u8 = 4;

/// Persistent contact identifier packing the four 8-bit edge tags
/// (in/out edge on each body). Equal ids across steps mean the same
/// geometric feature pair, which is what warm-starting keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureId {
    pub in_a: u8,
    pub out_a: u8,
    pub in_b: u8,
    pub out_b: u8,
}

impl FeatureId {
    pub fn pack(self) -> u32 {
        (self.in_a as u32)
            | (self.out_a as u32) << 8
            | (self.in_b as u32) << 16
            | (self.out_b as u32) << 24
    }

    /// Swaps the per-body tags; applied when the reference body is B so ids
    /// stay comparable regardless of which box owned the reference face.
    fn flip(&mut self) {
        std::mem::swap(&mut self.in_a, &mut self.in_b);
        std::mem::swap(&mut self.out_a, &mut self.out_b);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ClipVertex {
    v: DVec2,
    id: FeatureId,
}

/// One clipped contact in world space, before it is bound to body frames.
/// `normal` is the reference-face normal pointing from A toward B; the
/// anchors lie on each body's own surface, so
/// `normal . (p_b - p_a) == separation`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RawContact {
    feature: FeatureId,
    normal: DVec2,
    separation: f64,
    p_a: DVec2,
    p_b: DVec2,
}

#[derive(Debug, Clone, Copy, Default)]
struct Contact {
    feature: FeatureId,
    r_a: DVec2,
    r_b: DVec2,
    normal: DVec2,
    j_norm_a: DVec3,
    j_tang_a: DVec3,
    j_norm_b: DVec3,
    j_tang_b: DVec3,
    c0: DVec2,
    stick: bool,
}

/// Contact manifold between two oriented rectangles. Holds at most two
/// persistent contact points, two rows each (normal then tangent).
#[derive(Debug, Clone)]
pub struct Manifold {
    body_a: BodyKey,
    body_b: BodyKey,
    contacts: [Contact; 2],
    contact_count: usize,
    rows: [Row; MAX_ROWS],
    friction: f64,
}

impl Manifold {
    pub fn new(body_a: BodyKey, body_b: BodyKey) -> Self {
        Self {
            body_a,
            body_b,
            contacts: [Contact::default(); 2],
            contact_count: 0,
            rows: [Row::default(); MAX_ROWS],
            friction: 0.0,
        }
    }

    pub fn contact_count(&self) -> usize {
        self.contact_count
    }

    pub fn friction(&self) -> f64 {
        self.friction
    }

    pub fn feature_id(&self, contact: usize) -> FeatureId {
        self.contacts[contact].feature
    }

    pub fn is_sticking(&self, contact: usize) -> bool {
        self.contacts[contact].stick
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows[..self.contact_count * 2]
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows[..self.contact_count * 2]
    }

    pub fn bodies(&self) -> ForceBodies {
        ForceBodies::two(self.body_a, self.body_b)
    }

    /// Re-collides the pair, merges warm-start data from the previous
    /// step's contacts by feature id, and precomputes the step-constant
    /// Jacobians. Returns false when the boxes have separated.
    pub(crate) fn initialize(&mut self, bodies: &Bodies) -> bool {
        let body_a = &bodies[self.body_a];
        let body_b = &bodies[self.body_b];

        self.friction = (body_a.friction * body_b.friction).sqrt();

        let old_contacts = self.contacts;
        let old_count = self.contact_count;
        let old_rows = self.rows;

        let mut raw = [RawContact::default(); 2];
        let count = collide(body_a, body_b, &mut raw);
        self.contact_count = count;
        self.rows = [Row::default(); MAX_ROWS];

        let rot_a = body_a.rotation();
        let rot_b = body_b.rotation();
        let pos_a = body_a.position();
        let pos_b = body_b.position();

        for i in 0..count {
            let rc = raw[i];
            // The stored normal is the push direction of body A. With the
            // pushing-only bounds [-inf, 0] this makes the normal row
            // negative exactly while penetrating.
            let mut contact = Contact {
                feature: rc.feature,
                r_a: rot_a.transpose() * (rc.p_a - pos_a),
                r_b: rot_b.transpose() * (rc.p_b - pos_b),
                normal: -rc.normal,
                ..Contact::default()
            };

            let mut normal_row = contact_normal_row();
            let mut tangent_row = contact_tangent_row();

            // --- warm-start merge ---
            for j in 0..old_count {
                if old_contacts[j].feature != contact.feature {
                    continue;
                }
                normal_row.penalty = old_rows[j * 2].penalty;
                normal_row.lambda = old_rows[j * 2].lambda;
                tangent_row.penalty = old_rows[j * 2 + 1].penalty;
                tangent_row.lambda = old_rows[j * 2 + 1].lambda;
                contact.stick = old_contacts[j].stick;
                if contact.stick {
                    // Static friction resists motion relative to the
                    // persistent anchors, not the freshly clipped ones.
                    contact.r_a = old_contacts[j].r_a;
                    contact.r_b = old_contacts[j].r_b;
                }
                break;
            }

            // --- step-constant jacobians and the stabilization target ---
            let ra_w = rot_a * contact.r_a;
            let rb_w = rot_b * contact.r_b;
            let n = contact.normal;
            let t = DVec2::new(n.y, -n.x);

            contact.j_norm_a = DVec3::new(n.x, n.y, cross2(ra_w, n));
            contact.j_tang_a = DVec3::new(t.x, t.y, cross2(ra_w, t));
            contact.j_norm_b = DVec3::new(-n.x, -n.y, -cross2(rb_w, n));
            contact.j_tang_b = DVec3::new(-t.x, -t.y, -cross2(rb_w, t));

            let delta = (pos_a + ra_w) - (pos_b + rb_w);
            contact.c0 = DVec2::new(n.dot(delta) + COLLISION_MARGIN, t.dot(delta));

            self.contacts[i] = contact;
            self.rows[i * 2] = normal_row;
            self.rows[i * 2 + 1] = tangent_row;
        }

        count > 0
    }

    pub(crate) fn compute_constraints(&mut self, bodies: &Bodies, alpha: f64) {
        let dq_a = bodies[self.body_a].pose() - bodies[self.body_a].last_pose;
        let dq_b = bodies[self.body_b].pose() - bodies[self.body_b].last_pose;

        for i in 0..self.contact_count {
            let contact = self.contacts[i];
            self.rows[i * 2].c = (1.0 - alpha) * contact.c0.x
                + contact.j_norm_a.dot(dq_a)
                + contact.j_norm_b.dot(dq_b);
            self.rows[i * 2 + 1].c = (1.0 - alpha) * contact.c0.y
                + contact.j_tang_a.dot(dq_a)
                + contact.j_tang_b.dot(dq_b);

            // Coulomb cone follows the current normal dual.
            let cone = self.friction * self.rows[i * 2].lambda.abs();
            self.rows[i * 2 + 1].fmin = -cone;
            self.rows[i * 2 + 1].fmax = cone;
            self.contacts[i].stick = self.rows[i * 2 + 1].lambda.abs() < cone
                && contact.c0.y.abs() < STICK_THRESHOLD;
        }
    }

    /// Re-projects the tangential duals onto the cone of the freshly
    /// updated normal duals, so the Coulomb bound holds exactly after
    /// every dual ascent.
    pub(crate) fn enforce_cone(&mut self) {
        for i in 0..self.contact_count {
            let cone = self.friction * self.rows[i * 2].lambda.abs();
            let tangent = &mut self.rows[i * 2 + 1];
            tangent.fmin = -cone;
            tangent.fmax = cone;
            tangent.lambda = tangent.lambda.clamp(-cone, cone);
        }
    }

    pub(crate) fn derivatives(&self, body: BodyKey, out: &mut [RowDerivatives; MAX_ROWS]) {
        for d in out.iter_mut() {
            *d = RowDerivatives::default();
        }
        for i in 0..self.contact_count {
            let contact = &self.contacts[i];
            if body == self.body_a {
                out[i * 2].j = contact.j_norm_a;
                out[i * 2 + 1].j = contact.j_tang_a;
            } else if body == self.body_b {
                out[i * 2].j = contact.j_norm_b;
                out[i * 2 + 1].j = contact.j_tang_b;
            }
        }
    }

    pub(crate) fn emit_render(&self, bodies: &Bodies, feed: &mut RenderFeed) {
        let body_a = &bodies[self.body_a];
        let rot_a = body_a.rotation();
        for i in 0..self.contact_count {
            feed.push_point(body_a.position() + rot_a * self.contacts[i].r_a);
        }
    }
}

fn contact_normal_row() -> Row {
    Row {
        fmin: f64::NEG_INFINITY,
        // Pushing only; a contact never pulls.
        fmax: 0.0,
        ..Row::default()
    }
}

fn contact_tangent_row() -> Row {
    Row {
        fmin: 0.0,
        fmax: 0.0,
        ..Row::default()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Axis {
    FaceAX,
    FaceAY,
    FaceBX,
    FaceBY,
}

fn abs_mat2(m: &DMat2) -> DMat2 {
    DMat2::from_cols(m.x_axis.abs(), m.y_axis.abs())
}

/// Box-box narrow phase: SAT over the four face axes, reference/incident
/// edge choice, then Sutherland-Hodgman clipping against the reference side
/// planes. Produces at most two contacts with world-space anchor points
/// satisfying `normal . (p_b - p_a) == separation`.
pub(crate) fn collide(body_a: &Body, body_b: &Body, out: &mut [RawContact; 2]) -> usize {
    // Point particles are zero-extent boxes; the SAT and clipping below
    // degrade gracefully, so particle-vs-rectangle contact falls out of
    // the same path.
    let half_a = body_a.size() * 0.5;
    let half_b = body_b.size() * 0.5;

    let pos_a = body_a.position();
    let pos_b = body_b.position();
    let rot_a = body_a.rotation();
    let rot_b = body_b.rotation();
    let rot_at = rot_a.transpose();
    let rot_bt = rot_b.transpose();

    let dp = pos_b - pos_a;
    let d_a = rot_at * dp;
    let d_b = rot_bt * dp;

    let c = rot_at * rot_b;
    let abs_c = abs_mat2(&c);
    let abs_ct = abs_c.transpose();

    // --- SAT prune ---
    let face_a = d_a.abs() - half_a - abs_c * half_b;
    if face_a.x > 0.0 || face_a.y > 0.0 {
        return 0;
    }
    let face_b = d_b.abs() - half_b - abs_ct * half_a;
    if face_b.x > 0.0 || face_b.y > 0.0 {
        return 0;
    }

    // --- reference face selection, biased against face switching ---
    let mut axis = Axis::FaceAX;
    let mut separation = face_a.x;
    let mut normal = if d_a.x > 0.0 {
        rot_a.x_axis
    } else {
        -rot_a.x_axis
    };

    if face_a.y > RELATIVE_FACE_TOL * separation + ABSOLUTE_FACE_TOL * half_a.y {
        axis = Axis::FaceAY;
        separation = face_a.y;
        normal = if d_a.y > 0.0 {
            rot_a.y_axis
        } else {
            -rot_a.y_axis
        };
    }
    if face_b.x > RELATIVE_FACE_TOL * separation + ABSOLUTE_FACE_TOL * half_b.x {
        axis = Axis::FaceBX;
        separation = face_b.x;
        normal = if d_b.x > 0.0 {
            rot_b.x_axis
        } else {
            -rot_b.x_axis
        };
    }
    if face_b.y > RELATIVE_FACE_TOL * separation + ABSOLUTE_FACE_TOL * half_b.y {
        axis = Axis::FaceBY;
        normal = if d_b.y > 0.0 {
            rot_b.y_axis
        } else {
            -rot_b.y_axis
        };
    }

    // --- clipping setup ---
    struct ClipSetup {
        front_normal: DVec2,
        front: f64,
        side_normal: DVec2,
        neg_side: f64,
        pos_side: f64,
        neg_edge: u8,
        pos_edge: u8,
        incident: [ClipVertex; 2],
    }

    let setup = match axis {
        Axis::FaceAX => {
            let front_normal = normal;
            let side_normal = rot_a.y_axis;
            let side = pos_a.dot(side_normal);
            ClipSetup {
                front_normal,
                front: pos_a.dot(front_normal) + half_a.x,
                side_normal,
                neg_side: -side + half_a.y,
                pos_side: side + half_a.y,
                neg_edge: EDGE3,
                pos_edge: EDGE1,
                incident: incident_edge(half_b, pos_b, &rot_b, front_normal),
            }
        }
        Axis::FaceAY => {
            let front_normal = normal;
            let side_normal = rot_a.x_axis;
            let side = pos_a.dot(side_normal);
            ClipSetup {
                front_normal,
                front: pos_a.dot(front_normal) + half_a.y,
                side_normal,
                neg_side: -side + half_a.x,
                pos_side: side + half_a.x,
                neg_edge: EDGE2,
                pos_edge: EDGE4,
                incident: incident_edge(half_b, pos_b, &rot_b, front_normal),
            }
        }
        Axis::FaceBX => {
            let front_normal = -normal;
            let side_normal = rot_b.y_axis;
            let side = pos_b.dot(side_normal);
            ClipSetup {
                front_normal,
                front: pos_b.dot(front_normal) + half_b.x,
                side_normal,
                neg_side: -side + half_b.y,
                pos_side: side + half_b.y,
                neg_edge: EDGE3,
                pos_edge: EDGE1,
                incident: incident_edge(half_a, pos_a, &rot_a, front_normal),
            }
        }
        Axis::FaceBY => {
            let front_normal = -normal;
            let side_normal = rot_b.x_axis;
            let side = pos_b.dot(side_normal);
            ClipSetup {
                front_normal,
                front: pos_b.dot(front_normal) + half_b.y,
                side_normal,
                neg_side: -side + half_b.x,
                pos_side: side + half_b.x,
                neg_edge: EDGE2,
                pos_edge: EDGE4,
                incident: incident_edge(half_a, pos_a, &rot_a, front_normal),
            }
        }
    };
    let ClipSetup {
        front_normal,
        front,
        side_normal,
        neg_side,
        pos_side,
        neg_edge,
        pos_edge,
        incident,
    } = setup;

    // --- Sutherland-Hodgman: clip the incident edge to both side planes ---
    let (clipped1, count1) = clip_segment_to_line(&incident, -side_normal, neg_side, neg_edge);
    if count1 < 2 {
        return 0;
    }
    let (clipped2, count2) = clip_segment_to_line(&clipped1, side_normal, pos_side, pos_edge);
    if count2 < 2 {
        return 0;
    }

    // --- keep survivors behind the reference face ---
    let flipped = matches!(axis, Axis::FaceBX | Axis::FaceBY);
    let mut count = 0;
    for cv in &clipped2 {
        let sep = front_normal.dot(cv.v) - front;
        if sep > 0.0 {
            continue;
        }
        let on_face = cv.v - sep * front_normal;
        let mut id = cv.id;
        // The reference body keeps the projected point on its face, the
        // incident body keeps the clipped point on its edge.
        let (p_a, p_b) = if flipped {
            id.flip();
            (cv.v, on_face)
        } else {
            (on_face, cv.v)
        };
        out[count] = RawContact {
            feature: id,
            normal,
            separation: sep,
            p_a,
            p_b,
        };
        count += 1;
        if count == 2 {
            break;
        }
    }
    count
}

/// Picks the edge of the box whose outward normal is most anti-parallel to
/// the reference normal, tagged with its in/out edge numbers.
fn incident_edge(half: DVec2, pos: DVec2, rot: &DMat2, normal: DVec2) -> [ClipVertex; 2] {
    let n = -(rot.transpose() * normal);
    let n_abs = n.abs();
    let mut c = [ClipVertex::default(); 2];

    if n_abs.x > n_abs.y {
        if n.x > 0.0 {
            c[0].v = DVec2::new(half.x, -half.y);
            c[0].id.in_b = EDGE3;
            c[0].id.out_b = EDGE4;
            c[1].v = DVec2::new(half.x, half.y);
            c[1].id.in_b = EDGE4;
            c[1].id.out_b = EDGE1;
        } else {
            c[0].v = DVec2::new(-half.x, half.y);
            c[0].id.in_b = EDGE1;
            c[0].id.out_b = EDGE2;
            c[1].v = DVec2::new(-half.x, -half.y);
            c[1].id.in_b = EDGE2;
            c[1].id.out_b = EDGE3;
        }
    } else if n.y > 0.0 {
        c[0].v = DVec2::new(half.x, half.y);
        c[0].id.in_b = EDGE4;
        c[0].id.out_b = EDGE1;
        c[1].v = DVec2::new(-half.x, half.y);
        c[1].id.in_b = EDGE1;
        c[1].id.out_b = EDGE2;
    } else {
        c[0].v = DVec2::new(-half.x, -half.y);
        c[0].id.in_b = EDGE2;
        c[0].id.out_b = EDGE3;
        c[1].v = DVec2::new(half.x, -half.y);
        c[1].id.in_b = EDGE3;
        c[1].id.out_b = EDGE4;
    }

    c[0].v = pos + *rot * c[0].v;
    c[1].v = pos + *rot * c[1].v;
    c
}

fn clip_segment_to_line(
    input: &[ClipVertex; 2],
    normal: DVec2,
    offset: f64,
    clip_edge: u8,
) -> ([ClipVertex; 2], usize) {
    let mut out = [ClipVertex::default(); 2];
    let mut count = 0;

    let distance0 = normal.dot(input[0].v) - offset;
    let distance1 = normal.dot(input[1].v) - offset;

    if distance0 <= 0.0 {
        out[count] = input[0];
        count += 1;
    }
    if distance1 <= 0.0 {
        out[count] = input[1];
        count += 1;
    }

    if distance0 * distance1 < 0.0 {
        let interp = distance0 / (distance0 - distance1);
        let mut cv = ClipVertex {
            v: input[0].v + interp * (input[1].v - input[0].v),
            ..ClipVertex::default()
        };
        if distance0 > 0.0 {
            cv.id = input[0].id;
            cv.id.in_a = clip_edge;
            cv.id.in_b = NO_EDGE;
        } else {
            cv.id = input[1].id;
            cv.id.out_a = clip_edge;
            cv.id.out_b = NO_EDGE;
        }
        out[count] = cv;
        count += 1;
    }

    (out, count)
}
