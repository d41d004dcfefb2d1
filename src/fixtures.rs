//! Deterministic scene builders for the hardcoded fixtures: a hanging
//! cloth grid, a hexagonal soft body and a pinned cantilever beam.
//! Identical parameters always produce identical worlds.

use glam::{DVec2, DVec3};

use crate::body::Body;
use crate::energy::{Element, Material};
use crate::forces::{Force, Joint, Length};
use crate::handles::BodyKey;
use crate::world::World;

/// A `cols x rows` grid of particles laced with distance constraints along
/// both grid directions. The top row is pinned by zero mass. Returns the
/// particle keys in row-major order, top row first.
pub fn cloth_grid(
    world: &mut World,
    origin: DVec2,
    cols: usize,
    rows: usize,
    spacing: f64,
    particle_mass: f64,
    compliance: f64,
) -> Vec<BodyKey> {
    let mut keys = Vec::with_capacity(cols * rows);
    for row in 0..rows {
        for col in 0..cols {
            let position = origin + DVec2::new(col as f64 * spacing, -(row as f64) * spacing);
            let mass = if row == 0 { 0.0 } else { particle_mass };
            keys.push(world.add_body(Body::particle(position, mass)));
        }
    }

    let index = |row: usize, col: usize| keys[row * cols + col];
    for row in 0..rows {
        for col in 0..cols {
            if col + 1 < cols {
                let link = Length::new(
                    &world.bodies,
                    index(row, col),
                    index(row, col + 1),
                    DVec2::ZERO,
                    DVec2::ZERO,
                    compliance,
                    Some(spacing),
                );
                world.add_force(Force::Length(link));
            }
            if row + 1 < rows {
                let link = Length::new(
                    &world.bodies,
                    index(row, col),
                    index(row + 1, col),
                    DVec2::ZERO,
                    DVec2::ZERO,
                    compliance,
                    Some(spacing),
                );
                world.add_force(Force::Length(link));
            }
        }
    }

    keys
}

/// A central particle surrounded by a six-particle ring, meshed with
/// Neo-Hookean triangles. Returns the keys, center first.
pub fn hex_soft_body(
    world: &mut World,
    center: DVec2,
    radius: f64,
    particle_mass: f64,
    young: f64,
    poisson: f64,
) -> Vec<BodyKey> {
    let mut keys = Vec::with_capacity(7);
    keys.push(world.add_body(Body::particle(center, particle_mass)));
    for i in 0..6 {
        let angle = std::f64::consts::TAU * i as f64 / 6.0;
        let position = center + radius * DVec2::new(angle.cos(), angle.sin());
        keys.push(world.add_body(Body::particle(position, particle_mass)));
    }

    for i in 0..6 {
        let a = keys[1 + i];
        let b = keys[1 + (i + 1) % 6];
        // Ring runs counter-clockwise, so (center, a, b) is positively
        // oriented.
        let element = Element::from_young(
            &world.bodies,
            [keys[0], a, b],
            Material::NeoHookean,
            young,
            poisson,
        )
        .expect("hex ring triangles are non-degenerate");
        world.add_element(element);
    }

    keys
}

/// A `cols x rows` quad grid of StVK triangles with the right column
/// pinned to the world by hard joints. Returns the particle keys in
/// row-major order, bottom-left first; `keys[0]` is the free tip.
#[allow(clippy::too_many_arguments)]
pub fn cantilever_beam(
    world: &mut World,
    origin: DVec2,
    cols: usize,
    rows: usize,
    spacing: f64,
    particle_mass: f64,
    mu: f64,
    lambda: f64,
) -> Vec<BodyKey> {
    let mut keys = Vec::with_capacity((cols + 1) * (rows + 1));
    for row in 0..=rows {
        for col in 0..=cols {
            let position = origin + DVec2::new(col as f64 * spacing, row as f64 * spacing);
            keys.push(world.add_body(Body::particle(position, particle_mass)));
        }
    }

    let index = |row: usize, col: usize| keys[row * (cols + 1) + col];

    for row in 0..rows {
        for col in 0..cols {
            let p00 = index(row, col);
            let p10 = index(row, col + 1);
            let p01 = index(row + 1, col);
            let p11 = index(row + 1, col + 1);
            for triangle in [[p00, p10, p11], [p00, p11, p01]] {
                let element = Element::from_lame(
                    &world.bodies,
                    triangle,
                    Material::StVenantKirchhoff,
                    mu,
                    lambda,
                )
                .expect("beam quads split into valid triangles");
                world.add_element(element);
            }
        }
    }

    for row in 0..=rows {
        let key = index(row, cols);
        let position = world.body(key).expect("pinned particle exists").position();
        let pin = Joint::to_world(
            &world.bodies,
            position,
            key,
            DVec2::ZERO,
            DVec3::new(f64::INFINITY, f64::INFINITY, 0.0),
            None,
        );
        world.add_force(Force::Joint(pin));
    }

    keys
}
