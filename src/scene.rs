use std::fs;
use std::path::Path;

use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::body::Body;
use crate::fixtures;
use crate::forces::{Force, Joint, Spring};
use crate::handles::BodyKey;
use crate::world::World;

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scene Parse Error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid color string {0:?}")]
    InvalidColor(String),

    #[error("Body index {0} out of range ({1} bodies in scene)")]
    BodyIndex(usize, usize),

    #[error("Unknown fixture {0:?}")]
    UnknownFixture(String),
}

/// One rectangle in the scene description. Rotation is in degrees on the
/// wire and converted to radians on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BodyEntry {
    pub position: [f64; 2],
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub init_velocity: [f64; 3],
    pub scale: [f64; 2],
    #[serde(default = "default_friction")]
    pub friction: f64,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_density")]
    pub density: f64,
}

fn default_friction() -> f64 {
    0.5
}

fn default_color() -> String {
    "#ffffff".to_owned()
}

fn default_density() -> f64 {
    1.0
}

/// Joint description. Body indices address the combined spawn order:
/// statics first, then dynamics. A missing `BodyAIndex` anchors the joint
/// to the world at `rA_offset`. Stiffness components may be `inf`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointEntry {
    #[serde(rename = "BodyAIndex", default, skip_serializing_if = "Option::is_none")]
    pub body_a_index: Option<usize>,
    #[serde(rename = "BodyBIndex")]
    pub body_b_index: usize,
    #[serde(rename = "rA_offset", default)]
    pub r_a_offset: [f64; 2],
    #[serde(rename = "rB_offset", default)]
    pub r_b_offset: [f64; 2],
    #[serde(rename = "Stiffness")]
    pub stiffness: [f64; 3],
    #[serde(rename = "Fracture", default, skip_serializing_if = "Option::is_none")]
    pub fracture: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpringEntry {
    #[serde(rename = "BodyAIndex")]
    pub body_a_index: usize,
    #[serde(rename = "BodyBIndex")]
    pub body_b_index: usize,
    #[serde(rename = "rA_offset", default)]
    pub r_a_offset: [f64; 2],
    #[serde(rename = "rB_offset", default)]
    pub r_b_offset: [f64; 2],
    #[serde(rename = "Stiffness")]
    pub stiffness: f64,
    #[serde(rename = "RestLength", default, skip_serializing_if = "Option::is_none")]
    pub rest_length: Option<f64>,
}

/// A loadable scene: rectangles, joints, springs, an optional gravity
/// override and an optional hardcoded fixture to build on top.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneDescription {
    #[serde(rename = "Gravity", default, skip_serializing_if = "Option::is_none")]
    pub gravity: Option<[f64; 2]>,

    #[serde(rename = "Fixture", default, skip_serializing_if = "Option::is_none")]
    pub fixture: Option<String>,

    #[serde(rename = "Static", default)]
    pub statics: Vec<BodyEntry>,

    #[serde(rename = "Dynamic", default)]
    pub dynamics: Vec<BodyEntry>,

    #[serde(rename = "JointForces", default)]
    pub joints: Vec<JointEntry>,

    #[serde(rename = "SpringForces", default)]
    pub springs: Vec<SpringEntry>,
}

impl SceneDescription {
    pub fn from_toml_str(content: &str) -> Result<Self, SceneError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, SceneError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Spawns the scene into `world` and returns the body keys in spawn
    /// order (statics first, then dynamics). Identical descriptions yield
    /// identical worlds.
    pub fn populate(&self, world: &mut World) -> Result<Vec<BodyKey>, SceneError> {
        if let Some([gx, gy]) = self.gravity {
            world.set_gravity(DVec2::new(gx, gy));
        }

        let mut keys = Vec::with_capacity(self.statics.len() + self.dynamics.len());
        for entry in &self.statics {
            keys.push(spawn_body(world, entry, 0.0)?);
        }
        for entry in &self.dynamics {
            keys.push(spawn_body(world, entry, entry.density)?);
        }

        let resolve = |index: usize| -> Result<BodyKey, SceneError> {
            keys.get(index)
                .copied()
                .ok_or(SceneError::BodyIndex(index, keys.len()))
        };

        for entry in &self.joints {
            let body_b = resolve(entry.body_b_index)?;
            let stiffness = DVec3::from_array(entry.stiffness);
            let anchor_a = DVec2::from_array(entry.r_a_offset);
            let anchor_b = DVec2::from_array(entry.r_b_offset);
            let joint = match entry.body_a_index {
                Some(index) => Joint::between(
                    &world.bodies,
                    resolve(index)?,
                    body_b,
                    anchor_a,
                    anchor_b,
                    stiffness,
                    entry.fracture,
                ),
                None => Joint::to_world(
                    &world.bodies,
                    anchor_a,
                    body_b,
                    anchor_b,
                    stiffness,
                    entry.fracture,
                ),
            };
            world.add_force(Force::Joint(joint));
        }

        for entry in &self.springs {
            let spring = Spring::new(
                &world.bodies,
                resolve(entry.body_a_index)?,
                resolve(entry.body_b_index)?,
                DVec2::from_array(entry.r_a_offset),
                DVec2::from_array(entry.r_b_offset),
                entry.stiffness,
                entry.rest_length,
            );
            world.add_force(Force::Spring(spring));
        }

        if let Some(name) = &self.fixture {
            build_fixture(world, name)?;
        }

        Ok(keys)
    }
}

fn spawn_body(world: &mut World, entry: &BodyEntry, density: f64) -> Result<BodyKey, SceneError> {
    let mut body = Body::rect(
        DVec2::from_array(entry.position),
        entry.rotation.to_radians(),
        DVec2::from_array(entry.scale),
        density,
        entry.friction,
    );
    body.color = parse_color(&entry.color)?;
    let key = world.add_body(body);
    let [vx, vy, omega] = entry.init_velocity;
    world
        .body_mut(key)
        .expect("body was just inserted")
        .set_velocity(DVec3::new(vx, vy, omega));
    Ok(key)
}

fn build_fixture(world: &mut World, name: &str) -> Result<(), SceneError> {
    match name {
        "cloth" => {
            fixtures::cloth_grid(world, DVec2::new(-4.0, 8.0), 16, 12, 0.5, 0.2, 1.0e-4);
        }
        "hex" => {
            fixtures::hex_soft_body(world, DVec2::new(0.0, 2.0), 3.0, 1.0, 3000.0, 0.3);
        }
        "cantilever" => {
            fixtures::cantilever_beam(world, DVec2::new(-10.0, 0.0), 20, 5, 0.5, 0.1, 300.0, 258.0);
        }
        other => return Err(SceneError::UnknownFixture(other.to_owned())),
    }
    Ok(())
}

/// Parses `#RRGGBB` into a packed RGB integer.
pub fn parse_color(color: &str) -> Result<u32, SceneError> {
    let hex = color
        .strip_prefix('#')
        .ok_or_else(|| SceneError::InvalidColor(color.to_owned()))?;
    if hex.len() != 6 {
        return Err(SceneError::InvalidColor(color.to_owned()));
    }
    u32::from_str_radix(hex, 16).map_err(|_| SceneError::InvalidColor(color.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;

    const STACK_SCENE: &str = r##"
        Gravity = [0.0, -9.81]

        [[Static]]
        Position = [0.0, -5.0]
        Scale = [50.0, 2.0]
        Friction = 0.6
        Color = "#808080"

        [[Dynamic]]
        Position = [0.0, -3.0]
        Rotation = 0.0
        Scale = [2.0, 2.0]
        InitVelocity = [0.0, 0.0, 0.0]
        Color = "#ff4040"

        [[Dynamic]]
        Position = [0.0, -1.0]
        Scale = [2.0, 2.0]

        [[JointForces]]
        BodyAIndex = 1
        BodyBIndex = 2
        rA_offset = [0.0, 1.0]
        rB_offset = [0.0, -1.0]
        Stiffness = [inf, inf, 0.0]

        [[SpringForces]]
        BodyAIndex = 0
        BodyBIndex = 2
        Stiffness = 50.0
        RestLength = 4.0
    "##;

    #[test]
    fn parses_and_populates_stack_scene() {
        let scene = SceneDescription::from_toml_str(STACK_SCENE).unwrap();
        assert_eq!(scene.statics.len(), 1);
        assert_eq!(scene.dynamics.len(), 2);
        assert_eq!(scene.joints.len(), 1);
        assert_eq!(scene.springs.len(), 1);

        let mut world = World::new();
        let keys = scene.populate(&mut world).unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(world.force_count(), 2);

        let floor = world.body(keys[0]).unwrap();
        assert!(floor.is_static());
        assert_eq!(floor.color, 0x808080);
        assert_relative_eq!(floor.friction, 0.6);

        let lower = world.body(keys[1]).unwrap();
        assert!(!lower.is_static());
        assert_relative_eq!(lower.mass(), 4.0);
        assert_eq!(lower.color, 0xff4040);
    }

    #[test]
    fn wire_rotation_is_degrees() {
        let toml = r#"
            [[Dynamic]]
            Position = [0.0, 0.0]
            Rotation = 90.0
            Scale = [1.0, 1.0]
        "#;
        let scene = SceneDescription::from_toml_str(toml).unwrap();
        let mut world = World::new();
        let keys = scene.populate(&mut world).unwrap();
        assert_relative_eq!(
            world.body(keys[0]).unwrap().angle(),
            std::f64::consts::FRAC_PI_2,
            epsilon = 1e-12
        );
    }

    #[test]
    fn infinite_stiffness_parses_as_hard_rows() {
        let scene = SceneDescription::from_toml_str(STACK_SCENE).unwrap();
        assert!(scene.joints[0].stiffness[0].is_infinite());
        assert_eq!(scene.joints[0].stiffness[2], 0.0);
    }

    #[test]
    fn init_velocity_is_applied() {
        let toml = r#"
            [[Dynamic]]
            Position = [0.0, 0.0]
            Scale = [1.0, 1.0]
            InitVelocity = [3.0, -1.0, 0.5]
        "#;
        let scene = SceneDescription::from_toml_str(toml).unwrap();
        let mut world = World::new();
        let keys = scene.populate(&mut world).unwrap();
        let v = world.body(keys[0]).unwrap().velocity();
        assert_relative_eq!(v.x, 3.0);
        assert_relative_eq!(v.y, -1.0);
        assert_relative_eq!(v.z, 0.5);
    }

    #[test]
    fn bad_color_is_rejected() {
        assert!(matches!(
            parse_color("not-a-color"),
            Err(SceneError::InvalidColor(_))
        ));
        assert!(matches!(
            parse_color("#12345"),
            Err(SceneError::InvalidColor(_))
        ));
        assert_eq!(parse_color("#0a0B0c").unwrap(), 0x0a0b0c);
    }

    #[test]
    fn out_of_range_body_index_is_rejected() {
        let toml = r#"
            [[Dynamic]]
            Position = [0.0, 0.0]
            Scale = [1.0, 1.0]

            [[SpringForces]]
            BodyAIndex = 0
            BodyBIndex = 7
            Stiffness = 10.0
        "#;
        let scene = SceneDescription::from_toml_str(toml).unwrap();
        let mut world = World::new();
        assert!(matches!(
            scene.populate(&mut world),
            Err(SceneError::BodyIndex(7, 1))
        ));
    }

    #[test]
    fn unknown_fixture_is_rejected() {
        let toml = r#"Fixture = "mystery""#;
        let scene = SceneDescription::from_toml_str(toml).unwrap();
        let mut world = World::new();
        assert!(matches!(
            scene.populate(&mut world),
            Err(SceneError::UnknownFixture(_))
        ));
    }

    #[test]
    fn known_fixtures_spawn_content() {
        for name in ["cloth", "hex", "cantilever"] {
            let scene = SceneDescription {
                fixture: Some(name.to_owned()),
                ..SceneDescription::default()
            };
            let mut world = World::new();
            scene.populate(&mut world).unwrap();
            assert!(world.body_count() > 0, "fixture {name} spawned nothing");
        }
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(STACK_SCENE.as_bytes()).unwrap();
        let scene = SceneDescription::from_file(file.path()).unwrap();
        assert_eq!(scene.dynamics.len(), 2);
    }

    #[test]
    fn description_round_trips_through_toml() {
        let scene = SceneDescription::from_toml_str(STACK_SCENE).unwrap();
        let serialized = toml::to_string(&scene).unwrap();
        let reparsed = SceneDescription::from_toml_str(&serialized).unwrap();
        assert_eq!(reparsed.statics.len(), scene.statics.len());
        assert_eq!(reparsed.joints.len(), scene.joints.len());
        assert_relative_eq!(
            reparsed.dynamics[0].position[1],
            scene.dynamics[0].position[1]
        );
    }
}
