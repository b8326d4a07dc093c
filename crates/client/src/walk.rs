use std::f32::consts::TAU;

use craft_net::Pose;
use glam::Vec3;

pub const CHUNK_SIZE: i32 = 32;

/// Fixed-height circular route around the origin.
#[derive(Debug, Clone, Copy)]
pub struct CircleWalk {
    pub radius: f32,
    pub height: f32,
    pub steps: u32,
}

impl CircleWalk {
    /// Pose at `step`, facing along the direction of travel.
    pub fn pose(&self, step: u32) -> Pose {
        let angle = TAU * (step % self.steps.max(1)) as f32 / self.steps.max(1) as f32;
        let position = Vec3::new(self.radius * angle.cos(), self.height, self.radius * angle.sin());
        Pose {
            position,
            yaw: angle + TAU / 4.0,
            pitch: 0.0,
        }
    }
}

pub fn chunk_of(position: Vec3) -> (i32, i32) {
    (
        (position.x.floor() as i32).div_euclid(CHUNK_SIZE),
        (position.z.floor() as i32).div_euclid(CHUNK_SIZE),
    )
}

/// The chunk and its eight neighbours.
pub fn neighbourhood(p: i32, q: i32) -> impl Iterator<Item = (i32, i32)> {
    (-1..=1).flat_map(move |dp| (-1..=1).map(move |dq| (p + dp, q + dq)))
}
