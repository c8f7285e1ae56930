//! Human-like drag motion synthesis.
//!
//! The verify endpoint scores the timing/step profile of the drag as an
//! anti-automation signal, so a linear interpolation would be rejected. The
//! synthesized path advances in small random increments and lands exactly on
//! the target offset.

use rand::Rng;
use serde::Serialize;

/// One step of a drag motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MotionStep {
    pub relative_time: u32,
    pub x: u32,
    pub y: u32,
}

/// Ordered drag path ending exactly on the target offset.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct MotionPath {
    steps: Vec<MotionStep>,
}

impl MotionPath {
    #[must_use]
    pub fn steps(&self) -> &[MotionStep] {
        &self.steps
    }

    #[must_use]
    pub fn last_x(&self) -> u32 {
        // Paths are never constructed empty.
        self.steps.last().map_or(0, |s| s.x)
    }
}

/// Synthesize a drag from rest to `target_x`, holding the challenge's tip
/// row as the vertical coordinate.
///
/// The path starts after a random settle delay, then advances 1-6 px per
/// 6-9 time units. If the random walk overshoots (or the target is 0 and no
/// step was taken), one corrective step lands exactly on `target_x`.
#[must_use]
pub fn synthesize(target_x: u32, tip_y: u32) -> MotionPath {
    let mut rng = rand::thread_rng();

    let mut current_x: u32 = 0;
    let mut current_time: u32 = rng.gen_range(100..=400);
    let mut steps = Vec::new();

    while current_x < target_x {
        current_time += rng.gen_range(6..=9);
        current_x += rng.gen_range(1..=6);

        steps.push(MotionStep {
            relative_time: current_time,
            x: current_x,
            y: tip_y,
        });
    }

    if steps.last().map_or(true, |s| s.x != target_x) {
        current_time += rng.gen_range(6..=9);
        steps.push(MotionStep {
            relative_time: current_time,
            x: target_x,
            y: tip_y,
        });
    }

    MotionPath { steps }
}
