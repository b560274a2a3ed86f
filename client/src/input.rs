//! Client input sampling with tick stamping
//!
//! The headless client has no keyboard; an [`InputSource`] produces the stick
//! and aim for each tick and the [`InputSampler`] turns it into a sanitized
//! [`InputSample`] for the predictor's next tick.

use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{InputSample, Quat, Tick, Vec2};
use std::f32::consts::TAU;

/// Anything that can steer the entity for a tick.
pub trait InputSource {
    /// Stick vector and aim orientation for `tick`.
    fn sample(&mut self, tick: Tick) -> (Vec2, Quat);
}

/// Built-in movement scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputPattern {
    /// Stand still
    Idle,
    /// Run straight ahead
    Forward,
    /// Run in a circle, one lap every four seconds
    Circle,
    /// Run ahead while strafing left and right
    Zigzag,
    /// Pick a new random heading every half second
    Wander,
}

/// Deterministic scripted input, reproducible from its pattern and seed.
#[derive(Debug)]
pub struct ScriptedInput {
    pattern: InputPattern,
    tick_rate: u32,
    rng: StdRng,
    heading: f32,
    throttle: f32,
}

impl ScriptedInput {
    pub fn new(pattern: InputPattern, tick_rate: u32, seed: u64) -> Self {
        Self {
            pattern,
            tick_rate: tick_rate.max(1),
            rng: StdRng::seed_from_u64(seed),
            heading: 0.0,
            throttle: 1.0,
        }
    }

    pub fn pattern(&self) -> InputPattern {
        self.pattern
    }
}

impl InputSource for ScriptedInput {
    fn sample(&mut self, tick: Tick) -> (Vec2, Quat) {
        let seconds = tick as f32 / self.tick_rate as f32;
        match self.pattern {
            InputPattern::Idle => (Vec2::ZERO, Quat::IDENTITY),
            InputPattern::Forward => (Vec2::new(0.0, 1.0), Quat::IDENTITY),
            InputPattern::Circle => (Vec2::new(0.0, 1.0), Quat::from_yaw(seconds * TAU / 4.0)),
            InputPattern::Zigzag => {
                let strafe = if (tick / self.tick_rate) % 2 == 0 { 1.0 } else { -1.0 };
                (Vec2::new(strafe, 1.0), Quat::IDENTITY)
            }
            InputPattern::Wander => {
                if tick % (self.tick_rate / 2).max(1) == 0 {
                    self.heading = self.rng.gen_range(0.0..TAU);
                    self.throttle = self.rng.gen_range(0.0..=1.0);
                }
                (Vec2::new(0.0, self.throttle), Quat::from_yaw(self.heading))
            }
        }
    }
}

/// Turns source output into tick-stamped samples
pub struct InputSampler {
    source: Box<dyn InputSource + Send>,
    last_orientation: Quat,
}

impl InputSampler {
    pub fn new(source: Box<dyn InputSource + Send>) -> Self {
        Self {
            source,
            last_orientation: Quat::IDENTITY,
        }
    }

    pub fn scripted(pattern: InputPattern, tick_rate: u32, seed: u64) -> Self {
        Self::new(Box::new(ScriptedInput::new(pattern, tick_rate, seed)))
    }

    /// Samples the source for `tick`. Non-finite sticks become zero and a
    /// degenerate aim falls back to the last good one.
    pub fn sample(&mut self, tick: Tick) -> InputSample {
        let (move_vector, orientation) = self.source.sample(tick);
        let orientation = match orientation.try_normalize() {
            Some(orientation) => {
                self.last_orientation = orientation;
                orientation
            }
            None => self.last_orientation,
        };
        InputSample::new(tick, move_vector.sanitized(), orientation)
    }
}
