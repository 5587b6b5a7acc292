//! Scripted flight plans

use dronesim_shared::{Command, Movement};

/// One leg of a plan: a command repeated for a number of ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leg {
    pub command: Command,
    pub ticks: u32,
}

impl Leg {
    pub fn new(speed: u8, altitude_delta: i64, movement: Movement, ticks: u32) -> Self {
        Self {
            command: Command::new(speed, altitude_delta, movement),
            ticks,
        }
    }
}

/// A cyclic sequence of legs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightPlan {
    legs: Vec<Leg>,
}

impl Default for FlightPlan {
    /// Climb, cruise out, cruise back, descend to ground level
    fn default() -> Self {
        Self::new(vec![
            Leg::new(1, 10, Movement::Forward, 5),
            Leg::new(5, 0, Movement::Forward, 10),
            Leg::new(5, 0, Movement::Reverse, 10),
            Leg::new(0, -10, Movement::Forward, 5),
        ])
    }
}

impl FlightPlan {
    /// Build a plan; legs with zero ticks are dropped
    pub fn new(legs: Vec<Leg>) -> Self {
        Self {
            legs: legs.into_iter().filter(|leg| leg.ticks > 0).collect(),
        }
    }

    /// Ticks in one cycle of the plan
    pub fn cycle_len(&self) -> u64 {
        self.legs.iter().map(|leg| u64::from(leg.ticks)).sum()
    }

    /// Command for a zero-based tick, wrapping around the plan
    pub fn command_at(&self, tick: u64) -> Option<Command> {
        let cycle = self.cycle_len();
        if cycle == 0 {
            return None;
        }

        let mut offset = tick % cycle;
        for leg in &self.legs {
            let ticks = u64::from(leg.ticks);
            if offset < ticks {
                return Some(leg.command);
            }
            offset -= ticks;
        }
        None
    }
}
