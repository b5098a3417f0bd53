//! Fixed-rate tick driver.

use crate::session::Session;
use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

/// Longest step handed to the simulation in one tick.
const MAX_DELTA_TIME: f32 = 1.0 / 20.0;

/// Fastest supported rate; higher requests run at this rate.
pub const MAX_TICK_RATE: u32 = 1000;

pub struct GameLoop {
    session: Session,
    tick_duration: Duration,
}

impl GameLoop {
    pub fn new(session: Session, tick_rate: u32) -> Self {
        let tick_rate = tick_rate.clamp(1, MAX_TICK_RATE);
        Self {
            session,
            tick_duration: Duration::from_secs_f32(1.0 / tick_rate as f32),
        }
    }

    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Ticks the session forever. Missed ticks are skipped, not replayed.
    pub async fn run(self) {
        let mut timer = interval(self.tick_duration);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // The first tick completes immediately.
        timer.tick().await;
        let mut last_update = Instant::now();
        debug!("Game loop running every {:?}", self.tick_duration);

        loop {
            timer.tick().await;

            let now = Instant::now();
            let mut dt = (now - last_update).as_secs_f32();
            last_update = now;

            if dt > MAX_DELTA_TIME {
                warn!(
                    "Large delta time detected ({:.3}s), capping to {:.3}s",
                    dt, MAX_DELTA_TIME
                );
                dt = MAX_DELTA_TIME;
            }

            self.session.tick(dt);
        }
    }
}
