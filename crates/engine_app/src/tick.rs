//! Coordinator tick loop.
//!
//! Each tick splits the simulated bodies into chunks and integrates every
//! chunk in its own fiber on the scheduler. The loop joins all fibers before
//! the tick ends, so a tick is a barrier.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use engine_fiber::{FiberContext, FiberError};
use engine_math::{Transform2D, Vec2};
use engine_scheduler::Scheduler;

/// Configuration for the coordinator tick loop.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Target ticks per second.
    pub tick_rate: f64,
    /// Maximum number of ticks to run (0 = unlimited).
    pub max_ticks: u64,
    /// Bodies integrated by one fiber.
    pub chunk_size: usize,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_ticks: 0,
            chunk_size: 128,
        }
    }
}

/// A moving transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub transform: Transform2D,
    pub velocity: Vec2,
    /// Angular velocity in radians per second.
    pub spin: f32,
}

impl Body {
    fn step(&mut self, dt: f32) {
        self.transform = self.transform.integrate(self.velocity, self.spin, dt);
    }
}

/// Lay out `count` bodies on a grid, each drifting outward and spinning.
#[must_use]
pub fn spawn_bodies(count: usize) -> Vec<Body> {
    let columns = (count as f32).sqrt().ceil().max(1.0) as usize;
    (0..count)
        .map(|i| {
            let position = Vec2::new((i % columns) as f32, (i / columns) as f32) * 16.0;
            Body {
                transform: Transform2D::from_position(position),
                velocity: position.normalize_or_zero() * 8.0,
                spin: if i % 2 == 0 { 1.0 } else { -1.0 },
            }
        })
        .collect()
}

/// The coordinator's tick loop state.
#[derive(Debug)]
pub struct TickLoop {
    tick_id: u64,
    config: TickConfig,
    bodies: Vec<Body>,
}

impl TickLoop {
    #[must_use]
    pub fn new(config: TickConfig, bodies: Vec<Body>) -> Self {
        Self {
            tick_id: 0,
            config,
            bodies,
        }
    }

    /// Returns the current tick counter.
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    #[must_use]
    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    /// Run one tick: integrate every body over `dt` seconds.
    ///
    /// Body order is preserved. When the scheduler has no workers, the
    /// calling thread pumps it.
    ///
    /// # Errors
    ///
    /// Fails if a chunk fiber cannot be submitted or does not complete.
    pub fn tick(&mut self, scheduler: &Scheduler, dt: f32) -> Result<(), FiberError> {
        self.tick_id += 1;
        let chunk_size = self.config.chunk_size.max(1);

        let mut handles = Vec::with_capacity(self.bodies.len().div_ceil(chunk_size));
        let mut rest = std::mem::take(&mut self.bodies);
        while !rest.is_empty() {
            let tail = rest.split_off(chunk_size.min(rest.len()));
            let chunk = std::mem::replace(&mut rest, tail);
            handles.push(scheduler.run_as_fiber(move |cx| integrate_chunk(cx, chunk, dt))?);
        }

        if scheduler.config().worker_count == 0 {
            while scheduler.run_pending(handles.len().max(1)) > 0 {}
        }

        let fibers = handles.len();
        for handle in handles {
            self.bodies.extend(handle.join()?);
        }

        debug!(tick_id = self.tick_id, dt, fibers, "tick complete");
        Ok(())
    }

    /// Run the tick loop for the configured number of ticks, or indefinitely.
    ///
    /// # Errors
    ///
    /// Stops at the first tick that fails.
    pub fn run(&mut self, scheduler: &Scheduler) -> Result<(), FiberError> {
        let tick_duration = Duration::from_secs_f64(1.0 / self.config.tick_rate);
        let mut tick_count = 0u64;

        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            bodies = self.bodies.len(),
            "starting tick loop"
        );

        loop {
            let start = Instant::now();

            self.tick(scheduler, tick_duration.as_secs_f32())?;

            tick_count += 1;
            if self.config.max_ticks > 0 && tick_count >= self.config.max_ticks {
                info!(ticks = tick_count, "tick loop complete");
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed < tick_duration {
                std::thread::sleep(tick_duration - elapsed);
            } else {
                warn!(
                    tick_id = self.tick_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = tick_duration.as_millis() as u64,
                    "tick exceeded time budget"
                );
            }
        }
    }
}

/// Integrate one chunk, yielding halfway so other chunks get a turn.
async fn integrate_chunk(
    cx: FiberContext,
    mut chunk: Vec<Body>,
    dt: f32,
) -> Result<Vec<Body>, FiberError> {
    let half = chunk.len() / 2;
    for body in &mut chunk[..half] {
        body.step(dt);
    }
    cx.yield_now().await;
    for body in &mut chunk[half..] {
        body.step(dt);
    }
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use engine_scheduler::SchedulerConfig;

    use super::*;

    fn config(chunk_size: usize, max_ticks: u64) -> TickConfig {
        TickConfig {
            tick_rate: 1000.0,
            max_ticks,
            chunk_size,
        }
    }

    #[test]
    fn test_tick_advances_counter_and_bodies() {
        let scheduler = Scheduler::new(SchedulerConfig::inline()).unwrap();
        let mut tick_loop = TickLoop::new(config(3, 0), spawn_bodies(10));
        let before = tick_loop.bodies().to_vec();

        tick_loop.tick(&scheduler, 0.5).unwrap();
        assert_eq!(tick_loop.tick_id(), 1);
        assert_eq!(tick_loop.bodies().len(), 10);
        for (old, new) in before.iter().zip(tick_loop.bodies()) {
            let mut expected = *old;
            expected.step(0.5);
            assert_eq!(*new, expected);
        }
        // 4 chunks, each resumed twice because of the yield.
        assert_eq!(scheduler.stats().completed, 4);
        assert_eq!(scheduler.stats().resumes, 8);
    }

    #[test]
    fn test_run_limited_ticks_on_workers() {
        let scheduler = Scheduler::new(SchedulerConfig::default().with_workers(2)).unwrap();
        let mut tick_loop = TickLoop::new(config(16, 5), spawn_bodies(100));
        tick_loop.run(&scheduler).unwrap();
        assert_eq!(tick_loop.tick_id(), 5);
        assert_eq!(tick_loop.bodies().len(), 100);
        scheduler.shutdown();
    }

    #[test]
    fn test_tick_after_shutdown_fails() {
        let scheduler = Scheduler::new(SchedulerConfig::inline()).unwrap();
        scheduler.shutdown();
        let mut tick_loop = TickLoop::new(config(4, 0), spawn_bodies(8));
        assert!(matches!(
            tick_loop.tick(&scheduler, 0.1),
            Err(FiberError::SchedulerClosed)
        ));
    }

    #[test]
    fn test_spawn_bodies_grid() {
        let bodies = spawn_bodies(9);
        assert_eq!(bodies[0].transform.position, Vec2::ZERO);
        assert_eq!(bodies[4].transform.position, Vec2::new(16.0, 16.0));
        assert_eq!(bodies[0].velocity, Vec2::ZERO);
    }
}
