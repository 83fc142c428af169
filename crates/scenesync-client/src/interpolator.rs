//! Smoothing of remote transform and color changes.
//!
//! Each object has at most one transform driver and one color driver. A
//! driver ticks on the frame interval and blends the rendered value from
//! where it was when the driver started to the target, finishing exactly on
//! the target. Starting a new driver for an object aborts the old one, so a
//! burst of remote updates always chases the latest target.

use std::time::Duration;

use scenesync_core::{KeyedTasks, ObjectId};
use scenesync_geometry::{Color, Transform};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::trace;

use crate::config::{ClientConfig, MIN_TICK};
use crate::scene::Scene;

#[derive(Debug)]
pub struct Interpolator {
    duration: Duration,
    frame: Duration,
    epsilon: f64,
    transforms: KeyedTasks<ObjectId>,
    colors: KeyedTasks<ObjectId>,
}

impl Interpolator {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            duration: config.interpolation_duration,
            frame: config.frame_interval.max(MIN_TICK),
            epsilon: config.position_epsilon,
            transforms: KeyedTasks::new(),
            colors: KeyedTasks::new(),
        }
    }

    /// Move the rendered object towards `target`.
    ///
    /// Small deltas (and a zero duration) snap immediately. Returns true if
    /// a driver was started.
    pub fn move_to(&mut self, scene: &Scene, id: ObjectId, target: Transform) -> bool {
        let Some(from) = scene.get(id).map(|o| o.transform) else {
            return false;
        };
        if from.approx_eq(&target, self.epsilon) || self.duration.is_zero() {
            self.transforms.cancel(&id);
            scene.update(id, |o| o.transform = target);
            return false;
        }

        let replaced = self.transforms.replace(
            id,
            drive(scene.clone(), id, self.duration, self.frame, move |o, t| {
                o.transform = from.lerp(&target, t);
            }),
        );
        trace!(%id, replaced, "transform interpolation started");
        true
    }

    /// Blend the rendered color towards `target`, independently of any
    /// running transform driver. Returns true if a driver was started.
    pub fn fade_to(&mut self, scene: &Scene, id: ObjectId, target: Color) -> bool {
        let Some(from) = scene.get(id).map(|o| o.color) else {
            return false;
        };
        if from == target || self.duration.is_zero() {
            self.colors.cancel(&id);
            scene.update(id, |o| o.color = target);
            return false;
        }

        self.colors.replace(
            id,
            drive(scene.clone(), id, self.duration, self.frame, move |o, t| {
                o.color = from.lerp(target, t);
            }),
        );
        true
    }

    /// Stop both drivers for `id`, leaving the rendered value where it is
    pub fn cancel(&mut self, id: ObjectId) {
        self.transforms.cancel(&id);
        self.colors.cancel(&id);
    }

    pub fn is_moving(&self, id: ObjectId) -> bool {
        self.transforms.is_active(&id)
    }

    pub fn is_fading(&self, id: ObjectId) -> bool {
        self.colors.is_active(&id)
    }

    /// Running transform drivers
    pub fn active_count(&mut self) -> usize {
        self.transforms.active_count()
    }

    pub fn cancel_all(&mut self) {
        self.transforms.cancel_all();
        self.colors.cancel_all();
    }
}

/// Tick `apply` with progress in (0, 1] until done or the object disappears
async fn drive<F>(scene: Scene, id: ObjectId, duration: Duration, frame: Duration, apply: F)
where
    F: Fn(&mut crate::scene::RenderedObject, f64) + Send + 'static,
{
    let start = Instant::now();
    let mut ticker = tokio::time::interval_at(start + frame, frame);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let t = (start.elapsed().as_secs_f64() / duration.as_secs_f64()).min(1.0);
        if !scene.update(id, |o| apply(o, t)) {
            return;
        }
        if t >= 1.0 {
            return;
        }
    }
}
