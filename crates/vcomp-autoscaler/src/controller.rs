//! Scaling decisions with cooldowns.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use vcomp_models::SharedClock;
use vcomp_queue::WorkQueue;

use crate::config::AutoscalerConfig;
use crate::error::AutoscalerResult;
use crate::fleet::Fleet;
use crate::metrics;
use crate::policy::target_size;

/// Inputs to one scaling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Outstanding tasks, queued plus in flight
    pub depth: u64,
    pub current: u32,
    pub busy: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    AtTarget,
    Cooldown,
    /// Scale-in would cut into workers that hold tasks
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    Hold { target: u32, reason: HoldReason },
    ScaleOut { from: u32, to: u32 },
    ScaleIn { from: u32, to: u32 },
}

impl ScaleDecision {
    pub fn direction(&self) -> &'static str {
        match self {
            ScaleDecision::Hold { .. } => "hold",
            ScaleDecision::ScaleOut { .. } => "out",
            ScaleDecision::ScaleIn { .. } => "in",
        }
    }
}

pub struct Autoscaler {
    config: AutoscalerConfig,
    queue: Arc<dyn WorkQueue>,
    fleet: Arc<dyn Fleet>,
    clock: SharedClock,
    last_scale: Mutex<Option<DateTime<Utc>>>,
}

impl Autoscaler {
    pub fn new(config: AutoscalerConfig, queue: Arc<dyn WorkQueue>, fleet: Arc<dyn Fleet>, clock: SharedClock) -> Self {
        Self {
            config,
            queue,
            fleet,
            clock,
            last_scale: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AutoscalerConfig {
        &self.config
    }

    /// Decide what to do for `observation`, given when the fleet last changed.
    ///
    /// Scale-out waits `scale_out_cooldown` after the last scale event;
    /// scale-in waits the longer `scale_in_cooldown` and never drops to or
    /// below the number of busy workers.
    pub fn decide(
        &self,
        observation: Observation,
        last_scale: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> ScaleDecision {
        let target = target_size(&self.config, observation.depth);
        let cooled = |cooldown: std::time::Duration| match last_scale {
            None => true,
            Some(at) => (now - at).to_std().map(|elapsed| elapsed >= cooldown).unwrap_or(false),
        };

        if target > observation.current {
            if cooled(self.config.scale_out_cooldown) {
                ScaleDecision::ScaleOut {
                    from: observation.current,
                    to: target,
                }
            } else {
                ScaleDecision::Hold {
                    target,
                    reason: HoldReason::Cooldown,
                }
            }
        } else if target < observation.current {
            if observation.busy >= target {
                ScaleDecision::Hold {
                    target,
                    reason: HoldReason::Busy,
                }
            } else if cooled(self.config.scale_in_cooldown) {
                ScaleDecision::ScaleIn {
                    from: observation.current,
                    to: target,
                }
            } else {
                ScaleDecision::Hold {
                    target,
                    reason: HoldReason::Cooldown,
                }
            }
        } else {
            ScaleDecision::Hold {
                target,
                reason: HoldReason::AtTarget,
            }
        }
    }

    /// Observe queue and fleet, then apply at most one scale change.
    pub async fn tick(&self) -> AutoscalerResult<ScaleDecision> {
        let depth = self.queue.depth().await?;
        let status = self.fleet.status().await?;

        let in_flight = u32::try_from(depth.in_flight).unwrap_or(u32::MAX);
        let observation = Observation {
            depth: depth.total(),
            current: status.current,
            busy: status.busy.max(in_flight),
        };

        let now = self.clock.now();
        let mut last_scale = self.last_scale.lock().await;
        let decision = self.decide(observation, *last_scale, now);

        match decision {
            ScaleDecision::ScaleOut { from, to } | ScaleDecision::ScaleIn { from, to } => {
                self.fleet.scale_to(to).await?;
                *last_scale = Some(now);
                info!(
                    direction = decision.direction(),
                    from,
                    to,
                    depth = observation.depth,
                    busy = observation.busy,
                    "Fleet scaled"
                );
                metrics::record_scale_event(decision.direction());
                metrics::record_fleet(observation.depth, to, to);
            }
            ScaleDecision::Hold { target, reason } => {
                debug!(?reason, target, current = observation.current, depth = observation.depth, "Holding fleet size");
                metrics::record_fleet(observation.depth, status.current, target);
            }
        }

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::TimeZone;
    use mockall::predicate::eq;
    use vcomp_models::{ArtifactRef, JobId, ManualClock, Stage1Result, WorkerTask};
    use vcomp_queue::{MemoryWorkQueue, QueueMessage};

    use crate::error::AutoscalerError;
    use crate::fleet::{FleetStatus, MockFleet};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    fn observe(depth: u64, current: u32, busy: u32) -> Observation {
        Observation { depth, current, busy }
    }

    fn autoscaler_with(fleet: MockFleet, queue: Arc<MemoryWorkQueue>, clock: &ManualClock) -> Autoscaler {
        Autoscaler::new(AutoscalerConfig::default(), queue, Arc::new(fleet), Arc::new(clock.clone()))
    }

    fn idle_autoscaler() -> Autoscaler {
        let clock = ManualClock::new(start());
        let queue = Arc::new(MemoryWorkQueue::new(Arc::new(clock.clone()), Duration::from_secs(60)));
        autoscaler_with(MockFleet::new(), queue, &clock)
    }

    async fn enqueue(queue: &MemoryWorkQueue, n: usize) {
        for i in 0..n {
            let task = WorkerTask {
                job_id: JobId::from_string(format!("job-{}", i)),
                base_clip: Stage1Result {
                    artifact_ref: ArtifactRef::new(format!("jobs/job-{}/stage1.mp4", i)),
                    duration: 10.0,
                },
                overlays: vec![],
            };
            queue.enqueue(&QueueMessage::Composite(task)).await.unwrap();
        }
    }

    #[test]
    fn test_proportional_scale_out_from_warm_pool() {
        let autoscaler = idle_autoscaler();
        let now = start();

        assert_eq!(
            autoscaler.decide(observe(0, 0, 0), None, now),
            ScaleDecision::ScaleOut { from: 0, to: 2 }
        );
        assert_eq!(
            autoscaler.decide(observe(7, 2, 2), None, now),
            ScaleDecision::ScaleOut { from: 2, to: 7 }
        );
        assert_eq!(
            autoscaler.decide(observe(60, 10, 10), None, now),
            ScaleDecision::ScaleOut { from: 10, to: 30 }
        );
    }

    #[test]
    fn test_scale_out_cooldown() {
        let autoscaler = idle_autoscaler();
        let last = start();

        let early = last + chrono::Duration::seconds(29);
        assert_eq!(
            autoscaler.decide(observe(9, 5, 5), Some(last), early),
            ScaleDecision::Hold {
                target: 9,
                reason: HoldReason::Cooldown
            }
        );

        let later = last + chrono::Duration::seconds(30);
        assert_eq!(
            autoscaler.decide(observe(9, 5, 5), Some(last), later),
            ScaleDecision::ScaleOut { from: 5, to: 9 }
        );
    }

    #[test]
    fn test_scale_in_waits_longer_cooldown() {
        let autoscaler = idle_autoscaler();
        let last = start();

        // Past the scale-out cooldown but not the scale-in one
        let at_60s = last + chrono::Duration::seconds(60);
        assert_eq!(
            autoscaler.decide(observe(0, 12, 0), Some(last), at_60s),
            ScaleDecision::Hold {
                target: 2,
                reason: HoldReason::Cooldown
            }
        );

        let at_150s = last + chrono::Duration::seconds(150);
        assert_eq!(
            autoscaler.decide(observe(0, 12, 0), Some(last), at_150s),
            ScaleDecision::ScaleIn { from: 12, to: 2 }
        );
    }

    #[test]
    fn test_no_scale_in_while_busy() {
        let autoscaler = idle_autoscaler();

        assert_eq!(
            autoscaler.decide(observe(4, 12, 4), None, start()),
            ScaleDecision::Hold {
                target: 4,
                reason: HoldReason::Busy
            }
        );
        assert_eq!(
            autoscaler.decide(observe(4, 12, 3), None, start()),
            ScaleDecision::ScaleIn { from: 12, to: 4 }
        );
    }

    #[test]
    fn test_step_band_holds_at_high_load() {
        let autoscaler = idle_autoscaler();

        assert_eq!(
            autoscaler.decide(observe(60, 30, 30), None, start()),
            ScaleDecision::Hold {
                target: 30,
                reason: HoldReason::AtTarget
            }
        );
        assert_eq!(
            autoscaler.decide(observe(55, 30, 30), None, start()),
            ScaleDecision::Hold {
                target: 30,
                reason: HoldReason::AtTarget
            }
        );
    }

    #[tokio::test]
    async fn test_tick_scales_fleet_then_respects_cooldown() {
        let clock = ManualClock::new(start());
        let queue = Arc::new(MemoryWorkQueue::new(Arc::new(clock.clone()), Duration::from_secs(60)));
        enqueue(&queue, 6).await;

        let mut fleet = MockFleet::new();
        fleet
            .expect_status()
            .returning(|| Ok(FleetStatus { current: 2, busy: 0 }));
        fleet.expect_scale_to().with(eq(6)).times(1).returning(|_| Ok(()));
        fleet.expect_scale_to().with(eq(8)).times(1).returning(|_| Ok(()));

        let autoscaler = autoscaler_with(fleet, queue.clone(), &clock);

        assert_eq!(autoscaler.tick().await.unwrap(), ScaleDecision::ScaleOut { from: 2, to: 6 });

        enqueue(&queue, 8).await;
        clock.advance(Duration::from_secs(10));
        assert!(matches!(
            autoscaler.tick().await.unwrap(),
            ScaleDecision::Hold {
                reason: HoldReason::Cooldown,
                ..
            }
        ));

        clock.advance(Duration::from_secs(20));
        assert_eq!(autoscaler.tick().await.unwrap(), ScaleDecision::ScaleOut { from: 2, to: 8 });
    }

    #[tokio::test]
    async fn test_failed_scale_does_not_start_cooldown() {
        let clock = ManualClock::new(start());
        let queue = Arc::new(MemoryWorkQueue::new(Arc::new(clock.clone()), Duration::from_secs(60)));

        let mut fleet = MockFleet::new();
        fleet
            .expect_status()
            .returning(|| Ok(FleetStatus { current: 0, busy: 0 }));
        let mut calls = 0;
        fleet.expect_scale_to().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(AutoscalerError::FleetApi {
                    status: 503,
                    message: "busy".to_string(),
                })
            } else {
                Ok(())
            }
        });

        let autoscaler = autoscaler_with(fleet, queue, &clock);

        assert!(autoscaler.tick().await.is_err());
        assert_eq!(autoscaler.tick().await.unwrap(), ScaleDecision::ScaleOut { from: 0, to: 2 });
    }
}
