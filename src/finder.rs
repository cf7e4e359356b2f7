//! The sample / resolve / scroll loop that looks for the reply target on a
//! scrolling page.

use std::fmt;
use std::time::Duration;

use crate::bridge::DeviceBridge;
use crate::config::{Config, ConvergenceConfig, SwipeConfig};
use crate::convergence::{Action, ConvergenceDetector};
use crate::llm::SuitabilityPredicate;
use crate::resolver::{Resolution, TargetResolver};
use crate::snapshot::{Sampler, Snapshot};

#[derive(Debug, Clone, Copy)]
pub struct FinderSettings {
    /// Upper bound on sampling cycles.
    pub max_cycles: u32,
    pub convergence: ConvergenceConfig,
    pub swipe: SwipeConfig,
    /// Pause after each swipe so the page can settle.
    pub settle: Duration,
}

impl FinderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_cycles: config.max_scrolls,
            convergence: config.convergence,
            swipe: config.swipe,
            settle: Duration::from_millis(config.settle_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    /// Every allowed cycle was used.
    Exhausted,
    /// The page stopped changing.
    Converged,
    /// The device could not be sampled.
    SamplingFailed,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NotFoundReason::Exhausted => "scroll budget exhausted",
            NotFoundReason::Converged => "end of page",
            NotFoundReason::SamplingFailed => "sampling failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FindOutcome {
    Found { resolution: Resolution, cycles: u32 },
    NotFound { reason: NotFoundReason, cycles: u32 },
}

impl FindOutcome {
    pub fn cycles(&self) -> u32 {
        match self {
            FindOutcome::Found { cycles, .. } | FindOutcome::NotFound { cycles, .. } => *cycles,
        }
    }
}

enum Phase {
    Sampling,
    Resolving(Snapshot),
    Scrolling,
    Done(FindOutcome),
}

/// Scroll through the page until `resolver` accepts a target for `message`,
/// the page converges, sampling fails, or `max_cycles` samples were taken.
pub async fn find_target(
    sampler: &dyn Sampler,
    bridge: &dyn DeviceBridge,
    resolver: &TargetResolver,
    predicate: &dyn SuitabilityPredicate,
    message: &str,
    settings: &FinderSettings,
) -> FindOutcome {
    let mut detector = ConvergenceDetector::new(settings.convergence);
    let mut cycles = 0;
    let mut phase = Phase::Sampling;

    loop {
        phase = match phase {
            Phase::Sampling if cycles >= settings.max_cycles => Phase::Done(FindOutcome::NotFound {
                reason: NotFoundReason::Exhausted,
                cycles,
            }),
            Phase::Sampling => {
                cycles += 1;
                tracing::debug!("sampling cycle {cycles}/{}", settings.max_cycles);
                match sampler.sample().await {
                    Ok(snapshot) => match detector.update(&snapshot.fingerprint) {
                        Action::Continue => Phase::Resolving(snapshot),
                        Action::Scroll => Phase::Scrolling,
                        Action::Stop => Phase::Done(FindOutcome::NotFound {
                            reason: NotFoundReason::Converged,
                            cycles,
                        }),
                    },
                    Err(e) => {
                        tracing::warn!("sampling failed: {e:#}");
                        detector.sampling_failed();
                        Phase::Done(FindOutcome::NotFound {
                            reason: NotFoundReason::SamplingFailed,
                            cycles,
                        })
                    }
                }
            }
            Phase::Resolving(snapshot) => {
                match resolver.resolve(&snapshot, predicate, message).await {
                    Some(resolution) => Phase::Done(FindOutcome::Found { resolution, cycles }),
                    None => Phase::Scrolling,
                }
            }
            // The last cycle's swipe would never be looked at.
            Phase::Scrolling if cycles >= settings.max_cycles => Phase::Sampling,
            Phase::Scrolling => {
                if let Err(e) = bridge.swipe(&settings.swipe).await {
                    tracing::warn!("swipe failed: {e}");
                }
                detector.record_scroll();
                tokio::time::sleep(settings.settle).await;
                Phase::Sampling
            }
            Phase::Done(outcome) => {
                let cycles = outcome.cycles();
                match &outcome {
                    FindOutcome::Found { resolution, .. } => tracing::info!(
                        "target found at {} after {cycles} cycle(s)",
                        resolution.point
                    ),
                    FindOutcome::NotFound { reason, .. } => {
                        tracing::info!("target not found after {cycles} cycle(s): {reason}")
                    }
                }
                return outcome;
            }
        };
    }
}
