//! Turns heartbeat samples into discrete blocking episodes.
//!
//! ```text
//!            elapsed > threshold
//!   Idle ─────────────────────────► Blocked ──┐ no new heartbeat
//!    ▲                                │   ◄───┘ (no capture, no delivery)
//!    └────────────────────────────────┘
//!        heartbeat advanced past start
//! ```
//!
//! The classifier is pure: the monitor thread feeds it `(now, last_tick)`
//! pairs and acts on the returned [`Observation`].

use std::time::Duration;

use crate::stack::StackSnapshot;

/// One contiguous period without heartbeats longer than `threshold`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    /// Last heartbeat known to precede the stall.
    pub started_at: Duration,
    /// Monitor time at which the stall was confirmed.
    pub detected_at: Duration,
    pub stack: Option<StackSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEpisode {
    pub episode: Episode,
    /// The heartbeat that ended the stall.
    pub resolved_at: Duration,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Idle and within threshold.
    Steady,
    /// Idle -> Blocked; the caller should capture a stack now.
    Started { started_at: Duration, elapsed: Duration },
    /// Still blocked; nothing to do.
    Ongoing,
    /// Blocked -> Idle.
    Resolved(ResolvedEpisode),
}

#[derive(Debug)]
pub struct EpisodeClassifier {
    threshold: Duration,
    current: Option<Episode>,
}

impl EpisodeClassifier {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            current: None,
        }
    }

    pub fn observe(&mut self, now: Duration, last_tick: Duration) -> Observation {
        self.observe_with_first_tick(now, last_tick, None)
    }

    /// Like [`observe`](Self::observe), with the first heartbeat seen after
    /// the stall began. A resolved episode ends there rather than at
    /// `last_tick`, which may be several heartbeats later.
    pub fn observe_with_first_tick(
        &mut self,
        now: Duration,
        last_tick: Duration,
        first_tick: Option<Duration>,
    ) -> Observation {
        match self.current.take() {
            None => {
                let elapsed = now.saturating_sub(last_tick);
                if elapsed <= self.threshold {
                    return Observation::Steady;
                }
                let started_at = now - elapsed;
                self.current = Some(Episode {
                    started_at,
                    detected_at: now,
                    stack: None,
                });
                Observation::Started {
                    started_at,
                    elapsed,
                }
            }
            Some(episode) if last_tick > episode.started_at => {
                let resolved_at = first_tick
                    .filter(|tick| *tick > episode.started_at && *tick <= last_tick)
                    .unwrap_or(last_tick);
                let duration = resolved_at - episode.started_at;
                Observation::Resolved(ResolvedEpisode {
                    episode,
                    resolved_at,
                    duration,
                })
            }
            Some(episode) => {
                self.current = Some(episode);
                Observation::Ongoing
            }
        }
    }

    /// Stores the snapshot on the open episode. Only the first snapshot of an
    /// episode is kept.
    pub fn attach_stack(&mut self, stack: StackSnapshot) -> bool {
        match self.current.as_mut() {
            Some(episode) if episode.stack.is_none() => {
                episode.stack = Some(stack);
                true
            }
            _ => false,
        }
    }

    /// Drops the open episode, if any, without resolving it.
    pub fn reset(&mut self) -> Option<Episode> {
        self.current.take()
    }

    pub fn is_blocked(&self) -> bool {
        self.current.is_some()
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}
