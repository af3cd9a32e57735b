//! The evaluation clock and the tick loop that drives a [`crate::graph::Graph`].
//!
//! Grounded on `hifitime::Epoch`/`Duration` exactly as the teacher uses
//! them (`peregrine/src/lib.rs` re-exports `Time`/`Duration` built on the
//! same crate), and on `original_source/.../runtime/evaluation_context.h`
//! for the clock/graph/current-node triad shape.

use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::node::{NodeId, ScheduledWake};
use hifitime::{Duration, Epoch};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, error, warn};

/// Engine time. An instant, not a duration; microsecond resolution per
/// spec §4.7 (`hifitime::Epoch` carries sub-nanosecond precision, of which
/// the engine only relies on microsecond-or-finer ordering).
pub type Time = Epoch;

/// The smallest representable forward step a node may request when
/// rescheduling itself, used to break self-reschedule-at-current-time
/// requests (see `node::Scheduler::wake_at`). `hifitime::Duration`
/// constructors aren't `const fn`, so these sentinels are functions rather
/// than associated constants.
pub fn min_td() -> Duration {
    Duration::from_microseconds(1.0)
}

/// The smallest delta the clock itself ever advances by when stepping
/// between two distinct wake times that would otherwise collide.
pub fn min_dt() -> Duration {
    Duration::from_microseconds(1.0)
}

/// The engine refuses to schedule anything further out than this from the
/// current time, per spec §4.7; a request beyond it is a fatal
/// `GraphError::Clock`.
pub fn max_dt() -> Duration {
    Duration::from_days(365.0 * 100.0)
}

/// A value pushed into the graph from outside the engine thread. The push
/// queue only ever carries already-encoded payloads (an output id plus its
/// new `Value`); decoding and validation happen on the engine thread when
/// the queue is drained.
pub struct PushInput {
    pub target: NodeId,
    pub value: crate::value::Value,
}

/// The single lock-taking structure in the core (spec §5: "the enqueue
/// side is the only lock-taking operation"). Producers on other threads
/// call `push`; the engine thread drains the whole queue at each tick
/// boundary via `drain`.
pub struct PushQueue {
    inner: Mutex<Vec<PushInput>>,
}

impl Default for PushQueue {
    fn default() -> Self {
        PushQueue { inner: Mutex::new(Vec::new()) }
    }
}

impl PushQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, input: PushInput) {
        self.inner.lock().unwrap().push(input);
    }

    pub fn drain(&self) -> Vec<PushInput> {
        std::mem::take(&mut *self.inner.lock().unwrap())
    }
}

/// How the engine advances time between ticks.
pub enum Clock {
    /// Advances directly to the next scheduled wake time; never blocks.
    /// Used for deterministic, replayable runs.
    Simulation,
    /// Blocks (sleeping the calling thread) until either the next
    /// scheduled wake time arrives or a push-input wakes the engine early,
    /// matching spec §4.7's real-time clock.
    RealTime { sleep: fn(Duration) },
}

impl Clock {
    pub fn simulation() -> Self {
        Clock::Simulation
    }

    pub fn real_time() -> Self {
        Clock::RealTime {
            sleep: |d| std::thread::sleep(std::time::Duration::from_secs_f64(d.to_seconds().max(0.0))),
        }
    }
}

/// Stop-on-first-error toggle and other run-wide knobs, part of the
/// ambient configuration surface (spec §6 trait bag plus this struct).
#[derive(Copy, Clone, Debug)]
pub struct EngineConfig {
    pub stop_on_first_error: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { stop_on_first_error: true }
    }
}

/// Drives a [`Graph`] through ticks until a stop condition is reached.
/// Single-threaded and cooperative: a tick runs every scheduled node to
/// completion before the engine suspends, per spec §5.
pub struct EvaluationEngine {
    pub clock: Clock,
    pub config: EngineConfig,
    heap: BinaryHeap<ScheduledWake>,
    push_queue: PushQueue,
    push_pending: AtomicBool,
    current_time: Time,
    stop_requested: bool,
}

impl EvaluationEngine {
    pub fn new(clock: Clock, config: EngineConfig, start_time: Time) -> Self {
        EvaluationEngine {
            clock,
            config,
            heap: BinaryHeap::new(),
            push_queue: PushQueue::new(),
            push_pending: AtomicBool::new(false),
            current_time: start_time,
            stop_requested: false,
        }
    }

    /// The current logical tick time, per spec §4.7.
    pub fn now(&self) -> Time {
        self.current_time
    }

    /// The spec-named alias for [`Self::now`].
    pub fn evaluation_time(&self) -> Time {
        self.current_time
    }

    /// The time of the next due wake, if anything is scheduled, per spec
    /// §4.7. `None` once the heap is drained (the run is idle).
    pub fn next_scheduled_evaluation_time(&self) -> Option<Time> {
        self.heap.peek().map(|w| w.time)
    }

    pub fn push_queue(&self) -> &PushQueue {
        &self.push_queue
    }

    /// Flags that a push producer has queued a value since the engine last
    /// checked, so `run`'s real-time idle loop wakes promptly on the next
    /// iteration instead of sleeping out its full poll interval. Takes
    /// `&self` (an `AtomicBool`, not `&mut`) so a producer thread holding
    /// only a shared reference — the same access level `push_queue` grants
    /// it — can call this after `PushQueue::push`.
    pub fn set_push_has_pending_values(&self) {
        self.push_pending.store(true, Ordering::Relaxed);
    }

    /// Cooperative stop: takes effect at the next tick boundary, never
    /// mid-tick, per spec §5.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn schedule(&mut self, wake: ScheduledWake) {
        if wake.time - self.current_time > max_dt() {
            warn!(node = ?wake.node, "wake request beyond MAX_DT dropped");
            return;
        }
        self.heap.push(wake);
    }

    /// Runs ticks until the heap is empty, a push-input-only real-time
    /// clock keeps the engine alive forever (run is then terminated by an
    /// explicit `request_stop`), or `request_stop` was called.
    pub fn run(&mut self, graph: &mut Graph) -> Result<()> {
        loop {
            if self.stop_requested {
                debug!("engine stop requested, ending run");
                return Ok(());
            }
            match self.step(graph)? {
                StepOutcome::Ticked => continue,
                StepOutcome::Idle => match &self.clock {
                    Clock::Simulation => return Ok(()),
                    Clock::RealTime { sleep } => {
                        if self.push_pending.swap(false, Ordering::Relaxed) {
                            continue;
                        }
                        sleep(Duration::from_milliseconds(1.0));
                        continue;
                    }
                },
            }
        }
    }

    /// Runs exactly one tick: drains pushed inputs, advances to the next
    /// wake time (blocking on `Clock::RealTime` if that time is in the
    /// future), then runs every node due at that instant in topological-
    /// rank order, folding in any observers a write wakes mid-tick, until
    /// the tick's worklist is exhausted.
    pub fn step(&mut self, graph: &mut Graph) -> Result<StepOutcome> {
        let pushed = self.push_queue.drain();
        for input in pushed {
            graph.apply_push_input(input, self.current_time)?;
        }
        let woken_by_push = crate::subscription::drain_pending_wakes();

        let next_time = match self.heap.peek().map(|w| w.time) {
            Some(t) => t,
            None if woken_by_push.is_empty() => return Ok(StepOutcome::Idle),
            None => self.current_time,
        };
        if next_time < self.current_time {
            return Err(GraphError::clock(format!(
                "scheduled wake {next_time:?} precedes current time {:?}",
                self.current_time
            )));
        }
        if let Clock::RealTime { sleep } = &self.clock {
            let delay = next_time - self.current_time;
            if delay > Duration::from_microseconds(0.0) {
                sleep(delay);
            }
        }
        self.current_time = next_time;

        let rank: HashMap<NodeId, usize> = graph.rank_order().iter().enumerate().map(|(i, n)| (*n, i)).collect();
        // Evaluation order follows the graph's topological rank, not raw
        // `NodeId` index, so an upstream node always runs before a
        // downstream one woken at the same instant (spec §4.7).
        let by_rank = |n: &NodeId| rank.get(n).copied().unwrap_or(usize::MAX);

        let mut due: Vec<NodeId> = woken_by_push;
        while let Some(top) = self.heap.peek() {
            if top.time != self.current_time {
                break;
            }
            due.push(self.heap.pop().unwrap().node);
        }
        due.sort_by_key(by_rank);
        due.dedup();

        // A write during eval schedules its observers via the pending-wake
        // queue (`subscription::queue_wake`); those observers join this
        // same tick's worklist — sorted back in by rank, so a chain of
        // direct dependents all settle before the tick ends — rather than
        // waiting for a future `step`, per spec §4.5's push-schedules-
        // downstream rule.
        let mut evaluated = std::collections::HashSet::new();
        let mut cursor = 0;
        while cursor < due.len() {
            let node_id = due[cursor];
            cursor += 1;
            if !evaluated.insert(node_id) {
                continue;
            }

            let outcome = graph.eval_node(node_id, self.current_time);
            if let Err(err) = outcome {
                error!(?err, "node eval failed");
                if self.config.stop_on_first_error {
                    return Err(err);
                }
            }
            if let Some(wake) = graph.take_reschedule(node_id) {
                self.schedule(wake);
            }

            let mut newly_woken: Vec<NodeId> = crate::subscription::drain_pending_wakes()
                .into_iter()
                .filter(|n| !evaluated.contains(n))
                .collect();
            if !newly_woken.is_empty() {
                due.truncate(cursor);
                due.append(&mut newly_woken);
                due.sort_by_key(by_rank);
                due.dedup();
            }
        }

        Ok(StepOutcome::Ticked)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum StepOutcome {
    Ticked,
    Idle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_queue_drain_empties_it() {
        let q = PushQueue::new();
        q.push(PushInput {
            target: NodeId { index: 0, generation: 0 },
            value: crate::value::Value::Unset,
        });
        assert_eq!(q.drain().len(), 1);
        assert_eq!(q.drain().len(), 0);
    }

    #[test]
    fn schedule_drops_requests_beyond_max_dt() {
        let start = Epoch::from_unix_seconds(0.0);
        let mut engine = EvaluationEngine::new(Clock::simulation(), EngineConfig::default(), start);
        engine.schedule(ScheduledWake {
            time: start + max_dt() + Duration::from_seconds(1.0),
            node: NodeId { index: 0, generation: 0 },
        });
        assert!(engine.heap.is_empty());
    }
}
