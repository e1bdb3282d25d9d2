//! When to run the adapter again.
//!
//! ```text
//!  navigate ──> Quiet ──(quiet period)──> Priming ──(subscribed)──> Watching
//!                 ▲                          │  ▲ escalate / shorten    │ mutation
//!  teardown ──────┘                          └──┘                       ▼
//!                                      Watching <──(debounce, known>0)── Debounced
//!                                          ▲                             │ debounce, empty
//!                                          └──(not streaming: scan)── StreamingCheck
//! ```
//!
//! Confirm and poll timers run beside the phase. The state machine is pure:
//! callers pass `now` and execute the returned [`Wake`]s.

use chatnav_adapters::AdapterTiming;
use log::{debug, warn};
use serde::Serialize;
use tokio::time::{Duration, Instant};

use crate::config::SchedulerConfig;

/// Floor for adapter poll hints; a shorter period would starve the driver.
const MIN_POLL_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No active context
    #[default]
    Idle,
    /// Pause after a teardown
    Quiet,
    Priming,
    Watching,
    Debounced,
    StreamingCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanReason {
    Priming,
    Mutation,
    StreamingEnded,
    StreamingCapReached,
    Confirm,
    Poll,
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeAction {
    /// Subscribe to the container and scan. On the last attempt the
    /// document root is subscribed when the container is still missing.
    Prime { attempt: u32, last: bool },
    /// Ask the adapter whether a response is still streaming.
    CheckStreaming { check: u32 },
    Scan(ScanReason),
}

/// Work the driver must do now, stamped with the context it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wake {
    pub generation: u64,
    pub action: WakeAction,
}

#[derive(Debug)]
pub struct SyncScheduler {
    config: SchedulerConfig,
    timing: AdapterTiming,
    generation: u64,
    phase: Phase,
    phase_deadline: Option<Instant>,
    immediate: Option<ScanReason>,
    priming_attempt: u32,
    priming_delay: Duration,
    streaming_checks: u32,
    confirm_at: Option<Instant>,
    next_poll_at: Option<Instant>,
    known_messages: usize,
}

impl SyncScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let timing = AdapterTiming::default();
        Self {
            config,
            timing,
            generation: 0,
            phase: Phase::Idle,
            phase_deadline: None,
            immediate: None,
            priming_attempt: 0,
            priming_delay: timing.priming.initial_delay,
            streaming_checks: 0,
            confirm_at: None,
            next_poll_at: None,
            known_messages: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn timing(&self) -> &AdapterTiming {
        &self.timing
    }

    /// Starts scheduling for a new context. After a teardown the quiet
    /// period runs first.
    pub fn begin(&mut self, generation: u64, timing: AdapterTiming, now: Instant, after_teardown: bool) {
        self.teardown();
        self.generation = generation;
        self.timing = clamp_poll(timing, generation);
        if after_teardown {
            self.phase = Phase::Quiet;
            self.phase_deadline = Some(now + self.config.quiet_period());
        } else {
            self.start_priming(now);
        }
    }

    /// Cancels every timer. Nothing fires until the next `begin`.
    pub fn teardown(&mut self) {
        self.phase = Phase::Idle;
        self.phase_deadline = None;
        self.immediate = None;
        self.priming_attempt = 0;
        self.priming_delay = self.timing.priming.initial_delay;
        self.streaming_checks = 0;
        self.confirm_at = None;
        self.next_poll_at = None;
        self.known_messages = 0;
    }

    /// The subscription went away; find the container again.
    pub fn restart_priming(&mut self, now: Instant) {
        if matches!(self.phase, Phase::Idle | Phase::Quiet | Phase::Priming) {
            return;
        }
        debug!("generation {}: restarting priming", self.generation);
        self.start_priming(now);
    }

    fn start_priming(&mut self, now: Instant) {
        self.phase = Phase::Priming;
        self.priming_attempt = 0;
        self.priming_delay = self.timing.priming.initial_delay;
        self.phase_deadline = Some(now);
    }

    fn enter_watching(&mut self, now: Instant) {
        self.phase = Phase::Watching;
        self.phase_deadline = None;
        if let Some(period) = self.timing.fallback_poll {
            self.next_poll_at.get_or_insert(now + period);
        }
    }

    /// A qualifying host mutation. Returns whether it (re)armed the
    /// debounce window.
    pub fn on_mutation(&mut self, now: Instant) -> bool {
        match self.phase {
            Phase::Watching | Phase::Debounced => {
                self.phase = Phase::Debounced;
                self.phase_deadline = Some(now + self.timing.debounce);
                true
            }
            _ => false,
        }
    }

    /// Requests a scan right away. A pending debounce window or streaming
    /// wait is abandoned. Ignored until the quiet period is over.
    pub fn force_scan(&mut self) -> bool {
        match self.phase {
            Phase::Idle | Phase::Quiet => false,
            Phase::Debounced | Phase::StreamingCheck => {
                self.phase = Phase::Watching;
                self.phase_deadline = None;
                self.immediate = Some(ScanReason::Forced);
                true
            }
            _ => {
                self.immediate = Some(ScanReason::Forced);
                true
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        if self.phase == Phase::Idle {
            return None;
        }
        if self.immediate.is_some() {
            return Some(Instant::now());
        }
        [self.phase_deadline, self.confirm_at, self.next_poll_at]
            .into_iter()
            .flatten()
            .min()
    }

    /// Next piece of work due at `now`. Call repeatedly until `None`.
    pub fn take_due(&mut self, now: Instant) -> Option<Wake> {
        if self.phase == Phase::Idle {
            return None;
        }
        if let Some(reason) = self.immediate.take() {
            return Some(self.wake(WakeAction::Scan(reason)));
        }
        if self.phase_deadline.is_some_and(|deadline| deadline <= now) {
            self.phase_deadline = None;
            match self.phase {
                Phase::Quiet => {
                    self.start_priming(now);
                    self.phase_deadline = None;
                    return Some(self.prime_wake());
                }
                Phase::Priming => return Some(self.prime_wake()),
                Phase::Debounced if self.known_messages == 0 => {
                    self.phase = Phase::StreamingCheck;
                    self.streaming_checks = 0;
                    return Some(self.wake(WakeAction::CheckStreaming { check: 1 }));
                }
                Phase::Debounced => {
                    self.phase = Phase::Watching;
                    return Some(self.wake(WakeAction::Scan(ScanReason::Mutation)));
                }
                Phase::StreamingCheck => {
                    let check = self.streaming_checks + 1;
                    return Some(self.wake(WakeAction::CheckStreaming { check }));
                }
                Phase::Idle | Phase::Watching => {}
            }
        }
        if self.confirm_at.is_some_and(|at| at <= now) {
            self.confirm_at = None;
            return Some(self.wake(WakeAction::Scan(ScanReason::Confirm)));
        }
        if let Some(at) = self.next_poll_at.filter(|at| *at <= now) {
            let period = self.timing.fallback_poll.unwrap_or(Duration::from_secs(1));
            self.next_poll_at = Some(at.max(now) + period);
            if self.phase != Phase::StreamingCheck {
                return Some(self.wake(WakeAction::Scan(ScanReason::Poll)));
            }
        }
        None
    }

    /// Result of a priming attempt: whether a subscription now exists and
    /// how many messages the sequence holds.
    pub fn primed(&mut self, now: Instant, subscribed: bool, total_messages: usize) {
        if self.phase != Phase::Priming {
            return;
        }
        self.known_messages = total_messages;
        if subscribed {
            self.enter_watching(now);
            return;
        }
        self.priming_attempt += 1;
        if self.priming_attempt >= self.timing.priming.attempts {
            self.enter_watching(now);
            return;
        }
        self.priming_delay = if total_messages == 0 {
            self.timing.priming.escalate(self.priming_delay)
        } else {
            self.timing.priming.initial_delay
        };
        self.phase_deadline = Some(now + self.priming_delay);
    }

    /// Result of a streaming check.
    pub fn streaming_checked(&mut self, now: Instant, streaming: bool) {
        if self.phase != Phase::StreamingCheck {
            return;
        }
        self.streaming_checks += 1;
        if !streaming {
            self.phase = Phase::Watching;
            self.immediate = Some(ScanReason::StreamingEnded);
        } else if self.streaming_checks >= self.config.max_streaming_checks {
            warn!(
                "generation {}: still streaming after {} checks, scanning anyway",
                self.generation, self.streaming_checks
            );
            self.phase = Phase::Watching;
            self.immediate = Some(ScanReason::StreamingCapReached);
        } else {
            self.phase_deadline = Some(now + self.timing.streaming_wait);
        }
    }

    /// Result of a detection pass.
    pub fn scanned(&mut self, now: Instant, reason: ScanReason, total_messages: usize, accepted: usize) {
        self.known_messages = total_messages;
        if reason == ScanReason::StreamingEnded && accepted > 0 {
            self.confirm_at = Some(now + self.timing.streaming_wait);
        }
    }

    fn prime_wake(&self) -> Wake {
        let last = self.priming_attempt + 1 >= self.timing.priming.attempts;
        self.wake(WakeAction::Prime {
            attempt: self.priming_attempt,
            last,
        })
    }

    fn wake(&self, action: WakeAction) -> Wake {
        Wake {
            generation: self.generation,
            action,
        }
    }
}

fn clamp_poll(mut timing: AdapterTiming, generation: u64) -> AdapterTiming {
    if let Some(period) = timing.fallback_poll {
        let floor = timing.debounce.max(MIN_POLL_PERIOD);
        if period < floor {
            warn!("generation {generation}: poll period {period:?} raised to {floor:?}");
            timing.fallback_poll = Some(floor);
        }
    }
    timing
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MS: Duration = Duration::from_millis(1);

    fn scheduler() -> SyncScheduler {
        SyncScheduler::new(SchedulerConfig::default())
    }

    fn action(s: &mut SyncScheduler, now: Instant) -> Option<WakeAction> {
        s.take_due(now).map(|w| w.action)
    }

    #[test]
    fn priming_escalates_until_messages_appear() {
        let t0 = Instant::now();
        let mut s = scheduler();
        s.begin(1, AdapterTiming::default(), t0, false);
        assert_eq!(action(&mut s, t0), Some(WakeAction::Prime { attempt: 0, last: false }));
        assert_eq!(action(&mut s, t0), None);

        s.primed(t0, false, 0);
        assert_eq!(s.next_deadline(), Some(t0 + 375 * MS));
        assert_eq!(action(&mut s, t0 + 300 * MS), None);
        assert_eq!(
            action(&mut s, t0 + 375 * MS),
            Some(WakeAction::Prime { attempt: 1, last: false })
        );

        let t1 = t0 + 375 * MS;
        s.primed(t1, false, 2);
        assert_eq!(s.next_deadline(), Some(t1 + 250 * MS));

        s.take_due(t1 + 250 * MS);
        s.primed(t1 + 250 * MS, true, 2);
        assert_eq!(s.phase(), Phase::Watching);
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn last_priming_attempt_is_flagged() {
        let t0 = Instant::now();
        let mut s = scheduler();
        let timing = AdapterTiming::default();
        s.begin(1, timing, t0, false);
        let mut now = t0;
        let mut last_seen = None;
        for _ in 0..timing.priming.attempts {
            let wake = s.take_due(now).expect("prime");
            last_seen = Some(wake.action);
            s.primed(now, false, 0);
            now = s.next_deadline().unwrap_or(now);
        }
        assert_eq!(
            last_seen,
            Some(WakeAction::Prime {
                attempt: timing.priming.attempts - 1,
                last: true
            })
        );
        assert_eq!(s.phase(), Phase::Watching);
    }

    #[test]
    fn debounce_is_trailing_edge() {
        let t0 = Instant::now();
        let mut s = scheduler();
        s.begin(3, AdapterTiming::default(), t0, false);
        s.take_due(t0);
        s.primed(t0, true, 1);

        assert!(s.on_mutation(t0));
        assert!(s.on_mutation(t0 + 200 * MS));
        assert_eq!(action(&mut s, t0 + 300 * MS), None);
        let wake = s.take_due(t0 + 500 * MS).expect("scan");
        assert_eq!(wake.generation, 3);
        assert_eq!(wake.action, WakeAction::Scan(ScanReason::Mutation));
        assert_eq!(s.phase(), Phase::Watching);
    }

    #[test]
    fn empty_sequence_waits_for_streaming_to_end() {
        let t0 = Instant::now();
        let mut s = scheduler();
        s.begin(1, AdapterTiming::default(), t0, false);
        s.take_due(t0);
        s.primed(t0, true, 0);

        s.on_mutation(t0);
        let mut now = t0 + 300 * MS;
        assert_eq!(action(&mut s, now), Some(WakeAction::CheckStreaming { check: 1 }));
        for check in 2..=4 {
            s.streaming_checked(now, true);
            assert_eq!(action(&mut s, now + 1999 * MS), None);
            now += 2000 * MS;
            assert_eq!(action(&mut s, now), Some(WakeAction::CheckStreaming { check }));
        }
        s.streaming_checked(now, false);
        assert_eq!(
            action(&mut s, now),
            Some(WakeAction::Scan(ScanReason::StreamingEnded))
        );
        s.scanned(now, ScanReason::StreamingEnded, 2, 2);
        assert_eq!(action(&mut s, now + 1000 * MS), None);
        assert_eq!(
            action(&mut s, now + 2000 * MS),
            Some(WakeAction::Scan(ScanReason::Confirm))
        );
        assert_eq!(action(&mut s, now + 9000 * MS), None);
    }

    #[test]
    fn streaming_cap_forces_a_scan() {
        let t0 = Instant::now();
        let mut s = SyncScheduler::new(SchedulerConfig {
            max_streaming_checks: 2,
            ..SchedulerConfig::default()
        });
        s.begin(1, AdapterTiming::default(), t0, false);
        s.take_due(t0);
        s.primed(t0, true, 0);
        s.on_mutation(t0);
        let now = t0 + 300 * MS;
        s.take_due(now);
        s.streaming_checked(now, true);
        s.take_due(now + 2000 * MS);
        s.streaming_checked(now + 2000 * MS, true);
        assert_eq!(
            action(&mut s, now + 2000 * MS),
            Some(WakeAction::Scan(ScanReason::StreamingCapReached))
        );
    }

    #[test]
    fn teardown_cancels_everything_and_quiet_period_follows() {
        let t0 = Instant::now();
        let mut s = scheduler();
        let timing = AdapterTiming {
            fallback_poll: Some(Duration::from_secs(3)),
            ..AdapterTiming::default()
        };
        s.begin(1, timing, t0, false);
        s.take_due(t0);
        s.primed(t0, true, 1);
        s.on_mutation(t0);
        s.teardown();
        assert_eq!(s.next_deadline(), None);
        assert_eq!(action(&mut s, t0 + 10_000 * MS), None);
        assert!(!s.force_scan());

        s.begin(2, timing, t0, true);
        assert_eq!(s.phase(), Phase::Quiet);
        assert_eq!(action(&mut s, t0 + 499 * MS), None);
        let wake = s.take_due(t0 + 500 * MS).expect("prime");
        assert_eq!(wake.generation, 2);
        assert_eq!(wake.action, WakeAction::Prime { attempt: 0, last: false });
    }

    #[test]
    fn fallback_poll_repeats_while_watching() {
        let t0 = Instant::now();
        let mut s = scheduler();
        let timing = AdapterTiming {
            fallback_poll: Some(Duration::from_secs(3)),
            ..AdapterTiming::default()
        };
        s.begin(1, timing, t0, false);
        s.take_due(t0);
        s.primed(t0, true, 1);
        assert_eq!(s.next_deadline(), Some(t0 + 3000 * MS));
        assert_eq!(
            action(&mut s, t0 + 3000 * MS),
            Some(WakeAction::Scan(ScanReason::Poll))
        );
        assert_eq!(s.next_deadline(), Some(t0 + 6000 * MS));
    }

    #[test]
    fn zero_poll_period_yields_one_wake_per_instant() {
        let t0 = Instant::now();
        let mut s = scheduler();
        let timing = AdapterTiming {
            fallback_poll: Some(Duration::ZERO),
            ..AdapterTiming::default()
        };
        s.begin(1, timing, t0, false);
        s.take_due(t0);
        s.primed(t0, true, 1);

        let mut wakes = 0;
        while s.take_due(t0 + timing.debounce).is_some() {
            wakes += 1;
            assert!(wakes < 10, "poll wakes never stop");
        }
        assert_eq!(wakes, 1);
        assert_eq!(s.next_deadline(), Some(t0 + 2 * timing.debounce));
    }

    #[test]
    fn forced_scan_waits_for_quiet_period() {
        let t0 = Instant::now();
        let mut s = scheduler();
        s.begin(2, AdapterTiming::default(), t0, true);
        assert!(!s.force_scan());
        assert_eq!(action(&mut s, t0 + 10 * MS), None);

        s.restart_priming(t0 + 10 * MS);
        assert_eq!(s.phase(), Phase::Quiet);
        assert_eq!(
            action(&mut s, t0 + 500 * MS),
            Some(WakeAction::Prime { attempt: 0, last: false })
        );
    }

    #[test]
    fn forced_scan_abandons_streaming_wait() {
        let t0 = Instant::now();
        let mut s = scheduler();
        s.begin(1, AdapterTiming::default(), t0, false);
        s.take_due(t0);
        s.primed(t0, true, 0);
        s.on_mutation(t0);
        s.take_due(t0 + 300 * MS);
        s.streaming_checked(t0 + 300 * MS, true);
        assert!(s.force_scan());
        assert_eq!(s.phase(), Phase::Watching);
        assert_eq!(
            action(&mut s, t0 + 301 * MS),
            Some(WakeAction::Scan(ScanReason::Forced))
        );
        assert_eq!(action(&mut s, t0 + 5000 * MS), None);
    }
}
