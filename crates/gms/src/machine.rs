//! Round state machine: the phase clock driving every round.
//!
//! One scheduling task walks the fixed timeline
//! ROUND_STARTED → BETTING → DRAWING → RESULT → ROUND_ENDED and emits a
//! lifecycle event at each transition. Events are dispatched through a
//! bounded worker pool with panic isolation, so one faulty subscriber can
//! neither stall nor kill the clock.

use crate::domain::Round;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use metrics::counter;
use protocol::{Color, GameState};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Number of dispatch workers.
const DISPATCH_WORKERS: usize = 5;

/// Depth of the dispatch queue before falling back to ephemeral tasks.
const DISPATCH_QUEUE_DEPTH: usize = 128;

/// Phase durations for one round.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Pause between round start and the betting window.
    pub wait: Duration,
    pub betting: Duration,
    pub drawing: Duration,
    pub result: Duration,
    /// Rest after ROUND_ENDED before the next round.
    pub rest: Duration,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(2),
            betting: Duration::from_secs(10),
            drawing: Duration::from_secs(2),
            result: Duration::from_secs(5),
            rest: Duration::from_secs(3),
        }
    }
}

/// A lifecycle event emitted at each phase transition.
#[derive(Debug, Clone)]
pub struct RoundEvent {
    pub state: GameState,
    /// Empty for the terminal STOPPED event.
    pub round_id: String,
    /// Drawn color, present from DRAWING onward.
    pub result: Option<Color>,
    /// Seconds remaining in the phase just entered.
    pub left_time: i64,
    /// Epoch seconds of the betting window end, 0 before it is known.
    pub betting_end_timestamp: i64,
}

/// Subscriber to round lifecycle events.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn on_round_event(&self, event: RoundEvent);
}

type DispatchJob = (Arc<dyn EventSubscriber>, RoundEvent);

/// Bounded dispatch pool. Full queue falls back to an ephemeral task so
/// delivery is never dropped.
struct DispatchPool {
    tx: mpsc::Sender<DispatchJob>,
}

impl DispatchPool {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel::<DispatchJob>(DISPATCH_QUEUE_DEPTH);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for _ in 0..DISPATCH_WORKERS {
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some((subscriber, event)) => {
                            Self::run_isolated(subscriber, event).await;
                        }
                        None => break,
                    }
                }
            });
        }
        Self { tx }
    }

    fn submit(&self, job: DispatchJob) {
        if let Err(mpsc::error::TrySendError::Full((subscriber, event))) = self.tx.try_send(job) {
            warn!("event dispatch queue full, spawning ephemeral task");
            counter!("gms_dispatch_overflow_total").increment(1);
            tokio::spawn(Self::run_isolated(subscriber, event));
        }
    }

    async fn run_isolated(subscriber: Arc<dyn EventSubscriber>, event: RoundEvent) {
        let state = event.state;
        let outcome = AssertUnwindSafe(subscriber.on_round_event(event))
            .catch_unwind()
            .await;
        if outcome.is_err() {
            counter!("gms_subscriber_panics_total").increment(1);
            error!(state = %state, "event subscriber panicked, absorbed");
        }
    }
}

/// Read-only snapshot of the machine's current round.
#[derive(Debug, Clone)]
pub struct RoundView {
    pub round_id: String,
    pub state: GameState,
    pub result: Option<Color>,
    pub start_time: DateTime<Utc>,
    pub betting_end: Option<DateTime<Utc>>,
    pub left_time: i64,
}

struct MachineState {
    current: Option<Round>,
    phase_end: Option<DateTime<Utc>>,
    last_round_id: Option<String>,
    stopping: bool,
}

/// The state machine. Construct, subscribe, then drive with [`run`].
///
/// [`run`]: StateMachine::run
pub struct StateMachine {
    config: MachineConfig,
    state: RwLock<MachineState>,
    rng: Mutex<StdRng>,
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
    dispatch: DispatchPool,
}

impl StateMachine {
    pub fn new(config: MachineConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic draw sequence for tests.
    pub fn with_seed(config: MachineConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: MachineConfig, rng: StdRng) -> Self {
        Self {
            config,
            state: RwLock::new(MachineState {
                current: None,
                phase_end: None,
                last_round_id: None,
                stopping: false,
            }),
            rng: Mutex::new(rng),
            subscribers: RwLock::new(Vec::new()),
            dispatch: DispatchPool::new(),
        }
    }

    /// Register a lifecycle subscriber.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers
            .write()
            .expect("subscriber list poisoned")
            .push(subscriber);
    }

    /// Signal the machine to stop after the current round.
    pub fn stop(&self) {
        self.state.write().expect("machine state poisoned").stopping = true;
    }

    fn is_stopping(&self) -> bool {
        self.state.read().expect("machine state poisoned").stopping
    }

    /// Run the timeline until [`stop`] is observed at a round boundary.
    /// Emits the terminal STOPPED event before returning.
    ///
    /// [`stop`]: StateMachine::stop
    pub async fn run(&self) {
        info!("state machine started");
        loop {
            if self.is_stopping() {
                info!("state machine stopping after current round");
                self.emit(RoundEvent {
                    state: GameState::Stopped,
                    round_id: String::new(),
                    result: None,
                    left_time: 0,
                    betting_end_timestamp: 0,
                });
                return;
            }
            self.run_round().await;
        }
    }

    async fn run_round(&self) {
        let round_id = {
            let mut state = self.state.write().expect("machine state poisoned");
            let round_id = next_round_id(state.last_round_id.as_deref());
            state.last_round_id = Some(round_id.clone());
            state.current = Some(Round::new(round_id.clone()));
            state.phase_end = Some(Utc::now() + chrono_dur(self.config.wait));
            round_id
        };

        info!(round_id = %round_id, "round started");
        counter!("gms_rounds_total").increment(1);
        self.emit(RoundEvent {
            state: GameState::RoundStarted,
            round_id: round_id.clone(),
            result: None,
            left_time: self.config.wait.as_secs() as i64,
            betting_end_timestamp: 0,
        });
        tokio::time::sleep(self.config.wait).await;

        // Betting
        let betting_end = {
            let mut state = self.state.write().expect("machine state poisoned");
            let duration = chrono_dur(self.config.betting);
            let end = state
                .current
                .as_mut()
                .map(|round| round.start_betting(duration))
                .unwrap_or_else(Utc::now);
            state.phase_end = Some(end);
            end
        };

        info!(round_id = %round_id, betting_end = %betting_end, "betting started");
        self.emit(RoundEvent {
            state: GameState::Betting,
            round_id: round_id.clone(),
            result: None,
            left_time: self.config.betting.as_secs() as i64,
            betting_end_timestamp: betting_end.timestamp(),
        });
        tokio::time::sleep(self.config.betting).await;

        // Drawing
        let result = self.draw_result();
        {
            let mut state = self.state.write().expect("machine state poisoned");
            if let Some(round) = state.current.as_mut() {
                round.draw(result);
            }
            state.phase_end = Some(Utc::now() + chrono_dur(self.config.drawing));
        }

        info!(round_id = %round_id, result = %result, "betting closed, drawing");
        self.emit(RoundEvent {
            state: GameState::Drawing,
            round_id: round_id.clone(),
            result: Some(result),
            left_time: self.config.drawing.as_secs() as i64,
            betting_end_timestamp: betting_end.timestamp(),
        });
        tokio::time::sleep(self.config.drawing).await;

        // Result
        {
            let mut state = self.state.write().expect("machine state poisoned");
            if let Some(round) = state.current.as_mut() {
                round.show_result();
            }
            state.phase_end = Some(Utc::now() + chrono_dur(self.config.result));
        }

        info!(round_id = %round_id, result = %result, "showing result");
        self.emit(RoundEvent {
            state: GameState::Result,
            round_id: round_id.clone(),
            result: Some(result),
            left_time: self.config.result.as_secs() as i64,
            betting_end_timestamp: betting_end.timestamp(),
        });
        tokio::time::sleep(self.config.result).await;

        // Round ended, rest before the next one
        {
            let mut state = self.state.write().expect("machine state poisoned");
            if let Some(round) = state.current.as_mut() {
                round.end();
            }
            state.phase_end = Some(Utc::now() + chrono_dur(self.config.rest));
        }

        info!(round_id = %round_id, "round ended");
        self.emit(RoundEvent {
            state: GameState::RoundEnded,
            round_id: round_id.clone(),
            result: Some(result),
            left_time: self.config.rest.as_secs() as i64,
            betting_end_timestamp: betting_end.timestamp(),
        });
        tokio::time::sleep(self.config.rest).await;
    }

    fn draw_result(&self) -> Color {
        let mut rng = self.rng.lock().expect("rng poisoned");
        Color::ALL[rng.gen_range(0..Color::ALL.len())]
    }

    fn emit(&self, event: RoundEvent) {
        let subscribers: Vec<Arc<dyn EventSubscriber>> = {
            self.subscribers
                .read()
                .expect("subscriber list poisoned")
                .clone()
        };
        for subscriber in subscribers {
            self.dispatch.submit((subscriber, event.clone()));
        }
    }

    /// Whether a bet submitted now would be accepted.
    pub fn can_accept_bet(&self) -> bool {
        let state = self.state.read().expect("machine state poisoned");
        state
            .current
            .as_ref()
            .map(|round| round.can_accept_bet())
            .unwrap_or(false)
    }

    /// Deep-copy snapshot of the current round, `left_time` recomputed from
    /// the stored phase end and clamped at zero.
    pub fn current_round(&self) -> Option<RoundView> {
        let state = self.state.read().expect("machine state poisoned");
        let round = state.current.as_ref()?;
        let left_time = state
            .phase_end
            .map(|end| (end - Utc::now()).num_seconds().max(0))
            .unwrap_or(0);
        Some(RoundView {
            round_id: round.round_id.clone(),
            state: round.state,
            result: round.result,
            start_time: round.start_time,
            betting_end: round.betting_end,
            left_time,
        })
    }
}

fn chrono_dur(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).expect("phase duration out of range")
}

/// Next round id: wall-clock `YYYYMMDDhhmmss`, bumped past the previous id
/// when two rounds land in the same second so ids stay strictly increasing.
fn next_round_id(last: Option<&str>) -> String {
    let candidate = Utc::now().format("%Y%m%d%H%M%S").to_string();
    match last.and_then(|l| l.parse::<u64>().ok()) {
        Some(prev) => {
            let now: u64 = candidate.parse().unwrap_or(prev + 1);
            if now > prev {
                candidate
            } else {
                (prev + 1).to_string()
            }
        }
        None => candidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct Recorder {
        events: StdMutex<Vec<RoundEvent>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: StdMutex::new(Vec::new()),
            })
        }

        fn states(&self) -> Vec<GameState> {
            self.events.lock().unwrap().iter().map(|e| e.state).collect()
        }
    }

    #[async_trait]
    impl EventSubscriber for Recorder {
        async fn on_round_event(&self, event: RoundEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct Panicker;

    #[async_trait]
    impl EventSubscriber for Panicker {
        async fn on_round_event(&self, _event: RoundEvent) {
            panic!("subscriber blew up");
        }
    }

    fn fast_config() -> MachineConfig {
        MachineConfig {
            wait: Duration::from_millis(30),
            betting: Duration::from_millis(80),
            drawing: Duration::from_millis(30),
            result: Duration::from_millis(30),
            rest: Duration::from_millis(30),
        }
    }

    #[test]
    fn test_next_round_id_strictly_increasing() {
        let first = next_round_id(None);
        let second = next_round_id(Some(&first));
        assert!(second.parse::<u64>().unwrap() > first.parse::<u64>().unwrap());

        // A previous id in the future (same-second turnaround) bumps by one
        let future = "99990101120000";
        let bumped = next_round_id(Some(future));
        assert_eq!(bumped, "99990101120001");

        // Many same-second rounds stay strictly increasing
        let mut last = first;
        for _ in 0..10 {
            let next = next_round_id(Some(&last));
            assert!(next.parse::<u64>().unwrap() > last.parse::<u64>().unwrap());
            last = next;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_one_round_emits_timeline_in_order() {
        let machine = Arc::new(StateMachine::with_seed(fast_config(), 7));
        let recorder = Recorder::new();
        machine.subscribe(recorder.clone());

        let runner = machine.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        // Let one full round complete, then stop at the boundary.
        tokio::time::sleep(Duration::from_millis(230)).await;
        machine.stop();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let states = recorder.states();
        let first_round: Vec<GameState> = states.iter().take(5).copied().collect();
        assert_eq!(
            first_round,
            vec![
                GameState::RoundStarted,
                GameState::Betting,
                GameState::Drawing,
                GameState::Result,
                GameState::RoundEnded,
            ]
        );
        assert_eq!(*states.last().unwrap(), GameState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_betting_gate_follows_phase() {
        let machine = Arc::new(StateMachine::with_seed(fast_config(), 3));
        let runner = machine.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        // During wait: closed
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!machine.can_accept_bet());

        // Mid-betting: open
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(machine.can_accept_bet());
        let view = machine.current_round().unwrap();
        assert_eq!(view.state, GameState::Betting);
        assert!(view.betting_end.is_some());

        // After betting: closed
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!machine.can_accept_bet());

        machine.stop();
        handle.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_subscriber_does_not_kill_machine() {
        let machine = Arc::new(StateMachine::with_seed(fast_config(), 11));
        let recorder = Recorder::new();
        machine.subscribe(Arc::new(Panicker));
        machine.subscribe(recorder.clone());

        let runner = machine.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(230)).await;
        machine.stop();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The healthy subscriber saw a full round despite its sibling
        // panicking on every event.
        assert!(recorder.states().len() >= 5);
    }

    #[tokio::test]
    async fn test_idle_machine_has_no_round() {
        let machine = StateMachine::with_seed(fast_config(), 1);
        assert!(machine.current_round().is_none());
        assert!(!machine.can_accept_bet());
    }
}
