// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The replay event loop: non-interactive [`ReplayDriver::run`] and the
//! interactive, breakpoint-capable [`InteractiveReplay`].
//!
//! The driver is a single-threaded loop. Interactive control mutates
//! shared flags and signals a condition variable the loop blocks on while
//! paused; transitions only happen between events.

use super::{
    clock::{Clock, SimulatedClock},
    BookEvent, OrderExecutor, ReplayContext, ReplaySpeed, ReplayState, Strategy, TradeEvent,
};
use crate::{event::ReplayEvent, reader::LogReader, Result};
use std::{
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

/// Replay driver configuration
#[derive(Clone, Debug, Default)]
pub struct ReplayConfig {
    pub speed: ReplaySpeed,
}

/// A condition that pauses an interactive replay.
pub enum Breakpoint {
    /// Fire when `event.ts >= t`
    AtTime(i64),

    /// Fire once the total event count reaches N
    AfterEvents(u64),

    /// Fire once the total trade count reaches N
    AfterTrades(u64),

    /// Fire when the strategy emitted a signal during the event
    OnSignal,

    /// Custom predicate over the current event
    Custom(Box<dyn Fn(&ReplayEvent) -> bool + Send>),
}

impl std::fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AtTime(t) => write!(f, "AtTime({t})"),
            Self::AfterEvents(n) => write!(f, "AfterEvents({n})"),
            Self::AfterTrades(n) => write!(f, "AfterTrades({n})"),
            Self::OnSignal => write!(f, "OnSignal"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl Breakpoint {
    fn hit(&self, event: &ReplayEvent, state: &ReplayState, signals_emitted: bool) -> bool {
        match self {
            Self::AtTime(t) => event.timestamp_ns() >= *t,
            Self::AfterEvents(n) => state.event_count >= *n,
            Self::AfterTrades(n) => state.trade_count >= *n,
            Self::OnSignal => signals_emitted,
            Self::Custom(predicate) => predicate(event),
        }
    }

    /// Threshold breakpoints stay true forever once crossed, so they are
    /// removed after firing; signal and predicate breakpoints persist.
    fn is_one_shot(&self) -> bool {
        matches!(self, Self::AtTime(_) | Self::AfterEvents(_) | Self::AfterTrades(_))
    }
}

/// Wall-clock pacing: remembers wall and sim time at the first event and
/// sleeps off any deficit above 1 ms for the ones that follow.
struct Pacer {
    multiplier: f64,
    wall_start: Option<Instant>,
    sim_start_ns: i64,
}

impl Pacer {
    fn new(speed: ReplaySpeed) -> Self {
        Self {
            multiplier: speed.multiplier,
            wall_start: None,
            sim_start_ns: 0,
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn pace(&mut self, event_ts_ns: i64) {
        if self.multiplier <= 0.0 {
            return;
        }

        let Some(wall_start) = self.wall_start else {
            self.wall_start = Some(Instant::now());
            self.sim_start_ns = event_ts_ns;
            return;
        };

        let sim_elapsed_ns = (event_ts_ns - self.sim_start_ns).max(0);
        let target_wall_ns = (sim_elapsed_ns as f64 / self.multiplier) as i64;
        let wall_elapsed_ns = wall_start.elapsed().as_nanos() as i64;

        let deficit_ns = target_wall_ns - wall_elapsed_ns;
        if deficit_ns > 1_000_000 {
            #[allow(clippy::cast_sign_loss)]
            std::thread::sleep(Duration::from_nanos(deficit_ns as u64));
        }
    }
}

/// Clock + strategy + executor + counters: the part shared between the
/// plain and the interactive drivers.
struct EngineCore<S: Strategy> {
    clock: SimulatedClock,
    strategy: S,
    executor: Option<Box<dyn OrderExecutor>>,
    ctx: ReplayContext,
    state: ReplayState,
    pacer: Pacer,
}

impl<S: Strategy> EngineCore<S> {
    fn new(strategy: S, config: &ReplayConfig) -> Self {
        Self {
            clock: SimulatedClock::default(),
            strategy,
            executor: None,
            ctx: ReplayContext::new(),
            state: ReplayState::default(),
            pacer: Pacer::new(config.speed),
        }
    }

    /// Processes one event end to end; returns whether the strategy
    /// emitted signals.
    fn process(&mut self, event: &ReplayEvent) -> bool {
        self.pacer.pace(event.timestamp_ns());

        self.clock.advance_to(event.timestamp_ns());
        self.ctx.begin_event(self.clock.now_ns());

        match event {
            ReplayEvent::Trade(record) => {
                let trade = TradeEvent::from(record);
                if let Some(executor) = self.executor.as_mut() {
                    executor.on_trade(&trade);
                }
                self.strategy.on_trade(&trade, &mut self.ctx);
                self.state.trade_count += 1;
            }
            ReplayEvent::Book(record) => {
                let book = BookEvent::from(record);
                if let Some(executor) = self.executor.as_mut() {
                    executor.on_book_update(&book);
                }
                self.strategy.on_book_update(&book, &mut self.ctx);
                self.state.book_update_count += 1;
            }
        }

        let signals = self.ctx.take_signals();
        for signal in &signals {
            if let Some(executor) = self.executor.as_mut() {
                executor.on_signal(signal, self.clock.now_ns());
            }
        }
        self.state.signal_count += signals.len() as u64;

        self.state.event_count += 1;
        self.state.current_time_ns = self.clock.now_ns();
        self.state.last_event_kind = Some(event.kind());

        !signals.is_empty()
    }
}

/// Non-interactive replay: drives a strategy over a reader from start to
/// exhaustion.
pub struct ReplayDriver<S: Strategy> {
    core: EngineCore<S>,
}

impl<S: Strategy> ReplayDriver<S> {
    #[must_use]
    pub fn new(strategy: S, config: ReplayConfig) -> Self {
        Self {
            core: EngineCore::new(strategy, &config),
        }
    }

    /// Attaches the simulated order executor.
    #[must_use]
    pub fn executor(mut self, executor: Box<dyn OrderExecutor>) -> Self {
        self.core.executor = Some(executor);
        self
    }

    /// Replays every event the reader delivers, in order.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the reader cannot scan its directory.
    /// Structural errors inside segments end the stream cleanly.
    pub fn run(&mut self, reader: &mut LogReader) -> Result<ReplayState> {
        self.core.state.is_running = true;

        reader.for_each(|event| {
            self.core.process(event);
            true
        })?;

        self.core.state.is_running = false;
        self.core.state.is_finished = true;
        Ok(self.core.state)
    }

    /// Like [`ReplayDriver::run`], starting at the first event with
    /// `ts >= start_ts_ns`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the reader cannot scan its directory.
    pub fn run_from(&mut self, reader: &mut LogReader, start_ts_ns: i64) -> Result<ReplayState> {
        self.core.state.is_running = true;

        reader.for_each_from(start_ts_ns, |event| {
            self.core.process(event);
            true
        })?;

        self.core.state.is_running = false;
        self.core.state.is_finished = true;
        Ok(self.core.state)
    }

    #[must_use]
    pub fn state(&self) -> ReplayState {
        self.core.state
    }

    #[must_use]
    pub fn clock(&self) -> &SimulatedClock {
        &self.core.clock
    }

    #[must_use]
    pub fn strategy(&self) -> &S {
        &self.core.strategy
    }

    /// Releases the driver, handing the strategy back.
    #[must_use]
    pub fn into_strategy(self) -> S {
        self.core.strategy
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
enum Mode {
    #[default]
    Paused,
    Running,
}

#[derive(Default)]
struct ControlInner {
    mode: Mode,
    pending_steps: u64,
    step_until_trade: bool,
    seek_to: Option<i64>,
    stop: bool,
}

struct Control {
    inner: Mutex<ControlInner>,
    cv: Condvar,
    snapshot: Mutex<ReplayState>,
    breakpoints: Mutex<Vec<Breakpoint>>,
}

/// Pause notification for interactive replays.
pub type PauseCallback = Box<dyn Fn(&ReplayState) + Send>;

/// Interactive replay entry point.
pub struct InteractiveReplay;

impl InteractiveReplay {
    /// Launches a replay that starts **paused** on its own thread and
    /// returns the control handle. Use [`InteractiveHandle::step`],
    /// [`InteractiveHandle::resume`] and breakpoints to drive it.
    pub fn start<S: Strategy + 'static>(
        mut reader: LogReader,
        strategy: S,
        config: ReplayConfig,
        pause_callback: Option<PauseCallback>,
    ) -> InteractiveHandle<S> {
        let control = Arc::new(Control {
            inner: Mutex::new(ControlInner::default()),
            cv: Condvar::new(),
            snapshot: Mutex::new(ReplayState::default()),
            breakpoints: Mutex::new(vec![]),
        });

        let thread_control = Arc::clone(&control);
        let thread = std::thread::spawn(move || {
            let mut core = EngineCore::new(strategy, &config);
            core.state.is_running = true;
            core.state.is_paused = true;
            *thread_control.snapshot.lock().expect("lock is poisoned") = core.state;

            run_interactive(&mut core, &mut reader, &thread_control, &pause_callback);

            core.state.is_running = false;
            core.state.is_finished = true;
            core.state.is_paused = true;
            *thread_control.snapshot.lock().expect("lock is poisoned") = core.state;

            // Final pause: the stream is exhausted or was stopped
            if let Some(callback) = &pause_callback {
                callback(&core.state);
            }

            (core.state, core.strategy)
        });

        InteractiveHandle {
            control,
            thread: Some(thread),
        }
    }
}

fn run_interactive<S: Strategy>(
    core: &mut EngineCore<S>,
    reader: &mut LogReader,
    control: &Arc<Control>,
    pause_callback: &Option<PauseCallback>,
) {
    let mut start_from: Option<i64> = None;

    loop {
        let callback =
            |event: &ReplayEvent| process_interactive(core, event, control, pause_callback);

        let result = match start_from.take() {
            Some(ts) => reader.for_each_from(ts, callback),
            None => reader.for_each(callback),
        };

        if let Err(e) = result {
            log::warn!("Replay ended on reader error: {e:?}");
            break;
        }

        let mut inner = control.inner.lock().expect("lock is poisoned");
        if inner.stop {
            break;
        }
        if let Some(ts) = inner.seek_to.take() {
            // Dispose the current iteration and resume from the target
            start_from = Some(ts);
            continue;
        }

        break; // exhausted
    }
}

/// One interactive event: wait out pauses, process, then apply step
/// budgets and breakpoints. Returning `false` aborts the reader loop.
fn process_interactive<S: Strategy>(
    core: &mut EngineCore<S>,
    event: &ReplayEvent,
    control: &Arc<Control>,
    pause_callback: &Option<PauseCallback>,
) -> bool {
    // Block while paused; steps and seeks wake us up
    {
        let mut inner = control.inner.lock().expect("lock is poisoned");
        loop {
            if inner.stop || inner.seek_to.is_some() {
                return false;
            }

            let may_run = match inner.mode {
                Mode::Running => true,
                Mode::Paused => inner.pending_steps > 0 || inner.step_until_trade,
            };
            if may_run {
                break;
            }

            inner = control.cv.wait(inner).expect("lock is poisoned");
        }
    }

    let signals_emitted = core.process(event);
    core.state.is_paused = false;

    let mut pause_now = false;

    {
        let mut inner = control.inner.lock().expect("lock is poisoned");

        if inner.pending_steps > 0 {
            inner.pending_steps -= 1;
            if inner.pending_steps == 0 && inner.mode == Mode::Paused {
                pause_now = true;
            }
        }

        if inner.step_until_trade && event.is_trade() {
            inner.step_until_trade = false;
            if inner.mode == Mode::Paused {
                pause_now = true;
            }
        }

        let mut breakpoints = control.breakpoints.lock().expect("lock is poisoned");
        let mut hit_any = false;
        breakpoints.retain(|bp| {
            if bp.hit(event, &core.state, signals_emitted) {
                hit_any = true;
                !bp.is_one_shot()
            } else {
                true
            }
        });
        if hit_any {
            inner.mode = Mode::Paused;
            inner.pending_steps = 0;
            inner.step_until_trade = false;
            pause_now = true;
        }
    }

    core.state.is_paused = pause_now;
    *control.snapshot.lock().expect("lock is poisoned") = core.state;

    if pause_now {
        if let Some(callback) = pause_callback {
            callback(&core.state);
        }
    }

    true
}

/// Control handle of a running interactive replay.
///
/// All operations may be called from any thread; they take effect at the
/// next event boundary.
pub struct InteractiveHandle<S> {
    control: Arc<Control>,
    thread: Option<std::thread::JoinHandle<(ReplayState, S)>>,
}

impl<S> InteractiveHandle<S> {
    /// Executes one event, then pauses again.
    pub fn step(&self) {
        let mut inner = self.control.inner.lock().expect("lock is poisoned");
        inner.pending_steps += 1;
        self.control.cv.notify_all();
    }

    /// Runs until the next trade has been processed, then pauses.
    pub fn step_until_trade(&self) {
        let mut inner = self.control.inner.lock().expect("lock is poisoned");
        inner.step_until_trade = true;
        self.control.cv.notify_all();
    }

    /// Runs until a breakpoint fires or the stream ends.
    pub fn resume(&self) {
        let mut inner = self.control.inner.lock().expect("lock is poisoned");
        inner.mode = Mode::Running;
        self.control.cv.notify_all();
    }

    /// Pauses at the next event boundary.
    pub fn pause(&self) {
        let mut inner = self.control.inner.lock().expect("lock is poisoned");
        inner.mode = Mode::Paused;
        inner.pending_steps = 0;
        inner.step_until_trade = false;
    }

    /// Stops the replay; the driver returns at the next event boundary.
    pub fn stop(&self) {
        let mut inner = self.control.inner.lock().expect("lock is poisoned");
        inner.stop = true;
        self.control.cv.notify_all();
    }

    /// Restarts iteration at the first event with `ts >= target`, keeping
    /// the current run/pause mode.
    pub fn seek_to(&self, target_ts_ns: i64) {
        let mut inner = self.control.inner.lock().expect("lock is poisoned");
        inner.seek_to = Some(target_ts_ns);
        self.control.cv.notify_all();
    }

    pub fn add_breakpoint(&self, breakpoint: Breakpoint) {
        self.control
            .breakpoints
            .lock()
            .expect("lock is poisoned")
            .push(breakpoint);
    }

    pub fn clear_breakpoints(&self) {
        self.control
            .breakpoints
            .lock()
            .expect("lock is poisoned")
            .clear();
    }

    /// Latest progress snapshot.
    #[must_use]
    pub fn state(&self) -> ReplayState {
        *self.control.snapshot.lock().expect("lock is poisoned")
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state().is_paused
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state().is_finished
    }

    /// Waits for the replay thread and returns the final state and the
    /// strategy.
    ///
    /// # Panics
    ///
    /// Panics if the replay thread panicked.
    #[must_use]
    pub fn join(mut self) -> (ReplayState, S) {
        let thread = self.thread.take().expect("join called once");
        thread.join().expect("replay thread panicked")
    }
}

impl<S> Drop for InteractiveHandle<S> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.stop();
            let _ = thread.join();
        }
    }
}
