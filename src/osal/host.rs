//! Primitive layer on `std` threads
//!
//! Used for simulation and host tests. Every object is a `std` mutex around
//! its state plus a condition variable. Interrupt context is simulated with
//! [`Host::interrupt`].
//!
//! Thread `stop` and `delete` are cooperative: the target parks or exits at
//! its next suspension point, which is any host delay or blocking wait.

extern crate std;

use std::boxed::Box;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crate::config::{CFG_PRIO_IDLE, CFG_STK_SIZE_MIN, CFG_TICK_RATE_HZ};

use super::delay::{self, CycleCounter};
use super::{
    ms_to_ticks, EventFlags, Osal, OsalError, OsalEvent, OsalMutex, OsalResult, OsalSemaphore,
    OsalThread, OsalTimer, ThreadEntry, Tick, TimerCallback, TimerMode, WaitMode, NO_WAIT,
    WAIT_FOREVER,
};

std::thread_local! {
    static IN_ISR: Cell<bool> = const { Cell::new(false) };
    static CURRENT: Cell<Option<&'static HostThread>> = const { Cell::new(None) };
}

/// Whether the calling thread is inside [`Host::interrupt`]
pub fn in_simulated_isr() -> bool {
    IN_ISR.with(Cell::get)
}

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Lock a state mutex, ignoring poisoning from an unwound thread
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn tick_duration(ticks: Tick) -> Duration {
    Duration::from_micros(ticks as u64 * 1_000_000 / CFG_TICK_RATE_HZ as u64)
}

/// Blocking waits are not allowed in simulated interrupt context
fn check_wait_context(timeout: Tick) -> OsalResult {
    if timeout != NO_WAIT && in_simulated_isr() {
        return Err(OsalError::Error);
    }
    Ok(())
}

/// Wait on `cv` until `ready` holds or `timeout` ticks pass
///
/// Returns the guard and whether `ready` held.
fn wait_until<'a, T>(
    cv: &Condvar,
    mut guard: MutexGuard<'a, T>,
    timeout: Tick,
    mut ready: impl FnMut(&mut T) -> bool,
) -> (MutexGuard<'a, T>, bool) {
    let deadline = match timeout {
        WAIT_FOREVER => None,
        t => Some(Instant::now() + tick_duration(t)),
    };

    loop {
        if ready(&mut guard) {
            return (guard, true);
        }

        match deadline {
            None => guard = cv.wait(guard).unwrap_or_else(|e| e.into_inner()),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return (guard, false);
                }
                guard = cv
                    .wait_timeout(guard, deadline - now)
                    .unwrap_or_else(|e| e.into_inner())
                    .0;
            }
        }
    }
}

/// Nanoseconds since first use, wrapping
pub struct MonotonicCounter;

impl CycleCounter for MonotonicCounter {
    fn frequency() -> u32 {
        1_000_000_000
    }

    fn cycles() -> u32 {
        epoch().elapsed().as_nanos() as u32
    }
}

/// `std` backend
pub struct Host;

impl Host {
    /// Run `f` as if it were an interrupt handler
    pub fn interrupt<R>(f: impl FnOnce() -> R) -> R {
        let prev = IN_ISR.with(|c| c.replace(true));
        let out = f();
        IN_ISR.with(|c| c.set(prev));
        out
    }
}

impl Osal for Host {
    type Thread = HostThread;
    type Mutex = HostMutex;
    type Semaphore = HostSemaphore;
    type Event = HostEvent;
    type Timer = HostTimer;

    fn delay_ms(ms: u32) {
        suspension_point();
        thread::sleep(tick_duration(ms_to_ticks(ms)));
        suspension_point();
    }

    fn delay_us(us: u32) {
        delay::delay_us::<MonotonicCounter>(us);
    }

    fn tick_count() -> Tick {
        let ticks = epoch().elapsed().as_micros() * CFG_TICK_RATE_HZ as u128 / 1_000_000;
        ticks as Tick
    }

    fn in_isr() -> bool {
        in_simulated_isr()
    }
}

// ============ Thread ============

/// Unwind payload that ends a deleted host thread
struct ThreadDeleted;

#[derive(Default)]
struct ThreadState {
    created: bool,
    started: bool,
    stopped: bool,
    deleted: bool,
    id: Option<ThreadId>,
}

pub struct HostThread {
    state: Mutex<ThreadState>,
    gate: Condvar,
}

/// Park while the current host thread is stopped, unwind if it was deleted
fn suspension_point() {
    if in_simulated_isr() {
        return;
    }
    if let Some(thread) = CURRENT.with(Cell::get) {
        thread.gate_wait();
    }
}

impl HostThread {
    fn gate_wait(&self) {
        let state = lock(&self.state);
        let (state, _) = wait_until(&self.gate, state, WAIT_FOREVER, |s| {
            s.deleted || (s.started && !s.stopped)
        });
        if state.deleted {
            drop(state);
            panic::resume_unwind(Box::new(ThreadDeleted));
        }
    }

    fn is_current(&self) -> bool {
        CURRENT.with(Cell::get).is_some_and(|t| core::ptr::eq(t, self))
    }

    fn run(&'static self, entry: ThreadEntry, arg: usize) {
        CURRENT.with(|c| c.set(Some(self)));

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.gate_wait();
            entry(arg);
        }));

        let mut state = lock(&self.state);
        state.created = false;
        state.id = None;
        drop(state);

        if let Err(payload) = result {
            if !payload.is::<ThreadDeleted>() {
                panic::resume_unwind(payload);
            }
        }
    }
}

impl OsalThread for HostThread {
    const INIT: Self = HostThread {
        state: Mutex::new(ThreadState {
            created: false,
            started: false,
            stopped: false,
            deleted: false,
            id: None,
        }),
        gate: Condvar::new(),
    };

    fn create(
        &'static self,
        name: &'static str,
        entry: ThreadEntry,
        arg: usize,
        stack: &'static mut [u32],
        priority: u8,
    ) -> OsalResult {
        if priority >= CFG_PRIO_IDLE || stack.len() < CFG_STK_SIZE_MIN {
            return Err(OsalError::InvalidParam);
        }

        let mut state = lock(&self.state);
        if state.created {
            return Err(OsalError::Error);
        }

        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || self.run(entry, arg))
            .map_err(|_| OsalError::Error)?;

        *state = ThreadState {
            created: true,
            id: Some(handle.thread().id()),
            ..ThreadState::default()
        };
        Ok(())
    }

    fn start(&self) -> OsalResult {
        let mut state = lock(&self.state);
        if !state.created || (state.started && !state.stopped) {
            return Err(OsalError::Error);
        }
        state.started = true;
        state.stopped = false;
        self.gate.notify_all();
        Ok(())
    }

    fn stop(&self) -> OsalResult {
        let mut state = lock(&self.state);
        if !state.created {
            return Err(OsalError::Error);
        }
        state.stopped = true;
        drop(state);

        if self.is_current() {
            self.gate_wait();
        }
        Ok(())
    }

    fn delete(&self) -> OsalResult {
        let mut state = lock(&self.state);
        if !state.created {
            return Err(OsalError::Error);
        }
        state.deleted = true;
        self.gate.notify_all();
        drop(state);

        if self.is_current() {
            panic::resume_unwind(Box::new(ThreadDeleted));
        }
        Ok(())
    }
}

// ============ Mutex ============

#[derive(Default)]
struct MutexState {
    created: bool,
    owner: Option<ThreadId>,
    depth: u32,
}

pub struct HostMutex {
    state: Mutex<MutexState>,
    cv: Condvar,
}

impl OsalMutex for HostMutex {
    const INIT: Self = HostMutex {
        state: Mutex::new(MutexState {
            created: false,
            owner: None,
            depth: 0,
        }),
        cv: Condvar::new(),
    };

    fn create(&self, _name: &'static str) -> OsalResult {
        let mut state = lock(&self.state);
        if state.created {
            return Err(OsalError::Error);
        }
        *state = MutexState {
            created: true,
            ..MutexState::default()
        };
        Ok(())
    }

    fn lock(&self, timeout: Tick) -> OsalResult {
        check_wait_context(timeout)?;
        suspension_point();

        let me = thread::current().id();
        let state = lock(&self.state);
        if !state.created {
            return Err(OsalError::Error);
        }
        if state.owner == Some(me) {
            let mut state = state;
            state.depth = state.depth.checked_add(1).ok_or(OsalError::Error)?;
            return Ok(());
        }

        let (mut state, acquired) = wait_until(&self.cv, state, timeout, |s| {
            !s.created || s.owner.is_none()
        });
        if !state.created {
            return Err(OsalError::Error);
        }
        if !acquired {
            return Err(OsalError::Timeout);
        }
        state.owner = Some(me);
        state.depth = 1;
        Ok(())
    }

    fn unlock(&self) -> OsalResult {
        let mut state = lock(&self.state);
        if !state.created || state.owner != Some(thread::current().id()) {
            return Err(OsalError::Error);
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.cv.notify_one();
        }
        Ok(())
    }

    fn delete(&self) -> OsalResult {
        let mut state = lock(&self.state);
        if !state.created {
            return Err(OsalError::Error);
        }
        *state = MutexState::default();
        self.cv.notify_all();
        Ok(())
    }
}

// ============ Semaphore ============

#[derive(Default)]
struct SemState {
    created: bool,
    count: u32,
}

pub struct HostSemaphore {
    state: Mutex<SemState>,
    cv: Condvar,
}

impl HostSemaphore {
    fn give(&self) -> OsalResult {
        let mut state = lock(&self.state);
        if !state.created {
            return Err(OsalError::Error);
        }
        state.count = state.count.checked_add(1).ok_or(OsalError::Error)?;
        self.cv.notify_one();
        Ok(())
    }
}

impl OsalSemaphore for HostSemaphore {
    const INIT: Self = HostSemaphore {
        state: Mutex::new(SemState {
            created: false,
            count: 0,
        }),
        cv: Condvar::new(),
    };

    fn create(&self, _name: &'static str, initial: u32) -> OsalResult {
        let mut state = lock(&self.state);
        if state.created {
            return Err(OsalError::Error);
        }
        *state = SemState {
            created: true,
            count: initial,
        };
        Ok(())
    }

    fn wait(&self, timeout: Tick) -> OsalResult {
        check_wait_context(timeout)?;
        suspension_point();

        let state = lock(&self.state);
        if !state.created {
            return Err(OsalError::Error);
        }
        let (mut state, ready) = wait_until(&self.cv, state, timeout, |s| {
            !s.created || s.count > 0
        });
        if !state.created {
            return Err(OsalError::Error);
        }
        if !ready {
            return Err(OsalError::Timeout);
        }
        state.count -= 1;
        Ok(())
    }

    fn post(&self) -> OsalResult {
        self.give()
    }

    fn post_from_isr(&self) -> OsalResult {
        self.give()
    }

    fn delete(&self) -> OsalResult {
        let mut state = lock(&self.state);
        if !state.created {
            return Err(OsalError::Error);
        }
        *state = SemState::default();
        self.cv.notify_all();
        Ok(())
    }
}

// ============ Event ============

#[derive(Default)]
struct EventState {
    created: bool,
    flags: EventFlags,
}

pub struct HostEvent {
    state: Mutex<EventState>,
    cv: Condvar,
}

impl OsalEvent for HostEvent {
    const INIT: Self = HostEvent {
        state: Mutex::new(EventState {
            created: false,
            flags: 0,
        }),
        cv: Condvar::new(),
    };

    fn create(&self, _name: &'static str) -> OsalResult {
        let mut state = lock(&self.state);
        if state.created {
            return Err(OsalError::Error);
        }
        *state = EventState {
            created: true,
            flags: 0,
        };
        Ok(())
    }

    fn set(&self, flags: EventFlags) -> OsalResult {
        let mut state = lock(&self.state);
        if !state.created {
            return Err(OsalError::Error);
        }
        state.flags |= flags;
        self.cv.notify_all();
        Ok(())
    }

    fn clear(&self, flags: EventFlags) -> OsalResult {
        let mut state = lock(&self.state);
        if !state.created {
            return Err(OsalError::Error);
        }
        state.flags &= !flags;
        Ok(())
    }

    fn wait(
        &self,
        requested: EventFlags,
        mode: WaitMode,
        clear_on_exit: bool,
        timeout: Tick,
    ) -> OsalResult<EventFlags> {
        if requested == 0 {
            return Err(OsalError::InvalidParam);
        }
        check_wait_context(timeout)?;
        suspension_point();

        let state = lock(&self.state);
        if !state.created {
            return Err(OsalError::Error);
        }

        let mut observed = 0;
        let (state, ready) = wait_until(&self.cv, state, timeout, |s| {
            if !s.created || !mode.satisfied(s.flags, requested) {
                return !s.created;
            }
            observed = s.flags;
            if clear_on_exit {
                s.flags &= !requested;
            }
            true
        });
        if !state.created {
            return Err(OsalError::Error);
        }
        if !ready {
            return Err(OsalError::Timeout);
        }
        Ok(observed)
    }

    fn get(&self) -> OsalResult<EventFlags> {
        let state = lock(&self.state);
        if !state.created {
            return Err(OsalError::Error);
        }
        Ok(state.flags)
    }

    fn delete(&self) -> OsalResult {
        let mut state = lock(&self.state);
        if !state.created {
            return Err(OsalError::Error);
        }
        *state = EventState::default();
        self.cv.notify_all();
        Ok(())
    }
}

// ============ Timer ============

struct TimerState {
    created: bool,
    active: bool,
    mode: TimerMode,
    period: Duration,
    deadline: Instant,
    service: Option<JoinHandle<()>>,
}

pub struct HostTimer {
    state: Mutex<Option<TimerState>>,
    cv: Condvar,
}

impl HostTimer {
    /// Service thread: sleeps until the deadline and runs the callback
    fn service(&'static self, callback: TimerCallback, arg: usize) {
        let mut guard = lock(&self.state);
        loop {
            let Some(state) = guard.as_mut() else {
                return;
            };
            if !state.created {
                return;
            }
            if !state.active {
                guard = self.cv.wait(guard).unwrap_or_else(|e| e.into_inner());
                continue;
            }

            let now = Instant::now();
            if now < state.deadline {
                let wait = state.deadline - now;
                guard = self
                    .cv
                    .wait_timeout(guard, wait)
                    .unwrap_or_else(|e| e.into_inner())
                    .0;
                continue;
            }

            match state.mode {
                TimerMode::OneShot => state.active = false,
                TimerMode::Periodic => state.deadline += state.period,
            }
            drop(guard);
            callback(arg);
            guard = lock(&self.state);
        }
    }

    fn with_created<R>(&self, f: impl FnOnce(&mut TimerState) -> R) -> OsalResult<R> {
        let mut guard = lock(&self.state);
        match guard.as_mut() {
            Some(state) if state.created => {
                let out = f(state);
                self.cv.notify_all();
                Ok(out)
            }
            _ => Err(OsalError::Error),
        }
    }
}

impl OsalTimer for HostTimer {
    const INIT: Self = HostTimer {
        state: Mutex::new(None),
        cv: Condvar::new(),
    };

    fn create(
        &'static self,
        name: &'static str,
        callback: TimerCallback,
        arg: usize,
        period_ms: u32,
        mode: TimerMode,
    ) -> OsalResult {
        if period_ms == 0 {
            return Err(OsalError::InvalidParam);
        }

        let mut guard = lock(&self.state);
        if guard.as_ref().is_some_and(|s| s.created) {
            return Err(OsalError::Error);
        }

        let service = thread::Builder::new()
            .name(name.into())
            .spawn(move || self.service(callback, arg))
            .map_err(|_| OsalError::Error)?;

        *guard = Some(TimerState {
            created: true,
            active: false,
            mode,
            period: tick_duration(ms_to_ticks(period_ms)),
            deadline: Instant::now(),
            service: Some(service),
        });
        Ok(())
    }

    fn start(&self) -> OsalResult {
        self.with_created(|s| {
            s.active = true;
            s.deadline = Instant::now() + s.period;
        })
    }

    fn stop(&self) -> OsalResult {
        self.with_created(|s| s.active = false)
    }

    fn change_period(&self, period_ms: u32) -> OsalResult {
        if period_ms == 0 {
            return Err(OsalError::InvalidParam);
        }
        self.with_created(|s| {
            s.period = tick_duration(ms_to_ticks(period_ms));
            if s.active {
                s.deadline = Instant::now() + s.period;
            }
        })
    }

    fn delete(&self) -> OsalResult {
        let service = {
            let mut guard = lock(&self.state);
            match guard.as_mut() {
                Some(state) if state.created => {
                    state.created = false;
                    state.active = false;
                    state.service.take()
                }
                _ => return Err(OsalError::Error),
            }
        };
        self.cv.notify_all();

        if let Some(handle) = service {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        *lock(&self.state) = None;
        Ok(())
    }

    fn is_active(&self) -> bool {
        lock(&self.state)
            .as_ref()
            .is_some_and(|s| s.created && s.active)
    }
}
