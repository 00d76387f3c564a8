//! Primitive layer contract on the `std` backend

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rtbus::osal::host::{Host, HostEvent, HostMutex, HostSemaphore, HostThread, HostTimer};
use rtbus::osal::{
    ms_to_ticks, MessageQueue, Osal, OsalError, OsalEvent, OsalMutex, OsalSemaphore, OsalThread,
    OsalTimer, TimerMode, WaitMode, NO_WAIT, WAIT_FOREVER,
};

fn stack(words: usize) -> &'static mut [u32] {
    Box::leak(vec![0u32; words].into_boxed_slice())
}

/// Poll `cond` for up to a second
fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[cfg(test)]
mod backend_tests {
    use super::*;

    #[test]
    fn test_tick_count_advances() {
        let before = Host::tick_count();
        Host::delay_ms(20);
        let elapsed = Host::tick_count().wrapping_sub(before);
        assert!(elapsed >= ms_to_ticks(20), "elapsed {}", elapsed);
    }

    #[test]
    fn test_delay_us_waits() {
        let start = Instant::now();
        Host::delay_us(500);
        assert!(start.elapsed() >= Duration::from_micros(500));
    }

    #[test]
    fn test_simulated_interrupt() {
        assert!(!Host::in_isr());
        assert!(Host::interrupt(Host::in_isr));
        assert!(!Host::in_isr());
    }

    #[test]
    fn test_critical_sections_nest() {
        let outer = Host::critical_enter();
        let inner = Host::critical_enter();
        Host::critical_exit(inner);
        Host::critical_exit(outer);
    }
}

#[cfg(test)]
mod semaphore_tests {
    use super::*;

    #[test]
    fn test_counting() {
        static SEM: HostSemaphore = HostSemaphore::INIT;
        SEM.create("sem", 2).unwrap();
        assert_eq!(SEM.create("sem", 0), Err(OsalError::Error));

        assert_eq!(SEM.wait(NO_WAIT), Ok(()));
        assert_eq!(SEM.wait(NO_WAIT), Ok(()));
        assert_eq!(SEM.wait(NO_WAIT), Err(OsalError::Timeout));
        assert_eq!(SEM.wait(5), Err(OsalError::Timeout));

        Host::interrupt(|| SEM.post_from_isr()).unwrap();
        assert_eq!(SEM.wait(WAIT_FOREVER), Ok(()));
    }

    #[test]
    fn test_post_wakes_waiter() {
        static SEM: HostSemaphore = HostSemaphore::INIT;
        SEM.create("sem", 0).unwrap();

        let waiter = thread::spawn(|| SEM.wait(WAIT_FOREVER));
        thread::sleep(Duration::from_millis(10));
        SEM.post().unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }

    #[test]
    fn test_delete_releases_waiter() {
        static SEM: HostSemaphore = HostSemaphore::INIT;
        SEM.create("sem", 0).unwrap();

        let waiter = thread::spawn(|| SEM.wait(WAIT_FOREVER));
        thread::sleep(Duration::from_millis(10));
        SEM.delete().unwrap();
        assert_eq!(waiter.join().unwrap(), Err(OsalError::Error));

        assert_eq!(SEM.post(), Err(OsalError::Error));
        assert_eq!(SEM.delete(), Err(OsalError::Error));
    }

    #[test]
    fn test_no_blocking_in_interrupt() {
        static SEM: HostSemaphore = HostSemaphore::INIT;
        SEM.create("sem", 1).unwrap();
        assert_eq!(Host::interrupt(|| SEM.wait(10)), Err(OsalError::Error));
        assert_eq!(Host::interrupt(|| SEM.wait(NO_WAIT)), Ok(()));
    }
}

#[cfg(test)]
mod mutex_tests {
    use super::*;

    #[test]
    fn test_recursive_owner() {
        static MUTEX: HostMutex = HostMutex::INIT;
        MUTEX.create("m").unwrap();

        MUTEX.lock(WAIT_FOREVER).unwrap();
        MUTEX.lock(NO_WAIT).unwrap();

        let contender = thread::spawn(|| MUTEX.lock(5));
        assert_eq!(contender.join().unwrap(), Err(OsalError::Timeout));

        MUTEX.unlock().unwrap();
        let contender = thread::spawn(|| MUTEX.lock(NO_WAIT));
        assert_eq!(contender.join().unwrap(), Err(OsalError::Timeout));

        MUTEX.unlock().unwrap();
        assert_eq!(MUTEX.unlock(), Err(OsalError::Error));
    }

    #[test]
    fn test_only_owner_unlocks() {
        static MUTEX: HostMutex = HostMutex::INIT;
        MUTEX.create("m").unwrap();
        MUTEX.lock(WAIT_FOREVER).unwrap();

        let stranger = thread::spawn(|| MUTEX.unlock());
        assert_eq!(stranger.join().unwrap(), Err(OsalError::Error));
        MUTEX.unlock().unwrap();
    }

    #[test]
    fn test_handover() {
        static MUTEX: HostMutex = HostMutex::INIT;
        static INSIDE: AtomicUsize = AtomicUsize::new(0);
        static PEAK: AtomicUsize = AtomicUsize::new(0);
        MUTEX.create("m").unwrap();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                thread::spawn(|| {
                    for _ in 0..50 {
                        MUTEX.lock(WAIT_FOREVER).unwrap();
                        let now = INSIDE.fetch_add(1, Ordering::SeqCst) + 1;
                        PEAK.fetch_max(now, Ordering::SeqCst);
                        INSIDE.fetch_sub(1, Ordering::SeqCst);
                        MUTEX.unlock().unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(PEAK.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lifecycle() {
        static MUTEX: HostMutex = HostMutex::INIT;
        assert_eq!(MUTEX.lock(NO_WAIT), Err(OsalError::Error));
        MUTEX.create("m").unwrap();
        assert_eq!(MUTEX.create("m"), Err(OsalError::Error));
        MUTEX.delete().unwrap();
        assert_eq!(MUTEX.lock(NO_WAIT), Err(OsalError::Error));

        // Recreated objects start clean
        MUTEX.create("m").unwrap();
        MUTEX.lock(NO_WAIT).unwrap();
        MUTEX.unlock().unwrap();
    }
}

#[cfg(test)]
mod event_tests {
    use super::*;

    #[test]
    fn test_any_and_all() {
        static EVENT: HostEvent = HostEvent::INIT;
        EVENT.create("ev").unwrap();

        assert_eq!(
            EVENT.wait(0, WaitMode::Any, false, NO_WAIT),
            Err(OsalError::InvalidParam)
        );

        EVENT.set(0b0001).unwrap();
        assert_eq!(EVENT.wait(0b0011, WaitMode::Any, false, NO_WAIT), Ok(0b0001));
        assert_eq!(
            EVENT.wait(0b0011, WaitMode::All, false, NO_WAIT),
            Err(OsalError::Timeout)
        );

        EVENT.set(0b0110).unwrap();
        assert_eq!(EVENT.wait(0b0011, WaitMode::All, true, NO_WAIT), Ok(0b0111));
        assert_eq!(EVENT.get(), Ok(0b0100));

        EVENT.clear(0b0100).unwrap();
        assert_eq!(EVENT.get(), Ok(0));
    }

    #[test]
    fn test_set_from_interrupt_wakes_waiter() {
        static EVENT: HostEvent = HostEvent::INIT;
        EVENT.create("ev").unwrap();

        let waiter = thread::spawn(|| EVENT.wait(0b1000, WaitMode::Any, true, WAIT_FOREVER));
        thread::sleep(Duration::from_millis(10));
        thread::spawn(|| Host::interrupt(|| EVENT.set(0b1000)))
            .join()
            .unwrap()
            .unwrap();

        assert_eq!(waiter.join().unwrap(), Ok(0b1000));
        assert_eq!(EVENT.get(), Ok(0));
    }

    #[test]
    fn test_wait_times_out() {
        static EVENT: HostEvent = HostEvent::INIT;
        EVENT.create("ev").unwrap();

        let start = Instant::now();
        assert_eq!(
            EVENT.wait(1, WaitMode::Any, true, 20),
            Err(OsalError::Timeout)
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(
            Host::interrupt(|| EVENT.wait(1, WaitMode::Any, true, 20)),
            Err(OsalError::Error)
        );
    }

    #[test]
    fn test_delete_releases_waiter() {
        static EVENT: HostEvent = HostEvent::INIT;
        EVENT.create("ev").unwrap();

        let waiter = thread::spawn(|| EVENT.wait(1, WaitMode::All, false, WAIT_FOREVER));
        thread::sleep(Duration::from_millis(10));
        EVENT.delete().unwrap();
        assert_eq!(waiter.join().unwrap(), Err(OsalError::Error));
        assert_eq!(EVENT.set(1), Err(OsalError::Error));
    }
}

#[cfg(test)]
mod timer_tests {
    use super::*;

    #[test]
    fn test_periodic() {
        static TMR: HostTimer = HostTimer::INIT;
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        fn tick(arg: usize) {
            FIRED.fetch_add(arg, Ordering::SeqCst);
        }

        TMR.create("tmr", tick, 1, 5, TimerMode::Periodic).unwrap();
        assert!(!TMR.is_active());
        thread::sleep(Duration::from_millis(20));
        assert_eq!(FIRED.load(Ordering::SeqCst), 0);

        TMR.start().unwrap();
        assert!(TMR.is_active());
        assert!(eventually(|| FIRED.load(Ordering::SeqCst) >= 3));

        TMR.stop().unwrap();
        thread::sleep(Duration::from_millis(10));
        let stopped_at = FIRED.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(FIRED.load(Ordering::SeqCst), stopped_at);

        TMR.delete().unwrap();
        assert_eq!(TMR.start(), Err(OsalError::Error));
    }

    #[test]
    fn test_one_shot() {
        static TMR: HostTimer = HostTimer::INIT;
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        fn tick(_: usize) {
            FIRED.fetch_add(1, Ordering::SeqCst);
        }

        TMR.create("tmr", tick, 0, 5, TimerMode::OneShot).unwrap();
        TMR.start().unwrap();
        assert!(eventually(|| FIRED.load(Ordering::SeqCst) == 1));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(FIRED.load(Ordering::SeqCst), 1);
        assert!(!TMR.is_active());

        // Restartable
        TMR.start().unwrap();
        assert!(eventually(|| FIRED.load(Ordering::SeqCst) == 2));
        TMR.delete().unwrap();
    }

    #[test]
    fn test_change_period() {
        static TMR: HostTimer = HostTimer::INIT;
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        fn tick(_: usize) {
            FIRED.fetch_add(1, Ordering::SeqCst);
        }

        TMR.create("tmr", tick, 0, 10_000, TimerMode::Periodic).unwrap();
        TMR.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(FIRED.load(Ordering::SeqCst), 0);

        TMR.change_period(2).unwrap();
        assert!(TMR.is_active());
        assert!(eventually(|| FIRED.load(Ordering::SeqCst) >= 2));
        assert_eq!(TMR.change_period(0), Err(OsalError::InvalidParam));
        TMR.delete().unwrap();
    }

    #[test]
    fn test_create_rules() {
        static TMR: HostTimer = HostTimer::INIT;
        fn tick(_: usize) {}

        assert_eq!(
            TMR.create("tmr", tick, 0, 0, TimerMode::Periodic),
            Err(OsalError::InvalidParam)
        );
        TMR.create("tmr", tick, 0, 10, TimerMode::Periodic).unwrap();
        assert_eq!(
            TMR.create("tmr", tick, 0, 10, TimerMode::Periodic),
            Err(OsalError::Error)
        );
        TMR.delete().unwrap();
        assert_eq!(TMR.delete(), Err(OsalError::Error));
        TMR.create("tmr", tick, 0, 10, TimerMode::OneShot).unwrap();
        TMR.delete().unwrap();
    }
}

#[cfg(test)]
mod thread_tests {
    use super::*;

    #[test]
    fn test_runs_only_after_start() {
        static THREAD: HostThread = HostThread::INIT;
        static HITS: AtomicUsize = AtomicUsize::new(0);
        fn entry(arg: usize) {
            HITS.fetch_add(arg, Ordering::SeqCst);
        }

        THREAD.create("worker", entry, 7, stack(128), 5).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(HITS.load(Ordering::SeqCst), 0);

        THREAD.start().unwrap();
        assert!(eventually(|| HITS.load(Ordering::SeqCst) == 7));
    }

    #[test]
    fn test_stop_and_resume() {
        static THREAD: HostThread = HostThread::INIT;
        static LOOPS: AtomicUsize = AtomicUsize::new(0);
        fn entry(_: usize) {
            loop {
                LOOPS.fetch_add(1, Ordering::SeqCst);
                Host::delay_ms(1);
            }
        }

        THREAD.create("looper", entry, 0, stack(128), 5).unwrap();
        THREAD.start().unwrap();
        assert_eq!(THREAD.start(), Err(OsalError::Error));
        assert!(eventually(|| LOOPS.load(Ordering::SeqCst) > 3));

        THREAD.stop().unwrap();
        thread::sleep(Duration::from_millis(10));
        let parked = LOOPS.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(LOOPS.load(Ordering::SeqCst), parked);

        THREAD.start().unwrap();
        assert!(eventually(|| LOOPS.load(Ordering::SeqCst) > parked));

        THREAD.delete().unwrap();
        thread::sleep(Duration::from_millis(10));
        let deleted = LOOPS.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(LOOPS.load(Ordering::SeqCst), deleted);
    }

    #[test]
    fn test_create_rules() {
        static THREAD: HostThread = HostThread::INIT;
        fn entry(_: usize) {}

        assert_eq!(
            THREAD.create("t", entry, 0, stack(128), 63),
            Err(OsalError::InvalidParam)
        );
        assert_eq!(
            THREAD.create("t", entry, 0, stack(16), 5),
            Err(OsalError::InvalidParam)
        );
        assert_eq!(THREAD.start(), Err(OsalError::Error));
        assert_eq!(THREAD.stop(), Err(OsalError::Error));
        assert_eq!(THREAD.delete(), Err(OsalError::Error));
    }

    #[test]
    fn test_thread_deletes_itself() {
        static THREAD: HostThread = HostThread::INIT;
        static REACHED: AtomicUsize = AtomicUsize::new(0);
        fn entry(_: usize) {
            REACHED.fetch_add(1, Ordering::SeqCst);
            let _ = THREAD.delete();
            REACHED.fetch_add(100, Ordering::SeqCst);
        }

        THREAD.create("self", entry, 0, stack(128), 5).unwrap();
        THREAD.start().unwrap();
        assert!(eventually(|| REACHED.load(Ordering::SeqCst) == 1));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(REACHED.load(Ordering::SeqCst), 1);
    }
}

#[cfg(test)]
mod queue_tests {
    use super::*;

    #[test]
    fn test_fifo_and_capacity() {
        static QUEUE: MessageQueue<Host, u32, 4> = MessageQueue::new();
        QUEUE.create("q").unwrap();
        assert!(QUEUE.is_empty());

        for msg in 1..=4 {
            QUEUE.send(msg, NO_WAIT).unwrap();
        }
        assert_eq!(QUEUE.len(), 4);
        assert_eq!(QUEUE.send(5, NO_WAIT), Err(OsalError::Timeout));
        assert_eq!(Host::interrupt(|| QUEUE.send_from_isr(5)), Err(OsalError::Timeout));

        for msg in 1..=4 {
            assert_eq!(QUEUE.recv(NO_WAIT), Ok(msg));
        }
        assert_eq!(QUEUE.recv(5), Err(OsalError::Timeout));
    }

    #[test]
    fn test_isr_producer_task_consumer() {
        static QUEUE: MessageQueue<Host, u16, 8> = MessageQueue::new();
        QUEUE.create("q").unwrap();

        let consumer = thread::spawn(|| {
            (0..32)
                .map(|_| QUEUE.recv(WAIT_FOREVER).unwrap())
                .collect::<Vec<_>>()
        });
        for msg in 0..32u16 {
            while Host::interrupt(|| QUEUE.send_from_isr(msg)).is_err() {
                thread::sleep(Duration::from_micros(200));
            }
        }
        assert_eq!(consumer.join().unwrap(), (0..32).collect::<Vec<u16>>());
    }

    #[test]
    fn test_delete() {
        static QUEUE: MessageQueue<Host, u8, 2> = MessageQueue::new();
        QUEUE.create("q").unwrap();
        QUEUE.send(1, NO_WAIT).unwrap();
        QUEUE.delete().unwrap();
        assert!(QUEUE.is_empty());
        assert_eq!(QUEUE.recv(NO_WAIT), Err(OsalError::Error));
        assert_eq!(QUEUE.delete(), Err(OsalError::Error));
    }
}
