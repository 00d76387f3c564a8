//! Instrumented peripheral fakes shared by the host integration tests
//!
//! Asynchronous completions are delivered from a helper thread inside
//! `Host::interrupt`, the way a real ISR would call the registry.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use rtbus::bsp::adc::AdcHal;
use rtbus::bsp::bus::{BusHal, BusOp, BUS_ERROR};
use rtbus::bsp::pwm::{PwmHal, Timebase};
use rtbus::bsp::uart::UartHal;
use rtbus::bsp::{HalError, PeripheralId, RxSlot, TransferMode};
use rtbus::osal::host::Host;
use rtbus::osal::EventFlags;
use rtbus::Tick;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

type Hook = Arc<dyn Fn(EventFlags) + Send + Sync>;

/// Deferred "interrupt" that reports a finished transfer
pub struct Completion {
    hook: Mutex<Option<Hook>>,
}

impl Completion {
    pub const fn new() -> Self {
        Completion {
            hook: Mutex::new(None),
        }
    }

    pub fn set(&self, f: impl Fn(EventFlags) + Send + Sync + 'static) {
        *lock(&self.hook) = Some(Arc::new(f));
    }

    /// Fire `flags` from a simulated ISR shortly after the caller returns
    pub fn fire_later(&self, flags: EventFlags) {
        let Some(hook) = lock(&self.hook).clone() else {
            return;
        };
        thread::spawn(move || {
            thread::sleep(Duration::from_micros(300));
            Host::interrupt(|| hook(flags));
        });
    }
}

// ============ Bus ============

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wire {
    Select(u16),
    Start(u16, Vec<u8>),
    Deselect(u16),
}

/// Bus glue recording every wire event
///
/// Reads return `i as u8 ^ 0x5A` for byte `i`; full duplex returns the
/// complement of what was sent; register ops go through a 256-byte memory.
pub struct FakeBus {
    id: u8,
    log: Mutex<Vec<Wire>>,
    selected: Mutex<Option<u16>>,
    interleaved: AtomicBool,
    memory: Mutex<[u8; 256]>,
    pub completion: Completion,
    /// Next start fails
    pub fail_next: AtomicBool,
    /// Async transfers never complete
    pub stall: AtomicBool,
    pub aborts: AtomicUsize,
}

impl FakeBus {
    pub const fn new(id: u8) -> Self {
        FakeBus {
            id,
            log: Mutex::new(Vec::new()),
            selected: Mutex::new(None),
            interleaved: AtomicBool::new(false),
            memory: Mutex::new([0; 256]),
            completion: Completion::new(),
            fail_next: AtomicBool::new(false),
            stall: AtomicBool::new(false),
            aborts: AtomicUsize::new(0),
        }
    }

    pub fn log(&self) -> Vec<Wire> {
        lock(&self.log).clone()
    }

    pub fn clear_log(&self) {
        lock(&self.log).clear();
    }

    /// A second device was selected while another held the wire
    pub fn interleaved(&self) -> bool {
        self.interleaved.load(Ordering::SeqCst)
    }

    pub fn read_pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8 ^ 0x5A).collect()
    }

    fn record(&self, event: Wire) {
        lock(&self.log).push(event);
    }
}

impl BusHal for FakeBus {
    fn id(&self) -> PeripheralId {
        PeripheralId(self.id)
    }

    fn select(&self, addr: u16) {
        if lock(&self.selected).replace(addr).is_some() {
            self.interleaved.store(true, Ordering::SeqCst);
        }
        self.record(Wire::Select(addr));
    }

    fn deselect(&self, addr: u16) {
        if *lock(&self.selected) != Some(addr) {
            self.interleaved.store(true, Ordering::SeqCst);
        }
        *lock(&self.selected) = None;
        self.record(Wire::Deselect(addr));
    }

    fn start(&self, addr: u16, op: BusOp<'_>, mode: TransferMode) -> Result<(), HalError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            if mode.is_async() {
                self.completion.fire_later(BUS_ERROR);
                return Ok(());
            }
            return Err(HalError::Nack);
        }

        let done = op.done_bit();
        let sent = match op {
            BusOp::Write(data) => data.to_vec(),
            BusOp::Read(buf) => {
                buf.copy_from_slice(&Self::read_pattern(buf.len()));
                Vec::new()
            }
            BusOp::WriteRead { tx, rx } => {
                for (r, t) in rx.iter_mut().zip(tx) {
                    *r = !t;
                }
                tx.to_vec()
            }
            BusOp::MemWrite { mem_addr, data, .. } => {
                let mut memory = lock(&self.memory);
                for (i, b) in data.iter().enumerate() {
                    memory[(mem_addr as usize + i) & 0xFF] = *b;
                }
                data.to_vec()
            }
            BusOp::MemRead { mem_addr, data, .. } => {
                let memory = lock(&self.memory);
                for (i, b) in data.iter_mut().enumerate() {
                    *b = memory[(mem_addr as usize + i) & 0xFF];
                }
                Vec::new()
            }
        };
        self.record(Wire::Start(addr, sent));

        // Widen the window a concurrent select would hit
        thread::sleep(Duration::from_micros(100));

        if mode.is_async() && !self.stall.load(Ordering::SeqCst) {
            self.completion.fire_later(done);
        }
        Ok(())
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

// ============ UART ============

/// UART glue with a test-driven receiver
pub struct FakeUart {
    id: u8,
    armed: Mutex<Option<RxSlot<u8>>>,
    sent: Mutex<Vec<u8>>,
    inbox: Mutex<Vec<u8>>,
    remaining: AtomicUsize,
    pub completion: Completion,
    pub arms: AtomicUsize,
    pub aborts: AtomicUsize,
    pub fail_arm: AtomicBool,
}

impl FakeUart {
    pub const fn new(id: u8) -> Self {
        FakeUart {
            id,
            armed: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            inbox: Mutex::new(Vec::new()),
            remaining: AtomicUsize::new(0),
            completion: Completion::new(),
            arms: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
            fail_arm: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<u8> {
        lock(&self.sent).clone()
    }

    /// Bytes the next blocking `receive` returns
    pub fn queue_blocking(&self, data: &[u8]) {
        lock(&self.inbox).extend_from_slice(data);
    }

    pub fn armed_len(&self) -> Option<usize> {
        lock(&self.armed).map(|slot| slot.len())
    }

    /// Write `data` into the armed slot as the hardware would
    ///
    /// Also updates the DMA remaining count. Returns the bytes written.
    pub fn deliver(&self, data: &[u8]) -> usize {
        let armed = lock(&self.armed);
        let Some(slot) = *armed else {
            return 0;
        };
        // SAFETY: the fake is the producer of the armed slot.
        let buf = unsafe { slot.as_mut_slice() };
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        self.remaining.store(buf.len() - n, Ordering::SeqCst);
        n
    }
}

impl UartHal for FakeUart {
    fn id(&self) -> PeripheralId {
        PeripheralId(self.id)
    }

    fn transmit(&self, data: &[u8], mode: TransferMode) -> Result<(), HalError> {
        lock(&self.sent).extend_from_slice(data);
        if mode.is_async() {
            self.completion.fire_later(0);
        }
        Ok(())
    }

    fn receive(&self, buf: &mut [u8], _timeout: Tick) -> Result<usize, HalError> {
        let mut inbox = lock(&self.inbox);
        if inbox.is_empty() {
            return Err(HalError::Other);
        }
        let n = inbox.len().min(buf.len());
        buf[..n].copy_from_slice(&inbox[..n]);
        inbox.drain(..n);
        Ok(n)
    }

    fn start_receive(&self, slot: RxSlot<u8>, _mode: TransferMode) -> Result<(), HalError> {
        if self.fail_arm.swap(false, Ordering::SeqCst) {
            *lock(&self.armed) = None;
            return Err(HalError::Busy);
        }
        self.arms.fetch_add(1, Ordering::SeqCst);
        self.remaining.store(slot.len(), Ordering::SeqCst);
        *lock(&self.armed) = Some(slot);
        Ok(())
    }

    fn dma_remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    fn abort_receive(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        *lock(&self.armed) = None;
    }
}

// ============ ADC ============

/// ADC glue converting a programmable frame
pub struct FakeAdc {
    id: u8,
    samples: Mutex<Vec<u16>>,
    armed: Mutex<Option<RxSlot<u16>>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl FakeAdc {
    pub const fn new(id: u8) -> Self {
        FakeAdc {
            id,
            samples: Mutex::new(Vec::new()),
            armed: Mutex::new(None),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn set_samples(&self, samples: &[u16]) {
        *lock(&self.samples) = samples.to_vec();
    }

    /// DMA writes the current samples into the armed slot
    pub fn convert_dma(&self) {
        let Some(slot) = *lock(&self.armed) else {
            return;
        };
        // SAFETY: the fake is the producer of the armed slot.
        let buf = unsafe { slot.as_mut_slice() };
        let samples = lock(&self.samples);
        for (dst, src) in buf.iter_mut().zip(samples.iter()) {
            *dst = *src;
        }
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.armed).is_some()
    }
}

impl AdcHal for FakeAdc {
    fn id(&self) -> PeripheralId {
        PeripheralId(self.id)
    }

    fn start(&self, slot: RxSlot<u16>, _mode: TransferMode) -> Result<(), HalError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *lock(&self.armed) = Some(slot);
        Ok(())
    }

    fn stop(&self, _mode: TransferMode) -> Result<(), HalError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *lock(&self.armed) = None;
        Ok(())
    }

    fn poll(&self, index: usize, _timeout: Tick) -> Result<u16, HalError> {
        lock(&self.samples)
            .get(index)
            .copied()
            .ok_or(HalError::Other)
    }

    fn collect(&self, out: &mut [u16]) -> Result<(), HalError> {
        let samples = lock(&self.samples);
        if samples.len() < out.len() {
            return Err(HalError::Overrun);
        }
        out.copy_from_slice(&samples[..out.len()]);
        Ok(())
    }
}

// ============ PWM ============

pub const PWM_CHANNELS: usize = 4;

/// Timer glue keeping its register values
pub struct FakePwm {
    id: u8,
    clock: u32,
    timebase: Mutex<Option<Timebase>>,
    compare: Mutex<[u32; PWM_CHANNELS]>,
    running: Mutex<[bool; PWM_CHANNELS]>,
}

impl FakePwm {
    pub const fn new(id: u8, clock: u32) -> Self {
        FakePwm {
            id,
            clock,
            timebase: Mutex::new(None),
            compare: Mutex::new([0; PWM_CHANNELS]),
            running: Mutex::new([false; PWM_CHANNELS]),
        }
    }

    pub fn timebase(&self) -> Option<Timebase> {
        *lock(&self.timebase)
    }

    pub fn compare(&self, channel: u8) -> u32 {
        lock(&self.compare)[channel as usize]
    }

    pub fn is_running(&self, channel: u8) -> bool {
        lock(&self.running)[channel as usize]
    }
}

impl PwmHal for FakePwm {
    fn id(&self) -> PeripheralId {
        PeripheralId(self.id)
    }

    fn timer_clock(&self) -> u32 {
        self.clock
    }

    fn set_timebase(&self, timebase: Timebase) -> Result<(), HalError> {
        *lock(&self.timebase) = Some(timebase);
        Ok(())
    }

    fn set_compare(&self, channel: u8, pulse: u32) {
        lock(&self.compare)[channel as usize] = pulse;
    }

    fn start(&self, channel: u8, _mode: TransferMode) -> Result<(), HalError> {
        let mut running = lock(&self.running);
        let slot = running.get_mut(channel as usize).ok_or(HalError::Other)?;
        *slot = true;
        Ok(())
    }

    fn stop(&self, channel: u8, _mode: TransferMode) -> Result<(), HalError> {
        let mut running = lock(&self.running);
        let slot = running.get_mut(channel as usize).ok_or(HalError::Other)?;
        *slot = false;
        Ok(())
    }
}
