//! PIT tick service.
//!
//! IRQ 0 drives a monotonic tick counter and a small fixed-size table of
//! subscribers. A subscription fires on every tick, on a microsecond
//! interval, or once after a delay; handlers receive the interrupted
//! context so a subscriber (the scheduler) can rewrite it to switch tasks.
//!
//! The hardware side -- programming channel 0 for mode 3 square wave --
//! lives in `arch::x86::pit`; everything in this module is plain state
//! driven by the tick, which is how the host tests exercise it.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::irq::context::InterruptFrame;

/// PIT input clock in Hz.
pub const PIT_BASE_FREQUENCY: u64 = 1_193_182;

/// Capacity of the subscription table.
pub const MAX_HANDLERS: usize = 8;

/// Channel-0 divisor for a desired tick interval, rounded to nearest.
pub const fn divisor_for_interval_us(interval_us: u32) -> u16 {
    ((PIT_BASE_FREQUENCY * interval_us as u64 + 500_000) / 1_000_000) as u16
}

/// When a subscription fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTrigger {
    /// On every IRQ 0.
    EveryTick,
    /// Whenever at least this many microseconds elapsed since the last
    /// firing.
    Interval(u64),
    /// Once, this many microseconds after registration.
    OneShot(u64),
}

/// Subscription callback. Receives the interrupted context and the
/// caller-chosen argument word.
pub type TimerCallback = fn(&mut InterruptFrame, usize);

#[derive(Clone, Copy)]
struct Subscription {
    callback: TimerCallback,
    arg: usize,
    trigger: TimerTrigger,
    /// Registration or last-fire time, in microseconds of uptime.
    last_fired_us: u64,
}

/// The subscription table, separated from the globals so tests can drive
/// their own instances tick by tick.
pub struct TimerTable {
    slots: [Option<Subscription>; MAX_HANDLERS],
}

impl TimerTable {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_HANDLERS],
        }
    }

    /// Add a subscription. Returns false when the table is full.
    pub fn subscribe(
        &mut self,
        callback: TimerCallback,
        arg: usize,
        trigger: TimerTrigger,
        now_us: u64,
    ) -> bool {
        for slot in self.slots.iter_mut() {
            if slot.is_none() {
                *slot = Some(Subscription {
                    callback,
                    arg,
                    trigger,
                    last_fired_us: now_us,
                });
                return true;
            }
        }
        false
    }

    /// Remove the subscription matching `(callback, arg)`. Returns false
    /// when no such subscription exists.
    pub fn unsubscribe(&mut self, callback: TimerCallback, arg: usize) -> bool {
        for slot in self.slots.iter_mut() {
            if let Some(sub) = slot {
                if sub.callback == callback && sub.arg == arg {
                    *slot = None;
                    return true;
                }
            }
        }
        false
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Evaluate every subscription against the current uptime and fire the
    /// due ones. One-shots deactivate after firing.
    pub fn run_tick(&mut self, now_us: u64, frame: &mut InterruptFrame) {
        for slot in self.slots.iter_mut() {
            let Some(sub) = slot.as_mut() else { continue };

            let fire = match sub.trigger {
                TimerTrigger::EveryTick => true,
                TimerTrigger::Interval(period_us) => {
                    if now_us - sub.last_fired_us >= period_us {
                        sub.last_fired_us = now_us;
                        true
                    } else {
                        false
                    }
                }
                TimerTrigger::OneShot(delay_us) => now_us - sub.last_fired_us >= delay_us,
            };

            if !fire {
                continue;
            }

            let callback = sub.callback;
            let arg = sub.arg;
            if matches!(sub.trigger, TimerTrigger::OneShot(_)) {
                *slot = None;
            }
            callback(frame, arg);
        }
    }
}

impl Default for TimerTable {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Kernel-wide tick state
// ---------------------------------------------------------------------------

static TICK_COUNT: AtomicU64 = AtomicU64::new(0);
static INTERVAL_US: AtomicU32 = AtomicU32::new(0);
static SUBSCRIPTIONS: Mutex<TimerTable> = Mutex::new(TimerTable::new());

/// Program the PIT for `interval_us` between ticks and claim IRQ 0.
pub fn init(interval_us: u32) {
    INTERVAL_US.store(interval_us, Ordering::Relaxed);

    let divisor = divisor_for_interval_us(interval_us);
    crate::arch::pit_program(divisor);
    crate::irq::register_irq(0, tick_handler);

    log::info!("PIT every {interval_us} us (divisor {divisor})");
}

/// IRQ 0 handler: advance the tick and fan out to subscribers.
fn tick_handler(frame: &mut InterruptFrame) {
    let ticks = TICK_COUNT.fetch_add(1, Ordering::Relaxed) + 1;
    let now_us = ticks * INTERVAL_US.load(Ordering::Relaxed) as u64;
    SUBSCRIPTIONS.lock().run_tick(now_us, frame);
}

/// Subscribe to the tick. Returns false when the table is full.
pub fn register_handler(callback: TimerCallback, arg: usize, trigger: TimerTrigger) -> bool {
    let now_us = uptime_us();
    SUBSCRIPTIONS.lock().subscribe(callback, arg, trigger, now_us)
}

/// Drop the subscription matching `(callback, arg)`.
pub fn unregister_handler(callback: TimerCallback, arg: usize) -> bool {
    SUBSCRIPTIONS.lock().unsubscribe(callback, arg)
}

/// Ticks since boot; non-decreasing.
pub fn ticks() -> u64 {
    TICK_COUNT.load(Ordering::Relaxed)
}

/// Configured tick interval in microseconds.
pub fn interval_us() -> u32 {
    INTERVAL_US.load(Ordering::Relaxed)
}

/// Microseconds since boot, at tick granularity.
pub fn uptime_us() -> u64 {
    ticks() * interval_us() as u64
}

/// Busy-wait for `count` ticks. Interrupts must be enabled.
pub fn sleep_ticks(count: u64) {
    let deadline = ticks() + count;
    while ticks() < deadline {
        crate::arch::pause();
    }
}

/// Busy-wait for at least `us` microseconds.
pub fn sleep_us(us: u64) {
    let interval = interval_us().max(1) as u64;
    sleep_ticks(us.div_ceil(interval));
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    // One counter per test; the harness runs tests concurrently and the
    // callbacks are plain fn pointers, so they can't capture locals.
    static FIRED_EVERY: AtomicUsize = AtomicUsize::new(0);
    static FIRED_INTERVAL: AtomicUsize = AtomicUsize::new(0);
    static FIRED_ONESHOT: AtomicUsize = AtomicUsize::new(0);
    static FIRED_COARSE: AtomicUsize = AtomicUsize::new(0);

    fn count_every(_frame: &mut InterruptFrame, _arg: usize) {
        FIRED_EVERY.fetch_add(1, Ordering::SeqCst);
    }

    fn count_interval(_frame: &mut InterruptFrame, _arg: usize) {
        FIRED_INTERVAL.fetch_add(1, Ordering::SeqCst);
    }

    fn count_oneshot(_frame: &mut InterruptFrame, _arg: usize) {
        FIRED_ONESHOT.fetch_add(1, Ordering::SeqCst);
    }

    fn count_coarse(_frame: &mut InterruptFrame, _arg: usize) {
        FIRED_COARSE.fetch_add(1, Ordering::SeqCst);
    }

    fn other(_frame: &mut InterruptFrame, _arg: usize) {}

    fn frame() -> InterruptFrame {
        InterruptFrame::zeroed()
    }

    #[test]
    fn divisor_rounds_to_nearest() {
        // (1193182 * 1000 + 500000) / 1000000 == 1193
        assert_eq!(divisor_for_interval_us(1000), 1193);
        // (1193182 * 100 + 500000) / 1000000 == 119
        assert_eq!(divisor_for_interval_us(100), 119);
        assert_eq!(divisor_for_interval_us(10_000), 11_932);
    }

    #[test]
    fn every_tick_fires_each_time() {
        let mut table = TimerTable::new();
        assert!(table.subscribe(count_every, 1, TimerTrigger::EveryTick, 0));

        let mut f = frame();
        for tick in 1..=5u64 {
            table.run_tick(tick * 1000, &mut f);
        }
        assert_eq!(FIRED_EVERY.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn interval_fires_at_period_and_rearms() {
        let mut table = TimerTable::new();
        assert!(table.subscribe(count_interval, 2, TimerTrigger::Interval(3000), 0));

        let mut f = frame();
        for tick in 1..=9u64 {
            table.run_tick(tick * 1000, &mut f);
        }
        // Fires at 3000, 6000, 9000.
        assert_eq!(FIRED_INTERVAL.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn one_shot_fires_once_then_deactivates() {
        let mut table = TimerTable::new();
        assert!(table.subscribe(count_oneshot, 3, TimerTrigger::OneShot(2500), 0));

        let mut f = frame();
        for tick in 1..=6u64 {
            table.run_tick(tick * 1000, &mut f);
        }
        assert_eq!(FIRED_ONESHOT.load(Ordering::SeqCst), 1);
        assert_eq!(table.active_count(), 0);
    }

    #[test]
    fn table_rejects_overflow() {
        let mut table = TimerTable::new();
        for arg in 0..MAX_HANDLERS {
            assert!(table.subscribe(other, arg, TimerTrigger::EveryTick, 0));
        }
        assert!(!table.subscribe(other, 99, TimerTrigger::EveryTick, 0));
    }

    #[test]
    fn unsubscribe_matches_callback_and_arg() {
        let mut table = TimerTable::new();
        assert!(table.subscribe(other, 1, TimerTrigger::EveryTick, 0));
        assert!(table.subscribe(other, 2, TimerTrigger::EveryTick, 0));

        // Wrong arg: no match.
        assert!(!table.unsubscribe(other, 3));
        assert_eq!(table.active_count(), 2);

        assert!(table.unsubscribe(other, 1));
        assert_eq!(table.active_count(), 1);
        assert!(!table.unsubscribe(other, 1));
    }

    #[test]
    fn interval_accounts_for_coarse_ticks() {
        // A 2500 us period on a 1000 us tick fires at 3000, then 6000: at
        // least ceil(period / interval) ticks elapse between firings.
        let mut table = TimerTable::new();
        assert!(table.subscribe(count_coarse, 4, TimerTrigger::Interval(2500), 0));

        let mut f = frame();
        let mut fire_ticks = alloc::vec::Vec::new();
        for tick in 1..=6u64 {
            let before = FIRED_COARSE.load(Ordering::SeqCst);
            table.run_tick(tick * 1000, &mut f);
            if FIRED_COARSE.load(Ordering::SeqCst) > before {
                fire_ticks.push(tick);
            }
        }
        assert_eq!(fire_ticks, alloc::vec![3, 6]);
    }
}
