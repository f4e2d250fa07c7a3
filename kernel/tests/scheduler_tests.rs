//! Scheduler integration tests: preemption driven through the timer
//! subscription table, the way the tick handler drives it on hardware.

use obsidian_kernel::irq::context::InterruptFrame;
use obsidian_kernel::sched::{Scheduler, TaskState, DEFAULT_STACK_SIZE, TERMINATION_SENTINEL};
use obsidian_kernel::timer::{TimerTable, TimerTrigger};

fn noop() {}

fn live_frame() -> InterruptFrame {
    let mut frame = InterruptFrame::zeroed();
    frame.ebp = 0x8000_0000;
    frame
}

#[test]
fn every_ready_task_runs_within_n_slices() {
    let mut sched = Scheduler::new();
    for _ in 0..5 {
        sched.create_task("worker", noop, DEFAULT_STACK_SIZE);
    }

    let mut frame = live_frame();
    let mut seen = [false; 5];

    // N slices are enough to dispatch each of the N READY tasks once.
    for _ in 0..5 {
        sched.schedule(&mut frame);
        frame.ebp = 0x8000_0000;
        frame.eax = 0;
        let id = sched.current_task_id().unwrap();
        seen[(id - 1) as usize] = true;
    }
    assert!(seen.iter().all(|&s| s));
}

#[test]
fn preemption_through_timer_interval() {
    // The scheduler subscribes to the tick with an Interval trigger; model
    // a 10 ms slice on a 1 ms tick and count dispatches.
    static DISPATCHES: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

    fn preempt(_frame: &mut InterruptFrame, _arg: usize) {
        DISPATCHES.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    let mut table = TimerTable::new();
    assert!(table.subscribe(preempt, 0, TimerTrigger::Interval(10_000), 0));

    let mut frame = live_frame();
    for tick in 1..=100u64 {
        table.run_tick(tick * 1000, &mut frame);
    }
    // 100 ms of ticks with a 10 ms slice: exactly 10 preemptions.
    assert_eq!(DISPATCHES.load(std::sync::atomic::Ordering::SeqCst), 10);
}

#[test]
fn terminated_task_never_runs_again() {
    let mut sched = Scheduler::new();
    sched.create_task("idle", noop, DEFAULT_STACK_SIZE);
    sched.create_task("short-lived", noop, DEFAULT_STACK_SIZE);

    let mut frame = live_frame();

    // Run until the short-lived task (id 2) is on the CPU.
    sched.schedule(&mut frame);
    while sched.current_task_id() != Some(2) {
        frame.ebp = 0x8000_0000;
        frame.eax = 0;
        sched.schedule(&mut frame);
    }

    // Its entry returns; the trampoline parks with the sentinel registers.
    frame.eax = TERMINATION_SENTINEL;
    frame.ebp = 0;
    sched.schedule(&mut frame);
    assert_eq!(sched.task_state(2), Some(TaskState::Terminated));

    // Fifty more slices: only the idle task ever runs.
    for _ in 0..50 {
        frame.ebp = 0x8000_0000;
        frame.eax = 0;
        sched.schedule(&mut frame);
        assert_eq!(sched.current_task_id(), Some(1));
    }
}

#[test]
fn block_and_unblock_round_trip() {
    let mut sched = Scheduler::new();
    sched.create_task("idle", noop, DEFAULT_STACK_SIZE);
    sched.create_task("sleeper", noop, DEFAULT_STACK_SIZE);

    let mut frame = live_frame();
    sched.schedule(&mut frame);
    while sched.current_task_id() != Some(2) {
        frame.ebp = 0x8000_0000;
        sched.schedule(&mut frame);
    }

    sched.block_current();
    sched.schedule(&mut frame);
    frame.ebp = 0x8000_0000;
    assert_eq!(sched.current_task_id(), Some(1));
    assert_eq!(sched.task_state(2), Some(TaskState::Blocked));

    // Blocked tasks are skipped for as long as they stay blocked.
    for _ in 0..10 {
        sched.schedule(&mut frame);
        frame.ebp = 0x8000_0000;
        assert_eq!(sched.current_task_id(), Some(1));
    }

    sched.unblock(2);
    sched.schedule(&mut frame);
    assert_eq!(sched.current_task_id(), Some(2));
}
