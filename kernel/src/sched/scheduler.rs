//! Round-robin scheduling over the shared kernel address space.
//!
//! The scheduler piggybacks on interrupt dispatch: its PIT subscription
//! (and the yield vector's handler) receive the outgoing task's complete
//! [`InterruptFrame`] on the kernel stack and overwrite it with the
//! incoming task's saved frame, so the dispatcher's `iret` lands in the
//! chosen task. No separate context-switch primitive exists.
//!
//! All methods run either during single-threaded boot or inside an
//! interrupt handler with interrupts disabled, which is the only locking
//! discipline the single-CPU design needs; the spin mutex simply makes
//! that explicit.

#[cfg(feature = "alloc")]
extern crate alloc;

use alloc::vec::Vec;

use spin::Mutex;

use super::task::{Task, TaskEntry, TaskState, DEFAULT_STACK_SIZE};
use crate::irq::context::InterruptFrame;
use crate::irq::YIELD_VECTOR;
use crate::timer::TimerTrigger;

/// Preemption quantum used by `init` callers that have no opinion.
pub const DEFAULT_TIME_SLICE_MS: u32 = 10;

/// Scheduler state. One instance serves the boot processor; the host tests
/// drive private instances.
pub struct Scheduler {
    tasks: Vec<Task>,
    current: usize,
    next_id: u32,
    initialized: bool,
    time_slice_ms: u32,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tasks: Vec::new(),
            current: 0,
            next_id: 1,
            initialized: false,
            time_slice_ms: DEFAULT_TIME_SLICE_MS,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn time_slice_ms(&self) -> u32 {
        self.time_slice_ms
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Add a task and return its id.
    pub fn create_task(
        &mut self,
        name: &'static str,
        entry: TaskEntry,
        stack_size: usize,
    ) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        let task = Task::new(id, name, entry, stack_size);
        log::info!(
            "task {id} ({name}): stack {:#010x}..{:#010x}",
            task.stack_base(),
            task.stack_base() + task.stack_size()
        );
        self.tasks.push(task);
        id
    }

    /// Id of the task occupying the CPU.
    pub fn current_task_id(&self) -> Option<u32> {
        self.tasks.get(self.current).map(|task| task.id)
    }

    /// State of a task, by id.
    pub fn task_state(&self, id: u32) -> Option<TaskState> {
        self.tasks.iter().find(|task| task.id == id).map(|task| task.state)
    }

    /// The core switch: save the outgoing frame, pick the next READY task
    /// round-robin, restore its frame over `ctx`.
    pub fn schedule(&mut self, ctx: &mut InterruptFrame) {
        if self.tasks.is_empty() {
            return;
        }

        // Save the outgoing task. A task that was BLOCKED or TERMINATED
        // under its feet keeps its previously saved frame.
        if let Some(current) = self.tasks.get_mut(self.current) {
            if current.state == TaskState::Running {
                current.ctx = *ctx;
                current.stack_ptr = ctx as *const InterruptFrame as usize;

                if Task::is_termination_frame(ctx) {
                    current.state = TaskState::Terminated;
                    log::info!("task {} ({}) terminated", current.id, current.name);
                } else {
                    current.state = TaskState::Ready;
                }
            }
        }

        // Pick the next READY task, scanning circularly from the
        // successor of the current slot.
        let start = self.current;
        loop {
            self.current = (self.current + 1) % self.tasks.len();

            let candidate = &mut self.tasks[self.current];
            if candidate.state == TaskState::Ready {
                candidate.state = TaskState::Running;
                *ctx = candidate.ctx;
                return;
            }

            if self.current == start {
                break;
            }
        }

        // Nothing READY: stay on the current task if it is still viable.
        // The idle task never blocks, so this only happens when the
        // current task was the sole runnable one.
        let current = &mut self.tasks[self.current];
        if current.state == TaskState::Ready {
            current.state = TaskState::Running;
            *ctx = current.ctx;
        }
    }

    /// Park the current task. Takes effect at the next reschedule.
    pub fn block_current(&mut self) {
        if let Some(current) = self.tasks.get_mut(self.current) {
            if current.state == TaskState::Running {
                current.state = TaskState::Blocked;
            }
        }
    }

    /// Wake a blocked task.
    pub fn unblock(&mut self, id: u32) {
        if let Some(task) = self.tasks.iter_mut().find(|task| task.id == id) {
            if task.state == TaskState::Blocked {
                task.state = TaskState::Ready;
            }
        }
    }

    /// Retire the current task. Takes effect at the next reschedule.
    pub fn terminate_current(&mut self) {
        if let Some(current) = self.tasks.get_mut(self.current) {
            current.state = TaskState::Terminated;
            log::info!("task {} ({}) terminated", current.id, current.name);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Kernel-wide instance
// ---------------------------------------------------------------------------

static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());

fn idle_entry() {
    loop {
        crate::arch::pause();
    }
}

/// PIT subscription: preempt on the time-slice interval.
fn preempt_callback(frame: &mut InterruptFrame, _arg: usize) {
    SCHEDULER.lock().schedule(frame);
}

/// Vector-33 handler: voluntary yield through the same switch path.
fn yield_isr(frame: &mut InterruptFrame) {
    SCHEDULER.lock().schedule(frame);
}

/// Bring up the scheduler: subscribe to the tick, install the yield
/// vector, create the idle task and the kernel main task.
pub fn init(entry: TaskEntry, time_slice_ms: u32) {
    crate::arch::without_interrupts(|| {
        let mut sched = SCHEDULER.lock();
        if sched.initialized {
            return;
        }
        sched.time_slice_ms = time_slice_ms;

        let subscribed = crate::timer::register_handler(
            preempt_callback,
            0,
            TimerTrigger::Interval(time_slice_ms as u64 * 1000),
        );
        assert!(subscribed, "PIT subscription table full");

        crate::irq::register_isr(YIELD_VECTOR, yield_isr);

        sched.create_task("idle", idle_entry, DEFAULT_STACK_SIZE);
        sched.create_task("kernel", entry, DEFAULT_STACK_SIZE);

        sched.initialized = true;
        log::info!("scheduler ready, {time_slice_ms} ms time slice");
    });
}

/// Whether `init` has completed.
pub fn is_initialized() -> bool {
    SCHEDULER.lock().is_initialized()
}

/// Create a task on the kernel scheduler.
pub fn create_task(name: &'static str, entry: TaskEntry, stack_size: usize) -> u32 {
    crate::arch::without_interrupts(|| SCHEDULER.lock().create_task(name, entry, stack_size))
}

/// Id of the task occupying the CPU.
pub fn current_task_id() -> Option<u32> {
    SCHEDULER.lock().current_task_id()
}

/// Run the switch on an interrupt frame (used by handlers and tests).
pub fn schedule_frame(frame: &mut InterruptFrame) {
    SCHEDULER.lock().schedule(frame);
}

/// Park the current task and give up the CPU.
pub fn block_current() {
    SCHEDULER.lock().block_current();
    yield_now();
}

/// Wake a blocked task.
pub fn unblock(id: u32) {
    SCHEDULER.lock().unblock(id);
}

/// Voluntarily give up the CPU.
///
/// Raises the yield vector; the switch happens inside the interrupt
/// dispatcher where the full frame is on the stack.
pub fn yield_now() {
    if !is_initialized() {
        return;
    }
    crate::arch::raise_yield_interrupt();
}
