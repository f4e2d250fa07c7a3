//! Preemptive round-robin task scheduler.
//!
//! One shared kernel address space, one task vector, one `current` index.
//! Preemption rides the PIT tick service; voluntary yields go through a
//! software interrupt so both paths converge on the same saved-frame
//! rewrite inside the interrupt dispatcher.

pub mod scheduler;
pub mod task;

pub use scheduler::{
    block_current, create_task, current_task_id, init, is_initialized, schedule_frame, unblock,
    yield_now, Scheduler, DEFAULT_TIME_SLICE_MS,
};
pub use task::{Task, TaskEntry, TaskState, DEFAULT_STACK_SIZE, TERMINATION_SENTINEL};
