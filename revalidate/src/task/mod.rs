//! Background task plumbing: tracked timers and single-flight coalescing.

pub mod collapse;
pub mod timer;

pub use collapse::{CollapsedTask, CollapsedTaskCreator, DEFAULT_COLLAPSE_WINDOW};
pub use timer::{TimerHandle, TimerSet};
