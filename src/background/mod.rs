//! Periodic engine work: reminders, escalation, and the cycle that drives them.

pub mod escalation;
pub mod reminders;
pub mod runner;
pub mod scheduler;

pub use escalation::{run_escalation, EscalationReport};
pub use reminders::{run_reminders, ReminderItem, ReminderReport};
pub use runner::{CycleReport, CycleRunner};
pub use scheduler::{run_once, start_background_scheduler, SchedulerHandle};
