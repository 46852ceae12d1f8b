pub mod reminders;
pub mod rubrics;
