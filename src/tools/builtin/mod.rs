//! Built-in finance actions.

pub mod record;
pub mod reminder;
pub mod suppress;
pub mod urgent;

pub use record::StoreRecordTool;
pub use reminder::ScheduleReminderTool;
pub use suppress::SuppressReplyTool;
pub use urgent::SendUrgentAlertTool;
