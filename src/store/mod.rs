//! Persistence layer — libSQL-backed storage for records and reminders.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlFinanceStore;
pub use traits::{FinanceStore, FinancialRecord, NewRecord, NewReminder, Reminder};
