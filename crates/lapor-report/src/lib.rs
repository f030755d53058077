//! # Lapor Report
//!
//! Treasurer ledger → WhatsApp notifications.
//!
//! An edit on the ledger sheet becomes a [`EditEvent`]. The [`ReportProducer`]
//! filters it (sheet, header rows, trigger column, completeness), decides
//! whether the row is new or an update from the last-processed marker, and
//! queues the formatted message with the standard delay.

pub mod format;
pub mod producer;
pub mod row;

pub use format::{TEST_MESSAGE, error_message, financial_message, format_money, summary_message};
pub use producer::{EditOutcome, ReportProducer};
pub use row::{EditEvent, LedgerRow};
