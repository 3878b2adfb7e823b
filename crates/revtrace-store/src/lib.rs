// Org-scoped relational store over SQLite
// The canonical event log is the source of truth; everything else projects from it

mod db;
mod error;
pub mod queries;
mod records;
pub mod schema;

pub use db::Database;
pub use error::{Error, Result};
pub use records::{
    AlertConfigRecord, AlertDeliveryRecord, ConnectionHealth, ConnectionRecord,
    DeliveryOutcome, DetectorRunRecord, OrgRecord, RawWebhookRecord,
};
