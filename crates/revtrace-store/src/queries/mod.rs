pub mod access_checks;
pub mod alerts;
pub mod connections;
pub mod detector_runs;
pub mod entitlements;
pub mod events;
pub mod identities;
pub mod issues;
pub mod orgs;
pub mod raw_log;
pub mod users;
