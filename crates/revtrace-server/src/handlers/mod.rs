pub mod access_checks;
pub mod dashboard;
pub mod issues;
pub mod webhooks;
