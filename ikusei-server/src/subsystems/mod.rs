pub mod auth;
pub mod dashboard;
pub mod files;
pub mod records;
pub mod sessions;
pub mod workers;
