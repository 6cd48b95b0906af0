pub mod config;
pub mod db;
pub mod monitoring;
pub mod notifications;
pub mod version;
