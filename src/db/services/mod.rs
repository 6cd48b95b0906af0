//! The `services` module provides a high-level API for interacting with the
//! database. It encapsulates the query and transaction logic so the
//! monitoring pipeline and the notification layer can work with domain
//! models without writing SQL themselves.

pub mod check_service;
pub mod incident_service;
pub mod monitor_service;
pub mod statistics_service;
