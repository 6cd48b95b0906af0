//! The monitoring engine: probe execution, incident reconciliation and the
//! scheduling machinery that drives both.

pub mod clock;
pub mod incident;
pub mod probe;
pub mod runner;
pub mod scheduler;
pub mod tls;
