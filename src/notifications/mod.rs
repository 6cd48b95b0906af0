pub mod content;
pub mod dispatcher;
pub mod models;
pub mod senders;
