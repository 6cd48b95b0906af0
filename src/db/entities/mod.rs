//! SeaORM entities for the monitoring schema.
//!
//! Each entity maps to one table; `prelude` re-exports the generated types
//! under unambiguous names.

pub mod check;
pub mod incident;
pub mod monitor;
pub mod user;

pub mod prelude {
    pub use super::user::Entity as User;
    pub use super::user::Model as UserModel;
    pub use super::user::ActiveModel as UserActiveModel;
    pub use super::user::Column as UserColumn;

    pub use super::monitor::Entity as Monitor;
    pub use super::monitor::Model as MonitorModel;
    pub use super::monitor::ActiveModel as MonitorActiveModel;
    pub use super::monitor::Column as MonitorColumn;

    pub use super::check::Entity as Check;
    pub use super::check::Model as CheckModel;
    pub use super::check::ActiveModel as CheckActiveModel;
    pub use super::check::Column as CheckColumn;

    pub use super::incident::Entity as Incident;
    pub use super::incident::Model as IncidentModel;
    pub use super::incident::ActiveModel as IncidentActiveModel;
    pub use super::incident::Column as IncidentColumn;
}
