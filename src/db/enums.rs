use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "monitor_status_enum")]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    #[sea_orm(string_value = "up")]
    Up,
    #[sea_orm(string_value = "down")]
    Down,
    #[sea_orm(string_value = "paused")]
    Paused,
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "monitor_protocol_enum")]
#[serde(rename_all = "lowercase")]
pub enum MonitorProtocol {
    #[sea_orm(string_value = "http")]
    Http,
    #[sea_orm(string_value = "https")]
    Https,
}

impl fmt::Display for MonitorProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "incident_status_enum")]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    #[sea_orm(string_value = "ongoing")]
    Ongoing,
    #[sea_orm(string_value = "resolved")]
    Resolved,
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// Coarse failure categories recorded with failed checks, derived from the
/// transport error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "check_error_type_enum")]
#[serde(rename_all = "lowercase")]
pub enum CheckErrorType {
    #[sea_orm(string_value = "timeout")]
    Timeout,
    #[sea_orm(string_value = "dns")]
    Dns,
    #[sea_orm(string_value = "ssl")]
    Ssl,
    #[sea_orm(string_value = "connection")]
    Connection,
    #[sea_orm(string_value = "unknown")]
    Unknown,
}

impl fmt::Display for CheckErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}
