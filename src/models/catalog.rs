//! Reference data owned by the catalog side of the system. The booking core
//! only ever reads these.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourtType {
    pub id: String,
    pub name: String,
    pub slot_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Court {
    pub id: String,
    pub branch_id: String,
    pub court_type_id: String,
    pub name: String,
    /// Minor currency units per hour.
    pub price_per_hour: i64,
    /// Raw `HH:mm` strings as entered in the catalog; may be missing or malformed.
    pub open_time: Option<String>,
    pub close_time: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceUnit {
    Hour,
    Use,
    Free,
}

impl ServiceUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceUnit::Hour => "hour",
            ServiceUnit::Use => "use",
            ServiceUnit::Free => "free",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hour" => Some(ServiceUnit::Hour),
            "use" => Some(ServiceUnit::Use),
            "free" => Some(ServiceUnit::Free),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: String,
    pub branch_id: String,
    pub name: String,
    pub unit: ServiceUnit,
    pub price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
}
