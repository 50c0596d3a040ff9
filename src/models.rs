use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_STAFF: &str = "staff";

pub const APPOINTMENT_CONFIRMED: &str = "confirmed";
pub const APPOINTMENT_CANCELLED: &str = "cancelled";

pub const HISTORY_CREATED: &str = "created";
pub const HISTORY_STATUS_CHANGED: &str = "status_changed";
pub const HISTORY_BUDGET_CHANGED: &str = "budget_status_changed";
pub const HISTORY_PHOTO_ADDED: &str = "photo_added";
pub const HISTORY_RECONCILED: &str = "reconciled";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Repair,
    Maintenance,
    Installation,
}

impl ServiceType {
    pub const ALL: [ServiceType; 3] = [
        ServiceType::Repair,
        ServiceType::Maintenance,
        ServiceType::Installation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Repair => "repair",
            ServiceType::Maintenance => "maintenance",
            ServiceType::Installation => "installation",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ServiceType::Repair => "Repair",
            ServiceType::Maintenance => "Maintenance",
            ServiceType::Installation => "Installation",
        }
    }
}

impl FromStr for ServiceType {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == value.trim())
            .ok_or_else(|| UnknownValue {
                kind: "service type",
                value: value.to_string(),
            })
    }
}

/// Lifecycle of the job itself. Independent of [`BudgetStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Pending,
    Active,
    Completed,
}

impl ServiceStatus {
    pub const ALL: [ServiceStatus; 3] = [
        ServiceStatus::Pending,
        ServiceStatus::Active,
        ServiceStatus::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceStatus::Pending => "pending",
            ServiceStatus::Active => "active",
            ServiceStatus::Completed => "completed",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ServiceStatus::Pending => "Pending",
            ServiceStatus::Active => "Active",
            ServiceStatus::Completed => "Completed",
        }
    }
}

impl FromStr for ServiceStatus {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == value.trim())
            .ok_or_else(|| UnknownValue {
                kind: "service status",
                value: value.to_string(),
            })
    }
}

/// Approval state of the quoted price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BudgetStatus {
    Pending,
    Approved,
    Rejected,
}

impl BudgetStatus {
    pub const ALL: [BudgetStatus; 3] = [
        BudgetStatus::Pending,
        BudgetStatus::Approved,
        BudgetStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BudgetStatus::Pending => "pending",
            BudgetStatus::Approved => "approved",
            BudgetStatus::Rejected => "rejected",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BudgetStatus::Pending => "Pending",
            BudgetStatus::Approved => "Approved",
            BudgetStatus::Rejected => "Rejected",
        }
    }
}

impl FromStr for BudgetStatus {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == value.trim())
            .ok_or_else(|| UnknownValue {
                kind: "budget status",
                value: value.to_string(),
            })
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for BudgetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub password_hash: String,
    pub active: i64,
    pub created_at: String,
}

/// Database shape of a service order; photos live in their own table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceOrderRow {
    pub id: String,
    pub client_name: String,
    pub phone: String,
    pub address: String,
    pub service_type: ServiceType,
    pub due_date: String,
    pub status: ServiceStatus,
    pub budget_cents: i64,
    pub budget_status: BudgetStatus,
    pub user_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOrder {
    pub id: String,
    pub client_name: String,
    pub phone: String,
    pub address: String,
    pub service_type: ServiceType,
    pub due_date: String,
    pub status: ServiceStatus,
    pub budget_cents: i64,
    pub budget_status: BudgetStatus,
    pub photos: Vec<String>,
    pub user_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ServiceOrder {
    pub fn from_row(row: ServiceOrderRow, photos: Vec<String>) -> Self {
        Self {
            id: row.id,
            client_name: row.client_name,
            phone: row.phone,
            address: row.address,
            service_type: row.service_type,
            due_date: row.due_date,
            status: row.status,
            budget_cents: row.budget_cents,
            budget_status: row.budget_status,
            photos,
            user_id: row.user_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceHistoryRow {
    pub id: String,
    pub service_id: String,
    pub action: String,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub actor_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: String,
    pub client_name: String,
    pub contact: String,
    pub service_id: String,
    pub service_text: String,
    pub date: String,
    pub time: String,
    pub status: String,
    pub created_at: String,
}

/// Bookable offering shown on the public pages.
#[derive(Debug, Clone, Serialize)]
pub struct Offering {
    pub id: &'static str,
    pub title: &'static str,
    pub price: &'static str,
    pub description: &'static str,
    pub selected: bool,
}

impl Offering {
    pub fn service_text(&self) -> String {
        format!("{} - {}", self.title, self.price)
    }
}

pub fn offering_catalog() -> Vec<Offering> {
    vec![
        Offering {
            id: "repair-visit",
            title: "Repair visit",
            price: "$60",
            description: "On-site diagnosis and repair of furniture and wooden structures.",
            selected: false,
        },
        Offering {
            id: "maintenance-check",
            title: "Maintenance check",
            price: "$45",
            description: "Preventive and corrective maintenance of furniture and fittings.",
            selected: false,
        },
        Offering {
            id: "installation-consult",
            title: "Installation consult",
            price: "$30",
            description: "Measurements and quote for new furniture, floors or structures.",
            selected: false,
        },
    ]
}

pub fn find_offering(id: &str) -> Option<Offering> {
    offering_catalog()
        .into_iter()
        .find(|offering| offering.id == id.trim())
}

/// Renders minor units as `1234.50`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{sign}{}.{:02}", cents / 100, cents % 100)
}
