use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::optimistic::Identified;

/// Backend tables the console reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
  Properties,
  Units,
  Leases,
  Payments,
  MaintenanceRequests,
}

impl Table {
  pub fn name(self) -> &'static str {
    match self {
      Table::Properties => "properties",
      Table::Units => "units",
      Table::Leases => "leases",
      Table::Payments => "payments",
      Table::MaintenanceRequests => "maintenance_requests",
    }
  }

  /// Newest-first ordering used for listings
  pub fn order(self) -> &'static str {
    match self {
      Table::Payments => "paid_at.desc",
      _ => "created_at.desc",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
  pub id: String,
  pub name: String,
  pub address: String,
  pub owner_id: String,
  #[serde(default)]
  pub unit_count: u32,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
  pub id: String,
  pub property_id: String,
  pub label: String,
  /// Monthly rent in minor currency units
  pub rent_amount: i64,
  #[serde(default)]
  pub occupied: bool,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
  Active,
  Pending,
  Expired,
  Terminated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
  pub id: String,
  pub unit_id: String,
  pub tenant_id: String,
  pub start_date: NaiveDate,
  pub end_date: Option<NaiveDate>,
  pub rent_amount: i64,
  pub status: LeaseStatus,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
  Pending,
  Completed,
  Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
  pub id: String,
  pub lease_id: String,
  pub amount: i64,
  pub status: PaymentStatus,
  pub reference: Option<String>,
  pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceStatus {
  Open,
  InProgress,
  Resolved,
}

impl MaintenanceStatus {
  pub fn label(self) -> &'static str {
    match self {
      MaintenanceStatus::Open => "open",
      MaintenanceStatus::InProgress => "in progress",
      MaintenanceStatus::Resolved => "resolved",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceRequest {
  pub id: String,
  pub unit_id: String,
  pub title: String,
  pub description: Option<String>,
  pub status: MaintenanceStatus,
  pub created_at: DateTime<Utc>,
}

/// Row sent when a tenant reports a problem
#[derive(Debug, Clone, Serialize)]
pub struct NewMaintenanceRequest {
  pub unit_id: String,
  pub title: String,
  pub status: MaintenanceStatus,
}

/// Partial update sent when a request changes status
#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceStatusPatch {
  pub status: MaintenanceStatus,
}

impl Identified for MaintenanceRequest {
  type Id = String;

  fn id(&self) -> &String {
    &self.id
  }
}
