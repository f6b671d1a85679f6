mod cached_client;
mod client;
mod keys;
#[cfg(test)]
pub mod stub;
mod types;

pub use cached_client::CachedBackend;
pub use client::BackendClient;
pub use keys::BackendQueryKey;
pub use types::{
  Lease, LeaseStatus, MaintenanceRequest, MaintenanceStatus, MaintenanceStatusPatch, NewMaintenanceRequest,
  Payment, PaymentStatus, Property, Table, Unit,
};
