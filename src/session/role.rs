use serde::{Deserialize, Serialize};

/// Account role, as reported by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  Admin,
  Landlord,
  PropertyManager,
  Tenant,
}

impl Role {
  /// Roles that manage money or other people's data get the shorter idle timeout.
  pub fn is_elevated(self) -> bool {
    matches!(self, Role::Admin | Role::Landlord | Role::PropertyManager)
  }

  pub fn label(self) -> &'static str {
    match self {
      Role::Admin => "admin",
      Role::Landlord => "landlord",
      Role::PropertyManager => "property manager",
      Role::Tenant => "tenant",
    }
  }
}
