//! Role to capability mapping checked at the HTTP boundary.

use crate::errors::AppError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Staff,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Staff => "staff",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "staff" => Ok(Role::Staff),
            "viewer" => Ok(Role::Viewer),
            other => Err(AppError::Unauthorized(format!("Unknown role '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ViewRecords,
    ManageLeads,
    ConvertLeads,
    ManageCustomers,
    ManageProposals,
    SendProposals,
    ConvertProposals,
    ManageProjects,
    ManageInvoices,
    RecordPayments,
    ManageSubcontractors,
    ReviewSubcontractors,
    DeleteRecords,
}

const STAFF: &[Capability] = &[
    Capability::ViewRecords,
    Capability::ManageLeads,
    Capability::ManageProposals,
    Capability::SendProposals,
    Capability::ManageProjects,
];

const MANAGER_EXTRA: &[Capability] = &[
    Capability::ConvertLeads,
    Capability::ManageCustomers,
    Capability::ConvertProposals,
    Capability::ManageInvoices,
    Capability::RecordPayments,
    Capability::ManageSubcontractors,
];

const ADMIN_EXTRA: &[Capability] = &[Capability::ReviewSubcontractors, Capability::DeleteRecords];

/// Everything a role may do. Roles are cumulative: each includes the one below it.
pub fn capabilities(role: Role) -> HashSet<Capability> {
    let layers: &[&[Capability]] = match role {
        Role::Viewer => &[&[Capability::ViewRecords]],
        Role::Staff => &[STAFF],
        Role::Manager => &[STAFF, MANAGER_EXTRA],
        Role::Admin => &[STAFF, MANAGER_EXTRA, ADMIN_EXTRA],
    };
    layers.iter().flat_map(|layer| layer.iter().copied()).collect()
}

/// The authenticated staff member behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn can(&self, capability: Capability) -> bool {
        capabilities(self.role).contains(&capability)
    }

    pub fn require(&self, capability: Capability) -> Result<(), AppError> {
        if self.can(capability) {
            return Ok(());
        }
        tracing::warn!(
            "Actor {} ({}) denied {:?}",
            self.id,
            self.role,
            capability
        );
        Err(AppError::Forbidden(format!(
            "Role '{}' may not perform this operation",
            self.role
        )))
    }
}
