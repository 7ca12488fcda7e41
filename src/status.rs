//! Status machines for every state-carrying record and the checks that guard them.
//!
//! Each status enum implements [`StatusMachine`]. Services call [`plan_transition`]
//! before writing; the store then applies the change with a compare-and-set on the
//! status that was planned from, so a racing writer surfaces as a conflict instead of
//! silently overwriting.

use crate::errors::AppError;
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub trait StatusMachine: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Record name used in error messages.
    const ENTITY: &'static str;

    /// Whether a plain status edit may move from `self` to `to`.
    fn can_transition(self, to: Self) -> bool;

    fn is_terminal(self) -> bool;

    fn as_str(self) -> &'static str;
}

/// Outcome of validating a requested status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<S> {
    /// Requested status equals the current one; nothing to write.
    Unchanged,
    Move { from: S, to: S },
}

/// Validates `from -> to` against the machine for `S`.
///
/// # Errors
///
/// * `AppError::Conflict` - naming the illegal pair.
pub fn plan_transition<S: StatusMachine>(from: S, to: S) -> Result<Transition<S>, AppError> {
    if from == to {
        return Ok(Transition::Unchanged);
    }
    if !from.can_transition(to) {
        tracing::warn!("Rejected {} transition {} -> {}", S::ENTITY, from, to);
        return Err(AppError::Conflict(format!(
            "Illegal {} status transition: {} -> {}",
            S::ENTITY,
            from,
            to
        )));
    }
    Ok(Transition::Move { from, to })
}

macro_rules! status_strings {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            fn text(self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.text())
            }
        }

        impl FromStr for $ty {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    other => Err(AppError::Validation(format!(
                        "Unknown {} status '{}'",
                        <$ty as StatusMachine>::ENTITY,
                        other
                    ))),
                }
            }
        }
    };
}

// ============ Lead ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "lead_status", rename_all = "lowercase")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Proposal,
    Negotiation,
    Won,
    Lost,
}

status_strings!(LeadStatus {
    New => "new",
    Contacted => "contacted",
    Qualified => "qualified",
    Proposal => "proposal",
    Negotiation => "negotiation",
    Won => "won",
    Lost => "lost",
});

impl LeadStatus {
    /// Only open leads may be converted into a customer.
    pub fn can_convert(self) -> bool {
        !self.is_terminal()
    }
}

impl StatusMachine for LeadStatus {
    const ENTITY: &'static str = "lead";

    /// `won` is never reachable here; it is set only by lead conversion, together with
    /// the customer it produces.
    fn can_transition(self, to: Self) -> bool {
        use LeadStatus::*;
        match (self, to) {
            (_, Won) => false,
            (from, Lost) => !from.is_terminal(),
            (New, Contacted)
            | (Contacted, Qualified)
            | (Qualified, Proposal)
            | (Proposal, Negotiation) => true,
            _ => false,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, LeadStatus::Won | LeadStatus::Lost)
    }

    fn as_str(self) -> &'static str {
        self.text()
    }
}

/// Rejects a manual status edit to `won` with a message pointing at conversion.
pub fn ensure_manual_lead_status(to: LeadStatus) -> Result<(), AppError> {
    if to == LeadStatus::Won {
        return Err(AppError::Conflict(
            "A lead can only become won by converting it into a customer".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "lead_priority", rename_all = "lowercase")]
pub enum LeadPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Default for LeadPriority {
    fn default() -> Self {
        LeadPriority::Medium
    }
}

// ============ Proposal ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "proposal_status", rename_all = "lowercase")]
pub enum ProposalStatus {
    Draft,
    Sent,
    Viewed,
    Accepted,
    Declined,
}

status_strings!(ProposalStatus {
    Draft => "draft",
    Sent => "sent",
    Viewed => "viewed",
    Accepted => "accepted",
    Declined => "declined",
});

impl StatusMachine for ProposalStatus {
    const ENTITY: &'static str = "proposal";

    fn can_transition(self, to: Self) -> bool {
        use ProposalStatus::*;
        match (self, to) {
            // forward
            (Draft, Sent) | (Sent, Viewed) => true,
            (Viewed, Accepted | Declined) => true,
            // administrative rollback while still open
            (Sent, Draft) | (Viewed, Sent) | (Viewed, Draft) => true,
            _ => false,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, ProposalStatus::Accepted | ProposalStatus::Declined)
    }

    fn as_str(self) -> &'static str {
        self.text()
    }
}

/// Accepted proposals are immutable apart from their status.
pub fn ensure_proposal_editable(status: ProposalStatus) -> Result<(), AppError> {
    if status == ProposalStatus::Accepted {
        return Err(AppError::Conflict(
            "Accepted proposals cannot be modified".to_string(),
        ));
    }
    Ok(())
}

pub fn ensure_proposal_deletable(status: ProposalStatus) -> Result<(), AppError> {
    if status == ProposalStatus::Accepted {
        return Err(AppError::Conflict(
            "Accepted proposals cannot be deleted".to_string(),
        ));
    }
    Ok(())
}

// ============ Project ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "project_status", rename_all = "lowercase")]
pub enum ProjectStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

status_strings!(ProjectStatus {
    Pending => "pending",
    Active => "active",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl StatusMachine for ProjectStatus {
    const ENTITY: &'static str = "project";

    fn can_transition(self, to: Self) -> bool {
        use ProjectStatus::*;
        matches!(
            (self, to),
            (Pending, Active)
                | (Active, Completed)
                | (Active, Cancelled)
                | (Cancelled, Active)
        )
    }

    fn is_terminal(self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Cancelled)
    }

    fn as_str(self) -> &'static str {
        self.text()
    }
}

// ============ Subcontractor ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "subcontractor_status", rename_all = "lowercase")]
pub enum SubcontractorStatus {
    Pending,
    Approved,
    Active,
    Suspended,
    Rejected,
}

status_strings!(SubcontractorStatus {
    Pending => "pending",
    Approved => "approved",
    Active => "active",
    Suspended => "suspended",
    Rejected => "rejected",
});

impl StatusMachine for SubcontractorStatus {
    const ENTITY: &'static str = "subcontractor";

    fn can_transition(self, to: Self) -> bool {
        use SubcontractorStatus::*;
        matches!(
            (self, to),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Active)
                | (Active, Approved)
                | (Active, Suspended)
                | (Suspended, Active)
        )
    }

    fn is_terminal(self) -> bool {
        self == SubcontractorStatus::Rejected
    }

    fn as_str(self) -> &'static str {
        self.text()
    }
}

// ============ Invoice ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "invoice_status", rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Partial,
    Paid,
    Void,
}

status_strings!(InvoiceStatus {
    Draft => "draft",
    Sent => "sent",
    Partial => "partial",
    Paid => "paid",
    Void => "void",
});

impl InvoiceStatus {
    pub fn accepts_payment(self) -> bool {
        matches!(
            self,
            InvoiceStatus::Draft | InvoiceStatus::Sent | InvoiceStatus::Partial
        )
    }

    /// Status implied by the paid amount.
    pub fn for_payment(amount_paid: &BigDecimal, total: &BigDecimal) -> InvoiceStatus {
        if amount_paid >= total {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::Partial
        }
    }
}

impl StatusMachine for InvoiceStatus {
    const ENTITY: &'static str = "invoice";

    /// `partial` and `paid` follow from recorded payments, never from a status edit.
    fn can_transition(self, to: Self) -> bool {
        use InvoiceStatus::*;
        matches!((self, to), (Draft, Sent) | (Draft, Void) | (Sent, Void))
    }

    fn is_terminal(self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Void)
    }

    fn as_str(self) -> &'static str {
        self.text()
    }
}

/// An invoice with money recorded against it is protected from deletion.
pub fn ensure_invoice_deletable(status: InvoiceStatus, amount_paid: &BigDecimal) -> Result<(), AppError> {
    if amount_paid > &BigDecimal::zero() || matches!(status, InvoiceStatus::Partial | InvoiceStatus::Paid) {
        return Err(AppError::Conflict(
            "Invoices with recorded payments cannot be deleted".to_string(),
        ));
    }
    Ok(())
}
