//! Persistence contract for every record type.
//!
//! Plain CRUD methods are last-write-wins. Methods that take an `expected` status are
//! compare-and-set: they fail with `AppError::Conflict` when the stored status no
//! longer matches, and write nothing. Methods named `commit_*` group several writes
//! into one atomic unit; an implementation must either apply all of them or none.

use crate::errors::AppError;
use crate::models::*;
use crate::status::{
    InvoiceStatus, LeadStatus, ProjectStatus, ProposalStatus, SubcontractorStatus,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::sync::Arc;
use uuid::Uuid;

/// Shared handle to whichever store backs the process.
pub type SharedStore = Arc<dyn EntityStore>;

#[async_trait]
pub trait EntityStore: Send + Sync {
    // ============ Leads ============

    /// Inserts a lead together with its creation activity.
    async fn insert_lead(&self, lead: Lead, activity: LeadActivity) -> Result<Lead, AppError>;

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, AppError>;

    async fn list_leads(&self, filter: &ListFilter<LeadStatus>) -> Result<Vec<Lead>, AppError>;

    /// Overwrites lead fields except `status`, appending `activity`.
    async fn update_lead(&self, lead: Lead, activity: LeadActivity) -> Result<Lead, AppError>;

    async fn set_lead_status(
        &self,
        id: Uuid,
        expected: LeadStatus,
        to: LeadStatus,
        activity: LeadActivity,
    ) -> Result<Lead, AppError>;

    /// Removes the lead and its notes and activities. Returns false if absent.
    async fn delete_lead(&self, id: Uuid) -> Result<bool, AppError>;

    async fn insert_lead_note(&self, note: LeadNote, activity: LeadActivity) -> Result<LeadNote, AppError>;

    async fn list_lead_notes(&self, lead_id: Uuid) -> Result<Vec<LeadNote>, AppError>;

    async fn list_lead_activities(&self, lead_id: Uuid) -> Result<Vec<LeadActivity>, AppError>;

    /// Creates `customer` and moves the lead from `expected` to `won` atomically.
    async fn commit_lead_conversion(
        &self,
        lead_id: Uuid,
        expected: LeadStatus,
        customer: Customer,
        activity: LeadActivity,
    ) -> Result<Customer, AppError>;

    // ============ Customers ============

    async fn insert_customer(&self, customer: Customer) -> Result<Customer, AppError>;

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, AppError>;

    async fn list_customers(&self) -> Result<Vec<Customer>, AppError>;

    /// Deletes a customer that owns no projects. Fails with `Conflict` otherwise.
    async fn delete_customer(&self, id: Uuid) -> Result<bool, AppError>;

    async fn insert_customer_note(&self, note: CustomerNote) -> Result<CustomerNote, AppError>;

    async fn list_customer_notes(&self, customer_id: Uuid) -> Result<Vec<CustomerNote>, AppError>;

    // ============ Proposals ============

    async fn insert_proposal(&self, proposal: Proposal) -> Result<Proposal, AppError>;

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>, AppError>;

    async fn list_proposals(&self, filter: &ListFilter<ProposalStatus>) -> Result<Vec<Proposal>, AppError>;

    /// Overwrites an unaccepted proposal's content while its status is still `expected`.
    async fn update_proposal(&self, proposal: Proposal, expected: ProposalStatus) -> Result<Proposal, AppError>;

    async fn set_proposal_status(
        &self,
        id: Uuid,
        expected: ProposalStatus,
        to: ProposalStatus,
    ) -> Result<Proposal, AppError>;

    /// Deletes the proposal while its status is still `expected`.
    async fn delete_proposal(&self, id: Uuid, expected: ProposalStatus) -> Result<bool, AppError>;

    // ============ Projects ============

    async fn insert_project(&self, project: Project) -> Result<Project, AppError>;

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, AppError>;

    async fn list_projects(&self, filter: &ListFilter<ProjectStatus>) -> Result<Vec<Project>, AppError>;

    /// Overwrites project fields except `status`.
    async fn update_project(&self, project: Project) -> Result<Project, AppError>;

    async fn set_project_status(
        &self,
        id: Uuid,
        expected: ProjectStatus,
        to: ProjectStatus,
    ) -> Result<Project, AppError>;

    async fn find_project_by_proposal(&self, proposal_id: Uuid) -> Result<Option<Project>, AppError>;

    /// Inserts `project` for an accepted proposal unless one already exists for it.
    ///
    /// Returns the project and whether it was created by this call. Fails with
    /// `Conflict` if the proposal is no longer accepted.
    async fn commit_proposal_conversion(
        &self,
        proposal_id: Uuid,
        project: Project,
    ) -> Result<(Project, bool), AppError>;

    async fn insert_project_update(&self, update: ProjectUpdate) -> Result<ProjectUpdate, AppError>;

    async fn list_project_updates(&self, project_id: Uuid) -> Result<Vec<ProjectUpdate>, AppError>;

    async fn insert_document(&self, document: ProjectDocument) -> Result<ProjectDocument, AppError>;

    async fn list_documents(&self, project_id: Uuid) -> Result<Vec<ProjectDocument>, AppError>;

    // ============ Invoices ============

    /// Inserts the invoice and, when given, the customer billing note atomically.
    async fn commit_invoice(&self, invoice: Invoice, note: Option<CustomerNote>) -> Result<Invoice, AppError>;

    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, AppError>;

    async fn list_invoices(&self, filter: &ListFilter<InvoiceStatus>) -> Result<Vec<Invoice>, AppError>;

    async fn set_invoice_status(
        &self,
        id: Uuid,
        expected: InvoiceStatus,
        to: InvoiceStatus,
    ) -> Result<Invoice, AppError>;

    /// Records a payment while `amount_paid` still equals `expected_paid`, moving the
    /// invoice to `new_status`.
    async fn commit_invoice_payment(
        &self,
        payment: InvoicePayment,
        expected_paid: &BigDecimal,
        new_status: InvoiceStatus,
    ) -> Result<Invoice, AppError>;

    async fn list_invoice_payments(&self, invoice_id: Uuid) -> Result<Vec<InvoicePayment>, AppError>;

    /// Deletes an invoice that has no payments recorded.
    async fn delete_invoice(&self, id: Uuid) -> Result<bool, AppError>;

    // ============ Subcontractors ============

    async fn insert_subcontractor(&self, subcontractor: Subcontractor) -> Result<Subcontractor, AppError>;

    async fn get_subcontractor(&self, id: Uuid) -> Result<Option<Subcontractor>, AppError>;

    async fn list_subcontractors(
        &self,
        filter: &ListFilter<SubcontractorStatus>,
    ) -> Result<Vec<Subcontractor>, AppError>;

    /// Overwrites subcontractor fields except `status` and `admin_notes`.
    async fn update_subcontractor(&self, subcontractor: Subcontractor) -> Result<Subcontractor, AppError>;

    async fn set_subcontractor_status(
        &self,
        id: Uuid,
        expected: SubcontractorStatus,
        to: SubcontractorStatus,
        admin_notes: Option<String>,
    ) -> Result<Subcontractor, AppError>;
}

/// Unique constraints on human-readable document numbers.
pub const PROPOSAL_NUMBER_KEY: &str = "proposals_number_key";
pub const INVOICE_NUMBER_KEY: &str = "invoices_number_key";

/// Unique violation, worded the same way for every backend.
pub fn duplicate(constraint: &str) -> AppError {
    AppError::Conflict(format!("Record already exists ({})", constraint))
}

/// Error returned when a compare-and-set finds a different status than planned.
pub fn stale_status<S: std::fmt::Display>(entity: &str, id: Uuid, expected: S) -> AppError {
    AppError::Conflict(format!(
        "{} {} is no longer {}; reload and retry",
        entity, id, expected
    ))
}

pub fn not_found(entity: &str, id: Uuid) -> AppError {
    AppError::NotFound(format!("{} with id {} not found", entity, id))
}
