//! In-process [`EntityStore`].
//!
//! Every operation runs under a single write lock, which makes each `commit_*` unit
//! atomic. Constraint checks mirror the PostgreSQL schema (unique customer email,
//! unique project per proposal, referential checks) so tests exercise the same
//! failure paths. Used by the test suite and by `STORE_BACKEND=memory`.

use crate::errors::AppError;
use crate::models::*;
use crate::status::{
    InvoiceStatus, LeadStatus, ProjectStatus, ProposalStatus, SubcontractorStatus,
};
use crate::store::{
    duplicate, not_found, stale_status, EntityStore, INVOICE_NUMBER_KEY, PROPOSAL_NUMBER_KEY,
};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    leads: HashMap<Uuid, Lead>,
    lead_notes: Vec<LeadNote>,
    lead_activities: Vec<LeadActivity>,
    customers: HashMap<Uuid, Customer>,
    customer_notes: Vec<CustomerNote>,
    proposals: HashMap<Uuid, Proposal>,
    projects: HashMap<Uuid, Project>,
    project_updates: Vec<ProjectUpdate>,
    documents: Vec<ProjectDocument>,
    invoices: HashMap<Uuid, Invoice>,
    payments: Vec<InvoicePayment>,
    subcontractors: HashMap<Uuid, Subcontractor>,
}

impl Tables {
    fn customer_email_taken(&self, email: &str, except: Option<Uuid>) -> bool {
        self.customers
            .values()
            .any(|c| Some(c.id) != except && c.email.eq_ignore_ascii_case(email))
    }

    fn require_customer(&self, customer_id: Option<Uuid>) -> Result<(), AppError> {
        match customer_id {
            Some(id) if !self.customers.contains_key(&id) => Err(AppError::Conflict(format!(
                "Referenced customer {} does not exist",
                id
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with a persistence error (or recover).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Persistence(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

fn newest_first<T, F>(mut rows: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> chrono::DateTime<Utc>,
{
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
    rows
}

fn stamp_proposal_status(proposal: &mut Proposal, to: ProposalStatus) {
    let now = Utc::now();
    match to {
        ProposalStatus::Sent if proposal.sent_at.is_none() => proposal.sent_at = Some(now),
        ProposalStatus::Accepted => proposal.accepted_at = Some(now),
        _ => {}
    }
    proposal.status = to;
    proposal.updated_at = now;
}

#[async_trait]
impl EntityStore for MemoryStore {
    // ============ Leads ============

    async fn insert_lead(&self, lead: Lead, activity: LeadActivity) -> Result<Lead, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        if t.leads.contains_key(&lead.id) {
            return Err(AppError::Conflict(format!("Lead {} already exists", lead.id)));
        }
        t.leads.insert(lead.id, lead.clone());
        t.lead_activities.push(activity);
        Ok(lead)
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, AppError> {
        self.check_available()?;
        Ok(self.tables.read().await.leads.get(&id).cloned())
    }

    async fn list_leads(&self, filter: &ListFilter<LeadStatus>) -> Result<Vec<Lead>, AppError> {
        self.check_available()?;
        let t = self.tables.read().await;
        let rows: Vec<Lead> = t
            .leads
            .values()
            .filter(|l| filter.matches(l.status, None) && filter.customer_id.is_none())
            .cloned()
            .collect();
        Ok(newest_first(rows, |l: &Lead| l.created_at))
    }

    async fn update_lead(&self, lead: Lead, activity: LeadActivity) -> Result<Lead, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        let stored = t.leads.get_mut(&lead.id).ok_or_else(|| not_found("Lead", lead.id))?;
        let status = stored.status;
        *stored = Lead {
            status,
            updated_at: Utc::now(),
            ..lead
        };
        let updated = stored.clone();
        t.lead_activities.push(activity);
        Ok(updated)
    }

    async fn set_lead_status(
        &self,
        id: Uuid,
        expected: LeadStatus,
        to: LeadStatus,
        activity: LeadActivity,
    ) -> Result<Lead, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        let lead = t.leads.get_mut(&id).ok_or_else(|| not_found("Lead", id))?;
        if lead.status != expected {
            return Err(stale_status("Lead", id, expected));
        }
        lead.status = to;
        lead.updated_at = Utc::now();
        let updated = lead.clone();
        t.lead_activities.push(activity);
        Ok(updated)
    }

    async fn delete_lead(&self, id: Uuid) -> Result<bool, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        if t.leads.remove(&id).is_none() {
            return Ok(false);
        }
        t.lead_notes.retain(|n| n.lead_id != id);
        t.lead_activities.retain(|a| a.lead_id != id);
        for customer in t.customers.values_mut() {
            if customer.lead_id == Some(id) {
                customer.lead_id = None;
            }
        }
        Ok(true)
    }

    async fn insert_lead_note(&self, note: LeadNote, activity: LeadActivity) -> Result<LeadNote, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        if !t.leads.contains_key(&note.lead_id) {
            return Err(not_found("Lead", note.lead_id));
        }
        t.lead_notes.push(note.clone());
        t.lead_activities.push(activity);
        Ok(note)
    }

    async fn list_lead_notes(&self, lead_id: Uuid) -> Result<Vec<LeadNote>, AppError> {
        self.check_available()?;
        let t = self.tables.read().await;
        Ok(t.lead_notes.iter().filter(|n| n.lead_id == lead_id).cloned().collect())
    }

    async fn list_lead_activities(&self, lead_id: Uuid) -> Result<Vec<LeadActivity>, AppError> {
        self.check_available()?;
        let t = self.tables.read().await;
        Ok(t
            .lead_activities
            .iter()
            .filter(|a| a.lead_id == lead_id)
            .cloned()
            .collect())
    }

    async fn commit_lead_conversion(
        &self,
        lead_id: Uuid,
        expected: LeadStatus,
        customer: Customer,
        activity: LeadActivity,
    ) -> Result<Customer, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;

        // All checks run before the first write.
        let lead = t.leads.get(&lead_id).ok_or_else(|| not_found("Lead", lead_id))?;
        if lead.status != expected {
            return Err(stale_status("Lead", lead_id, expected));
        }
        if t.customer_email_taken(&customer.email, None) {
            return Err(AppError::Conflict(format!(
                "A customer with email {} already exists",
                customer.email
            )));
        }

        t.customers.insert(customer.id, customer.clone());
        if let Some(lead) = t.leads.get_mut(&lead_id) {
            lead.status = LeadStatus::Won;
            lead.updated_at = Utc::now();
        }
        t.lead_activities.push(activity);
        Ok(customer)
    }

    // ============ Customers ============

    async fn insert_customer(&self, customer: Customer) -> Result<Customer, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        if t.customer_email_taken(&customer.email, None) {
            return Err(AppError::Conflict(format!(
                "A customer with email {} already exists",
                customer.email
            )));
        }
        t.customers.insert(customer.id, customer.clone());
        Ok(customer)
    }

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, AppError> {
        self.check_available()?;
        Ok(self.tables.read().await.customers.get(&id).cloned())
    }

    async fn list_customers(&self) -> Result<Vec<Customer>, AppError> {
        self.check_available()?;
        let rows: Vec<Customer> = self.tables.read().await.customers.values().cloned().collect();
        Ok(newest_first(rows, |c: &Customer| c.created_at))
    }

    async fn delete_customer(&self, id: Uuid) -> Result<bool, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        if !t.customers.contains_key(&id) {
            return Ok(false);
        }
        let project_count = t.projects.values().filter(|p| p.customer_id == id).count();
        if project_count > 0 {
            return Err(AppError::Conflict(format!(
                "Customer {} still has {} project(s)",
                id, project_count
            )));
        }
        t.customers.remove(&id);
        t.customer_notes.retain(|n| n.customer_id != id);
        for proposal in t.proposals.values_mut() {
            if proposal.customer_id == Some(id) {
                proposal.customer_id = None;
            }
        }
        for invoice in t.invoices.values_mut() {
            if invoice.customer_id == Some(id) {
                invoice.customer_id = None;
            }
        }
        Ok(true)
    }

    async fn insert_customer_note(&self, note: CustomerNote) -> Result<CustomerNote, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        t.require_customer(Some(note.customer_id))?;
        t.customer_notes.push(note.clone());
        Ok(note)
    }

    async fn list_customer_notes(&self, customer_id: Uuid) -> Result<Vec<CustomerNote>, AppError> {
        self.check_available()?;
        let t = self.tables.read().await;
        Ok(t
            .customer_notes
            .iter()
            .filter(|n| n.customer_id == customer_id)
            .cloned()
            .collect())
    }

    // ============ Proposals ============

    async fn insert_proposal(&self, proposal: Proposal) -> Result<Proposal, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        t.require_customer(proposal.customer_id)?;
        if t.proposals.values().any(|p| p.number == proposal.number) {
            return Err(duplicate(PROPOSAL_NUMBER_KEY));
        }
        t.proposals.insert(proposal.id, proposal.clone());
        Ok(proposal)
    }

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>, AppError> {
        self.check_available()?;
        Ok(self.tables.read().await.proposals.get(&id).cloned())
    }

    async fn list_proposals(&self, filter: &ListFilter<ProposalStatus>) -> Result<Vec<Proposal>, AppError> {
        self.check_available()?;
        let t = self.tables.read().await;
        let rows: Vec<Proposal> = t
            .proposals
            .values()
            .filter(|p| filter.matches(p.status, p.customer_id))
            .cloned()
            .collect();
        Ok(newest_first(rows, |p: &Proposal| p.created_at))
    }

    async fn update_proposal(&self, proposal: Proposal, expected: ProposalStatus) -> Result<Proposal, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        t.require_customer(proposal.customer_id)?;
        let stored = t
            .proposals
            .get_mut(&proposal.id)
            .ok_or_else(|| not_found("Proposal", proposal.id))?;
        if stored.status != expected || stored.status == ProposalStatus::Accepted {
            return Err(stale_status("Proposal", proposal.id, expected));
        }
        *stored = Proposal {
            status: stored.status,
            sent_at: stored.sent_at,
            accepted_at: stored.accepted_at,
            created_at: stored.created_at,
            updated_at: Utc::now(),
            ..proposal
        };
        Ok(stored.clone())
    }

    async fn set_proposal_status(
        &self,
        id: Uuid,
        expected: ProposalStatus,
        to: ProposalStatus,
    ) -> Result<Proposal, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        let proposal = t.proposals.get_mut(&id).ok_or_else(|| not_found("Proposal", id))?;
        if proposal.status != expected {
            return Err(stale_status("Proposal", id, expected));
        }
        stamp_proposal_status(proposal, to);
        Ok(proposal.clone())
    }

    async fn delete_proposal(&self, id: Uuid, expected: ProposalStatus) -> Result<bool, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        let status = match t.proposals.get(&id) {
            None => return Ok(false),
            Some(p) => p.status,
        };
        if status != expected || status == ProposalStatus::Accepted {
            return Err(stale_status("Proposal", id, expected));
        }
        t.proposals.remove(&id);
        for project in t.projects.values_mut() {
            if project.proposal_id == Some(id) {
                project.proposal_id = None;
            }
        }
        Ok(true)
    }

    // ============ Projects ============

    async fn insert_project(&self, project: Project) -> Result<Project, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        t.require_customer(Some(project.customer_id))?;
        if let Some(proposal_id) = project.proposal_id {
            if t.projects.values().any(|p| p.proposal_id == Some(proposal_id)) {
                return Err(AppError::Conflict(format!(
                    "A project already exists for proposal {}",
                    proposal_id
                )));
            }
        }
        t.projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, AppError> {
        self.check_available()?;
        Ok(self.tables.read().await.projects.get(&id).cloned())
    }

    async fn list_projects(&self, filter: &ListFilter<ProjectStatus>) -> Result<Vec<Project>, AppError> {
        self.check_available()?;
        let t = self.tables.read().await;
        let rows: Vec<Project> = t
            .projects
            .values()
            .filter(|p| filter.matches(p.status, Some(p.customer_id)))
            .cloned()
            .collect();
        Ok(newest_first(rows, |p: &Project| p.created_at))
    }

    async fn update_project(&self, project: Project) -> Result<Project, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        let stored = t
            .projects
            .get_mut(&project.id)
            .ok_or_else(|| not_found("Project", project.id))?;
        *stored = Project {
            status: stored.status,
            customer_id: stored.customer_id,
            proposal_id: stored.proposal_id,
            created_at: stored.created_at,
            updated_at: Utc::now(),
            ..project
        };
        Ok(stored.clone())
    }

    async fn set_project_status(
        &self,
        id: Uuid,
        expected: ProjectStatus,
        to: ProjectStatus,
    ) -> Result<Project, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        let project = t.projects.get_mut(&id).ok_or_else(|| not_found("Project", id))?;
        if project.status != expected {
            return Err(stale_status("Project", id, expected));
        }
        project.status = to;
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    async fn find_project_by_proposal(&self, proposal_id: Uuid) -> Result<Option<Project>, AppError> {
        self.check_available()?;
        let t = self.tables.read().await;
        Ok(t
            .projects
            .values()
            .find(|p| p.proposal_id == Some(proposal_id))
            .cloned())
    }

    async fn commit_proposal_conversion(
        &self,
        proposal_id: Uuid,
        project: Project,
    ) -> Result<(Project, bool), AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;

        let proposal = t
            .proposals
            .get(&proposal_id)
            .ok_or_else(|| not_found("Proposal", proposal_id))?;
        if proposal.status != ProposalStatus::Accepted {
            return Err(stale_status("Proposal", proposal_id, ProposalStatus::Accepted));
        }
        if let Some(existing) = t
            .projects
            .values()
            .find(|p| p.proposal_id == Some(proposal_id))
        {
            return Ok((existing.clone(), false));
        }
        t.require_customer(Some(project.customer_id))?;

        t.projects.insert(project.id, project.clone());
        Ok((project, true))
    }

    async fn insert_project_update(&self, update: ProjectUpdate) -> Result<ProjectUpdate, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        if !t.projects.contains_key(&update.project_id) {
            return Err(not_found("Project", update.project_id));
        }
        t.project_updates.push(update.clone());
        Ok(update)
    }

    async fn list_project_updates(&self, project_id: Uuid) -> Result<Vec<ProjectUpdate>, AppError> {
        self.check_available()?;
        let t = self.tables.read().await;
        Ok(t
            .project_updates
            .iter()
            .filter(|u| u.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn insert_document(&self, document: ProjectDocument) -> Result<ProjectDocument, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        if !t.projects.contains_key(&document.project_id) {
            return Err(not_found("Project", document.project_id));
        }
        t.documents.push(document.clone());
        Ok(document)
    }

    async fn list_documents(&self, project_id: Uuid) -> Result<Vec<ProjectDocument>, AppError> {
        self.check_available()?;
        let t = self.tables.read().await;
        Ok(t
            .documents
            .iter()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect())
    }

    // ============ Invoices ============

    async fn commit_invoice(&self, invoice: Invoice, note: Option<CustomerNote>) -> Result<Invoice, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        t.require_customer(invoice.customer_id)?;
        if let Some(project_id) = invoice.project_id {
            if !t.projects.contains_key(&project_id) {
                return Err(AppError::Conflict(format!(
                    "Referenced project {} does not exist",
                    project_id
                )));
            }
        }
        if let Some(note) = &note {
            t.require_customer(Some(note.customer_id))?;
        }
        if t.invoices.values().any(|i| i.number == invoice.number) {
            return Err(duplicate(INVOICE_NUMBER_KEY));
        }

        t.invoices.insert(invoice.id, invoice.clone());
        if let Some(note) = note {
            t.customer_notes.push(note);
        }
        Ok(invoice)
    }

    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, AppError> {
        self.check_available()?;
        Ok(self.tables.read().await.invoices.get(&id).cloned())
    }

    async fn list_invoices(&self, filter: &ListFilter<InvoiceStatus>) -> Result<Vec<Invoice>, AppError> {
        self.check_available()?;
        let t = self.tables.read().await;
        let rows: Vec<Invoice> = t
            .invoices
            .values()
            .filter(|i| filter.matches(i.status, i.customer_id))
            .cloned()
            .collect();
        Ok(newest_first(rows, |i: &Invoice| i.created_at))
    }

    async fn set_invoice_status(
        &self,
        id: Uuid,
        expected: InvoiceStatus,
        to: InvoiceStatus,
    ) -> Result<Invoice, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        let invoice = t.invoices.get_mut(&id).ok_or_else(|| not_found("Invoice", id))?;
        if invoice.status != expected {
            return Err(stale_status("Invoice", id, expected));
        }
        invoice.status = to;
        invoice.updated_at = Utc::now();
        Ok(invoice.clone())
    }

    async fn commit_invoice_payment(
        &self,
        payment: InvoicePayment,
        expected_paid: &BigDecimal,
        new_status: InvoiceStatus,
    ) -> Result<Invoice, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        let invoice = t
            .invoices
            .get_mut(&payment.invoice_id)
            .ok_or_else(|| not_found("Invoice", payment.invoice_id))?;
        if &invoice.amount_paid != expected_paid {
            return Err(AppError::Conflict(format!(
                "Invoice {} balance changed; reload and retry",
                invoice.id
            )));
        }
        let amount_paid = &invoice.amount_paid + &payment.amount;
        if amount_paid > invoice.total {
            return Err(AppError::Conflict(format!(
                "Payment would exceed invoice total {}",
                invoice.total
            )));
        }
        invoice.amount_paid = amount_paid;
        invoice.status = new_status;
        invoice.updated_at = Utc::now();
        let updated = invoice.clone();
        t.payments.push(payment);
        Ok(updated)
    }

    async fn list_invoice_payments(&self, invoice_id: Uuid) -> Result<Vec<InvoicePayment>, AppError> {
        self.check_available()?;
        let t = self.tables.read().await;
        Ok(t
            .payments
            .iter()
            .filter(|p| p.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn delete_invoice(&self, id: Uuid) -> Result<bool, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        let has_payments = match t.invoices.get(&id) {
            None => return Ok(false),
            Some(invoice) => invoice.amount_paid > BigDecimal::zero(),
        };
        if has_payments {
            return Err(AppError::Conflict(
                "Invoices with recorded payments cannot be deleted".to_string(),
            ));
        }
        t.invoices.remove(&id);
        t.payments.retain(|p| p.invoice_id != id);
        Ok(true)
    }

    // ============ Subcontractors ============

    async fn insert_subcontractor(&self, subcontractor: Subcontractor) -> Result<Subcontractor, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        if t
            .subcontractors
            .values()
            .any(|s| s.email.eq_ignore_ascii_case(&subcontractor.email))
        {
            return Err(AppError::Conflict(format!(
                "A subcontractor with email {} already exists",
                subcontractor.email
            )));
        }
        t.subcontractors.insert(subcontractor.id, subcontractor.clone());
        Ok(subcontractor)
    }

    async fn get_subcontractor(&self, id: Uuid) -> Result<Option<Subcontractor>, AppError> {
        self.check_available()?;
        Ok(self.tables.read().await.subcontractors.get(&id).cloned())
    }

    async fn list_subcontractors(
        &self,
        filter: &ListFilter<SubcontractorStatus>,
    ) -> Result<Vec<Subcontractor>, AppError> {
        self.check_available()?;
        let t = self.tables.read().await;
        let rows: Vec<Subcontractor> = t
            .subcontractors
            .values()
            .filter(|s| filter.matches(s.status, None) && filter.customer_id.is_none())
            .cloned()
            .collect();
        Ok(newest_first(rows, |s: &Subcontractor| s.created_at))
    }

    async fn update_subcontractor(&self, subcontractor: Subcontractor) -> Result<Subcontractor, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        if t.subcontractors.values().any(|s| {
            s.id != subcontractor.id && s.email.eq_ignore_ascii_case(&subcontractor.email)
        }) {
            return Err(AppError::Conflict(format!(
                "A subcontractor with email {} already exists",
                subcontractor.email
            )));
        }
        let stored = t
            .subcontractors
            .get_mut(&subcontractor.id)
            .ok_or_else(|| not_found("Subcontractor", subcontractor.id))?;
        *stored = Subcontractor {
            status: stored.status,
            admin_notes: stored.admin_notes.clone(),
            created_at: stored.created_at,
            updated_at: Utc::now(),
            ..subcontractor
        };
        Ok(stored.clone())
    }

    async fn set_subcontractor_status(
        &self,
        id: Uuid,
        expected: SubcontractorStatus,
        to: SubcontractorStatus,
        admin_notes: Option<String>,
    ) -> Result<Subcontractor, AppError> {
        self.check_available()?;
        let mut t = self.tables.write().await;
        let sub = t
            .subcontractors
            .get_mut(&id)
            .ok_or_else(|| not_found("Subcontractor", id))?;
        if sub.status != expected {
            return Err(stale_status("Subcontractor", id, expected));
        }
        sub.status = to;
        if admin_notes.is_some() {
            sub.admin_notes = admin_notes;
        }
        sub.updated_at = Utc::now();
        Ok(sub.clone())
    }
}
