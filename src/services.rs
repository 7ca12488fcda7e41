use crate::calculator::{price_document, reprice_items, PricedDocument};
use crate::credentials::CredentialHasher;
use crate::errors::AppError;
use crate::models::*;
use crate::notifications::SharedDispatcher;
use crate::status::{
    ensure_invoice_deletable, ensure_manual_lead_status, ensure_proposal_deletable,
    ensure_proposal_editable, plan_transition, InvoiceStatus, LeadStatus, ProjectStatus,
    ProposalStatus, StatusMachine, SubcontractorStatus, Transition,
};
use crate::store::{not_found, SharedStore, INVOICE_NUMBER_KEY, PROPOSAL_NUMBER_KEY};
use crate::validation::{
    normalize_email, normalize_optional_email, normalize_optional_phone, normalize_specialties,
    optional_text, require_text, validate_non_negative, validate_rating,
};
use bigdecimal::{BigDecimal, Zero};
use chrono::{NaiveDate, Utc};
use phonenumber::country::Id as CountryId;
use uuid::Uuid;

/// Inserts attempted before a document-number collision is reported.
const NUMBER_ATTEMPTS: usize = 3;

/// Builds a human-readable document number such as `PRO-20260114-3F9A07C2`.
pub fn document_number(prefix: &str, date: NaiveDate) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("{}-{}-{}", prefix, date.format("%Y%m%d"), suffix)
}

fn validate_snapshot(snapshot: CustomerSnapshot) -> Result<CustomerSnapshot, AppError> {
    Ok(CustomerSnapshot {
        name: require_text("Customer name", &snapshot.name)?,
        email: normalize_optional_email(snapshot.email)?,
        phone: optional_text(snapshot.phone),
        address: optional_text(snapshot.address),
    })
}

/// Snapshot copied onto a proposal or invoice at creation time.
///
/// A linked customer supplies the defaults; an explicit snapshot wins. Without a
/// linked customer the snapshot is mandatory.
async fn resolve_snapshot(
    store: &SharedStore,
    customer_id: Option<Uuid>,
    supplied: Option<CustomerSnapshot>,
) -> Result<CustomerSnapshot, AppError> {
    match (customer_id, supplied) {
        (Some(id), supplied) => {
            let customer = store
                .get_customer(id)
                .await?
                .ok_or_else(|| not_found("Customer", id))?;
            validate_snapshot(supplied.unwrap_or_else(|| customer.snapshot()))
        }
        (None, Some(snapshot)) => validate_snapshot(snapshot),
        (None, None) => Err(AppError::Validation(
            "Either customer_id or customer details are required".to_string(),
        )),
    }
}

// ============ Leads ============

pub struct LeadService {
    store: SharedStore,
    phone_region: CountryId,
}

impl LeadService {
    pub fn new(store: SharedStore, phone_region: CountryId) -> Self {
        Self { store, phone_region }
    }

    pub async fn get(&self, id: Uuid) -> Result<Lead, AppError> {
        self.store
            .get_lead(id)
            .await?
            .ok_or_else(|| not_found("Lead", id))
    }

    pub async fn list(&self, filter: &ListFilter<LeadStatus>) -> Result<Vec<Lead>, AppError> {
        self.store.list_leads(filter).await
    }

    pub async fn detail(&self, id: Uuid) -> Result<LeadDetail, AppError> {
        let lead = self.get(id).await?;
        let notes = self.store.list_lead_notes(id).await?;
        let activities = self.store.list_lead_activities(id).await?;
        Ok(LeadDetail {
            lead,
            notes,
            activities,
        })
    }

    pub async fn create(&self, req: CreateLeadRequest, actor_id: Uuid) -> Result<Lead, AppError> {
        if let Some(value) = &req.estimated_value {
            validate_non_negative("Estimated value", value)?;
        }

        let now = Utc::now();
        let lead = Lead {
            id: Uuid::new_v4(),
            first_name: require_text("First name", &req.first_name)?,
            last_name: req.last_name.trim().to_string(),
            email: normalize_optional_email(req.email)?,
            phone: normalize_optional_phone(req.phone, self.phone_region)?,
            company: optional_text(req.company),
            address: optional_text(req.address),
            source: optional_text(req.source),
            service_interest: optional_text(req.service_interest),
            message: optional_text(req.message),
            status: LeadStatus::New,
            priority: req.priority,
            estimated_value: req.estimated_value,
            assigned_to: req.assigned_to,
            created_at: now,
            updated_at: now,
        };
        let activity = LeadActivity::new(lead.id, actor_id, ActivityKind::Created, "Lead created");

        let lead = self.store.insert_lead(lead, activity).await?;
        tracing::info!("Lead {} created by {}", lead.id, actor_id);
        Ok(lead)
    }

    /// Applies field edits. Status is never touched here.
    pub async fn update(&self, id: Uuid, req: UpdateLeadRequest, actor_id: Uuid) -> Result<Lead, AppError> {
        let mut lead = self.get(id).await?;

        if let Some(first_name) = req.first_name {
            lead.first_name = require_text("First name", &first_name)?;
        }
        if let Some(last_name) = req.last_name {
            lead.last_name = last_name.trim().to_string();
        }
        if req.email.is_some() {
            lead.email = normalize_optional_email(req.email)?;
        }
        if req.phone.is_some() {
            lead.phone = normalize_optional_phone(req.phone, self.phone_region)?;
        }
        if req.company.is_some() {
            lead.company = optional_text(req.company);
        }
        if req.address.is_some() {
            lead.address = optional_text(req.address);
        }
        if req.source.is_some() {
            lead.source = optional_text(req.source);
        }
        if req.service_interest.is_some() {
            lead.service_interest = optional_text(req.service_interest);
        }
        if req.message.is_some() {
            lead.message = optional_text(req.message);
        }
        if let Some(priority) = req.priority {
            lead.priority = priority;
        }
        if let Some(value) = req.estimated_value {
            validate_non_negative("Estimated value", &value)?;
            lead.estimated_value = Some(value);
        }
        if let Some(assignee) = req.assigned_to {
            lead.assigned_to = Some(assignee);
        }

        let activity = LeadActivity::new(id, actor_id, ActivityKind::Updated, "Lead details updated");
        let lead = self.store.update_lead(lead, activity).await?;
        tracing::info!("Lead {} updated by {}", id, actor_id);
        Ok(lead)
    }

    pub async fn change_status(&self, id: Uuid, to: LeadStatus, actor_id: Uuid) -> Result<Lead, AppError> {
        ensure_manual_lead_status(to)?;
        let lead = self.get(id).await?;

        match plan_transition(lead.status, to)? {
            Transition::Unchanged => Ok(lead),
            Transition::Move { from, to } => {
                let activity = LeadActivity::new(
                    id,
                    actor_id,
                    ActivityKind::StatusChanged,
                    format!("Status changed from {} to {}", from, to),
                );
                let lead = self.store.set_lead_status(id, from, to, activity).await?;
                tracing::info!("Lead {} moved {} -> {} by {}", id, from, to, actor_id);
                Ok(lead)
            }
        }
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        if !self.store.delete_lead(id).await? {
            return Err(not_found("Lead", id));
        }
        tracing::info!("Lead {} deleted", id);
        Ok(())
    }

    pub async fn add_note(&self, id: Uuid, req: AddNoteRequest, actor_id: Uuid) -> Result<LeadNote, AppError> {
        let content = require_text("Note content", &req.content)?;
        self.get(id).await?;

        let note = LeadNote {
            id: Uuid::new_v4(),
            lead_id: id,
            author_id: actor_id,
            note_type: optional_text(req.note_type).unwrap_or_else(|| "general".to_string()),
            content,
            important: req.important,
            created_at: Utc::now(),
        };
        let activity = LeadActivity::new(
            id,
            actor_id,
            ActivityKind::NoteAdded,
            format!("Added {} note", note.note_type),
        );

        let note = self.store.insert_lead_note(note, activity).await?;
        tracing::info!("Note {} added to lead {}", note.id, id);
        Ok(note)
    }

    pub async fn activities(&self, id: Uuid) -> Result<Vec<LeadActivity>, AppError> {
        self.get(id).await?;
        self.store.list_lead_activities(id).await
    }
}

// ============ Customers ============

pub struct CustomerService {
    store: SharedStore,
    phone_region: CountryId,
    hasher: CredentialHasher,
}

impl CustomerService {
    pub fn new(store: SharedStore, phone_region: CountryId, hasher: CredentialHasher) -> Self {
        Self {
            store,
            phone_region,
            hasher,
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Customer, AppError> {
        self.store
            .get_customer(id)
            .await?
            .ok_or_else(|| not_found("Customer", id))
    }

    pub async fn list(&self) -> Result<Vec<Customer>, AppError> {
        self.store.list_customers().await
    }

    pub async fn detail(&self, id: Uuid) -> Result<CustomerDetail, AppError> {
        let customer = self.get(id).await?;
        let projects = self.store.list_projects(&ListFilter::by_customer(id)).await?;
        Ok(CustomerDetail { customer, projects })
    }

    /// Creates a customer directly, without a lead.
    pub async fn create(&self, req: CreateCustomerRequest) -> Result<Customer, AppError> {
        let first_name = require_text("First name", &req.first_name)?;
        let email = normalize_email(&req.email)?;
        let phone = normalize_optional_phone(req.phone, self.phone_region)?;
        let password_hash = self.hasher.hash_blocking(req.password).await?;

        let now = Utc::now();
        let customer = Customer {
            id: Uuid::new_v4(),
            lead_id: None,
            first_name,
            last_name: req.last_name.trim().to_string(),
            email,
            phone,
            company: optional_text(req.company),
            address: optional_text(req.address),
            password_hash,
            created_at: now,
            updated_at: now,
        };

        let customer = self.store.insert_customer(customer).await?;
        tracing::info!("Customer {} created", customer.id);
        Ok(customer)
    }

    /// Refuses while the customer still owns projects, whatever the storage enforces.
    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        self.get(id).await?;

        let projects = self.store.list_projects(&ListFilter::by_customer(id)).await?;
        if !projects.is_empty() {
            tracing::warn!(
                "Refusing to delete customer {} with {} project(s)",
                id,
                projects.len()
            );
            return Err(AppError::Conflict(format!(
                "Customer {} still has {} project(s)",
                id,
                projects.len()
            )));
        }

        if !self.store.delete_customer(id).await? {
            return Err(not_found("Customer", id));
        }
        tracing::info!("Customer {} deleted", id);
        Ok(())
    }

    pub async fn notes(&self, id: Uuid) -> Result<Vec<CustomerNote>, AppError> {
        self.get(id).await?;
        self.store.list_customer_notes(id).await
    }

    pub async fn add_note(&self, id: Uuid, req: AddNoteRequest, actor_id: Uuid) -> Result<CustomerNote, AppError> {
        let content = require_text("Note content", &req.content)?;
        self.get(id).await?;

        let note = CustomerNote {
            id: Uuid::new_v4(),
            customer_id: id,
            author_id: actor_id,
            note_type: optional_text(req.note_type).unwrap_or_else(|| "general".to_string()),
            content,
            created_at: Utc::now(),
        };
        self.store.insert_customer_note(note).await
    }

    /// Checks a portal password against the stored hash.
    pub async fn verify_credential(&self, id: Uuid, password: String) -> Result<bool, AppError> {
        let customer = self.get(id).await?;
        let valid = self
            .hasher
            .verify_blocking(password, customer.password_hash)
            .await?;
        if !valid {
            tracing::warn!("Portal credential check failed for customer {}", id);
        }
        Ok(valid)
    }
}

// ============ Proposals ============

pub struct ProposalService {
    store: SharedStore,
    dispatcher: SharedDispatcher,
}

impl ProposalService {
    pub fn new(store: SharedStore, dispatcher: SharedDispatcher) -> Self {
        Self { store, dispatcher }
    }

    pub async fn get(&self, id: Uuid) -> Result<Proposal, AppError> {
        self.store
            .get_proposal(id)
            .await?
            .ok_or_else(|| not_found("Proposal", id))
    }

    pub async fn list(&self, filter: &ListFilter<ProposalStatus>) -> Result<Vec<Proposal>, AppError> {
        self.store.list_proposals(filter).await
    }

    /// Creates a draft proposal. Totals are always computed here from the items.
    pub async fn create(&self, req: CreateProposalRequest, actor_id: Uuid) -> Result<Proposal, AppError> {
        let PricedDocument {
            items,
            tax_rate,
            totals,
        } = price_document(&req.items, &req.tax_rate)?;
        let customer = resolve_snapshot(&self.store, req.customer_id, req.customer).await?;

        let now = Utc::now();
        let mut proposal = Proposal {
            id: Uuid::new_v4(),
            number: document_number("PRO", now.date_naive()),
            customer_id: req.customer_id,
            customer,
            project_title: optional_text(req.project_title),
            status: ProposalStatus::Draft,
            items,
            subtotal: totals.subtotal,
            tax_rate,
            tax: totals.tax,
            total: totals.total,
            notes: optional_text(req.notes),
            valid_until: req.valid_until,
            created_by: actor_id,
            sent_at: None,
            accepted_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut attempt = 1;
        let proposal = loop {
            match self.store.insert_proposal(proposal.clone()).await {
                Err(e) if e.is_duplicate_of(PROPOSAL_NUMBER_KEY) && attempt < NUMBER_ATTEMPTS => {
                    tracing::warn!("Proposal number {} already taken, drawing another", proposal.number);
                    proposal.number = document_number("PRO", now.date_naive());
                    attempt += 1;
                }
                result => break result?,
            }
        };
        tracing::info!(
            "Proposal {} ({}) created by {} for {}",
            proposal.number,
            proposal.id,
            actor_id,
            proposal.total
        );
        Ok(proposal)
    }

    /// Edits an unaccepted proposal, recomputing every total from the resulting items.
    pub async fn update(&self, id: Uuid, req: UpdateProposalRequest) -> Result<Proposal, AppError> {
        let mut proposal = self.get(id).await?;
        ensure_proposal_editable(proposal.status)?;
        let expected = proposal.status;

        if let Some(customer_id) = req.customer_id {
            if proposal.customer_id != Some(customer_id) {
                proposal.customer = resolve_snapshot(&self.store, Some(customer_id), None).await?;
                proposal.customer_id = Some(customer_id);
            }
        }

        let tax_rate = req.tax_rate.unwrap_or_else(|| proposal.tax_rate.clone());
        let priced = match req.items {
            Some(inputs) => price_document(&inputs, &tax_rate)?,
            None => reprice_items(std::mem::take(&mut proposal.items), &tax_rate)?,
        };
        proposal.items = priced.items;
        proposal.tax_rate = priced.tax_rate;
        proposal.subtotal = priced.totals.subtotal;
        proposal.tax = priced.totals.tax;
        proposal.total = priced.totals.total;

        if req.notes.is_some() {
            proposal.notes = optional_text(req.notes);
        }
        if req.project_title.is_some() {
            proposal.project_title = optional_text(req.project_title);
        }
        if let Some(valid_until) = req.valid_until {
            proposal.valid_until = Some(valid_until);
        }

        let proposal = self.store.update_proposal(proposal, expected).await?;
        tracing::info!("Proposal {} updated, total {}", proposal.number, proposal.total);
        Ok(proposal)
    }

    pub async fn change_status(&self, id: Uuid, to: ProposalStatus) -> Result<Proposal, AppError> {
        let proposal = self.get(id).await?;

        match plan_transition(proposal.status, to)? {
            Transition::Unchanged => Ok(proposal),
            Transition::Move { from, to } => {
                let proposal = self.store.set_proposal_status(id, from, to).await?;
                tracing::info!("Proposal {} moved {} -> {}", proposal.number, from, to);
                Ok(proposal)
            }
        }
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        let proposal = self.get(id).await?;
        if let Err(e) = ensure_proposal_deletable(proposal.status) {
            tracing::warn!("Refusing to delete proposal {}: {}", proposal.number, e);
            return Err(e);
        }

        if !self.store.delete_proposal(id, proposal.status).await? {
            return Err(not_found("Proposal", id));
        }
        tracing::info!("Proposal {} deleted", proposal.number);
        Ok(())
    }

    /// Emails the proposal to its customer, then marks a draft as sent.
    ///
    /// Sent and viewed proposals can be re-sent without a status change. A failed
    /// dispatch leaves the status untouched.
    pub async fn send(&self, id: Uuid, actor_id: Uuid) -> Result<Proposal, AppError> {
        let proposal = self.get(id).await?;

        if proposal.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "Proposal {} is {} and cannot be sent",
                proposal.number, proposal.status
            )));
        }
        if proposal.customer.email.is_none() {
            return Err(AppError::Validation(format!(
                "Proposal {} has no recipient email",
                proposal.number
            )));
        }

        self.dispatcher.send_proposal(&proposal).await?;
        tracing::info!("Proposal {} sent by {}", proposal.number, actor_id);

        if proposal.status == ProposalStatus::Draft {
            return self
                .store
                .set_proposal_status(id, ProposalStatus::Draft, ProposalStatus::Sent)
                .await;
        }
        Ok(proposal)
    }
}

// ============ Projects ============

pub struct ProjectService {
    store: SharedStore,
}

fn validate_schedule(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<(), AppError> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(AppError::Validation(format!(
                "End date {} is before start date {}",
                end, start
            )));
        }
    }
    Ok(())
}

impl ProjectService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: Uuid) -> Result<Project, AppError> {
        self.store
            .get_project(id)
            .await?
            .ok_or_else(|| not_found("Project", id))
    }

    pub async fn list(&self, filter: &ListFilter<ProjectStatus>) -> Result<Vec<Project>, AppError> {
        self.store.list_projects(filter).await
    }

    pub async fn detail(&self, id: Uuid) -> Result<ProjectDetail, AppError> {
        let project = self.get(id).await?;
        let updates = self.store.list_project_updates(id).await?;
        let documents = self.store.list_documents(id).await?;
        Ok(ProjectDetail {
            project,
            updates,
            documents,
        })
    }

    /// Creates a project directly for an existing customer.
    pub async fn create(&self, req: CreateProjectRequest) -> Result<Project, AppError> {
        let title = require_text("Title", &req.title)?;
        if let Some(budget) = &req.budget {
            validate_non_negative("Budget", budget)?;
        }
        validate_schedule(req.start_date, req.end_date)?;

        self.store
            .get_customer(req.customer_id)
            .await?
            .ok_or_else(|| not_found("Customer", req.customer_id))?;

        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            customer_id: req.customer_id,
            proposal_id: None,
            title,
            description: optional_text(req.description),
            status: ProjectStatus::Pending,
            budget: req.budget,
            start_date: req.start_date,
            end_date: req.end_date,
            address: optional_text(req.address),
            created_at: now,
            updated_at: now,
        };

        let project = self.store.insert_project(project).await?;
        tracing::info!("Project {} created for customer {}", project.id, project.customer_id);
        Ok(project)
    }

    pub async fn update(&self, id: Uuid, req: UpdateProjectRequest) -> Result<Project, AppError> {
        let mut project = self.get(id).await?;

        if let Some(title) = req.title {
            project.title = require_text("Title", &title)?;
        }
        if req.description.is_some() {
            project.description = optional_text(req.description);
        }
        if let Some(budget) = req.budget {
            validate_non_negative("Budget", &budget)?;
            project.budget = Some(budget);
        }
        if let Some(start) = req.start_date {
            project.start_date = Some(start);
        }
        if let Some(end) = req.end_date {
            project.end_date = Some(end);
        }
        if req.address.is_some() {
            project.address = optional_text(req.address);
        }
        validate_schedule(project.start_date, project.end_date)?;

        let project = self.store.update_project(project).await?;
        tracing::info!("Project {} updated", id);
        Ok(project)
    }

    pub async fn change_status(&self, id: Uuid, to: ProjectStatus) -> Result<Project, AppError> {
        let project = self.get(id).await?;

        match plan_transition(project.status, to)? {
            Transition::Unchanged => Ok(project),
            Transition::Move { from, to } => {
                let project = self.store.set_project_status(id, from, to).await?;
                tracing::info!("Project {} moved {} -> {}", id, from, to);
                Ok(project)
            }
        }
    }

    pub async fn add_update(
        &self,
        id: Uuid,
        req: AddProjectUpdateRequest,
        actor_id: Uuid,
    ) -> Result<ProjectUpdate, AppError> {
        let content = require_text("Update content", &req.content)?;
        self.get(id).await?;

        let update = ProjectUpdate {
            id: Uuid::new_v4(),
            project_id: id,
            author_id: actor_id,
            content,
            created_at: Utc::now(),
        };
        self.store.insert_project_update(update).await
    }

    pub async fn updates(&self, id: Uuid) -> Result<Vec<ProjectUpdate>, AppError> {
        self.get(id).await?;
        self.store.list_project_updates(id).await
    }

    /// Records metadata for a blob already placed in external storage.
    pub async fn add_document(
        &self,
        id: Uuid,
        req: AddDocumentRequest,
        actor_id: Uuid,
    ) -> Result<ProjectDocument, AppError> {
        let name = require_text("Document name", &req.name)?;
        let storage_key = require_text("Storage key", &req.storage_key)?;
        if req.size_bytes < 0 {
            return Err(AppError::Validation("Document size cannot be negative".to_string()));
        }
        self.get(id).await?;

        let document = ProjectDocument {
            id: Uuid::new_v4(),
            project_id: id,
            name,
            content_type: require_text("Content type", &req.content_type)?,
            size_bytes: req.size_bytes,
            storage_key,
            uploaded_by: actor_id,
            created_at: Utc::now(),
        };

        let document = self.store.insert_document(document).await?;
        tracing::info!("Document {} attached to project {}", document.name, id);
        Ok(document)
    }

    pub async fn documents(&self, id: Uuid) -> Result<Vec<ProjectDocument>, AppError> {
        self.get(id).await?;
        self.store.list_documents(id).await
    }
}

// ============ Invoices ============

pub struct InvoiceService {
    store: SharedStore,
}

impl InvoiceService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: Uuid) -> Result<Invoice, AppError> {
        self.store
            .get_invoice(id)
            .await?
            .ok_or_else(|| not_found("Invoice", id))
    }

    pub async fn list(&self, filter: &ListFilter<InvoiceStatus>) -> Result<Vec<Invoice>, AppError> {
        self.store.list_invoices(filter).await
    }

    pub async fn detail(&self, id: Uuid) -> Result<InvoiceDetail, AppError> {
        let invoice = self.get(id).await?;
        let payments = self.store.list_invoice_payments(id).await?;
        Ok(InvoiceDetail { invoice, payments })
    }

    /// Creates a draft invoice priced by the same calculator as proposals.
    ///
    /// When the invoice references a customer, a billing note recording the invoice
    /// and its total is stored in the same write.
    pub async fn create(&self, req: CreateInvoiceRequest, actor_id: Uuid) -> Result<Invoice, AppError> {
        let PricedDocument {
            items,
            tax_rate,
            totals,
        } = price_document(&req.items, &req.tax_rate)?;
        let customer = resolve_snapshot(&self.store, req.customer_id, req.customer).await?;

        if let Some(project_id) = req.project_id {
            self.store
                .get_project(project_id)
                .await?
                .ok_or_else(|| not_found("Project", project_id))?;
        }

        let now = Utc::now();
        let mut invoice = Invoice {
            id: Uuid::new_v4(),
            number: document_number("INV", now.date_naive()),
            customer_id: req.customer_id,
            customer,
            project_id: req.project_id,
            status: InvoiceStatus::Draft,
            items,
            subtotal: totals.subtotal,
            tax_rate,
            tax: totals.tax,
            total: totals.total,
            amount_paid: BigDecimal::zero(),
            due_date: req.due_date,
            notes: optional_text(req.notes),
            created_by: actor_id,
            created_at: now,
            updated_at: now,
        };

        let billing_note = |invoice: &Invoice| {
            invoice.customer_id.map(|customer_id| CustomerNote {
                id: Uuid::new_v4(),
                customer_id,
                author_id: actor_id,
                note_type: "billing".to_string(),
                content: format!("Invoice {} created for ${}", invoice.number, invoice.total),
                created_at: now,
            })
        };

        let mut attempt = 1;
        let invoice = loop {
            let note = billing_note(&invoice);
            match self.store.commit_invoice(invoice.clone(), note).await {
                Err(e) if e.is_duplicate_of(INVOICE_NUMBER_KEY) && attempt < NUMBER_ATTEMPTS => {
                    tracing::warn!("Invoice number {} already taken, drawing another", invoice.number);
                    invoice.number = document_number("INV", now.date_naive());
                    attempt += 1;
                }
                result => break result?,
            }
        };
        tracing::info!(
            "Invoice {} ({}) created by {} for {}",
            invoice.number,
            invoice.id,
            actor_id,
            invoice.total
        );
        Ok(invoice)
    }

    pub async fn change_status(&self, id: Uuid, to: InvoiceStatus) -> Result<Invoice, AppError> {
        let invoice = self.get(id).await?;

        match plan_transition(invoice.status, to)? {
            Transition::Unchanged => Ok(invoice),
            Transition::Move { from, to } => {
                let invoice = self.store.set_invoice_status(id, from, to).await?;
                tracing::info!("Invoice {} moved {} -> {}", invoice.number, from, to);
                Ok(invoice)
            }
        }
    }

    /// Records a payment, moving the invoice to `partial` or `paid`.
    pub async fn record_payment(
        &self,
        id: Uuid,
        req: RecordPaymentRequest,
        actor_id: Uuid,
    ) -> Result<Invoice, AppError> {
        if req.amount <= BigDecimal::zero() {
            return Err(AppError::Validation("Payment amount must be positive".to_string()));
        }

        let invoice = self.get(id).await?;
        if !invoice.status.accepts_payment() {
            return Err(AppError::Conflict(format!(
                "Invoice {} is {} and cannot take payments",
                invoice.number, invoice.status
            )));
        }

        let balance = invoice.balance_due();
        if req.amount > balance {
            tracing::warn!(
                "Rejected overpayment on {}: {} > balance {}",
                invoice.number,
                req.amount,
                balance
            );
            return Err(AppError::Validation(format!(
                "Payment of {} exceeds balance due {}",
                req.amount, balance
            )));
        }

        let new_paid = &invoice.amount_paid + &req.amount;
        let new_status = InvoiceStatus::for_payment(&new_paid, &invoice.total);
        let payment = InvoicePayment {
            id: Uuid::new_v4(),
            invoice_id: id,
            amount: req.amount,
            method: optional_text(req.method),
            reference: optional_text(req.reference),
            recorded_by: actor_id,
            recorded_at: Utc::now(),
        };

        let invoice = self
            .store
            .commit_invoice_payment(payment, &invoice.amount_paid, new_status)
            .await?;
        tracing::info!(
            "Payment recorded on invoice {}: paid {} of {} ({})",
            invoice.number,
            invoice.amount_paid,
            invoice.total,
            invoice.status
        );
        Ok(invoice)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        let invoice = self.get(id).await?;
        ensure_invoice_deletable(invoice.status, &invoice.amount_paid)?;

        if !self.store.delete_invoice(id).await? {
            return Err(not_found("Invoice", id));
        }
        tracing::info!("Invoice {} deleted", invoice.number);
        Ok(())
    }
}

// ============ Subcontractors ============

pub struct SubcontractorService {
    store: SharedStore,
    phone_region: CountryId,
}

impl SubcontractorService {
    pub fn new(store: SharedStore, phone_region: CountryId) -> Self {
        Self { store, phone_region }
    }

    pub async fn get(&self, id: Uuid) -> Result<Subcontractor, AppError> {
        self.store
            .get_subcontractor(id)
            .await?
            .ok_or_else(|| not_found("Subcontractor", id))
    }

    pub async fn list(&self, filter: &ListFilter<SubcontractorStatus>) -> Result<Vec<Subcontractor>, AppError> {
        self.store.list_subcontractors(filter).await
    }

    pub async fn create(&self, req: CreateSubcontractorRequest) -> Result<Subcontractor, AppError> {
        let now = Utc::now();
        let subcontractor = Subcontractor {
            id: Uuid::new_v4(),
            business_name: require_text("Business name", &req.business_name)?,
            contact_name: require_text("Contact name", &req.contact_name)?,
            email: normalize_email(&req.email)?,
            phone: normalize_optional_phone(req.phone, self.phone_region)?,
            address: optional_text(req.address),
            license_number: optional_text(req.license_number),
            specialties: normalize_specialties(req.specialties),
            status: SubcontractorStatus::Pending,
            admin_notes: None,
            rating: None,
            project_count: 0,
            created_at: now,
            updated_at: now,
        };

        let subcontractor = self.store.insert_subcontractor(subcontractor).await?;
        tracing::info!("Subcontractor {} registered", subcontractor.id);
        Ok(subcontractor)
    }

    pub async fn update(&self, id: Uuid, req: UpdateSubcontractorRequest) -> Result<Subcontractor, AppError> {
        let mut sub = self.get(id).await?;

        if let Some(name) = req.business_name {
            sub.business_name = require_text("Business name", &name)?;
        }
        if let Some(name) = req.contact_name {
            sub.contact_name = require_text("Contact name", &name)?;
        }
        if let Some(email) = req.email {
            sub.email = normalize_email(&email)?;
        }
        if req.phone.is_some() {
            sub.phone = normalize_optional_phone(req.phone, self.phone_region)?;
        }
        if req.address.is_some() {
            sub.address = optional_text(req.address);
        }
        if req.license_number.is_some() {
            sub.license_number = optional_text(req.license_number);
        }
        if let Some(specialties) = req.specialties {
            sub.specialties = normalize_specialties(specialties);
        }
        if let Some(rating) = req.rating {
            validate_rating(&rating)?;
            sub.rating = Some(rating);
        }
        if let Some(count) = req.project_count {
            if count < 0 {
                return Err(AppError::Validation("Project count cannot be negative".to_string()));
            }
            sub.project_count = count;
        }

        let sub = self.store.update_subcontractor(sub).await?;
        tracing::info!("Subcontractor {} updated", id);
        Ok(sub)
    }

    /// Review decision or activity change, with optional admin notes.
    pub async fn change_status(
        &self,
        id: Uuid,
        to: SubcontractorStatus,
        admin_notes: Option<String>,
    ) -> Result<Subcontractor, AppError> {
        let sub = self.get(id).await?;
        let admin_notes = optional_text(admin_notes);

        let from = match plan_transition(sub.status, to)? {
            Transition::Unchanged if admin_notes.is_none() => return Ok(sub),
            Transition::Unchanged => sub.status,
            Transition::Move { from, .. } => from,
        };

        let sub = self
            .store
            .set_subcontractor_status(id, from, to, admin_notes)
            .await?;
        tracing::info!("Subcontractor {} moved {} -> {}", id, from, to);
        Ok(sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn test_document_number_format() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 14).unwrap();
        let number = document_number("PRO", date);
        let pattern = Regex::new(r"^PRO-20260114-[0-9A-F]{8}$").unwrap();
        assert!(pattern.is_match(&number), "unexpected number {}", number);
    }

    #[test]
    fn test_schedule_validation() {
        let start = NaiveDate::from_ymd_opt(2026, 3, 1);
        let end = NaiveDate::from_ymd_opt(2026, 2, 1);
        assert!(validate_schedule(start, end).is_err());
        assert!(validate_schedule(end, start).is_ok());
        assert!(validate_schedule(start, None).is_ok());
    }

    #[test]
    fn test_snapshot_requires_name() {
        let err = validate_snapshot(CustomerSnapshot::default()).unwrap_err();
        assert!(err.is_validation());
    }
}
