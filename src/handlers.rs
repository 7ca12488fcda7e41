use crate::capabilities::{Actor, Capability, Role};
use crate::config::Config;
use crate::conversion::{in_flight_cache, ConversionService, InFlightCache};
use crate::credentials::CredentialHasher;
use crate::errors::AppError;
use crate::models::*;
use crate::notifications::SharedDispatcher;
use crate::services::{
    CustomerService, InvoiceService, LeadService, ProjectService, ProposalService,
    SubcontractorService,
};
use crate::status::{InvoiceStatus, LeadStatus, ProjectStatus, ProposalStatus, SubcontractorStatus};
use crate::store::SharedStore;
use crate::validation::parse_region;
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use phonenumber::country::Id as CountryId;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Record storage (PostgreSQL or in-memory).
    pub store: SharedStore,
    /// Application configuration.
    pub config: Config,
    /// Outbound proposal delivery.
    pub dispatcher: SharedDispatcher,
    /// Portal credential hashing, configured with the minimum password length.
    pub hasher: CredentialHasher,
    /// Region for phone numbers entered without a country code.
    pub phone_region: CountryId,
    /// Conversions currently running, keyed by `lead:{id}` / `proposal:{id}`.
    pub conversions_in_flight: InFlightCache,
}

impl AppState {
    pub fn new(store: SharedStore, config: Config, dispatcher: SharedDispatcher) -> Result<Self, AppError> {
        let phone_region = parse_region(&config.phone_default_region)?;
        let hasher = CredentialHasher::new(config.portal_min_password_length);
        Ok(Self {
            store,
            config,
            dispatcher,
            hasher,
            phone_region,
            conversions_in_flight: in_flight_cache(),
        })
    }

    fn leads(&self) -> LeadService {
        LeadService::new(self.store.clone(), self.phone_region)
    }

    fn customers(&self) -> CustomerService {
        CustomerService::new(self.store.clone(), self.phone_region, self.hasher.clone())
    }

    fn proposals(&self) -> ProposalService {
        ProposalService::new(self.store.clone(), self.dispatcher.clone())
    }

    fn projects(&self) -> ProjectService {
        ProjectService::new(self.store.clone())
    }

    fn invoices(&self) -> InvoiceService {
        InvoiceService::new(self.store.clone())
    }

    fn subcontractors(&self) -> SubcontractorService {
        SubcontractorService::new(self.store.clone(), self.phone_region)
    }

    fn conversions(&self) -> ConversionService {
        ConversionService::new(
            self.store.clone(),
            self.hasher.clone(),
            self.conversions_in_flight.clone(),
        )
    }
}

fn required_header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, AppError> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Unauthorized(format!("Missing {} header", name)))
}

/// Identity set by the fronting auth proxy.
#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = Uuid::parse_str(required_header(parts, ACTOR_ID_HEADER)?)
            .map_err(|_| AppError::Unauthorized(format!("Malformed {} header", ACTOR_ID_HEADER)))?;
        let role = Role::from_str(required_header(parts, ACTOR_ROLE_HEADER)?)?;

        Ok(Actor::new(id, role))
    }
}

/// `?status=...&customer_id=...` on list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub customer_id: Option<Uuid>,
}

impl ListQuery {
    fn into_filter<S>(self) -> Result<ListFilter<S>, AppError>
    where
        S: FromStr<Err = AppError>,
    {
        let status = match self.status.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => Some(s.parse::<S>()?),
            _ => None,
        };
        Ok(ListFilter {
            status,
            customer_id: self.customer_id,
        })
    }
}

/// Health check endpoint.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - HTTP 200 OK with health status JSON.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "quote-to-cash",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

// ============ Leads ============

/// GET /api/v1/leads
///
/// Lists leads, newest first, optionally filtered by `status`.
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Lead>>, AppError> {
    actor.require(Capability::ViewRecords)?;
    tracing::info!("GET /leads - {:?}", query);

    let filter = query.into_filter::<LeadStatus>()?;
    Ok(Json(state.leads().list(&filter).await?))
}

/// POST /api/v1/leads
///
/// # Arguments
///
/// * `state` - The application state.
/// * `actor` - The staff member creating the lead.
/// * `payload` - Contact fields; email and phone are validated and normalized.
///
/// # Returns
///
/// * `Result<(StatusCode, Json<Lead>), AppError>` - HTTP 201 with the new lead.
pub async fn create_lead(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<CreateLeadRequest>,
) -> Result<(StatusCode, Json<Lead>), AppError> {
    actor.require(Capability::ManageLeads)?;
    tracing::info!("POST /leads by {}", actor.id);

    let lead = state.leads().create(payload, actor.id).await?;
    Ok((StatusCode::CREATED, Json(lead)))
}

/// GET /api/v1/leads/:id
///
/// Returns the lead with its notes and activity log.
pub async fn get_lead(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<LeadDetail>, AppError> {
    actor.require(Capability::ViewRecords)?;
    tracing::info!("GET /leads/{}", id);

    Ok(Json(state.leads().detail(id).await?))
}

/// PUT /api/v1/leads/:id
pub async fn update_lead(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLeadRequest>,
) -> Result<Json<Lead>, AppError> {
    actor.require(Capability::ManageLeads)?;
    tracing::info!("PUT /leads/{} by {}", id, actor.id);

    Ok(Json(state.leads().update(id, payload, actor.id).await?))
}

/// DELETE /api/v1/leads/:id
pub async fn delete_lead(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    actor.require(Capability::DeleteRecords)?;
    tracing::info!("DELETE /leads/{} by {}", id, actor.id);

    state.leads().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/leads/:id/status
///
/// Moves the lead along its pipeline. `won` is rejected here; use the convert
/// endpoint instead.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `actor` - The staff member changing the status.
/// * `id` - The UUID of the lead.
/// * `payload` - The target status.
///
/// # Returns
///
/// * `Result<Json<Lead>, AppError>` - The updated lead, or 409 for an illegal transition.
pub async fn update_lead_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusChangeRequest<String>>,
) -> Result<Json<Lead>, AppError> {
    actor.require(Capability::ManageLeads)?;
    let to = payload.status.parse::<LeadStatus>()?;
    tracing::info!("PUT /leads/{}/status -> {} by {}", id, to, actor.id);

    Ok(Json(state.leads().change_status(id, to, actor.id).await?))
}

/// POST /api/v1/leads/:id/notes
pub async fn add_lead_note(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddNoteRequest>,
) -> Result<(StatusCode, Json<LeadNote>), AppError> {
    actor.require(Capability::ManageLeads)?;
    tracing::info!("POST /leads/{}/notes by {}", id, actor.id);

    let note = state.leads().add_note(id, payload, actor.id).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

/// GET /api/v1/leads/:id/activities
pub async fn list_lead_activities(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LeadActivity>>, AppError> {
    actor.require(Capability::ViewRecords)?;
    tracing::info!("GET /leads/{}/activities", id);

    Ok(Json(state.leads().activities(id).await?))
}

/// POST /api/v1/leads/:id/convert
///
/// Converts the lead into a customer with portal access.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `actor` - The staff member performing the conversion.
/// * `id` - The UUID of the lead.
/// * `payload` - The customer's initial portal password.
///
/// # Returns
///
/// * `Result<(StatusCode, Json<ConvertLeadResponse>), AppError>` - HTTP 201 with the
///   new customer id. The lead is untouched on any error.
pub async fn convert_lead(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<ConvertLeadRequest>,
) -> Result<(StatusCode, Json<ConvertLeadResponse>), AppError> {
    actor.require(Capability::ConvertLeads)?;
    tracing::info!("POST /leads/{}/convert by {}", id, actor.id);

    let customer_id = state
        .conversions()
        .convert_lead_to_customer(id, payload.password, actor.id)
        .await?;
    Ok((StatusCode::CREATED, Json(ConvertLeadResponse { customer_id })))
}

// ============ Customers ============

/// GET /api/v1/customers
pub async fn list_customers(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<Vec<Customer>>, AppError> {
    actor.require(Capability::ViewRecords)?;
    tracing::info!("GET /customers");

    Ok(Json(state.customers().list().await?))
}

/// POST /api/v1/customers
///
/// Creates a customer directly, without a lead. The password is hashed before storage.
pub async fn create_customer(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<CreateCustomerRequest>,
) -> Result<(StatusCode, Json<Customer>), AppError> {
    actor.require(Capability::ManageCustomers)?;
    tracing::info!("POST /customers by {}", actor.id);

    let customer = state.customers().create(payload).await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

/// GET /api/v1/customers/:id
///
/// Returns the customer together with their projects.
pub async fn get_customer(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<CustomerDetail>, AppError> {
    actor.require(Capability::ViewRecords)?;
    tracing::info!("GET /customers/{}", id);

    Ok(Json(state.customers().detail(id).await?))
}

/// DELETE /api/v1/customers/:id
///
/// Refused with 409 while the customer owns any project.
pub async fn delete_customer(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    actor.require(Capability::DeleteRecords)?;
    tracing::info!("DELETE /customers/{} by {}", id, actor.id);

    state.customers().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/customers/:id/notes
pub async fn list_customer_notes(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<CustomerNote>>, AppError> {
    actor.require(Capability::ViewRecords)?;
    tracing::info!("GET /customers/{}/notes", id);

    Ok(Json(state.customers().notes(id).await?))
}

/// POST /api/v1/customers/:id/notes
pub async fn add_customer_note(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddNoteRequest>,
) -> Result<(StatusCode, Json<CustomerNote>), AppError> {
    actor.require(Capability::ManageCustomers)?;
    tracing::info!("POST /customers/{}/notes by {}", id, actor.id);

    let note = state.customers().add_note(id, payload, actor.id).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

/// POST /api/v1/customers/:id/verify-credential
///
/// # Returns
///
/// * `Result<Json<serde_json::Value>, AppError>` - `{"valid": bool}`.
pub async fn verify_customer_credential(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<VerifyCredentialRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    actor.require(Capability::ManageCustomers)?;
    tracing::info!("POST /customers/{}/verify-credential", id);

    let valid = state.customers().verify_credential(id, payload.password).await?;
    Ok(Json(json!({ "valid": valid })))
}

// ============ Proposals ============

/// GET /api/v1/proposals
///
/// Optional filters: `status`, `customer_id`.
pub async fn list_proposals(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Proposal>>, AppError> {
    actor.require(Capability::ViewRecords)?;
    tracing::info!("GET /proposals - {:?}", query);

    let filter = query.into_filter::<ProposalStatus>()?;
    Ok(Json(state.proposals().list(&filter).await?))
}

/// POST /api/v1/proposals
///
/// Creates a draft proposal.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `actor` - The staff member creating the proposal.
/// * `payload` - Line items, tax rate and customer link or snapshot. Any totals in the
///   body are ignored; subtotal, tax and total are computed server-side.
///
/// # Returns
///
/// * `Result<(StatusCode, Json<Proposal>), AppError>` - HTTP 201 with the priced proposal.
pub async fn create_proposal(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<CreateProposalRequest>,
) -> Result<(StatusCode, Json<Proposal>), AppError> {
    actor.require(Capability::ManageProposals)?;
    tracing::info!("POST /proposals by {} ({} items)", actor.id, payload.items.len());

    let proposal = state.proposals().create(payload, actor.id).await?;
    Ok((StatusCode::CREATED, Json(proposal)))
}

/// GET /api/v1/proposals/:id
pub async fn get_proposal(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Proposal>, AppError> {
    actor.require(Capability::ViewRecords)?;
    tracing::info!("GET /proposals/{}", id);

    Ok(Json(state.proposals().get(id).await?))
}

/// PUT /api/v1/proposals/:id
///
/// Edits an unaccepted proposal; totals are recomputed from the resulting items.
pub async fn update_proposal(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProposalRequest>,
) -> Result<Json<Proposal>, AppError> {
    actor.require(Capability::ManageProposals)?;
    tracing::info!("PUT /proposals/{} by {}", id, actor.id);

    Ok(Json(state.proposals().update(id, payload).await?))
}

/// DELETE /api/v1/proposals/:id
///
/// Accepted proposals are protected (409).
pub async fn delete_proposal(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    actor.require(Capability::DeleteRecords)?;
    tracing::info!("DELETE /proposals/{} by {}", id, actor.id);

    state.proposals().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/proposals/:id/status
pub async fn update_proposal_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusChangeRequest<String>>,
) -> Result<Json<Proposal>, AppError> {
    actor.require(Capability::ManageProposals)?;
    let to = payload.status.parse::<ProposalStatus>()?;
    tracing::info!("PUT /proposals/{}/status -> {} by {}", id, to, actor.id);

    Ok(Json(state.proposals().change_status(id, to).await?))
}

/// POST /api/v1/proposals/:id/send
///
/// Emails the proposal; a draft becomes `sent` once delivery succeeds.
pub async fn send_proposal(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Proposal>, AppError> {
    actor.require(Capability::SendProposals)?;
    tracing::info!("POST /proposals/{}/send by {}", id, actor.id);

    Ok(Json(state.proposals().send(id, actor.id).await?))
}

/// POST /api/v1/proposals/:id/convert
///
/// # Returns
///
/// * `Result<Json<ConvertProposalResponse>, AppError>` - The project id. Converting the
///   same proposal again returns the same project.
pub async fn convert_proposal(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<ConvertProposalResponse>, AppError> {
    actor.require(Capability::ConvertProposals)?;
    tracing::info!("POST /proposals/{}/convert by {}", id, actor.id);

    let project_id = state
        .conversions()
        .convert_proposal_to_project(id, actor.id)
        .await?;
    Ok(Json(ConvertProposalResponse { project_id }))
}

// ============ Projects ============

/// GET /api/v1/projects
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Project>>, AppError> {
    actor.require(Capability::ViewRecords)?;
    tracing::info!("GET /projects - {:?}", query);

    let filter = query.into_filter::<ProjectStatus>()?;
    Ok(Json(state.projects().list(&filter).await?))
}

/// POST /api/v1/projects
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    actor.require(Capability::ManageProjects)?;
    tracing::info!("POST /projects for customer {} by {}", payload.customer_id, actor.id);

    let project = state.projects().create(payload).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /api/v1/projects/:id
///
/// Returns the project with its updates and document metadata.
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<ProjectDetail>, AppError> {
    actor.require(Capability::ViewRecords)?;
    tracing::info!("GET /projects/{}", id);

    Ok(Json(state.projects().detail(id).await?))
}

/// PUT /api/v1/projects/:id
pub async fn update_project(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProjectRequest>,
) -> Result<Json<Project>, AppError> {
    actor.require(Capability::ManageProjects)?;
    tracing::info!("PUT /projects/{} by {}", id, actor.id);

    Ok(Json(state.projects().update(id, payload).await?))
}

/// PUT /api/v1/projects/:id/status
pub async fn update_project_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusChangeRequest<String>>,
) -> Result<Json<Project>, AppError> {
    actor.require(Capability::ManageProjects)?;
    let to = payload.status.parse::<ProjectStatus>()?;
    tracing::info!("PUT /projects/{}/status -> {} by {}", id, to, actor.id);

    Ok(Json(state.projects().change_status(id, to).await?))
}

/// GET /api/v1/projects/:id/updates
pub async fn list_project_updates(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ProjectUpdate>>, AppError> {
    actor.require(Capability::ViewRecords)?;
    tracing::info!("GET /projects/{}/updates", id);

    Ok(Json(state.projects().updates(id).await?))
}

/// POST /api/v1/projects/:id/updates
pub async fn add_project_update(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddProjectUpdateRequest>,
) -> Result<(StatusCode, Json<ProjectUpdate>), AppError> {
    actor.require(Capability::ManageProjects)?;
    tracing::info!("POST /projects/{}/updates by {}", id, actor.id);

    let update = state.projects().add_update(id, payload, actor.id).await?;
    Ok((StatusCode::CREATED, Json(update)))
}

/// GET /api/v1/projects/:id/documents
pub async fn list_project_documents(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ProjectDocument>>, AppError> {
    actor.require(Capability::ViewRecords)?;
    tracing::info!("GET /projects/{}/documents", id);

    Ok(Json(state.projects().documents(id).await?))
}

/// POST /api/v1/projects/:id/documents
///
/// Records metadata for a file the client already uploaded to blob storage.
pub async fn add_project_document(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddDocumentRequest>,
) -> Result<(StatusCode, Json<ProjectDocument>), AppError> {
    actor.require(Capability::ManageProjects)?;
    tracing::info!("POST /projects/{}/documents ({}) by {}", id, payload.name, actor.id);

    let document = state.projects().add_document(id, payload, actor.id).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

// ============ Invoices ============

/// GET /api/v1/invoices
pub async fn list_invoices(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Invoice>>, AppError> {
    actor.require(Capability::ViewRecords)?;
    tracing::info!("GET /invoices - {:?}", query);

    let filter = query.into_filter::<InvoiceStatus>()?;
    Ok(Json(state.invoices().list(&filter).await?))
}

/// POST /api/v1/invoices
///
/// Creates a draft invoice. When `customer_id` is set, a billing note recording the
/// invoice number and total is added to that customer in the same write.
///
/// # Returns
///
/// * `Result<(StatusCode, Json<Invoice>), AppError>` - HTTP 201 with the priced invoice.
pub async fn create_invoice(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<Invoice>), AppError> {
    actor.require(Capability::ManageInvoices)?;
    tracing::info!("POST /invoices by {} ({} items)", actor.id, payload.items.len());

    let invoice = state.invoices().create(payload, actor.id).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

/// GET /api/v1/invoices/:id
pub async fn get_invoice(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<InvoiceDetail>, AppError> {
    actor.require(Capability::ViewRecords)?;
    tracing::info!("GET /invoices/{}", id);

    Ok(Json(state.invoices().detail(id).await?))
}

/// DELETE /api/v1/invoices/:id
pub async fn delete_invoice(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    actor.require(Capability::DeleteRecords)?;
    tracing::info!("DELETE /invoices/{} by {}", id, actor.id);

    state.invoices().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/invoices/:id/status
///
/// Only `sent` and `void` can be set directly; payments drive `partial` and `paid`.
pub async fn update_invoice_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusChangeRequest<String>>,
) -> Result<Json<Invoice>, AppError> {
    actor.require(Capability::ManageInvoices)?;
    let to = payload.status.parse::<InvoiceStatus>()?;
    tracing::info!("PUT /invoices/{}/status -> {} by {}", id, to, actor.id);

    Ok(Json(state.invoices().change_status(id, to).await?))
}

/// POST /api/v1/invoices/:id/payments
pub async fn record_invoice_payment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<RecordPaymentRequest>,
) -> Result<Json<Invoice>, AppError> {
    actor.require(Capability::RecordPayments)?;
    tracing::info!("POST /invoices/{}/payments {} by {}", id, payload.amount, actor.id);

    Ok(Json(state.invoices().record_payment(id, payload, actor.id).await?))
}

// ============ Subcontractors ============

/// GET /api/v1/subcontractors
pub async fn list_subcontractors(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Subcontractor>>, AppError> {
    actor.require(Capability::ViewRecords)?;
    tracing::info!("GET /subcontractors - {:?}", query);

    let filter = query.into_filter::<SubcontractorStatus>()?;
    Ok(Json(state.subcontractors().list(&filter).await?))
}

/// POST /api/v1/subcontractors
pub async fn create_subcontractor(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<CreateSubcontractorRequest>,
) -> Result<(StatusCode, Json<Subcontractor>), AppError> {
    actor.require(Capability::ManageSubcontractors)?;
    tracing::info!("POST /subcontractors ({}) by {}", payload.business_name, actor.id);

    let sub = state.subcontractors().create(payload).await?;
    Ok((StatusCode::CREATED, Json(sub)))
}

/// GET /api/v1/subcontractors/:id
pub async fn get_subcontractor(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Subcontractor>, AppError> {
    actor.require(Capability::ViewRecords)?;
    tracing::info!("GET /subcontractors/{}", id);

    Ok(Json(state.subcontractors().get(id).await?))
}

/// PUT /api/v1/subcontractors/:id
pub async fn update_subcontractor(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateSubcontractorRequest>,
) -> Result<Json<Subcontractor>, AppError> {
    actor.require(Capability::ManageSubcontractors)?;
    tracing::info!("PUT /subcontractors/{} by {}", id, actor.id);

    Ok(Json(state.subcontractors().update(id, payload).await?))
}

/// PUT /api/v1/subcontractors/:id/status
///
/// Review decisions (`approved`, `rejected`) and activity changes, with optional
/// `admin_notes`.
pub async fn update_subcontractor_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusChangeRequest<String>>,
) -> Result<Json<Subcontractor>, AppError> {
    actor.require(Capability::ReviewSubcontractors)?;
    let to = payload.status.parse::<SubcontractorStatus>()?;
    tracing::info!("PUT /subcontractors/{}/status -> {} by {}", id, to, actor.id);

    Ok(Json(
        state
            .subcontractors()
            .change_status(id, to, payload.admin_notes)
            .await?,
    ))
}

/// Every `/api/v1` route. Middleware is added by the caller.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Leads
        .route("/api/v1/leads", get(list_leads).post(create_lead))
        .route(
            "/api/v1/leads/:id",
            get(get_lead).put(update_lead).delete(delete_lead),
        )
        .route("/api/v1/leads/:id/status", put(update_lead_status))
        .route("/api/v1/leads/:id/notes", post(add_lead_note))
        .route("/api/v1/leads/:id/activities", get(list_lead_activities))
        .route("/api/v1/leads/:id/convert", post(convert_lead))
        // Customers
        .route("/api/v1/customers", get(list_customers).post(create_customer))
        .route(
            "/api/v1/customers/:id",
            get(get_customer).delete(delete_customer),
        )
        .route(
            "/api/v1/customers/:id/notes",
            get(list_customer_notes).post(add_customer_note),
        )
        .route(
            "/api/v1/customers/:id/verify-credential",
            post(verify_customer_credential),
        )
        // Proposals
        .route("/api/v1/proposals", get(list_proposals).post(create_proposal))
        .route(
            "/api/v1/proposals/:id",
            get(get_proposal).put(update_proposal).delete(delete_proposal),
        )
        .route("/api/v1/proposals/:id/status", put(update_proposal_status))
        .route("/api/v1/proposals/:id/send", post(send_proposal))
        .route("/api/v1/proposals/:id/convert", post(convert_proposal))
        // Projects
        .route("/api/v1/projects", get(list_projects).post(create_project))
        .route("/api/v1/projects/:id", get(get_project).put(update_project))
        .route("/api/v1/projects/:id/status", put(update_project_status))
        .route(
            "/api/v1/projects/:id/updates",
            get(list_project_updates).post(add_project_update),
        )
        .route(
            "/api/v1/projects/:id/documents",
            get(list_project_documents).post(add_project_document),
        )
        // Invoices
        .route("/api/v1/invoices", get(list_invoices).post(create_invoice))
        .route(
            "/api/v1/invoices/:id",
            get(get_invoice).delete(delete_invoice),
        )
        .route("/api/v1/invoices/:id/status", put(update_invoice_status))
        .route("/api/v1/invoices/:id/payments", post(record_invoice_payment))
        // Subcontractors
        .route(
            "/api/v1/subcontractors",
            get(list_subcontractors).post(create_subcontractor),
        )
        .route(
            "/api/v1/subcontractors/:id",
            get(get_subcontractor).put(update_subcontractor),
        )
        .route(
            "/api/v1/subcontractors/:id/status",
            put(update_subcontractor_status),
        )
}
