use crate::calculator::{LineItem, LineItemInput};
use crate::status::{
    InvoiceStatus, LeadPriority, LeadStatus, ProjectStatus, ProposalStatus, SubcontractorStatus,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============ Database Models ============

/// A prospective customer moving through the sales pipeline.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Lead {
    /// Unique identifier for the lead.
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    /// Contact email.
    pub email: Option<String>,
    /// Contact phone, normalized to E.164.
    pub phone: Option<String>,
    pub company: Option<String>,
    pub address: Option<String>,
    /// Where the lead came from (web form, referral, ...).
    pub source: Option<String>,
    /// Service the lead asked about.
    pub service_interest: Option<String>,
    /// Free-text message from the initial enquiry.
    pub message: Option<String>,
    /// Pipeline stage.
    pub status: LeadStatus,
    pub priority: LeadPriority,
    /// Estimated deal value.
    pub estimated_value: Option<BigDecimal>,
    /// Staff member the lead is assigned to.
    pub assigned_to: Option<Uuid>,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// Timestamp of last update.
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// Human-authored note attached to a lead.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct LeadNote {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub author_id: Uuid,
    /// Type tag (e.g. "general", "call", "email", "meeting").
    #[serde(rename = "type")]
    pub note_type: String,
    pub content: String,
    /// Pinned/important flag.
    pub important: bool,
    pub created_at: DateTime<Utc>,
}

/// What a lead activity entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "lead_activity_kind", rename_all = "snake_case")]
pub enum ActivityKind {
    Created,
    Updated,
    StatusChanged,
    NoteAdded,
    Converted,
}

/// System-generated audit entry for a lead.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct LeadActivity {
    pub id: Uuid,
    pub lead_id: Uuid,
    /// Staff member whose action produced the entry.
    pub actor_id: Uuid,
    pub kind: ActivityKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl LeadActivity {
    pub fn new(lead_id: Uuid, actor_id: Uuid, kind: ActivityKind, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            lead_id,
            actor_id,
            kind,
            description: description.into(),
            created_at: Utc::now(),
        }
    }
}

/// A paying customer with portal access.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    /// Lead this customer was converted from, if any.
    pub lead_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    /// Portal login; unique across customers.
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub address: Option<String>,
    /// Argon2id PHC string. Never serialized.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    /// Contact fields as copied onto proposals and invoices.
    pub fn snapshot(&self) -> CustomerSnapshot {
        CustomerSnapshot {
            name: self.full_name(),
            email: Some(self.email.clone()),
            phone: self.phone.clone(),
            address: self.address.clone(),
        }
    }
}

/// Note attached to a customer (billing events, staff remarks).
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct CustomerNote {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub author_id: Uuid,
    #[serde(rename = "type")]
    pub note_type: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Customer contact details captured on a document at creation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

/// A priced quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    /// Human-readable number, e.g. `PRO-20260114-3F9A07C2`.
    pub number: String,
    pub customer_id: Option<Uuid>,
    pub customer: CustomerSnapshot,
    /// Title given to the project created when this proposal converts.
    pub project_title: Option<String>,
    pub status: ProposalStatus,
    /// Ordered line items.
    pub items: Vec<LineItem>,
    pub subtotal: BigDecimal,
    /// Tax rate in percent.
    pub tax_rate: BigDecimal,
    pub tax: BigDecimal,
    pub total: BigDecimal,
    pub notes: Option<String>,
    pub valid_until: Option<NaiveDate>,
    pub created_by: Uuid,
    pub sent_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Work delivered to a customer.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub customer_id: Uuid,
    /// Proposal this project was converted from, if any. Unique.
    pub proposal_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub budget: Option<BigDecimal>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Progress update posted on a project.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ProjectUpdate {
    pub id: Uuid,
    pub project_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Metadata for a file stored outside the database.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ProjectDocument {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub content_type: String,
    pub size_bytes: i64,
    /// Key of the blob in external storage.
    pub storage_key: String,
    pub uploaded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A bill sent to a customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    /// Human-readable number, e.g. `INV-20260114-77C10B4E`.
    pub number: String,
    pub customer_id: Option<Uuid>,
    pub customer: CustomerSnapshot,
    pub project_id: Option<Uuid>,
    pub status: InvoiceStatus,
    pub items: Vec<LineItem>,
    pub subtotal: BigDecimal,
    pub tax_rate: BigDecimal,
    pub tax: BigDecimal,
    pub total: BigDecimal,
    /// Never exceeds `total`.
    pub amount_paid: BigDecimal,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn balance_due(&self) -> BigDecimal {
        &self.total - &self.amount_paid
    }
}

/// A payment recorded against an invoice.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct InvoicePayment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount: BigDecimal,
    pub method: Option<String>,
    pub reference: Option<String>,
    pub recorded_by: Uuid,
    pub recorded_at: DateTime<Utc>,
}

/// A third-party tradesperson.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Subcontractor {
    pub id: Uuid,
    pub business_name: String,
    pub contact_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub license_number: Option<String>,
    /// Sorted, de-duplicated trade specialties.
    pub specialties: Vec<String>,
    pub status: SubcontractorStatus,
    /// Internal notes from the reviewing admin.
    pub admin_notes: Option<String>,
    /// 0.0 - 5.0
    pub rating: Option<BigDecimal>,
    pub project_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============ Queries ============

/// Filter for list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ListFilter<S> {
    pub status: Option<S>,
    /// Parent customer.
    pub customer_id: Option<Uuid>,
}

impl<S> Default for ListFilter<S> {
    fn default() -> Self {
        Self {
            status: None,
            customer_id: None,
        }
    }
}

impl<S: Copy + PartialEq> ListFilter<S> {
    pub fn by_status(status: S) -> Self {
        Self {
            status: Some(status),
            customer_id: None,
        }
    }

    pub fn by_customer(customer_id: Uuid) -> Self {
        Self {
            status: None,
            customer_id: Some(customer_id),
        }
    }

    pub fn matches(&self, status: S, customer_id: Option<Uuid>) -> bool {
        self.status.map_or(true, |s| s == status)
            && self.customer_id.map_or(true, |c| Some(c) == customer_id)
    }
}

// ============ API Request Models ============

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLeadRequest {
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub address: Option<String>,
    pub source: Option<String>,
    pub service_interest: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub priority: LeadPriority,
    #[serde(default, deserialize_with = "crate::decimal::exact_option")]
    pub estimated_value: Option<BigDecimal>,
    pub assigned_to: Option<Uuid>,
}

/// Field edits for a lead. Status is changed through the status endpoint only.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateLeadRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub address: Option<String>,
    pub source: Option<String>,
    pub service_interest: Option<String>,
    pub message: Option<String>,
    pub priority: Option<LeadPriority>,
    #[serde(default, deserialize_with = "crate::decimal::exact_option")]
    pub estimated_value: Option<BigDecimal>,
    pub assigned_to: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusChangeRequest<S> {
    pub status: S,
    /// Only used by subcontractor reviews.
    #[serde(default)]
    pub admin_notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddNoteRequest {
    pub content: String,
    #[serde(rename = "type", default)]
    pub note_type: Option<String>,
    #[serde(default)]
    pub important: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConvertLeadRequest {
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertLeadResponse {
    pub customer_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeadDetail {
    pub lead: Lead,
    pub notes: Vec<LeadNote>,
    pub activities: Vec<LeadActivity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCustomerRequest {
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub address: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyCredentialRequest {
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerDetail {
    pub customer: Customer,
    pub projects: Vec<Project>,
}

/// New proposal. Any subtotal/tax/total in the body is ignored and recomputed.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProposalRequest {
    pub customer_id: Option<Uuid>,
    /// Required unless `customer_id` is given, in which case it defaults to the
    /// customer's current details.
    pub customer: Option<CustomerSnapshot>,
    pub project_title: Option<String>,
    pub items: Vec<LineItemInput>,
    #[serde(deserialize_with = "crate::decimal::exact")]
    pub tax_rate: BigDecimal,
    pub notes: Option<String>,
    pub valid_until: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProposalRequest {
    pub customer_id: Option<Uuid>,
    pub items: Option<Vec<LineItemInput>>,
    #[serde(default, deserialize_with = "crate::decimal::exact_option")]
    pub tax_rate: Option<BigDecimal>,
    pub notes: Option<String>,
    pub project_title: Option<String>,
    pub valid_until: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertProposalResponse {
    pub project_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProjectRequest {
    pub customer_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "crate::decimal::exact_option")]
    pub budget: Option<BigDecimal>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProjectRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "crate::decimal::exact_option")]
    pub budget: Option<BigDecimal>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddProjectUpdateRequest {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddDocumentRequest {
    pub name: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    pub size_bytes: i64,
    pub storage_key: String,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectDetail {
    pub project: Project,
    pub updates: Vec<ProjectUpdate>,
    pub documents: Vec<ProjectDocument>,
}

/// New invoice. Totals are computed server-side, as for proposals.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvoiceRequest {
    pub customer_id: Option<Uuid>,
    pub customer: Option<CustomerSnapshot>,
    pub project_id: Option<Uuid>,
    pub items: Vec<LineItemInput>,
    #[serde(deserialize_with = "crate::decimal::exact")]
    pub tax_rate: BigDecimal,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordPaymentRequest {
    #[serde(deserialize_with = "crate::decimal::exact")]
    pub amount: BigDecimal,
    pub method: Option<String>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    pub invoice: Invoice,
    pub payments: Vec<InvoicePayment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubcontractorRequest {
    pub business_name: String,
    pub contact_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub license_number: Option<String>,
    #[serde(default)]
    pub specialties: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSubcontractorRequest {
    pub business_name: Option<String>,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub license_number: Option<String>,
    pub specialties: Option<Vec<String>>,
    #[serde(default, deserialize_with = "crate::decimal::exact_option")]
    pub rating: Option<BigDecimal>,
    pub project_count: Option<i32>,
}
