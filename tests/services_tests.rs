/// Service-level workflows against the in-memory store
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use quote_to_cash::credentials::CredentialHasher;
use quote_to_cash::errors::AppError;
use quote_to_cash::memory_store::MemoryStore;
use quote_to_cash::models::*;
use quote_to_cash::notifications::{LogDispatcher, NotificationDispatcher, SharedDispatcher};
use quote_to_cash::services::{
    CustomerService, InvoiceService, LeadService, ProjectService, ProposalService,
    SubcontractorService,
};
use quote_to_cash::status::{
    InvoiceStatus, LeadStatus, ProjectStatus, ProposalStatus, SubcontractorStatus,
};
use quote_to_cash::store::{EntityStore, SharedStore, PROPOSAL_NUMBER_KEY};
use quote_to_cash::validation::parse_region;
use serde_json::json;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

fn memory_store() -> SharedStore {
    Arc::new(MemoryStore::new())
}

/// Remembers which proposals were handed over for delivery.
#[derive(Default)]
struct RecordingDispatcher {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send_proposal(&self, proposal: &Proposal) -> Result<(), AppError> {
        self.sent.lock().unwrap().push(proposal.number.clone());
        Ok(())
    }
}

struct FailingDispatcher;

#[async_trait]
impl NotificationDispatcher for FailingDispatcher {
    async fn send_proposal(&self, _proposal: &Proposal) -> Result<(), AppError> {
        Err(AppError::Notification("mail relay unreachable".to_string()))
    }
}

async fn create_customer(store: &SharedStore, email: &str) -> Customer {
    let hasher = CredentialHasher::with_cost(8, 8192, 1, 1).unwrap();
    let service = CustomerService::new(store.clone(), parse_region("US").unwrap(), hasher);
    let req: CreateCustomerRequest = serde_json::from_value(json!({
        "first_name": "Sam",
        "last_name": "Okafor",
        "email": email,
        "password": "correct-horse-battery"
    }))
    .unwrap();
    service.create(req).await.unwrap()
}

fn proposal_request(customer_id: Option<Uuid>, email: Option<&str>) -> CreateProposalRequest {
    let snapshot = match customer_id {
        Some(_) => serde_json::Value::Null,
        None => json!({"name": "Pat Lee", "email": email}),
    };
    serde_json::from_value(json!({
        "customer_id": customer_id,
        "customer": snapshot,
        "items": [
            {"description": "Cabinets", "quantity": "1", "unit_price": "300"},
            {"description": "Labor", "quantity": "4", "rate": "50"}
        ],
        "tax_rate": "7",
        // Client-side totals are not trusted
        "subtotal": "1",
        "total": "1"
    }))
    .unwrap()
}

fn invoice_request(customer_id: Option<Uuid>) -> CreateInvoiceRequest {
    serde_json::from_value(json!({
        "customer_id": customer_id,
        "customer": if customer_id.is_none() { json!({"name": "Pat Lee"}) } else { serde_json::Value::Null },
        "items": [
            {"description": "Cabinets", "quantity": "1", "unit_price": "300"},
            {"description": "Labor", "quantity": "4", "unit_price": "50"}
        ],
        "tax_rate": "7"
    }))
    .unwrap()
}

fn payment(amount: &str) -> RecordPaymentRequest {
    RecordPaymentRequest {
        amount: dec(amount),
        method: Some("check".to_string()),
        reference: None,
    }
}

// ============ Proposals ============

#[tokio::test]
async fn test_proposal_totals_are_computed_server_side() {
    let store = memory_store();
    let service = ProposalService::new(store, Arc::new(LogDispatcher));

    let proposal = service
        .create(proposal_request(None, Some("pat@example.com")), Uuid::new_v4())
        .await
        .unwrap();

    assert_eq!(proposal.status, ProposalStatus::Draft);
    assert_eq!(proposal.subtotal, dec("500"));
    assert_eq!(proposal.tax, dec("35.00"));
    assert_eq!(proposal.total, dec("535.00"));
    assert_eq!(proposal.items[1].amount, dec("200"));
    assert!(proposal.number.starts_with("PRO-"));
}

#[tokio::test]
async fn test_proposal_and_invoice_with_same_items_agree() {
    let store = memory_store();
    let proposals = ProposalService::new(store.clone(), Arc::new(LogDispatcher));
    let invoices = InvoiceService::new(store);
    let actor = Uuid::new_v4();

    let proposal = proposals
        .create(proposal_request(None, None), actor)
        .await
        .unwrap();
    let invoice = invoices.create(invoice_request(None), actor).await.unwrap();

    assert_eq!(proposal.subtotal, invoice.subtotal);
    assert_eq!(proposal.tax, invoice.tax);
    assert_eq!(proposal.total, invoice.total);
}

#[tokio::test]
async fn test_proposal_update_recomputes_totals() {
    let store = memory_store();
    let service = ProposalService::new(store, Arc::new(LogDispatcher));
    let proposal = service
        .create(proposal_request(None, None), Uuid::new_v4())
        .await
        .unwrap();

    let updated = service
        .update(
            proposal.id,
            UpdateProposalRequest {
                tax_rate: Some(dec("10")),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.subtotal, dec("500"));
    assert_eq!(updated.tax, dec("50.00"));
    assert_eq!(updated.total, dec("550.00"));

    let items: Vec<quote_to_cash::calculator::LineItemInput> =
        serde_json::from_value(json!([{"description": "Deck", "quantity": "2.5", "unit_price": "19.99"}]))
            .unwrap();
    let updated = service
        .update(
            proposal.id,
            UpdateProposalRequest {
                items: Some(items),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    // 2.5 * 19.99 = 49.975; tax at 10% = 4.9975 -> 5.00
    assert_eq!(updated.items.len(), 1);
    assert_eq!(updated.subtotal, dec("49.975"));
    assert_eq!(updated.tax, dec("5.00"));
    assert_eq!(updated.total, dec("54.975"));
}

#[tokio::test]
async fn test_numeric_json_prices_are_exact() {
    let store = memory_store();
    let proposals = ProposalService::new(store.clone(), Arc::new(LogDispatcher));
    let invoices = InvoiceService::new(store);
    let actor = Uuid::new_v4();
    let body = json!({
        "customer": {"name": "Pat Lee"},
        "items": [
            {"service": "Paint", "quantity": 3, "price": 0.1},
            {"service": "Trim", "quantity": 1, "price": 19.99}
        ],
        "tax_rate": 7
    });

    let req: CreateProposalRequest = serde_json::from_value(body.clone()).unwrap();
    assert_eq!(req.items[0].unit_price, dec("0.1"));
    let proposal = proposals.create(req, actor).await.unwrap();
    // 3 * 0.1 + 19.99 = 20.29; 7% of that is 1.4203 -> 1.42
    assert_eq!(proposal.subtotal, dec("20.29"));
    assert_eq!(proposal.tax, dec("1.42"));
    assert_eq!(proposal.total, dec("21.71"));

    let req: CreateInvoiceRequest = serde_json::from_slice(body.to_string().as_bytes()).unwrap();
    let invoice = invoices.create(req, actor).await.unwrap();
    assert_eq!(invoice.total, proposal.total);

    let req: RecordPaymentRequest = serde_json::from_str(r#"{"amount": 21.71}"#).unwrap();
    let paid = invoices.record_payment(invoice.id, req, actor).await.unwrap();
    assert_eq!(paid.status, InvoiceStatus::Paid);
}

#[tokio::test]
async fn test_negative_quantity_is_rejected() {
    let service = ProposalService::new(memory_store(), Arc::new(LogDispatcher));
    let mut req = proposal_request(None, None);
    req.items[0].quantity = dec("-1");

    let err = service.create(req, Uuid::new_v4()).await.unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_unknown_customer_is_not_found() {
    let service = ProposalService::new(memory_store(), Arc::new(LogDispatcher));
    let err = service
        .create(proposal_request(Some(Uuid::new_v4()), None), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_sending_a_draft_dispatches_and_marks_sent() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let shared: SharedDispatcher = dispatcher.clone();
    let service = ProposalService::new(memory_store(), shared);
    let actor = Uuid::new_v4();

    let proposal = service
        .create(proposal_request(None, Some("pat@example.com")), actor)
        .await
        .unwrap();
    let sent = service.send(proposal.id, actor).await.unwrap();
    assert_eq!(sent.status, ProposalStatus::Sent);
    assert!(sent.sent_at.is_some());

    // Re-sending keeps the status and dispatches again
    let resent = service.send(proposal.id, actor).await.unwrap();
    assert_eq!(resent.status, ProposalStatus::Sent);
    assert_eq!(
        *dispatcher.sent.lock().unwrap(),
        vec![proposal.number.clone(), proposal.number.clone()]
    );
}

#[tokio::test]
async fn test_failed_dispatch_leaves_proposal_draft() {
    let service = ProposalService::new(memory_store(), Arc::new(FailingDispatcher));
    let actor = Uuid::new_v4();
    let proposal = service
        .create(proposal_request(None, Some("pat@example.com")), actor)
        .await
        .unwrap();

    let err = service.send(proposal.id, actor).await.unwrap_err();
    assert_eq!(err.kind(), "notification_error");
    assert_eq!(
        service.get(proposal.id).await.unwrap().status,
        ProposalStatus::Draft
    );
}

#[tokio::test]
async fn test_proposal_without_recipient_cannot_be_sent() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let shared: SharedDispatcher = dispatcher.clone();
    let service = ProposalService::new(memory_store(), shared);
    let actor = Uuid::new_v4();
    let proposal = service
        .create(proposal_request(None, None), actor)
        .await
        .unwrap();

    let err = service.send(proposal.id, actor).await.unwrap_err();
    assert!(err.is_validation());
    assert!(dispatcher.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_document_numbers_are_unique_per_store() {
    let store = memory_store();
    let service = ProposalService::new(store.clone(), Arc::new(LogDispatcher));
    let actor = Uuid::new_v4();
    let original = service
        .create(proposal_request(None, None), actor)
        .await
        .unwrap();

    let mut copy = original.clone();
    copy.id = Uuid::new_v4();
    let err = store.insert_proposal(copy).await.unwrap_err();
    assert!(err.is_conflict());
    assert!(err.is_duplicate_of(PROPOSAL_NUMBER_KEY));
}

#[tokio::test]
async fn test_busy_day_of_documents_never_collides() {
    let store = memory_store();
    let proposals = ProposalService::new(store.clone(), Arc::new(LogDispatcher));
    let invoices = InvoiceService::new(store.clone());
    let actor = Uuid::new_v4();

    let mut numbers = HashSet::new();
    for _ in 0..500 {
        let proposal = proposals
            .create(proposal_request(None, None), actor)
            .await
            .unwrap();
        let invoice = invoices.create(invoice_request(None), actor).await.unwrap();
        assert!(numbers.insert(proposal.number));
        assert!(numbers.insert(invoice.number));
    }
    assert_eq!(numbers.len(), 1000);
}

#[tokio::test]
async fn test_proposal_list_filters() {
    let store = memory_store();
    let customer = create_customer(&store, "sam@example.com").await;
    let service = ProposalService::new(store, Arc::new(LogDispatcher));
    let actor = Uuid::new_v4();

    let linked = service
        .create(proposal_request(Some(customer.id), None), actor)
        .await
        .unwrap();
    let other = service
        .create(proposal_request(None, None), actor)
        .await
        .unwrap();
    service.change_status(other.id, ProposalStatus::Sent).await.unwrap();

    let by_customer = service.list(&ListFilter::by_customer(customer.id)).await.unwrap();
    assert_eq!(by_customer.len(), 1);
    assert_eq!(by_customer[0].id, linked.id);
    // Linked proposals default to the customer's details
    assert_eq!(by_customer[0].customer.email.as_deref(), Some("sam@example.com"));

    let sent = service.list(&ListFilter::by_status(ProposalStatus::Sent)).await.unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, other.id);
}

// ============ Invoices ============

#[tokio::test]
async fn test_invoice_creation_adds_billing_note() {
    let store = memory_store();
    let customer = create_customer(&store, "sam@example.com").await;
    let invoices = InvoiceService::new(store.clone());

    let invoice = invoices
        .create(invoice_request(Some(customer.id)), Uuid::new_v4())
        .await
        .unwrap();
    assert!(invoice.number.starts_with("INV-"));
    assert_eq!(invoice.status, InvoiceStatus::Draft);
    assert_eq!(invoice.amount_paid, dec("0"));

    let hasher = CredentialHasher::with_cost(8, 8192, 1, 1).unwrap();
    let notes = CustomerService::new(store, parse_region("US").unwrap(), hasher)
        .notes(customer.id)
        .await
        .unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].note_type, "billing");
    assert!(notes[0].content.contains(&invoice.number));
    assert!(notes[0].content.contains(&invoice.total.to_string()));
}

#[tokio::test]
async fn test_invoice_for_unknown_project_is_rejected() {
    let invoices = InvoiceService::new(memory_store());
    let mut req = invoice_request(None);
    req.project_id = Some(Uuid::new_v4());

    assert!(invoices
        .create(req, Uuid::new_v4())
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_payments_move_invoice_to_partial_then_paid() {
    let invoices = InvoiceService::new(memory_store());
    let actor = Uuid::new_v4();
    let invoice = invoices.create(invoice_request(None), actor).await.unwrap();

    let partial = invoices
        .record_payment(invoice.id, payment("200"), actor)
        .await
        .unwrap();
    assert_eq!(partial.status, InvoiceStatus::Partial);
    assert_eq!(partial.amount_paid, dec("200"));
    assert_eq!(partial.balance_due(), dec("335.00"));

    let paid = invoices
        .record_payment(invoice.id, payment("335.00"), actor)
        .await
        .unwrap();
    assert_eq!(paid.status, InvoiceStatus::Paid);
    assert_eq!(paid.amount_paid, paid.total);

    let detail = invoices.detail(invoice.id).await.unwrap();
    assert_eq!(detail.payments.len(), 2);

    // Paid invoices take no further payments
    assert!(invoices
        .record_payment(invoice.id, payment("1"), actor)
        .await
        .unwrap_err()
        .is_conflict());
}

#[tokio::test]
async fn test_overpayment_is_rejected() {
    let invoices = InvoiceService::new(memory_store());
    let actor = Uuid::new_v4();
    let invoice = invoices.create(invoice_request(None), actor).await.unwrap();

    let err = invoices
        .record_payment(invoice.id, payment("535.01"), actor)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = invoices
        .record_payment(invoice.id, payment("0"), actor)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let after = invoices.get(invoice.id).await.unwrap();
    assert_eq!(after.status, InvoiceStatus::Draft);
    assert_eq!(after.amount_paid, dec("0"));
}

#[tokio::test]
async fn test_void_invoice_refuses_payment() {
    let invoices = InvoiceService::new(memory_store());
    let actor = Uuid::new_v4();
    let invoice = invoices.create(invoice_request(None), actor).await.unwrap();

    invoices.change_status(invoice.id, InvoiceStatus::Sent).await.unwrap();
    invoices.change_status(invoice.id, InvoiceStatus::Void).await.unwrap();

    assert!(invoices
        .record_payment(invoice.id, payment("10"), actor)
        .await
        .unwrap_err()
        .is_conflict());
}

#[tokio::test]
async fn test_paid_cannot_be_set_by_hand() {
    let invoices = InvoiceService::new(memory_store());
    let invoice = invoices
        .create(invoice_request(None), Uuid::new_v4())
        .await
        .unwrap();

    let err = invoices
        .change_status(invoice.id, InvoiceStatus::Paid)
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_invoice_with_payments_cannot_be_deleted() {
    let invoices = InvoiceService::new(memory_store());
    let actor = Uuid::new_v4();
    let paid_on = invoices.create(invoice_request(None), actor).await.unwrap();
    let untouched = invoices.create(invoice_request(None), actor).await.unwrap();

    invoices
        .record_payment(paid_on.id, payment("50"), actor)
        .await
        .unwrap();

    assert!(invoices.delete(paid_on.id).await.unwrap_err().is_conflict());
    invoices.delete(untouched.id).await.unwrap();
    assert!(invoices.get(untouched.id).await.unwrap_err().is_not_found());
}

// ============ Leads ============

fn lead_service(store: SharedStore) -> LeadService {
    LeadService::new(store, parse_region("US").unwrap())
}

async fn create_lead(service: &LeadService, actor: Uuid) -> Lead {
    let req: CreateLeadRequest = serde_json::from_value(json!({
        "first_name": " Dana ",
        "email": "DANA@example.com",
        "phone": "650-253-0000",
        "estimated_value": "12000"
    }))
    .unwrap();
    service.create(req, actor).await.unwrap()
}

#[tokio::test]
async fn test_lead_fields_are_normalized() {
    let service = lead_service(memory_store());
    let lead = create_lead(&service, Uuid::new_v4()).await;

    assert_eq!(lead.first_name, "Dana");
    assert_eq!(lead.email.as_deref(), Some("dana@example.com"));
    assert_eq!(lead.phone.as_deref(), Some("+16502530000"));
    assert_eq!(lead.status, LeadStatus::New);
}

#[tokio::test]
async fn test_invalid_lead_email_is_rejected() {
    let service = lead_service(memory_store());
    let req: CreateLeadRequest = serde_json::from_value(json!({
        "first_name": "Dana",
        "email": "not-an-email"
    }))
    .unwrap();

    assert!(service
        .create(req, Uuid::new_v4())
        .await
        .unwrap_err()
        .is_validation());
}

#[tokio::test]
async fn test_lead_history_records_each_change() {
    let service = lead_service(memory_store());
    let actor = Uuid::new_v4();
    let lead = create_lead(&service, actor).await;

    service
        .update(
            lead.id,
            UpdateLeadRequest {
                company: Some("Reyes Builders".to_string()),
                ..Default::default()
            },
            actor,
        )
        .await
        .unwrap();
    service
        .change_status(lead.id, LeadStatus::Contacted, actor)
        .await
        .unwrap();
    let note: AddNoteRequest =
        serde_json::from_value(json!({"content": "Called back", "type": "call"})).unwrap();
    let note = service.add_note(lead.id, note, actor).await.unwrap();
    assert_eq!(note.note_type, "call");

    let detail = service.detail(lead.id).await.unwrap();
    assert_eq!(detail.lead.company.as_deref(), Some("Reyes Builders"));
    assert_eq!(detail.lead.status, LeadStatus::Contacted);
    assert_eq!(detail.notes.len(), 1);

    let kinds: Vec<ActivityKind> = detail.activities.iter().map(|a| a.kind).collect();
    for expected in [
        ActivityKind::Created,
        ActivityKind::Updated,
        ActivityKind::StatusChanged,
        ActivityKind::NoteAdded,
    ] {
        assert!(kinds.contains(&expected), "missing {:?}", expected);
    }
}

#[tokio::test]
async fn test_lead_cannot_skip_pipeline_stages() {
    let service = lead_service(memory_store());
    let actor = Uuid::new_v4();
    let lead = create_lead(&service, actor).await;

    let err = service
        .change_status(lead.id, LeadStatus::Negotiation, actor)
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

// ============ Projects ============

#[tokio::test]
async fn test_project_updates_and_documents() {
    let store = memory_store();
    let customer = create_customer(&store, "sam@example.com").await;
    let projects = ProjectService::new(store);
    let actor = Uuid::new_v4();

    let bad_schedule: CreateProjectRequest = serde_json::from_value(json!({
        "customer_id": customer.id,
        "title": "Porch",
        "start_date": "2026-05-01",
        "end_date": "2026-04-01"
    }))
    .unwrap();
    assert!(projects.create(bad_schedule).await.unwrap_err().is_validation());

    let req: CreateProjectRequest = serde_json::from_value(json!({
        "customer_id": customer.id,
        "title": "Porch",
        "budget": "4800"
    }))
    .unwrap();
    let project = projects.create(req).await.unwrap();
    assert_eq!(project.status, ProjectStatus::Pending);

    projects
        .add_update(project.id, AddProjectUpdateRequest { content: "Footings poured".into() }, actor)
        .await
        .unwrap();
    let doc: AddDocumentRequest = serde_json::from_value(json!({
        "name": "permit.pdf",
        "content_type": "application/pdf",
        "size_bytes": 20480,
        "storage_key": "projects/permit.pdf"
    }))
    .unwrap();
    projects.add_document(project.id, doc, actor).await.unwrap();

    let active = projects
        .change_status(project.id, ProjectStatus::Active)
        .await
        .unwrap();
    assert_eq!(active.status, ProjectStatus::Active);

    let detail = projects.detail(project.id).await.unwrap();
    assert_eq!(detail.updates.len(), 1);
    assert_eq!(detail.documents.len(), 1);
    assert_eq!(detail.documents[0].storage_key, "projects/permit.pdf");
}

#[tokio::test]
async fn test_project_for_unknown_customer_is_not_found() {
    let projects = ProjectService::new(memory_store());
    let req: CreateProjectRequest = serde_json::from_value(json!({
        "customer_id": Uuid::new_v4(),
        "title": "Porch"
    }))
    .unwrap();

    assert!(projects.create(req).await.unwrap_err().is_not_found());
}

// ============ Subcontractors ============

#[tokio::test]
async fn test_subcontractor_review() {
    let service = SubcontractorService::new(memory_store(), parse_region("US").unwrap());
    let req: CreateSubcontractorRequest = serde_json::from_value(json!({
        "business_name": "Bright Sparks",
        "contact_name": "Lee Moss",
        "email": "Office@BrightSparks.example",
        "specialties": ["Electrical", " electrical", "Lighting "]
    }))
    .unwrap();
    let sub = service.create(req).await.unwrap();
    assert_eq!(sub.status, SubcontractorStatus::Pending);
    assert_eq!(sub.email, "office@brightsparks.example");
    assert_eq!(sub.specialties, vec!["electrical", "lighting"]);

    let approved = service
        .change_status(sub.id, SubcontractorStatus::Approved, Some("License checked".into()))
        .await
        .unwrap();
    assert_eq!(approved.status, SubcontractorStatus::Approved);
    assert_eq!(approved.admin_notes.as_deref(), Some("License checked"));

    // Rejection is only possible from pending
    assert!(service
        .change_status(sub.id, SubcontractorStatus::Rejected, None)
        .await
        .unwrap_err()
        .is_conflict());

    let rating = UpdateSubcontractorRequest {
        rating: Some(dec("5.5")),
        ..Default::default()
    };
    assert!(service.update(sub.id, rating).await.unwrap_err().is_validation());
}
