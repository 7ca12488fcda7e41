/// Proposal delivery against a mocked webhook endpoint
use quote_to_cash::memory_store::MemoryStore;
use quote_to_cash::models::CreateProposalRequest;
use quote_to_cash::notifications::{dispatcher_from_config, WebhookDispatcher};
use quote_to_cash::services::ProposalService;
use quote_to_cash::status::ProposalStatus;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn proposal_request() -> CreateProposalRequest {
    serde_json::from_value(json!({
        "customer": {"name": "Pat Lee", "email": "pat@example.com"},
        "project_title": "Bathroom refresh",
        "items": [
            {"description": "Tiling", "quantity": "10", "unit_price": "45"},
            {"description": "Fixtures", "quantity": "1", "unit_price": "50"}
        ],
        "tax_rate": "7"
    }))
    .unwrap()
}

fn service_for(server: &MockServer, token: Option<&str>) -> ProposalService {
    let dispatcher = WebhookDispatcher::new(
        format!("{}/hooks/proposals", server.uri()),
        token.map(str::to_string),
    )
    .unwrap();
    ProposalService::new(Arc::new(MemoryStore::new()), Arc::new(dispatcher))
}

#[tokio::test]
async fn test_webhook_receives_proposal_payload() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hooks/proposals"))
        .and(header("Authorization", "Bearer relay-token"))
        .and(body_partial_json(json!({
            "type": "proposal.sent",
            "data": {
                "recipient": {"name": "Pat Lee", "email": "pat@example.com"},
                "project_title": "Bathroom refresh",
                "subtotal": "500",
                "tax": "35.00",
                "total": "535.00"
            }
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = service_for(&mock_server, Some("relay-token"));
    let actor = Uuid::new_v4();
    let proposal = service.create(proposal_request(), actor).await.unwrap();

    let sent = service.send(proposal.id, actor).await.unwrap();
    assert_eq!(sent.status, ProposalStatus::Sent);
}

#[tokio::test]
async fn test_webhook_error_keeps_proposal_in_draft() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hooks/proposals"))
        .respond_with(ResponseTemplate::new(500).set_body_string("relay down"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = service_for(&mock_server, None);
    let actor = Uuid::new_v4();
    let proposal = service.create(proposal_request(), actor).await.unwrap();

    let err = service.send(proposal.id, actor).await.unwrap_err();
    assert_eq!(err.kind(), "notification_error");
    assert!(err.to_string().contains("relay down"));

    let after = service.get(proposal.id).await.unwrap();
    assert_eq!(after.status, ProposalStatus::Draft);
    assert!(after.sent_at.is_none());
}

#[tokio::test]
async fn test_unconfigured_dispatcher_only_logs() {
    let dispatcher = dispatcher_from_config(None, None).unwrap();
    let service = ProposalService::new(Arc::new(MemoryStore::new()), dispatcher);
    let actor = Uuid::new_v4();
    let proposal = service.create(proposal_request(), actor).await.unwrap();

    let sent = service.send(proposal.id, actor).await.unwrap();
    assert_eq!(sent.status, ProposalStatus::Sent);
}
