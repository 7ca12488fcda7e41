//! Lead to customer and proposal to project conversion.
//!
//! Each conversion validates everything it can up front, then hands the store a
//! single `commit_*` unit, so a failure at any point leaves lead, customer, proposal
//! and project exactly as they were.
//!
//! A short-lived in-flight cache rejects a second request for the same record while
//! the first is still running. It is per process; the store's compare-and-set and the
//! unique `proposal_id` on projects are what keep multiple instances correct.

use crate::credentials::CredentialHasher;
use crate::errors::{AppError, ResultExt};
use crate::models::{ActivityKind, Customer, LeadActivity, Project};
use crate::status::{LeadStatus, ProjectStatus, ProposalStatus};
use crate::store::{not_found, SharedStore};
use crate::validation::normalize_email;
use chrono::Utc;
use moka::future::Cache;
use std::time::Duration;
use uuid::Uuid;

/// How long an in-flight claim survives if a request dies without releasing it.
pub const IN_FLIGHT_TTL: Duration = Duration::from_secs(60);

pub type InFlightCache = Cache<String, i64>;

pub fn in_flight_cache() -> InFlightCache {
    Cache::builder()
        .time_to_live(IN_FLIGHT_TTL)
        .max_capacity(10_000)
        .build()
}

pub struct ConversionService {
    store: SharedStore,
    hasher: CredentialHasher,
    in_flight: InFlightCache,
}

impl ConversionService {
    pub fn new(store: SharedStore, hasher: CredentialHasher, in_flight: InFlightCache) -> Self {
        Self {
            store,
            hasher,
            in_flight,
        }
    }

    /// Claims `key`; fails with `Conflict` if another conversion holds it.
    async fn claim(&self, key: &str) -> Result<(), AppError> {
        let now = Utc::now().timestamp_millis();
        let entry = self
            .in_flight
            .entry(key.to_string())
            .or_insert_with(async move { now })
            .await;

        if !entry.is_fresh() {
            let started_ms_ago = now - entry.into_value();
            tracing::warn!(
                "Duplicate conversion blocked for {} (started {} ms ago)",
                key,
                started_ms_ago
            );
            return Err(AppError::Conflict(
                "A conversion for this record is already in progress".to_string(),
            ));
        }
        Ok(())
    }

    async fn release(&self, key: &str) {
        self.in_flight.invalidate(key).await;
    }

    /// Turns an open lead into a customer with a hashed portal credential.
    ///
    /// # Arguments
    ///
    /// * `lead_id` - The lead to convert.
    /// * `raw_password` - Initial portal password; only its hash is stored.
    /// * `actor_id` - Staff member performing the conversion.
    ///
    /// # Returns
    ///
    /// * `Result<Uuid, AppError>` - The new customer's id. The lead is `won` if and only
    ///   if this returns `Ok`.
    pub async fn convert_lead_to_customer(
        &self,
        lead_id: Uuid,
        raw_password: String,
        actor_id: Uuid,
    ) -> Result<Uuid, AppError> {
        let key = format!("lead:{}", lead_id);
        self.claim(&key).await?;
        let result = self.run_lead_conversion(lead_id, raw_password, actor_id).await;
        self.release(&key).await;
        result
    }

    async fn run_lead_conversion(
        &self,
        lead_id: Uuid,
        raw_password: String,
        actor_id: Uuid,
    ) -> Result<Uuid, AppError> {
        tracing::info!("Converting lead {} into a customer", lead_id);

        // Step 1: Load and check the lead
        let lead = self
            .store
            .get_lead(lead_id)
            .await?
            .ok_or_else(|| not_found("Lead", lead_id))?;

        if !lead.status.can_convert() {
            tracing::warn!("Lead {} is {} and cannot be converted", lead_id, lead.status);
            return Err(AppError::Conflict(format!(
                "Lead {} is already {}",
                lead_id, lead.status
            )));
        }

        let email = match lead.email.as_deref() {
            Some(email) => normalize_email(email)?,
            None => {
                return Err(AppError::Validation(
                    "Lead has no email address; a customer needs one to log in".to_string(),
                ))
            }
        };

        // Step 2: Hash the credential before anything is written
        let password_hash = self.hasher.hash_blocking(raw_password).await?;

        // Step 3: Customer and lead transition commit together
        let now = Utc::now();
        let customer = Customer {
            id: Uuid::new_v4(),
            lead_id: Some(lead.id),
            first_name: lead.first_name.clone(),
            last_name: lead.last_name.clone(),
            email,
            phone: lead.phone.clone(),
            company: lead.company.clone(),
            address: lead.address.clone(),
            password_hash,
            created_at: now,
            updated_at: now,
        };
        let activity = LeadActivity::new(
            lead_id,
            actor_id,
            ActivityKind::Converted,
            format!("Converted to customer {}", customer.id),
        );

        let customer = self
            .store
            .commit_lead_conversion(lead_id, lead.status, customer, activity)
            .await
            .with_context(|| format!("Converting lead {}", lead_id))?;

        tracing::info!(
            "Lead {} ({} -> {}) converted into customer {} by {}",
            lead_id,
            lead.status,
            LeadStatus::Won,
            customer.id,
            actor_id
        );
        Ok(customer.id)
    }

    /// Creates the project for an accepted proposal.
    ///
    /// Repeated calls return the project created by the first one.
    ///
    /// # Returns
    ///
    /// * `Result<Uuid, AppError>` - The project id; `budget` equals the proposal total.
    pub async fn convert_proposal_to_project(&self, proposal_id: Uuid, actor_id: Uuid) -> Result<Uuid, AppError> {
        let key = format!("proposal:{}", proposal_id);
        self.claim(&key).await?;
        let result = self.run_proposal_conversion(proposal_id, actor_id).await;
        self.release(&key).await;
        result
    }

    async fn run_proposal_conversion(&self, proposal_id: Uuid, actor_id: Uuid) -> Result<Uuid, AppError> {
        tracing::info!("Converting proposal {} into a project", proposal_id);

        // Step 1: Only accepted proposals convert
        let proposal = self
            .store
            .get_proposal(proposal_id)
            .await?
            .ok_or_else(|| not_found("Proposal", proposal_id))?;

        if proposal.status != ProposalStatus::Accepted {
            tracing::warn!(
                "Proposal {} is {} and cannot be converted",
                proposal.number,
                proposal.status
            );
            return Err(AppError::Conflict(format!(
                "Only accepted proposals can be converted; {} is {}",
                proposal.number, proposal.status
            )));
        }

        // Step 2: A linked, existing customer is required
        let customer_id = proposal.customer_id.ok_or_else(|| {
            AppError::Validation(format!(
                "Proposal {} is not linked to a customer; link or create one first",
                proposal.number
            ))
        })?;
        let customer = self
            .store
            .get_customer(customer_id)
            .await?
            .ok_or_else(|| not_found("Customer", customer_id))?;

        // Step 3: Reuse an earlier conversion
        if let Some(existing) = self.store.find_project_by_proposal(proposal_id).await? {
            tracing::info!(
                "Proposal {} already converted into project {}",
                proposal.number,
                existing.id
            );
            return Ok(existing.id);
        }

        // Step 4: Create the project
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            customer_id,
            proposal_id: Some(proposal_id),
            title: proposal
                .project_title
                .clone()
                .unwrap_or_else(|| format!("Project for {}", customer.full_name())),
            description: proposal.notes.clone(),
            status: ProjectStatus::Pending,
            budget: Some(proposal.total.clone()),
            start_date: None,
            end_date: None,
            address: proposal.customer.address.clone().or(customer.address),
            created_at: now,
            updated_at: now,
        };

        let (project, created) = self
            .store
            .commit_proposal_conversion(proposal_id, project)
            .await
            .with_context(|| format!("Converting proposal {}", proposal.number))?;

        if created {
            tracing::info!(
                "Proposal {} converted into project {} (budget {}) by {}",
                proposal.number,
                project.id,
                proposal.total,
                actor_id
            );
        } else {
            tracing::info!(
                "Proposal {} was converted concurrently; returning project {}",
                proposal.number,
                project.id
            );
        }
        Ok(project.id)
    }
}
