use crate::errors::{AppError, ResultExt};
use crate::line_items::LineItemsDocument;
use crate::models::*;
use crate::status::{
    InvoiceStatus, LeadStatus, ProjectStatus, ProposalStatus, SubcontractorStatus,
};
use crate::store::{not_found, stale_status, EntityStore};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// PostgreSQL storage for every record type.
///
/// Multi-record operations run inside a single transaction; dropping the
/// transaction on an early `?` return rolls it back.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `table` is always a literal from this module.
    async fn exists(&self, table: &'static str, id: Uuid) -> Result<bool, AppError> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)", table);
        let found: bool = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(found)
    }

    /// Distinguishes "row missing" from "row changed" after a conditional write
    /// matched nothing.
    async fn missed_write<S: std::fmt::Display>(
        &self,
        table: &'static str,
        entity: &str,
        id: Uuid,
        expected: S,
    ) -> AppError {
        match self.exists(table, id).await {
            Ok(true) => stale_status(entity, id, expected),
            Ok(false) => not_found(entity, id),
            Err(e) => e,
        }
    }
}

// ============ Row mapping ============

#[derive(FromRow)]
struct ProposalRow {
    id: Uuid,
    number: String,
    customer_id: Option<Uuid>,
    customer_name: String,
    customer_email: Option<String>,
    customer_phone: Option<String>,
    customer_address: Option<String>,
    project_title: Option<String>,
    status: ProposalStatus,
    items: Json<LineItemsDocument>,
    subtotal: BigDecimal,
    tax_rate: BigDecimal,
    tax: BigDecimal,
    total: BigDecimal,
    notes: Option<String>,
    valid_until: Option<NaiveDate>,
    created_by: Uuid,
    sent_at: Option<DateTime<Utc>>,
    accepted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProposalRow> for Proposal {
    type Error = AppError;

    fn try_from(row: ProposalRow) -> Result<Self, Self::Error> {
        let items = row
            .items
            .0
            .into_items()
            .with_context(|| format!("Loading items of proposal {}", row.id))?;
        Ok(Proposal {
            id: row.id,
            number: row.number,
            customer_id: row.customer_id,
            customer: CustomerSnapshot {
                name: row.customer_name,
                email: row.customer_email,
                phone: row.customer_phone,
                address: row.customer_address,
            },
            project_title: row.project_title,
            status: row.status,
            items,
            subtotal: row.subtotal,
            tax_rate: row.tax_rate,
            tax: row.tax,
            total: row.total,
            notes: row.notes,
            valid_until: row.valid_until,
            created_by: row.created_by,
            sent_at: row.sent_at,
            accepted_at: row.accepted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct InvoiceRow {
    id: Uuid,
    number: String,
    customer_id: Option<Uuid>,
    customer_name: String,
    customer_email: Option<String>,
    customer_phone: Option<String>,
    customer_address: Option<String>,
    project_id: Option<Uuid>,
    status: InvoiceStatus,
    items: Json<LineItemsDocument>,
    subtotal: BigDecimal,
    tax_rate: BigDecimal,
    tax: BigDecimal,
    total: BigDecimal,
    amount_paid: BigDecimal,
    due_date: Option<NaiveDate>,
    notes: Option<String>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = AppError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        let items = row
            .items
            .0
            .into_items()
            .with_context(|| format!("Loading items of invoice {}", row.id))?;
        Ok(Invoice {
            id: row.id,
            number: row.number,
            customer_id: row.customer_id,
            customer: CustomerSnapshot {
                name: row.customer_name,
                email: row.customer_email,
                phone: row.customer_phone,
                address: row.customer_address,
            },
            project_id: row.project_id,
            status: row.status,
            items,
            subtotal: row.subtotal,
            tax_rate: row.tax_rate,
            tax: row.tax,
            total: row.total,
            amount_paid: row.amount_paid,
            due_date: row.due_date,
            notes: row.notes,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn proposals_from_rows(rows: Vec<ProposalRow>) -> Result<Vec<Proposal>, AppError> {
    rows.into_iter().map(Proposal::try_from).collect()
}

fn invoices_from_rows(rows: Vec<InvoiceRow>) -> Result<Vec<Invoice>, AppError> {
    rows.into_iter().map(Invoice::try_from).collect()
}

async fn insert_activity<'e, E>(executor: E, activity: &LeadActivity) -> Result<(), AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO lead_activities (id, lead_id, actor_id, kind, description, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(activity.id)
    .bind(activity.lead_id)
    .bind(activity.actor_id)
    .bind(activity.kind)
    .bind(&activity.description)
    .bind(activity.created_at)
    .execute(executor)
    .await
    .context("Inserting lead activity")?;
    Ok(())
}

async fn insert_customer_row<'e, E>(executor: E, customer: &Customer) -> Result<Customer, AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, Customer>(
        r#"
        INSERT INTO customers (
            id, lead_id, first_name, last_name, email, phone, company, address,
            password_hash, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(customer.id)
    .bind(customer.lead_id)
    .bind(&customer.first_name)
    .bind(&customer.last_name)
    .bind(&customer.email)
    .bind(&customer.phone)
    .bind(&customer.company)
    .bind(&customer.address)
    .bind(&customer.password_hash)
    .bind(customer.created_at)
    .bind(customer.updated_at)
    .fetch_one(executor)
    .await?;
    Ok(row)
}

async fn insert_customer_note_row<'e, E>(executor: E, note: &CustomerNote) -> Result<CustomerNote, AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, CustomerNote>(
        r#"
        INSERT INTO customer_notes (id, customer_id, author_id, note_type, content, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(note.id)
    .bind(note.customer_id)
    .bind(note.author_id)
    .bind(&note.note_type)
    .bind(&note.content)
    .bind(note.created_at)
    .fetch_one(executor)
    .await?;
    Ok(row)
}

#[async_trait]
impl EntityStore for PgStore {
    // ============ Leads ============

    async fn insert_lead(&self, lead: Lead, activity: LeadActivity) -> Result<Lead, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, Lead>(
            r#"
            INSERT INTO leads (
                id, first_name, last_name, email, phone, company, address, source,
                service_interest, message, status, priority, estimated_value, assigned_to,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(lead.id)
        .bind(&lead.first_name)
        .bind(&lead.last_name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(&lead.company)
        .bind(&lead.address)
        .bind(&lead.source)
        .bind(&lead.service_interest)
        .bind(&lead.message)
        .bind(lead.status)
        .bind(lead.priority)
        .bind(&lead.estimated_value)
        .bind(lead.assigned_to)
        .bind(lead.created_at)
        .bind(lead.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        insert_activity(&mut *tx, &activity).await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, AppError> {
        let row = sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_leads(&self, filter: &ListFilter<LeadStatus>) -> Result<Vec<Lead>, AppError> {
        let rows = sqlx::query_as::<_, Lead>(
            r#"
            SELECT * FROM leads
            WHERE ($1::lead_status IS NULL OR status = $1)
            ORDER BY created_at DESC
            "#,
        )
        .bind(filter.status)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn update_lead(&self, lead: Lead, activity: LeadActivity) -> Result<Lead, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, Lead>(
            r#"
            UPDATE leads
            SET first_name = $2,
                last_name = $3,
                email = $4,
                phone = $5,
                company = $6,
                address = $7,
                source = $8,
                service_interest = $9,
                message = $10,
                priority = $11,
                estimated_value = $12,
                assigned_to = $13,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(lead.id)
        .bind(&lead.first_name)
        .bind(&lead.last_name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(&lead.company)
        .bind(&lead.address)
        .bind(&lead.source)
        .bind(&lead.service_interest)
        .bind(&lead.message)
        .bind(lead.priority)
        .bind(&lead.estimated_value)
        .bind(lead.assigned_to)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| not_found("Lead", lead.id))?;

        insert_activity(&mut *tx, &activity).await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn set_lead_status(
        &self,
        id: Uuid,
        expected: LeadStatus,
        to: LeadStatus,
        activity: LeadActivity,
    ) -> Result<Lead, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, Lead>(
            "UPDATE leads SET status = $3, updated_at = now() WHERE id = $1 AND status = $2 RETURNING *",
        )
        .bind(id)
        .bind(expected)
        .bind(to)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            drop(tx);
            return Err(self.missed_write("leads", "Lead", id, expected).await);
        };

        insert_activity(&mut *tx, &activity).await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn delete_lead(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM leads WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_lead_note(&self, note: LeadNote, activity: LeadActivity) -> Result<LeadNote, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, LeadNote>(
            r#"
            INSERT INTO lead_notes (id, lead_id, author_id, note_type, content, important, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(note.id)
        .bind(note.lead_id)
        .bind(note.author_id)
        .bind(&note.note_type)
        .bind(&note.content)
        .bind(note.important)
        .bind(note.created_at)
        .fetch_one(&mut *tx)
        .await?;

        insert_activity(&mut *tx, &activity).await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn list_lead_notes(&self, lead_id: Uuid) -> Result<Vec<LeadNote>, AppError> {
        let rows = sqlx::query_as::<_, LeadNote>(
            "SELECT * FROM lead_notes WHERE lead_id = $1 ORDER BY created_at ASC",
        )
        .bind(lead_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_lead_activities(&self, lead_id: Uuid) -> Result<Vec<LeadActivity>, AppError> {
        let rows = sqlx::query_as::<_, LeadActivity>(
            "SELECT * FROM lead_activities WHERE lead_id = $1 ORDER BY created_at ASC",
        )
        .bind(lead_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn commit_lead_conversion(
        &self,
        lead_id: Uuid,
        expected: LeadStatus,
        customer: Customer,
        activity: LeadActivity,
    ) -> Result<Customer, AppError> {
        let mut tx = self.pool.begin().await?;

        // Step 1: Claim the lead; a concurrent conversion or status edit makes this miss
        let claimed = sqlx::query_scalar::<_, Uuid>(
            "UPDATE leads SET status = 'won', updated_at = now() WHERE id = $1 AND status = $2 RETURNING id",
        )
        .bind(lead_id)
        .bind(expected)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            drop(tx);
            return Err(self.missed_write("leads", "Lead", lead_id, expected).await);
        }

        // Step 2: Customer with its credential hash
        let created = insert_customer_row(&mut *tx, &customer).await?;

        // Step 3: Audit entry
        insert_activity(&mut *tx, &activity).await?;

        tx.commit().await.context("Committing lead conversion")?;

        tracing::info!(
            "Committed conversion of lead {} into customer {}",
            lead_id,
            created.id
        );
        Ok(created)
    }

    // ============ Customers ============

    async fn insert_customer(&self, customer: Customer) -> Result<Customer, AppError> {
        insert_customer_row(&self.pool, &customer).await
    }

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, AppError> {
        let row = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_customers(&self) -> Result<Vec<Customer>, AppError> {
        let rows = sqlx::query_as::<_, Customer>("SELECT * FROM customers ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn delete_customer(&self, id: Uuid) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query_scalar::<_, Uuid>("SELECT id FROM customers WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Ok(false);
        }

        let project_count: i64 =
            sqlx::query_scalar("SELECT count(*) FROM projects WHERE customer_id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if project_count > 0 {
            return Err(AppError::Conflict(format!(
                "Customer {} still has {} project(s)",
                id, project_count
            )));
        }

        sqlx::query("DELETE FROM customers WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn insert_customer_note(&self, note: CustomerNote) -> Result<CustomerNote, AppError> {
        insert_customer_note_row(&self.pool, &note).await
    }

    async fn list_customer_notes(&self, customer_id: Uuid) -> Result<Vec<CustomerNote>, AppError> {
        let rows = sqlx::query_as::<_, CustomerNote>(
            "SELECT * FROM customer_notes WHERE customer_id = $1 ORDER BY created_at ASC",
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ============ Proposals ============

    async fn insert_proposal(&self, proposal: Proposal) -> Result<Proposal, AppError> {
        let row = sqlx::query_as::<_, ProposalRow>(
            r#"
            INSERT INTO proposals (
                id, number, customer_id, customer_name, customer_email, customer_phone,
                customer_address, project_title, status, items, subtotal, tax_rate, tax, total,
                notes, valid_until, created_by, sent_at, accepted_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            RETURNING *
            "#,
        )
        .bind(proposal.id)
        .bind(&proposal.number)
        .bind(proposal.customer_id)
        .bind(&proposal.customer.name)
        .bind(&proposal.customer.email)
        .bind(&proposal.customer.phone)
        .bind(&proposal.customer.address)
        .bind(&proposal.project_title)
        .bind(proposal.status)
        .bind(Json(LineItemsDocument::new(proposal.items.clone())))
        .bind(&proposal.subtotal)
        .bind(&proposal.tax_rate)
        .bind(&proposal.tax)
        .bind(&proposal.total)
        .bind(&proposal.notes)
        .bind(proposal.valid_until)
        .bind(proposal.created_by)
        .bind(proposal.sent_at)
        .bind(proposal.accepted_at)
        .bind(proposal.created_at)
        .bind(proposal.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Proposal::try_from(row)
    }

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>, AppError> {
        let row = sqlx::query_as::<_, ProposalRow>("SELECT * FROM proposals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Proposal::try_from).transpose()
    }

    async fn list_proposals(&self, filter: &ListFilter<ProposalStatus>) -> Result<Vec<Proposal>, AppError> {
        let rows = sqlx::query_as::<_, ProposalRow>(
            r#"
            SELECT * FROM proposals
            WHERE ($1::proposal_status IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR customer_id = $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(filter.status)
        .bind(filter.customer_id)
        .fetch_all(&self.pool)
        .await?;
        proposals_from_rows(rows)
    }

    async fn update_proposal(&self, proposal: Proposal, expected: ProposalStatus) -> Result<Proposal, AppError> {
        let row = sqlx::query_as::<_, ProposalRow>(
            r#"
            UPDATE proposals
            SET customer_id = $3,
                customer_name = $4,
                customer_email = $5,
                customer_phone = $6,
                customer_address = $7,
                project_title = $8,
                items = $9,
                subtotal = $10,
                tax_rate = $11,
                tax = $12,
                total = $13,
                notes = $14,
                valid_until = $15,
                updated_at = now()
            WHERE id = $1 AND status = $2 AND status <> 'accepted'
            RETURNING *
            "#,
        )
        .bind(proposal.id)
        .bind(expected)
        .bind(proposal.customer_id)
        .bind(&proposal.customer.name)
        .bind(&proposal.customer.email)
        .bind(&proposal.customer.phone)
        .bind(&proposal.customer.address)
        .bind(&proposal.project_title)
        .bind(Json(LineItemsDocument::new(proposal.items.clone())))
        .bind(&proposal.subtotal)
        .bind(&proposal.tax_rate)
        .bind(&proposal.tax)
        .bind(&proposal.total)
        .bind(&proposal.notes)
        .bind(proposal.valid_until)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Proposal::try_from(row),
            None => Err(self.missed_write("proposals", "Proposal", proposal.id, expected).await),
        }
    }

    async fn set_proposal_status(
        &self,
        id: Uuid,
        expected: ProposalStatus,
        to: ProposalStatus,
    ) -> Result<Proposal, AppError> {
        let row = sqlx::query_as::<_, ProposalRow>(
            r#"
            UPDATE proposals
            SET status = $3,
                sent_at = CASE WHEN $3 = 'sent'::proposal_status THEN COALESCE(sent_at, now()) ELSE sent_at END,
                accepted_at = CASE WHEN $3 = 'accepted'::proposal_status THEN now() ELSE accepted_at END,
                updated_at = now()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Proposal::try_from(row),
            None => Err(self.missed_write("proposals", "Proposal", id, expected).await),
        }
    }

    async fn delete_proposal(&self, id: Uuid, expected: ProposalStatus) -> Result<bool, AppError> {
        let deleted = sqlx::query_scalar::<_, Uuid>(
            "DELETE FROM proposals WHERE id = $1 AND status = $2 AND status <> 'accepted' RETURNING id",
        )
        .bind(id)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        if deleted.is_some() {
            return Ok(true);
        }
        if self.exists("proposals", id).await? {
            return Err(stale_status("Proposal", id, expected));
        }
        Ok(false)
    }

    // ============ Projects ============

    async fn insert_project(&self, project: Project) -> Result<Project, AppError> {
        let row = sqlx::query_as::<_, Project>(
            r#"
            INSERT INTO projects (
                id, customer_id, proposal_id, title, description, status, budget,
                start_date, end_date, address, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(project.id)
        .bind(project.customer_id)
        .bind(project.proposal_id)
        .bind(&project.title)
        .bind(&project.description)
        .bind(project.status)
        .bind(&project.budget)
        .bind(project.start_date)
        .bind(project.end_date)
        .bind(&project.address)
        .bind(project.created_at)
        .bind(project.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, AppError> {
        let row = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_projects(&self, filter: &ListFilter<ProjectStatus>) -> Result<Vec<Project>, AppError> {
        let rows = sqlx::query_as::<_, Project>(
            r#"
            SELECT * FROM projects
            WHERE ($1::project_status IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR customer_id = $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(filter.status)
        .bind(filter.customer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn update_project(&self, project: Project) -> Result<Project, AppError> {
        let row = sqlx::query_as::<_, Project>(
            r#"
            UPDATE projects
            SET title = $2,
                description = $3,
                budget = $4,
                start_date = $5,
                end_date = $6,
                address = $7,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(project.id)
        .bind(&project.title)
        .bind(&project.description)
        .bind(&project.budget)
        .bind(project.start_date)
        .bind(project.end_date)
        .bind(&project.address)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| not_found("Project", project.id))
    }

    async fn set_project_status(
        &self,
        id: Uuid,
        expected: ProjectStatus,
        to: ProjectStatus,
    ) -> Result<Project, AppError> {
        let row = sqlx::query_as::<_, Project>(
            "UPDATE projects SET status = $3, updated_at = now() WHERE id = $1 AND status = $2 RETURNING *",
        )
        .bind(id)
        .bind(expected)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row),
            None => Err(self.missed_write("projects", "Project", id, expected).await),
        }
    }

    async fn find_project_by_proposal(&self, proposal_id: Uuid) -> Result<Option<Project>, AppError> {
        let row = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE proposal_id = $1")
            .bind(proposal_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn commit_proposal_conversion(
        &self,
        proposal_id: Uuid,
        project: Project,
    ) -> Result<(Project, bool), AppError> {
        let mut tx = self.pool.begin().await?;

        // Step 1: Lock the proposal so its status cannot change underneath us
        let status = sqlx::query_scalar::<_, ProposalStatus>(
            "SELECT status FROM proposals WHERE id = $1 FOR UPDATE",
        )
        .bind(proposal_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| not_found("Proposal", proposal_id))?;

        if status != ProposalStatus::Accepted {
            return Err(stale_status("Proposal", proposal_id, ProposalStatus::Accepted));
        }

        // Step 2: Reuse an earlier conversion
        let existing = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE proposal_id = $1")
            .bind(proposal_id)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(existing) = existing {
            tx.commit().await?;
            return Ok((existing, false));
        }

        // Step 3: Insert the project
        let created = sqlx::query_as::<_, Project>(
            r#"
            INSERT INTO projects (
                id, customer_id, proposal_id, title, description, status, budget,
                start_date, end_date, address, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(project.id)
        .bind(project.customer_id)
        .bind(proposal_id)
        .bind(&project.title)
        .bind(&project.description)
        .bind(project.status)
        .bind(&project.budget)
        .bind(project.start_date)
        .bind(project.end_date)
        .bind(&project.address)
        .bind(project.created_at)
        .bind(project.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await.context("Committing proposal conversion")?;
        Ok((created, true))
    }

    async fn insert_project_update(&self, update: ProjectUpdate) -> Result<ProjectUpdate, AppError> {
        let row = sqlx::query_as::<_, ProjectUpdate>(
            r#"
            INSERT INTO project_updates (id, project_id, author_id, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(update.id)
        .bind(update.project_id)
        .bind(update.author_id)
        .bind(&update.content)
        .bind(update.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_project_updates(&self, project_id: Uuid) -> Result<Vec<ProjectUpdate>, AppError> {
        let rows = sqlx::query_as::<_, ProjectUpdate>(
            "SELECT * FROM project_updates WHERE project_id = $1 ORDER BY created_at ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_document(&self, document: ProjectDocument) -> Result<ProjectDocument, AppError> {
        let row = sqlx::query_as::<_, ProjectDocument>(
            r#"
            INSERT INTO project_documents (
                id, project_id, name, content_type, size_bytes, storage_key, uploaded_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(document.id)
        .bind(document.project_id)
        .bind(&document.name)
        .bind(&document.content_type)
        .bind(document.size_bytes)
        .bind(&document.storage_key)
        .bind(document.uploaded_by)
        .bind(document.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_documents(&self, project_id: Uuid) -> Result<Vec<ProjectDocument>, AppError> {
        let rows = sqlx::query_as::<_, ProjectDocument>(
            "SELECT * FROM project_documents WHERE project_id = $1 ORDER BY created_at ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ============ Invoices ============

    async fn commit_invoice(&self, invoice: Invoice, note: Option<CustomerNote>) -> Result<Invoice, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, InvoiceRow>(
            r#"
            INSERT INTO invoices (
                id, number, customer_id, customer_name, customer_email, customer_phone,
                customer_address, project_id, status, items, subtotal, tax_rate, tax, total,
                amount_paid, due_date, notes, created_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            RETURNING *
            "#,
        )
        .bind(invoice.id)
        .bind(&invoice.number)
        .bind(invoice.customer_id)
        .bind(&invoice.customer.name)
        .bind(&invoice.customer.email)
        .bind(&invoice.customer.phone)
        .bind(&invoice.customer.address)
        .bind(invoice.project_id)
        .bind(invoice.status)
        .bind(Json(LineItemsDocument::new(invoice.items.clone())))
        .bind(&invoice.subtotal)
        .bind(&invoice.tax_rate)
        .bind(&invoice.tax)
        .bind(&invoice.total)
        .bind(&invoice.amount_paid)
        .bind(invoice.due_date)
        .bind(&invoice.notes)
        .bind(invoice.created_by)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(note) = &note {
            insert_customer_note_row(&mut *tx, note).await?;
        }

        tx.commit().await.context("Committing invoice")?;
        Invoice::try_from(row)
    }

    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, AppError> {
        let row = sqlx::query_as::<_, InvoiceRow>("SELECT * FROM invoices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Invoice::try_from).transpose()
    }

    async fn list_invoices(&self, filter: &ListFilter<InvoiceStatus>) -> Result<Vec<Invoice>, AppError> {
        let rows = sqlx::query_as::<_, InvoiceRow>(
            r#"
            SELECT * FROM invoices
            WHERE ($1::invoice_status IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR customer_id = $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(filter.status)
        .bind(filter.customer_id)
        .fetch_all(&self.pool)
        .await?;
        invoices_from_rows(rows)
    }

    async fn set_invoice_status(
        &self,
        id: Uuid,
        expected: InvoiceStatus,
        to: InvoiceStatus,
    ) -> Result<Invoice, AppError> {
        let row = sqlx::query_as::<_, InvoiceRow>(
            "UPDATE invoices SET status = $3, updated_at = now() WHERE id = $1 AND status = $2 RETURNING *",
        )
        .bind(id)
        .bind(expected)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Invoice::try_from(row),
            None => Err(self.missed_write("invoices", "Invoice", id, expected).await),
        }
    }

    async fn commit_invoice_payment(
        &self,
        payment: InvoicePayment,
        expected_paid: &BigDecimal,
        new_status: InvoiceStatus,
    ) -> Result<Invoice, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, InvoiceRow>(
            r#"
            UPDATE invoices
            SET amount_paid = amount_paid + $2,
                status = $4,
                updated_at = now()
            WHERE id = $1 AND amount_paid = $3 AND amount_paid + $2 <= total
            RETURNING *
            "#,
        )
        .bind(payment.invoice_id)
        .bind(&payment.amount)
        .bind(expected_paid)
        .bind(new_status)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            drop(tx);
            if self.exists("invoices", payment.invoice_id).await? {
                return Err(AppError::Conflict(format!(
                    "Invoice {} balance changed; reload and retry",
                    payment.invoice_id
                )));
            }
            return Err(not_found("Invoice", payment.invoice_id));
        };

        sqlx::query(
            r#"
            INSERT INTO invoice_payments (id, invoice_id, amount, method, reference, recorded_by, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(payment.id)
        .bind(payment.invoice_id)
        .bind(&payment.amount)
        .bind(&payment.method)
        .bind(&payment.reference)
        .bind(payment.recorded_by)
        .bind(payment.recorded_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.context("Committing invoice payment")?;
        Invoice::try_from(row)
    }

    async fn list_invoice_payments(&self, invoice_id: Uuid) -> Result<Vec<InvoicePayment>, AppError> {
        let rows = sqlx::query_as::<_, InvoicePayment>(
            "SELECT * FROM invoice_payments WHERE invoice_id = $1 ORDER BY recorded_at ASC",
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_invoice(&self, id: Uuid) -> Result<bool, AppError> {
        let deleted = sqlx::query_scalar::<_, Uuid>(
            "DELETE FROM invoices WHERE id = $1 AND amount_paid = 0 RETURNING id",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        if deleted.is_some() {
            return Ok(true);
        }
        if self.exists("invoices", id).await? {
            return Err(AppError::Conflict(
                "Invoices with recorded payments cannot be deleted".to_string(),
            ));
        }
        Ok(false)
    }

    // ============ Subcontractors ============

    async fn insert_subcontractor(&self, subcontractor: Subcontractor) -> Result<Subcontractor, AppError> {
        let row = sqlx::query_as::<_, Subcontractor>(
            r#"
            INSERT INTO subcontractors (
                id, business_name, contact_name, email, phone, address, license_number,
                specialties, status, admin_notes, rating, project_count, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(subcontractor.id)
        .bind(&subcontractor.business_name)
        .bind(&subcontractor.contact_name)
        .bind(&subcontractor.email)
        .bind(&subcontractor.phone)
        .bind(&subcontractor.address)
        .bind(&subcontractor.license_number)
        .bind(&subcontractor.specialties)
        .bind(subcontractor.status)
        .bind(&subcontractor.admin_notes)
        .bind(&subcontractor.rating)
        .bind(subcontractor.project_count)
        .bind(subcontractor.created_at)
        .bind(subcontractor.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_subcontractor(&self, id: Uuid) -> Result<Option<Subcontractor>, AppError> {
        let row = sqlx::query_as::<_, Subcontractor>("SELECT * FROM subcontractors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_subcontractors(
        &self,
        filter: &ListFilter<SubcontractorStatus>,
    ) -> Result<Vec<Subcontractor>, AppError> {
        let rows = sqlx::query_as::<_, Subcontractor>(
            r#"
            SELECT * FROM subcontractors
            WHERE ($1::subcontractor_status IS NULL OR status = $1)
            ORDER BY created_at DESC
            "#,
        )
        .bind(filter.status)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn update_subcontractor(&self, subcontractor: Subcontractor) -> Result<Subcontractor, AppError> {
        let row = sqlx::query_as::<_, Subcontractor>(
            r#"
            UPDATE subcontractors
            SET business_name = $2,
                contact_name = $3,
                email = $4,
                phone = $5,
                address = $6,
                license_number = $7,
                specialties = $8,
                rating = $9,
                project_count = $10,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(subcontractor.id)
        .bind(&subcontractor.business_name)
        .bind(&subcontractor.contact_name)
        .bind(&subcontractor.email)
        .bind(&subcontractor.phone)
        .bind(&subcontractor.address)
        .bind(&subcontractor.license_number)
        .bind(&subcontractor.specialties)
        .bind(&subcontractor.rating)
        .bind(subcontractor.project_count)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| not_found("Subcontractor", subcontractor.id))
    }

    async fn set_subcontractor_status(
        &self,
        id: Uuid,
        expected: SubcontractorStatus,
        to: SubcontractorStatus,
        admin_notes: Option<String>,
    ) -> Result<Subcontractor, AppError> {
        let row = sqlx::query_as::<_, Subcontractor>(
            r#"
            UPDATE subcontractors
            SET status = $3,
                admin_notes = COALESCE($4, admin_notes),
                updated_at = now()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(to)
        .bind(&admin_notes)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row),
            None => Err(self
                .missed_write("subcontractors", "Subcontractor", id, expected)
                .await),
        }
    }
}
