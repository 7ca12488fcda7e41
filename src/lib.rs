//! Quote-to-Cash Back Office Library
//!
//! This library provides the core functionality for a contractor back office that
//! takes work from first contact to payment: leads, customers, proposals, projects,
//! invoices and subcontractors, plus the conversions between them.
//!
//! # Modules
//!
//! - `api`: API definitions.
//! - `core`: Core business logic.
//! - `integrations`: Storage and outbound service integrations.
//! - `calculator`: Line item, tax and total arithmetic.
//! - `capabilities`: Roles and the capabilities they grant.
//! - `config`: Configuration management.
//! - `conversion`: Lead to customer and proposal to project conversion.
//! - `credentials`: Portal password hashing.
//! - `db`: Database connection and pool management.
//! - `db_storage`: PostgreSQL implementation of the entity store.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `line_items`: Versioned line item documents.
//! - `memory_store`: In-memory implementation of the entity store.
//! - `models`: Core data models.
//! - `notifications`: Proposal delivery.
//! - `services`: Per-entity business operations.
//! - `status`: Status machines for every workflow entity.
//! - `store`: The entity store contract.
//! - `validation`: Contact field validation and normalization.

pub mod api;
pub mod core;
pub mod integrations;

pub mod calculator;
pub mod capabilities;
pub mod config;
pub mod conversion;
pub mod credentials;
pub mod decimal;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod line_items;
pub mod memory_store;
pub mod models;
pub mod notifications;
pub mod services;
pub mod status;
pub mod store;
pub mod validation;
