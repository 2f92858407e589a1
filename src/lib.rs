//! Lead Conversation API Library
//!
//! WhatsApp conversation pipeline for a lead-management CRM: inbound Twilio
//! webhooks are matched to a lead, answered by a text-generation model and
//! recorded per lead, with on-demand lead-quality scoring.
//!
//! # Modules
//!
//! - `analyzer`: Conversation scoring.
//! - `circuit_breaker`: Circuit breaker for model calls.
//! - `config`: Configuration management.
//! - `conversation_store`: Per-lead message log (Postgres and in-memory).
//! - `db`: Database connection and pool management.
//! - `errors`: Error handling types.
//! - `gateway_client`: Twilio WhatsApp client.
//! - `handlers`: Admin HTTP handlers and shared state.
//! - `lead_resolver`: Sender address to lead matching.
//! - `llm_client`: OpenAI-compatible chat completion client.
//! - `models`: Core data models.
//! - `orchestrator`: Inbound message pipeline.
//! - `phone`: Phone number normalization.
//! - `reply_generator`: Model-backed replies with canned fallbacks.
//! - `webhook_handler`: Twilio webhook handlers.
//! - `webhook_models`: Webhook payload models.

pub mod analyzer;
pub mod circuit_breaker;
pub mod config;
pub mod conversation_store;
pub mod db;
pub mod errors;
pub mod gateway_client;
pub mod handlers;
pub mod lead_resolver;
pub mod llm_client;
pub mod models;
pub mod orchestrator;
pub mod phone;
pub mod reply_generator;
pub mod webhook_handler;
pub mod webhook_models;
