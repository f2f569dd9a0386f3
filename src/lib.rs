//! Launch Space - premium listing payments for a product launch directory
//!
//! This library provides the Stripe webhook reconciliation engine that keeps
//! project entitlements in step with payments, plus the premium upgrade flow,
//! storage and HTTP handlers around it.
#![recursion_limit = "256"]

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod id;
pub mod models;
pub mod notifications;
pub mod payments;
pub mod reconcile;
pub mod upgrade;
