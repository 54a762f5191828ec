//! Payment processing for the library backend: payment state machine, gateway
//! port with an ePay adapter, callback reconciliation with a retry queue,
//! refunds, receipts, saved cards and the background scheduler.

pub mod api;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
