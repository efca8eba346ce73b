//! Gig-worker payout saga: box and backend servers coordinating account
//! registration, payout creation and gateway webhook reconciliation through
//! durable job queues.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod queue;
pub mod services;
pub mod workers;
