//! rating-core: versioned rate tables and a deterministic premium engine.

pub mod audit;
pub mod clone;
pub mod config;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod import;
pub mod model;
pub mod request;
pub mod service;
pub mod store;
pub mod types;
