//! Matching Service - Receipt-to-transaction matching with confidence-scored
//! auto-proposals and human review.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
