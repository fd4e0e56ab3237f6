//! Reconciles Vector instances against the pipeline fragments that select
//! them: synthesis, validation in a throwaway pod, then promotion.
pub mod applier;
pub mod config;
pub mod controller;
pub mod error;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod reconciler;
