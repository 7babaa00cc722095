// Application layer - Use cases and the traits infrastructure implements
pub mod dashboard_service;
pub mod fetch_coordinator;
pub mod metrics_repository;
pub mod panel_store;
pub mod persistence;
pub mod query_rewriter;
pub mod series_aligner;
pub mod series_namer;
