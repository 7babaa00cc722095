// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod http_response;
pub mod prometheus_repository;
pub mod promql;
pub mod snapshot_storage;
