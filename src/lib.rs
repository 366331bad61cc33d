//! `facets` is the data layer of a Redmine client: typed models, an
//! authenticated API client, an offline cache, shared session state and the
//! issue list view-models a UI binds to.

/// Attachment downloads to local storage.
pub mod attachments;
/// SQLite-backed offline cache for projects and server enumerations.
pub mod cache;
/// Runtime configuration loading and validation.
pub mod config;
/// Logging helpers used throughout the crate.
pub mod logging;
/// Runtime metrics counters.
pub mod metrics;
/// Records parsed from Redmine JSON.
pub mod models;
/// Redmine REST API client.
pub mod redmine;
/// Plain-text renderers for the command-line front end.
pub mod render;
/// Process-wide session state.
pub mod session;
/// Sortable fields and list filters.
pub mod sort;
/// Issue list view-models.
pub mod view_model;
/// Offline cache seeding.
pub mod warmup;
