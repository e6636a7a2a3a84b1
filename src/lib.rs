pub mod api_router;
pub mod approvals;
pub mod auth;
pub mod core;
pub mod import;
pub mod insights;
pub mod kpi;
pub mod llm;
pub mod org;
pub mod permissions;
pub mod store;

pub use crate::core::config;
pub use crate::core::shared;
