//! Data layer for the site's admin back office.
//!
//! The site API is the source of truth; this crate fetches, caches and
//! mutates admin collections (members, donations, careers, opportunities,
//! tenders, news, safeguarding reports, users) on behalf of a view layer.
//!
//! - [`api`]: HTTP client, response envelope extraction, domain records
//! - [`query`]: keyed cache with request de-duplication and persistence
//! - [`hooks`]: admin list queries, actions and optimistic mutations
//! - [`context`]: the explicit handle hooks are built from
//! - [`notify`]: the success/error message sink

pub mod admin;
pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod fees;
pub mod hooks;
pub mod logging;
pub mod notify;
pub mod query;

pub use context::{AdminContext, AdminContextBuilder};
pub use error::{ApiError, ContextError};
