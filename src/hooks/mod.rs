//! Data hooks used by admin views.
//!
//! - [`AdminQuery`]: observe a list, fetching through the shared cache
//! - [`AdminAction`]: run a mutation, then invalidate and notify
//! - [`OptimisticMutation`]: update the cache first, confirm or roll back

mod admin_action;
mod admin_data;
mod optimistic;

pub use admin_action::{AdminAction, DEFAULT_ACTION_ERROR};
pub use admin_data::{AdminQuery, ErrorHandler, QueryStatus, DEFAULT_FETCH_ERROR};
pub use optimistic::OptimisticMutation;
