//! Asynchronous resolution of navigation context. Each resolver owns a
//! `watch` channel: readers get the latest state without re-fetching and can
//! await a terminal state.

pub mod session;
pub mod tenant;

pub use session::{SessionPhase, SessionResolver, SessionSnapshot};
pub use tenant::{TenantResolver, TenantState};
