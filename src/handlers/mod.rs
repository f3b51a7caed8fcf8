//! # HTTP Handlers
//!
//! Two families of endpoints:
//!
//! - **Lifecycle webhooks** (`lifecycle`, `forward`): called by SRS itself.
//!   These must answer fast, so they decode, acknowledge with the SRS
//!   status token, and hand all real work to the background dispatcher.
//! - **Status endpoints** (`status`): read-only views for dashboards,
//!   proxying the control-plane API and reshaping its payloads.

pub mod forward;
pub mod lifecycle;
pub mod status;
