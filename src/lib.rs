//! # SRS Relay Backend
//!
//! Backend sitting between an SRS media server and a row-store database.
//! It accepts SRS lifecycle webhooks (publish, unpublish, play, stop,
//! forward), tracks viewer sessions, aggregates server and per-stream
//! metrics on a fixed cadence, and keeps one thumbnail per live stream
//! fresh with ffmpeg.
//!
//! ## Architecture
//!
//! - [`router`] wires the axum HTTP surface and shared [`router::AppState`]
//! - [`handlers`] implement the webhook and status endpoints
//! - [`dispatch`] runs webhook side effects on a bounded worker pool so
//!   SRS callbacks are acknowledged without waiting on the database
//! - [`sessions`] tracks viewer connect/disconnect pairs
//! - [`metrics`] polls the SRS status API every collection period
//! - [`thumbnails`] owns one cancellable capture loop per live stream
//! - [`srs`] and [`gateway`] are the two outbound seams, each behind a
//!   trait so tests can script them

#[macro_use]
extern crate tracing;

pub mod callback;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod router;
pub mod sessions;
pub mod srs;
pub mod thumbnails;
