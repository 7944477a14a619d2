//! Postbox HTTP surface.
//!
//! - `POST /api/jobs` enqueue an email job
//! - `POST /api/triggers/*` triggered notifications for other services
//! - `/api/admin/*` operator job, suppression and consent management
//! - `POST /api/webhooks/{resend,sendgrid}` provider bounce/complaint events
//! - `GET|POST /api/unsubscribe` signed unsubscribe links

pub mod middleware;
pub mod routes;
pub mod state;
