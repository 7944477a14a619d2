//! Delivery engine: the job queue and its worker, the triggered-notification
//! event log, suppression and consent gating, template rendering and
//! unsubscribe tokens.

pub mod backoff;
pub mod consent;
pub mod event_log;
pub mod pagination;
pub mod queue;
pub mod render;
pub mod suppression;
pub mod triggers;
pub mod unsubscribe;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use consent::{ConsentService, MarketingDecision};
pub use event_log::{EventKey, EventLog, RecordOutcome, SendOnceOutcome};
pub use pagination::Page;
pub use queue::{EmailJobRequest, JobFilter, JobQueue, QueueStats};
pub use render::{HandlebarsRenderer, RenderError, RenderedEmail, TemplateRenderer};
pub use suppression::{SuppressionFilter, SuppressionRegistry};
pub use triggers::{Amount, Recipient, Triggers};
pub use unsubscribe::{TokenError, UnsubscribeTokens};
pub use worker::{BatchReport, UnsubscribeLinks, Worker};
