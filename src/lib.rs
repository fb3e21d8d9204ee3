//! Offline resilience layer for an embeddable chat widget.
//!
//! Sits as a transparent interception point in front of every outbound HTTP
//! call the widget makes: GETs get per-route caching (cache-first static
//! assets, network-first API reads with stale fallback), failed chat sends
//! are durably queued and answered with an optimistic degraded response,
//! and a sync coordinator replays the queue once connectivity returns.

pub mod config;
pub mod event;
pub mod interceptor;
pub mod lifecycle;
pub mod net;
pub mod queue;
pub mod router;
pub mod store;
pub mod sync;
pub mod worker;

pub use config::Config;
pub use event::{HostMessage, Trigger};
pub use net::{WidgetRequest, WidgetResponse};
pub use worker::Worker;
