//! # coach_chat - Multi-agent coaching chat
//!
//! This crate turns a user message into one or more agent replies and the
//! confirmable actions embedded in them:
//!
//! - **Intent routing**: weighted keyword scoring across eight domains
//! - **Agent set**: one system instruction per domain, built from static
//!   knowledge and live user data
//! - **Dispatch**: the primary agent streams, secondary agents are merged in
//! - **Knowledge lookup**: product database search with a generative fallback
//! - **Action lifecycle**: confirm, execute, retry, reject
//! - **Threads**: per-domain message cache with a two-tier storage
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ CoachSession │────▶│ IntentRouter │────▶│  Dispatcher  │──▶ Generator
//! └──────┬───────┘     └──────────────┘     └──────┬───────┘
//!        │                                         │ search_product
//!        ▼                                         ▼
//! ┌──────────────┐     ┌──────────────────┐  ┌─────────────────┐
//! │ ThreadStore  │◀────│ ActionController │  │ KnowledgeLookup │
//! └──────┬───────┘     └────────┬─────────┘  └─────────────────┘
//!        ▼                      ▼
//!  SessionStorage      ActionSink / HistoryStore / UsageSink
//! ```

pub mod actions;
pub mod agents;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod llm;
pub mod lookup;
pub mod mock;
pub mod persistence;
pub mod router;
pub mod session;
pub mod store;
pub mod types;
pub mod usage;

pub use actions::*;
pub use agents::*;
pub use config::*;
pub use dispatcher::*;
pub use error::*;
pub use llm::*;
pub use lookup::*;
pub use persistence::*;
pub use router::*;
pub use session::*;
pub use store::*;
pub use types::*;
pub use usage::*;
