//! # coach_directives - Directive handling for Coach
//!
//! Generators embed machine-actionable commands in their replies as fenced
//! `action:<kind>` blocks. This crate finds those blocks, strips them from the
//! display text and validates each payload against a strict per-kind schema:
//!
//! ```text
//! reply text ──▶ DirectiveExtractor ──▶ Directive ──▶ validate() ──▶ ValidatedDirective
//!                       │                                                  │
//!                       ▼                                                  ▼
//!                 display text                                 typed record + target table
//! ```
//!
//! Nothing here performs I/O; persistence is left to the caller.

pub mod directive;
pub mod error;
pub mod extractor;
pub mod normalize;
pub mod records;
pub mod schema;
pub mod validator;

pub use directive::*;
pub use error::*;
pub use extractor::*;
pub use records::*;
pub use validator::*;
