//! # Context Assembly
//!
//! Assembles task-scoped context for agents from two sources: a directory of
//! source repositories and a relational database schema.
//!
//! A natural-language task description is turned into keywords and
//! technologies. Repositories and tables are scored against them, and the
//! result is kept as a persisted workflow context that moves through the
//! questions, answers, and card generation steps.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐
//! │   Scanner    │   │ Introspector │
//! │ repos + git  │   │ SQLite schema│
//! └──────┬───────┘   └──────┬───────┘
//!        │                  │
//!        ▼                  ▼
//!   ┌─────────────────────────────┐    ┌──────────────┐
//!   │ ContextManager + Relevance  │──▶│ ContextStore │
//!   └──────────────┬──────────────┘    └──────────────┘
//!                  ▼
//!            ┌──────────┐
//!            │   CLI    │
//!            │  (ctxa)  │
//!            └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Repository, schema, and workflow data types |
//! | [`error`] | Error type, classification, and error payloads |
//! | [`scanner`] | Repository discovery, analysis, and cached scanning |
//! | [`detect`] | Language, config/test file, and framework tables |
//! | [`manifest`] | Dependency manifest parsing |
//! | [`git`] | Git metadata probe |
//! | [`db`] | Read-only database pool |
//! | [`introspect`] | Schema analysis and guarded query execution |
//! | [`security`] | Query validation and sensitive column masking |
//! | [`relevance`] | Keyword extraction and relevance scoring |
//! | [`context`] | Workflow context lifecycle |
//! | [`store`] | Durable context storage |
//! | [`record`] | Versioned on-disk record format |
//! | [`cache`] | In-process TTL cache |
//! | [`outcome`] | Per-unit results for fan-out work |

pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod detect;
pub mod error;
pub mod git;
pub mod introspect;
pub mod manifest;
pub mod models;
pub mod outcome;
pub mod record;
pub mod relevance;
pub mod scanner;
pub mod security;
pub mod store;

pub use error::{Error, Result};
