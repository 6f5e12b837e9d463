//! Database layer.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐
//! │    BatchWriter     │  (crate::writer - chunking and per-record fallback)
//! └─────────┬──────────┘
//!           │ PredictionStore
//!           ↓
//! ┌────────────────────┐
//! │    Predictions     │  (db::handlers - append-only repository)
//! └─────────┬──────────┘
//!           │ PgPool
//!           ↓
//! ┌────────────────────┐
//! │ ConnectionProvider │  (db::pool - descriptor, pool, schema guarantee)
//! └─────────┬──────────┘
//!           ↓
//!      PostgreSQL
//! ```
//!
//! # Modules
//!
//! - [`pool`]: connection descriptor and pooled connections
//! - [`handlers`]: the [`handlers::PredictionStore`] trait with PostgreSQL and in-memory stores
//! - [`models`]: row structures
//! - [`errors`]: store error classification (rejection vs. unavailable)

pub mod errors;
pub mod handlers;
pub mod models;
pub mod pool;
