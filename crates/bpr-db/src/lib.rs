//! # bpr-db
//!
//! Infrastructure layer for bpr - the chunk store that holds one embedding per
//! rider-setup text chunk together with its structured payload.
//!
//! The retrieval core in `bpr-core` only talks to the [`vector::VectorIndexBackend`]
//! trait. Keeping storage here means:
//!
//! - Network clients and file formats never leak into the ranking logic
//! - Backends can be swapped per run through configuration
//! - Tests can use an in-memory fake without touching disk or network
//!
//! ## Architecture
//!
//! ```text
//! bpr-cli → bpr-core → (VectorIndexBackend trait)
//!               ↑
//!            bpr-db (simple file backend, Qdrant REST backend)
//! ```
//!
//! ## Features
//!
//! - `simple` (default): JSONL file backend with linear scan
//! - `qdrant` (default): Qdrant REST backend
//!
//! ## Usage
//!
//! ```ignore
//! use bpr_db::vector::{open_vector_index, VectorIndexConfig};
//!
//! let config = VectorIndexConfig::new(384, "/path/to/index").with_backend("simple");
//! let index = open_vector_index(&config)?;
//!
//! index.upsert(&inserts)?;
//! let hits = index.query(&embedding, 50, None)?;
//! ```

pub mod error;
pub mod vector;

pub use error::{DbError, DbResult};
