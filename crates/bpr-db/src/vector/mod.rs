//! Chunk store module for bpr-db.
//!
//! ## Available Backends
//!
//! - `simple`: file-based backend for local evaluation and tests
//! - `qdrant`: Qdrant collection over REST
//!
//! ## Usage
//!
//! ```ignore
//! use bpr_db::vector::{open_vector_index, VectorIndexConfig, VectorSearchFilter};
//!
//! let config = VectorIndexConfig::new(384, "/path/to/index");
//! let index = open_vector_index(&config)?;
//!
//! let filter = VectorSearchFilter::new().with_event_key("gbduro-2023");
//! let results = index.query(&embedding, 50, Some(&filter))?;
//! ```

mod backend;
mod config;
mod metadata;
mod traits;

pub use config::{
    inspect_file_index, load_index_meta, write_index_meta, VectorIndexConfig, VectorIndexMeta,
    DEFAULT_BACKEND, DEFAULT_COLLECTION, DEFAULT_QDRANT_URL, DEFAULT_TIMEOUT_SECS,
    INDEX_META_FILENAME,
};
pub use metadata::{
    VectorSearchFilter, FIELD_CHUNK_ID, FIELD_CHUNK_INDEX, FIELD_EVENT_KEY, FIELD_RIDER_ID,
    FIELD_TEXT,
};
pub use traits::{VectorId, VectorIndexBackend, VectorInsert, VectorMetric, VectorSearchResult};

pub use backend::{available_backends, open_vector_index};

#[cfg(feature = "qdrant")]
pub use backend::QdrantVectorIndex;

#[cfg(feature = "simple")]
pub use backend::SimpleFileVectorIndex;
