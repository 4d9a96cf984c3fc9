//! Consult persistence
//!
//! The engine depends only on the [`ConsultStore`] contract. Two
//! implementations ship with the crate:
//!
//! - [`MemoryStore`]: volatile, for tests and single-process deployments
//! - `RocksStore` (feature `rocksdb-store`): RocksDB column families
//!   `consults`, `notes`, `audit` and a deadline-ordered `due_index`
//!   used by the escalation sweep
//!
//! # Usage
//!
//! ```ignore
//! use consult_coordination::state::{ConsultStore, MemoryStore};
//!
//! let store = MemoryStore::new().shared();
//! let overdue = store.find_overdue(chrono::Utc::now())?;
//! ```

pub mod memory;
#[cfg(feature = "rocksdb-store")]
pub mod rocks;
#[cfg(feature = "rocksdb-store")]
pub mod schema;
pub mod store;

pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-store")]
pub use rocks::RocksStore;
pub use store::{Commit, ConsultStore, SharedConsultStore, StoreError, StoreResult};
