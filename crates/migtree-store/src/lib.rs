//! # migtree-store
//!
//! History backends for [`migtree`](https://docs.rs/migtree).
//!
//! Each backend implements [`migtree::HistoryStore`]. The SQLite backend also
//! hands out an execution context on the same connection, so SQL migrations
//! and their history share one database.
//!
//! ## Quick Start
//!
//! ```
//! use migtree::HistoryStore;
//! use migtree_store::MemoryHistory;
//!
//! let mut history = MemoryHistory::new();
//! history.append("m240305_142201_add_users_table").unwrap();
//! assert_eq!(history.list_applied().unwrap().len(), 1);
//! ```
//!
//! ## Backends
//!
//! | Backend | Feature flag | Use case |
//! |---------|-------------|----------|
//! | [`MemoryHistory`] | *(always available)* | Testing, dry runs |
//! | `SqliteStore` | `sqlite` | The `migtree` CLI, embedded apps |

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::{MemoryHistory, RecordingContext};
#[cfg(feature = "sqlite")]
pub use sqlite::{JournalMode, SqliteConfig, SqliteContext, SqliteError, SqliteStore};
