//! # tidekv storage
//!
//! Byte-level storage backends underneath the tidekv persistence log.
//!
//! Backends are **opaque, append-oriented byte stores**: the log layer in
//! `tidekv_core` owns the record format, checksums, and replay rules, while a
//! backend only knows how to append bytes, read them back by offset, make
//! them durable, and cut off a damaged tail.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - a single OS file, used by on-disk databases
//! - [`InMemoryBackend`] - a growable buffer for tests and ephemeral stores
//!
//! ## Example
//!
//! ```rust
//! use tidekv_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"set a 1").unwrap();
//! assert_eq!(backend.read_at(offset, 7).unwrap(), b"set a 1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
