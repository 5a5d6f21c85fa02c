//! Storage layer for tabula
//!
//! Entries are kept behind the [`EntryStore`] trait so the engine can run
//! against memory (tests, previews) or a directory of JSON documents.

pub mod collection;
pub mod document;
pub mod file;
pub mod memory;
pub mod store;

pub use document::{Document, Entry, EntryId, Value};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::EntryStore;
