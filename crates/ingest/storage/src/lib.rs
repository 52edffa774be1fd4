#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

mod error;
pub use error::StorageError;

mod traits;
pub use traits::{
    BufferReader, BufferWriter, CursorStorage, HistoricalReader, JobStorage, NoHistory,
    UpsertOutcome,
};

mod keys;

mod rocks;
pub use rocks::RocksStore;

mod historical;
pub use historical::HistoricalStore;

#[cfg(any(test, feature = "test-utils"))]
mod memory;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;
