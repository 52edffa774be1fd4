#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

mod error;
pub use error::SourceError;

mod traits;
pub use traits::ChainSource;

mod api;
pub use api::BitcoinApiClient;

mod rpc;
pub use rpc::RpcChainSource;

#[cfg(any(test, feature = "test-utils"))]
mod memory;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::{MemoryChainSource, synthetic_hash};
