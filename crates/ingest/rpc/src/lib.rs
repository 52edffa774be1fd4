#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod jsonrpsee;
#[cfg(feature = "client")]
pub use jsonrpsee::IngestApiClient;
pub use jsonrpsee::IngestApiServer;
