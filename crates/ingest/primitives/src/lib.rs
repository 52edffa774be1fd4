#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod block;
pub use block::{
    Block, BlockHash, BlockId, BlockRef, Input, NormalizedBlock, Output, Transaction, TxHash,
};

mod raw;
pub use raw::{
    COIN, RawBlock, RawInput, RawOutput, RawPrevout, RawScriptPubKey, RawTransaction,
    RawTransactionEntry, btc_to_sats,
};

mod cursor;
pub use cursor::IngestionCursor;

mod event;
pub use event::BlockEvent;

mod time;
pub use time::{SECS_PER_HOUR, unix_now};

mod window;
pub use window::{BufferWindow, ReadOrder, TimeRange, WindowError};

mod backfill;
pub use backfill::{
    BackfillJob, BackfillRange, BackfillRequest, ChunkProgress, ChunkStatus, FailedRange,
    JobStatus, JobStatusReport, PlanError,
};
