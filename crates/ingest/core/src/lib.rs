#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

mod config;
pub use config::{ConfigError, IngestConfig, RetryConfig};

mod metrics;
pub use metrics::Metrics;

mod normalize;
pub use normalize::{NormalizeError, normalize};

mod lease;
pub use lease::{CursorLease, CursorReadGuard, CursorReader, CursorWriteGuard, CursorWriter};

mod publish;
pub use publish::{EventPublisher, EventSubscriber, PublishPolicy, channel};

mod retry;

mod writer;
pub use writer::HotBufferWriter;

mod reconciler;
pub use reconciler::{ReconcileError, ReconcileOutcome, Reconciler};

mod live;
pub use live::LiveIngestion;

mod retention;
pub use retention::{RetentionSweeper, SweepReport};

mod router;
pub use router::{QueryRouter, RoutePlan, RouterError};

mod backfill;
pub use backfill::{BackfillError, BackfillOrchestrator};

mod rpc;
pub use rpc::{IngestRpc, JOB_RUNNING_CODE, NOT_RESUMABLE_CODE, UNKNOWN_JOB_CODE};

mod service;
pub use service::{IngestService, ServiceError};
