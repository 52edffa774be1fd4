//! Metrics of the ingestion pipeline.

/// Container for the metric names and their registration.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    /// Blocks newly written to the buffer by live ingestion.
    pub const BLOCKS_INGESTED: &'static str = "hotchain_blocks_ingested_total";
    /// Reorgs repaired by the reconciler.
    pub const REORGS: &'static str = "hotchain_reorgs_total";
    /// Blocks invalidated per repaired reorg.
    pub const REORG_DEPTH: &'static str = "hotchain_reorg_depth";
    /// Reorgs deeper than the configured bound.
    pub const DEEP_REORGS: &'static str = "hotchain_deep_reorgs_total";
    /// Height of the ingestion cursor.
    pub const CURSOR_HEIGHT: &'static str = "hotchain_cursor_height";
    /// Buffer rows evicted by the retention sweeper.
    pub const ROWS_SWEPT: &'static str = "hotchain_retention_rows_swept_total";
    /// Failed retention sweeps.
    pub const SWEEP_FAILURES: &'static str = "hotchain_retention_sweep_failures_total";
    /// Heights committed by backfill workers.
    pub const BACKFILL_HEIGHTS: &'static str = "hotchain_backfill_heights_committed_total";
    /// Heights skipped by backfill workers because of malformed payloads.
    pub const BACKFILL_SKIPPED: &'static str = "hotchain_backfill_heights_skipped_total";
    /// Backfill chunks that ran out of retries.
    pub const BACKFILL_CHUNK_FAILURES: &'static str = "hotchain_backfill_chunk_failures_total";
    /// Block events lost by a lagging subscriber.
    pub const PUBLISH_DROPPED: &'static str = "hotchain_publish_dropped_total";

    /// Describes and zeroes every series. Call once after installing a recorder.
    pub fn init() {
        Self::describe();
        Self::zero();
    }

    fn describe() {
        metrics::describe_counter!(
            Self::BLOCKS_INGESTED,
            metrics::Unit::Count,
            "Blocks newly written to the hot buffer by live ingestion",
        );
        metrics::describe_counter!(
            Self::REORGS,
            metrics::Unit::Count,
            "Chain reorganizations repaired",
        );
        metrics::describe_histogram!(
            Self::REORG_DEPTH,
            metrics::Unit::Count,
            "Buffered blocks invalidated per repaired reorg",
        );
        metrics::describe_counter!(
            Self::DEEP_REORGS,
            metrics::Unit::Count,
            "Reorgs deeper than max-reorg-depth",
        );
        metrics::describe_gauge!(
            Self::CURSOR_HEIGHT,
            metrics::Unit::Count,
            "Height of the last canonical block",
        );
        metrics::describe_counter!(
            Self::ROWS_SWEPT,
            metrics::Unit::Count,
            "Blocks evicted from the hot buffer",
        );
        metrics::describe_counter!(
            Self::SWEEP_FAILURES,
            metrics::Unit::Count,
            "Retention sweeps that failed",
        );
        metrics::describe_counter!(
            Self::BACKFILL_HEIGHTS,
            metrics::Unit::Count,
            "Heights committed by backfill workers",
        );
        metrics::describe_counter!(
            Self::BACKFILL_SKIPPED,
            metrics::Unit::Count,
            "Heights skipped by backfill workers",
        );
        metrics::describe_counter!(
            Self::BACKFILL_CHUNK_FAILURES,
            metrics::Unit::Count,
            "Backfill chunks that exhausted their retries",
        );
        metrics::describe_counter!(
            Self::PUBLISH_DROPPED,
            metrics::Unit::Count,
            "Block events dropped for a lagging subscriber",
        );
    }

    fn zero() {
        metrics::counter!(Self::BLOCKS_INGESTED).increment(0);
        metrics::counter!(Self::REORGS).increment(0);
        metrics::histogram!(Self::REORG_DEPTH).record(0);
        metrics::counter!(Self::DEEP_REORGS).increment(0);
        metrics::counter!(Self::ROWS_SWEPT).increment(0);
        metrics::counter!(Self::SWEEP_FAILURES).increment(0);
        metrics::counter!(Self::BACKFILL_HEIGHTS).increment(0);
        metrics::counter!(Self::BACKFILL_SKIPPED).increment(0);
        metrics::counter!(Self::BACKFILL_CHUNK_FAILURES).increment(0);
        metrics::counter!(Self::PUBLISH_DROPPED).increment(0);
    }
}
