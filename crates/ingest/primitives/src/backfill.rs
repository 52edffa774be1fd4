//! Backfill job records.
//!
//! A job covers a closed height range split into disjoint chunks. Workers own a
//! chunk at a time and advance its `last_committed_height` after every height, so a
//! job that is interrupted can be resumed from the persisted chunk state.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while planning a backfill.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PlanError {
    /// `start_height > end_height`.
    #[error("invalid height range [{start}, {end}]")]
    InvalidRange {
        /// Requested start.
        start: u64,
        /// Requested end.
        end: u64,
    },
    /// The requested range lies beyond the chain tip.
    #[error("height {end} is above the chain tip {tip}")]
    BeyondTip {
        /// Requested end.
        end: u64,
        /// Current tip.
        tip: u64,
    },
    /// Batch size or concurrency is zero.
    #[error("batch size and concurrency must be non-zero")]
    ZeroSized,
}

/// The height range requested for a backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum BackfillRange {
    /// An explicit closed range.
    Explicit {
        /// First height.
        start: u64,
        /// Last height, inclusive.
        end: u64,
    },
    /// The last `count` blocks up to the tip.
    LastN {
        /// Number of blocks.
        count: u64,
    },
    /// Everything from genesis to the tip.
    FromGenesis,
}

impl BackfillRange {
    /// Resolves the range against the current chain tip.
    pub const fn resolve(&self, tip: u64) -> Result<(u64, u64), PlanError> {
        match *self {
            Self::Explicit { start, end } => {
                if start > end {
                    return Err(PlanError::InvalidRange { start, end });
                }
                if end > tip {
                    return Err(PlanError::BeyondTip { end, tip });
                }
                Ok((start, end))
            }
            Self::LastN { count } => {
                if count == 0 {
                    return Err(PlanError::ZeroSized);
                }
                Ok(((tip + 1).saturating_sub(count), tip))
            }
            Self::FromGenesis => Ok((0, tip)),
        }
    }
}

/// A request to start a backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillRequest {
    /// The range to backfill.
    pub range: BackfillRange,
    /// Heights per chunk. Falls back to the configured default.
    pub batch_size: Option<u64>,
    /// Number of workers. Falls back to the configured default.
    pub concurrency: Option<usize>,
}

/// Lifecycle of a backfill job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Planned, not started.
    #[display("pending")]
    Pending,
    /// Workers are running.
    #[display("running")]
    Running,
    /// Cancelled with unfinished chunks; resumable.
    #[display("paused")]
    Paused,
    /// Every chunk completed.
    #[display("completed")]
    Completed,
    /// Every chunk finished, some of them failed.
    #[display("completed-with-errors")]
    CompletedWithErrors,
    /// The job itself could not proceed (for example, progress could not be persisted).
    #[display("failed")]
    Failed,
}

impl JobStatus {
    /// Returns `true` once no worker will touch the job again without a resume.
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// Lifecycle of a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkStatus {
    /// Not claimed yet.
    #[display("pending")]
    Pending,
    /// Claimed by a worker.
    #[display("running")]
    Running,
    /// Every height committed.
    #[display("completed")]
    Completed,
    /// Gave up after exhausting retries.
    #[display("failed")]
    Failed,
}

/// Progress of one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgress {
    /// Position of the chunk in the job.
    pub index: u32,
    /// First height of the chunk.
    pub start_height: u64,
    /// Last height of the chunk, inclusive.
    pub end_height: u64,
    /// Highest height written so far.
    pub last_committed_height: Option<u64>,
    /// Chunk state.
    pub status: ChunkStatus,
    /// Heights skipped because their payload was malformed.
    pub skipped: u64,
    /// The error that failed the chunk.
    pub error: Option<String>,
}

impl ChunkProgress {
    /// Creates a pending chunk.
    pub const fn new(index: u32, start_height: u64, end_height: u64) -> Self {
        Self {
            index,
            start_height,
            end_height,
            last_committed_height: None,
            status: ChunkStatus::Pending,
            skipped: 0,
            error: None,
        }
    }

    /// The next height to process, or `None` if every height is committed.
    pub const fn next_height(&self) -> Option<u64> {
        let next = match self.last_committed_height {
            Some(height) => height + 1,
            None => self.start_height,
        };
        if next > self.end_height { None } else { Some(next) }
    }

    /// Number of heights in the chunk.
    pub const fn heights_total(&self) -> u64 {
        self.end_height - self.start_height + 1
    }

    /// Number of heights committed.
    pub const fn heights_done(&self) -> u64 {
        match self.last_committed_height {
            Some(height) => height - self.start_height + 1,
            None => 0,
        }
    }

    /// Records `height` as committed.
    pub const fn commit(&mut self, height: u64) {
        self.last_committed_height = Some(height);
        if height >= self.end_height {
            self.status = ChunkStatus::Completed;
        }
    }
}

/// A height range that failed, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRange {
    /// First height not committed.
    pub start_height: u64,
    /// Last height of the failed chunk.
    pub end_height: u64,
    /// Why the chunk failed.
    pub error: String,
}

/// A backfill job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillJob {
    /// Job identifier.
    pub id: u64,
    /// First height.
    pub start_height: u64,
    /// Last height, inclusive.
    pub end_height: u64,
    /// Heights per chunk.
    pub batch_size: u64,
    /// Number of workers.
    pub concurrency: usize,
    /// Job state.
    pub status: JobStatus,
    /// Chunks in height order.
    pub chunks: Vec<ChunkProgress>,
    /// Creation time, seconds since the Unix epoch.
    pub created_at: u64,
    /// Last status change, seconds since the Unix epoch.
    pub updated_at: u64,
    /// Job-level failure, if any.
    pub error: Option<String>,
}

impl BackfillJob {
    /// Plans a job over `[start_height, end_height]`.
    ///
    /// The range is cut into `batch_size` chunks. A trailing remainder shorter than a
    /// batch is folded into the last chunk so a job never ends with a runt chunk.
    pub fn plan(
        id: u64,
        start_height: u64,
        end_height: u64,
        batch_size: u64,
        concurrency: usize,
        now: u64,
    ) -> Result<Self, PlanError> {
        if batch_size == 0 || concurrency == 0 {
            return Err(PlanError::ZeroSized);
        }
        if start_height > end_height {
            return Err(PlanError::InvalidRange { start: start_height, end: end_height });
        }

        let span = end_height - start_height + 1;
        let count = (span / batch_size).max(1);
        let chunks = (0..count)
            .map(|i| {
                let start = start_height + i * batch_size;
                let end = if i + 1 == count { end_height } else { start + batch_size - 1 };
                ChunkProgress::new(i as u32, start, end)
            })
            .collect();

        Ok(Self {
            id,
            start_height,
            end_height,
            batch_size,
            concurrency,
            status: JobStatus::Pending,
            chunks,
            created_at: now,
            updated_at: now,
            error: None,
        })
    }

    /// Total number of heights in the job.
    pub const fn heights_total(&self) -> u64 {
        self.end_height - self.start_height + 1
    }

    /// Number of heights committed across all chunks.
    pub fn heights_done(&self) -> u64 {
        self.chunks.iter().map(ChunkProgress::heights_done).sum()
    }

    /// Number of completed chunks.
    pub fn completed_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.status == ChunkStatus::Completed).count()
    }

    /// The highest height `h` such that every height in `[start_height, h]` is committed.
    pub fn last_committed_height(&self) -> Option<u64> {
        let mut frontier = None;
        for chunk in &self.chunks {
            if chunk.status == ChunkStatus::Completed {
                frontier = Some(chunk.end_height);
                continue;
            }
            if chunk.last_committed_height.is_some() {
                frontier = chunk.last_committed_height;
            }
            break;
        }
        frontier
    }

    /// Committed fraction of the job, in percent.
    pub fn progress_percent(&self) -> f64 {
        self.heights_done() as f64 * 100.0 / self.heights_total() as f64
    }

    /// Ranges of failed chunks that still need work.
    pub fn failed_ranges(&self) -> Vec<FailedRange> {
        self.chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Failed)
            .filter_map(|c| {
                Some(FailedRange {
                    start_height: c.next_height()?,
                    end_height: c.end_height,
                    error: c.error.clone().unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Indices of chunks a run should process: everything not completed.
    pub fn unfinished_chunks(&self) -> Vec<u32> {
        self.chunks.iter().filter(|c| c.status != ChunkStatus::Completed).map(|c| c.index).collect()
    }

    /// Derives the job status after a run stopped, from its chunks.
    pub fn settle(&self, cancelled: bool) -> JobStatus {
        let all_done = self.chunks.iter().all(|c| c.status == ChunkStatus::Completed);
        let any_open = self
            .chunks
            .iter()
            .any(|c| matches!(c.status, ChunkStatus::Pending | ChunkStatus::Running));

        if all_done {
            JobStatus::Completed
        } else if cancelled && any_open {
            JobStatus::Paused
        } else if any_open {
            JobStatus::Failed
        } else {
            JobStatus::CompletedWithErrors
        }
    }
}

/// Status report of a job, as exposed on the control surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    /// Job identifier.
    pub job_id: u64,
    /// Job state.
    pub status: JobStatus,
    /// Committed fraction, in percent.
    pub progress_percent: f64,
    /// Heights committed.
    pub heights_done: u64,
    /// Heights in the job.
    pub heights_total: u64,
    /// Completed chunks.
    pub completed_chunks: usize,
    /// Chunks in the job.
    pub total_chunks: usize,
    /// Contiguous committed frontier.
    pub last_committed_height: Option<u64>,
    /// Heights per second during the current run.
    pub rate_per_sec: f64,
    /// Estimated seconds until completion at the current rate.
    pub eta_secs: Option<u64>,
    /// Failed chunks.
    pub failed_ranges: Vec<FailedRange>,
}

impl JobStatusReport {
    /// Builds a report for `job` given the observed rate of the current run.
    pub fn new(job: &BackfillJob, rate_per_sec: f64) -> Self {
        let heights_done = job.heights_done();
        let remaining = job.heights_total() - heights_done;
        let eta_secs = (rate_per_sec > 0.0 && job.status == JobStatus::Running)
            .then(|| (remaining as f64 / rate_per_sec).ceil() as u64);

        Self {
            job_id: job.id,
            status: job.status,
            progress_percent: job.progress_percent(),
            heights_done,
            heights_total: job.heights_total(),
            completed_chunks: job.completed_chunks(),
            total_chunks: job.chunks.len(),
            last_committed_height: job.last_committed_height(),
            rate_per_sec,
            eta_secs,
            failed_ranges: job.failed_ranges(),
        }
    }
}
