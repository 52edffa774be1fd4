//! Backfill workers.

use super::{Inner, Registration};
use crate::{
    Metrics, normalize,
    retry::{fetch_block_at_height, with_retry},
};
use futures::future::join_all;
use hotchain_primitives::{BackfillJob, ChunkProgress, ChunkStatus};
use hotchain_source::{ChainSource, SourceError};
use hotchain_storage::{BufferWriter, JobStorage, StorageError};
use std::sync::atomic::Ordering;

/// Why a height could not be committed.
#[derive(Debug, thiserror::Error)]
enum HeightError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl<C, S> Inner<C, S>
where
    C: ChainSource,
    S: BufferWriter + JobStorage,
{
    /// Runs every unfinished chunk of `job` on `job.concurrency` workers and returns
    /// the chunks they touched.
    pub(super) async fn run_workers(
        &self,
        job: &BackfillJob,
        registration: &Registration<C, S>,
    ) -> Vec<ChunkProgress> {
        let (queue, claims) = async_channel::unbounded();
        for chunk in job.chunks.iter().filter(|c| c.status != ChunkStatus::Completed) {
            // Unbounded and open.
            let _ = queue.try_send(chunk.clone());
        }
        queue.close();

        let workers = (0..job.concurrency.max(1)).map(|worker| {
            let claims = claims.clone();
            async move {
                let mut touched = Vec::new();
                while let Ok(chunk) = claims.recv().await {
                    if registration.cancel.is_cancelled() {
                        break;
                    }
                    trace!(
                        target: "backfill",
                        job_id = job.id,
                        worker,
                        chunk = chunk.index,
                        "Claimed chunk"
                    );
                    touched.push(self.run_chunk(job.id, chunk, registration).await);
                }
                touched
            }
        });
        join_all(workers).await.into_iter().flatten().collect()
    }

    async fn run_chunk(
        &self,
        job_id: u64,
        mut chunk: ChunkProgress,
        registration: &Registration<C, S>,
    ) -> ChunkProgress {
        chunk.status = ChunkStatus::Running;
        chunk.error = None;
        if let Err(err) = self.save_chunk(job_id, &chunk).await {
            return self.fail_chunk(job_id, chunk, &err.into()).await;
        }

        while let Some(height) = chunk.next_height() {
            if registration.cancel.is_cancelled() {
                chunk.status = ChunkStatus::Pending;
                if let Err(err) = self.save_chunk(job_id, &chunk).await {
                    warn!(
                        target: "backfill",
                        job_id,
                        chunk = chunk.index,
                        %err,
                        "Failed to persist paused chunk"
                    );
                }
                return chunk;
            }

            match self.ingest_height(height).await {
                Ok(true) => {}
                Ok(false) => {
                    chunk.skipped += 1;
                    metrics::counter!(Metrics::BACKFILL_SKIPPED).increment(1);
                }
                Err(err) => return self.fail_chunk(job_id, chunk, &err).await,
            }

            chunk.commit(height);
            if let Err(err) = self.save_chunk(job_id, &chunk).await {
                return self.fail_chunk(job_id, chunk, &err.into()).await;
            }
            registration.committed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(Metrics::BACKFILL_HEIGHTS).increment(1);
        }

        debug!(
            target: "backfill",
            job_id,
            chunk = chunk.index,
            start = chunk.start_height,
            end = chunk.end_height,
            skipped = chunk.skipped,
            "Chunk completed"
        );
        chunk
    }

    /// Fetches, normalizes and stores `height`. Returns `false` if the payload was
    /// malformed and the height skipped.
    async fn ingest_height(&self, height: u64) -> Result<bool, HeightError> {
        let raw = match fetch_block_at_height(
            &self.source,
            height,
            self.include_transactions,
            &self.retry,
        )
        .await
        {
            Ok(raw) => raw,
            Err(SourceError::Malformed(err)) => {
                warn!(target: "backfill", height, %err, "Undecodable block, skipping");
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };

        match normalize(raw) {
            Ok(block) => {
                self.writer.upsert(&block).await?;
                Ok(true)
            }
            Err(err) => {
                warn!(target: "backfill", height, %err, "Malformed block, skipping");
                Ok(false)
            }
        }
    }

    async fn fail_chunk(
        &self,
        job_id: u64,
        mut chunk: ChunkProgress,
        err: &HeightError,
    ) -> ChunkProgress {
        warn!(
            target: "backfill",
            job_id,
            chunk = chunk.index,
            next_height = ?chunk.next_height(),
            %err,
            "Chunk failed"
        );
        metrics::counter!(Metrics::BACKFILL_CHUNK_FAILURES).increment(1);
        chunk.status = ChunkStatus::Failed;
        chunk.error = Some(err.to_string());
        if let Err(err) = self.save_chunk(job_id, &chunk).await {
            warn!(
                target: "backfill",
                job_id,
                chunk = chunk.index,
                %err,
                "Failed to persist failed chunk"
            );
        }
        chunk
    }

    async fn save_chunk(&self, job_id: u64, chunk: &ChunkProgress) -> Result<(), StorageError> {
        with_retry(&self.retry, "chunk save", StorageError::is_retryable, || async {
            self.store.save_chunk(job_id, chunk)
        })
        .await
    }
}
