//! Service assembly.

use crate::{
    BackfillError, BackfillOrchestrator, ConfigError, CursorLease, EventPublisher,
    EventSubscriber, HotBufferWriter, IngestConfig, IngestRpc, LiveIngestion, QueryRouter,
    ReconcileError, Reconciler, RetentionSweeper, channel,
};
use hotchain_primitives::BufferWindow;
use hotchain_rpc::IngestApiServer;
use hotchain_source::ChainSource;
use hotchain_storage::{BufferWriter, CursorStorage, HistoricalReader, JobStorage, StorageError};
use jsonrpsee::server::{ServerBuilder, ServerHandle};
use std::{io, net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors that stop an [`IngestService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The cursor could not be loaded.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The RPC server could not be bound.
    #[error("failed to start rpc server: {0}")]
    Rpc(#[from] io::Error),
    /// Interrupted backfill jobs could not be recovered.
    #[error(transparent)]
    Backfill(#[from] BackfillError),
    /// Live ingestion stopped on an unrecoverable error.
    #[error(transparent)]
    Ingestion(#[from] ReconcileError),
}

/// A hotchain node: live ingestion, retention, backfill and the control surface.
#[derive(Debug)]
pub struct IngestService<C, S, H> {
    config: IngestConfig,
    window: BufferWindow,
    source: C,
    store: Arc<S>,
    historical: Arc<H>,
    rpc_addr: Option<SocketAddr>,
    cancellation: CancellationToken,
    publisher: EventPublisher,
    events: Option<EventSubscriber>,
}

impl<C, S, H> IngestService<C, S, H>
where
    C: ChainSource + Clone + 'static,
    S: BufferWriter + JobStorage + CursorStorage + 'static,
    H: HistoricalReader + 'static,
{
    /// Creates the service after validating `config`.
    pub fn new(
        config: IngestConfig,
        source: C,
        store: Arc<S>,
        historical: Arc<H>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let window = config.window().map_err(ConfigError::from)?;
        let (publisher, events) = channel(config.publish_policy, config.publish_capacity);
        Ok(Self {
            config,
            window,
            source,
            store,
            historical,
            rpc_addr: None,
            cancellation: CancellationToken::new(),
            publisher,
            events: Some(events),
        })
    }

    /// Serves the control surface on `addr`.
    pub const fn with_rpc(mut self, addr: SocketAddr) -> Self {
        self.rpc_addr = Some(addr);
        self
    }

    /// Uses `cancellation` as the service's shutdown signal.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// The shutdown signal.
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Takes the receiving half of the block event channel.
    ///
    /// With the `block` policy, ingestion stalls once the channel is full and
    /// nobody drains it.
    pub fn events(&mut self) -> Option<EventSubscriber> {
        self.events.take()
    }

    /// Runs every component until cancelled or until live ingestion fails.
    pub async fn start(self) -> Result<(), ServiceError> {
        // Unclaimed events are discarded instead of filling the channel.
        drop(self.events);
        let retry = self.config.retry();
        let (cursor, reader) = CursorLease::load(self.store.clone())?.split();

        let writer = HotBufferWriter::new(self.store.clone(), retry, Some(self.publisher));
        let reconciler = Reconciler::new(
            self.source.clone(),
            writer,
            cursor,
            self.config.max_reorg_depth,
            retry,
            self.config.include_transactions,
        );
        let live = LiveIngestion::new(
            self.source.clone(),
            reconciler,
            retry,
            self.config.include_transactions,
            self.config.poll_interval(),
            self.cancellation.clone(),
        );
        let sweeper = RetentionSweeper::new(
            self.store.clone(),
            reader.clone(),
            self.window,
            self.config.sweep_interval(),
        );
        let orchestrator = BackfillOrchestrator::new(
            self.source,
            self.store.clone(),
            &self.config,
            self.cancellation.child_token(),
        );
        let recovered = orchestrator.recover_interrupted()?;
        if !recovered.is_empty() {
            info!(target: "ingest", jobs = ?recovered, "Interrupted backfill jobs are paused");
        }
        let backfills = orchestrator.clone();

        let rpc = match self.rpc_addr {
            Some(addr) => {
                let router = QueryRouter::new(self.historical, self.store, self.window);
                let handler = IngestRpc::new(orchestrator, router, reader);
                Some(launch_rpc(addr, handler).await?)
            }
            None => None,
        };

        let sweeper = tokio::spawn(sweeper.run(self.cancellation.clone()));
        let result = live.run().await;

        self.cancellation.cancel();
        backfills.shutdown().await;
        if let Err(err) = sweeper.await {
            warn!(target: "ingest", %err, "Retention sweeper task failed");
        }
        if let Some(handle) = rpc {
            if handle.stop().is_ok() {
                handle.stopped().await;
            }
        }
        info!(target: "ingest", "Service stopped");
        result.map_err(ServiceError::from)
    }
}

async fn launch_rpc<C, S, H>(
    addr: SocketAddr,
    handler: IngestRpc<C, S, H>,
) -> Result<ServerHandle, io::Error>
where
    C: ChainSource + 'static,
    S: BufferWriter + JobStorage + 'static,
    H: HistoricalReader + 'static,
{
    let server = ServerBuilder::default().build(addr).await?;
    info!(target: "rpc", addr = %server.local_addr()?, "Started rpc server");
    Ok(server.start(handler.into_rpc()))
}
