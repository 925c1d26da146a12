//! Shared dependencies of all workers

use crate::artifact::{ArtifactAcquirer, ArtifactChunker, BufferPool, TempArena};
use crate::clients::{MessagingClient, MetadataReader, SourceClient, TextNormalizer};
use crate::config::Config;
use crate::db::StateStore;
use crate::extraction::ArchiveExpander;
use crate::Result;
use std::sync::Arc;

/// Transfer buffers kept around between downloads
const IDLE_TRANSFER_BUFFERS: usize = 4;

/// The external collaborators the embedding application provides
#[derive(Clone)]
pub struct Collaborators {
    /// Content feed access
    pub source: Arc<dyn SourceClient>,
    /// Messaging destination access
    pub messaging: Arc<dyn MessagingClient>,
    /// Repair of mis-decoded names
    pub normalizer: Arc<dyn TextNormalizer>,
    /// Audio tag extraction
    pub metadata: Arc<dyn MetadataReader>,
}

/// Everything a worker needs, built once at start-up
///
/// Cloning is cheap: every field is either reference counted or a small value.
#[derive(Clone)]
pub struct MirrorContext {
    /// Validated configuration
    pub config: Arc<Config>,
    /// Delivery record store
    pub store: StateStore,
    /// Content feed access
    pub source: Arc<dyn SourceClient>,
    /// Messaging destination access
    pub messaging: Arc<dyn MessagingClient>,
    /// Per-post temporary directories
    pub arena: TempArena,
    /// Artifact downloads
    pub acquirer: ArtifactAcquirer,
    /// Size-limited file writing
    pub chunker: ArtifactChunker,
    /// Archive to track expansion
    pub expander: ArchiveExpander,
}

impl MirrorContext {
    /// Validate `config`, open the state store and wire up the workers' shared parts
    pub async fn open(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let store = StateStore::open(&config.storage.database_path).await?;
        Self::with_store(config, store, collaborators)
    }

    /// Like [`MirrorContext::open`], with an already opened store
    pub fn with_store(
        config: Config,
        store: StateStore,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let arena = TempArena::new(
            config.storage.local_files_dir.clone(),
            config.storage.server_files_dir.clone(),
        );
        let acquirer = ArtifactAcquirer::new(&config.download)?;
        let pool = BufferPool::new(config.download.transfer_buffer_size, IDLE_TRANSFER_BUFFERS);
        let chunker = ArtifactChunker::new(config.delivery.transport_limit, pool);
        let expander = ArchiveExpander::new(
            chunker.clone(),
            collaborators.normalizer,
            collaborators.metadata,
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            source: collaborators.source,
            messaging: collaborators.messaging,
            arena,
            acquirer,
            chunker,
            expander,
        })
    }
}
