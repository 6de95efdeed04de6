//! Meno engine: run hydration, the cookbook outbox and their IO adapters.
mod backend;
mod cache;
mod collaborators;
mod filename;
mod hydration;
mod outbox;
mod persist;
mod settings;
mod store;
mod types;

pub use backend::BackendClient;
pub use cache::HydrationCache;
pub use collaborators::{
    ChannelProgressSink, ItemCompleter, NullProgressSink, ProgressSink, RemoteCollection,
    SummaryGenerator,
};
pub use filename::key_filename;
pub use hydration::{HydrationEngine, HydrationEngineBuilder, HydrationToken};
pub use outbox::{
    MutationOutbox, ACKNOWLEDGED_KEY, COLLECTION_KEY, DEAD_LETTER_KEY, QUEUE_KEY, SYNC_ERROR_KEY,
};
pub use persist::{ensure_data_dir, AtomicFileWriter, PersistError};
pub use settings::{
    system_clock, BackendSettings, Clock, EngineConfig, HydrationSettings, OutboxSettings,
};
pub use store::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, StoreError};
pub use types::{
    EngineError, EngineEvent, FlushOutcome, HydrationReport, OutboxError, StaleResult,
    TransportError, TransportKind, UpstreamError,
};
