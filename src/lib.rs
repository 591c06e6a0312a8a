// lib.rs - Optimistic CRUD synchronization core for back-office dashboards

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod capabilities;
pub mod clients;
pub mod config;
pub mod debounce;
pub mod error;
pub mod event;
pub mod metrics;
pub mod model;
pub mod remote;
pub mod store;
pub mod view;

pub const DEFAULT_GRACE_WINDOW_MS: u64 = 5000;
pub const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_MAX_RECORDS: usize = 10_000;
pub const DEFAULT_PAGE_SIZE: usize = 25;

pub use clients::{Client, ClientPatch, ClientStatus, NewClient};
pub use config::{ConfigError, StoreConfig};
pub use debounce::{debouncer, DebounceInput, Debouncer};
pub use error::{ErrorKind, FieldError, RemoteError, StoreError, StoreResult, TransportFailure};
pub use event::{ChangeNotification, Subscription, SubscriptionId, Transition};
pub use metrics::{MetricsSnapshot, StoreMetrics};
pub use model::{
    CollectionSnapshot, Entity, OpToken, OperationKind, PendingDeleteTimer, PendingOperation,
    RecordId, RecordState, SnapshotEntry, Submitted, TempId,
};
pub use remote::{MemoryCollection, RemoteCollection};
pub use store::OptimisticCollectionStore;
pub use view::{paginate, visible, FilterSortSpec, Page, PageView, Searchable};
