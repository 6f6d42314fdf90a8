pub mod fetch;
pub mod handlers;
pub mod ingest;
pub mod persist;
pub mod query;
pub mod ranking;
pub mod store;

pub use fetch::{FetchError, Fetcher};
pub use handlers::{AppState, NextbusUrls, router};
pub use ingest::{InboundMessage, Ingestor, Outcome, UserRegistry, UserResolver};
pub use persist::{PersistError, PersistentStore, Record};
pub use query::{WordStatsQuery, WordStatsReport, run_query};
pub use store::{SharedStore, StoreError, WordStatsDb};
pub use wordstats_types::{ChannelName, UserId, Word, identical, tokenize};
