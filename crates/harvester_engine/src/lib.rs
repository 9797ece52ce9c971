//! Harvester engine: feed parsing, fetching, caches, snapshots and fragments.
mod client;
mod engine;
mod export;
mod feed;
mod fetch;
mod filename;
mod fragment;
mod graph;
mod handlers;
mod ledger;
mod persist;
mod query;
mod rate_limit;
mod scope;
mod sparql;
mod store;
mod token;
mod translate;
mod types;
mod validated_url;
mod xml;

pub use client::{ClientSettings, FeedClient, QueryStats};
pub use engine::{PoolStats, QueryPool};
pub use export::{manifest_file_name, update_file_name, write_manifest, write_updates, ExportError};
pub use feed::{
    cached_entry_location, cached_relationship_location, entry_location, feed_location,
    pagination_location, EntryExtractor, FeedEntry, PaginationCursor, PaginationExtractor,
    RelationshipLinkExtractor, API_NS, ATOM_NS,
};
pub use fetch::{BodyStream, Credentials, FeedResponse, FetchSettings, Fetcher, ReqwestFetcher};
pub use filename::{FragmentKind, FragmentName, FragmentPattern, FRAGMENT_TIMESTAMP_FORMAT};
pub use fragment::{
    list_fragments, FragmentError, FragmentFormat, FragmentSplitter, DEFAULT_MAX_FRAGMENT_BYTES,
    MIN_FRAGMENT_BYTES,
};
pub use graph::{diff, DiffSummary, GraphError, GraphStore, NTriplesGraph, SNAPSHOT_FILE};
pub use handlers::{
    Extract, Handler, ItemCounter, ItemExtractor, ItemSink, LatestItem, ScopeHandler,
    ScopeObserver, WrappedHandler,
};
pub use ledger::{LedgerError, StateManager, STATE_FAILURE_MESSAGE};
pub use persist::{ensure_dir, AtomicFileWriter, PersistError};
pub use query::{
    FeedQuery, GeneralUrlBuilder, QueryOptions, UrlBuilder, MAX_FULL_DETAIL_PER_PAGE,
    MAX_IDS_PER_REQUEST, MAX_REF_DETAIL_PER_PAGE,
};
pub use rate_limit::RateLimiter;
pub use scope::{DocumentLocation, FilterBinding, ScopeError, ScopedEvent, ScopedEventProcessor};
pub use sparql::{fragment_update, update_for};
pub use store::{RawItemStore, ReprocessStats, StoreError};
pub use token::{QName, StartTag, Token, TokenSource};
pub use translate::{
    CommandTranslator, TranslateError, TranslateStats, TranslatedOutput, TranslationQueue,
    TranslationService, Translator,
};
pub use types::{FailureKind, FetchError, HarvestError};
pub use validated_url::{UrlError, ValidatedUrl};
pub use xml::XmlTokenSource;
