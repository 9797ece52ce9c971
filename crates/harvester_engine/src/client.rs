use std::collections::{HashSet, VecDeque};
use std::io::BufReader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::io::{StreamReader, SyncIoBridge};

use engine_logging::{engine_debug, engine_info, engine_warn};

use crate::feed::{entry_location, pagination_location, PaginationCursor, PaginationExtractor};
use crate::fetch::{Credentials, Fetcher};
use crate::handlers::{Handler, ItemCounter, ItemExtractor, LatestItem, ScopeObserver};
use crate::query::{FeedQuery, QueryOptions, UrlBuilder};
use crate::rate_limit::RateLimiter;
use crate::scope::{FilterBinding, ScopeError, ScopedEvent, ScopedEventProcessor};
use crate::validated_url::ValidatedUrl;
use crate::xml::XmlTokenSource;
use crate::{FailureKind, FetchError, HarvestError};

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub endpoint: ValidatedUrl,
    pub credentials: Option<Credentials>,
    pub rewrite_mismatched_urls: bool,
    /// Attempts per page, including the first.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl ClientSettings {
    pub fn new(endpoint: ValidatedUrl) -> Self {
        Self {
            endpoint,
            credentials: None,
            rewrite_mismatched_urls: false,
            max_retries: 5,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub pages: usize,
    pub entries: usize,
}

enum PageError {
    Fetch(FetchError),
    Parse(ScopeError),
}

/// Runs paginated feed queries and streams every page through a scoped processor.
pub struct FeedClient {
    settings: ClientSettings,
    fetcher: Arc<dyn Fetcher>,
    url_builder: Arc<dyn UrlBuilder>,
    rate_limiter: Arc<RateLimiter>,
    host_mismatch_reported: AtomicBool,
}

impl FeedClient {
    pub fn new(
        settings: ClientSettings,
        fetcher: Arc<dyn Fetcher>,
        url_builder: Arc<dyn UrlBuilder>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            settings,
            fetcher,
            url_builder,
            rate_limiter,
            host_mismatch_reported: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Fetches every page of `query`, feeding each through `filters`.
    ///
    /// Items reach the filters' sinks while the page is being parsed. A page
    /// URL seen earlier in the same query aborts with a protocol error.
    pub async fn execute_query<'h>(
        &self,
        query: &FeedQuery,
        options: QueryOptions,
        filters: Vec<FilterBinding<'h>>,
    ) -> Result<QueryStats, HarvestError> {
        let mut seeds: VecDeque<ValidatedUrl> = self
            .url_builder
            .seed_urls(&self.settings.endpoint, query, options.per_page)?
            .into();

        let cursor = LatestItem::<PaginationCursor>::default();
        let counter = ItemCounter::default();
        let mut processor = ScopedEventProcessor::with_bindings(filters);
        processor.register(
            pagination_location(),
            Handler::extracting(ItemExtractor::new(
                PaginationExtractor::default(),
                cursor.clone(),
            )),
        );
        processor.register(
            entry_location(),
            Handler::wrapping(
                Handler::Counting(counter.clone()),
                ProgressLog::default(),
            ),
        );

        let mut visited: HashSet<ValidatedUrl> = HashSet::new();
        let mut previous: Option<ValidatedUrl> = None;
        let mut next_page: Option<ValidatedUrl> = None;
        let mut stats = QueryStats::default();

        loop {
            let Some(url) = next_page.take().or_else(|| seeds.pop_front()) else {
                break;
            };
            let url = self.reconcile_host(previous.as_ref(), url)?;
            if !visited.insert(url.clone()) {
                return Err(HarvestError::ProtocolInvariant(format!(
                    "feed returned {url} again; the server-side cursor is broken"
                )));
            }

            self.fetch_page(&url, &mut processor, &counter, &cursor)
                .await?;
            stats.pages += 1;
            stats.entries += counter.take();

            let next = cursor.take().and_then(|page| page.next_url);
            if options.process_all_pages {
                if let Some(href) = next {
                    next_page = Some(resolve_href(&url, &href)?);
                }
            }
            previous = Some(url);
        }

        engine_info!(
            "{} entries from {} pages for {}",
            stats.entries,
            stats.pages,
            query.label()
        );
        Ok(stats)
    }

    fn reconcile_host(
        &self,
        previous: Option<&ValidatedUrl>,
        url: ValidatedUrl,
    ) -> Result<ValidatedUrl, HarvestError> {
        let Some(previous) = previous else {
            return Ok(url);
        };
        if previous.authority() == url.authority() {
            return Ok(url);
        }
        if !self.host_mismatch_reported.swap(true, Ordering::Relaxed) {
            engine_warn!(
                "feed moved from host {} to {}; check the server's base url configuration{}",
                previous.authority(),
                url.authority(),
                if self.settings.rewrite_mismatched_urls {
                    " (rewriting to the configured endpoint)"
                } else {
                    ""
                }
            );
        }
        if self.settings.rewrite_mismatched_urls {
            Ok(url.rebased_on(&self.settings.endpoint)?)
        } else {
            Ok(url)
        }
    }

    async fn fetch_page(
        &self,
        url: &ValidatedUrl,
        processor: &mut ScopedEventProcessor<'_>,
        counter: &ItemCounter,
        cursor: &LatestItem<PaginationCursor>,
    ) -> Result<(), HarvestError> {
        let max_attempts = self.settings.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            counter.take();
            cursor.take();

            let failure = match self.try_page(url, processor).await {
                Ok(()) => return Ok(()),
                Err(PageError::Fetch(err)) => match err.kind {
                    FailureKind::Unauthorized(status) => {
                        return Err(HarvestError::Auth {
                            url: url.to_string(),
                            status,
                        });
                    }
                    ref kind if !kind.is_retryable() => {
                        return Err(HarvestError::Transport {
                            url: url.to_string(),
                            attempts: attempt,
                            message: err.to_string(),
                        });
                    }
                    _ => err.to_string(),
                },
                Err(PageError::Parse(err)) if err.is_stream_failure() => err.to_string(),
                Err(PageError::Parse(err)) => return Err(err.into()),
            };

            if attempt >= max_attempts {
                return Err(HarvestError::Transport {
                    url: url.to_string(),
                    attempts: attempt,
                    message: failure,
                });
            }
            engine_warn!(
                "attempt {attempt} of {max_attempts} for {url} failed: {failure}; retrying in {:?}",
                self.settings.retry_delay
            );
            tokio::time::sleep(self.settings.retry_delay).await;
        }
    }

    async fn try_page(
        &self,
        url: &ValidatedUrl,
        processor: &mut ScopedEventProcessor<'_>,
    ) -> Result<(), PageError> {
        self.rate_limiter.acquire().await;
        let response = self
            .fetcher
            .get(url, self.settings.credentials.as_ref())
            .await
            .map_err(PageError::Fetch)?;

        tokio::task::block_in_place(move || {
            let reader = BufReader::new(SyncIoBridge::new(StreamReader::new(response.body)));
            let mut source = XmlTokenSource::new(reader);
            processor.process(&mut source)
        })
        .map_err(PageError::Parse)
    }
}

fn resolve_href(current: &ValidatedUrl, href: &str) -> Result<ValidatedUrl, HarvestError> {
    match ValidatedUrl::parse(href) {
        Ok(url) => Ok(url),
        Err(_) => Ok(current.join(href)?),
    }
}

/// Debug-level heartbeat while long pages are parsed.
#[derive(Debug, Default)]
struct ProgressLog {
    seen: usize,
}

impl ScopeObserver for ProgressLog {
    fn after_start(&mut self, _event: &ScopedEvent<'_>) {
        self.seen += 1;
        if self.seen % 100 == 0 {
            engine_debug!("{} entries parsed", self.seen);
        }
    }
}
