use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::task::JoinSet;

use engine_logging::{clear_query_label, engine_error, set_query_label};

use crate::client::{FeedClient, QueryStats};
use crate::feed::{entry_location, EntryExtractor, FeedEntry};
use crate::handlers::{Handler, ItemExtractor, ItemSink};
use crate::query::{FeedQuery, QueryOptions};
use crate::scope::FilterBinding;
use crate::HarvestError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub queries: usize,
    pub pages: usize,
    pub entries: usize,
}

/// Runs independent feed queries on a bounded number of concurrent workers.
#[derive(Debug, Clone)]
pub struct QueryPool {
    max_workers: usize,
}

impl QueryPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    /// Dispatches queries in order, at most `max_workers` at a time.
    ///
    /// The first failure cancels the queries still running and nothing
    /// further is dispatched.
    pub async fn run<F, S>(
        &self,
        client: Arc<FeedClient>,
        queries: Vec<(FeedQuery, QueryOptions)>,
        sink_factory: F,
    ) -> Result<PoolStats, HarvestError>
    where
        F: Fn(&FeedQuery) -> S,
        S: ItemSink<FeedEntry> + Send + 'static,
    {
        let mut queued = queries.into_iter();
        let mut running = JoinSet::new();
        let mut stats = PoolStats::default();

        loop {
            while running.len() < self.max_workers {
                let Some((query, options)) = queued.next() else {
                    break;
                };
                let sink = sink_factory(&query);
                let client = Arc::clone(&client);
                let label = query.label();
                let work = async move {
                    let filters = vec![FilterBinding::new(
                        entry_location(),
                        Handler::extracting(ItemExtractor::new(EntryExtractor::default(), sink)),
                    )];
                    client.execute_query(&query, options, filters).await
                };
                running.spawn(Labelled::new(label, work));
            }

            let Some(joined) = running.join_next().await else {
                return Ok(stats);
            };
            let outcome = joined.unwrap_or_else(|err| {
                Err(HarvestError::ProtocolInvariant(format!(
                    "query worker stopped: {err}"
                )))
            });
            match outcome {
                Ok(QueryStats { pages, entries }) => {
                    stats.queries += 1;
                    stats.pages += pages;
                    stats.entries += entries;
                }
                Err(err) => {
                    engine_error!(
                        "query failed: {err}; cancelling {} running and {} queued queries",
                        running.len(),
                        queued.len()
                    );
                    running.shutdown().await;
                    return Err(err);
                }
            }
        }
    }
}

/// Sets the logging label of the current thread for the duration of every poll.
struct Labelled<T> {
    label: String,
    inner: Pin<Box<dyn Future<Output = T> + Send>>,
}

impl<T> Labelled<T> {
    fn new(label: String, inner: impl Future<Output = T> + Send + 'static) -> Self {
        Self {
            label,
            inner: Box::pin(inner),
        }
    }
}

impl<T> Future for Labelled<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        set_query_label(this.label.clone());
        let poll = this.inner.as_mut().poll(cx);
        clear_query_label();
        poll
    }
}
