use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::scope::{ScopeError, ScopedEvent};

/// Callbacks a handler receives for each scope instance at its location.
pub trait ScopeHandler {
    fn scope_start(&mut self, event: &ScopedEvent<'_>) -> Result<(), ScopeError>;
    fn event(&mut self, event: &ScopedEvent<'_>) -> Result<(), ScopeError>;
    fn scope_end(&mut self) -> Result<(), ScopeError>;
}

/// Closed set of handlers a [`crate::ScopedEventProcessor`] dispatches to.
pub enum Handler<'h> {
    Counting(ItemCounter),
    Extracting(Box<dyn ScopeHandler + Send + 'h>),
    Wrapping(WrappedHandler<'h>),
}

impl<'h> Handler<'h> {
    pub fn extracting<E, S>(extractor: ItemExtractor<E, S>) -> Self
    where
        E: Extract + Send + 'h,
        S: ItemSink<E::Item> + Send + 'h,
    {
        Handler::Extracting(Box::new(extractor))
    }

    pub fn wrapping(inner: Handler<'h>, observer: impl ScopeObserver + Send + 'h) -> Self {
        Handler::Wrapping(WrappedHandler {
            inner: Box::new(inner),
            observer: Box::new(observer),
        })
    }

    pub(crate) fn scope_start(&mut self, event: &ScopedEvent<'_>) -> Result<(), ScopeError> {
        match self {
            Handler::Counting(counter) => {
                counter.increment();
                Ok(())
            }
            Handler::Extracting(handler) => handler.scope_start(event),
            Handler::Wrapping(wrapped) => {
                wrapped.observer.before_start(event);
                wrapped.inner.scope_start(event)?;
                wrapped.observer.after_start(event);
                Ok(())
            }
        }
    }

    pub(crate) fn event(&mut self, event: &ScopedEvent<'_>) -> Result<(), ScopeError> {
        match self {
            Handler::Counting(_) => Ok(()),
            Handler::Extracting(handler) => handler.event(event),
            Handler::Wrapping(wrapped) => {
                wrapped.observer.before_event(event);
                wrapped.inner.event(event)?;
                wrapped.observer.after_event(event);
                Ok(())
            }
        }
    }

    pub(crate) fn scope_end(&mut self) -> Result<(), ScopeError> {
        match self {
            Handler::Counting(_) => Ok(()),
            Handler::Extracting(handler) => handler.scope_end(),
            Handler::Wrapping(wrapped) => {
                wrapped.observer.before_end();
                wrapped.inner.scope_end()?;
                wrapped.observer.after_end();
                Ok(())
            }
        }
    }
}

/// Counts scope instances. Clones share the same count.
#[derive(Debug, Clone, Default)]
pub struct ItemCounter(Arc<AtomicUsize>);

impl ItemCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns the count so far and starts again from zero.
    pub fn take(&self) -> usize {
        self.0.swap(0, Ordering::Relaxed)
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Hooks run around every callback of the wrapped handler.
pub trait ScopeObserver {
    fn before_start(&mut self, _event: &ScopedEvent<'_>) {}
    fn after_start(&mut self, _event: &ScopedEvent<'_>) {}
    fn before_event(&mut self, _event: &ScopedEvent<'_>) {}
    fn after_event(&mut self, _event: &ScopedEvent<'_>) {}
    fn before_end(&mut self) {}
    fn after_end(&mut self) {}
}

pub struct WrappedHandler<'h> {
    inner: Box<Handler<'h>>,
    observer: Box<dyn ScopeObserver + Send + 'h>,
}

/// Builds one item out of the tokens of a single scope instance.
pub trait Extract {
    type Item;

    /// Called on the scope's opening tag; must discard any earlier state.
    fn begin(&mut self, event: &ScopedEvent<'_>) -> Result<(), ScopeError>;
    fn event(&mut self, event: &ScopedEvent<'_>) -> Result<(), ScopeError>;
    /// Hands over a freshly built item.
    fn finish(&mut self) -> Result<Self::Item, ScopeError>;
}

/// Destination for extracted items.
pub trait ItemSink<T> {
    fn accept(&mut self, item: T) -> Result<(), ScopeError>;
}

impl<T> ItemSink<T> for Vec<T> {
    fn accept(&mut self, item: T) -> Result<(), ScopeError> {
        self.push(item);
        Ok(())
    }
}

impl<T, S: ItemSink<T> + ?Sized> ItemSink<T> for &mut S {
    fn accept(&mut self, item: T) -> Result<(), ScopeError> {
        (**self).accept(item)
    }
}

/// Keeps only the most recent item; used for per-page metadata.
#[derive(Debug)]
pub struct LatestItem<T>(Arc<Mutex<Option<T>>>);

impl<T> Clone for LatestItem<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Default for LatestItem<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }
}

impl<T> LatestItem<T> {
    pub fn take(&self) -> Option<T> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl<T> ItemSink<T> for LatestItem<T> {
    fn accept(&mut self, item: T) -> Result<(), ScopeError> {
        let mut slot = self
            .0
            .lock()
            .map_err(|_| ScopeError::Sink("item slot poisoned".into()))?;
        *slot = Some(item);
        Ok(())
    }
}

/// Feeds scope callbacks to an [`Extract`] and pushes each finished item into a sink.
pub struct ItemExtractor<E, S> {
    extractor: E,
    sink: S,
    max_items: Option<usize>,
    extracted: usize,
}

impl<E, S> ItemExtractor<E, S>
where
    E: Extract,
    S: ItemSink<E::Item>,
{
    pub fn new(extractor: E, sink: S) -> Self {
        Self {
            extractor,
            sink,
            max_items: None,
            extracted: 0,
        }
    }

    pub fn with_max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }

    pub fn extracted(&self) -> usize {
        self.extracted
    }
}

impl<E, S> ScopeHandler for ItemExtractor<E, S>
where
    E: Extract,
    S: ItemSink<E::Item>,
{
    fn scope_start(&mut self, event: &ScopedEvent<'_>) -> Result<(), ScopeError> {
        self.extractor.begin(event)
    }

    fn event(&mut self, event: &ScopedEvent<'_>) -> Result<(), ScopeError> {
        self.extractor.event(event)
    }

    fn scope_end(&mut self) -> Result<(), ScopeError> {
        if let Some(max) = self.max_items {
            if self.extracted >= max {
                return Err(ScopeError::TooManyItems { max });
            }
        }
        let item = self.extractor.finish()?;
        self.sink.accept(item)?;
        self.extracted += 1;
        Ok(())
    }
}
