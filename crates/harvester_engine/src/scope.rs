use thiserror::Error;

use crate::handlers::Handler;
use crate::token::{QName, StartTag, Token, TokenSource};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("malformed document: {0}")]
    Malformed(String),
    #[error("stream read failed: {0}")]
    Io(String),
    #[error("closing tag {found} does not match open scope {expected:?}")]
    Structure {
        expected: Option<String>,
        found: String,
    },
    #[error("document ended with {0} open elements")]
    Unbalanced(usize),
    #[error("extractor produced more than {max} items")]
    TooManyItems { max: usize },
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("item sink rejected item: {0}")]
    Sink(String),
}

impl ScopeError {
    /// Errors caused by the byte stream itself; fetching the page again may help.
    pub fn is_stream_failure(&self) -> bool {
        matches!(
            self,
            ScopeError::Malformed(_) | ScopeError::Io(_) | ScopeError::Unbalanced(_)
        )
    }
}

/// Path of qualified element names from the document root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentLocation(Vec<QName>);

impl DocumentLocation {
    pub fn new(path: impl IntoIterator<Item = QName>) -> Self {
        Self(path.into_iter().collect())
    }

    pub fn child(&self, name: QName) -> Self {
        let mut path = self.0.clone();
        path.push(name);
        Self(path)
    }

    pub fn elements(&self) -> &[QName] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

/// One token as seen by a handler.
///
/// `relative` is the path from the handler's own scope element down to the
/// innermost element open at this token, so it is never empty.
#[derive(Debug, Clone, Copy)]
pub struct ScopedEvent<'a> {
    pub token: &'a Token,
    pub next: Option<&'a Token>,
    pub relative: &'a [QName],
}

impl<'a> ScopedEvent<'a> {
    pub fn start(&self) -> Option<&'a StartTag> {
        match self.token {
            Token::Start(tag) => Some(tag),
            _ => None,
        }
    }

    /// Start tag of a direct child of the scope element.
    pub fn child_start(&self) -> Option<&'a StartTag> {
        self.start().filter(|_| self.relative.len() == 2)
    }

    /// Text immediately following a start tag.
    pub fn value(&self) -> Option<&'a str> {
        match (self.token, self.next) {
            (Token::Start(_), Some(Token::Text(text))) => Some(text),
            _ => None,
        }
    }
}

pub struct FilterBinding<'h> {
    pub location: DocumentLocation,
    pub handler: Handler<'h>,
}

impl<'h> FilterBinding<'h> {
    pub fn new(location: DocumentLocation, handler: Handler<'h>) -> Self {
        Self { location, handler }
    }
}

/// Dispatches a token stream to the handlers registered for each document location.
///
/// Only the processor advances the source; handlers get a single token of
/// lookahead through [`ScopedEvent::next`].
#[derive(Default)]
pub struct ScopedEventProcessor<'h> {
    bindings: Vec<FilterBinding<'h>>,
}

impl<'h> ScopedEventProcessor<'h> {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    pub fn with_bindings(bindings: impl IntoIterator<Item = FilterBinding<'h>>) -> Self {
        Self {
            bindings: bindings.into_iter().collect(),
        }
    }

    pub fn register(&mut self, location: DocumentLocation, handler: Handler<'h>) {
        self.bindings.push(FilterBinding::new(location, handler));
    }

    /// Consumes `source` to the end.
    pub fn process<S: TokenSource + ?Sized>(&mut self, source: &mut S) -> Result<(), ScopeError> {
        let mut path: Vec<QName> = Vec::new();
        // (binding index, depth of its scope element), in activation order
        let mut active: Vec<(usize, usize)> = Vec::new();

        let mut current = source.next_token()?;
        while let Some(token) = current {
            let next = source.next_token()?;

            match &token {
                Token::Start(tag) => {
                    path.push(tag.name.clone());
                    let depth = path.len();
                    for (index, binding) in self.bindings.iter_mut().enumerate() {
                        if binding.location.elements() == path.as_slice() {
                            let event = ScopedEvent {
                                token: &token,
                                next: next.as_ref(),
                                relative: &path[depth - 1..],
                            };
                            binding.handler.scope_start(&event)?;
                            active.push((index, depth));
                        }
                    }
                }
                Token::End(name) => {
                    if path.last() != Some(name) {
                        return Err(ScopeError::Structure {
                            expected: path.last().map(ToString::to_string),
                            found: name.to_string(),
                        });
                    }
                }
                Token::Text(_) => {}
            }

            for &(index, depth) in &active {
                let event = ScopedEvent {
                    token: &token,
                    next: next.as_ref(),
                    relative: &path[depth - 1..],
                };
                self.bindings[index].handler.event(&event)?;
            }

            if let Token::End(_) = &token {
                let depth = path.len();
                let mut closing: Vec<usize> = active
                    .iter()
                    .filter(|(_, d)| *d == depth)
                    .map(|(index, _)| *index)
                    .collect();
                closing.sort_unstable();
                active.retain(|(_, d)| *d != depth);
                for index in closing {
                    self.bindings[index].handler.scope_end()?;
                }
                path.pop();
            }

            current = next;
        }

        if path.is_empty() {
            Ok(())
        } else {
            Err(ScopeError::Unbalanced(path.len()))
        }
    }
}
