use std::fmt;

use crate::ScopeError;

/// Namespace-qualified element name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub namespace: Option<String>,
    pub local: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            local: local.into(),
        }
    }

    pub fn unqualified(local: impl Into<String>) -> Self {
        Self {
            namespace: None,
            local: local.into(),
        }
    }

    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.local == local && self.namespace.as_deref() == Some(namespace)
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{ns}}}{}", self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// Opening tag. Attributes are keyed by local name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTag {
    pub name: QName,
    pub attributes: Vec<(String, String)>,
}

impl StartTag {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn attribute(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == local)
            .map(|(_, value)| value.as_str())
    }

    pub fn required_attribute(&self, local: &str) -> Result<&str, ScopeError> {
        self.attribute(local).ok_or_else(|| {
            ScopeError::Extraction(format!("<{}> has no `{local}` attribute", self.name))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Start(StartTag),
    Text(String),
    End(QName),
}

/// Forward-only producer of tokens; `Ok(None)` marks the end of the document.
pub trait TokenSource {
    fn next_token(&mut self) -> Result<Option<Token>, ScopeError>;
}

impl TokenSource for std::vec::IntoIter<Token> {
    fn next_token(&mut self) -> Result<Option<Token>, ScopeError> {
        Ok(self.next())
    }
}
