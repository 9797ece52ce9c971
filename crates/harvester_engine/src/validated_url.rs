use std::fmt;

use thiserror::Error;
use url::Url;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UrlError {
    #[error("`{url}` is not a valid url: {reason}")]
    Invalid { url: String, reason: String },
    #[error("`{0}` does not use http or https")]
    Scheme(String),
    #[error("`{0}` has no host")]
    NoHost(String),
    #[error("cannot build a feed url for {0}")]
    Unsupported(String),
}

/// An absolute http(s) URL with a host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedUrl(Url);

impl ValidatedUrl {
    pub fn parse(raw: &str) -> Result<Self, UrlError> {
        let url = Url::parse(raw.trim()).map_err(|err| UrlError::Invalid {
            url: raw.to_string(),
            reason: err.to_string(),
        })?;
        Self::from_url(url)
    }

    fn from_url(url: Url) -> Result<Self, UrlError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(UrlError::Scheme(url.to_string()));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(UrlError::NoHost(url.to_string()));
        }
        Ok(Self(url))
    }

    /// Credentials may only travel over a secure scheme.
    pub fn is_secure(&self) -> bool {
        self.0.scheme() == "https"
    }

    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }

    /// Host plus port, used to compare consecutive pages.
    pub fn authority(&self) -> String {
        match self.0.port_or_known_default() {
            Some(port) => format!("{}:{port}", self.host()),
            None => self.host().to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    /// Keeps path and query, takes scheme, host and port from `base`.
    pub fn rebased_on(&self, base: &ValidatedUrl) -> Result<Self, UrlError> {
        let mut url = self.0.clone();
        let invalid = |reason: &str| UrlError::Invalid {
            url: self.0.to_string(),
            reason: reason.to_string(),
        };
        url.set_scheme(base.0.scheme())
            .map_err(|_| invalid("scheme cannot be replaced"))?;
        url.set_host(base.0.host_str())
            .map_err(|err| invalid(&err.to_string()))?;
        url.set_port(base.0.port())
            .map_err(|_| invalid("port cannot be replaced"))?;
        Self::from_url(url)
    }

    /// Resolves `path` against this URL, which should end with `/`.
    pub fn join(&self, path: &str) -> Result<Self, UrlError> {
        let url = self.0.join(path).map_err(|err| UrlError::Invalid {
            url: format!("{}{path}", self.0),
            reason: err.to_string(),
        })?;
        Self::from_url(url)
    }

    pub fn with_query_pairs<'a>(
        &self,
        pairs: impl IntoIterator<Item = (&'a str, String)>,
    ) -> Self {
        let mut url = self.0.clone();
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in pairs {
                query.append_pair(key, &value);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Self(url)
    }
}

impl fmt::Display for ValidatedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}
