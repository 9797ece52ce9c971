use chrono::{DateTime, Utc};
use harvester_core::{ObjectCategory, LEDGER_DATE_FORMAT};

use crate::validated_url::{UrlError, ValidatedUrl};

/// Largest page the API serves for full-detail feeds.
pub const MAX_FULL_DETAIL_PER_PAGE: usize = 25;
/// Largest page the API serves for reference-detail feeds.
pub const MAX_REF_DETAIL_PER_PAGE: usize = 1000;
/// Relationship ids named in one `ids=` request.
pub const MAX_IDS_PER_REQUEST: usize = 100;

/// One logical feed query; may expand to several seed URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedQuery {
    Objects {
        category: ObjectCategory,
        full_details: bool,
        modified_since: Option<DateTime<Utc>>,
        deleted: bool,
    },
    Relationships {
        full_details: bool,
        modified_since: Option<DateTime<Utc>>,
        deleted: bool,
    },
    /// Specific relationships, requested by id in batches.
    RelationshipList {
        ids: Vec<u64>,
    },
    Groups,
    RelationshipTypes,
}

impl FeedQuery {
    /// Short name used as the logging label of the worker running the query.
    pub fn label(&self) -> String {
        match self {
            FeedQuery::Objects {
                category, deleted, ..
            } => {
                let prefix = if *deleted { "deleted-" } else { "" };
                format!("{prefix}objects:{category}")
            }
            FeedQuery::Relationships { deleted, .. } => {
                if *deleted {
                    "deleted-relationships".to_string()
                } else {
                    "relationships".to_string()
                }
            }
            FeedQuery::RelationshipList { ids } => format!("relationships:{}-ids", ids.len()),
            FeedQuery::Groups => "groups".to_string(),
            FeedQuery::RelationshipTypes => "relationship-types".to_string(),
        }
    }

    pub fn full_details(&self) -> bool {
        match self {
            FeedQuery::Objects { full_details, .. } | FeedQuery::Relationships { full_details, .. } => {
                *full_details
            }
            FeedQuery::RelationshipList { .. }
            | FeedQuery::Groups
            | FeedQuery::RelationshipTypes => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub per_page: usize,
    pub process_all_pages: bool,
}

impl QueryOptions {
    pub fn for_query(
        query: &FeedQuery,
        full_detail_per_page: usize,
        ref_detail_per_page: usize,
        process_all_pages: bool,
    ) -> Self {
        let per_page = if query.full_details() {
            full_detail_per_page
        } else {
            ref_detail_per_page
        };
        Self {
            per_page,
            process_all_pages,
        }
    }
}

/// Builds the seed URLs of a query for one API version.
pub trait UrlBuilder: Send + Sync {
    fn seed_urls(
        &self,
        endpoint: &ValidatedUrl,
        query: &FeedQuery,
        per_page: usize,
    ) -> Result<Vec<ValidatedUrl>, UrlError>;
}

/// URL layout shared by the current API versions.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneralUrlBuilder;

impl GeneralUrlBuilder {
    fn per_page(requested: usize, full_details: bool) -> String {
        let max = if full_details {
            MAX_FULL_DETAIL_PER_PAGE
        } else {
            MAX_REF_DETAIL_PER_PAGE
        };
        requested.min(max).to_string()
    }

    fn paged<'a>(
        full_details: bool,
        per_page: usize,
        since: Option<(&'a str, DateTime<Utc>)>,
    ) -> Vec<(&'a str, String)> {
        let mut params = Vec::new();
        if full_details {
            params.push(("detail", "full".to_string()));
        }
        if per_page > 0 {
            params.push(("per-page", Self::per_page(per_page, full_details)));
        }
        if let Some((key, date)) = since {
            params.push((key, date.format(LEDGER_DATE_FORMAT).to_string()));
        }
        params
    }
}

fn since_key(deleted: bool) -> &'static str {
    if deleted {
        "deleted-since"
    } else {
        "modified-since"
    }
}

/// `relationships?ids=...` URLs, at most `per_page` ids each.
fn relationship_batches(
    endpoint: &ValidatedUrl,
    ids: &[u64],
    per_page: usize,
) -> Result<Vec<ValidatedUrl>, UrlError> {
    if ids.is_empty() {
        return Err(UrlError::Unsupported("an empty relationship id list".into()));
    }
    let base = endpoint.join("relationships")?;
    let batches = ids
        .chunks(per_page.clamp(1, MAX_IDS_PER_REQUEST))
        .map(|chunk| {
            let ids = chunk.iter().map(u64::to_string).collect::<Vec<_>>().join(",");
            base.with_query_pairs([("per-page", chunk.len().to_string()), ("ids", ids)])
        })
        .collect();
    Ok(batches)
}

impl UrlBuilder for GeneralUrlBuilder {
    fn seed_urls(
        &self,
        endpoint: &ValidatedUrl,
        query: &FeedQuery,
        per_page: usize,
    ) -> Result<Vec<ValidatedUrl>, UrlError> {
        let url = match query {
            FeedQuery::Objects {
                category,
                full_details,
                modified_since,
                deleted,
            } => {
                let path = if *deleted {
                    format!("deleted/{}", category.plural())
                } else {
                    category.plural().to_string()
                };
                let since = modified_since.map(|date| (since_key(*deleted), date));
                endpoint
                    .join(&path)?
                    .with_query_pairs(Self::paged(*full_details, per_page, since))
            }
            FeedQuery::Relationships {
                full_details,
                modified_since,
                deleted,
            } => {
                let path = if *deleted {
                    "relationships/deleted"
                } else {
                    "relationships"
                };
                let since = modified_since.map(|date| (since_key(*deleted), date));
                endpoint
                    .join(path)?
                    .with_query_pairs(Self::paged(*full_details, per_page, since))
            }
            FeedQuery::RelationshipList { ids } => {
                return relationship_batches(endpoint, ids, per_page);
            }
            FeedQuery::Groups => endpoint.join("groups")?,
            FeedQuery::RelationshipTypes => endpoint.join("relationship/types")?,
        };
        Ok(vec![url])
    }
}
