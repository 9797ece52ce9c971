use std::mem;

use harvester_core::{ItemId, ObjectCategory, RelationshipLink};
use quick_xml::escape::escape;

use crate::handlers::Extract;
use crate::scope::{DocumentLocation, ScopeError, ScopedEvent};
use crate::token::{QName, StartTag, Token};

pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
pub const API_NS: &str = "http://www.symplectic.co.uk/publications/api";

pub fn feed_location() -> DocumentLocation {
    DocumentLocation::new([QName::new(ATOM_NS, "feed")])
}

pub fn pagination_location() -> DocumentLocation {
    feed_location().child(QName::new(API_NS, "pagination"))
}

pub fn entry_location() -> DocumentLocation {
    feed_location().child(QName::new(ATOM_NS, "entry"))
}

/// Root of an entry stored on its own in the raw cache.
pub fn cached_entry_location() -> DocumentLocation {
    DocumentLocation::new([QName::new(ATOM_NS, "entry")])
}

/// A relationship stored on its own in the raw cache.
pub fn cached_relationship_location() -> DocumentLocation {
    cached_entry_location().child(QName::new(API_NS, "relationship"))
}

/// Paging links of one feed page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginationCursor {
    pub items_per_page: Option<usize>,
    pub first_url: Option<String>,
    pub last_url: Option<String>,
    pub previous_url: Option<String>,
    pub next_url: Option<String>,
}

#[derive(Debug, Default)]
pub struct PaginationExtractor {
    cursor: PaginationCursor,
}

impl Extract for PaginationExtractor {
    type Item = PaginationCursor;

    fn begin(&mut self, event: &ScopedEvent<'_>) -> Result<(), ScopeError> {
        self.cursor = PaginationCursor::default();
        if let Some(value) = event.start().and_then(|tag| tag.attribute("items-per-page")) {
            let per_page = value.parse().map_err(|_| {
                ScopeError::Extraction(format!("items-per-page `{value}` is not a number"))
            })?;
            self.cursor.items_per_page = Some(per_page);
        }
        Ok(())
    }

    fn event(&mut self, event: &ScopedEvent<'_>) -> Result<(), ScopeError> {
        let Some(tag) = event.child_start() else {
            return Ok(());
        };
        if !tag.name.is(API_NS, "page") {
            return Ok(());
        }
        let (Some(position), Some(href)) = (tag.attribute("position"), tag.attribute("href")) else {
            return Ok(());
        };
        let slot = match position {
            "first" => &mut self.cursor.first_url,
            "last" => &mut self.cursor.last_url,
            "previous" => &mut self.cursor.previous_url,
            "next" => &mut self.cursor.next_url,
            _ => return Ok(()),
        };
        *slot = Some(href.to_string());
        Ok(())
    }

    fn finish(&mut self) -> Result<PaginationCursor, ScopeError> {
        Ok(mem::take(&mut self.cursor))
    }
}

/// One feed entry, with its subtree kept as XML text for the raw cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub id: ItemId,
    pub deleted: bool,
    pub xml: String,
}

#[derive(Debug, Default)]
pub struct EntryExtractor {
    id: Option<ItemId>,
    deleted: bool,
    identified: bool,
    writer: SubtreeWriter,
}

impl Extract for EntryExtractor {
    type Item = FeedEntry;

    fn begin(&mut self, _event: &ScopedEvent<'_>) -> Result<(), ScopeError> {
        *self = Self::default();
        Ok(())
    }

    fn event(&mut self, event: &ScopedEvent<'_>) -> Result<(), ScopeError> {
        self.writer.write(event.token);
        if self.identified {
            return Ok(());
        }
        if let Some(tag) = event.child_start() {
            if tag.name.namespace.as_deref() == Some(API_NS) {
                self.identified = true;
                if let Some((id, deleted)) = identify(tag)? {
                    self.id = Some(id);
                    self.deleted = deleted;
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<FeedEntry, ScopeError> {
        let id = self
            .id
            .take()
            .ok_or_else(|| ScopeError::Extraction("entry does not describe a known item".into()))?;
        Ok(FeedEntry {
            id,
            deleted: self.deleted,
            xml: self.writer.finish(),
        })
    }
}

/// Reads the type and the linked objects of a relationship.
///
/// Objects of a category this harvester does not know are left out, so a
/// link may name fewer than two objects.
#[derive(Debug, Default)]
pub struct RelationshipLinkExtractor {
    link: Option<RelationshipLink>,
}

impl Extract for RelationshipLinkExtractor {
    type Item = RelationshipLink;

    fn begin(&mut self, event: &ScopedEvent<'_>) -> Result<(), ScopeError> {
        let tag = event
            .start()
            .ok_or_else(|| ScopeError::Extraction("relationship scope without a start tag".into()))?;
        self.link = Some(RelationshipLink {
            id: ItemId::relationship(numeric_id(tag)?),
            type_name: tag.attribute("type").map(str::to_string),
            objects: Vec::new(),
        });
        Ok(())
    }

    fn event(&mut self, event: &ScopedEvent<'_>) -> Result<(), ScopeError> {
        let (Some(link), Some(tag)) = (self.link.as_mut(), event.start()) else {
            return Ok(());
        };
        if !tag.name.is(API_NS, "object") {
            return Ok(());
        }
        let category = tag.attribute("category").and_then(ObjectCategory::from_name);
        if let (Some(category), Ok(id)) = (category, numeric_id(tag)) {
            link.objects.push(ItemId::object(category, id));
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<RelationshipLink, ScopeError> {
        self.link
            .take()
            .ok_or_else(|| ScopeError::Extraction("relationship ended before it began".into()))
    }
}

fn identify(tag: &StartTag) -> Result<Option<(ItemId, bool)>, ScopeError> {
    let local = tag.name.local.as_str();
    let deleted = local.starts_with("deleted-");
    let id = match local {
        "object" | "deleted-object" => {
            let name = tag.required_attribute("category")?;
            let category = ObjectCategory::from_name(name)
                .ok_or_else(|| ScopeError::Extraction(format!("unknown object category `{name}`")))?;
            ItemId::object(category, numeric_id(tag)?)
        }
        "relationship" | "deleted-relationship" => ItemId::relationship(numeric_id(tag)?),
        "user-group" => ItemId::group(numeric_id(tag)?),
        "relationship-type" => ItemId::relationship_type(numeric_id(tag)?),
        _ => return Ok(None),
    };
    Ok(Some((id, deleted)))
}

fn numeric_id(tag: &StartTag) -> Result<u64, ScopeError> {
    let raw = tag.required_attribute("id")?;
    raw.parse()
        .map_err(|_| ScopeError::Extraction(format!("<{}> id `{raw}` is not numeric", tag.name)))
}

/// Re-serialises a token subtree, declaring default namespaces where they change.
#[derive(Debug, Default)]
struct SubtreeWriter {
    out: String,
    namespaces: Vec<Option<String>>,
}

impl SubtreeWriter {
    fn write(&mut self, token: &Token) {
        match token {
            Token::Start(tag) => {
                let inherited = self.namespaces.last().cloned().flatten();
                self.out.push('<');
                self.out.push_str(&tag.name.local);
                if tag.name.namespace != inherited {
                    let ns = tag.name.namespace.as_deref().unwrap_or_default();
                    self.out.push_str(" xmlns=\"");
                    self.out.push_str(&escape(ns));
                    self.out.push('"');
                }
                for (name, value) in &tag.attributes {
                    self.out.push(' ');
                    self.out.push_str(name);
                    self.out.push_str("=\"");
                    self.out.push_str(&escape(value.as_str()));
                    self.out.push('"');
                }
                self.out.push('>');
                self.namespaces.push(tag.name.namespace.clone());
            }
            Token::Text(text) => self.out.push_str(&escape(text.as_str())),
            Token::End(name) => {
                self.out.push_str("</");
                self.out.push_str(&name.local);
                self.out.push('>');
                self.namespaces.pop();
            }
        }
    }

    fn finish(&mut self) -> String {
        self.namespaces.clear();
        mem::take(&mut self.out)
    }
}
