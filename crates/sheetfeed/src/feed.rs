//! Parsed feed structures: entries, entry lists and documents.

use std::collections::BTreeMap;

use regex::Regex;

use crate::errors::{SheetError, SheetResult};
use crate::link::LinkSet;
use crate::xml::XmlElement;

pub const ATOM_MEDIA_TYPE: &str = "application/atom+xml";
/// Value of the `If-Match` header sent with every overwrite.
pub const OVERWRITE_ANY: &str = "*";

pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
pub const GS_NS: &str = "http://schemas.google.com/spreadsheets/2006";
pub const GD_NS: &str = "http://schemas.google.com/g/2005";
pub const GSX_NS: &str = "http://schemas.google.com/spreadsheets/2006/extended";

pub const LIST_FEED_REL: &str = "http://schemas.google.com/spreadsheets/2006#listfeed";
pub const WORKSHEETS_FEED_REL: &str = "http://schemas.google.com/spreadsheets/2006#worksheetsfeed";
pub const CELLS_FEED_REL: &str = "http://schemas.google.com/spreadsheets/2006#cellsfeed";
pub const POST_REL: &str = "http://schemas.google.com/g/2005#post";
pub const SELF_REL: &str = "self";
pub const EDIT_REL: &str = "edit";

/// One worksheet or one row, depending on the feed it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub title: String,
    pub links: LinkSet,
    /// `gsx:` children in document order, as (local name, text).
    pub cells: Vec<(String, String)>,
}

impl Entry {
    pub fn url(&self) -> SheetResult<&str> {
        self.links
            .require(SELF_REL, &format!("entry '{}'", self.title))
            .map(|link| link.href.as_str())
    }

    pub fn cell(&self, field: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }
}

impl std::fmt::Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.links.by_relation(SELF_REL) {
            Some(link) => write!(f, "<{}> {}", self.title, link.href),
            None => write!(f, "<{}>", self.title),
        }
    }
}

/// Matches entry titles, either literally or by regular expression.
#[derive(Clone, Debug)]
pub enum TitlePattern {
    Exact(String),
    Regex(Regex),
}

impl TitlePattern {
    pub fn matches(&self, title: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == title,
            Self::Regex(regex) => regex.is_match(title),
        }
    }
}

impl From<&str> for TitlePattern {
    fn from(title: &str) -> Self {
        Self::Exact(title.to_string())
    }
}

impl From<String> for TitlePattern {
    fn from(title: String) -> Self {
        Self::Exact(title)
    }
}

impl From<Regex> for TitlePattern {
    fn from(regex: Regex) -> Self {
        Self::Regex(regex)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryList {
    entries: Vec<Entry>,
}

impl EntryList {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    pub fn find(&self, pattern: &TitlePattern) -> Option<&Entry> {
        self.entries.iter().find(|entry| pattern.matches(&entry.title))
    }

    pub fn select<'a>(&'a self, pattern: &'a TitlePattern) -> impl Iterator<Item = &'a Entry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| pattern.matches(&entry.title))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a EntryList {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// A parsed Atom response. `links` and `entries` start empty and are filled
/// by the pipeline stages that follow parsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    pub raw: XmlElement,
    pub links: LinkSet,
    pub entries: EntryList,
}

impl Document {
    pub fn new(raw: XmlElement) -> Self {
        Self {
            raw,
            links: LinkSet::default(),
            entries: EntryList::default(),
        }
    }

    pub fn parse(source: &str) -> SheetResult<Self> {
        XmlElement::parse(source).map(Self::new)
    }

    pub fn title(&self) -> Option<&str> {
        self.raw.child(ATOM_NS, "title").map(|title| title.text.as_str())
    }

    /// Root-level `atom:entry` elements in document order.
    pub fn entry_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.raw.children_named(ATOM_NS, "entry")
    }

    pub fn describe(&self) -> String {
        match self.title() {
            Some(title) => format!("{} '{}'", self.raw.name, title),
            None => self.raw.name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body {
    Feed(Document),
    Raw(Vec<u8>),
}

/// Result of one HTTP call after the response pipeline ran.
#[derive(Clone, Debug)]
pub struct FeedResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Body,
}

impl FeedResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    pub fn document(&self) -> SheetResult<&Document> {
        match &self.body {
            Body::Feed(document) => Ok(document),
            Body::Raw(_) => Err(self.not_a_feed()),
        }
    }

    pub fn into_document(self) -> SheetResult<Document> {
        match self.body {
            Body::Feed(document) => Ok(document),
            Body::Raw(_) => Err(self.not_a_feed()),
        }
    }

    fn not_a_feed(&self) -> SheetError {
        SheetError::Parse(format!(
            "expected {ATOM_MEDIA_TYPE} response, got content type '{}'",
            self.content_type().unwrap_or("<none>")
        ))
    }
}
