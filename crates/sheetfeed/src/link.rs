use std::cmp::Ordering;
use std::fmt;

use crate::errors::{SheetError, SheetResult};
use crate::feed::ATOM_NS;
use crate::xml::XmlElement;

/// Typed reference from a feed or entry to a related resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub href: String,
    pub rel: Option<String>,
    pub rev: Option<String>,
    pub title: Option<String>,
    pub media_type: Option<String>,
}

impl Link {
    pub fn new(href: impl Into<String>, rel: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            rel: Some(rel.into()),
            rev: None,
            title: None,
            media_type: None,
        }
    }

    pub fn from_element(element: &XmlElement) -> Option<Self> {
        let href = element.attribute("href")?;
        Some(Self {
            href: href.to_string(),
            rel: element.attribute("rel").map(str::to_string),
            rev: element.attribute("rev").map(str::to_string),
            title: element.attribute("title").map(str::to_string),
            media_type: element.attribute("type").map(str::to_string),
        })
    }

    fn sort_key(&self) -> (&str, Option<&str>, Option<&str>, Option<&str>) {
        (
            self.href.as_str(),
            self.rel.as_deref(),
            self.rev.as_deref(),
            self.media_type.as_deref(),
        )
    }
}

impl Ord for Link {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key()
            .cmp(&other.sort_key())
            .then_with(|| self.title.cmp(&other.title))
    }
}

impl PartialOrd for Link {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.href)
    }
}

/// Links declared on one element. Relations are assumed unique: lookups
/// return the first link carrying the requested `rel`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkSet {
    links: Vec<Link>,
}

impl LinkSet {
    pub fn new(links: impl IntoIterator<Item = Link>) -> Self {
        let mut unique: Vec<Link> = Vec::new();
        for link in links {
            if !unique.contains(&link) {
                unique.push(link);
            }
        }
        Self { links: unique }
    }

    /// Collects the `atom:link` children of `element`. Links without an
    /// `href` are skipped.
    pub fn from_element(element: &XmlElement) -> Self {
        Self::new(
            element
                .children_named(ATOM_NS, "link")
                .filter_map(Link::from_element),
        )
    }

    pub fn by_relation(&self, rel: &str) -> Option<&Link> {
        self.links
            .iter()
            .find(|link| link.rel.as_deref() == Some(rel))
    }

    pub fn require(&self, rel: &str, context: &str) -> SheetResult<&Link> {
        self.by_relation(rel)
            .ok_or_else(|| SheetError::missing_relation(rel, context))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.links.iter()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{EDIT_REL, LIST_FEED_REL};

    fn sample() -> LinkSet {
        let root = XmlElement::parse(&format!(
            r#"<entry xmlns="{ATOM_NS}">
                 <link rel="self" href="https://sheets.test/ws/1" type="application/atom+xml"/>
                 <link rel="{LIST_FEED_REL}" href="https://sheets.test/list/1" title="rows"/>
                 <link rel="{LIST_FEED_REL}" href="https://sheets.test/list/other"/>
                 <link rel="alternate"/>
               </entry>"#
        ))
        .expect("entry should parse");
        LinkSet::from_element(&root)
    }

    #[test]
    fn from_element_keeps_declared_attributes() {
        let links = sample();
        assert_eq!(links.len(), 3);
        let own = links.by_relation("self").expect("self link");
        assert_eq!(own.href, "https://sheets.test/ws/1");
        assert_eq!(own.media_type.as_deref(), Some("application/atom+xml"));
        let list = links.by_relation(LIST_FEED_REL).expect("list link");
        assert_eq!(list.title.as_deref(), Some("rows"));
    }

    #[test]
    fn by_relation_returns_first_match() {
        let links = sample();
        assert_eq!(
            links.by_relation(LIST_FEED_REL).map(|l| l.href.as_str()),
            Some("https://sheets.test/list/1")
        );
    }

    #[test]
    fn require_missing_relation_is_error() {
        let error = sample()
            .require(EDIT_REL, "worksheet 'crew'")
            .expect_err("edit link should be absent");
        assert!(matches!(error, SheetError::MissingRelation { .. }));
    }

    #[test]
    fn duplicates_collapse_and_ordering_uses_href_first() {
        let a = Link::new("https://a", "self");
        let b = Link::new("https://b", "edit");
        let links = LinkSet::new([b.clone(), a.clone(), b.clone()]);
        assert_eq!(links.len(), 2);

        let mut sorted: Vec<Link> = links.iter().cloned().collect();
        sorted.sort();
        assert_eq!(sorted, vec![a, b]);
    }
}
