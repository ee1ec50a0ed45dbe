//! Response pipeline.
//!
//! Every HTTP exchange passes through a fixed sequence of stages sharing one
//! [`CallContext`]. Authorization is added to the outgoing request; the
//! response stages then run in order, each behind a guard.

use std::collections::BTreeMap;

use crate::config::AuthScheme;
use crate::errors::{SheetError, SheetResult};
use crate::feed::{
    ATOM_MEDIA_TYPE, ATOM_NS, Body, Document, Entry, EntryList, FeedResponse, GSX_NS,
};
use crate::link::LinkSet;
use crate::transport::{HttpRequest, HttpResponse};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    RaiseError,
    ParseAtom,
    ExtractLinks,
    ExtractEntries,
}

pub const RESPONSE_STAGES: [Stage; 4] = [
    Stage::RaiseError,
    Stage::ParseAtom,
    Stage::ExtractLinks,
    Stage::ExtractEntries,
];

/// Per-call state shared by the stages.
#[derive(Clone, Debug)]
pub struct CallContext {
    pub request: HttpRequest,
    pub status: u16,
    pub response_headers: BTreeMap<String, String>,
    pub body: Body,
    pub derived_links: Option<LinkSet>,
    pub derived_entry_links: Vec<LinkSet>,
    pub derived_entries: Option<EntryList>,
}

impl CallContext {
    pub fn new(request: HttpRequest, response: HttpResponse) -> Self {
        Self {
            request,
            status: response.status,
            response_headers: response.headers,
            body: Body::Raw(response.body),
            derived_links: None,
            derived_entry_links: Vec::new(),
            derived_entries: None,
        }
    }

    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn content_type(&self) -> &str {
        self.response_headers
            .get("content-type")
            .map(String::as_str)
            .unwrap_or_default()
    }

    fn document_mut(&mut self) -> Option<&mut Document> {
        match &mut self.body {
            Body::Feed(document) => Some(document),
            Body::Raw(_) => None,
        }
    }
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Self::RaiseError => "raise_error",
            Self::ParseAtom => "parse_atom",
            Self::ExtractLinks => "extract_links",
            Self::ExtractEntries => "extract_entries",
        }
    }

    pub fn applies(self, ctx: &CallContext) -> bool {
        match self {
            Self::RaiseError => true,
            Self::ParseAtom => {
                matches!(ctx.body, Body::Raw(_)) && ctx.content_type().starts_with(ATOM_MEDIA_TYPE)
            }
            Self::ExtractLinks | Self::ExtractEntries => matches!(ctx.body, Body::Feed(_)),
        }
    }

    pub fn apply(self, ctx: &mut CallContext) -> SheetResult<()> {
        match self {
            Self::RaiseError => raise_error(ctx),
            Self::ParseAtom => parse_atom(ctx),
            Self::ExtractLinks => extract_links(ctx),
            Self::ExtractEntries => extract_entries(ctx),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResponsePipeline {
    token: String,
    scheme: AuthScheme,
}

impl ResponsePipeline {
    pub fn new(token: impl Into<String>, scheme: AuthScheme) -> Self {
        Self {
            token: token.into(),
            scheme,
        }
    }

    /// Sets `Authorization` from the held token.
    pub fn prepare(&self, request: &mut HttpRequest) {
        request.set_header("Authorization", self.scheme.header_value(&self.token));
    }

    pub fn complete(
        &self,
        request: HttpRequest,
        response: HttpResponse,
    ) -> SheetResult<FeedResponse> {
        let mut ctx = CallContext::new(request, response);
        for stage in RESPONSE_STAGES {
            if !stage.applies(&ctx) {
                continue;
            }
            tracing::debug!(stage = stage.name(), url = %ctx.request.url, "response stage");
            stage.apply(&mut ctx)?;
        }

        Ok(FeedResponse {
            status: ctx.status,
            headers: ctx.response_headers,
            body: ctx.body,
        })
    }
}

fn raise_error(ctx: &mut CallContext) -> SheetResult<()> {
    if ctx.is_success() {
        return Ok(());
    }
    let body = match &ctx.body {
        Body::Raw(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Body::Feed(_) => String::new(),
    };
    tracing::warn!(
        method = ctx.request.method.as_str(),
        url = %ctx.request.url,
        status = ctx.status,
        "request failed"
    );
    Err(SheetError::HttpStatus {
        method: ctx.request.method.as_str(),
        url: ctx.request.url.clone(),
        status: ctx.status,
        body,
    })
}

fn parse_atom(ctx: &mut CallContext) -> SheetResult<()> {
    let Body::Raw(bytes) = &ctx.body else {
        return Ok(());
    };
    let text = std::str::from_utf8(bytes).map_err(|err| {
        SheetError::Parse(format!("{}: response is not utf-8: {err}", ctx.request.url))
    })?;
    let document = Document::parse(text)
        .map_err(|err| SheetError::Parse(format!("{}: {err}", ctx.request.url)))?;
    ctx.body = Body::Feed(document);
    Ok(())
}

fn extract_links(ctx: &mut CallContext) -> SheetResult<()> {
    let Some(document) = ctx.document_mut() else {
        return Ok(());
    };
    let links = LinkSet::from_element(&document.raw);
    let entry_links: Vec<LinkSet> = document
        .entry_elements()
        .map(LinkSet::from_element)
        .collect();

    ctx.derived_links = Some(links);
    ctx.derived_entry_links = entry_links;
    Ok(())
}

fn extract_entries(ctx: &mut CallContext) -> SheetResult<()> {
    let entry_links = std::mem::take(&mut ctx.derived_entry_links);
    let url = ctx.request.url.clone();
    let Some(document) = ctx.document_mut() else {
        return Ok(());
    };

    let mut entries = Vec::with_capacity(entry_links.len());
    for (element, links) in document.entry_elements().zip(entry_links) {
        let title = element
            .child(ATOM_NS, "title")
            .map(|title| title.text.clone())
            .ok_or_else(|| SheetError::Parse(format!("{url}: entry without atom:title")))?;
        let cells = element
            .children_in(GSX_NS)
            .map(|cell| (cell.name.clone(), cell.text.clone()))
            .collect();
        entries.push(Entry { title, links, cells });
    }

    ctx.derived_entries = Some(EntryList::new(entries));
    attach_derived(ctx);
    Ok(())
}

/// Moves the derived links, then the derived entries, onto the document.
fn attach_derived(ctx: &mut CallContext) {
    let links = ctx.derived_links.take();
    let entries = ctx.derived_entries.take();
    if let Some(document) = ctx.document_mut() {
        if let Some(links) = links {
            document.links = links;
        }
        if let Some(entries) = entries {
            document.entries = entries;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{LIST_FEED_REL, POST_REL};
    use crate::transport::HttpMethod;

    const WORKSHEETS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:gsx="http://schemas.google.com/spreadsheets/2006/extended">
  <title>Worksheets</title>
  <link rel="http://schemas.google.com/g/2005#post" href="https://sheets.test/ws"/>
  <entry>
    <title>crew</title>
    <link rel="self" href="https://sheets.test/ws/1"/>
    <link rel="http://schemas.google.com/spreadsheets/2006#listfeed" href="https://sheets.test/list/1"/>
    <gsx:name>Mike Nelson</gsx:name>
  </entry>
  <entry>
    <title>bots</title>
    <link rel="self" href="https://sheets.test/ws/2"/>
  </entry>
</feed>"#;

    fn pipeline() -> ResponsePipeline {
        ResponsePipeline::new("secret", AuthScheme::Bearer)
    }

    fn get(url: &str) -> HttpRequest {
        HttpRequest::new(HttpMethod::Get, url)
    }

    #[test]
    fn prepare_injects_authorization() {
        let mut request = get("https://sheets.test/ws");
        pipeline().prepare(&mut request);
        assert_eq!(request.header("authorization"), Some("Bearer secret"));
    }

    #[test]
    fn atom_response_gets_links_and_entries_in_document_order() {
        let response = HttpResponse::new(200, "application/atom+xml; charset=UTF-8", WORKSHEETS);
        let feed = pipeline()
            .complete(get("https://sheets.test/ws"), response)
            .expect("pipeline should succeed");
        let document = feed.document().expect("atom body should be parsed");

        assert_eq!(document.title(), Some("Worksheets"));
        assert_eq!(
            document.links.by_relation(POST_REL).map(|l| l.href.as_str()),
            Some("https://sheets.test/ws")
        );
        let titles: Vec<&str> = document.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["crew", "bots"]);

        let crew = document.entries.find(&"crew".into()).expect("crew entry");
        assert_eq!(
            crew.links.by_relation(LIST_FEED_REL).map(|l| l.href.as_str()),
            Some("https://sheets.test/list/1")
        );
        assert_eq!(crew.cell("name"), Some("Mike Nelson"));
    }

    #[test]
    fn non_atom_response_stays_raw() {
        let response = HttpResponse::new(200, "text/plain", "ok");
        let feed = pipeline()
            .complete(get("https://sheets.test/cell"), response)
            .expect("pipeline should succeed");
        assert_eq!(feed.body, Body::Raw(b"ok".to_vec()));
        assert!(feed.document().is_err());
    }

    #[test]
    fn error_status_aborts_before_parsing() {
        let response = HttpResponse::new(404, ATOM_MEDIA_TYPE, "<not-xml");
        let error = pipeline()
            .complete(get("https://sheets.test/missing"), response)
            .expect_err("404 should fail");
        assert!(matches!(
            error,
            SheetError::HttpStatus { status: 404, ref body, .. } if body == "<not-xml"
        ));
    }

    #[test]
    fn malformed_atom_is_parse_error() {
        let response = HttpResponse::new(200, ATOM_MEDIA_TYPE, "<feed><entry></feed>");
        let error = pipeline()
            .complete(get("https://sheets.test/ws"), response)
            .expect_err("malformed xml should fail");
        assert!(matches!(error, SheetError::Parse(_)));
    }

    #[test]
    fn guards_follow_body_state() {
        let response = HttpResponse::new(200, ATOM_MEDIA_TYPE, WORKSHEETS);
        let mut ctx = CallContext::new(get("https://sheets.test/ws"), response);
        assert!(Stage::ParseAtom.applies(&ctx));
        assert!(!Stage::ExtractLinks.applies(&ctx));

        Stage::ParseAtom.apply(&mut ctx).expect("parse");
        Stage::ExtractLinks.apply(&mut ctx).expect("links");
        assert_eq!(ctx.derived_entry_links.len(), 2);
        assert!(ctx.derived_links.is_some());
        assert!(!Stage::ParseAtom.applies(&ctx));

        Stage::ExtractEntries.apply(&mut ctx).expect("entries");
        assert!(ctx.derived_links.is_none());
        assert!(ctx.derived_entries.is_none());
        let Body::Feed(document) = &ctx.body else {
            panic!("body should be a feed");
        };
        assert_eq!(document.entries.len(), 2);
        assert!(document.links.by_relation(POST_REL).is_some());
    }
}
