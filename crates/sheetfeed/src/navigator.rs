//! Link-relation navigation from the spreadsheet root down to row lists.
//!
//! Every call walks the chain again: spreadsheet → worksheets feed →
//! worksheet entry → list feed. Nothing is cached between calls.

use crate::connection::Connection;
use crate::errors::{SheetError, SheetResult};
use crate::feed::{Document, Entry, LIST_FEED_REL, POST_REL, TitlePattern, WORKSHEETS_FEED_REL};
use crate::link::Link;
use crate::transport::HttpTransport;

#[derive(Clone, Debug)]
pub struct Navigator<T> {
    connection: Connection<T>,
    spreadsheet_path: String,
}

impl<T> Navigator<T>
where
    T: HttpTransport,
{
    pub fn new(connection: Connection<T>, spreadsheet_path: impl Into<String>) -> Self {
        Self {
            connection,
            spreadsheet_path: spreadsheet_path.into(),
        }
    }

    pub fn connection(&self) -> &Connection<T> {
        &self.connection
    }

    pub async fn follow_link(&self, link: &Link) -> SheetResult<Document> {
        self.follow_url(&link.href).await
    }

    pub async fn follow_url(&self, href: &str) -> SheetResult<Document> {
        self.connection.get(href).await?.into_document()
    }

    pub async fn spreadsheet_root(&self) -> SheetResult<Document> {
        self.follow_url(&self.spreadsheet_path).await
    }

    pub async fn worksheets_collection(&self) -> SheetResult<Document> {
        let root = self.spreadsheet_root().await?;
        let link = root
            .links
            .require(WORKSHEETS_FEED_REL, &format!("spreadsheet {}", root.describe()))?;
        self.follow_link(link).await
    }

    pub async fn find_worksheet_entry(&self, pattern: &TitlePattern) -> SheetResult<Option<Entry>> {
        let worksheets = self.worksheets_collection().await?;
        Ok(worksheets.entries.find(pattern).cloned())
    }

    /// Every worksheet entry whose title matches, in document order.
    pub async fn worksheet_entries(&self, pattern: &TitlePattern) -> SheetResult<Vec<Entry>> {
        let worksheets = self.worksheets_collection().await?;
        Ok(worksheets.entries.select(pattern).cloned().collect())
    }

    pub async fn row_list_document(&self, worksheet_name: &str) -> SheetResult<Document> {
        let worksheet = self
            .find_worksheet_entry(&TitlePattern::from(worksheet_name))
            .await?
            .ok_or_else(|| SheetError::WorksheetNotFound(worksheet_name.to_string()))?;
        let list_link = worksheet
            .links
            .require(LIST_FEED_REL, &format!("worksheet '{worksheet_name}'"))?;
        self.follow_link(list_link).await
    }

    /// Row-insertion endpoint advertised by the worksheet's list feed.
    pub async fn row_post_link(&self, worksheet_name: &str) -> SheetResult<Link> {
        let list = self.row_list_document(worksheet_name).await?;
        list.links
            .require(POST_REL, &format!("list feed of worksheet '{worksheet_name}'"))
            .cloned()
    }
}
