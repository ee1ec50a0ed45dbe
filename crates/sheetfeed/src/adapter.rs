//! Table-level CRUD translated into feed navigation and Atom writes.

use std::sync::Arc;

use crate::builders;
use crate::config::{ConnectionAdapter, SheetConfig};
use crate::connection::Connection;
use crate::errors::{SheetError, SheetResult};
use crate::feed::{CELLS_FEED_REL, Document, EDIT_REL, Entry, POST_REL, TitlePattern};
use crate::model::{Model, Query, Record, Resource, Value};
use crate::navigator::Navigator;
use crate::testing::MockSheetService;
use crate::transport::{HttpTransport, ReqwestTransport};

#[derive(Clone, Debug)]
pub struct SheetAdapter<T> {
    navigator: Navigator<T>,
}

impl SheetAdapter<Arc<dyn HttpTransport>> {
    /// Builds the transport named by `config.connection_adapter`.
    pub fn from_config(config: &SheetConfig) -> SheetResult<Self> {
        let transport: Arc<dyn HttpTransport> = match config.connection_adapter {
            ConnectionAdapter::Reqwest => {
                Arc::new(ReqwestTransport::with_timeout(config.request_timeout)?)
            }
            ConnectionAdapter::Memory => Arc::new(MockSheetService::for_config(config)),
        };
        Self::with_transport(transport, config)
    }
}

impl<T> SheetAdapter<T>
where
    T: HttpTransport,
{
    pub fn new(navigator: Navigator<T>) -> Self {
        Self { navigator }
    }

    pub fn with_transport(transport: T, config: &SheetConfig) -> SheetResult<Self> {
        let connection = Connection::from_config(transport, config)?;
        Ok(Self::new(Navigator::new(connection, config.spreadsheet_path())))
    }

    pub fn navigator(&self) -> &Navigator<T> {
        &self.navigator
    }

    fn connection(&self) -> &Connection<T> {
        self.navigator.connection()
    }

    pub async fn storage_exists(&self, storage_name: &str) -> SheetResult<bool> {
        let worksheet = self
            .navigator
            .find_worksheet_entry(&TitlePattern::from(storage_name))
            .await?;
        Ok(worksheet.is_some())
    }

    /// Creates a worksheet with one header cell per property. Returns
    /// `false` without writing anything when the worksheet already exists.
    /// Properties whose field names collide or cannot be XML names are
    /// rejected before any request is sent.
    pub async fn create_model_storage(&self, model: &dyn Model) -> SheetResult<bool> {
        let storage_name = model.storage_name();
        let columns = model.checked_column_names()?;
        if self.storage_exists(storage_name).await? {
            tracing::debug!(worksheet = storage_name, "worksheet already exists");
            return Ok(false);
        }

        let worksheets = self.navigator.worksheets_collection().await?;
        let post_link = worksheets
            .links
            .require(POST_REL, &format!("worksheets feed {}", worksheets.describe()))?;
        let created = self
            .connection()
            .post_atom(
                &post_link.href,
                builders::worksheet_xml(storage_name, columns.len())?,
            )
            .await?
            .into_document()?;
        let cells_url = created
            .links
            .require(CELLS_FEED_REL, &format!("new worksheet '{storage_name}'"))?
            .href
            .trim_end_matches('/')
            .to_string();

        for (index, column) in columns.iter().enumerate() {
            let col = index + 1;
            let cell_url = format!("{cells_url}/R1C{col}");
            self.connection()
                .put_atom(&cell_url, builders::cell_xml(&cell_url, column, 1, col)?)
                .await?;
        }

        tracing::info!(
            worksheet = storage_name,
            columns = columns.len(),
            "created worksheet"
        );
        Ok(true)
    }

    pub async fn upgrade_model_storage(&self, model: &dyn Model) -> SheetResult<bool> {
        Err(SheetError::Unsupported(format!(
            "upgrading worksheet '{}' is not supported",
            model.storage_name()
        )))
    }

    /// Deletes every worksheet titled `storage_name`. Returns `false` when
    /// there is none.
    pub async fn destroy_storage(&self, storage_name: &str) -> SheetResult<bool> {
        if !self.storage_exists(storage_name).await? {
            return Ok(false);
        }

        let worksheets = self
            .navigator
            .worksheet_entries(&TitlePattern::from(storage_name))
            .await?;
        for worksheet in &worksheets {
            self.connection().delete(worksheet.url()?).await?;
        }

        tracing::info!(
            worksheet = storage_name,
            deleted = worksheets.len(),
            "destroyed worksheet"
        );
        Ok(true)
    }

    pub async fn destroy_model_storage(&self, model: &dyn Model) -> SheetResult<bool> {
        self.destroy_storage(model.storage_name()).await
    }

    /// Inserts each resource, assigning serial `row count + 1` from a fresh
    /// list fetch right before its POST.
    pub async fn create<R>(&self, resources: &mut [R]) -> SheetResult<usize>
    where
        R: Resource,
    {
        let groups = group_by_storage(resources.iter().map(|r| r.model().storage_name()));
        for (storage_name, indexes) in groups {
            for index in indexes {
                let list = self.navigator.row_list_document(&storage_name).await?;
                let serial = list.entries.len() as i64 + 1;
                let post_link = list
                    .links
                    .require(POST_REL, &format!("list feed of worksheet '{storage_name}'"))?
                    .href
                    .clone();

                let resource = &mut resources[index];
                resource.set_serial(serial);
                self.connection()
                    .post_atom(&post_link, row_payload(&*resource)?)
                    .await?;
                tracing::info!(worksheet = %storage_name, serial, "inserted row");
            }
        }
        Ok(resources.len())
    }

    /// Fetches every row, keeps the requested fields and hands the records
    /// to the query for filtering.
    pub async fn read(&self, query: &dyn Query) -> SheetResult<Vec<Record>> {
        let model = query.model();
        let list = self
            .navigator
            .row_list_document(model.storage_name())
            .await?;

        let fields: Vec<_> = query
            .fields()
            .into_iter()
            .map(|property| (model.field(property), property))
            .collect();
        let records: Vec<Record> = list
            .entries
            .iter()
            .map(|entry| {
                fields
                    .iter()
                    .map(|(field, property)| {
                        let value = entry
                            .cell(field)
                            .map(|raw| property.typecast(raw))
                            .unwrap_or(Value::Null);
                        (field.clone(), value)
                    })
                    .collect()
            })
            .collect();

        tracing::debug!(
            worksheet = model.storage_name(),
            fetched = records.len(),
            "read rows"
        );
        Ok(query.filter_records(records))
    }

    /// Rewrites each resource's row with its full current attribute set.
    /// Returns the number of changed attributes.
    pub async fn update<R>(&self, attributes: &Record, collection: &[R]) -> SheetResult<usize>
    where
        R: Resource,
    {
        let groups = group_by_storage(collection.iter().map(|r| r.model().storage_name()));
        for (storage_name, indexes) in groups {
            let list = self.navigator.row_list_document(&storage_name).await?;
            for index in indexes {
                let resource = &collection[index];
                let edit_url = edit_url(&list, &storage_name, resource)?;
                self.connection()
                    .put_atom(&edit_url, row_payload(resource)?)
                    .await?;
                tracing::info!(worksheet = %storage_name, url = %edit_url, "updated row");
            }
        }
        Ok(attributes.len())
    }

    pub async fn delete<R>(&self, collection: &[R]) -> SheetResult<usize>
    where
        R: Resource,
    {
        let groups = group_by_storage(collection.iter().map(|r| r.model().storage_name()));
        for (storage_name, indexes) in groups {
            let list = self.navigator.row_list_document(&storage_name).await?;
            for index in indexes {
                let edit_url = edit_url(&list, &storage_name, &collection[index])?;
                self.connection().delete(&edit_url).await?;
                tracing::info!(worksheet = %storage_name, url = %edit_url, "deleted row");
            }
        }
        Ok(collection.len())
    }
}

/// Storage names in first-seen order, each with the indexes of its resources.
fn group_by_storage<'a>(names: impl Iterator<Item = &'a str>) -> Vec<(String, Vec<usize>)> {
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    for (index, name) in names.enumerate() {
        match groups.iter_mut().find(|(existing, _)| existing == name) {
            Some((_, indexes)) => indexes.push(index),
            None => groups.push((name.to_string(), vec![index])),
        }
    }
    groups
}

fn row_payload(resource: &dyn Resource) -> SheetResult<String> {
    resource.model().checked_column_names()?;
    let attributes: Vec<(String, String)> = resource
        .field_attributes()
        .into_iter()
        .map(|(field, value)| (field, value.to_wire_string()))
        .collect();
    builders::row_xml(
        attributes
            .iter()
            .map(|(field, value)| (field.as_str(), value.as_str())),
    )
}

/// First row whose cells equal the resource on every key property.
fn locate_entry<'a>(
    list: &'a Document,
    storage_name: &str,
    resource: &dyn Resource,
) -> SheetResult<&'a Entry> {
    let model = resource.model();
    let key = model.key();
    if key.is_empty() {
        return Err(SheetError::Unsupported(format!(
            "model for worksheet '{storage_name}' declares no key properties"
        )));
    }

    list.entries
        .iter()
        .find(|entry| {
            key.iter().all(|property| {
                entry
                    .cell(&model.field(*property))
                    .map(|raw| property.typecast(raw) == resource.attribute_get(property.name()))
                    .unwrap_or(false)
            })
        })
        .ok_or_else(|| SheetError::RowNotFound {
            worksheet: storage_name.to_string(),
            key: key
                .iter()
                .map(|property| {
                    format!("{}={}", property.name(), resource.attribute_get(property.name()))
                })
                .collect::<Vec<_>>()
                .join(", "),
        })
}

fn edit_url(list: &Document, storage_name: &str, resource: &dyn Resource) -> SheetResult<String> {
    let entry = locate_entry(list, storage_name, resource)?;
    entry
        .links
        .require(EDIT_REL, &format!("row {entry} of worksheet '{storage_name}'"))
        .map(|link| link.href.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_by_storage_keeps_first_seen_order() {
        let groups = group_by_storage(["crew", "bots", "crew", "crew"].into_iter());
        assert_eq!(
            groups,
            vec![
                ("crew".to_string(), vec![0, 2, 3]),
                ("bots".to_string(), vec![1]),
            ]
        );
    }
}
