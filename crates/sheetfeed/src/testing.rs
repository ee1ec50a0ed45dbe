//! In-memory spreadsheet feed service.
//!
//! [`MockSheetService`] implements [`HttpTransport`] by serving Atom
//! worksheets, list and cells feeds from process memory, so the whole
//! navigation stack can run without network access. Every request is
//! recorded; faults and dropped link relations can be injected.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use quick_xml::escape::escape;

use crate::config::SheetConfig;
use crate::errors::{SheetError, SheetResult};
use crate::feed::{
    ATOM_MEDIA_TYPE, ATOM_NS, CELLS_FEED_REL, EDIT_REL, GS_NS, GSX_NS, LIST_FEED_REL, POST_REL,
    SELF_REL, WORKSHEETS_FEED_REL,
};
use crate::model::normalize_field_name;
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::xml::XmlElement;

pub const DEFAULT_MOCK_SITE: &str = "https://spreadsheets.mock.test";
pub const DEFAULT_MOCK_KEY: &str = "mock-spreadsheet";

#[derive(Clone, Debug)]
pub struct MockSheetService {
    inner: Arc<Mutex<MockSheetState>>,
}

#[derive(Clone, Debug)]
struct MockSheetState {
    site: String,
    spreadsheet_path: String,
    key: String,
    token: Option<String>,
    next_worksheet_id: u64,
    next_row_id: u64,
    worksheets: Vec<MockWorksheet>,
    requests: Vec<HttpRequest>,
    faults: Vec<MockFault>,
    omitted_relations: BTreeSet<String>,
}

#[derive(Clone, Debug)]
struct MockWorksheet {
    id: u64,
    title: String,
    col_count: usize,
    row_count: usize,
    cells: BTreeMap<(usize, usize), String>,
    rows: Vec<MockRow>,
}

#[derive(Clone, Debug)]
struct MockRow {
    id: u64,
    cells: Vec<(String, String)>,
}

#[derive(Clone, Debug)]
struct MockFault {
    method: HttpMethod,
    url_fragment: String,
    status: u16,
}

enum Route<'a> {
    Spreadsheet,
    Worksheets,
    Worksheet(&'a str),
    List(&'a str),
    ListRow(&'a str, &'a str),
    Cells(&'a str),
    Cell(&'a str, &'a str),
}

impl Default for MockSheetService {
    fn default() -> Self {
        Self::new(DEFAULT_MOCK_SITE, DEFAULT_MOCK_KEY)
    }
}

impl MockSheetService {
    pub fn new(site: &str, key: &str) -> Self {
        let state = MockSheetState {
            site: site.trim_end_matches('/').to_string(),
            spreadsheet_path: format!("/feeds/spreadsheets/{key}"),
            key: key.to_string(),
            token: None,
            next_worksheet_id: 1,
            next_row_id: 1,
            worksheets: Vec::new(),
            requests: Vec::new(),
            faults: Vec::new(),
            omitted_relations: BTreeSet::new(),
        };
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Serves the spreadsheet at the configured URL and checks the
    /// configured secret on every request.
    pub fn for_config(config: &SheetConfig) -> Self {
        let path = config.spreadsheet_url.path().trim_end_matches('/').to_string();
        let key = path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(DEFAULT_MOCK_KEY)
            .to_string();
        let service = Self::new(&config.site(), &key);
        if let Ok(mut state) = service.inner.lock() {
            state.spreadsheet_path = path;
            if !config.secret_key.is_empty() {
                state.token = Some(config.secret_key.clone());
            }
        }
        service
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        if let Ok(mut state) = self.inner.lock() {
            state.token = Some(token.into());
        }
        self
    }

    pub fn spreadsheet_url(&self) -> String {
        self.read(|state| format!("{}{}", state.site, state.spreadsheet_path))
    }

    /// Seeds a worksheet with a header row, bypassing the HTTP surface.
    pub fn add_worksheet(&self, title: &str, headers: &[&str]) {
        self.write(|state| {
            let id = state.allocate_worksheet_id();
            let cells = headers
                .iter()
                .enumerate()
                .map(|(index, header)| ((1, index + 1), header.to_string()))
                .collect();
            state.worksheets.push(MockWorksheet {
                id,
                title: title.to_string(),
                col_count: headers.len(),
                row_count: 1,
                cells,
                rows: Vec::new(),
            });
        });
    }

    pub fn worksheet_titles(&self) -> Vec<String> {
        self.read(|state| state.worksheets.iter().map(|ws| ws.title.clone()).collect())
    }

    /// Header row values in column order; `None` if the worksheet is absent.
    pub fn worksheet_headers(&self, title: &str) -> Option<Vec<String>> {
        self.read(|state| {
            state
                .worksheets
                .iter()
                .find(|ws| ws.title == title)
                .map(MockWorksheet::headers)
        })
    }

    pub fn rows(&self, title: &str) -> Vec<Vec<(String, String)>> {
        self.read(|state| {
            state
                .worksheets
                .iter()
                .find(|ws| ws.title == title)
                .map(|ws| ws.rows.iter().map(|row| row.cells.clone()).collect())
                .unwrap_or_default()
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.read(|state| state.requests.clone())
    }

    /// Answers the next request whose method matches and whose URL contains
    /// `url_fragment` with `status` instead of serving it.
    pub fn fail_next(&self, method: HttpMethod, url_fragment: &str, status: u16) {
        self.write(|state| {
            state.faults.push(MockFault {
                method,
                url_fragment: url_fragment.to_string(),
                status,
            })
        });
    }

    /// Stops advertising links with relation `rel` in served documents.
    pub fn omit_relation(&self, rel: &str) {
        self.write(|state| {
            state.omitted_relations.insert(rel.to_string());
        });
    }

    fn lock(&self) -> SheetResult<MutexGuard<'_, MockSheetState>> {
        self.inner
            .lock()
            .map_err(|_| SheetError::Transport("mock sheet service mutex poisoned".to_string()))
    }

    fn read<R>(&self, f: impl FnOnce(&MockSheetState) -> R) -> R
    where
        R: Default,
    {
        self.lock().map(|state| f(&state)).unwrap_or_default()
    }

    fn write(&self, f: impl FnOnce(&mut MockSheetState)) {
        if let Ok(mut state) = self.lock() {
            f(&mut state);
        }
    }
}

#[async_trait]
impl HttpTransport for MockSheetService {
    async fn execute(&self, request: HttpRequest) -> SheetResult<HttpResponse> {
        let mut state = self.lock()?;
        state.requests.push(request.clone());
        Ok(state.handle(&request))
    }
}

impl MockWorksheet {
    fn headers(&self) -> Vec<String> {
        (1..=self.col_count)
            .map(|col| self.cells.get(&(1, col)).cloned().unwrap_or_default())
            .collect()
    }

    /// List-feed keys of the header row; empty when no header is set.
    fn column_keys(&self) -> BTreeSet<String> {
        self.headers()
            .iter()
            .map(|header| normalize_field_name(header))
            .filter(|key| !key.is_empty())
            .collect()
    }

    fn accept_cells(&self, cells: Vec<(String, String)>) -> Vec<(String, String)> {
        let keys = self.column_keys();
        if keys.is_empty() {
            return cells;
        }
        cells
            .into_iter()
            .filter(|(name, _)| keys.contains(name))
            .collect()
    }
}

impl MockSheetState {
    fn allocate_worksheet_id(&mut self) -> u64 {
        let id = self.next_worksheet_id;
        self.next_worksheet_id += 1;
        id
    }

    fn allocate_row_id(&mut self) -> u64 {
        let id = self.next_row_id;
        self.next_row_id += 1;
        id
    }

    fn handle(&mut self, request: &HttpRequest) -> HttpResponse {
        if let Some(position) = self.faults.iter().position(|fault| {
            fault.method == request.method && request.url.contains(&fault.url_fragment)
        }) {
            let fault = self.faults.remove(position);
            return text(fault.status, "injected failure");
        }

        if let Some(token) = &self.token {
            let authorized = request
                .header("authorization")
                .is_some_and(|value| value.contains(token.as_str()));
            if !authorized {
                return text(401, "missing or invalid authorization");
            }
        }

        if matches!(request.method, HttpMethod::Put | HttpMethod::Delete)
            && request.header("if-match").is_none()
        {
            return text(412, "If-Match header required");
        }
        if matches!(request.method, HttpMethod::Post | HttpMethod::Put)
            && !request
                .header("content-type")
                .is_some_and(|value| value.starts_with(ATOM_MEDIA_TYPE))
        {
            return text(415, "expected an Atom payload");
        }

        let Some(path) = request.url.strip_prefix(&self.site) else {
            return text(404, "unknown site");
        };
        let path = path.split('?').next().unwrap_or_default().to_string();
        let Some(route) = self.route(&path) else {
            return text(404, "no such resource");
        };

        let body = request.body.as_deref().unwrap_or_default();
        match (request.method, route) {
            (HttpMethod::Get, Route::Spreadsheet) => atom(200, self.spreadsheet_xml()),
            (HttpMethod::Get, Route::Worksheets) => atom(200, self.worksheets_xml()),
            (HttpMethod::Post, Route::Worksheets) => self.create_worksheet(body),
            (HttpMethod::Get, Route::Worksheet(ws)) => self.with_worksheet(ws, |state, index| {
                atom(200, state.worksheet_xml(&state.worksheets[index]))
            }),
            (HttpMethod::Delete, Route::Worksheet(ws)) => self.with_worksheet(ws, |state, index| {
                state.worksheets.remove(index);
                text(200, "")
            }),
            (HttpMethod::Get, Route::List(ws)) => self.with_worksheet(ws, |state, index| {
                atom(200, state.list_xml(&state.worksheets[index]))
            }),
            (HttpMethod::Post, Route::List(ws)) => {
                let ws = ws.to_string();
                self.insert_row(&ws, body)
            }
            (HttpMethod::Get, Route::ListRow(ws, row)) => {
                let (ws, row) = (ws.to_string(), row.to_string());
                self.with_row(&ws, &row, |state, index, row_index| {
                    let worksheet = &state.worksheets[index];
                    atom(200, state.row_xml(worksheet, &worksheet.rows[row_index], true))
                })
            }
            (HttpMethod::Put, Route::ListRow(ws, row)) => {
                let (ws, row) = (ws.to_string(), row.to_string());
                self.update_row(&ws, &row, body)
            }
            (HttpMethod::Delete, Route::ListRow(ws, row)) => {
                let (ws, row) = (ws.to_string(), row.to_string());
                self.with_row(&ws, &row, |state, index, row_index| {
                    state.worksheets[index].rows.remove(row_index);
                    text(200, "")
                })
            }
            (HttpMethod::Get, Route::Cells(ws)) => self.with_worksheet(ws, |state, index| {
                atom(200, state.cells_xml(&state.worksheets[index]))
            }),
            (HttpMethod::Put, Route::Cell(ws, cell)) => {
                let (ws, cell) = (ws.to_string(), cell.to_string());
                self.update_cell(&ws, &cell, body)
            }
            _ => text(405, "method not allowed"),
        }
    }

    fn route<'a>(&self, path: &'a str) -> Option<Route<'a>> {
        if path.trim_end_matches('/') == self.spreadsheet_path {
            return Some(Route::Spreadsheet);
        }
        let segments: Vec<&'a str> = path.trim_matches('/').split('/').collect();
        let key = self.key.as_str();
        match segments[..] {
            ["feeds", "worksheets", k, "private", "full"] if k == key => Some(Route::Worksheets),
            ["feeds", "worksheets", k, "private", "full", ws] if k == key => {
                Some(Route::Worksheet(ws))
            }
            ["feeds", "list", k, ws, "private", "full"] if k == key => Some(Route::List(ws)),
            ["feeds", "list", k, ws, "private", "full", row] if k == key => {
                Some(Route::ListRow(ws, row))
            }
            ["feeds", "cells", k, ws, "private", "full"] if k == key => Some(Route::Cells(ws)),
            ["feeds", "cells", k, ws, "private", "full", cell] if k == key => {
                Some(Route::Cell(ws, cell))
            }
            _ => None,
        }
    }

    fn worksheet_index(&self, ws: &str) -> Option<usize> {
        let id = ws.parse::<u64>().ok()?;
        self.worksheets.iter().position(|worksheet| worksheet.id == id)
    }

    fn with_worksheet(
        &mut self,
        ws: &str,
        f: impl FnOnce(&mut Self, usize) -> HttpResponse,
    ) -> HttpResponse {
        match self.worksheet_index(ws) {
            Some(index) => f(self, index),
            None => text(404, "no such worksheet"),
        }
    }

    fn with_row(
        &mut self,
        ws: &str,
        row: &str,
        f: impl FnOnce(&mut Self, usize, usize) -> HttpResponse,
    ) -> HttpResponse {
        let Some(index) = self.worksheet_index(ws) else {
            return text(404, "no such worksheet");
        };
        let row_index = row.parse::<u64>().ok().and_then(|id| {
            self.worksheets[index]
                .rows
                .iter()
                .position(|candidate| candidate.id == id)
        });
        match row_index {
            Some(row_index) => f(self, index, row_index),
            None => text(404, "no such row"),
        }
    }

    fn create_worksheet(&mut self, body: &str) -> HttpResponse {
        let Ok(entry) = XmlElement::parse(body) else {
            return text(400, "malformed worksheet entry");
        };
        let Some(title) = entry.child(ATOM_NS, "title").map(|t| t.text.trim().to_string()) else {
            return text(400, "worksheet title required");
        };
        let count = |name: &str| {
            entry
                .child(GS_NS, name)
                .and_then(|element| element.text.trim().parse::<usize>().ok())
        };
        let (Some(col_count), Some(row_count)) = (count("colCount"), count("rowCount")) else {
            return text(400, "worksheet dimensions required");
        };
        if self.worksheets.iter().any(|ws| ws.title == title) {
            return text(409, "a worksheet with that title already exists");
        }

        let id = self.allocate_worksheet_id();
        let worksheet = MockWorksheet {
            id,
            title,
            col_count,
            row_count,
            cells: BTreeMap::new(),
            rows: Vec::new(),
        };
        let response = atom(201, self.worksheet_xml(&worksheet));
        self.worksheets.push(worksheet);
        response
    }

    fn update_cell(&mut self, ws: &str, cell: &str, body: &str) -> HttpResponse {
        let Some(index) = self.worksheet_index(ws) else {
            return text(404, "no such worksheet");
        };
        let Some((row, col)) = parse_cell_id(cell) else {
            return text(404, "no such cell");
        };
        let Some(entry) = XmlElement::parse(body).ok() else {
            return text(400, "malformed cell entry");
        };
        let Some(element) = entry.child(GS_NS, "cell") else {
            return text(400, "gs:cell required");
        };
        let declared = (
            element.attribute("row").and_then(|v| v.parse::<usize>().ok()),
            element.attribute("col").and_then(|v| v.parse::<usize>().ok()),
        );
        if declared != (Some(row), Some(col)) {
            return text(400, "cell coordinates do not match the cell url");
        }
        let worksheet = &mut self.worksheets[index];
        if col > worksheet.col_count || row > worksheet.row_count {
            return text(400, "cell outside of worksheet bounds");
        }

        let value = element.attribute("inputValue").unwrap_or_default().to_string();
        worksheet.cells.insert((row, col), value.clone());
        let href = format!("{}/R{row}C{col}", self.cells_url(self.worksheets[index].id));
        atom(200, self.cell_xml(&href, row, col, &value))
    }

    fn insert_row(&mut self, ws: &str, body: &str) -> HttpResponse {
        let Some(index) = self.worksheet_index(ws) else {
            return text(404, "no such worksheet");
        };
        let Some(cells) = parse_row_cells(body) else {
            return text(400, "malformed row entry");
        };
        let id = self.allocate_row_id();
        let worksheet = &mut self.worksheets[index];
        let row = MockRow {
            id,
            cells: worksheet.accept_cells(cells),
        };
        worksheet.rows.push(row);

        let worksheet = &self.worksheets[index];
        let row = &worksheet.rows[worksheet.rows.len() - 1];
        atom(201, self.row_xml(worksheet, row, true))
    }

    fn update_row(&mut self, ws: &str, row: &str, body: &str) -> HttpResponse {
        let Some(cells) = parse_row_cells(body) else {
            return text(400, "malformed row entry");
        };
        self.with_row(ws, row, |state, index, row_index| {
            let worksheet = &mut state.worksheets[index];
            worksheet.rows[row_index].cells = worksheet.accept_cells(cells);
            let worksheet = &state.worksheets[index];
            atom(200, state.row_xml(worksheet, &worksheet.rows[row_index], true))
        })
    }

    fn worksheets_url(&self) -> String {
        format!("{}/feeds/worksheets/{}/private/full", self.site, self.key)
    }

    fn list_url(&self, ws: u64) -> String {
        format!("{}/feeds/list/{}/{ws}/private/full", self.site, self.key)
    }

    fn cells_url(&self, ws: u64) -> String {
        format!("{}/feeds/cells/{}/{ws}/private/full", self.site, self.key)
    }

    fn link(&self, rel: &str, href: &str) -> String {
        if self.omitted_relations.contains(rel) {
            return String::new();
        }
        format!(
            r#"<link rel="{}" type="{ATOM_MEDIA_TYPE}" href="{}"/>"#,
            escape(rel),
            escape(href)
        )
    }

    fn spreadsheet_xml(&self) -> String {
        let href = format!("{}{}", self.site, self.spreadsheet_path);
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><entry xmlns="{ATOM_NS}"><id>{}</id><title>{}</title>{}{}</entry>"#,
            escape(&href),
            escape(&self.key),
            self.link(SELF_REL, &href),
            self.link(WORKSHEETS_FEED_REL, &self.worksheets_url()),
        )
    }

    fn worksheets_xml(&self) -> String {
        let url = self.worksheets_url();
        let entries: String = self
            .worksheets
            .iter()
            .map(|worksheet| self.worksheet_xml(worksheet))
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><feed xmlns="{ATOM_NS}" xmlns:gs="{GS_NS}"><id>{}</id><title>{}</title>{}{}{entries}</feed>"#,
            escape(&url),
            escape(&self.key),
            self.link(SELF_REL, &url),
            self.link(POST_REL, &url),
        )
    }

    fn worksheet_xml(&self, worksheet: &MockWorksheet) -> String {
        let href = format!("{}/{}", self.worksheets_url(), worksheet.id);
        format!(
            r#"<entry xmlns="{ATOM_NS}" xmlns:gs="{GS_NS}"><id>{}</id><title>{}</title>{}{}{}{}<gs:colCount>{}</gs:colCount><gs:rowCount>{}</gs:rowCount></entry>"#,
            escape(&href),
            escape(&worksheet.title),
            self.link(SELF_REL, &href),
            self.link(EDIT_REL, &href),
            self.link(LIST_FEED_REL, &self.list_url(worksheet.id)),
            self.link(CELLS_FEED_REL, &self.cells_url(worksheet.id)),
            worksheet.col_count,
            worksheet.row_count,
        )
    }

    fn list_xml(&self, worksheet: &MockWorksheet) -> String {
        let url = self.list_url(worksheet.id);
        let entries: String = worksheet
            .rows
            .iter()
            .map(|row| self.row_xml(worksheet, row, false))
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><feed xmlns="{ATOM_NS}" xmlns:gsx="{GSX_NS}"><id>{}</id><title>{}</title>{}{}{entries}</feed>"#,
            escape(&url),
            escape(&worksheet.title),
            self.link(SELF_REL, &url),
            self.link(POST_REL, &url),
        )
    }

    fn row_xml(&self, worksheet: &MockWorksheet, row: &MockRow, standalone: bool) -> String {
        let href = format!("{}/{}", self.list_url(worksheet.id), row.id);
        let title = row.cells.first().map(|(_, value)| value.as_str()).unwrap_or("");
        let cells: String = row
            .cells
            .iter()
            .map(|(name, value)| format!("<gsx:{name}>{}</gsx:{name}>", escape(value)))
            .collect();
        let prolog = if standalone {
            r#"<?xml version="1.0" encoding="UTF-8"?>"#
        } else {
            ""
        };
        format!(
            r#"{prolog}<entry xmlns="{ATOM_NS}" xmlns:gsx="{GSX_NS}"><id>{}</id><title>{}</title>{}{}{cells}</entry>"#,
            escape(&href),
            escape(title),
            self.link(SELF_REL, &href),
            self.link(EDIT_REL, &href),
        )
    }

    fn cells_xml(&self, worksheet: &MockWorksheet) -> String {
        let url = self.cells_url(worksheet.id);
        let entries: String = worksheet
            .cells
            .iter()
            .map(|((row, col), value)| {
                self.cell_xml(&format!("{url}/R{row}C{col}"), *row, *col, value)
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><feed xmlns="{ATOM_NS}" xmlns:gs="{GS_NS}"><id>{}</id><title>{}</title>{}{}{entries}</feed>"#,
            escape(&url),
            escape(&worksheet.title),
            self.link(SELF_REL, &url),
            self.link(POST_REL, &url),
        )
    }

    fn cell_xml(&self, href: &str, row: usize, col: usize, value: &str) -> String {
        format!(
            r#"<entry xmlns="{ATOM_NS}" xmlns:gs="{GS_NS}"><id>{}</id><title>R{row}C{col}</title>{}{}<gs:cell row="{row}" col="{col}" inputValue="{}">{}</gs:cell></entry>"#,
            escape(href),
            self.link(SELF_REL, href),
            self.link(EDIT_REL, href),
            escape(value),
            escape(value),
        )
    }
}

fn atom(status: u16, body: String) -> HttpResponse {
    HttpResponse::new(status, &format!("{ATOM_MEDIA_TYPE}; charset=UTF-8"), body)
}

fn text(status: u16, message: &str) -> HttpResponse {
    HttpResponse::new(status, "text/plain", message)
}

/// `R<row>C<col>`, both 1-based.
fn parse_cell_id(cell: &str) -> Option<(usize, usize)> {
    let rest = cell.strip_prefix('R')?;
    let (row, col) = rest.split_once('C')?;
    let row = row.parse::<usize>().ok().filter(|row| *row > 0)?;
    let col = col.parse::<usize>().ok().filter(|col| *col > 0)?;
    Some((row, col))
}

fn parse_row_cells(body: &str) -> Option<Vec<(String, String)>> {
    let entry = XmlElement::parse(body).ok()?;
    Some(
        entry
            .children_in(GSX_NS)
            .map(|cell| (cell.name.clone(), cell.text.clone()))
            .collect(),
    )
}
