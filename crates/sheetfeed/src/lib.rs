pub mod adapter;
pub mod builders;
pub mod config;
pub mod connection;
pub mod errors;
pub mod feed;
pub mod link;
pub mod model;
pub mod navigator;
pub mod pipeline;
pub mod schema;
pub mod testing;
pub mod transport;
pub mod xml;

pub use adapter::SheetAdapter;
pub use config::{AuthScheme, ConnectionAdapter, SheetConfig};
pub use connection::Connection;
pub use errors::{SheetError, SheetResult};
pub use feed::{
    ATOM_MEDIA_TYPE, ATOM_NS, Body, CELLS_FEED_REL, Document, EDIT_REL, Entry, EntryList,
    FeedResponse, GD_NS, GS_NS, GSX_NS, LIST_FEED_REL, OVERWRITE_ANY, POST_REL, SELF_REL,
    TitlePattern, WORKSHEETS_FEED_REL,
};
pub use link::{Link, LinkSet};
pub use model::{Model, Property, Query, Record, Resource, Value, normalize_field_name};
pub use navigator::Navigator;
pub use pipeline::{CallContext, ResponsePipeline, Stage};
pub use schema::{
    Column, ColumnType, Comparison, Condition, Direction, Row, SelectQuery, TableSchema,
};
pub use testing::MockSheetService;
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use xml::XmlElement;
