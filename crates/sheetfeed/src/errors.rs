use thiserror::Error;

/// Top-level error type for the sheetfeed crate.
#[derive(Debug, Error)]
pub enum SheetError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("http {method} {url} failed with status {status}: {body}")]
    HttpStatus {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    #[error("feed parse error: {0}")]
    Parse(String),

    #[error("missing link relation '{rel}' on {context}")]
    MissingRelation { rel: String, context: String },

    #[error("worksheet not found: {0}")]
    WorksheetNotFound(String),

    #[error("no row in worksheet '{worksheet}' matches key {key}")]
    RowNotFound { worksheet: String, key: String },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("payload serialization failed: {0}")]
    Serialization(String),
}

pub type SheetResult<T> = Result<T, SheetError>;

impl SheetError {
    pub fn missing_relation(rel: &str, context: impl Into<String>) -> Self {
        Self::MissingRelation {
            rel: rel.to_string(),
            context: context.into(),
        }
    }

    /// HTTP status carried by the error, if it came from a non-2xx response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<quick_xml::Error> for SheetError {
    fn from(error: quick_xml::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for SheetError {
    fn from(error: std::io::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<roxmltree::Error> for SheetError {
    fn from(error: roxmltree::Error) -> Self {
        Self::Parse(error.to_string())
    }
}
