use reqwest::Url;

use crate::config::SheetConfig;
use crate::errors::{SheetError, SheetResult};
use crate::feed::{ATOM_MEDIA_TYPE, FeedResponse, OVERWRITE_ANY};
use crate::pipeline::ResponsePipeline;
use crate::transport::{HttpMethod, HttpRequest, HttpTransport};

/// Transport plus response pipeline, rooted at the spreadsheet site.
#[derive(Clone, Debug)]
pub struct Connection<T> {
    transport: T,
    pipeline: ResponsePipeline,
    site: Url,
}

impl<T> Connection<T>
where
    T: HttpTransport,
{
    pub fn new(transport: T, pipeline: ResponsePipeline, site: &str) -> SheetResult<Self> {
        let site = Url::parse(site)
            .map_err(|err| SheetError::Configuration(format!("invalid site '{site}': {err}")))?;
        Ok(Self {
            transport,
            pipeline,
            site,
        })
    }

    pub fn from_config(transport: T, config: &SheetConfig) -> SheetResult<Self> {
        Self::new(
            transport,
            ResponsePipeline::new(config.secret_key.clone(), config.auth_scheme),
            &config.site(),
        )
    }

    /// Absolute hrefs pass through; relative ones are joined onto the site.
    pub fn resolve(&self, href: &str) -> SheetResult<String> {
        self.site
            .join(href)
            .map(String::from)
            .map_err(|err| {
                SheetError::Configuration(format!("cannot resolve href '{href}': {err}"))
            })
    }

    pub async fn get(&self, href: &str) -> SheetResult<FeedResponse> {
        self.send(HttpRequest::new(HttpMethod::Get, href)).await
    }

    pub async fn post_atom(&self, href: &str, body: String) -> SheetResult<FeedResponse> {
        self.send(
            HttpRequest::new(HttpMethod::Post, href)
                .with_header("Content-Type", ATOM_MEDIA_TYPE)
                .with_body(body),
        )
        .await
    }

    /// PUT with an unconditional overwrite precondition.
    pub async fn put_atom(&self, href: &str, body: String) -> SheetResult<FeedResponse> {
        self.send(
            HttpRequest::new(HttpMethod::Put, href)
                .with_header("Content-Type", ATOM_MEDIA_TYPE)
                .with_header("If-Match", OVERWRITE_ANY)
                .with_body(body),
        )
        .await
    }

    /// DELETE with an unconditional overwrite precondition.
    pub async fn delete(&self, href: &str) -> SheetResult<FeedResponse> {
        self.send(HttpRequest::new(HttpMethod::Delete, href).with_header("If-Match", OVERWRITE_ANY))
            .await
    }

    async fn send(&self, mut request: HttpRequest) -> SheetResult<FeedResponse> {
        request.url = self.resolve(&request.url)?;
        self.pipeline.prepare(&mut request);
        tracing::debug!(method = request.method.as_str(), url = %request.url, "sending request");

        let response = self.transport.execute(request.clone()).await?;
        tracing::debug!(
            method = request.method.as_str(),
            url = %request.url,
            status = response.status,
            "received response"
        );
        self.pipeline.complete(request, response)
    }
}
