//! Transport abstraction. The engine/scraper/middleware stack depends only
//! on [`DownloadHandler`]; [`ReqwestDownloadHandler`] is the one concrete
//! adapter this crate ships, built on the same `reqwest` client the
//! teacher uses for its own fetches.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CrawlError;
use crate::http::{Headers, Method, Request, Response};

#[async_trait]
pub trait DownloadHandler: Send + Sync {
    async fn download(&self, request: &Request) -> Result<Response, CrawlError>;
}

pub struct ReqwestDownloadHandler {
    client: reqwest::Client,
}

impl ReqwestDownloadHandler {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Head => reqwest::Method::HEAD,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl DownloadHandler for ReqwestDownloadHandler {
    async fn download(&self, request: &Request) -> Result<Response, CrawlError> {
        let mut builder = self
            .client
            .request(reqwest_method(request.method), request.url.clone());

        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        if !request.cookies.is_empty() {
            let cookie_header = request
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header("cookie", cookie_header);
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| CrawlError::Transport {
            url: request.url.to_string(),
            source: anyhow::anyhow!(e),
        })?;

        let status = response.status().as_u16();
        let mut headers = Headers::new();
        let mut cookies = std::collections::HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str(), v.to_string());
                if name.as_str().eq_ignore_ascii_case("set-cookie") {
                    let cookie_pair = v.split(';').next().unwrap_or(v);
                    if let Some((k, val)) = cookie_pair.split_once('=') {
                        cookies.insert(k.trim().to_string(), val.trim().to_string());
                    }
                }
            }
        }

        let url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| CrawlError::Transport {
                url: request.url.to_string(),
                source: anyhow::anyhow!(e),
            })?
            .to_vec();

        Ok(Response::new(url, status, headers, body, Arc::new(request.clone())).with_cookies(cookies))
    }
}
