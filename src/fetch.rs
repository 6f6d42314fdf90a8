//! Arrival-prediction scraper for the `nextbus` command.
//!
//! Pages are fetched on spawned tasks gated by a semaphore, so slow upstream
//! responses never hold up message ingestion or store queries.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::{Request, Uri, header};
use hyper_util::rt::TokioIo;
use regex::Regex;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub const DEFAULT_NORTH_URL: &str = "http://www.nextbus.com/wireless/miniPrediction.shtml?a=ttc&r=510&d=510_northbound&s=spadnass_n";
pub const DEFAULT_SOUTH_URL: &str = "http://www.nextbus.com/wireless/miniPrediction.shtml?a=ttc&r=510&d=510_southbound&s=spadnass_s";
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

static ETA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"span style="font-size: \d+px; font-weight: bold;">&nbsp;(\d+|Arriving)"#)
        .expect("eta pattern compiles")
});

#[derive(Debug, Error)]
#[error("fetch failed for {url}: {reason}")]
pub struct FetchError {
    pub url: String,
    pub reason: String,
}

impl FetchError {
    fn new(url: &str, reason: impl ToString) -> Self {
        Self {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Pull every predicted arrival (minutes, or `Arriving`) out of a page.
pub fn extract_etas(page: &str) -> Vec<String> {
    ETA_RE
        .captures_iter(page)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Bounded pool of fetch workers.
#[derive(Debug, Clone)]
pub struct Fetcher {
    permits: Arc<Semaphore>,
}

impl Fetcher {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Fetch `url` and return the predictions found on it.
    pub async fn fetch(&self, url: &str) -> Result<Vec<String>, FetchError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| FetchError::new(url, e))?;
        let owned = url.to_string();
        let task = tokio::spawn(async move {
            let _permit = permit;
            let page = tokio::time::timeout(FETCH_TIMEOUT, get_page(&owned))
                .await
                .map_err(|_| FetchError::new(&owned, "timed out"))??;
            Ok::<_, FetchError>(extract_etas(&page))
        });
        let result = task.await.map_err(|e| FetchError::new(url, e))?;
        if let Err(e) = &result {
            warn!("{e}");
        }
        result
    }

    /// Predictions for both directions, fetched concurrently.
    pub async fn nextbus(
        &self,
        north_url: &str,
        south_url: &str,
    ) -> Result<(Vec<String>, Vec<String>), FetchError> {
        let (north, south) = tokio::join!(self.fetch(north_url), self.fetch(south_url));
        Ok((north?, south?))
    }
}

async fn get_page(url: &str) -> Result<String, FetchError> {
    let uri: Uri = url.parse().map_err(|e| FetchError::new(url, e))?;
    if uri.scheme_str() != Some("http") {
        return Err(FetchError::new(url, "only http urls are supported"));
    }
    let (Some(host), Some(authority)) = (uri.host(), uri.authority()) else {
        return Err(FetchError::new(url, "missing host"));
    };
    let port = uri.port_u16().unwrap_or(80);

    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| FetchError::new(url, e))?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| FetchError::new(url, e))?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("fetch connection closed: {e}");
        }
    });

    let path = uri.path_and_query().map_or("/", |p| p.as_str());
    let request = Request::get(path)
        .header(header::HOST, authority.as_str())
        .body(Empty::<Bytes>::new())
        .map_err(|e| FetchError::new(url, e))?;
    let response = sender
        .send_request(request)
        .await
        .map_err(|e| FetchError::new(url, e))?;
    if !response.status().is_success() {
        return Err(FetchError::new(url, format!("status {}", response.status())));
    }
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| FetchError::new(url, e))?
        .to_bytes();
    Ok(String::from_utf8_lossy(&body).into_owned())
}
