//! Image decoding from session blobs and remote URLs

use bytes::Bytes;
use image::DynamicImage;
use imageid_core::{DecodedImage, Error, ImageReference, Result};
use parking_lot::RwLock;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Decoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Upper bound on a remote fetch; unset waits indefinitely
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,

    /// User agent sent with remote fetches
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_user_agent() -> String {
    concat!("imageid/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: None,
            user_agent: default_user_agent(),
        }
    }
}

/// Session-scoped store of uploaded image bytes, addressed by `blob:` locators
///
/// The controller removes a blob once the history limit evicts its last entry.
#[derive(Clone, Default)]
pub struct BlobStore {
    blobs: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl BlobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bytes and return a fresh reference to them
    pub fn insert(&self, bytes: impl Into<Bytes>) -> ImageReference {
        let locator = format!("blob:{}", uuid::Uuid::new_v4());
        self.blobs.write().insert(locator.clone(), bytes.into());
        ImageReference::Blob(locator)
    }

    /// Look up the bytes behind a locator
    pub fn get(&self, locator: &str) -> Option<Bytes> {
        self.blobs.read().get(locator).cloned()
    }

    /// Drop the bytes behind a locator
    pub fn remove(&self, locator: &str) -> bool {
        self.blobs.write().remove(locator).is_some()
    }

    /// Whether a locator is known
    pub fn contains(&self, locator: &str) -> bool {
        self.blobs.read().contains_key(locator)
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// True when nothing has been uploaded
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

/// Fetches raw bytes for remote image references
#[async_trait::async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Fetch the full body at `url`
    async fn fetch(&self, url: &Url) -> Result<Bytes>;
}

/// Anonymous HTTP fetcher backed by reqwest
///
/// The client has no cookie store and never sends credentials.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher
    pub fn new(config: &DecoderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::decode(format!("Failed to fetch {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::decode(format!("Fetching {} returned {}", url, status)));
        }

        response
            .bytes()
            .await
            .map_err(|e| Error::decode(format!("Failed to read body of {}: {}", url, e)))
    }
}

/// Resolves image references to decoded pixels
pub struct ImageDecoder {
    config: DecoderConfig,
    blobs: BlobStore,
    fetcher: Arc<dyn RemoteFetcher>,
}

impl ImageDecoder {
    /// Create a decoder with the default HTTP fetcher
    pub fn new(config: DecoderConfig, blobs: BlobStore) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(&config)?);
        Ok(Self::with_fetcher(config, blobs, fetcher))
    }

    /// Create a decoder with a custom fetcher
    pub fn with_fetcher(
        config: DecoderConfig,
        blobs: BlobStore,
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> Self {
        Self {
            config,
            blobs,
            fetcher,
        }
    }

    /// Blob store this decoder reads uploads from
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Fetch and decode the image behind `reference`
    pub async fn decode(&self, reference: &ImageReference) -> Result<DecodedImage> {
        if reference.is_empty() {
            return Err(Error::decode("empty image reference"));
        }

        let start = Instant::now();
        let bytes = match reference {
            ImageReference::Blob(locator) => self
                .blobs
                .get(locator)
                .ok_or_else(|| Error::decode(format!("unknown blob {}", locator)))?,
            ImageReference::Url(url) => self.fetch_remote(url).await?,
        };
        let fetched_in = start.elapsed();

        let image = tokio::task::spawn_blocking(move || decode_bytes(&bytes))
            .await
            .map_err(|e| Error::decode(format!("Decode task failed: {}", e)))??;

        debug!(
            "Decoded {} into {}x{}x{} (fetch {}ms, total {}ms)",
            reference,
            image.width,
            image.height,
            image.channels,
            fetched_in.as_millis(),
            start.elapsed().as_millis()
        );

        Ok(image)
    }

    async fn fetch_remote(&self, url: &str) -> Result<Bytes> {
        let url = anonymous_url(url)?;

        match self.config.fetch_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), self.fetcher.fetch(&url))
                .await
                .map_err(|_| Error::decode(format!("Fetching {} timed out after {}s", url, secs)))?,
            None => self.fetcher.fetch(&url).await,
        }
    }
}

/// Parse an http(s) URL and strip any embedded credentials
pub fn anonymous_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| Error::decode(format!("Invalid image URL '{}': {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::decode(format!(
            "Unsupported URL scheme '{}'",
            url.scheme()
        )));
    }

    // Both setters only fail for cannot-be-a-base URLs, excluded by the scheme check
    let _ = url.set_username("");
    let _ = url.set_password(None);
    Ok(url)
}

/// Decode encoded image bytes into an interleaved pixel buffer
pub fn decode_bytes(bytes: &[u8]) -> Result<DecodedImage> {
    let format = image::guess_format(bytes)
        .map_err(|_| Error::decode("data is not a recognized image format"))?;
    let image = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| Error::decode(format!("Failed to decode {:?} image: {}", format, e)))?;

    Ok(to_decoded(image))
}

fn to_decoded(image: DynamicImage) -> DecodedImage {
    let color = image.color();
    let (width, height) = (image.width(), image.height());

    if color.has_alpha() {
        DecodedImage::new(width, height, 4, image.into_rgba8().into_raw())
    } else if !color.has_color() {
        DecodedImage::new(width, height, 1, image.into_luma8().into_raw())
    } else {
        DecodedImage::new(width, height, 3, image.into_rgb8().into_raw())
    }
}
