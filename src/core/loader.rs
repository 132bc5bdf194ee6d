//! Image sources and decoding.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use base64::Engine as _;
use bytes::Bytes;
use image::DynamicImage;
use reqwest::Url;

use crate::error::{AppError, Result};

/// Default cap on the encoded size of a single image.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;
/// Default timeout for fetching a remote image.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Where an image comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Encoded bytes supplied by the caller.
    Inline {
        /// Raw encoded image (PNG, JPEG, ...).
        bytes: Bytes,
        /// Media type from a data URI or upload, if known.
        media_type: Option<String>,
    },
    /// An `http` or `https` URL.
    Remote(Url),
    /// A file on the local filesystem.
    File(PathBuf),
}

impl ImageSource {
    /// Inline source from raw encoded bytes.
    pub fn inline(bytes: impl Into<Bytes>) -> Self {
        ImageSource::Inline {
            bytes: bytes.into(),
            media_type: None,
        }
    }

    /// Parse a `data:` URI of the form `data:<mime>;base64,<payload>`.
    pub fn from_data_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| AppError::ImageDecode("not a data URI".to_string()))?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| AppError::ImageDecode("data URI has no payload".to_string()))?;

        let mut parts = meta.split(';');
        let media_type = parts
            .next()
            .filter(|m| !m.is_empty())
            .map(str::to_ascii_lowercase);
        if !parts.any(|p| p.eq_ignore_ascii_case("base64")) {
            return Err(AppError::ImageDecode(
                "only base64-encoded data URIs are supported".to_string(),
            ));
        }

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| AppError::ImageDecode(format!("invalid base64 payload: {}", e)))?;

        Ok(ImageSource::Inline {
            bytes: Bytes::from(bytes),
            media_type,
        })
    }

    /// Parse a source supplied by a remote client.
    ///
    /// Only data URIs and `http(s)` URLs are accepted. Local paths and
    /// `file://` URLs are rejected without touching the filesystem.
    pub fn from_request_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let allowed = ["data:", "http://", "https://"];
        if !allowed.iter().any(|scheme| s.starts_with(scheme)) {
            return Err(AppError::InvalidInput(
                "image must be a data URI or an http(s) URL".to_string(),
            ));
        }
        s.parse()
    }

    /// Short description for logs; never includes inline payloads.
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Inline { bytes, media_type } => format!(
                "inline {} ({} bytes)",
                media_type.as_deref().unwrap_or("image"),
                bytes.len()
            ),
            ImageSource::Remote(url) => url.to_string(),
            ImageSource::File(path) => path.display().to_string(),
        }
    }
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageSource({})", self.describe())
    }
}

impl FromStr for ImageSource {
    type Err = AppError;

    /// Accepts a data URI, an `http(s)` URL, a `file://` URL or a plain path.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AppError::InvalidInput("empty image source".to_string()));
        }
        if s.starts_with("data:") {
            return Self::from_data_uri(s);
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            let url = Url::parse(s)
                .map_err(|e| AppError::ImageDecode(format!("invalid image URL: {}", e)))?;
            return Ok(ImageSource::Remote(url));
        }
        if s.starts_with("file://") {
            let path = Url::parse(s)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .ok_or_else(|| AppError::ImageDecode(format!("invalid file URL: {}", s)))?;
            return Ok(ImageSource::File(path));
        }
        Ok(ImageSource::File(PathBuf::from(s)))
    }
}

/// A fully decoded image, ready for preprocessing.
#[derive(Debug)]
pub struct DecodedImage {
    image: DynamicImage,
    fingerprint: Option<String>,
}

impl DecodedImage {
    /// Wrap an already decoded image.
    pub fn new(image: DynamicImage) -> Self {
        Self { image, fingerprint: None }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Number of color channels.
    pub fn channels(&self) -> u8 {
        self.image.color().channel_count()
    }

    /// Pixel buffer.
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// SHA3-256 of the encoded source bytes, when hashing is enabled.
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }
}

/// Turns an [`ImageSource`] into a [`DecodedImage`].
#[derive(Debug, Clone)]
pub struct ImageLoader {
    http: reqwest::Client,
    max_bytes: usize,
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), DEFAULT_MAX_IMAGE_BYTES)
    }
}

impl ImageLoader {
    /// Create a loader using `http` for remote sources.
    pub fn new(http: reqwest::Client, max_bytes: usize) -> Self {
        Self { http, max_bytes }
    }

    /// Build a loader with its own HTTP client and fetch timeout.
    pub fn with_timeout(timeout: Duration, max_bytes: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::new(http, max_bytes))
    }

    /// Fetch and decode an image.
    ///
    /// # Errors
    ///
    /// Every failure, from a network error to a corrupt header, is
    /// reported as `ImageDecode`.
    pub async fn load(&self, source: &ImageSource) -> Result<DecodedImage> {
        let bytes = self.read_bytes(source).await?;
        log::debug!("Decoding {}", source.describe());

        let decoded = tokio::task::spawn_blocking(move || decode(&bytes))
            .await
            .map_err(|e| AppError::ImageDecode(format!("decoder aborted: {}", e)))??;

        log::debug!(
            "Decoded {}x{} image with {} channels",
            decoded.width(),
            decoded.height(),
            decoded.channels()
        );
        Ok(decoded)
    }

    async fn read_bytes(&self, source: &ImageSource) -> Result<Bytes> {
        let bytes = match source {
            ImageSource::Inline { bytes, .. } => bytes.clone(),
            ImageSource::Remote(url) => self.fetch(url).await?,
            ImageSource::File(path) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|e| {
                    AppError::ImageDecode(format!("failed to read {}: {}", path.display(), e))
                })?,
        };

        if bytes.is_empty() {
            return Err(AppError::ImageDecode("image source is empty".to_string()));
        }
        self.check_size(bytes.len())?;
        Ok(bytes)
    }

    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        let mut response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AppError::ImageDecode(format!("failed to fetch {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::ImageDecode(format!(
                "failed to fetch {}: HTTP {}",
                url, status
            )));
        }
        if let Some(len) = response.content_length() {
            self.check_size(len as usize)?;
        }

        // The length header is optional, so the cap is enforced while reading.
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AppError::ImageDecode(format!("failed to read body of {}: {}", url, e)))?
        {
            self.check_size(body.len() + chunk.len())?;
            body.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(body))
    }

    fn check_size(&self, len: usize) -> Result<()> {
        if len > self.max_bytes {
            return Err(AppError::ImageDecode(format!(
                "image is {} bytes, limit is {}",
                len, self.max_bytes
            )));
        }
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> Result<DecodedImage> {
    let image = image::load_from_memory(bytes)?;

    #[cfg(feature = "hashing")]
    let fingerprint = Some(crate::core::hash::compute_sha3_256(bytes));
    #[cfg(not(feature = "hashing"))]
    let fingerprint = None;

    Ok(DecodedImage { image, fingerprint })
}
