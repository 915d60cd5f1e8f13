//! HTTP transport adapter (§4.1, §6.4, §6.5).
//!
//! `Transport` is the trait boundary the downloader is built against (§9
//! "polymorphism over transports"); `HttpTransport` is the sole production
//! implementation, covering HTTP/1.1 and HTTP/2 via `reqwest`. A URL whose
//! scheme this transport cannot speak (`ftp`, `ftps`, `sftp`) is rejected
//! with `DownloadError::UnsupportedProtocol` rather than silently attempted.

use crate::error::DownloadError;
use crate::metadata::{filename_from_url, parse_content_disposition, parse_http_date, normalize_etag};
use crate::tls::PinningVerifier;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

pub use crate::metadata::Metadata;

/// A lazily-pulled stream of body bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, DownloadError>> + Send>>;

/// TLS-specific configuration (§4.1).
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Custom CA bundle (PEM), replacing the default trust store.
    pub ca_bundle_pem: Option<Vec<u8>>,
    /// Client certificate + private key (PEM), for mutual TLS.
    pub client_identity_pem: Option<(Vec<u8>, Vec<u8>)>,
}

/// Configuration options for `HttpTransport` (§4.1, enumerated).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub headers: HashMap<String, String>,
    pub basic_auth: Option<(String, String)>,
    pub proxy: Option<String>,
    pub insecure_skip_verify: bool,
    pub tls_config: TlsConfig,
    pub force_http1: bool,
    pub force_http2: bool,
    pub pinned_public_key: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            user_agent: "burkut/0.1".to_string(),
            headers: HashMap::new(),
            basic_auth: None,
            proxy: None,
            insecure_skip_verify: false,
            tls_config: TlsConfig::default(),
            force_http1: false,
            force_http2: false,
            pinned_public_key: Vec::new(),
        }
    }
}

/// The capability set every protocol adapter exposes (HTTP/1.1, HTTP/2,
/// HTTP/3, and — out of scope for this crate — FTP/FTPS/SFTP).
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn head(&self, url: &str) -> Result<Metadata, DownloadError>;
    async fn get(&self, url: &str) -> Result<(ByteStream, Metadata), DownloadError>;
    async fn get_range(&self, url: &str, start: u64, end_inclusive: u64) -> Result<ByteStream, DownloadError>;
}

/// The HTTP/1.1 + HTTP/2 transport adapter.
pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
}

impl HttpTransport {
    /// Builds a transport from the given configuration.
    pub fn new(config: TransportConfig) -> Result<Self, DownloadError> {
        if config.force_http1 && config.force_http2 {
            return Err(DownloadError::InvalidInput(
                "force_http1 and force_http2 are mutually exclusive".to_string(),
            ));
        }

        let mut builder = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone());

        if config.force_http1 {
            builder = builder.http1_only();
        }
        if config.force_http2 {
            builder = builder.http2_prior_knowledge();
        }

        if let Some(proxy_url) = &config.proxy {
            // `reqwest::Proxy::all` dispatches to the SOCKS5 dialer
            // internally when the URL scheme is `socks5://`.
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| DownloadError::InvalidInput(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        builder = Self::apply_tls(builder, &config)?;

        let client = builder
            .build()
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn apply_tls(
        mut builder: reqwest::ClientBuilder,
        config: &TransportConfig,
    ) -> Result<reqwest::ClientBuilder, DownloadError> {
        if config.pinned_public_key.is_empty() {
            // No pinning requested: use reqwest's normal TLS handling.
            if config.insecure_skip_verify {
                builder = builder.danger_accept_invalid_certs(true);
            }
            if let Some(pem) = &config.tls_config.ca_bundle_pem {
                let cert = reqwest::Certificate::from_pem(pem)
                    .map_err(|e| DownloadError::Tls(format!("invalid CA bundle: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            if let Some((cert_pem, key_pem)) = &config.tls_config.client_identity_pem {
                let mut combined = cert_pem.clone();
                combined.extend_from_slice(key_pem);
                let identity = reqwest::Identity::from_pem(&combined)
                    .map_err(|e| DownloadError::Tls(format!("invalid client identity: {e}")))?;
                builder = builder.identity(identity);
            }
            return Ok(builder);
        }

        // Pinning requested: install a custom rustls verifier. If chain
        // verification is disabled, pinning is performed over the raw leaf
        // certificate only, per §4.1.
        let verifier = if config.insecure_skip_verify {
            PinningVerifier::pins_only(config.pinned_public_key.clone())
        } else {
            PinningVerifier::new(config.pinned_public_key.clone())?
        };

        let tls_config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();

        builder = builder
            .use_preconfigured_tls(tls_config)
            .map_err(|e| DownloadError::Tls(e.to_string()))?;

        Ok(builder)
    }

    fn build_request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, url)
            .header("Accept", "*/*")
            .header("Accept-Encoding", "identity");

        for (name, value) in &self.config.headers {
            req = req.header(name, value);
        }

        if let Some((user, pass)) = &self.config.basic_auth {
            req = req.basic_auth(user, Some(pass));
        }

        req
    }

    fn metadata_from_response(url: &str, response: &reqwest::Response) -> Metadata {
        let headers = response.headers();

        let filename = headers
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_disposition)
            .unwrap_or_else(|| filename_from_url(url));

        let accept_ranges = headers
            .get(reqwest::header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);

        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let last_modified = headers
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);

        let etag = headers
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(normalize_etag);

        let protocol = match response.version() {
            reqwest::Version::HTTP_09 => "HTTP/0.9",
            reqwest::Version::HTTP_10 => "HTTP/1.0",
            reqwest::Version::HTTP_11 => "HTTP/1.1",
            reqwest::Version::HTTP_2 => "HTTP/2.0",
            reqwest::Version::HTTP_3 => "HTTP/3.0",
            _ => "unknown",
        }
        .to_string();

        Metadata {
            url: url.to_string(),
            filename,
            content_length: response.content_length().unwrap_or(0),
            accept_ranges,
            content_type,
            last_modified,
            etag,
            protocol,
        }
    }

    fn validate_scheme(url: &str) -> Result<(), DownloadError> {
        let parsed = url::Url::parse(url).map_err(|e| DownloadError::InvalidInput(e.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => Err(DownloadError::UnsupportedProtocol(other.to_string())),
        }
    }

    fn status_to_error(status: StatusCode) -> DownloadError {
        match status.as_u16() {
            401 | 407 => DownloadError::Auth(format!("status {status}")),
            _ => DownloadError::Http { status: status.as_u16() },
        }
    }

    fn stream_body(response: reqwest::Response) -> ByteStream {
        Box::pin(
            response
                .bytes_stream()
                .map(|r| r.map_err(|e| DownloadError::Network(e.to_string()))),
        )
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn head(&self, url: &str) -> Result<Metadata, DownloadError> {
        Self::validate_scheme(url)?;

        let response = self
            .build_request(reqwest::Method::HEAD, url)
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(Self::status_to_error(response.status()));
        }

        if self.config.force_http2 && response.version() != reqwest::Version::HTTP_2 {
            return Err(DownloadError::Http { status: response.status().as_u16() });
        }

        Ok(Self::metadata_from_response(url, &response))
    }

    async fn get(&self, url: &str) -> Result<(ByteStream, Metadata), DownloadError> {
        Self::validate_scheme(url)?;

        let response = self
            .build_request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(Self::status_to_error(response.status()));
        }

        let metadata = Self::metadata_from_response(url, &response);
        Ok((Self::stream_body(response), metadata))
    }

    async fn get_range(&self, url: &str, start: u64, end_inclusive: u64) -> Result<ByteStream, DownloadError> {
        Self::validate_scheme(url)?;

        let response = self
            .build_request(reqwest::Method::GET, url)
            .header("Range", format!("bytes={start}-{end_inclusive}"))
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => Ok(Self::stream_body(response)),
            StatusCode::OK => Err(DownloadError::RangeUnsupported),
            other => Err(Self::status_to_error(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn head_parses_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/file.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Length", "16")
                    .insert_header("Accept-Ranges", "bytes")
                    .insert_header("ETag", "\"abc\""),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(TransportConfig::default()).unwrap();
        let url = format!("{}/file.bin", server.uri());
        let metadata = transport.head(&url).await.unwrap();

        assert_eq!(metadata.content_length, 16);
        assert!(metadata.accept_ranges);
        assert_eq!(metadata.etag.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn head_non_200_is_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(TransportConfig::default()).unwrap();
        let url = format!("{}/missing", server.uri());
        let err = transport.head(&url).await.unwrap_err();
        assert!(matches!(err, DownloadError::Http { status: 404 }));
    }

    #[tokio::test]
    async fn get_range_rejects_200_as_range_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/full.bin"))
            .and(header("Range", "bytes=0-4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"01234".to_vec()))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(TransportConfig::default()).unwrap();
        let url = format!("{}/full.bin", server.uri());
        let err = transport.get_range(&url, 0, 4).await.unwrap_err();
        assert!(matches!(err, DownloadError::RangeUnsupported));
    }

    #[tokio::test]
    async fn get_range_streams_exact_bytes_on_206() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/full.bin"))
            .and(header("Range", "bytes=0-4"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 0-4/16")
                    .set_body_bytes(b"01234".to_vec()),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(TransportConfig::default()).unwrap();
        let url = format!("{}/full.bin", server.uri());
        let mut stream = transport.get_range(&url, 0, 4).await.unwrap();

        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"01234");
    }

    #[tokio::test]
    async fn rejects_unsupported_protocol() {
        let transport = HttpTransport::new(TransportConfig::default()).unwrap();
        let err = transport.head("ftp://example.com/file").await.unwrap_err();
        assert!(matches!(err, DownloadError::UnsupportedProtocol(_)));
    }

    #[tokio::test]
    async fn force_http1_and_http2_is_rejected_at_construction() {
        let config = TransportConfig {
            force_http1: true,
            force_http2: true,
            ..TransportConfig::default()
        };
        assert!(HttpTransport::new(config).is_err());
    }
}
