//! Registry Client Implementation
//!
//! Implements the read side of the OCI Distribution API:
//! - GET /v2/<name>/manifests/<reference> - Get manifest
//! - GET /v2/<name>/blobs/<digest> - Get blob

use crate::artifact::Coordinates;
use crate::error::{Result, SyncError};
use crate::registry::auth::{Credential, RegistryAuth};
use crate::registry::manifest::{parse_manifest, Descriptor, ManifestKind, MediaType};
use crate::registry::{RegistryClient, TransportError};
use crate::store::{compute_digest, ContentStore};
use crate::sync::retry::{retry_with_backoff, RetryPolicy, TransportOutcome};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, RETRY_AFTER, USER_AGENT, WARNING, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

/// Longest error body kept in a status error
const MAX_ERROR_BODY: usize = 512;

type CopyFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Response body with the headers the client cares about
struct Fetched {
    body: Vec<u8>,
    content_type: Option<String>,
    content_digest: Option<String>,
}

/// OCI Distribution client bound to one repository
pub struct OciRegistryClient {
    /// HTTP client
    http: reqwest::Client,

    /// Authentication manager
    auth: RegistryAuth,

    coordinates: Coordinates,

    /// Per-request retry policy
    policy: RetryPolicy,

    plain_http: bool,

    /// User agent string
    user_agent: String,
}

impl std::fmt::Debug for OciRegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OciRegistryClient")
            .field("coordinates", &self.coordinates)
            .field("policy", &self.policy)
            .field("plain_http", &self.plain_http)
            .field("authenticated", &self.auth.has_credential())
            .finish()
    }
}

impl OciRegistryClient {
    /// Create a client for the repository named by `coordinates`
    pub fn new(coordinates: &Coordinates) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| SyncError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            auth: RegistryAuth::anonymous(coordinates.api_host(), http.clone()),
            http,
            coordinates: coordinates.clone(),
            policy: RetryPolicy::default(),
            plain_http: false,
            user_agent: format!("quilt-oci-sync/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn coordinates(&self) -> &Coordinates {
        &self.coordinates
    }

    pub fn is_plain_http(&self) -> bool {
        self.plain_http
    }

    /// Base URL of the registry API
    pub fn endpoint(&self) -> String {
        let scheme = if self.plain_http { "http" } else { "https" };
        format!("{}://{}", scheme, self.coordinates.api_host())
    }

    fn manifest_url(&self, reference: &str) -> String {
        format!(
            "{}/v2/{}/manifests/{}",
            self.endpoint(),
            self.coordinates.repository,
            reference
        )
    }

    fn blob_url(&self, digest: &str) -> String {
        format!(
            "{}/v2/{}/blobs/{}",
            self.endpoint(),
            self.coordinates.repository,
            digest
        )
    }

    /// Get a manifest by tag or digest, returning its bytes and descriptor
    pub async fn get_manifest(&self, reference: &str) -> Result<(Vec<u8>, Descriptor)> {
        let url = self.manifest_url(reference);
        let fetched = self.get(&url, &MediaType::manifest_accept_header()).await?;

        let digest = compute_digest(&fetched.body);

        if reference.contains(':') && reference != digest {
            return Err(SyncError::Verification(format!(
                "manifest {} has digest {}",
                reference, digest
            )));
        }
        if let Some(advertised) = fetched
            .content_digest
            .as_deref()
            .filter(|d| d.starts_with("sha256:"))
        {
            if advertised != digest {
                return Err(SyncError::Verification(format!(
                    "registry advertised {} for {} but content hashes to {}",
                    advertised, url, digest
                )));
            }
        }

        let media_type = match fetched.content_type.as_deref() {
            Some(ct) if ct != "application/json" && !ct.is_empty() => ct.to_string(),
            _ => match parse_manifest(&fetched.body)? {
                ManifestKind::Image(m) => m
                    .media_type
                    .unwrap_or_else(|| MediaType::OciManifest.to_string()),
                ManifestKind::Index(i) => i
                    .media_type
                    .unwrap_or_else(|| MediaType::OciIndex.to_string()),
            },
        };

        let size = fetched.body.len() as u64;
        Ok((fetched.body, Descriptor::new(media_type, digest, size)))
    }

    /// Get a blob and verify it against its descriptor
    pub async fn get_blob(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        let url = self.blob_url(&descriptor.digest);
        let fetched = self.get(&url, "*/*").await?;

        let actual = compute_digest(&fetched.body);
        if actual != descriptor.digest {
            return Err(SyncError::Verification(format!(
                "Digest mismatch: expected {}, got {}",
                descriptor.digest, actual
            )));
        }

        Ok(fetched.body)
    }

    /// GET with per-request retries
    async fn get(&self, url: &str, accept: &str) -> std::result::Result<Fetched, TransportError> {
        let policy = self.policy;

        retry_with_backoff(
            |_| self.get_once(url, accept),
            policy.max_attempts(),
            |attempt, e| policy.next_wait(attempt - 1, TransportOutcome::Error(e)),
            url,
        )
        .await
        .map(|(fetched, _)| fetched)
        .map_err(|failure| failure.error)
    }

    /// One authenticated GET, answering a single auth challenge
    async fn get_once(&self, url: &str, accept: &str) -> std::result::Result<Fetched, TransportError> {
        let repository = &self.coordinates.repository;

        let mut request = self.request(url, accept);
        if let Some(authorization) = self.auth.cached(repository) {
            request = authorization.apply(request);
        }

        let mut response = request.send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|h| h.to_str().ok())
                .map(|s| s.to_string())
                .ok_or_else(|| TransportError::Status {
                    status: StatusCode::UNAUTHORIZED.as_u16(),
                    url: url.to_string(),
                    message: "no WWW-Authenticate header".to_string(),
                    retry_after: None,
                })?;

            tracing::debug!("{} requested authentication", self.auth.registry());
            let authorization = self.auth.authorize(&challenge, repository).await?;
            response = authorization.apply(self.request(url, accept)).send().await?;
        }

        forward_warnings(url, response.headers());

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let message = truncate_body(response.text().await.unwrap_or_default());
            return Err(TransportError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                message,
                retry_after,
            });
        }

        let content_type = header_string(response.headers(), CONTENT_TYPE.as_str());
        let content_digest = header_string(response.headers(), DOCKER_CONTENT_DIGEST);
        let body = response.bytes().await?.to_vec();

        Ok(Fetched {
            body,
            content_type,
            content_digest,
        })
    }

    fn request(&self, url: &str, accept: &str) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, accept)
    }

    /// Copy the graph below `node` into `store`, writing `node` itself last
    fn copy_node<'a>(
        &'a self,
        node: Descriptor,
        content: Vec<u8>,
        store: &'a mut dyn ContentStore,
    ) -> CopyFuture<'a> {
        Box::pin(async move {
            match parse_manifest(&content)? {
                ManifestKind::Image(manifest) => {
                    for blob in manifest.blobs() {
                        if store.exists(blob)? {
                            tracing::debug!("Blob {} already present, skipping", blob.digest);
                            continue;
                        }
                        let data = self.get_blob(blob).await?;
                        store.push(blob, &data)?;
                    }
                }
                ManifestKind::Index(index) => {
                    for child in index.manifests {
                        if store.exists(&child)? {
                            continue;
                        }
                        let (bytes, _) = self.get_manifest(&child.digest).await?;
                        self.copy_node(child, bytes, &mut *store).await?;
                    }
                }
            }

            store.push(&node, &content)?;
            Ok(())
        })
    }
}

#[async_trait]
impl RegistryClient for OciRegistryClient {
    fn authenticate(&mut self, credential: Credential) {
        self.auth = RegistryAuth::with_credential(
            self.coordinates.api_host(),
            credential,
            self.http.clone(),
        );
    }

    fn set_plain_http(&mut self, plain_http: bool) {
        self.plain_http = plain_http;
    }

    async fn copy(&self, reference: &str, store: &mut dyn ContentStore) -> Result<Descriptor> {
        let (bytes, root) = self.get_manifest(reference).await?;
        tracing::debug!(
            "Resolved {}/{}:{} to {}",
            self.coordinates.registry,
            self.coordinates.repository,
            reference,
            root.digest
        );

        self.copy_node(root.clone(), bytes, store).await?;
        Ok(root)
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Cut an error body to [`MAX_ERROR_BODY`] bytes without splitting a character
fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

/// `Retry-After` as delta-seconds or an HTTP date
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = header_string(headers, RETRY_AFTER.as_str())?;

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = chrono::DateTime::parse_from_rfc2822(&value).ok()?;
    (at.with_timezone(&chrono::Utc) - chrono::Utc::now())
        .to_std()
        .ok()
}

/// Text of a `Warning: 299 - "text"` header
fn parse_warning(value: &str) -> Option<String> {
    let mut parts = value.splitn(3, ' ');
    let code = parts.next()?;
    if code != "299" {
        return None;
    }
    let _agent = parts.next()?;
    let text = parts.next()?.trim();
    let text = text.strip_prefix('"')?;
    let end = text.find('"')?;
    Some(text[..end].to_string())
}

fn forward_warnings(url: &str, headers: &HeaderMap) {
    for value in headers.get_all(WARNING) {
        if let Some(text) = value.to_str().ok().and_then(parse_warning) {
            tracing::warn!("Registry warning for {}: {}", url, text);
        }
    }
}
