//! Registry Authentication
//!
//! Implements the registry challenge flow:
//! 1. Request to registry returns 401 with WWW-Authenticate header
//! 2. Parse scheme, realm, service and scope from the header
//! 3. Bearer: request a token from the auth server, using the static
//!    credential (if any) as basic auth. Basic: answer with the credential.
//! 4. Cache the result per repository for subsequent requests

use crate::registry::TransportError;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Token lifetime assumed when the auth server does not send `expires_in`
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60);

/// Registry credentials
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Neither username nor password set
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }

    /// Exactly one of username/password set
    pub fn is_partial(&self) -> bool {
        self.username.is_empty() != self.password.is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Authorization attached to registry requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Basic(Credential),
    Bearer(String),
}

impl Authorization {
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Authorization::Basic(cred) => request.basic_auth(&cred.username, Some(&cred.password)),
            Authorization::Bearer(token) => request.bearer_auth(token),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedAuthorization {
    authorization: Authorization,
    expires_at: Option<Instant>,
}

impl CachedAuthorization {
    fn is_valid(&self) -> bool {
        match self.expires_at {
            Some(expiry) => Instant::now() < expiry,
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Scheme {
    Basic,
    Bearer,
    Other(String),
}

/// Parsed WWW-Authenticate challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Challenge {
    pub scheme: Scheme,
    pub params: HashMap<String, String>,
}

/// Registry authentication manager for one registry host
pub struct RegistryAuth {
    registry: String,

    /// Static credential installed by login
    credential: Option<Credential>,

    /// Authorization per repository
    cache: RwLock<HashMap<String, CachedAuthorization>>,

    /// HTTP client used for token requests
    client: reqwest::Client,
}

impl RegistryAuth {
    /// Auth manager that can only answer anonymous bearer challenges
    pub fn anonymous(registry: &str, client: reqwest::Client) -> Self {
        Self {
            registry: registry.to_string(),
            credential: None,
            cache: RwLock::new(HashMap::new()),
            client,
        }
    }

    /// Auth manager with a static credential and an empty cache
    pub fn with_credential(registry: &str, credential: Credential, client: reqwest::Client) -> Self {
        Self {
            credential: Some(credential),
            ..Self::anonymous(registry, client)
        }
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    /// Still-valid authorization from an earlier challenge
    pub fn cached(&self, repository: &str) -> Option<Authorization> {
        let cache = self.cache.read().ok()?;
        cache
            .get(repository)
            .filter(|c| c.is_valid())
            .map(|c| c.authorization.clone())
    }

    /// Answer a challenge, caching the result for `repository`
    pub async fn authorize(
        &self,
        www_authenticate: &str,
        repository: &str,
    ) -> Result<Authorization, TransportError> {
        let challenge = parse_challenge(www_authenticate)?;

        let (authorization, ttl) = match &challenge.scheme {
            Scheme::Basic => {
                let credential = self.credential.clone().ok_or_else(|| {
                    TransportError::Auth(format!(
                        "{} requires basic authentication but no credential is configured",
                        self.registry
                    ))
                })?;
                (Authorization::Basic(credential), None)
            }
            Scheme::Bearer => {
                let (token, ttl) = self.request_token(&challenge).await?;
                (Authorization::Bearer(token), Some(ttl))
            }
            Scheme::Other(scheme) => {
                return Err(TransportError::Auth(format!(
                    "unsupported authentication scheme '{}'",
                    scheme
                )))
            }
        };

        let mut cache = self
            .cache
            .write()
            .map_err(|e| TransportError::Auth(format!("Failed to acquire write lock: {}", e)))?;
        cache.insert(
            repository.to_string(),
            CachedAuthorization {
                authorization: authorization.clone(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );

        Ok(authorization)
    }

    /// Request a token from the auth server
    async fn request_token(&self, challenge: &Challenge) -> Result<(String, Duration), TransportError> {
        let realm = challenge.params.get("realm").ok_or_else(|| {
            TransportError::Auth("Missing realm in WWW-Authenticate".to_string())
        })?;

        let mut request = self.client.get(realm);

        if let Some(service) = challenge.params.get("service").filter(|s| !s.is_empty()) {
            request = request.query(&[("service", service)]);
        }
        if let Some(scope) = challenge.params.get("scope").filter(|s| !s.is_empty()) {
            request = request.query(&[("scope", scope)]);
        }

        if let Some(cred) = &self.credential {
            request = request.basic_auth(&cred.username, Some(&cred.password));
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(TransportError::Status {
                status: response.status().as_u16(),
                url: realm.clone(),
                message: format!(
                    "token request failed: {}",
                    response.text().await.unwrap_or_default()
                ),
                retry_after: None,
            });
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            token: Option<String>,
            access_token: Option<String>,
            expires_in: Option<u64>,
        }

        let token_resp: TokenResponse = response.json().await?;

        let ttl = token_resp
            .expires_in
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL);

        token_resp
            .token
            .or(token_resp.access_token)
            .filter(|t| !t.is_empty())
            .map(|t| (t, ttl))
            .ok_or_else(|| TransportError::Auth("No token in response".to_string()))
    }
}

/// Parse a WWW-Authenticate header.
///
/// Quoted values may contain commas (`scope="repository:a:pull,push"`).
pub(crate) fn parse_challenge(header: &str) -> Result<Challenge, TransportError> {
    let header = header.trim();
    if header.is_empty() {
        return Err(TransportError::Auth(
            "Empty WWW-Authenticate header".to_string(),
        ));
    }

    let (scheme, rest) = header
        .split_once(char::is_whitespace)
        .unwrap_or((header, ""));

    let scheme = match scheme.to_ascii_lowercase().as_str() {
        "basic" => Scheme::Basic,
        "bearer" => Scheme::Bearer,
        _ => Scheme::Other(scheme.to_string()),
    };

    let mut params = HashMap::new();
    let mut chars = rest.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }

        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut escaped = false;
            for c in chars.by_ref() {
                match (escaped, c) {
                    (false, '\\') => escaped = true,
                    (false, '"') => break,
                    _ => {
                        value.push(c);
                        escaped = false;
                    }
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
            value = value.trim().to_string();
        }

        params.insert(key, value);
    }

    Ok(Challenge { scheme, params })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let header = r#"Bearer realm="https://ghcr.io/token",service="ghcr.io",scope="repository:owner/repo:pull""#;

        let challenge = parse_challenge(header).unwrap();

        assert_eq!(challenge.scheme, Scheme::Bearer);
        assert_eq!(
            challenge.params.get("realm"),
            Some(&"https://ghcr.io/token".to_string())
        );
        assert_eq!(challenge.params.get("service"), Some(&"ghcr.io".to_string()));
        assert_eq!(
            challenge.params.get("scope"),
            Some(&"repository:owner/repo:pull".to_string())
        );
    }

    #[test]
    fn test_parse_challenge_with_comma_in_scope() {
        let header = r#"Bearer realm="https://auth.example.com/token", scope="repository:a/b:pull,push""#;

        let challenge = parse_challenge(header).unwrap();

        assert_eq!(
            challenge.params.get("scope"),
            Some(&"repository:a/b:pull,push".to_string())
        );
    }

    #[test]
    fn test_parse_basic_challenge() {
        let challenge = parse_challenge(r#"Basic realm="Registry Realm""#).unwrap();
        assert_eq!(challenge.scheme, Scheme::Basic);
        assert_eq!(challenge.params.get("realm"), Some(&"Registry Realm".to_string()));
    }

    #[test]
    fn test_parse_empty_challenge_fails() {
        assert!(parse_challenge("   ").is_err());
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let cred = Credential::new("user", "DCKR_PAT_secret");
        let printed = format!("{:?}", cred);
        assert!(printed.contains("user"));
        assert!(!printed.contains("DCKR_PAT_secret"));
    }

    #[test]
    fn test_credential_partial() {
        assert!(Credential::new("user", "").is_partial());
        assert!(Credential::new("", "pass").is_partial());
        assert!(!Credential::new("user", "pass").is_partial());
        assert!(Credential::default().is_empty());
    }

    #[tokio::test]
    async fn test_basic_challenge_without_credential_fails() {
        let auth = RegistryAuth::anonymous("localhost:5000", reqwest::Client::new());
        let err = auth
            .authorize(r#"Basic realm="registry""#, "owner/repo")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Auth(_)));
        assert!(auth.cached("owner/repo").is_none());
    }

    #[tokio::test]
    async fn test_basic_challenge_is_cached() {
        let auth = RegistryAuth::with_credential(
            "localhost:5000",
            Credential::new("user", "pass"),
            reqwest::Client::new(),
        );
        let authorization = auth
            .authorize(r#"Basic realm="registry""#, "owner/repo")
            .await
            .unwrap();

        assert_eq!(
            authorization,
            Authorization::Basic(Credential::new("user", "pass"))
        );
        assert_eq!(auth.cached("owner/repo"), Some(authorization));
        assert!(auth.cached("other/repo").is_none());
    }
}
