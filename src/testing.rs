//! Test doubles: a scripted registry client for engine tests and a fake
//! HTTP registry for the OCI client

use crate::artifact::Coordinates;
use crate::error::Result;
use crate::registry::manifest::{ImageManifest, MediaType};
use crate::registry::{Credential, Descriptor, RegistryClient, TransportError};
use crate::store::{compute_digest, ContentStore};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const TITLE: &str = "db.example.org";
pub const CONTENT: &[u8] = b"$ORIGIN example.org.\n@ 3600 IN SOA ns1 admin 1 7200 900 1209600 300\n";
pub const EMPTY_CONFIG: &[u8] = b"{}";

/// What one `copy` call does
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Write the artifact and return its manifest descriptor
    Ok,
    /// Fail with a transport error
    Fail(TransportError),
    /// Never complete
    Hang,
    /// Report success without writing anything
    Lie,
}

impl Outcome {
    pub fn status(code: u16) -> Self {
        Outcome::Fail(TransportError::Status {
            status: code,
            url: "https://ghcr.io/v2/owner/zones/manifests/1.0".to_string(),
            message: String::new(),
            retry_after: None,
        })
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        Outcome::Fail(TransportError::Status {
            status: 429,
            url: "https://ghcr.io/v2/owner/zones/manifests/1.0".to_string(),
            message: "too many requests".to_string(),
            retry_after: Some(retry_after),
        })
    }
}

#[derive(Debug, Default)]
struct State {
    /// Remaining outcomes; an empty script succeeds
    script: VecDeque<Outcome>,
    calls: Vec<Instant>,
    credential: Option<Credential>,
    plain_http: bool,
}

/// Fake [`RegistryClient`] replaying a script of outcomes.
///
/// Clones share state, so a test keeps one handle while the artifact owns another.
#[derive(Debug, Clone, Default)]
pub struct ScriptedClient {
    state: Arc<Mutex<State>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<Outcome>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                script: script.into(),
                ..State::default()
            })),
        }
    }

    /// Connector for [`crate::Artifact::prepare_with`]
    pub fn connector(&self) -> impl FnOnce(&Coordinates) -> Result<Box<dyn RegistryClient>> {
        let client = self.clone();
        move |_: &Coordinates| Ok(Box::new(client) as Box<dyn RegistryClient>)
    }

    /// Times at which `copy` was called
    pub fn calls(&self) -> Vec<Instant> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn credential(&self) -> Option<Credential> {
        self.state.lock().unwrap().credential.clone()
    }

    pub fn plain_http(&self) -> bool {
        self.state.lock().unwrap().plain_http
    }

    fn next_outcome(&self) -> Outcome {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Instant::now());
        state.script.pop_front().unwrap_or(Outcome::Ok)
    }
}

/// Manifest bytes and descriptor for the scripted artifact
pub fn artifact_manifest() -> (Vec<u8>, Descriptor, Descriptor) {
    let layer = Descriptor::new(
        "text/dns",
        compute_digest(CONTENT),
        CONTENT.len() as u64,
    )
    .with_title(TITLE);

    let config_bytes = EMPTY_CONFIG;
    let manifest = ImageManifest {
        schema_version: 2,
        media_type: Some(MediaType::OciManifest.to_string()),
        artifact_type: Some("application/vnd.example.zone".to_string()),
        config: Descriptor::new(
            "application/vnd.oci.empty.v1+json",
            compute_digest(config_bytes),
            config_bytes.len() as u64,
        ),
        layers: vec![layer.clone()],
        annotations: None,
    };

    let bytes = serde_json::to_vec(&manifest).unwrap();
    let root = Descriptor::new(
        MediaType::OciManifest.to_string(),
        compute_digest(&bytes),
        bytes.len() as u64,
    );
    (bytes, root, layer)
}

#[async_trait]
impl RegistryClient for ScriptedClient {
    fn authenticate(&mut self, credential: Credential) {
        self.state.lock().unwrap().credential = Some(credential);
    }

    fn set_plain_http(&mut self, plain_http: bool) {
        self.state.lock().unwrap().plain_http = plain_http;
    }

    async fn copy(&self, _reference: &str, store: &mut dyn ContentStore) -> Result<Descriptor> {
        let outcome = self.next_outcome();
        let (bytes, root, layer) = artifact_manifest();

        match outcome {
            Outcome::Ok => {
                store.push(&layer, CONTENT)?;
                store.push(&root, &bytes)?;
                Ok(root)
            }
            Outcome::Fail(e) => Err(e.into()),
            Outcome::Hang => std::future::pending::<Result<Descriptor>>().await,
            Outcome::Lie => Ok(root),
        }
    }
}

/// Canned HTTP response served by [`FakeRegistry`]
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Reply {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// Request line and auth header seen by [`FakeRegistry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Path without the query string
    pub path: String,
    pub authorization: Option<String>,
}

type Handler = Box<dyn Fn(&Request) -> Reply + Send + Sync>;

/// Path -> handler table; unknown paths get a 404
#[derive(Default)]
pub struct Routes {
    handlers: HashMap<String, Handler>,
}

impl Routes {
    pub fn reply(self, path: impl Into<String>, reply: Reply) -> Self {
        self.handle(path, move |_| reply.clone())
    }

    pub fn handle<F>(mut self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        self.handlers.insert(path.into(), Box::new(handler));
        self
    }

    fn dispatch(&self, request: &Request) -> Reply {
        match self.handlers.get(&request.path) {
            Some(handler) => handler(request),
            None => Reply::status(404),
        }
    }
}

/// Minimal HTTP/1.1 registry on a loopback port.
///
/// Every response closes its connection, so each request arrives on a fresh
/// socket and is recorded in order.
pub struct FakeRegistry {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Request>>>,
    task: JoinHandle<()>,
}

impl FakeRegistry {
    /// Bind a loopback port and serve the routes built from its address
    pub async fn start<F>(routes: F) -> Self
    where
        F: FnOnce(SocketAddr) -> Routes,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes = Arc::new(routes(addr));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let seen = requests.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = routes.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, &routes, &seen).await;
                });
            }
        });

        Self {
            addr,
            requests,
            task,
        }
    }

    /// `host:port` usable as the registry part of a reference
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests made to `path`
    pub fn hits(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }
}

impl Drop for FakeRegistry {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, routes: &Routes, seen: &Mutex<Vec<Request>>) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);

    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let target = line.split_whitespace().nth(1).unwrap_or("/");
    let path = target.split('?').next().unwrap_or("/").to_string();

    let mut authorization = None;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await? == 0 {
            break;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("authorization") {
                authorization = Some(value.trim().to_string());
            }
        }
    }

    let request = Request {
        path,
        authorization,
    };
    seen.lock().unwrap().push(request.clone());
    let reply = routes.dispatch(&request);

    let mut head = format!(
        "HTTP/1.1 {} Fake\r\ncontent-length: {}\r\nconnection: close\r\n",
        reply.status,
        reply.body.len()
    );
    for (name, value) in &reply.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("\r\n");

    let mut stream = reader.into_inner();
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&reply.body).await?;
    stream.shutdown().await
}
