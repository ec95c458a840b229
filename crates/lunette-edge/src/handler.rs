use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderValue, ALLOW};
use http::{Method, StatusCode};
use tokio::fs;
use tracing::{debug, error};

use crate::error::{EdgeError, EdgeResult};
use crate::mime::{ContentTypeResolver, ContentTypeTable};
use crate::path::{extension_of, PathResolver, RootedPathResolver, DEFAULT_INDEX};
use crate::policy::{BodyInfo, DevResponsePolicy, ResponsePolicy};
use crate::request::EdgeRequest;
use crate::response::EdgeResponse;

const ERROR_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Answers one request. Implementations translate every failure into a response.
#[async_trait]
pub trait ServeHandler: Send + Sync {
    async fn handle(&self, request: EdgeRequest) -> EdgeResponse;
}

/// What the static handler serves and from where.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub root: PathBuf,
    pub index: String,
    /// Lowercase extensions with a leading dot. `None` serves every extension.
    pub allowed_extensions: Option<BTreeSet<String>>,
    /// Files or directories never served even when inside the root, such as
    /// TLS key material. Relative entries are relative to the root.
    pub hidden: Vec<PathBuf>,
}

impl SiteConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: DEFAULT_INDEX.to_string(),
            allowed_extensions: None,
            hidden: Vec::new(),
        }
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    /// Restrict served files to the given extensions. Accepts `glb`, `.glb`
    /// or `.GLB` alike.
    pub fn with_allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions = Some(
            extensions
                .into_iter()
                .map(|ext| normalize_extension(ext.as_ref()))
                .collect(),
        );
        self
    }

    pub fn with_hidden(mut self, path: impl Into<PathBuf>) -> Self {
        self.hidden.push(path.into());
        self
    }
}

pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

/// GET/OPTIONS handler over a directory, composed from a path resolver, a
/// content-type resolver and a response policy.
pub struct StaticSiteHandler {
    resolver: Arc<dyn PathResolver>,
    content_types: Arc<dyn ContentTypeResolver>,
    policy: Arc<dyn ResponsePolicy>,
    canonical_root: PathBuf,
    index: String,
    allowed_extensions: Option<BTreeSet<String>>,
    hidden: Vec<PathBuf>,
}

impl std::fmt::Debug for StaticSiteHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSiteHandler")
            .field("root", &self.canonical_root)
            .field("index", &self.index)
            .field("allowed_extensions", &self.allowed_extensions)
            .field("hidden", &self.hidden)
            .finish()
    }
}

impl StaticSiteHandler {
    /// Handler with the built-in resolver, content-type table and dev policy.
    pub fn new(site: SiteConfig) -> std::io::Result<Self> {
        let canonical = std::fs::canonicalize(&site.root)?;
        let resolver = Arc::new(RootedPathResolver::new(canonical.clone(), site.index.clone()));
        Ok(Self::with_components(
            site,
            canonical,
            resolver,
            Arc::new(ContentTypeTable::builtin()),
            Arc::new(DevResponsePolicy::new()),
        ))
    }

    pub fn with_components(
        site: SiteConfig,
        canonical_root: PathBuf,
        resolver: Arc<dyn PathResolver>,
        content_types: Arc<dyn ContentTypeResolver>,
        policy: Arc<dyn ResponsePolicy>,
    ) -> Self {
        let hidden = site
            .hidden
            .iter()
            .map(|path| {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    canonical_root.join(path)
                };
                // May not exist yet: certificates are provisioned after binding.
                std::fs::canonicalize(&path).unwrap_or(path)
            })
            .collect();
        Self {
            resolver,
            content_types,
            policy,
            canonical_root,
            index: site.index,
            allowed_extensions: site.allowed_extensions,
            hidden,
        }
    }

    pub fn root(&self) -> &Path {
        &self.canonical_root
    }

    async fn serve_get(&self, request: &EdgeRequest) -> EdgeResult<EdgeResponse> {
        let resolved = self.resolver.resolve(request.target())?;
        let not_found = || EdgeError::NotFound(request.target().to_string());

        let mut path = resolved.filesystem_path;
        let mut metadata = fs::metadata(&path).await.map_err(|_| not_found())?;
        if metadata.is_dir() {
            path.push(&self.index);
            metadata = fs::metadata(&path).await.map_err(|_| not_found())?;
        }
        if !metadata.is_file() {
            return Err(not_found());
        }

        // Symlinks inside the root may still point outside of it.
        let canonical = fs::canonicalize(&path).await.map_err(|_| not_found())?;
        if !canonical.starts_with(&self.canonical_root) {
            return Err(EdgeError::InvalidPath(request.target().to_string()));
        }
        if self.hidden.iter().any(|hidden| canonical.starts_with(hidden)) {
            return Err(not_found());
        }

        let extension = extension_of(&path);
        if let Some(allowed) = &self.allowed_extensions {
            if !allowed.contains(&extension) {
                return Err(EdgeError::DisallowedExtension(extension));
            }
        }

        let bytes = fs::read(&canonical).await.map_err(|source| EdgeError::Read {
            path: canonical.display().to_string(),
            source,
        })?;
        let content_type = self.content_types.mime_type_for(&path);
        let headers = self.policy.headers_for(
            request.method(),
            Some(BodyInfo {
                content_type: &content_type,
                content_length: bytes.len() as u64,
            }),
        );
        Ok(EdgeResponse::with_headers(StatusCode::OK, headers).with_body(Bytes::from(bytes)))
    }

    fn preflight(&self) -> EdgeResponse {
        EdgeResponse::with_headers(
            StatusCode::OK,
            self.policy.headers_for(&Method::OPTIONS, None),
        )
    }

    fn error_response(&self, request: &EdgeRequest, err: EdgeError) -> EdgeResponse {
        match &err {
            EdgeError::Read { .. } => {
                error!(target: "lunette::http", error = %err, "I/O error while serving request")
            }
            other => debug!(target: "lunette::http", error = %other, "request rejected"),
        }

        let message = err.public_message();
        let headers = self.policy.headers_for(
            request.method(),
            Some(BodyInfo {
                content_type: ERROR_CONTENT_TYPE,
                content_length: message.len() as u64,
            }),
        );
        let mut response = EdgeResponse::with_headers(err.status_code(), headers)
            .with_body(Bytes::from_static(message.as_bytes()));
        if matches!(err, EdgeError::MethodNotAllowed(_)) {
            response.set_header(ALLOW, HeaderValue::from_static("GET, OPTIONS"));
        }
        response
    }
}

#[async_trait]
impl ServeHandler for StaticSiteHandler {
    async fn handle(&self, request: EdgeRequest) -> EdgeResponse {
        match *request.method() {
            Method::GET => match self.serve_get(&request).await {
                Ok(response) => response,
                Err(err) => self.error_response(&request, err),
            },
            Method::OPTIONS => self.preflight(),
            ref other => {
                let err = EdgeError::MethodNotAllowed(other.to_string());
                self.error_response(&request, err)
            }
        }
    }
}
