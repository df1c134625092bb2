//! GET routing: a static table from path pattern to the kind of response.

use crate::config::PagesConfig;
use hyper::header::CONTENT_TYPE;
use hyper::{Response, StatusCode};
use percent_encoding::percent_decode_str;
use shared::http::{ResponseBody, full_body, make_boxed_error_response};
use std::path::{Component, Path, PathBuf};

const HTML: &str = "text/html";

static NOT_FOUND: RouteAction = RouteAction::NotFound;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathPattern {
    Exact(String),
    Any,
}

impl PathPattern {
    fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(expected) => expected == path,
            PathPattern::Any => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteAction {
    /// A page from the base directory, always served as HTML
    FixedPage(String),
    /// The request path itself, resolved under the base directory
    StaticFile,
    NotFound,
}

#[derive(Clone, Debug)]
pub struct Route {
    pub pattern: PathPattern,
    pub action: RouteAction,
}

#[derive(Clone, Debug)]
pub struct RouteTable {
    base_dir: PathBuf,
    error_page: String,
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_config(pages: &PagesConfig) -> Self {
        let mut routes = vec![
            Route {
                pattern: PathPattern::Exact("/".into()),
                action: RouteAction::FixedPage(pages.index.clone()),
            },
            Route {
                pattern: PathPattern::Exact(format!("/{}", pages.message)),
                action: RouteAction::FixedPage(pages.message.clone()),
            },
        ];
        if pages.serve_static {
            routes.push(Route {
                pattern: PathPattern::Any,
                action: RouteAction::StaticFile,
            });
        }

        Self {
            base_dir: pages.base_dir.clone(),
            error_page: pages.error.clone(),
            routes,
        }
    }

    /// First matching action; unmatched paths are not found.
    pub fn resolve(&self, path: &str) -> &RouteAction {
        self.routes
            .iter()
            .find(|route| route.pattern.matches(path))
            .map(|route| &route.action)
            .unwrap_or(&NOT_FOUND)
    }

    pub async fn respond(&self, path: &str) -> Response<ResponseBody> {
        let action = self.resolve(path);
        tracing::debug!(path, action = ?action, "Matched route");

        match action {
            RouteAction::FixedPage(file) => {
                let file_path = self.base_dir.join(file);
                match tokio::fs::read(&file_path).await {
                    Ok(bytes) => file_response(StatusCode::OK, HTML, bytes),
                    Err(e) => {
                        tracing::warn!(path = %file_path.display(), error = %e, "Fixed page unavailable");
                        self.not_found().await
                    }
                }
            }
            RouteAction::StaticFile => match self.static_file(path) {
                Some(file_path) => match tokio::fs::read(&file_path).await {
                    Ok(bytes) => file_response(StatusCode::OK, content_type_for(&file_path), bytes),
                    Err(_) => self.not_found().await,
                },
                None => self.not_found().await,
            },
            RouteAction::NotFound => self.not_found().await,
        }
    }

    /// Maps a request path onto a path below the base directory.
    ///
    /// Anything that is not a plain relative path (parent references, roots,
    /// prefixes) yields `None`.
    fn static_file(&self, request_path: &str) -> Option<PathBuf> {
        let decoded = percent_decode_str(request_path).decode_utf8().ok()?;
        let relative = Path::new(decoded.trim_start_matches('/'));

        if relative.as_os_str().is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }

        Some(self.base_dir.join(relative))
    }

    async fn not_found(&self) -> Response<ResponseBody> {
        let page = self.base_dir.join(&self.error_page);
        match tokio::fs::read(&page).await {
            Ok(bytes) => file_response(StatusCode::NOT_FOUND, HTML, bytes),
            Err(_) => make_boxed_error_response(StatusCode::NOT_FOUND),
        }
    }
}

fn file_response(status: StatusCode, content_type: &str, bytes: Vec<u8>) -> Response<ResponseBody> {
    let mut response = Response::new(full_body(bytes));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

/// Content type inferred from the file extension, `text/plain` when unknown.
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("js" | "mjs") => "text/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/vnd.microsoft.icon",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        _ => "text/plain",
    }
}
