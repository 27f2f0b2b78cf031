//! HTTP presentation layer
//!
//! Directory listings, media, NFO documents, thumbnails and the metadata
//! dump, all answered from the catalog held in `AppState`.

pub mod media;
pub mod nfo;

use actix_web::http::header;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use thiserror::Error;
use url::Url;

use crate::app_state::AppState;
use crate::catalog::codec;
use crate::catalog::CatalogError;
use crate::config::ServerConfig;
use crate::metadata::MetadataRecord;
use crate::storage::StorageError;

/// Realm announced in `WWW-Authenticate`
pub const AUTH_REALM: &str = "Access to list and stream titles";

lazy_static! {
    static ref HREF_BASE: Url = Url::parse("http://localhost/").unwrap();
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("unauthorized")]
    Unauthorized,

    #[error("will not serve subdir {0:?} in non-subdirs mode")]
    SubdirsDisabled(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("range not satisfiable for {0} bytes")]
    RangeNotSatisfiable(u64),
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Catalog(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Storage(StorageError::NotFound(_)) | ServiceError::Storage(StorageError::InvalidName(_)) => {
                StatusCode::NOT_FOUND
            }
            ServiceError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServiceError::SubdirsDisabled(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        match self {
            ServiceError::Unauthorized => {
                builder.insert_header((header::WWW_AUTHENTICATE, format!("Basic realm=\"{}\"", AUTH_REALM)));
            }
            ServiceError::RangeNotSatisfiable(size) => {
                builder.insert_header((header::CONTENT_RANGE, format!("bytes */{}", size)));
            }
            _ => {}
        }
        builder.body(self.to_string())
    }
}

/// Register every route. Expects `web::Data<AppState>` in the app data.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/infomap", web::get().to(infomap_handler))
        .route("/thumbs/{name:.*}", web::get().to(thumb_handler))
        .route("/thumbs/{name:.*}", web::head().to(thumb_handler))
        .route("/{path:.*}", web::get().to(path_handler))
        .route("/{path:.*}", web::head().to(path_handler));
}

fn basic_credentials(req: &HttpRequest) -> Option<(String, String)> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Enforce basic auth when both username and password are configured.
pub fn check_auth(req: &HttpRequest, config: &ServerConfig) -> Result<(), ServiceError> {
    let (want_user, want_password) = match config.basic_auth() {
        Some(creds) => creds,
        None => return Ok(()),
    };

    match basic_credentials(req) {
        Some((username, password)) if username == want_user && password == want_password => Ok(()),
        Some((username, _)) => {
            warn!(
                "Unauthorized access attempt from {} (username {})",
                req.peer_addr().map(|a| a.to_string()).unwrap_or_default(),
                username
            );
            Err(ServiceError::Unauthorized)
        }
        None => Err(ServiceError::Unauthorized),
    }
}

fn encode_segment(name: &str) -> String {
    let mut url = HREF_BASE.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.clear().push(name);
    }
    url.path().trim_start_matches('/').to_string()
}

/// HTML index of a directory
pub fn render_index(items: &[String]) -> String {
    let mut html = String::from(
        "<!DOCTYPE HTML PUBLIC \"-//W3C//DTD HTML 3.2 Final//EN\">\n<html>\n <head>\n  <title>Index</title>\n </head>\n <body>\n  <h1>Index</h1>\n  <ul>\n",
    );
    for item in items {
        let (name, slash) = match item.strip_suffix('/') {
            Some(dir) => (dir, "/"),
            None => (item.as_str(), ""),
        };
        let href = format!("{}{}", encode_segment(name), slash);
        html.push_str(&format!(
            "   <li><a href=\"{}\">{}</a></li>\n",
            nfo::escape_markup(&href),
            nfo::escape_markup(item)
        ));
    }
    html.push_str("  </ul>\n </body>\n</html>\n");
    html
}

async fn directory(state: &AppState, subdir: &str) -> Result<HttpResponse, ServiceError> {
    if !state.config.server.subdirs && !subdir.is_empty() {
        return Err(ServiceError::SubdirsDisabled(subdir.to_string()));
    }
    info!("Serving directory {:?}", subdir);

    let listing = state.catalog.list_entries(subdir, &state.shutdown).await?;
    let mut items = Vec::with_capacity(listing.entries.len() * 2 + listing.subdirs.len());
    for entry in listing.entries {
        items.push(entry.media_path);
        items.push(entry.nfo_path);
    }
    items.extend(listing.subdirs.into_iter().map(|s| format!("{}/", s)));

    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(render_index(&items)))
}

async fn nfo_document(state: &AppState, name: &str) -> Result<HttpResponse, ServiceError> {
    state.catalog.metadata_table_or_cached(&state.shutdown).await?;
    info!("Serving {}", name);

    let root_name = name.strip_suffix(".nfo").unwrap_or(name);
    let record = match state.catalog.record(root_name).await {
        Some(record) => record,
        None => MetadataRecord::untitled(root_name),
    };

    let body = nfo::render(&record);
    let etag = format!("\"{}\"", hex::encode(md5::compute(body.as_bytes()).0));
    Ok(HttpResponse::Ok()
        .content_type("application/xml")
        .insert_header((header::ETAG, etag))
        .body(body))
}

/// `/`, `/<subdir>`, `/<prefixed media or nfo>` and `/<subdir>/<prefixed ...>`
pub async fn path_handler(
    path: web::Path<String>,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, ServiceError> {
    let path = path.into_inner();
    let path = path.trim_matches('/');
    log_mdc::insert("path", path);
    check_auth(&req, &app_state.config.server)?;

    if path.is_empty() {
        return directory(&app_state, "").await;
    }

    let resolution = app_state.catalog.resolve(path, &app_state.shutdown).await?;
    debug!("Resolved {} to {:?}", path, resolution);
    if resolution.is_directory() {
        return directory(&app_state, &resolution.subdir).await;
    }

    let name = codec::strip_prefix(&resolution.key)
        .ok_or_else(|| ServiceError::NotFound(path.to_string()))?;
    if name.ends_with(".nfo") {
        return nfo_document(&app_state, name).await;
    }

    let verbose = app_state.config.server.verbose;
    let result = media::serve_object(app_state.catalog.store().as_ref(), name, &req, verbose).await;
    if verbose {
        if let Err(e) = &result {
            warn!("Error serving {}: {}", name, e);
        }
    }
    result
}

/// Proxied thumbnails: from the bucket when present, else a redirect to the source.
pub async fn thumb_handler(
    name: web::Path<String>,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, ServiceError> {
    let name = name.into_inner();
    log_mdc::insert("path", format!("thumbs/{}", name));
    check_auth(&req, &app_state.config.server)?;

    let catalog = &app_state.catalog;
    catalog.object_names_or_cached(&app_state.shutdown).await?;
    catalog.metadata_table_or_cached(&app_state.shutdown).await?;

    if catalog.has_object(&name).await {
        info!("Serving local thumb {}", name);
        return media::serve_object(catalog.store().as_ref(), &name, &req, false).await;
    }

    match catalog.thumb_source(&name).await {
        Some(source_url) => {
            info!("Redirecting /thumbs/{} to {}", name, source_url);
            Ok(HttpResponse::Found()
                .insert_header((header::LOCATION, source_url))
                .finish())
        }
        None => Err(ServiceError::NotFound(format!("/thumbs/{}", name))),
    }
}

/// JSON dump of the metadata table
pub async fn infomap_handler(req: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ServiceError> {
    log_mdc::insert("path", "infomap");
    check_auth(&req, &app_state.config.server)?;

    app_state.catalog.metadata_table_or_cached(&app_state.shutdown).await?;
    Ok(HttpResponse::Ok().json(app_state.catalog.table_snapshot().await))
}
