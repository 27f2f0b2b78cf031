//! Streaming objects to clients with conditional and single-range support.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use actix_web::body::SizedStream;
use actix_web::http::header::{self, ByteRangeSpec, HttpDate, Range};
use actix_web::http::StatusCode;
use actix_web::{HttpMessage, HttpRequest, HttpResponse};
use bytes::Bytes;
use futures::Stream;
use log::info;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::service::ServiceError;
use crate::storage::{ByteRange, ByteStream, ObjectAttributes, ObjectStore, StorageResult};

/// Interval between progress lines of a verbose transfer
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(60);

/// MIME type by object extension
pub fn content_type(name: &str) -> &'static str {
    let (_, ext) = crate::catalog::codec::split_extension(name);
    match ext.to_ascii_lowercase().as_str() {
        ".mp4" | ".m4v" => "video/mp4",
        ".m2ts" => "video/mp2t",
        ".iso" => "application/x-iso9660-image",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".png" => "image/png",
        _ => "application/octet-stream",
    }
}

/// Weak validator built from name, size and modification time
pub fn etag(name: &str, attrs: &ObjectAttributes) -> String {
    let stamp = attrs.last_modified().map(|t| t.timestamp()).unwrap_or_default();
    let digest = md5::compute(format!("{}:{}:{}", name, attrs.size, stamp));
    format!("\"{}\"", hex::encode(digest.0))
}

/// Pick the byte range to serve. `Ok(None)` means the whole object.
fn requested_range(req: &HttpRequest, size: u64) -> Result<Option<ByteRange>, ServiceError> {
    let range = match req.get_header::<Range>() {
        Some(range) => range,
        None => return Ok(None),
    };
    let specs: Vec<ByteRangeSpec> = match range {
        Range::Bytes(specs) => specs,
        Range::Unregistered(..) => return Ok(None),
    };
    // Multiple ranges are answered with the whole object.
    if specs.len() != 1 {
        return Ok(None);
    }
    match specs[0].to_satisfiable_range(size) {
        Some((start, end)) => Ok(Some(ByteRange { start, end })),
        None => Err(ServiceError::RangeNotSatisfiable(size)),
    }
}

fn not_modified(req: &HttpRequest, etag: &str, attrs: &ObjectAttributes) -> bool {
    if let Some(tags) = req.headers().get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        return tags.split(',').any(|t| t.trim() == etag || t.trim() == "*");
    }
    let since = match req.get_header::<header::IfModifiedSince>() {
        Some(header::IfModifiedSince(since)) => since,
        None => return false,
    };
    match attrs.last_modified() {
        Some(modified) => HttpDate::from(std::time::SystemTime::from(modified)) <= since,
        None => false,
    }
}

/// Serve `name` from the store, honouring `Range` and conditional headers.
///
/// With `verbose` set, a timer task logs transfer progress until the body is
/// dropped.
pub async fn serve_object(
    store: &dyn ObjectStore,
    name: &str,
    req: &HttpRequest,
    verbose: bool,
) -> Result<HttpResponse, ServiceError> {
    let attrs = store.attributes(name).await?;
    let etag = etag(name, &attrs);

    let mut builder = HttpResponse::build(StatusCode::OK);
    builder
        .insert_header((header::ACCEPT_RANGES, "bytes"))
        .insert_header((header::ETAG, etag.clone()))
        .content_type(content_type(name));
    if let Some(modified) = attrs.last_modified() {
        builder.insert_header(header::LastModified(std::time::SystemTime::from(modified).into()));
    }

    if not_modified(req, &etag, &attrs) {
        return Ok(builder.status(StatusCode::NOT_MODIFIED).finish());
    }

    let range = requested_range(req, attrs.size)?;
    let length = match range {
        Some(range) => {
            builder.status(StatusCode::PARTIAL_CONTENT).insert_header((
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", range.start, range.end, attrs.size),
            ));
            range.len()
        }
        None => attrs.size,
    };

    let stream = store.read(name, range).await?;
    if verbose {
        info!("Serving {}", name);
        let stream = ProgressStream::start(name, stream);
        Ok(builder.body(SizedStream::new(length, stream)))
    } else {
        Ok(builder.body(SizedStream::new(length, stream)))
    }
}

/// Body wrapper counting bytes; a companion task logs the count every
/// `PROGRESS_INTERVAL` and once more when the body is dropped.
pub struct ProgressStream {
    inner: ByteStream,
    served: Arc<AtomicU64>,
    _done: DropGuard,
}

impl ProgressStream {
    pub fn start(name: &str, inner: ByteStream) -> Self {
        let served = Arc::new(AtomicU64::new(0));
        let done = CancellationToken::new();
        tokio::spawn(report_progress(name.to_string(), served.clone(), done.clone(), PROGRESS_INTERVAL));
        Self { inner, served, _done: done.drop_guard() }
    }
}

impl Stream for ProgressStream {
    type Item = StorageResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = self.inner.as_mut().poll_next(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &poll {
            self.served.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        }
        poll
    }
}

async fn report_progress(name: String, served: Arc<AtomicU64>, done: CancellationToken, every: Duration) {
    let start = Instant::now();
    let mut ticker = tokio::time::interval_at(start + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = done.cancelled() => {
                info!(
                    "Finished serving {}: {} bytes in {:?}",
                    name,
                    served.load(Ordering::Relaxed),
                    start.elapsed()
                );
                return;
            }
            _ = ticker.tick() => {
                info!(
                    "Still serving {}: {} bytes in {:?}",
                    name,
                    served.load(Ordering::Relaxed),
                    start.elapsed()
                );
            }
        }
    }
}
