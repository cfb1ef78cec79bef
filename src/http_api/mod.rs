mod handlers;
mod responses;

pub use handlers::Query;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::{header, Method, Request, Response, StatusCode};
use tracing::{debug, warn};

use crate::error::Error;
use crate::vfs::TreeFs;

/// JSON API over a [`TreeFs`].
#[derive(Debug, Clone)]
pub struct HttpApiService {
    fs: TreeFs,
    max_body: usize,
}

impl HttpApiService {
    pub fn new(fs: TreeFs, max_body: usize) -> Self {
        Self { fs, max_body }
    }

    /// Main request handler
    pub async fn handle_request<B>(
        &self,
        req: Request<B>,
    ) -> Result<Response<Full<Bytes>>, std::convert::Infallible>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let response = self.route_request(req).await;
        debug!(%method, %path, status = response.status().as_u16(), "request handled");
        Ok(response)
    }

    async fn route_request<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();
        let query = Query::parse(parts.uri.query());
        let path = parts.uri.path();
        let mime_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let fs = &self.fs;

        match (&parts.method, segments.as_slice()) {
            (&Method::GET, ["health"]) => self.handle_health(),
            (&Method::GET, ["api", "v1", "roots"]) => handlers::list_roots(fs).await,
            (&Method::POST, ["api", "v1", "roots"]) => handlers::create_root(fs, &query).await,
            (&Method::GET, ["api", "v1", "alias"]) => handlers::alias(fs, &query).await,
            (&Method::GET, ["api", "v1", "files", id]) => {
                handlers::inspect(fs, &decode_segment(id), &query).await
            }
            (&Method::DELETE, ["api", "v1", "files", id]) => {
                handlers::destroy(fs, &decode_segment(id)).await
            }
            (&Method::GET, ["api", "v1", "files", id, "read"]) => {
                handlers::read(fs, &decode_segment(id)).await
            }
            (&Method::GET, ["api", "v1", "files", id, "search"]) => {
                handlers::search(fs, &decode_segment(id), &query).await
            }
            (&Method::GET, ["api", "v1", "files", id, "download"]) => {
                handlers::download(fs, &decode_segment(id)).await
            }
            (&Method::POST, ["api", "v1", "files", id, "children"]) => {
                match self.read_body(body).await {
                    Ok(bytes) => {
                        handlers::create(fs, &decode_segment(id), &query, mime_type.as_deref(), bytes)
                            .await
                    }
                    Err(e) => responses::error_response(&e),
                }
            }
            (&Method::PUT, ["api", "v1", "files", id, "content"]) => {
                match self.read_body(body).await {
                    Ok(bytes) => {
                        handlers::update(fs, &decode_segment(id), &query, mime_type.as_deref(), bytes)
                            .await
                    }
                    Err(e) => responses::error_response(&e),
                }
            }
            (&Method::POST, ["api", "v1", "files", id, "rename"]) => {
                handlers::rename(fs, &decode_segment(id), &query).await
            }
            (&Method::POST, ["api", "v1", "files", id, "move"]) => {
                handlers::move_to(fs, &decode_segment(id), &query).await
            }
            (&Method::POST, ["api", "v1", "files", id, "copy"]) => {
                handlers::copy(fs, &decode_segment(id), &query).await
            }
            (&Method::GET, ["blobs", bucket, id]) => {
                handlers::blob(fs, bucket, &decode_segment(id)).await
            }
            _ => responses::not_found(),
        }
    }

    fn handle_health(&self) -> Response<Full<Bytes>> {
        let health = serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
        });
        responses::json_response(StatusCode::OK, &health)
    }

    async fn read_body<B>(&self, body: B) -> Result<Bytes, Error>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match Limited::new(body, self.max_body).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                Err(Error::RequestDataTooLarge {
                    size: self.max_body + 1,
                    limit: self.max_body,
                })
            }
            Err(e) => {
                warn!(error = %e, "failed to read request body");
                Err(Error::InvalidParameters("unreadable request body".to_string()))
            }
        }
    }
}

fn decode_segment(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}
