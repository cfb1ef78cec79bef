use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::metastore::{FileRecord, RecordField};
use crate::tree::{SearchQuery, SortSpec};
use crate::vfs::{Flags, Placement, TreeFs};

use super::responses;

/// Decoded query string.
#[derive(Debug, Default)]
pub struct Query(Vec<(String, String)>);

impl Query {
    pub fn parse(query: Option<&str>) -> Self {
        let pairs = query
            .unwrap_or_default()
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|p| {
                let (key, value) = p.split_once('=').unwrap_or((p, ""));
                (decode(key), decode(value))
            })
            .collect();
        Self(pairs)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::InvalidParameters(format!("missing query parameter '{key}'")))
    }

    /// `?force`, `?force=true` and `?force=1` are all set.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("" | "true" | "1"))
    }

    fn parse_num(&self, key: &str) -> Result<Option<u64>> {
        self.get(key)
            .map(|v| {
                v.parse()
                    .map_err(|_| Error::InvalidParameters(format!("'{key}' must be a number")))
            })
            .transpose()
    }
}

fn decode(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    urlencoding::decode(&raw)
        .map(|v| v.into_owned())
        .unwrap_or(raw)
}

#[derive(Serialize)]
struct Removed {
    removed: Vec<String>,
}

#[derive(Serialize)]
struct Resolved {
    id: String,
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T>) -> Response<Full<Bytes>> {
    match result {
        Ok(data) => responses::json_response(status, &data),
        Err(e) => responses::error_response(&e),
    }
}

pub async fn list_roots(fs: &TreeFs) -> Response<Full<Bytes>> {
    respond(StatusCode::OK, fs.roots().await)
}

pub async fn create_root(fs: &TreeFs, query: &Query) -> Response<Full<Bytes>> {
    let result = match query.require("name") {
        Ok(name) => fs.create_root(name).await,
        Err(e) => Err(e),
    };
    respond(StatusCode::CREATED, result)
}

pub async fn alias(fs: &TreeFs, query: &Query) -> Response<Full<Bytes>> {
    let result = async {
        let root = query.require("root")?;
        let path = query.get("path").unwrap_or_default();
        let id = fs.alias(path, root).await?;
        Ok::<_, Error>(Resolved { id })
    }
    .await;
    respond(StatusCode::OK, result)
}

pub async fn inspect(fs: &TreeFs, id: &str, query: &Query) -> Response<Full<Bytes>> {
    let result = async {
        let fields = query
            .get("fields")
            .map(|list| {
                list.split(',')
                    .filter(|f| !f.is_empty())
                    .map(str::parse::<RecordField>)
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;
        fs.inspect(id, fields.as_deref()).await
    }
    .await;
    respond(StatusCode::OK, result)
}

pub async fn read(fs: &TreeFs, id: &str) -> Response<Full<Bytes>> {
    respond(StatusCode::OK, fs.read(id).await)
}

pub async fn create(
    fs: &TreeFs,
    parent_id: &str,
    query: &Query,
    mime_type: Option<&str>,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let result = async {
        let name = query.require("name")?;
        let mime_type = mime_type.unwrap_or("application/octet-stream");
        let flags = Flags {
            force: query.flag("force"),
            ..Default::default()
        };
        fs.create(parent_id, mime_type, name, body, flags).await
    }
    .await;
    respond(StatusCode::CREATED, result)
}

pub async fn update(
    fs: &TreeFs,
    id: &str,
    query: &Query,
    mime_type: Option<&str>,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let flags = Flags {
        force: query.flag("force"),
        ..Default::default()
    };
    let fallback = match (query.get("parent"), query.get("name")) {
        (Some(parent_id), Some(name)) => Some(Placement {
            parent_id: parent_id.to_string(),
            name: name.to_string(),
            mime_type: mime_type.unwrap_or("application/octet-stream").to_string(),
        }),
        _ => None,
    };
    respond(StatusCode::OK, fs.update(id, body, flags, fallback).await)
}

pub async fn rename(fs: &TreeFs, id: &str, query: &Query) -> Response<Full<Bytes>> {
    let result = match query.require("name") {
        Ok(name) => fs.rename(id, name).await,
        Err(e) => Err(e),
    };
    respond(StatusCode::OK, result)
}

pub async fn move_to(fs: &TreeFs, id: &str, query: &Query) -> Response<Full<Bytes>> {
    let result = match query.require("to") {
        Ok(destination) => fs.move_to(id, destination).await,
        Err(e) => Err(e),
    };
    respond(StatusCode::OK, result)
}

pub async fn copy(fs: &TreeFs, id: &str, query: &Query) -> Response<Full<Bytes>> {
    let result = match query.require("to") {
        Ok(destination) => fs.copy(id, destination).await,
        Err(e) => Err(e),
    };
    respond(StatusCode::CREATED, result)
}

pub async fn destroy(fs: &TreeFs, id: &str) -> Response<Full<Bytes>> {
    let result = fs.destroy(id).await.map(|removed| Removed { removed });
    respond(StatusCode::OK, result)
}

pub async fn search(fs: &TreeFs, id: &str, query: &Query) -> Response<Full<Bytes>> {
    let result: Result<Vec<FileRecord>> = async {
        let search = SearchQuery {
            name: query.get("name").map(str::to_string),
            name_contains: query.get("nameContains").map(str::to_string),
            mime_type: query.get("mimeType").map(str::to_string),
            min_size: query.parse_num("minSize")?,
            max_size: query.parse_num("maxSize")?,
        };
        let sort = query.get("sort").map(str::parse::<SortSpec>).transpose()?;
        let flags = Flags {
            shallow: query.flag("shallow"),
            ..Default::default()
        };
        fs.search(id, &search, sort, flags).await
    }
    .await;
    respond(StatusCode::OK, result)
}

pub async fn download(fs: &TreeFs, id: &str) -> Response<Full<Bytes>> {
    match fs.download(id).await {
        Ok(data) => responses::bytes_response("application/zip", "", data),
        Err(e) => responses::error_response(&e),
    }
}

pub async fn blob(fs: &TreeFs, bucket: &str, id: &str) -> Response<Full<Bytes>> {
    if bucket != fs.content().bucket() {
        return responses::not_found();
    }
    match fs.fetch(id).await {
        Ok((data, info)) => responses::bytes_response(&info.mime_type, &info.etag, data),
        Err(e) => responses::error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_parse() {
        let query = Query::parse(Some("name=my%20file.txt&force&to=B+1&minSize=10"));
        assert_eq!(query.get("name"), Some("my file.txt"));
        assert!(query.flag("force"));
        assert!(!query.flag("shallow"));
        assert_eq!(query.get("to"), Some("B 1"));
        assert_eq!(query.parse_num("minSize").unwrap(), Some(10));
        assert!(query.parse_num("maxSize").unwrap().is_none());
    }

    #[test]
    fn test_query_require() {
        let query = Query::parse(None);
        assert!(matches!(query.require("name"), Err(Error::InvalidParameters(_))));

        let query = Query::parse(Some("minSize=ten"));
        assert!(matches!(query.parse_num("minSize"), Err(Error::InvalidParameters(_))));
    }
}
