//! Outbound HTTP executor: send the described request, record the response,
//! persist the record.

use crate::db::Db;
use crate::error::{Error, Result};
use crate::model::query::HeaderMap;
use crate::model::{Method, QueryId, QueryRecord, QueryRequest};
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::Executor;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Production executor. One shared `reqwest::Client` (connection pool) and
/// database handle for all workers.
#[derive(Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    db: Arc<Db>,
}

impl HttpExecutor {
    pub fn new(db: Arc<Db>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::RequestBuild(format!("http client: {e}")))?;
        Ok(Self { client, db })
    }
}

impl Executor for HttpExecutor {
    async fn execute(&self, request: &QueryRequest) -> Result<QueryRecord> {
        let record = send_request(&self.client, request).await?;
        self.db.insert_query(&record).await?;
        debug!(query_id = %record.id, "query result stored");
        Ok(record)
    }
}

/// Send a request and describe what came back. Does not persist.
pub async fn send_request(client: &reqwest::Client, request: &QueryRequest) -> Result<QueryRecord> {
    let outbound = build_request(client, request)?;
    let response = client.execute(outbound).await?;

    let status = response.status().to_string();
    let status_code = response.status().as_u16();
    let headers = collect_headers(response.headers());
    let body = response.bytes().await?;

    Ok(QueryRecord {
        id: QueryId::new(),
        status,
        status_code,
        headers,
        length: body.len() as u64,
        created_at: chrono::Utc::now(),
    })
}

/// Build the outbound request. Every failure here is a creation error,
/// never a transport one.
pub fn build_request(client: &reqwest::Client, request: &QueryRequest) -> Result<reqwest::Request> {
    let mut builder = client.request(to_reqwest_method(request.method), &request.url);

    for (name, values) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::RequestBuild(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(&values.join(", "))
            .map_err(|e| Error::RequestBuild(format!("header {name}: {e}")))?;
        builder = builder.header(name, value);
    }

    if let Some(body) = request.body.as_ref().filter(|b| !b.is_empty()) {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| Error::RequestBuild(format!("body encoding: {e}")))?;
        if !request
            .headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case(CONTENT_TYPE.as_str()))
        {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        builder = builder.body(bytes);
    }

    builder
        .build()
        .map_err(|e| Error::RequestBuild(e.to_string()))
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
        Method::Patch => reqwest::Method::PATCH,
    }
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        out.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> reqwest::Client {
        reqwest::Client::new()
    }

    #[test]
    fn multi_value_headers_are_joined() {
        let req = QueryRequest::new(Method::Get, "http://example.com/a")
            .header("X-Tag", "one")
            .header("X-Tag", "two");

        let built = build_request(&client(), &req).unwrap();
        assert_eq!(built.method(), reqwest::Method::GET);
        assert_eq!(built.headers()["x-tag"], "one, two");
        assert!(built.body().is_none());
    }

    #[test]
    fn json_body_is_encoded_with_content_type() {
        let body = json!({"name": "probe"}).as_object().cloned().unwrap();
        let req = QueryRequest::new(Method::Post, "http://example.com/a").body(body);

        let built = build_request(&client(), &req).unwrap();
        assert_eq!(built.headers()[CONTENT_TYPE], "application/json");
        let bytes = built.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(bytes, br#"{"name":"probe"}"#);
    }

    #[test]
    fn empty_body_is_not_sent() {
        let req = QueryRequest::new(Method::Put, "http://example.com/a")
            .body(serde_json::Map::new());

        let built = build_request(&client(), &req).unwrap();
        assert!(built.body().is_none());
        assert!(built.headers().get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn bad_header_name_is_a_creation_error() {
        let req = QueryRequest::new(Method::Get, "http://example.com").header("bad header", "x");
        let err = build_request(&client(), &req).unwrap_err();
        assert!(matches!(err, Error::RequestBuild(_)));
    }

    #[test]
    fn bad_url_is_a_creation_error() {
        let req = QueryRequest::new(Method::Get, "not a url");
        let err = build_request(&client(), &req).unwrap_err();
        assert!(matches!(err, Error::RequestBuild(_)));
    }

    #[test]
    fn response_headers_group_repeated_names() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        headers.insert("content-length", HeaderValue::from_static("3"));

        let out = collect_headers(&headers);
        assert_eq!(out["set-cookie"], vec!["a=1", "b=2"]);
        assert_eq!(out["content-length"], vec!["3"]);
    }
}
