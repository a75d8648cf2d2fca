// RouterOS v7 REST client
//
// Maps the menu verbs onto HTTP: GET lists, PUT creates, PATCH updates,
// DELETE removes, POST runs console commands. Authentication is HTTP Basic
// on every request; there is no session to tear down.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{RouterSession, Row};
use crate::error::Error;
use crate::transport::TransportConfig;

/// HTTP client for the RouterOS `/rest` tree.
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: SecretString,
    timeout: Duration,
}

impl RestClient {
    /// Create a REST client. `base_url` is the router root, e.g.
    /// `https://10.0.0.1`; the `/rest` prefix is added per request.
    pub fn new(
        base_url: Url,
        username: String,
        password: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, username, password, transport.timeout))
    }

    /// Create a REST client around a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        username: String,
        password: SecretString,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url,
            username,
            password,
            timeout,
        }
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `{base}/rest{path}`
    fn rest_url(&self, path: &str) -> Result<Url, Error> {
        let full = format!(
            "{}/rest{}",
            self.base_url.as_str().trim_end_matches('/'),
            path
        );
        Ok(Url::parse(&full)?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Option<Value>, Error> {
        let resp = request
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .send()
            .await
            .map_err(|e| Error::from_reqwest(e, self.timeout))?;
        self.handle_response(resp).await
    }

    async fn handle_response(&self, resp: reqwest::Response) -> Result<Option<Value>, Error> {
        let status = resp.status();
        let path = resp.url().path().to_owned();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::from_reqwest(e, self.timeout))?;

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(None);
            }
            return serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| Error::Deserialization {
                    message: e.to_string(),
                    body,
                });
        }

        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Err(Error::Authentication {
                    message: detail(&body).unwrap_or_else(|| "invalid username or password".into()),
                })
            }
            reqwest::StatusCode::NOT_FOUND => Err(Error::NotFound(path)),
            s if s.is_client_error() => Err(Error::Rejected {
                message: detail(&body).unwrap_or_else(|| s.to_string()),
                category: None,
            }),
            s => Err(Error::protocol(format!(
                "HTTP {s}: {}",
                detail(&body).unwrap_or_default()
            ))),
        }
    }
}

/// Pull `detail` (or `message`) out of a RouterOS error body.
fn detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("detail")
        .or_else(|| value.get("message"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

/// Convert a JSON object into a `Row`, stringifying scalar values.
fn to_row(value: &Value) -> Result<Row, Error> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::protocol("expected a JSON object"))?;
    Ok(obj
        .iter()
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (k.clone(), text)
        })
        .collect())
}

fn to_rows(value: Option<Value>) -> Result<Vec<Row>, Error> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(to_row).collect(),
        Some(obj @ Value::Object(_)) => Ok(vec![to_row(&obj)?]),
        Some(_) => Err(Error::protocol("expected a JSON array or object")),
    }
}

fn to_body(row: &Row) -> serde_json::Map<String, Value> {
    row.iter()
        .map(|(k, v)| (k.to_owned(), Value::String(v.to_owned())))
        .collect()
}

#[async_trait]
impl RouterSession for RestClient {
    /// `GET /rest{menu}?k=v`
    async fn print(&mut self, menu: &str, filter: &[(&str, &str)]) -> Result<Vec<Row>, Error> {
        let mut url = self.rest_url(menu)?;
        if !filter.is_empty() {
            url.query_pairs_mut().extend_pairs(filter.iter().copied());
        }
        debug!("GET {}", url.path());
        to_rows(self.send(self.http.get(url)).await?)
    }

    /// `PUT /rest{menu}`
    async fn add(&mut self, menu: &str, row: &Row) -> Result<String, Error> {
        let url = self.rest_url(menu)?;
        debug!("PUT {}", url.path());
        let created = to_rows(self.send(self.http.put(url).json(&to_body(row))).await?)?;
        created
            .first()
            .and_then(Row::id)
            .map(ToOwned::to_owned)
            .ok_or_else(|| Error::protocol("create response carried no .id"))
    }

    /// `PATCH /rest{menu}/{id}`
    async fn set(&mut self, menu: &str, id: &str, row: &Row) -> Result<(), Error> {
        let url = self.rest_url(&format!("{menu}/{id}"))?;
        debug!("PATCH {}", url.path());
        self.send(self.http.patch(url).json(&to_body(row)))
            .await
            .map(|_| ())
    }

    /// `DELETE /rest{menu}/{id}`
    async fn remove(&mut self, menu: &str, id: &str) -> Result<(), Error> {
        let url = self.rest_url(&format!("{menu}/{id}"))?;
        debug!("DELETE {}", url.path());
        self.send(self.http.delete(url)).await.map(|_| ())
    }

    /// `POST /rest{path}`
    async fn command(&mut self, path: &str, args: &Row) -> Result<Vec<Row>, Error> {
        let url = self.rest_url(path)?;
        debug!("POST {}", url.path());
        to_rows(self.send(self.http.post(url).json(&to_body(args))).await?)
    }

    async fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
