// RouterOS binary API client (TCP, default port 8728).
//
// One command is in flight at a time; replies are read until `!done`.
// Every socket read and write runs under the configured per-call timeout.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::debug;

use super::wire::{self, Reply, ReplyKind};
use super::{RouterSession, Row};
use crate::error::Error;
use crate::transport::TransportConfig;

pub const DEFAULT_PORT: u16 = 8728;

/// Authenticated RouterOS API session over a plain TCP stream.
pub struct ApiClient {
    stream: BufStream<TcpStream>,
    timeout: Duration,
}

/// Collected reply to a single command.
struct Response {
    rows: Vec<Row>,
    done: Row,
}

impl ApiClient {
    /// Connect and log in (RouterOS 6.43+ plaintext login).
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let stream = within(transport.connect_timeout, TcpStream::connect((host, port)))
            .await?
            .map_err(|e| Error::from_io(&e))?;
        stream.set_nodelay(true).map_err(|e| Error::from_io(&e))?;

        let mut client = Self::from_stream(stream, transport.timeout);
        client.login(username, password).await?;
        Ok(client)
    }

    /// Wrap an already connected stream without logging in.
    pub fn from_stream(stream: TcpStream, timeout: Duration) -> Self {
        Self {
            stream: BufStream::new(stream),
            timeout,
        }
    }

    async fn login(&mut self, username: &str, password: &SecretString) -> Result<(), Error> {
        let words = [
            "/login".to_owned(),
            format!("=name={username}"),
            format!("=password={}", password.expose_secret()),
        ];
        debug!("API /login");
        match self.talk(&words).await {
            Ok(resp) if resp.done.get("ret").is_some() => Err(Error::UnsupportedOperation(
                "challenge-response login (RouterOS before 6.43)",
            )),
            Ok(_) => Ok(()),
            Err(Error::Rejected { message, .. }) => Err(Error::Authentication { message }),
            Err(e) => Err(e),
        }
    }

    // ── Wire helpers ─────────────────────────────────────────────────

    async fn send(&mut self, words: &[String]) -> Result<(), Error> {
        let bytes = wire::encode_sentence(words);
        let timeout = self.timeout;
        within(timeout, async {
            self.stream.write_all(&bytes).await?;
            self.stream.flush().await
        })
        .await?
        .map_err(|e| Error::from_io(&e))
    }

    async fn receive(&mut self) -> Result<Reply, Error> {
        let timeout = self.timeout;
        let words = within(timeout, wire::read_sentence(&mut self.stream)).await??;
        Reply::parse(&words)
    }

    /// Send one command and collect replies until `!done`.
    ///
    /// A `!trap` is remembered and surfaced after the trailing `!done`, so
    /// the stream stays aligned for the next command.
    async fn talk(&mut self, words: &[String]) -> Result<Response, Error> {
        self.send(words).await?;

        let mut rows = Vec::new();
        let mut trap: Option<Row> = None;
        loop {
            let reply = self.receive().await?;
            match reply.kind {
                ReplyKind::Re => rows.push(reply.attrs),
                ReplyKind::Trap => {
                    trap.get_or_insert(reply.attrs);
                }
                ReplyKind::Fatal => {
                    let reason = reply.attrs.get("message").unwrap_or("session terminated");
                    return Err(Error::Connection {
                        reason: format!("router closed session: {reason}"),
                    });
                }
                ReplyKind::Empty => {}
                ReplyKind::Done => {
                    if let Some(attrs) = trap {
                        return Err(Error::Rejected {
                            message: attrs.get("message").unwrap_or("command failed").to_owned(),
                            category: attrs.get("category").and_then(|c| c.parse().ok()),
                        });
                    }
                    return Ok(Response {
                        rows,
                        done: reply.attrs,
                    });
                }
            }
        }
    }
}

fn attribute_words(row: &Row) -> impl Iterator<Item = String> + '_ {
    row.iter().map(|(k, v)| format!("={k}={v}"))
}

/// Run a future under a deadline, mapping expiry to `Error::Timeout`.
async fn within<F: Future>(timeout: Duration, fut: F) -> Result<F::Output, Error> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::Timeout { timeout })
}

#[async_trait]
impl RouterSession for ApiClient {
    async fn print(&mut self, menu: &str, filter: &[(&str, &str)]) -> Result<Vec<Row>, Error> {
        debug!("API {menu}/print");
        let mut words = vec![format!("{menu}/print")];
        words.extend(filter.iter().map(|(k, v)| format!("?{k}={v}")));
        Ok(self.talk(&words).await?.rows)
    }

    async fn add(&mut self, menu: &str, row: &Row) -> Result<String, Error> {
        debug!("API {menu}/add");
        let mut words = vec![format!("{menu}/add")];
        words.extend(attribute_words(row));
        let resp = self.talk(&words).await?;
        resp.done
            .get("ret")
            .map(ToOwned::to_owned)
            .ok_or_else(|| Error::protocol("add reply carried no id"))
    }

    async fn set(&mut self, menu: &str, id: &str, row: &Row) -> Result<(), Error> {
        debug!("API {menu}/set");
        let mut words = vec![format!("{menu}/set"), format!("=.id={id}")];
        words.extend(attribute_words(row));
        self.talk(&words).await.map(|_| ())
    }

    async fn remove(&mut self, menu: &str, id: &str) -> Result<(), Error> {
        debug!("API {menu}/remove");
        let words = [format!("{menu}/remove"), format!("=.id={id}")];
        self.talk(&words).await.map(|_| ())
    }

    async fn command(&mut self, path: &str, args: &Row) -> Result<Vec<Row>, Error> {
        debug!("API {path}");
        let mut words = vec![path.to_owned()];
        words.extend(attribute_words(args));
        let Response { mut rows, done } = self.talk(&words).await?;
        if !done.is_empty() {
            rows.push(done);
        }
        Ok(rows)
    }

    async fn close(&mut self) -> Result<(), Error> {
        let timeout = self.timeout;
        within(timeout, self.stream.get_mut().shutdown())
            .await?
            .map_err(|e| Error::from_io(&e))
    }
}
