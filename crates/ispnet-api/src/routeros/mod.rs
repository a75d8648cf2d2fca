// MikroTik RouterOS clients.
//
// Two transports reach the same menu tree: the v7 REST interface
// (`RestClient`) and the binary API on port 8728 (`ApiClient`). Both
// implement `RouterSession`, so callers never branch on protocol.

pub mod api;
pub mod rest;
mod wire;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub use api::ApiClient;
pub use rest::RestClient;

/// Menu paths touched by the toolkit.
pub mod menu {
    pub const IP_POOL: &str = "/ip/pool";
    pub const PPP_PROFILE: &str = "/ppp/profile";
    pub const PPP_SECRET: &str = "/ppp/secret";
    pub const PPP_AAA: &str = "/ppp/aaa";
    pub const RADIUS: &str = "/radius";
    pub const RADIUS_INCOMING: &str = "/radius/incoming";
    pub const NETWATCH: &str = "/tool/netwatch";
    pub const SYSTEM_IDENTITY: &str = "/system/identity";
    pub const SYSTEM_RESOURCE: &str = "/system/resource";
    pub const LOG: &str = "/log";
}

/// One RouterOS row: attribute name to value, in the order the device sent them.
///
/// RouterOS is stringly typed on the wire (`"yes"`, `"10M/10M"`, `"*1A"`),
/// and so is this type. The internal id lives under `.id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(IndexMap<String, String>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// The RouterOS internal id (`.id`), e.g. `*1A`.
    pub fn id(&self) -> Option<&str> {
        self.get(".id")
    }

    /// Interpret a boolean attribute (`yes`/`true`).
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("yes" | "true"))
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.shift_remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Row {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect()
    }
}

/// An authenticated session against one router.
///
/// Methods take `&mut self`: a session carries one request at a time and is
/// never shared between concurrent operations. Callers must `close()` it.
#[async_trait]
pub trait RouterSession: Send {
    /// `print` a menu, optionally filtered by exact attribute matches.
    async fn print(&mut self, menu: &str, filter: &[(&str, &str)]) -> Result<Vec<Row>, Error>;

    /// `add` a row, returning the new `.id`.
    async fn add(&mut self, menu: &str, row: &Row) -> Result<String, Error>;

    /// `set` attributes on the row identified by `id`.
    async fn set(&mut self, menu: &str, id: &str, row: &Row) -> Result<(), Error>;

    /// `remove` the row identified by `id`.
    async fn remove(&mut self, menu: &str, id: &str) -> Result<(), Error>;

    /// Run an arbitrary command path (`/ping`, `/ppp/aaa/set`, `/execute`)
    /// and return whatever rows the device replied with.
    async fn command(&mut self, path: &str, args: &Row) -> Result<Vec<Row>, Error>;

    async fn close(&mut self) -> Result<(), Error>;

    /// Set attributes on a singleton menu such as `/ppp/aaa`.
    async fn apply(&mut self, menu: &str, row: &Row) -> Result<(), Error> {
        self.command(&format!("{menu}/set"), row).await.map(|_| ())
    }

    /// Run a console script and return its captured output.
    async fn execute(&mut self, script: &str) -> Result<String, Error> {
        let args = Row::new().with("script", script).with("as-string", "");
        let rows = self.command("/execute", &args).await?;
        Ok(rows
            .iter()
            .rev()
            .find_map(|row| row.get("ret"))
            .unwrap_or_default()
            .to_owned())
    }
}
