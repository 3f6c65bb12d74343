use std::fmt;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Payload served when nothing is configured yet
pub const EMPTY_PAYLOAD: &str = "{}";

/// Identity of one configured application
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppKey {
    pub group: String,
    pub app: String,
}

impl AppKey {
    pub fn new(
        group: impl Into<String>,
        app: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            app: app.into(),
        }
    }

    /// Builds a key after checking both names.
    pub fn parse(
        group: &str,
        app: &str,
    ) -> Result<Self> {
        validate_name("group", group)?;
        validate_name("app", app)?;
        Ok(Self::new(group, app))
    }
}

impl fmt::Display for AppKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.app)
    }
}

/// Names must be non-empty and must not contain the namespace separator.
pub fn validate_name(
    field: &str,
    name: &str,
) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument(format!("{field} cannot be empty")));
    }
    if name.contains('/') {
        return Err(Error::InvalidArgument(format!(
            "{field} '{name}' cannot contain '/'"
        )));
    }
    Ok(())
}

/// Mutable pointer/counter of an application, stored at index 0.
///
/// `0 <= cur_index <= max_index`; `op_num` grows by one per Set or Rollback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerRecord {
    pub cur_index: u64,
    pub max_index: u64,
    pub op_num: u64,
}

/// Immutable configuration version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub index: u64,
    pub app_config: String,
    pub source_config: String,
}

impl VersionRecord {
    /// Placeholder for "no version selected yet"
    pub fn empty() -> Self {
        Self {
            index: 0,
            app_config: EMPTY_PAYLOAD.to_string(),
            source_config: EMPTY_PAYLOAD.to_string(),
        }
    }
}

/// Credentials a client needs to tail the store directly.
///
/// An all-empty value means direct watching is not supported.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchCredentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub passwd: String,
    #[serde(default)]
    pub addrs: Vec<String>,
    #[serde(default)]
    pub replica_set_name: String,
}

impl WatchCredentials {
    /// Every field is set; anything less clears the record on write.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty()
            && !self.passwd.is_empty()
            && !self.addrs.is_empty()
            && !self.replica_set_name.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_empty()
            && self.passwd.is_empty()
            && self.addrs.is_empty()
            && self.replica_set_name.is_empty()
    }
}

impl fmt::Debug for WatchCredentials {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("WatchCredentials")
            .field("username", &self.username)
            .field("passwd", &"<redacted>")
            .field("addrs", &self.addrs)
            .field("replica_set_name", &self.replica_set_name)
            .finish()
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
