//! Plugin option strings.
//!
//! Options travel as a single string such as `id=naive-plugin;insecure;host=a%3Db`.
//! Entries are separated by `;`, a key and its value by `=`, and a key
//! without a value is written bare. `%`, `;` and `=` inside keys and values
//! are percent-escaped so any map survives a round trip.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{PluginError, PluginResult};

/// Reserved key naming the sub-selector (the entry a plugin should launch).
pub const ID_KEY: &str = "id";

/// Ordered map of plugin options. Keys iterate in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginOptions {
    entries: BTreeMap<String, Option<String>>,
}

impl PluginOptions {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options carrying only an `id`.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        let mut options = Self::new();
        options.set_id(id);
        options
    }

    /// Parse an encoded options string. Empty segments are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidOptions`] on a malformed escape or an
    /// empty key.
    pub fn parse(encoded: &str) -> PluginResult<Self> {
        let mut entries = BTreeMap::new();
        for token in encoded.split(';').filter(|t| !t.is_empty()) {
            let (raw_key, raw_value) = match token.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (token, None),
            };
            let key = unescape(raw_key)?;
            if key.is_empty() {
                return Err(PluginError::InvalidOptions(format!(
                    "empty key in segment '{token}'"
                )));
            }
            let value = raw_value.map(unescape).transpose()?;
            entries.insert(key, value);
        }
        Ok(Self { entries })
    }

    /// The `id` sub-selector, if set to a value.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.entries.get(ID_KEY).and_then(Option::as_deref)
    }

    /// Set the `id` sub-selector.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.entries.insert(ID_KEY.to_owned(), Some(id.into()));
    }

    /// Insert an entry. Empty keys cannot be encoded and are ignored.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) {
        let key = key.into();
        if !key.is_empty() {
            self.entries.insert(key, value);
        }
    }

    /// Look up an entry. The outer `Option` is presence, the inner one the
    /// value of a bare key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.entries.get(key).map(Option::as_deref)
    }

    /// Remove an entry, returning it.
    pub fn remove(&mut self, key: &str) -> Option<Option<String>> {
        self.entries.remove(key)
    }

    /// Number of entries, `id` included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Encode every entry except `id`. This is the only form that goes into
    /// generated plugin configs.
    #[must_use]
    pub fn to_string_without_id(&self) -> String {
        encode(self.iter().filter(|(k, _)| *k != ID_KEY))
    }
}

impl fmt::Display for PluginOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(self.iter()))
    }
}

impl FromStr for PluginOptions {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn encode<'a>(entries: impl Iterator<Item = (&'a str, Option<&'a str>)>) -> String {
    let mut out = String::new();
    for (key, value) in entries {
        if !out.is_empty() {
            out.push(';');
        }
        escape_into(&mut out, key);
        if let Some(value) = value {
            out.push('=');
            escape_into(&mut out, value);
        }
    }
    out
}

fn escape_into(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            ';' => out.push_str("%3B"),
            '=' => out.push_str("%3D"),
            other => out.push(other),
        }
    }
}

fn unescape(raw: &str) -> PluginResult<String> {
    if !raw.contains('%') {
        return Ok(raw.to_owned());
    }
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while let Some(&b) = bytes.get(i) {
        if b == b'%' {
            let hex = bytes
                .get(i.saturating_add(1)..i.saturating_add(3))
                .filter(|h| h.iter().all(u8::is_ascii_hexdigit))
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| {
                    PluginError::InvalidOptions(format!("malformed escape in '{raw}'"))
                })?;
            decoded.push(hex);
            i = i.saturating_add(3);
        } else {
            decoded.push(b);
            i = i.saturating_add(1);
        }
    }
    String::from_utf8(decoded)
        .map_err(|_| PluginError::InvalidOptions(format!("escape in '{raw}' is not UTF-8")))
}
