//! Entity URI - human-addressable names for graph nodes
//!
//! Format: `devac://<repo>/<package>/<file>#<Symbol.path>?version=..&line=..&col=..`
//!
//! Examples:
//! - `devac://acme/packages%2Fcore/src/auth.ts#AuthService.login?line=12`
//! - `devac://acme/./src/index.ts`
//!
//! Repo and package are single path segments, so a `/` inside them is
//! percent-encoded. The file keeps its separators. `% # ? & =` are encoded in
//! every component.

use crate::identity::normalize_package;
use crate::node::Node;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const SCHEME: &str = "devac://";

/// Parsed canonical URI of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityUri {
    pub repo: String,
    /// Repo-relative package path, `.` for the root package
    pub package: String,
    /// File path relative to the package root
    pub file: String,
    /// Dotted symbol path inside the file
    pub symbol: Option<String>,
    pub version: Option<String>,
    pub line: Option<u32>,
    pub col: Option<u32>,
}

impl EntityUri {
    /// Create a file-level URI
    pub fn new(repo: impl Into<String>, package: &str, file: impl Into<String>) -> Result<Self> {
        let repo = repo.into();
        if repo.is_empty() {
            return Err(Error::InvalidUri("repo must not be empty".to_string()));
        }
        Ok(Self {
            repo,
            package: normalize_package(package),
            file: file.into(),
            symbol: None,
            version: None,
            line: None,
            col: None,
        })
    }

    /// URI addressing a stored node
    pub fn for_node(repo: &str, package: &str, node: &Node) -> Result<Self> {
        Ok(Self::new(repo, package, node.file_path.clone())?
            .with_symbol(node.qualified_name.clone())
            .at(node.start_line, node.start_column))
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn at(mut self, line: u32, col: u32) -> Self {
        self.line = Some(line);
        self.col = Some(col);
        self
    }

    /// Whether `s` looks like a canonical URI rather than a raw entity id
    pub fn is_uri(s: &str) -> bool {
        s.starts_with(SCHEME)
    }

    /// Parse a URI string
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::InvalidUri(format!("URI must start with {}", SCHEME)))?;

        // '?' and '#' never appear unencoded inside a component
        let (rest, query) = match rest.split_once('?') {
            Some((head, query)) => (head, Some(query)),
            None => (rest, None),
        };
        let (path, fragment) = match rest.split_once('#') {
            Some((head, fragment)) => (head, Some(fragment)),
            None => (rest, None),
        };

        let mut segments = path.splitn(3, '/');
        let repo = decode(segments.next().unwrap_or_default())?;
        let package = segments
            .next()
            .ok_or_else(|| Error::InvalidUri(format!("missing package segment: {}", uri)))?;
        let package = decode(package)?;
        let file = decode(segments.next().unwrap_or_default())?;

        if repo.is_empty() {
            return Err(Error::InvalidUri(format!("missing repo: {}", uri)));
        }
        if package.is_empty() {
            return Err(Error::InvalidUri(format!("missing package: {}", uri)));
        }

        let mut parsed = Self {
            repo,
            package,
            file,
            symbol: fragment.map(decode).transpose()?,
            version: None,
            line: None,
            col: None,
        };

        for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::InvalidUri(format!("query parameter without value: {}", pair)))?;
            let value = decode(value)?;
            match key {
                "version" => parsed.version = Some(value),
                "line" => parsed.line = Some(parse_number(key, &value)?),
                "col" => parsed.col = Some(parse_number(key, &value)?),
                _ => return Err(Error::InvalidUri(format!("unknown query parameter: {}", key))),
            }
        }

        Ok(parsed)
    }

    /// Convert to URI string
    pub fn to_uri_string(&self) -> String {
        let mut out = format!(
            "{}{}/{}/{}",
            SCHEME,
            encode(&self.repo, true),
            encode(&self.package, true),
            encode(&self.file, false)
        );

        if let Some(symbol) = &self.symbol {
            out.push('#');
            out.push_str(&encode(symbol, true));
        }

        let mut params = Vec::new();
        if let Some(version) = &self.version {
            params.push(format!("version={}", encode(version, true)));
        }
        if let Some(line) = self.line {
            params.push(format!("line={}", line));
        }
        if let Some(col) = self.col {
            params.push(format!("col={}", col));
        }
        if !params.is_empty() {
            out.push('?');
            out.push_str(&params.join("&"));
        }

        out
    }
}

fn parse_number(key: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| Error::InvalidUri(format!("invalid {} number: {}", key, value)))
}

fn is_reserved(b: u8, encode_slash: bool) -> bool {
    matches!(b, b'%' | b'#' | b'?' | b'&' | b'=') || (encode_slash && b == b'/')
}

fn encode(value: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_ascii() && is_reserved(ch as u8, encode_slash) {
            out.push_str(&format!("%{:02X}", ch as u8));
        } else {
            out.push(ch);
        }
    }
    out
}

fn decode(value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = value
                .get(i + 1..i + 3)
                .ok_or_else(|| Error::InvalidUri(format!("truncated escape in: {}", value)))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| Error::InvalidUri(format!("invalid escape %{} in: {}", hex, value)))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| Error::InvalidUri(format!("escape is not UTF-8: {}", value)))
}

impl fmt::Display for EntityUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uri_string())
    }
}

impl FromStr for EntityUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for EntityUri {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_uri_string())
    }
}

impl<'de> Deserialize<'de> for EntityUri {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        EntityUri::parse(&s).map_err(serde::de::Error::custom)
    }
}
