//! Entity identity - stable, content-addressed ids for code symbols
//!
//! Format: `<repo>:<package>:<kind>:<hash>`
//!
//! Examples:
//! - `acme-app:packages/core:function:3f9a1c0d2b7e4a51`
//! - `acme-app:.:class:0c1e22a9d4b3f871`
//!
//! The repo, package and kind prefixes stay parseable; the hash is an opaque
//! blake3 digest of the normalized file path and scope path.

use crate::node::NodeKind;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of hex characters kept from the blake3 digest.
const HASH_LEN: usize = 16;

/// A parsed entity id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityId {
    pub repo: String,
    pub package: String,
    pub kind: String,
    pub hash: String,
}

impl EntityId {
    /// Parse `repo:package:kind:hash`.
    pub fn parse(id: &str) -> Result<Self> {
        let mut parts = id.splitn(4, ':');
        let (Some(repo), Some(package), Some(kind), Some(hash)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Validation(format!(
                "entity id must have 4 colon-separated parts: {}",
                id
            )));
        };

        if repo.is_empty() || package.is_empty() || kind.is_empty() {
            return Err(Error::Validation(format!("entity id has empty prefix: {}", id)));
        }
        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Validation(format!("entity id hash is not hex: {}", id)));
        }

        Ok(Self {
            repo: repo.to_string(),
            package: package.to_string(),
            kind: kind.to_string(),
            hash: hash.to_string(),
        })
    }

    /// Whether this id lives in a different repository than `repo`.
    pub fn is_cross_repo(&self, repo: &str) -> bool {
        self.repo != sanitize_component(repo)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.repo, self.package, self.kind, self.hash)
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for EntityId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        EntityId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Derive the entity id of a symbol.
///
/// `scope_path` is the dotted path of the symbol inside its file
/// (`AuthService.login`). Renaming a containing symbol changes the scope path
/// and therefore the id.
pub fn generate_entity_id(
    repo: &str,
    package_path: &str,
    kind: NodeKind,
    file_path: &str,
    scope_path: &str,
) -> EntityId {
    let repo = sanitize_component(repo);
    let package = sanitize_component(&normalize_package(package_path));
    let file = normalize_path(file_path);

    let mut hasher = blake3::Hasher::new();
    for part in [repo.as_str(), package.as_str(), kind.as_str(), file.as_str(), scope_path] {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    let digest = hasher.finalize().to_hex();

    EntityId {
        repo,
        package,
        kind: kind.as_str().to_string(),
        hash: digest.as_str()[..HASH_LEN].to_string(),
    }
}

/// Normalize a file path so that ids do not depend on the host OS.
///
/// Backslashes become `/`, leading `./` and duplicate or trailing separators
/// are dropped.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let segments: Vec<&str> = unified
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    let joined = segments.join("/");
    if unified.starts_with('/') {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Package paths are repo-relative; the repo root package is `.`.
pub fn normalize_package(package_path: &str) -> String {
    let normalized = normalize_path(package_path);
    if normalized.is_empty() {
        ".".to_string()
    } else {
        normalized
    }
}

fn sanitize_component(value: &str) -> String {
    value.replace(':', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(file: &str, scope: &str) -> EntityId {
        generate_entity_id("acme", "packages/core", NodeKind::Function, file, scope)
    }

    #[test]
    fn test_same_inputs_same_id() {
        assert_eq!(id("src/auth.ts", "login"), id("src/auth.ts", "login"));
    }

    #[test]
    fn test_each_input_changes_id() {
        let base = id("src/auth.ts", "AuthService.login");
        assert_ne!(base, id("src/auth.ts", "AuthService.logout"));
        assert_ne!(base, id("src/session.ts", "AuthService.login"));
        assert_ne!(
            base,
            generate_entity_id("other", "packages/core", NodeKind::Function, "src/auth.ts", "AuthService.login")
        );
        assert_ne!(
            base,
            generate_entity_id("acme", "packages/web", NodeKind::Function, "src/auth.ts", "AuthService.login")
        );
        assert_ne!(
            base,
            generate_entity_id("acme", "packages/core", NodeKind::Method, "src/auth.ts", "AuthService.login")
        );
    }

    #[test]
    fn test_os_independent_paths() {
        assert_eq!(id("src\\auth.ts", "login"), id("./src//auth.ts", "login"));
        assert_eq!(normalize_path("a\\b\\c/"), "a/b/c");
        assert_eq!(normalize_package(""), ".");
        assert_eq!(normalize_package("./"), ".");
    }

    #[test]
    fn test_display_and_parse() {
        let entity = id("src/auth.ts", "login");
        let text = entity.to_string();
        assert!(text.starts_with("acme:packages/core:function:"));
        assert_eq!(text.rsplit(':').next().map(str::len), Some(HASH_LEN));

        let parsed = EntityId::parse(&text).unwrap();
        assert_eq!(parsed, entity);
    }

    #[test]
    fn test_colon_in_repo_is_sanitized() {
        let entity = generate_entity_id("host:acme", ".", NodeKind::Class, "a.ts", "A");
        assert_eq!(entity.repo, "host_acme");
        assert!(EntityId::parse(&entity.to_string()).is_ok());
        assert!(!entity.is_cross_repo("host:acme"));
        assert!(entity.is_cross_repo("other"));
    }

    #[test]
    fn test_invalid_ids() {
        assert!(EntityId::parse("acme:pkg:function").is_err());
        assert!(EntityId::parse("acme:pkg:function:not-hex").is_err());
        assert!(EntityId::parse("unresolved:foo").is_err());
    }
}
