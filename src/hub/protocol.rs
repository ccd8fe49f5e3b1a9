//! Hub request protocol
//!
//! One JSON object per line in each direction. The same [`dispatch`] table
//! serves forwarded requests (inside the hub server) and direct calls made
//! by the router when no server runs.

use super::diagnostics::{DiagnosticsFilter, UnifiedDiagnostic};
use super::store::CentralHub;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HubRequest {
    RegisterRepo { path: PathBuf },
    UnregisterRepo { repo_id: String },
    RefreshRepo { repo_id: String },
    RefreshAll,
    ListRepos {
        #[serde(default)]
        include_unregistered: bool,
    },
    GetRepo { repo_id: String },
    Status,
    PushDiagnostics { diagnostics: Vec<UnifiedDiagnostic> },
    ClearDiagnostics {
        #[serde(default)]
        filter: DiagnosticsFilter,
    },
    ResolveDiagnostics { ids: Vec<String> },
    QueryDiagnostics {
        #[serde(default)]
        filter: DiagnosticsFilter,
    },
    DiagnosticsSummary {
        #[serde(default)]
        repo_id: Option<String>,
    },
}

impl HubRequest {
    /// Whether the request needs the writable hub handle
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            HubRequest::RegisterRepo { .. }
                | HubRequest::UnregisterRepo { .. }
                | HubRequest::RefreshRepo { .. }
                | HubRequest::RefreshAll
                | HubRequest::PushDiagnostics { .. }
                | HubRequest::ClearDiagnostics { .. }
                | HubRequest::ResolveDiagnostics { .. }
        )
    }

    pub fn op(&self) -> &'static str {
        match self {
            HubRequest::RegisterRepo { .. } => "register_repo",
            HubRequest::UnregisterRepo { .. } => "unregister_repo",
            HubRequest::RefreshRepo { .. } => "refresh_repo",
            HubRequest::RefreshAll => "refresh_all",
            HubRequest::ListRepos { .. } => "list_repos",
            HubRequest::GetRepo { .. } => "get_repo",
            HubRequest::Status => "status",
            HubRequest::PushDiagnostics { .. } => "push_diagnostics",
            HubRequest::ClearDiagnostics { .. } => "clear_diagnostics",
            HubRequest::ResolveDiagnostics { .. } => "resolve_diagnostics",
            HubRequest::QueryDiagnostics { .. } => "query_diagnostics",
            HubRequest::DiagnosticsSummary { .. } => "diagnostics_summary",
        }
    }
}

/// An error as carried over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder_pid: Option<u32>,
}

impl From<&Error> for WireError {
    fn from(err: &Error) -> Self {
        let (path, holder_pid, message) = match err {
            Error::Locked { path, holder_pid } | Error::Stale { path, holder_pid } => {
                (Some(path.clone()), Some(*holder_pid), err.to_string())
            }
            Error::Corrupt { path, reason } => (Some(path.clone()), None, reason.clone()),
            Error::Timeout(m)
            | Error::NotFound(m)
            | Error::Ipc(m)
            | Error::Validation(m)
            | Error::InvalidUri(m) => (None, None, m.clone()),
            Error::Remote { message, .. } => (None, None, message.clone()),
            other => (None, None, other.to_string()),
        };
        let kind = match err {
            Error::Remote { kind, .. } => kind.clone(),
            other => other.kind().to_string(),
        };
        Self {
            kind,
            message,
            path,
            holder_pid,
        }
    }
}

impl WireError {
    /// Rebuild the library error on the caller's side
    pub fn into_error(self) -> Error {
        let path = self.path.unwrap_or_default();
        let holder_pid = self.holder_pid.unwrap_or_default();
        match self.kind.as_str() {
            "locked" => Error::Locked { path, holder_pid },
            "stale" => Error::Stale { path, holder_pid },
            "corrupt" => Error::Corrupt {
                path,
                reason: self.message,
            },
            "timeout" => Error::Timeout(self.message),
            "not_found" => Error::NotFound(self.message),
            "ipc" => Error::Ipc(self.message),
            "validation" => Error::Validation(self.message),
            "invalid_uri" => Error::InvalidUri(self.message),
            "io" => Error::Io(std::io::Error::other(self.message)),
            "json" => Error::Json(<serde_json::Error as serde::de::Error>::custom(self.message)),
            _ => Error::Remote {
                kind: self.kind,
                message: self.message,
            },
        }
    }
}

/// Response line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubReply {
    Ok(Value),
    Error(WireError),
}

impl HubReply {
    pub fn from_result(result: Result<Value>) -> Self {
        match result {
            Ok(value) => HubReply::Ok(value),
            Err(e) => HubReply::Error(WireError::from(&e)),
        }
    }

    pub fn into_result(self) -> Result<Value> {
        match self {
            HubReply::Ok(value) => Ok(value),
            HubReply::Error(e) => Err(e.into_error()),
        }
    }
}

/// Execute one request against a hub handle
pub(in crate::hub) fn dispatch(hub: &CentralHub, request: HubRequest) -> Result<Value> {
    let value = match request {
        HubRequest::RegisterRepo { path } => serde_json::to_value(hub.register_repo(&path)?)?,
        HubRequest::UnregisterRepo { repo_id } => {
            hub.unregister_repo(&repo_id)?;
            Value::Null
        }
        HubRequest::RefreshRepo { repo_id } => serde_json::to_value(hub.refresh_repo(&repo_id)?)?,
        HubRequest::RefreshAll => serde_json::to_value(hub.refresh_all()?)?,
        HubRequest::ListRepos { include_unregistered } => {
            serde_json::to_value(hub.list_repos(include_unregistered)?)?
        }
        HubRequest::GetRepo { repo_id } => {
            let repo = hub
                .get_repo(&repo_id)?
                .ok_or_else(|| Error::NotFound(format!("repo {}", repo_id)))?;
            serde_json::to_value(repo)?
        }
        HubRequest::Status => serde_json::to_value(hub.status()?)?,
        HubRequest::PushDiagnostics { diagnostics } => serde_json::to_value(hub.push_diagnostics(&diagnostics)?)?,
        HubRequest::ClearDiagnostics { filter } => serde_json::to_value(hub.clear_diagnostics(&filter)?)?,
        HubRequest::ResolveDiagnostics { ids } => serde_json::to_value(hub.resolve_diagnostics(&ids)?)?,
        HubRequest::QueryDiagnostics { filter } => serde_json::to_value(hub.query_diagnostics(&filter)?)?,
        HubRequest::DiagnosticsSummary { repo_id } => {
            serde_json::to_value(hub.diagnostics_summary(repo_id.as_deref())?)?
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_request_wire_format() {
        let req: HubRequest = serde_json::from_value(json!({"op": "list_repos"})).unwrap();
        assert_eq!(req, HubRequest::ListRepos { include_unregistered: false });
        assert!(!req.is_mutating());

        let req = HubRequest::RefreshRepo { repo_id: "app".into() };
        assert_eq!(serde_json::to_value(&req).unwrap(), json!({"op": "refresh_repo", "repo_id": "app"}));
        assert!(req.is_mutating());
    }

    #[test]
    fn test_errors_survive_the_wire() {
        let locked = Error::Locked { path: PathBuf::from("/w/.devac/hub.lock"), holder_pid: 42 };
        let line = serde_json::to_string(&HubReply::from_result(Err(locked))).unwrap();
        let back: HubReply = serde_json::from_str(&line).unwrap();
        match back.into_result() {
            Err(Error::Locked { path, holder_pid }) => {
                assert_eq!(path, PathBuf::from("/w/.devac/hub.lock"));
                assert_eq!(holder_pid, 42);
            }
            other => panic!("unexpected {:?}", other),
        }

        let not_found = WireError::from(&Error::NotFound("repo x".into())).into_error();
        assert!(matches!(not_found, Error::NotFound(m) if m == "repo x"));
    }

    #[test]
    fn test_dispatch_get_repo_not_found() {
        let dir = TempDir::new().unwrap();
        let hub = CentralHub::create(&dir.path().join("central.db")).unwrap();
        let err = dispatch(&hub, HubRequest::GetRepo { repo_id: "nope".into() }).unwrap_err();
        assert_eq!(err.kind(), "not_found");

        let status = dispatch(&hub, HubRequest::Status).unwrap();
        assert_eq!(status["repos_active"], 0);
    }
}
