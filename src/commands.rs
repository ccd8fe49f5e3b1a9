//! Query command table
//!
//! Every query the CLI and the HTTP server expose is declared once here with
//! its parameter schema and executor. Arguments arrive as a JSON object
//! (CLI flags, HTTP query strings and POST bodies are all converted to one)
//! and are checked against the schema before the executor runs.

use crate::edge::EdgeType;
use crate::query::{CallDirection, CodeGraph, DetailLevel, ImportDirection, QueryEngine, QueryScope};
use crate::storage::SeedReader;
use crate::storage::paths::list_branches;
use crate::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    /// One of a fixed set of values
    Choice(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<&'static str>,
    pub description: &'static str,
}

type Executor = fn(&CommandContext, &CommandArgs) -> Result<Value>;

#[derive(Clone, Copy, Serialize)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
    #[serde(skip)]
    execute: Executor,
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec").field("name", &self.name).finish()
    }
}

/// What a command runs against
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub scope: QueryScope,
}

impl CommandContext {
    pub fn new(scope: QueryScope) -> Self {
        Self { scope }
    }

    fn readers(&self) -> Vec<SeedReader> {
        self.scope
            .packages
            .iter()
            .map(|p| SeedReader::open(p, &self.scope.branch))
            .collect()
    }
}

const fn param(name: &'static str, kind: ParamKind, description: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: false,
        default: None,
        description,
    }
}

const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: true,
        default: None,
        description,
    }
}

const fn with_default(
    name: &'static str,
    kind: ParamKind,
    default: &'static str,
    description: &'static str,
) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: false,
        default: Some(default),
        description,
    }
}

const DETAIL: ParamSpec = with_default(
    "detail",
    ParamKind::Choice(&["count", "summary", "full"]),
    "summary",
    "How much of each hit to return",
);
const DEPTH: ParamSpec = with_default("depth", ParamKind::Integer, "1", "Maximum traversal depth");
const LIMIT: ParamSpec = with_default("limit", ParamKind::Integer, "100", "Maximum number of results");
const ENTITY: ParamSpec = required("entity", ParamKind::String, "Entity id or devac:// URI");
const EDGE_TYPE: ParamSpec = param("edge_type", ParamKind::String, "Only follow edges of this type");

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "deps",
        description: "What an entity depends on",
        params: &[ENTITY, EDGE_TYPE, DEPTH, LIMIT, DETAIL],
        execute: run_deps,
    },
    CommandSpec {
        name: "dependents",
        description: "What depends on an entity",
        params: &[ENTITY, EDGE_TYPE, DEPTH, LIMIT, DETAIL],
        execute: run_dependents,
    },
    CommandSpec {
        name: "calls",
        description: "Callers and callees of an entity",
        params: &[
            ENTITY,
            with_default(
                "direction",
                ParamKind::Choice(&["callers", "callees", "both"]),
                "both",
                "Which side of the call graph",
            ),
            DEPTH,
            LIMIT,
            DETAIL,
        ],
        execute: run_calls,
    },
    CommandSpec {
        name: "imports",
        description: "File-level imports",
        params: &[
            required("file", ParamKind::String, "File path relative to its package"),
            with_default(
                "direction",
                ParamKind::Choice(&["outgoing", "incoming"]),
                "outgoing",
                "What the file imports, or who imports it",
            ),
        ],
        execute: run_imports,
    },
    CommandSpec {
        name: "unresolved",
        description: "References still waiting for the resolution pass",
        params: &[
            with_default(
                "kind",
                ParamKind::Choice(&["refs", "calls", "extends"]),
                "refs",
                "External refs, CALLS edges or EXTENDS edges",
            ),
            LIMIT,
        ],
        execute: run_unresolved,
    },
    CommandSpec {
        name: "seed_stats",
        description: "Row counts and branches of every package in scope",
        params: &[],
        execute: run_seed_stats,
    },
    CommandSpec {
        name: "query",
        description: "Read-only SQL over {nodes}, {edges}, {external_refs} and {effects}",
        params: &[required("sql", ParamKind::String, "SQL template")],
        execute: run_query,
    },
];

pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|c| c.name == name)
}

/// Validate `args` against the command's schema and run it
pub fn execute(name: &str, ctx: &CommandContext, args: Map<String, Value>) -> Result<Value> {
    let spec = find(name).ok_or_else(|| Error::NotFound(format!("command {}", name)))?;
    let args = CommandArgs::validate(spec, args)?;
    tracing::debug!(command = name, "Executing command");
    (spec.execute)(ctx, &args)
}

/// Arguments checked against a [`CommandSpec`], defaults filled in
#[derive(Debug, Clone)]
pub struct CommandArgs {
    values: Map<String, Value>,
}

impl CommandArgs {
    pub fn validate(spec: &CommandSpec, mut args: Map<String, Value>) -> Result<Self> {
        if let Some(unknown) = args.keys().find(|k| !spec.params.iter().any(|p| p.name == k.as_str())) {
            return Err(Error::Validation(format!(
                "{} does not take parameter '{}'",
                spec.name, unknown
            )));
        }

        for p in spec.params {
            let value = match args.remove(p.name) {
                Some(Value::Null) | None => match p.default {
                    Some(default) => Value::String(default.to_string()),
                    None if p.required => {
                        return Err(Error::Validation(format!(
                            "{} requires parameter '{}'",
                            spec.name, p.name
                        )));
                    }
                    None => continue,
                },
                Some(value) => value,
            };
            args.insert(p.name.to_string(), check_kind(spec, p, value)?);
        }
        Ok(Self { values: args })
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    fn required_str(&self, name: &str) -> Result<&str> {
        self.str(name)
            .ok_or_else(|| Error::Validation(format!("missing parameter '{}'", name)))
    }

    pub fn usize(&self, name: &str) -> Option<usize> {
        self.values.get(name).and_then(Value::as_u64).map(|v| v as usize)
    }

    fn parse<T: FromStr<Err = Error>>(&self, name: &str) -> Result<Option<T>> {
        self.str(name).map(|s| s.parse::<T>()).transpose()
    }
}

fn check_kind(spec: &CommandSpec, p: &ParamSpec, value: Value) -> Result<Value> {
    let invalid = |what: &str| {
        Error::Validation(format!("{}: parameter '{}' must be {}", spec.name, p.name, what))
    };
    match p.kind {
        ParamKind::String => match value {
            Value::String(_) => Ok(value),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            _ => Err(invalid("a string")),
        },
        ParamKind::Integer => {
            let parsed = match &value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse::<u64>().ok(),
                _ => None,
            };
            parsed.map(Value::from).ok_or_else(|| invalid("a non-negative integer"))
        }
        ParamKind::Choice(choices) => match value.as_str() {
            Some(s) if choices.contains(&s.to_lowercase().as_str()) => Ok(Value::String(s.to_lowercase())),
            _ => Err(invalid(&format!("one of {}", choices.join(", ")))),
        },
    }
}

fn traversal_args(args: &CommandArgs) -> Result<(String, Option<EdgeType>, usize, usize, DetailLevel)> {
    Ok((
        args.required_str("entity")?.to_string(),
        args.parse::<EdgeType>("edge_type")?,
        args.usize("depth").unwrap_or(1),
        args.usize("limit").unwrap_or(100),
        args.parse::<DetailLevel>("detail")?.unwrap_or_default(),
    ))
}

fn run_deps(ctx: &CommandContext, args: &CommandArgs) -> Result<Value> {
    let (entity, edge_type, depth, limit, detail) = traversal_args(args)?;
    let graph = CodeGraph::load(&ctx.scope)?;
    let hits = QueryEngine::new(&graph).deps(&entity, edge_type, depth, limit)?;
    Ok(serde_json::to_value(detail.render(hits))?)
}

fn run_dependents(ctx: &CommandContext, args: &CommandArgs) -> Result<Value> {
    let (entity, edge_type, depth, limit, detail) = traversal_args(args)?;
    let graph = CodeGraph::load(&ctx.scope)?;
    let hits = QueryEngine::new(&graph).dependents(&entity, edge_type, depth, limit)?;
    Ok(serde_json::to_value(detail.render(hits))?)
}

fn run_calls(ctx: &CommandContext, args: &CommandArgs) -> Result<Value> {
    let entity = args.required_str("entity")?;
    let direction = args.parse::<CallDirection>("direction")?.unwrap_or(CallDirection::Both);
    let depth = args.usize("depth").unwrap_or(1);
    let limit = args.usize("limit").unwrap_or(100);
    let detail = args.parse::<DetailLevel>("detail")?.unwrap_or_default();

    let graph = CodeGraph::load(&ctx.scope)?;
    let hits = QueryEngine::new(&graph).calls(entity, direction, depth, limit)?;
    let (callers, callees): (Vec<_>, Vec<_>) = hits.into_iter().partition(|h| h.relation == CallDirection::Callers);

    let mut out = Map::new();
    if direction != CallDirection::Callees {
        let callers = callers.into_iter().map(|h| h.hit).collect();
        out.insert("callers".to_string(), serde_json::to_value(detail.render(callers))?);
    }
    if direction != CallDirection::Callers {
        let callees = callees.into_iter().map(|h| h.hit).collect();
        out.insert("callees".to_string(), serde_json::to_value(detail.render(callees))?);
    }
    Ok(Value::Object(out))
}

fn run_imports(ctx: &CommandContext, args: &CommandArgs) -> Result<Value> {
    let file = args.required_str("file")?;
    let direction = args.parse::<ImportDirection>("direction")?.unwrap_or(ImportDirection::Outgoing);
    let graph = CodeGraph::load(&ctx.scope)?;
    let hits = QueryEngine::new(&graph).imports(file, direction)?;
    Ok(json!({ "file": file, "direction": direction, "imports": hits }))
}

fn run_unresolved(ctx: &CommandContext, args: &CommandArgs) -> Result<Value> {
    let limit = args.usize("limit").unwrap_or(100);
    let kind = args.str("kind").unwrap_or("refs");
    let mut rows = Vec::new();

    for reader in ctx.readers() {
        let package = reader.package_root().display().to_string();
        let found: Vec<Value> = match kind {
            "refs" => to_values(reader.get_unresolved_refs(&ctx.scope.branch)?)?,
            "calls" => to_values(reader.get_unresolved_call_edges(&ctx.scope.branch)?)?,
            _ => to_values(reader.get_unresolved_extends_edges(&ctx.scope.branch)?)?,
        };
        for mut row in found {
            if let Value::Object(map) = &mut row {
                map.insert("package".to_string(), Value::String(package.clone()));
            }
            rows.push(row);
            if rows.len() >= limit {
                return Ok(json!({ "kind": kind, "results": rows, "truncated": true }));
            }
        }
    }
    Ok(json!({ "kind": kind, "results": rows, "truncated": false }))
}

fn to_values<T: Serialize>(rows: Vec<T>) -> Result<Vec<Value>> {
    rows.into_iter()
        .map(|r| serde_json::to_value(r).map_err(Into::into))
        .collect()
}

fn run_seed_stats(ctx: &CommandContext, _args: &CommandArgs) -> Result<Value> {
    let mut packages = Vec::new();
    for reader in ctx.readers() {
        let meta = reader.meta()?;
        packages.push(json!({
            "package": reader.package_root().display().to_string(),
            "branch": reader.branch(),
            "exists": reader.exists(),
            "branches": list_branches(reader.package_root())?,
            "rowCounts": meta.as_ref().map(|m| m.row_counts),
            "updatedAt": meta.map(|m| m.updated_at),
        }));
    }
    Ok(json!({ "packages": packages }))
}

fn run_query(ctx: &CommandContext, args: &CommandArgs) -> Result<Value> {
    let sql = args.required_str("sql")?;
    let rows = SeedReader::query_multiple_packages(&ctx.readers(), sql)?;
    let count = rows.len();
    Ok(json!({ "rows": rows, "count": count }))
}
