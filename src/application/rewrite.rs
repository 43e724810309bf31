use super::registry::Registry;
use serde_json::{Value, json};
use std::path::Path;
use tracing::{debug, info};

/// A structured tool directive recovered from free-form model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub tool: String,
    pub arguments: Value,
    /// Set when the payload carried a `_normalized` marker, which exempts it
    /// from nested-payload unwrapping.
    pub normalized: bool,
}

impl ToolRequest {
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool: tool.into(),
            arguments,
            normalized: false,
        }
    }

    /// Extract a request from a parsed model reply. A missing or non-string
    /// `tool` yields an empty name, which the capability gate later denies.
    pub fn from_value(value: &Value) -> Self {
        Self {
            tool: value
                .get("tool")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            arguments: value.get("arguments").cloned().unwrap_or_else(|| json!({})),
            normalized: value.get("_normalized").is_some_and(value_is_truthy),
        }
    }
}

pub struct RewriteContext<'a> {
    pub registry: &'a Registry,
    pub calendar_tz_offset: &'a str,
    pub workdir: &'a Path,
}

/// A single named reshaping step over a tool request. Model output is
/// free-form, so these are ad hoc pattern matches; keeping them as an ordered
/// list makes each independently testable and safely extensible.
pub struct RewriteRule {
    pub name: &'static str,
    pub apply: fn(&mut ToolRequest, &RewriteContext),
}

/// Rules applied before the capability gate sees the request.
pub const PRE_GATE_RULES: &[RewriteRule] = &[
    RewriteRule {
        name: "unwrap_nested_payload",
        apply: unwrap_nested_payload,
    },
    RewriteRule {
        name: "retarget_generate_to_edit",
        apply: retarget_generate_to_edit,
    },
    RewriteRule {
        name: "strip_redundant_prefix",
        apply: strip_redundant_prefix,
    },
    RewriteRule {
        name: "localize_calendar_times",
        apply: localize_calendar_times,
    },
];

/// Argument-defaulting rules applied after the gate has admitted the request.
pub const POST_GATE_RULES: &[RewriteRule] = &[
    RewriteRule {
        name: "merge_edit_target_path",
        apply: merge_edit_target_path,
    },
    RewriteRule {
        name: "default_repo_path",
        apply: default_repo_path,
    },
];

pub fn apply(rules: &[RewriteRule], request: &mut ToolRequest, ctx: &RewriteContext) {
    for rule in rules {
        let before = request.tool.clone();
        (rule.apply)(request, ctx);
        if request.tool != before {
            debug!(rule = rule.name, from = %before, to = %request.tool, "Rewrite rule changed tool target");
        }
    }
}

/// Some models echo the request shape back wrapped in itself:
/// `{tool, arguments: {tool, arguments}}`.
fn unwrap_nested_payload(request: &mut ToolRequest, _ctx: &RewriteContext) {
    if request.normalized {
        return;
    }
    let Some(args) = request.arguments.as_object() else {
        return;
    };
    if !(args.contains_key("tool") && args.contains_key("arguments")) {
        return;
    }
    let Some(nested_tool) = args.get("tool").and_then(Value::as_str) else {
        return;
    };
    if nested_tool.is_empty() {
        return;
    }
    let nested_args = args.get("arguments").cloned().unwrap_or_else(|| json!({}));
    request.tool = nested_tool.to_string();
    request.arguments = nested_args;
}

const FILE_CREATION_PHRASES: &[&str] = &[
    "create a file",
    "create file",
    "write a file",
    "write file",
    "save file",
    "add a file",
];

/// A generate request whose prompt reads like a file-creation instruction is
/// really an edit: retarget it with repository path and instruction.
fn retarget_generate_to_edit(request: &mut ToolRequest, _ctx: &RewriteContext) {
    if request.tool != "codex_generate" {
        return;
    }
    let Some(args) = request.arguments.as_object() else {
        return;
    };
    let Some(prompt) = args.get("prompt") else {
        return;
    };
    let prompt_text = match prompt {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    if prompt_text.is_empty() {
        return;
    }
    let lowered = prompt_text.to_lowercase();
    let retarget = args.contains_key("repo_path")
        || FILE_CREATION_PHRASES
            .iter()
            .any(|phrase| lowered.contains(phrase));
    if !retarget {
        return;
    }
    let repo_path = args
        .get("repo_path")
        .cloned()
        .unwrap_or_else(|| Value::String(".".to_string()));
    request.tool = "codex_edit".to_string();
    request.arguments = json!({
        "repo_path": repo_path,
        "instruction": prompt_text,
    });
}

/// Drop a redundant `codex_` prefix from names like `codex_create_event`
/// when the bare name is the one actually registered.
fn strip_redundant_prefix(request: &mut ToolRequest, ctx: &RewriteContext) {
    if ctx.registry.contains(&request.tool) {
        return;
    }
    let Some(candidate) = request.tool.strip_prefix("codex_") else {
        return;
    };
    if ctx.registry.contains(candidate) {
        info!(from = %request.tool, to = candidate, "Normalizing over-qualified tool name");
        request.tool = candidate.to_string();
    }
}

/// Calendar tools receive local wall-clock times: a trailing UTC `Z` on
/// `start_time`/`end_time` is replaced with the configured offset.
fn localize_calendar_times(request: &mut ToolRequest, ctx: &RewriteContext) {
    if !request.tool.starts_with("google_") {
        return;
    }
    let Some(args) = request.arguments.as_object_mut() else {
        return;
    };
    for key in ["start_time", "end_time"] {
        let Some(current) = args.get(key).and_then(Value::as_str) else {
            continue;
        };
        if let Some(stripped) = current.strip_suffix('Z') {
            let localized = format!("{stripped}{}", ctx.calendar_tz_offset);
            info!(key, offset = ctx.calendar_tz_offset, "Replaced UTC suffix with configured offset");
            args.insert(key.to_string(), Value::String(localized));
        }
    }
}

/// `codex_edit` sometimes arrives with a stray `path` argument; fold it into
/// the instruction text unless the instruction already names the file.
fn merge_edit_target_path(request: &mut ToolRequest, _ctx: &RewriteContext) {
    if request.tool != "codex_edit" {
        return;
    }
    let Some(args) = request.arguments.as_object_mut() else {
        return;
    };
    let Some(path_value) = args.remove("path") else {
        return;
    };
    let path_text = match &path_value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    if path_text.is_empty() {
        return;
    }
    let instruction = args
        .get("instruction")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if !instruction.to_lowercase().contains("file") || !instruction.contains(&path_text) {
        let merged = format!("{instruction}\n\nTarget path: {path_text}")
            .trim()
            .to_string();
        args.insert("instruction".to_string(), Value::String(merged));
    }
}

/// Tools operating on a repository default to the current working directory;
/// relative paths are resolved to absolute before dispatch.
fn default_repo_path(request: &mut ToolRequest, ctx: &RewriteContext) {
    let Some(definition) = ctx.registry.get(&request.tool) else {
        return;
    };
    if !definition.has_arg("repo_path") {
        return;
    }
    let Some(args) = request.arguments.as_object_mut() else {
        return;
    };
    let current = args
        .get("repo_path")
        .and_then(Value::as_str)
        .map(str::to_string);
    match current {
        Some(path) if !path.is_empty() => {
            if !Path::new(&path).is_absolute() {
                let resolved = ctx.workdir.join(&path);
                args.insert(
                    "repo_path".to_string(),
                    Value::String(resolved.to_string_lossy().into_owned()),
                );
            }
        }
        _ => {
            args.insert(
                "repo_path".to_string(),
                Value::String(ctx.workdir.to_string_lossy().into_owned()),
            );
        }
    }
}

fn value_is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
