use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_MODEL: &str = "gpt-oss:20b";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_CONFIG_PATH: &str = "config/agent.toml";
const DEFAULT_MODEL_TIMEOUT_S: u64 = 120;
const DEFAULT_MAX_TOOL_STEPS: usize = 3;
const DEFAULT_MEMORY_CAPACITY: usize = 20;
const DEFAULT_CALENDAR_TZ_OFFSET: &str = "+08:00";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: String,
    pub ollama_url: String,
    pub model_timeout_s: u64,
    pub max_tool_steps: usize,
    /// Conversation memory capacity. Zero disables memory entirely.
    pub memory_capacity: usize,
    pub calendar_tz_offset: String,
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    model: Option<String>,
    ollama_url: Option<String>,
    model_timeout_s: Option<u64>,
    max_tool_steps: Option<usize>,
    memory_capacity: Option<i64>,
    calendar_tz_offset: Option<String>,
    #[serde(default)]
    servers: Vec<ServerConfig>,
}

/// Transport descriptor for a stdio tool server. The transport itself is
/// line-framed UTF-8; everything else is configurable per server.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ServerConfig {
    /// Conventional layout for a server that has no `[[servers]]` entry:
    /// a Python MCP module living under `mcp/<server>/`.
    pub fn default_for(key: &str) -> Self {
        let folder = if key == "codex" { "codex-server" } else { key };
        Self {
            name: key.to_string(),
            command: "python".to_string(),
            args: vec!["-m".to_string(), "app.main".to_string()],
            workdir: Some(PathBuf::from(format!("mcp/{folder}"))),
            env: HashMap::new(),
        }
    }
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return read_config(path);
        }
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        match read_config(default_path) {
            Ok(config) => Ok(config),
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                info!("Configuration file not found; using defaults");
                Ok(Self::default())
            }
            Err(other) => Err(other),
        }
    }

    pub fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            model_timeout_s: DEFAULT_MODEL_TIMEOUT_S,
            max_tool_steps: DEFAULT_MAX_TOOL_STEPS,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            calendar_tz_offset: DEFAULT_CALENDAR_TZ_OFFSET.to_string(),
            servers: Vec::new(),
        }
    }

    /// Environment variables win over file values. `lookup` is injected so
    /// tests can exercise the precedence without touching process state.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        if let Some(value) = non_empty(lookup("OLLAMA_MODEL")) {
            self.model = value;
        }
        if let Some(value) = non_empty(lookup("OLLAMA_BASE_URL")) {
            self.ollama_url = value;
        } else if let Some(value) = non_empty(lookup("OLLAMA_HOST")) {
            self.ollama_url = value;
        }
        if let Some(value) = non_empty(lookup("OLLAMA_TIMEOUT")).and_then(|v| v.parse().ok()) {
            self.model_timeout_s = value;
        }
        if let Some(value) = non_empty(lookup("AGENT_MAX_TOOL_STEPS")).and_then(|v| v.parse().ok())
        {
            self.max_tool_steps = value;
        }
        if let Some(value) =
            non_empty(lookup("AGENT_MEMORY_CAPACITY")).and_then(|v| v.parse::<i64>().ok())
        {
            self.memory_capacity = value.max(0) as usize;
        }
        if let Some(value) = non_empty(lookup("CALENDAR_TIMEZONE_OFFSET")) {
            self.calendar_tz_offset = value;
        }
    }

}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    debug!(path = %path.display(), "Reading agent configuration file");
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: RawConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(AppConfig {
        model: parsed.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        ollama_url: parsed
            .ollama_url
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
        model_timeout_s: parsed.model_timeout_s.unwrap_or(DEFAULT_MODEL_TIMEOUT_S),
        max_tool_steps: parsed.max_tool_steps.unwrap_or(DEFAULT_MAX_TOOL_STEPS),
        memory_capacity: parsed
            .memory_capacity
            .map(|value| value.max(0) as usize)
            .unwrap_or(DEFAULT_MEMORY_CAPACITY),
        calendar_tz_offset: parsed
            .calendar_tz_offset
            .unwrap_or_else(|| DEFAULT_CALENDAR_TZ_OFFSET.to_string()),
        servers: parsed.servers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn returns_default_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.toml");

        let error = AppConfig::load(Some(&path)).expect_err("missing file errors");
        assert!(matches!(error, ConfigError::Io { .. }));

        let config = AppConfig::default();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_tool_steps, 3);
        assert_eq!(config.memory_capacity, 20);
        assert_eq!(config.calendar_tz_offset, "+08:00");
        assert!(config.servers.is_empty());
    }

    #[test]
    fn reads_values_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("agent.toml");
        let mut file = File::create(&path).expect("create config");
        writeln!(
            file,
            r#"
model = "mistral"
ollama_url = "http://ollama.internal:11434"
max_tool_steps = 5
memory_capacity = 8
calendar_tz_offset = "+07:00"

[[servers]]
name = "codex"
command = "python3"
args = ["-m", "app.main"]
workdir = "/srv/mcp/codex-server"
"#
        )
        .expect("write");

        let config = AppConfig::load(Some(&path)).expect("load config");
        assert_eq!(config.model, "mistral");
        assert_eq!(config.ollama_url, "http://ollama.internal:11434");
        assert_eq!(config.max_tool_steps, 5);
        assert_eq!(config.memory_capacity, 8);
        assert_eq!(config.calendar_tz_offset, "+07:00");
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].command, "python3");
    }

    #[test]
    fn negative_capacity_collapses_to_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("agent.toml");
        fs::write(&path, "memory_capacity = -4").expect("write");

        let config = AppConfig::load(Some(&path)).expect("load");
        assert_eq!(config.memory_capacity, 0);
    }

    #[test]
    fn overrides_win_over_file_values() {
        let mut config = AppConfig::default();
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OLLAMA_MODEL", "llama3"),
            ("OLLAMA_BASE_URL", "http://10.0.0.2:11434"),
            ("AGENT_MAX_TOOL_STEPS", "7"),
            ("AGENT_MEMORY_CAPACITY", "-1"),
        ]);
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.model, "llama3");
        assert_eq!(config.ollama_url, "http://10.0.0.2:11434");
        assert_eq!(config.max_tool_steps, 7);
        assert_eq!(config.memory_capacity, 0);
    }

    #[test]
    fn host_variable_is_a_fallback() {
        let mut config = AppConfig::default();
        config.apply_overrides(|key| {
            (key == "OLLAMA_HOST").then(|| "http://fallback:11434".to_string())
        });
        assert_eq!(config.ollama_url, "http://fallback:11434");
    }

    #[test]
    fn conventional_server_layout_by_key() {
        let server = ServerConfig::default_for("google-calendar");
        assert_eq!(server.command, "python");
        assert_eq!(server.args, vec!["-m", "app.main"]);
        assert_eq!(
            server.workdir.as_deref(),
            Some(Path::new("mcp/google-calendar"))
        );

        let codex = ServerConfig::default_for("codex");
        assert_eq!(codex.workdir.as_deref(), Some(Path::new("mcp/codex-server")));
    }
}
