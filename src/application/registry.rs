use super::intents::Intent;
use std::collections::{HashMap, HashSet};

/// Declared abilities of a tool, checked against inferred intents before a
/// request is dispatched. Static per tool; never mutated at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolCapabilities {
    pub generate_code: bool,
    pub edit_files: bool,
    pub execute_code: bool,
    pub access_time: bool,
    pub access_network: bool,
    pub read_files: bool,
}

impl ToolCapabilities {
    pub const NONE: Self = Self {
        generate_code: false,
        edit_files: false,
        execute_code: false,
        access_time: false,
        access_network: false,
        read_files: false,
    };

    const fn generates_code(mut self) -> Self {
        self.generate_code = true;
        self
    }

    const fn edits_files(mut self) -> Self {
        self.edit_files = true;
        self
    }

    const fn reads_files(mut self) -> Self {
        self.read_files = true;
        self
    }

    const fn accesses_time(mut self) -> Self {
        self.access_time = true;
        self
    }

    const fn accesses_network(mut self) -> Self {
        self.access_network = true;
        self
    }

    /// A filesystem intent is satisfied by either reading files or executing
    /// code; every other intent maps to exactly one flag.
    pub fn satisfies(self, intent: Intent) -> bool {
        match intent {
            Intent::AccessTime => self.access_time,
            Intent::AccessNetwork => self.access_network,
            Intent::GenerateCode => self.generate_code,
            Intent::EditFiles => self.edit_files,
            Intent::AccessFilesystem => self.read_files || self.execute_code,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ToolArgument {
    pub name: &'static str,
    pub arg_type: &'static str,
    pub required: bool,
}

impl ToolArgument {
    const fn required(name: &'static str, arg_type: &'static str) -> Self {
        Self {
            name,
            arg_type,
            required: true,
        }
    }

    const fn optional(name: &'static str, arg_type: &'static str) -> Self {
        Self {
            name,
            arg_type,
            required: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub server: &'static str,
    pub args: &'static [ToolArgument],
    pub capabilities: ToolCapabilities,
}

impl ToolDefinition {
    pub fn has_arg(&self, name: &str) -> bool {
        self.args.iter().any(|arg| arg.name == name)
    }

    /// `name(req: type, opt?: type)` line for the system prompt.
    fn prompt_signature(&self) -> String {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                if arg.required {
                    format!("{}: {}", arg.name, arg.arg_type)
                } else {
                    format!("{}?: {}", arg.name, arg.arg_type)
                }
            })
            .collect();
        format!("- {}({})", self.name, args.join(", "))
    }
}

const BUILTIN_TOOLS: &[ToolDefinition] = &[
    ToolDefinition {
        name: "codex_generate",
        description: "Generate code based on a prompt",
        server: "codex",
        args: &[ToolArgument::required("prompt", "string")],
        capabilities: ToolCapabilities::NONE.generates_code(),
    },
    ToolDefinition {
        name: "codex_plan",
        description: "Create a development plan for a repository",
        server: "codex",
        args: &[
            ToolArgument::required("repo_path", "string"),
            ToolArgument::required("goal", "string"),
        ],
        capabilities: ToolCapabilities::NONE.reads_files(),
    },
    ToolDefinition {
        name: "codex_analyze",
        description: "Analyze code in a repository",
        server: "codex",
        args: &[
            ToolArgument::required("repo_path", "string"),
            ToolArgument::required("question", "string"),
        ],
        capabilities: ToolCapabilities::NONE.reads_files(),
    },
    ToolDefinition {
        name: "codex_summarize",
        description: "Summarize code in a repository",
        server: "codex",
        args: &[
            ToolArgument::required("repo_path", "string"),
            ToolArgument::optional("focus", "string"),
        ],
        capabilities: ToolCapabilities::NONE.reads_files(),
    },
    ToolDefinition {
        name: "codex_doc_outline",
        description: "Generate documentation outline for a repository",
        server: "codex",
        args: &[
            ToolArgument::required("repo_path", "string"),
            ToolArgument::required("topic", "string"),
            ToolArgument::optional("audience", "string"),
        ],
        capabilities: ToolCapabilities::NONE.reads_files(),
    },
    ToolDefinition {
        name: "codex_test_plan",
        description: "Create a test plan for a repository",
        server: "codex",
        args: &[
            ToolArgument::required("repo_path", "string"),
            ToolArgument::required("goal", "string"),
        ],
        capabilities: ToolCapabilities::NONE.reads_files(),
    },
    ToolDefinition {
        name: "codex_edit",
        description: "Edit files in a repository",
        server: "codex",
        args: &[
            ToolArgument::required("repo_path", "string"),
            ToolArgument::required("instruction", "string"),
        ],
        capabilities: ToolCapabilities::NONE.edits_files().reads_files(),
    },
    ToolDefinition {
        name: "codex_refactor",
        description: "Refactor code in a repository",
        server: "codex",
        args: &[
            ToolArgument::required("repo_path", "string"),
            ToolArgument::required("goal", "string"),
            ToolArgument::optional("constraints", "string"),
        ],
        capabilities: ToolCapabilities::NONE.edits_files().reads_files(),
    },
    ToolDefinition {
        name: "google_list_events",
        description: "List events from a Google Calendar within a date range",
        server: "google-calendar",
        args: &[
            ToolArgument::optional("calendar_id", "string"),
            ToolArgument::optional("start_date", "string"),
            ToolArgument::optional("end_date", "string"),
            ToolArgument::optional("max_results", "int"),
        ],
        capabilities: ToolCapabilities::NONE.accesses_network().accesses_time(),
    },
    ToolDefinition {
        name: "google_create_event",
        description: "Create a new event in a Google Calendar",
        server: "google-calendar",
        args: &[
            ToolArgument::required("title", "string"),
            ToolArgument::required("start_time", "string"),
            ToolArgument::required("end_time", "string"),
            ToolArgument::optional("calendar_id", "string"),
            ToolArgument::optional("description", "string"),
            ToolArgument::optional("attendees", "list[string]"),
        ],
        capabilities: ToolCapabilities::NONE.accesses_network().accesses_time(),
    },
    ToolDefinition {
        name: "google_update_event",
        description: "Update an existing event in a Google Calendar",
        server: "google-calendar",
        args: &[
            ToolArgument::required("event_id", "string"),
            ToolArgument::optional("calendar_id", "string"),
            ToolArgument::optional("title", "string"),
            ToolArgument::optional("description", "string"),
            ToolArgument::optional("start_time", "string"),
            ToolArgument::optional("end_time", "string"),
        ],
        capabilities: ToolCapabilities::NONE.accesses_network().accesses_time(),
    },
    ToolDefinition {
        name: "google_delete_event",
        description: "Delete an event from a Google Calendar",
        server: "google-calendar",
        args: &[
            ToolArgument::required("event_id", "string"),
            ToolArgument::optional("calendar_id", "string"),
        ],
        capabilities: ToolCapabilities::NONE.accesses_network().accesses_time(),
    },
];

/// Name-indexed view over the built-in tool definitions, constructed once at
/// startup and shared read-only from then on.
pub struct Registry {
    tools: Vec<ToolDefinition>,
    index: HashMap<&'static str, usize>,
}

impl Registry {
    pub fn builtin() -> Self {
        let tools: Vec<ToolDefinition> = BUILTIN_TOOLS.to_vec();
        let index = tools
            .iter()
            .enumerate()
            .map(|(position, tool)| (tool.name, position))
            .collect();
        Self { tools, index }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.index.get(name).map(|position| &self.tools[*position])
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// The capability gate. Unknown tools are denied outright; otherwise
    /// every inferred intent must be satisfied by a declared capability.
    pub fn tool_can_handle(&self, name: &str, intents: &HashSet<Intent>) -> bool {
        let Some(definition) = self.get(name) else {
            return false;
        };
        intents
            .iter()
            .all(|intent| definition.capabilities.satisfies(*intent))
    }

    /// The `Available tools:` section of the planner system prompt, so the
    /// prompt and the gate share one source of truth.
    pub fn system_prompt_tools_section(&self) -> String {
        let mut lines = vec!["Available tools:".to_string()];
        for tool in &self.tools {
            lines.push(tool.prompt_signature());
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intents(values: &[Intent]) -> HashSet<Intent> {
        values.iter().copied().collect()
    }

    #[test]
    fn unknown_tool_is_denied_regardless_of_intents() {
        let registry = Registry::builtin();
        assert!(!registry.tool_can_handle("made_up_tool", &HashSet::new()));
        assert!(!registry.tool_can_handle("made_up_tool", &intents(&[Intent::GenerateCode])));
    }

    #[test]
    fn empty_intent_set_passes_for_known_tools() {
        let registry = Registry::builtin();
        assert!(registry.tool_can_handle("codex_generate", &HashSet::new()));
    }

    #[test]
    fn every_intent_must_be_satisfied() {
        let registry = Registry::builtin();
        assert!(registry.tool_can_handle("codex_generate", &intents(&[Intent::GenerateCode])));
        assert!(!registry.tool_can_handle(
            "codex_generate",
            &intents(&[Intent::GenerateCode, Intent::AccessNetwork])
        ));
    }

    #[test]
    fn filesystem_intent_accepts_file_readers() {
        let registry = Registry::builtin();
        assert!(registry.tool_can_handle("codex_analyze", &intents(&[Intent::AccessFilesystem])));
        assert!(!registry.tool_can_handle("codex_generate", &intents(&[Intent::AccessFilesystem])));
    }

    #[test]
    fn calendar_tools_cover_time_and_network() {
        let registry = Registry::builtin();
        assert!(registry.tool_can_handle(
            "google_create_event",
            &intents(&[Intent::AccessTime, Intent::AccessNetwork])
        ));
        assert!(!registry.tool_can_handle("google_create_event", &intents(&[Intent::EditFiles])));
    }

    #[test]
    fn prompt_section_lists_signatures() {
        let registry = Registry::builtin();
        let section = registry.system_prompt_tools_section();
        assert!(section.starts_with("Available tools:"));
        assert!(section.contains("- codex_generate(prompt: string)"));
        assert!(section.contains("- codex_summarize(repo_path: string, focus?: string)"));
        assert!(section.contains("- google_delete_event(event_id: string, calendar_id?: string)"));
    }

    #[test]
    fn repo_path_tools_expose_the_argument() {
        let registry = Registry::builtin();
        for name in [
            "codex_edit",
            "codex_refactor",
            "codex_plan",
            "codex_analyze",
            "codex_summarize",
            "codex_doc_outline",
            "codex_test_plan",
        ] {
            assert!(registry.get(name).expect("registered").has_arg("repo_path"));
        }
        assert!(!registry.get("codex_generate").expect("registered").has_arg("repo_path"));
    }
}
