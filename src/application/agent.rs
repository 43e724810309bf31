use super::intents::{Intent, infer_intents};
use super::memory::ConversationMemory;
use super::normalize::normalize_codex_output;
use super::registry::Registry;
use super::rewrite::{self, RewriteContext, ToolRequest};
use super::tooling::{RawToolResult, ToolExecutor, ToolInvokeError};
use crate::config::{AppConfig, ServerConfig};
use crate::model::{ModelError, ModelProvider, ModelRequest};
use crate::types::{ChatMessage, MessageRole};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const REFUSAL_MESSAGE: &str = "I cannot complete this request with the available tools.\nReason: required capability is missing.";
const STEP_LIMIT_MESSAGE: &str =
    "Reached the tool step limit. Please refine the request or try again.";
const EMPTY_RESPONSE_MESSAGE: &str = "The language model returned an empty response. Check OLLAMA_BASE_URL/OLLAMA_MODEL/OLLAMA_TIMEOUT and try again.";
const FOLLOW_UP_PROMPT: &str = "Use the tool result above to continue. If another tool call is required, respond with a tool call JSON. Otherwise, provide the final answer.";

/// The planner prompt: behavioural rules plus the registry-derived tool
/// catalogue, so the prompt and the capability gate share one source of truth.
pub fn system_prompt(registry: &Registry) -> String {
    format!(
        "You are the planning model of a conversational assistant.\n\
         \n\
         Rules:\n\
         - You do NOT execute code.\n\
         - You do NOT modify files directly.\n\
         - You may request tools.\n\
         \n\
         {tools}\n\
         \n\
         Tool usage rules:\n\
         - If the user explicitly asks to use a tool (e.g. \"use codex\", \"using only codex tool\"), you MUST respond with a tool call.\n\
         - If you cannot confidently answer without code generation or editing, use a tool.\n\
         - If the user asks for the current working directory, current path, or repo location, use codex_analyze with repo_path \".\" and restate the question as the tool input.\n\
         - If the user asks to create, write, save, or add a file, use codex_edit.\n\
         - If you can answer fully in text, answer directly.\n\
         \n\
         When calling a tool, respond ONLY in valid JSON:\n\
         \n\
         {{\n  \"tool\": \"<tool_name>\",\n  \"arguments\": {{ ... }}\n}}\n\
         \n\
         Do NOT return empty responses.",
        tools = registry.system_prompt_tools_section()
    )
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub max_tool_steps: usize,
    pub calendar_tz_offset: String,
    pub servers: Vec<ServerConfig>,
}

impl AgentConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tool_steps: config.max_tool_steps,
            calendar_tz_offset: config.calendar_tz_offset.clone(),
            servers: config.servers.clone(),
        }
    }

    fn server_for(&self, key: &str) -> ServerConfig {
        self.servers
            .iter()
            .find(|server| server.name == key)
            .cloned()
            .unwrap_or_else(|| ServerConfig::default_for(key))
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Tool(#[from] ToolInvokeError),
}

impl AgentError {
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Model(err) => err.user_message(),
            AgentError::Tool(err) => err.user_message(),
        }
    }
}

/// The orchestration loop: queries the model, decides between final answer
/// and tool request, gates requests against inferred intents, executes
/// allowed requests, and iterates up to the configured step bound.
pub struct Agent<P: ModelProvider> {
    provider: P,
    executor: Arc<dyn ToolExecutor>,
    registry: Arc<Registry>,
    config: AgentConfig,
    system_prompt: String,
}

impl<P: ModelProvider> Agent<P> {
    pub fn new(
        provider: P,
        executor: Arc<dyn ToolExecutor>,
        registry: Arc<Registry>,
        config: AgentConfig,
    ) -> Self {
        let system_prompt = system_prompt(&registry);
        Self {
            provider,
            executor,
            registry,
            config,
            system_prompt,
        }
    }

    pub fn registry(&self) -> &Registry {
        self.registry.as_ref()
    }

    /// Run one user turn to completion. Refusals, the step-limit notice, and
    /// the empty-model notice are ordinary `Ok` text: they travel through the
    /// same channel as answers. Only transport failures surface as errors.
    pub async fn run(
        &self,
        user_input: &str,
        memory: &Mutex<ConversationMemory>,
    ) -> Result<String, AgentError> {
        let lowered = user_input.to_lowercase();
        // Literal tool-family mention with a usage verb disables the
        // capability gate. A deliberate escape hatch: the user accepts the
        // risk of a mismatched call.
        let explicit_tool_request = lowered.contains("codex")
            && (lowered.contains("use") || lowered.contains("using") || lowered.contains("tool"));
        info!(explicit_tool_request, "Agent turn started");

        let history = memory.lock().await.get_messages();
        let reply = self.query_model(history, user_input).await?;
        memory.lock().await.add_user(user_input);
        debug!(chars = reply.len(), "Model reply received");

        if reply.trim().is_empty() {
            warn!("Model returned an empty reply");
            if lowered.contains("codex") {
                let request =
                    ToolRequest::new("codex_generate", json!({ "prompt": user_input }));
                info!(tool = %request.tool, "Falling back to the code generation tool");
                let intents = infer_intents(user_input);
                if !explicit_tool_request
                    && !self.registry.tool_can_handle(&request.tool, &intents)
                {
                    warn!(tool = %request.tool, ?intents, "Tool cannot satisfy inferred intents");
                    return Ok(REFUSAL_MESSAGE.to_string());
                }
                let result = self.dispatch(&request).await?;
                return Ok(normalize_codex_output(&result.content).message);
            }
            return Ok(EMPTY_RESPONSE_MESSAGE.to_string());
        }

        let mut tool_steps = 0usize;
        let mut current_reply = reply;

        loop {
            // Intents are recomputed from the original utterance on every
            // iteration, not from follow-up replies.
            let intents = infer_intents(user_input);

            let parsed = serde_json::from_str::<Value>(&current_reply)
                .ok()
                .filter(Value::is_object);
            let Some(parsed) = parsed else {
                // Not a tool directive: the reply is the answer, unless the
                // utterance was a filesystem question the model answered
                // without looking.
                if intents.contains(&Intent::AccessFilesystem) {
                    let request = ToolRequest::new(
                        "codex_analyze",
                        json!({ "repo_path": ".", "question": user_input }),
                    );
                    if !explicit_tool_request
                        && !self.registry.tool_can_handle(&request.tool, &intents)
                    {
                        warn!(tool = %request.tool, ?intents, "Tool cannot satisfy inferred intents");
                        return Ok(REFUSAL_MESSAGE.to_string());
                    }
                    let result = self.dispatch(&request).await?;
                    return Ok(normalize_codex_output(&result.content).message);
                }

                memory.lock().await.add_assistant(current_reply.clone());
                info!("Agent turn finished with a direct answer");
                return Ok(current_reply);
            };

            // A filesystem question wins over whatever the model asked for:
            // the parsed request is discarded in favour of a cwd analysis.
            if intents.contains(&Intent::AccessFilesystem) && !explicit_tool_request {
                let workdir = current_workdir();
                let cwd = workdir.to_string_lossy();
                let request = ToolRequest::new(
                    "codex_analyze",
                    json!({
                        "repo_path": cwd,
                        "question": format!("Current working directory is: {cwd}. {user_input}"),
                    }),
                );
                memory
                    .lock()
                    .await
                    .add_tool_call(&request.tool, &request.arguments);
                let result = self.dispatch(&request).await?;
                let normalized = normalize_codex_output(&result.content);
                memory
                    .lock()
                    .await
                    .add_tool_result(&request.tool, &normalized.message);
                return Ok(normalized.message);
            }

            let mut request = ToolRequest::from_value(&parsed);
            let workdir = current_workdir();
            let ctx = RewriteContext {
                registry: self.registry.as_ref(),
                calendar_tz_offset: &self.config.calendar_tz_offset,
                workdir: &workdir,
            };
            rewrite::apply(rewrite::PRE_GATE_RULES, &mut request, &ctx);
            info!(tool = %request.tool, "Tool request received");
            debug!(arguments = %request.arguments, "Tool request arguments");

            if !explicit_tool_request && !self.registry.tool_can_handle(&request.tool, &intents) {
                warn!(tool = %request.tool, ?intents, "Tool cannot satisfy inferred intents");
                return Ok(REFUSAL_MESSAGE.to_string());
            }

            rewrite::apply(rewrite::POST_GATE_RULES, &mut request, &ctx);

            memory
                .lock()
                .await
                .add_tool_call(&request.tool, &request.arguments);
            let result = self.dispatch(&request).await?;

            // Only the codex family speaks the streamed event protocol;
            // other tools' output passes through untouched.
            let tool_output = if request.tool.starts_with("codex_") {
                normalize_codex_output(&result.content).message
            } else {
                result.text()
            };
            memory
                .lock()
                .await
                .add_tool_result(&request.tool, &tool_output);

            tool_steps += 1;
            if tool_steps >= self.config.max_tool_steps {
                warn!(steps = tool_steps, "Tool step limit reached");
                return Ok(STEP_LIMIT_MESSAGE.to_string());
            }

            let history = memory.lock().await.get_messages();
            current_reply = self.query_model(history, FOLLOW_UP_PROMPT).await?;
        }
    }

    async fn query_model(
        &self,
        history: Vec<ChatMessage>,
        turn: &str,
    ) -> Result<String, ModelError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::new(
            MessageRole::System,
            self.system_prompt.clone(),
        ));
        messages.extend(history);
        messages.push(ChatMessage::new(MessageRole::User, turn));
        let response = self
            .provider
            .chat(ModelRequest {
                model: self.config.model.clone(),
                messages,
            })
            .await?;
        Ok(response.message.content)
    }

    async fn dispatch(&self, request: &ToolRequest) -> Result<RawToolResult, ToolInvokeError> {
        let server_key = self
            .registry
            .get(&request.tool)
            .map(|definition| definition.server)
            .unwrap_or("codex");
        let server = self.config.server_for(server_key);
        debug!(tool = %request.tool, server = %server.name, "Dispatching tool call");
        self.executor
            .execute(&server, &request.tool, request.arguments.clone())
            .await
    }
}

fn current_workdir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
