mod application;
mod config;
mod domain;
mod infrastructure;

pub use application::{agent, memory, registry, stdio, tooling};
pub use domain::types;
pub use infrastructure::{model, server};

use agent::{Agent, AgentConfig};
use clap::{Parser, ValueEnum};
use config::AppConfig;
use memory::SessionStore;
use model::{ModelProvider, OllamaClient};
use registry::Registry;
use std::error::Error;
use std::fs;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tooling::{StdioToolExecutor, ToolExecutor};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(
    name = "meridian",
    version,
    about = "Conversational agent controller powered by Ollama and MCP tool servers"
)]
struct Cli {
    #[arg(long)]
    ollama_url: Option<String>,
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    session: Option<String>,
    #[arg(long)]
    prompt_file: Option<String>,
    #[arg(long, value_enum, default_value_t = RunMode::Cli)]
    mode: RunMode,
    #[arg(long, default_value = "127.0.0.1:9000")]
    rest_addr: SocketAddr,
    prompt: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RunMode {
    Cli,
    Repl,
    Stdio,
    Rest,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    init_tracing();
    info!("Starting meridian");
    let cli = Cli::parse();
    debug!(?cli.mode, config = ?cli.config, session = ?cli.session, "CLI arguments parsed");

    let config_path = cli.config.as_deref().map(Path::new);
    let mut app_config = AppConfig::load(config_path)?;
    if let Some(path) = config_path {
        info!(path = %path.display(), "Loaded configuration from file");
    } else {
        info!("Loaded configuration using default path or defaults");
    }
    app_config.apply_overrides(|key| std::env::var(key).ok());
    if let Some(url) = cli.ollama_url.clone() {
        app_config.ollama_url = url;
    }

    debug!(ollama_url = %app_config.ollama_url, model = %app_config.model, "Creating Ollama provider");
    let provider = OllamaClient::new(
        app_config.ollama_url.clone(),
        Duration::from_secs(app_config.model_timeout_s),
    );
    let registry = Arc::new(Registry::builtin());
    let executor: Arc<dyn ToolExecutor> = Arc::new(StdioToolExecutor);
    let agent = Arc::new(Agent::new(
        provider,
        executor,
        registry,
        AgentConfig::from_app(&app_config),
    ));
    let sessions = Arc::new(SessionStore::new(app_config.memory_capacity));

    info!(mode = ?cli.mode, "Running agent controller in selected mode");
    match cli.mode {
        RunMode::Cli => {
            let prompt = load_prompt(&cli)?;
            info!("Dispatching single prompt via CLI mode");
            let memory = sessions.memory(cli.session.as_deref()).await;
            let answer = agent.run(&prompt, &memory).await?;
            println!("{answer}");
        }
        RunMode::Repl => {
            info!("Entering interactive read loop");
            run_repl(agent.clone(), sessions.clone()).await?;
        }
        RunMode::Stdio => {
            info!("Entering STDIO mode; awaiting JSON line input");
            stdio::run(agent.clone(), sessions.clone()).await?;
        }
        RunMode::Rest => {
            info!(addr = %cli.rest_addr, "Starting REST server");
            server::serve(agent.clone(), sessions.clone(), cli.rest_addr).await?;
        }
    }
    info!("Agent controller finished");
    Ok(())
}

async fn run_repl<P>(agent: Arc<Agent<P>>, sessions: Arc<SessionStore>) -> Result<(), Box<dyn Error>>
where
    P: ModelProvider + 'static,
{
    let memory = sessions.memory(None).await;
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("agent> ");
        io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt == "exit" || prompt == "quit" {
            break;
        }
        if prompt == "clear" {
            memory.lock().await.clear();
            println!("conversation memory cleared");
            continue;
        }
        match agent.run(prompt, &memory).await {
            Ok(answer) => println!("{answer}"),
            Err(err) => {
                error!(%err, "Agent turn failed");
                eprintln!("{}", err.user_message());
            }
        }
    }
    Ok(())
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .init();
    });
}

fn load_prompt(cli: &Cli) -> Result<String, Box<dyn Error>> {
    if let Some(path) = &cli.prompt_file {
        info!(path = %path, "Loading prompt from file");
        let content = fs::read_to_string(path)?;
        return Ok(normalize_prompt(content));
    }

    if !cli.prompt.is_empty() {
        info!("Using prompt provided through CLI arguments");
        let joined = cli.prompt.join(" ");
        return Ok(normalize_prompt(joined));
    }

    if atty::isnt(atty::Stream::Stdin) {
        info!("Reading prompt from standard input");
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        return Ok(normalize_prompt(buffer));
    }

    warn!("Prompt not provided via arguments, file, or stdin");
    Err("prompt required via arguments, file, or stdin".into())
}

fn normalize_prompt(prompt: String) -> String {
    prompt.trim().to_string()
}
