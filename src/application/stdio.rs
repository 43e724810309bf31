use super::agent::Agent;
use super::memory::SessionStore;
use crate::model::ModelProvider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum StdioError {
    #[error("stdin/stdout I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize stdio response: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct StdioRequest {
    prompt: String,
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct StdioResponse {
    session_id: Option<String>,
    response: Option<String>,
    error: Option<String>,
}

impl StdioResponse {
    fn success(session_id: Option<String>, response: String) -> Self {
        Self {
            session_id,
            response: Some(response),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            session_id: None,
            response: None,
            error: Some(message.into()),
        }
    }
}

/// JSON-lines framing over stdin/stdout: one request per line, one response
/// per line. Bad input is answered in-band, never by terminating the loop.
pub async fn run<P>(agent: Arc<Agent<P>>, sessions: Arc<SessionStore>) -> Result<(), StdioError>
where
    P: ModelProvider + 'static,
{
    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        debug!("Received STDIO line");

        match serde_json::from_str::<StdioRequest>(&line) {
            Ok(request) => {
                if request.prompt.trim().is_empty() {
                    write_response(&mut stdout, StdioResponse::error("prompt cannot be empty"))
                        .await?;
                    continue;
                }

                info!(
                    session = request.session_id.as_deref(),
                    "Processing STDIO agent request"
                );
                let memory = sessions.memory(request.session_id.as_deref()).await;
                match agent.run(&request.prompt, &memory).await {
                    Ok(response) => {
                        write_response(
                            &mut stdout,
                            StdioResponse::success(request.session_id, response),
                        )
                        .await?;
                    }
                    Err(err) => {
                        error!(%err, "Agent processing failed via STDIO");
                        write_response(&mut stdout, StdioResponse::error(err.user_message()))
                            .await?;
                    }
                }
            }
            Err(err) => {
                error!(%err, "Failed to parse STDIO input line");
                write_response(
                    &mut stdout,
                    StdioResponse::error(format!("invalid JSON input: {err}")),
                )
                .await?;
            }
        }
    }

    stdout.flush().await?;
    Ok(())
}

async fn write_response(
    stdout: &mut io::Stdout,
    response: StdioResponse,
) -> Result<(), StdioError> {
    let mut payload = serde_json::to_vec(&response)?;
    payload.push(b'\n');
    stdout.write_all(&payload).await?;
    stdout.flush().await?;
    Ok(())
}
