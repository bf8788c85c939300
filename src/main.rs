use anyhow::Context;
use mnemed::AppState;
use mnemed::config::ConfigLoader;
use mnemed::observability::init_tracing;
use mnemed::services::ChatTurn;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

/// 本地会话使用的主体 ID
const LOCAL_SUBJECT: &str = "local";
/// `/search` 返回的条数
const SEARCH_TOP_K: usize = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::load().context("failed to load configuration")?;
    ConfigLoader::validate(&config).context("invalid configuration")?;
    let _guard = init_tracing(&config.logging);

    info!("Starting Mnemed ({})...", config.environment);
    let history_limit = config.memory.history_limit;

    let state = AppState::from_config(config).await?;
    info!("Application state created: {:?}", state);

    let subject_id = std::env::var("MNEMED_SUBJECT").unwrap_or_else(|_| LOCAL_SUBJECT.to_string());
    if state.store.get_subject(&subject_id).await?.is_none() {
        state.store.create_subject(&subject_id, &subject_id).await?;
    }
    let session_id = state.history.start_session(&subject_id, None).await?;
    info!("Session {} started for {}", session_id, subject_id);

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    stdout
        .write_all(b"Ask a medical question. Commands: /history, /search <query>, /quit\n> ")
        .await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let output = match line {
            "" => String::new(),
            "/quit" | "/exit" => break,
            "/history" => {
                let entries = state.history.medical_history(&subject_id, history_limit).await?;
                render_entries(&entries)
            }
            _ if line.starts_with("/search") => {
                let query = line.trim_start_matches("/search").trim();
                if query.is_empty() {
                    "usage: /search <query>".to_string()
                } else {
                    let hits = state
                        .history
                        .search_history(&subject_id, query, SEARCH_TOP_K)
                        .await?;
                    render_entries(&hits)
                }
            }
            message => {
                let turn = ChatTurn::new(&subject_id, &session_id, message);
                match state.chat.chat(&turn).await {
                    Ok(reply) => format!("[{}]\n{}", reply.session_title, reply.reply),
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => {
                        warn!("Chat turn failed: {}", e);
                        format!("error: {}", e)
                    }
                }
            }
        };

        if !output.is_empty() {
            stdout.write_all(output.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
        }
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }

    info!("Mnemed stopped");
    Ok(())
}

fn render_entries(entries: &[String]) -> String {
    if entries.is_empty() {
        return "(no entries)".to_string();
    }
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| format!("{}. {}", i + 1, entry.replace('\n', " | ")))
        .collect::<Vec<_>>()
        .join("\n")
}
