//! DataPilot - 交互式命令行
//!
//! 入口：初始化日志、加载配置并构建会话，然后逐行读取用户输入。
//! 以 `/` 开头的是本地命令（/errors、/error <id>、/state、/reset、/quit），其余交给会话处理。

use std::path::PathBuf;

use anyhow::Context;
use datapilot::core::{create_session_builder, ConversationSession, ExecutionPath};
use datapilot::observability;
use datapilot::react::TurnEvent;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const RECENT_ERRORS: usize = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<TurnEvent>();
    let mut session = create_session_builder(config_path)
        .with_event_tx(event_tx)
        .build()
        .context("Failed to build session")?;

    // 过程事件只打到 debug 日志，避免刷屏
    tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            if let Ok(json) = serde_json::to_string(&ev) {
                tracing::debug!(event = %json, "turn event");
            }
        }
    });

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    stdout
        .write_all(b"DataPilot ready. Try \"plot some data\", \"colormap plasma\" or \"brief summary\". /quit to exit.\n")
        .await?;

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let output = if let Some(cmd) = input.strip_prefix('/') {
            match local_command(&mut session, cmd) {
                Some(text) => text,
                None => break,
            }
        } else {
            match session.handle_turn(input).await {
                Ok(outcome) => {
                    let tag = match (outcome.path, outcome.circuit_open) {
                        (ExecutionPath::Hybrid, _) => "[fast]",
                        (ExecutionPath::Full, true) => "[stopped]",
                        (ExecutionPath::Full, false) => "",
                    };
                    if tag.is_empty() {
                        outcome.reply
                    } else {
                        format!("{} {}", tag, outcome.reply)
                    }
                }
                Err(e) => format!("Error: {}", e),
            }
        };

        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    }

    Ok(())
}

/// 本地命令；返回 None 表示退出
fn local_command(session: &mut ConversationSession, cmd: &str) -> Option<String> {
    let mut parts = cmd.split_whitespace();
    let text = match parts.next().unwrap_or_default() {
        "quit" | "exit" => return None,
        "errors" => {
            let recent = session.recent_errors(RECENT_ERRORS);
            if recent.is_empty() {
                "No errors recorded.".to_string()
            } else {
                recent
                    .iter()
                    .map(|r| r.summary())
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        "error" => match parts.next().map(str::parse::<u64>) {
            Some(Ok(id)) => session
                .error_detail(id)
                .unwrap_or_else(|| format!("No error #{}", id)),
            _ => "Usage: /error <id>".to_string(),
        },
        "state" => serde_json::to_string_pretty(&session.snapshot())
            .unwrap_or_else(|e| format!("Cannot render state: {}", e)),
        "reset" => {
            session.reset();
            "Session cleared.".to_string()
        }
        other => format!(
            "Unknown command /{}. Available: /errors, /error <id>, /state, /reset, /quit",
            other
        ),
    };
    Some(text)
}
