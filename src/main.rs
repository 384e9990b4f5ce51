//! Hive - Rust 会话后端
//!
//! 入口：初始化日志与配置，装配后端，启动会话清理与 proactive 调度器，
//! 然后进入最小的 stdin 对话循环（流式输出过程事件）。

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use hive::chat::TurnEvent;
use hive::config::load_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        hive::config::AppConfig::default()
    });

    let backend = hive::create_backend(&cfg).context("Failed to create backend")?;
    let _sweeper = backend.sessions.spawn_sweeper(cfg.app.sweep_interval_secs);
    backend.scheduler.start();

    let session_id = format!("cli_{}", uuid::Uuid::new_v4());
    let system_prompt = cfg.app.system_prompt.clone();
    println!("hive ready (session {}). Type a message, or 'quit' to exit.", session_id);

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim().to_string();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TurnEvent>();
        let printer = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    TurnEvent::TextDelta { text } => print!("{}", text),
                    TurnEvent::ToolStarting { tool, .. } => println!("\n[tool {} starting]", tool),
                    TurnEvent::ToolCompleted { tool, preview, .. } => {
                        println!("[tool {} -> {}]", tool, preview)
                    }
                    TurnEvent::ToolFailed { tool, reason, .. } => {
                        println!("[tool {} failed: {}]", tool, reason)
                    }
                    TurnEvent::CompactionStarted { .. } => println!("\n[compacting...]"),
                    TurnEvent::CompactionFinished { ok, .. } => {
                        println!("[compaction {}]", if ok { "done" } else { "failed" })
                    }
                    TurnEvent::TurnDone { total_tokens, .. } => {
                        println!("\n[turn done, {} tokens]", total_tokens)
                    }
                    TurnEvent::Error { text } => println!("\n[error: {}]", text),
                    _ => {}
                }
            }
        });

        let result = backend
            .service
            .run_turn_streaming(
                &session_id,
                &input,
                &system_prompt,
                &event_tx,
                &CancellationToken::new(),
            )
            .await;
        drop(event_tx);
        let _ = printer.await;

        if let Err(e) = result {
            tracing::error!(error = %e, "turn failed");
        }
    }

    backend.scheduler.stop();
    Ok(())
}
