//! Wasp - Rust 计划驱动智能体
//!
//! 入口：初始化日志、创建 Agent 编排器，并运行行式控制台主循环。
//! 控制台只是事件的瘦消费者：打印阶段转移、工具活动、回答与计划文档。

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wasp::core::{create_agent, Command};
use wasp::cycle::LoopEvent;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();

    // 确保工作目录与 Prompt 目录存在
    let _ = std::fs::create_dir_all("workspace/plans");
    let _ = std::fs::create_dir_all("config/prompts");

    let (cmd_tx, mut event_rx) = create_agent(None).await.context("Failed to create agent")?;

    // 事件打印任务：把循环过程渲染为控制台行
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                LoopEvent::PhaseChanged { phase } => println!("-- phase: {:?}", phase),
                LoopEvent::TasksPlanned { tasks } => {
                    println!("-- tasks:");
                    for (i, t) in tasks.iter().enumerate() {
                        println!("   {}. {}", i + 1, t);
                    }
                }
                LoopEvent::TaskStarted {
                    index,
                    total,
                    description,
                } => println!("-- task {}/{}: {}", index + 1, total, description),
                LoopEvent::Thinking => {}
                LoopEvent::ToolCall { tool, args } => println!("-> {} {}", tool, args),
                LoopEvent::Observation { tool, preview } => {
                    println!("<- {}: {}", tool, preview)
                }
                LoopEvent::TaskAnswer { text } => println!("\n{}\n", text),
                LoopEvent::TaskFailed {
                    description,
                    attempts,
                } => println!("!! task failed after {} attempts: {}", attempts, description),
                LoopEvent::Recovery { action, detail } => {
                    println!("~~ recovery [{}]: {}", action, detail)
                }
                LoopEvent::PlanUpdated { text } => {
                    println!("==== plan ====\n{}\n==============", text)
                }
                LoopEvent::Error { text } => eprintln!("!! {}", text),
            }
        }
    });

    println!("wasp ready. /plan shows the plan, /cancel stops the current request, /quit exits.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        match line.as_str() {
            "" => continue,
            "/quit" | "/exit" => {
                let _ = cmd_tx.send(Command::Quit);
                break;
            }
            "/cancel" => {
                let _ = cmd_tx.send(Command::Cancel);
            }
            "/plan" => {
                let _ = cmd_tx.send(Command::ShowPlan);
            }
            _ => {
                cmd_tx
                    .send(Command::Submit(line))
                    .context("Agent task ended")?;
            }
        }
    }

    Ok(())
}
