//! Agent 编排器：主控循环
//!
//! 负责：加载配置、创建 LLM/工具/循环组件、建立 cmd/event 双通道，并在后台
//! 任务中消费用户命令（Submit/Cancel/ShowPlan/Quit），驱动三阶段循环并向
//! 前端推送过程事件。请求执行期间用 select 继续收命令，Cancel 随时生效。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::{load_config, AppConfig};
use crate::core::SessionSupervisor;
use crate::cycle::{
    ContextAssembler, HistoryWindow, LoopEvent, Planner, SessionCycle, Summarizer,
};
use crate::llm::{LlmClient, LocalClient, MockLlmClient};
use crate::plan::{FilePlanStore, PlanLoader, PlanStore};
use crate::tools::{CatTool, EchoTool, LsTool, ShellTool, ToolExecutor, ToolRegistry};

/// 从前端发往编排器的用户命令
#[derive(Debug, Clone)]
pub enum Command {
    /// 提交用户输入，触发一次三阶段循环
    Submit(String),
    /// 取消当前请求（部分进展仍会总结落盘）
    Cancel,
    /// 显示当前计划文档
    ShowPlan,
    /// 退出应用
    Quit,
}

/// 根据配置选择 LLM 后端（本地 OpenAI 兼容端点 / Mock）
pub(crate) fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    match cfg.llm.provider.to_lowercase().as_str() {
        "mock" => {
            tracing::warn!("Using Mock LLM (provider = mock)");
            Arc::new(MockLlmClient::new())
        }
        _ => {
            let base_url = cfg
                .llm
                .base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434/v1".to_string());
            tracing::info!("Using local LLM endpoint {} ({})", base_url, cfg.llm.model);
            Arc::new(LocalClient::new(
                &base_url,
                &cfg.llm.model,
                cfg.llm.timeouts.request,
            ))
        }
    }
}

/// 创建 Agent 运行时：返回命令发送端与事件接收端；后台任务消费命令并推送事件
pub async fn create_agent(
    config_path: Option<PathBuf>,
) -> anyhow::Result<(
    mpsc::UnboundedSender<Command>,
    mpsc::UnboundedReceiver<LoopEvent>,
)> {
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    // 工作目录：配置 > 当前目录下的 workspace
    let workspace = cfg
        .app
        .workspace_root
        .clone()
        .unwrap_or_else(|| PathBuf::from("workspace"));
    std::fs::create_dir_all(&workspace).ok();
    let workspace = workspace.canonicalize().unwrap_or(workspace);

    let system_prompt = [
        "config/prompts/system.txt",
        "../config/prompts/system.txt",
    ]
    .into_iter()
    .find_map(|p| std::fs::read_to_string(p).ok())
    .unwrap_or_else(|| {
        "You are Wasp, a plan-driven assistant. The plan document is your only durable \
         memory. Use tools: cat, ls, echo, shell."
            .to_string()
    });

    let llm = create_llm_from_config(&cfg);

    let mut tools = ToolRegistry::new();
    tools.register(CatTool::new(&workspace));
    tools.register(LsTool::new(&workspace));
    tools.register(EchoTool);
    tools.register(ShellTool::new(
        cfg.tools.shell.allowed_commands.clone(),
        cfg.tools.tool_timeout_secs,
    ));

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<LoopEvent>();

    let store = Arc::new(FilePlanStore::new(workspace.join("plans")));
    let cycle = SessionCycle {
        planner: Planner::new(llm.clone(), system_prompt),
        summarizer: Summarizer::new(llm.clone()),
        executor: ToolExecutor::new(tools, cfg.tools.tool_timeout_secs),
        loader: PlanLoader::new(llm, cfg.plan.correct_attempts),
        store: store.clone(),
        assembler: ContextAssembler,
        max_task_iterations: cfg.cycle.max_task_iterations,
        event_tx: Some(event_tx.clone()),
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let history_turns = cfg.app.history_turns;
    tracing::info!(session_id = %session_id, "agent session started");

    tokio::spawn(async move {
        let supervisor = SessionSupervisor::new();
        // 窗口随会话启动重置为空，只存在于内存
        let mut window = HistoryWindow::new(history_turns);

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::Submit(input) => {
                    let token = supervisor.begin_request();
                    let fut = cycle.run_request(&mut window, &session_id, &input, token);
                    tokio::pin!(fut);
                    // 执行期间继续收命令：Cancel 立即生效，Quit 先取消再等收尾
                    let mut quit_after = false;
                    let result = loop {
                        if quit_after {
                            break (&mut fut).await;
                        }
                        tokio::select! {
                            r = &mut fut => break r,
                            cmd = cmd_rx.recv() => match cmd {
                                Some(Command::Cancel) => supervisor.cancel(),
                                Some(Command::Quit) | None => {
                                    supervisor.cancel();
                                    quit_after = true;
                                }
                                Some(other) => {
                                    tracing::warn!(?other, "agent busy, command ignored");
                                }
                            },
                        }
                    };
                    if let Err(e) = result {
                        let _ = event_tx.send(LoopEvent::Error {
                            text: e.to_string(),
                        });
                    }
                    if quit_after {
                        break;
                    }
                }
                Command::Cancel => {
                    // 空闲时的取消没有目标，忽略
                }
                Command::ShowPlan => {
                    let text = store
                        .load(&session_id)
                        .ok()
                        .flatten()
                        .unwrap_or_else(|| "(no plan yet)".to_string());
                    let _ = event_tx.send(LoopEvent::PlanUpdated { text });
                }
                Command::Quit => break,
            }
        }
    });

    Ok((cmd_tx, event_rx))
}
