//! 会话集成测试：用 Mock LLM 跑通完整三阶段循环

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use wasp::cycle::{
    ContextAssembler, HistoryWindow, LoopEvent, Phase, Planner, SessionCycle, Summarizer,
};
use wasp::llm::MockLlmClient;
use wasp::plan::{deserialize, serialize, MemoryPlanStore, Plan, PlanLoader, PlanStatus, PlanStore, StoreError};
use wasp::tools::{EchoTool, ToolExecutor, ToolRegistry};

const SYSTEM_PROMPT: &str = "You are a plan-driven assistant under test.";

fn make_cycle(
    replies: Vec<&str>,
    max_task_iterations: u32,
) -> (
    SessionCycle,
    Arc<MemoryPlanStore>,
    mpsc::UnboundedReceiver<LoopEvent>,
) {
    let llm = Arc::new(MockLlmClient::scripted(
        replies.into_iter().map(String::from).collect(),
    ));
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    let store = Arc::new(MemoryPlanStore::new());
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let cycle = SessionCycle {
        planner: Planner::new(llm.clone(), SYSTEM_PROMPT),
        summarizer: Summarizer::new(llm.clone()),
        executor: ToolExecutor::new(registry, 5),
        loader: PlanLoader::new(llm, 1),
        store: store.clone(),
        assembler: ContextAssembler,
        max_task_iterations,
        event_tx: Some(event_tx),
    };
    (cycle, store, event_rx)
}

fn drain_events(rx: &mut mpsc::UnboundedReceiver<LoopEvent>) -> Vec<LoopEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

fn phases(events: &[LoopEvent]) -> Vec<Phase> {
    events
        .iter()
        .filter_map(|e| match e {
            LoopEvent::PhaseChanged { phase } => Some(*phase),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_minimal_session_increments_version_once() {
    // 空计划 + 「say hello」：首次执行即最终回答，无工具调用
    let (cycle, store, mut event_rx) = make_cycle(
        vec![
            r#"{"tasks": ["say hello"]}"#,
            "Hello!",
            r#"{"action": "Said hello", "result": "greeted the user",
               "status": "completed", "goal": "say hello"}"#,
        ],
        10,
    );
    let mut window = HistoryWindow::new(5);

    let answer = cycle
        .run_request(&mut window, "s1", "say hello", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(answer, "Hello!");

    // 阶段转移完整：Planning -> Executing -> Summarizing -> Idle
    let events = drain_events(&mut event_rx);
    assert_eq!(
        phases(&events),
        vec![
            Phase::Planning,
            Phase::Executing,
            Phase::Summarizing,
            Phase::Idle
        ]
    );

    // 执行日志恰好一条，版本恰好 +1
    let text = store.load("s1").unwrap().unwrap();
    let plan = deserialize(&text).unwrap();
    assert_eq!(plan.execution_log.len(), 1);
    assert_eq!(plan.metadata.version, 2);
    assert_eq!(plan.goal, "say hello");
    assert_eq!(plan.status, PlanStatus::Completed);
}

#[tokio::test]
async fn test_tool_batch_roundtrip_lands_in_log() {
    let (cycle, store, mut event_rx) = make_cycle(
        vec![
            r#"{"tasks": ["echo things"]}"#,
            r#"{"tool_calls": [{"tool": "echo", "args": {"text": "a"}},
                               {"tool": "echo", "args": {"text": "b"}}]}"#,
            "All echoed.",
            r#"{"action": "Echoed twice", "result": "both calls returned"}"#,
        ],
        10,
    );
    let mut window = HistoryWindow::new(5);

    let answer = cycle
        .run_request(&mut window, "s1", "echo a and b", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(answer, "All echoed.");

    // 一批两个调用，各自得到观察结果
    let events = drain_events(&mut event_rx);
    let observations: Vec<&LoopEvent> = events
        .iter()
        .filter(|e| matches!(e, LoopEvent::Observation { .. }))
        .collect();
    assert_eq!(observations.len(), 2);

    let plan = deserialize(&store.load("s1").unwrap().unwrap()).unwrap();
    assert_eq!(plan.execution_log.len(), 1);
    assert_eq!(plan.execution_log[0].tools_used, vec!["echo"]);
}

#[tokio::test]
async fn test_always_malformed_task_terminates_at_cap() {
    // 规划一个任务，模型此后永远输出坏 JSON：恰好 cap 次后放弃并总结
    let cap = 3;
    let (cycle, store, mut event_rx) = make_cycle(
        vec![
            r#"{"tasks": ["impossible"]}"#,
            r#"{"broken"#,
            r#"{"broken"#,
            r#"{"broken"#,
            "%%% not json either %%%",
        ],
        cap,
    );
    let mut window = HistoryWindow::new(5);

    let answer = cycle
        .run_request(&mut window, "s1", "do the impossible", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(answer, "(no answer produced)");

    let events = drain_events(&mut event_rx);
    let failed = events.iter().find_map(|e| match e {
        LoopEvent::TaskFailed {
            description,
            attempts,
        } => Some((description.clone(), *attempts)),
        _ => None,
    });
    assert_eq!(failed, Some(("impossible".to_string(), cap)));

    // 失败任务也要落盘：总结退化但日志存在并记下失败
    let plan = deserialize(&store.load("s1").unwrap().unwrap()).unwrap();
    assert_eq!(plan.execution_log.len(), 1);
    assert!(plan.execution_log[0].result.contains("failed tasks"));
    assert_eq!(plan.metadata.version, 2);
}

#[tokio::test]
async fn test_two_requests_accumulate_log_entries() {
    let (cycle, store, _event_rx) = make_cycle(
        vec![
            r#"{"tasks": ["first"]}"#,
            "first done",
            r#"{"action": "First", "result": "ok", "goal": "do both"}"#,
            r#"{"tasks": ["second"]}"#,
            "second done",
            r#"{"action": "Second", "result": "ok"}"#,
        ],
        10,
    );
    let mut window = HistoryWindow::new(5);
    let token = CancellationToken::new();

    cycle
        .run_request(&mut window, "s1", "do first", token.clone())
        .await
        .unwrap();
    cycle
        .run_request(&mut window, "s1", "do second", token)
        .await
        .unwrap();

    let plan = deserialize(&store.load("s1").unwrap().unwrap()).unwrap();
    assert_eq!(plan.execution_log.len(), 2);
    assert_eq!(plan.metadata.version, 3);
    // 第一轮定下的目标在第二轮总结后保留
    assert_eq!(plan.goal, "do both");
}

#[tokio::test]
async fn test_concurrent_summarization_writes_conflict() {
    // 两次总结写入使用同一个 expectedVersion：先到者赢，后到者报冲突
    let store = MemoryPlanStore::new();
    let mut plan = Plan::new();
    plan.goal = "shared goal".to_string();
    plan.touch(); // version 2

    store.save("s1", &serialize(&plan), 1).unwrap();
    let second = store.save("s1", &serialize(&plan), 1);
    match second {
        Err(StoreError::VersionConflict { expected, actual }) => {
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        other => panic!("expected VersionConflict, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancel_before_start_aborts_without_write() {
    let (cycle, store, _event_rx) = make_cycle(vec![], 10);
    let mut window = HistoryWindow::new(5);
    let token = CancellationToken::new();
    token.cancel();

    let result = cycle
        .run_request(&mut window, "s1", "anything", token)
        .await;
    assert!(result.is_err());
    // 未发生任何部分变更
    assert!(store.load("s1").unwrap().is_none());
}
