//! 有界上下文装配
//!
//! 每次模型调用的输入由三部分按固定顺序组成：完整的当前计划文档（从不截断，
//! 总量靠计划本身保持精简来约束）、最近 k 个用户轮次及其配对回复（严格 FIFO
//! 淘汰）、当前请求文本。装配体积为 O(|计划| + k)，与会话总长无关；这是
//! 整个系统的核心伸缩性质。

use std::collections::VecDeque;

use crate::llm::Message;

/// 一个用户轮次：用户消息 + 配对的助手/工具观察消息
#[derive(Clone, Debug)]
pub struct Turn {
    pub user: Message,
    pub replies: Vec<Message>,
}

/// 滑动窗口：仅在内存中，会话开始时为空，超出 k 轮先淘汰最旧
#[derive(Clone, Debug)]
pub struct HistoryWindow {
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl HistoryWindow {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns: max_turns.max(1),
        }
    }

    /// 开始一个新的用户轮次；窗口满时淘汰最旧轮次
    pub fn begin_turn(&mut self, user_text: impl Into<String>) {
        self.turns.push_back(Turn {
            user: Message::user(user_text),
            replies: Vec::new(),
        });
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    /// 向当前轮次追加一条配对消息（模型回复或工具观察）
    pub fn push_reply(&mut self, msg: Message) {
        if let Some(turn) = self.turns.back_mut() {
            turn.replies.push(msg);
        }
    }

    /// 展平为消息序列，最旧在前
    pub fn messages(&self) -> Vec<Message> {
        let mut out = Vec::new();
        for turn in &self.turns {
            out.push(turn.user.clone());
            out.extend(turn.replies.iter().cloned());
        }
        out
    }

    /// 当前轮次的消息（总结阶段的素材）
    pub fn last_turn_messages(&self) -> Vec<Message> {
        match self.turns.back() {
            Some(turn) => {
                let mut out = vec![turn.user.clone()];
                out.extend(turn.replies.iter().cloned());
                out
            }
            None => Vec::new(),
        }
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// 上下文装配器：纯组装，不做任何截断或压缩
#[derive(Clone, Copy, Debug, Default)]
pub struct ContextAssembler;

impl ContextAssembler {
    /// 固定顺序：system(前导指令 + 完整计划文档) -> 窗口消息 -> 当前请求
    pub fn build(
        &self,
        system_prelude: &str,
        plan_text: &str,
        window: &HistoryWindow,
        current: &str,
    ) -> Vec<Message> {
        let system = format!(
            "{}\n\n## Current Plan\n\n{}",
            system_prelude.trim_end(),
            plan_text.trim_end()
        );
        let mut messages = vec![Message::system(system)];
        messages.extend(window.messages());
        messages.push(Message::user(current));
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembled_size(messages: &[Message]) -> usize {
        messages.iter().map(|m| m.content.len()).sum()
    }

    fn run_session(turns: usize, k: usize) -> Vec<Message> {
        let mut window = HistoryWindow::new(k);
        for i in 0..turns {
            window.begin_turn(format!("request number {:06}", i));
            window.push_reply(Message::assistant(format!("reply number {:06}", i)));
        }
        ContextAssembler.build("system prelude", "# Plan\n\n(fixed)", &window, "current request")
    }

    #[test]
    fn test_window_is_strict_fifo() {
        let mut w = HistoryWindow::new(3);
        for i in 0..5 {
            w.begin_turn(format!("turn-{}", i));
        }
        assert_eq!(w.turn_count(), 3);
        let msgs = w.messages();
        assert_eq!(msgs[0].content, "turn-2");
        assert_eq!(msgs[2].content, "turn-4");
    }

    #[test]
    fn test_replies_pair_with_their_turn() {
        let mut w = HistoryWindow::new(2);
        w.begin_turn("one");
        w.push_reply(Message::assistant("reply-one"));
        w.begin_turn("two");
        w.push_reply(Message::assistant("reply-two"));
        let msgs = w.messages();
        assert_eq!(
            msgs.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["one", "reply-one", "two", "reply-two"]
        );
        assert_eq!(w.last_turn_messages().len(), 2);
    }

    #[test]
    fn test_assembled_size_is_constant_after_k_turns() {
        // 会话长 1 / 50 / 5000：窗口满(k=5)之后装配体积不再随会话长度变化
        let k = 5;
        let small = run_session(k, k);
        let medium = run_session(50, k);
        let large = run_session(5000, k);
        assert_eq!(assembled_size(&medium), assembled_size(&small));
        assert_eq!(assembled_size(&large), assembled_size(&small));
        assert_eq!(medium.len(), small.len());
        assert_eq!(large.len(), small.len());
    }

    #[test]
    fn test_single_turn_session_is_smaller() {
        let one = run_session(1, 5);
        let five = run_session(5, 5);
        assert!(assembled_size(&one) < assembled_size(&five));
    }

    #[test]
    fn test_fixed_message_order() {
        let mut w = HistoryWindow::new(5);
        w.begin_turn("earlier");
        let msgs = ContextAssembler.build("prelude", "PLAN", &w, "now");
        assert!(matches!(msgs[0].role, crate::llm::Role::System));
        assert!(msgs[0].content.contains("PLAN"));
        assert_eq!(msgs[1].content, "earlier");
        assert_eq!(msgs.last().unwrap().content, "now");
    }
}
