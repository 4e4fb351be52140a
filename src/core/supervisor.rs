//! 会话监管：生命周期、中断管理
//!
//! 取消令牌是一次性的，每个请求开始时轮换一个新令牌；Cancel 只作用于
//! 当前请求，下一个请求拿到干净令牌。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// 会话级生命周期管理：当前请求的取消令牌
#[derive(Debug, Default)]
pub struct SessionSupervisor {
    current: Mutex<CancellationToken>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始新请求：轮换并返回新的取消令牌
    pub fn begin_request(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = token.clone();
        token
    }

    /// 取消当前请求（用户 Ctrl+C 或 /cancel）
    pub fn cancel(&self) {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        current.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_hits_only_current_token() {
        let supervisor = SessionSupervisor::new();
        let first = supervisor.begin_request();
        supervisor.cancel();
        assert!(first.is_cancelled());

        let second = supervisor.begin_request();
        assert!(!second.is_cancelled());
    }
}
