//! 会话监管：生命周期、拆除管理
//!
//! 持有会话级 CancellationToken 与代际号（epoch）。所有后台任务（揭示、重试定时、网络请求）都拿子 token，
//! 并在回传事件里带上启动时的 epoch；拆除时取消 token 并递增 epoch，旧事件一律丢弃。

use tokio_util::sync::CancellationToken;

/// 会话级生命周期管理：取消令牌与代际号
#[derive(Debug)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
    epoch: u64,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            epoch: 0,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 创建子 token（用于单个后台任务）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// 事件是否属于当前代
    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    /// 拆除：取消所有挂起任务，换新 token，返回新 epoch
    pub fn teardown(&mut self) -> u64 {
        self.cancel_token.cancel();
        self.cancel_token = CancellationToken::new();
        self.epoch += 1;
        tracing::debug!(epoch = self.epoch, "session torn down");
        self.epoch
    }

    /// 永久关闭（退出时）
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_cancels_children_and_bumps_epoch() {
        let mut supervisor = SessionSupervisor::new();
        let child = supervisor.child_token();
        let epoch = supervisor.epoch();
        assert!(!child.is_cancelled());

        let next = supervisor.teardown();
        assert!(child.is_cancelled());
        assert_eq!(next, epoch + 1);
        assert!(!supervisor.is_current(epoch));
        assert!(!supervisor.child_token().is_cancelled());
    }
}
