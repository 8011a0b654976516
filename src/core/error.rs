//! 错误类型与恢复动作
//!
//! 与 RecoveryPolicy 配合：辩论轮次失败时决定 RetryRound 还是 AwaitUser。

use std::time::Duration;

use thiserror::Error;

use crate::debate::Phase;

/// 生成服务调用失败（传输错误与结构化错误负载一视同仁：消息 + 可选状态码）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend error{}: {message}", status_suffix(.status))]
    Backend { message: String, status: Option<u16> },

    /// 响应缺少 utterances 或内容为空
    #[error("Malformed response: {0}")]
    Malformed(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl GenerationError {
    pub fn message(&self) -> &str {
        match self {
            GenerationError::Transport(m) | GenerationError::Malformed(m) => m,
            GenerationError::Backend { message, .. } => message,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            GenerationError::Backend { status, .. } => *status,
            _ => None,
        }
    }
}

/// 状态机拒绝的事件或非法输入（状态不变，只给用户一条提示）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("'{event}' is not allowed while in {phase:?}")]
    NotAllowed { phase: Phase, event: &'static str },

    #[error("A debate needs exactly two personas (got {0})")]
    ParticipantCount(usize),

    #[error("A debate needs two different personas ('{0}' was selected twice)")]
    DuplicateParticipant(String),

    #[error("Select one or two personas (got {0})")]
    PersonaCount(usize),

    #[error("A debate needs a topic")]
    EmptyTopic,

    #[error("Nothing to send")]
    EmptyInput,

    #[error("No debate is running")]
    NoDebate,

    #[error("The intervention options are not available right now")]
    GateNotOffered,

    #[error("No intervention choice numbered {0}")]
    UnknownChoice(usize),
}

/// 辩论轮次失败后的动作
///
/// 聊天回合与收尾阶段的失败处理是固定的（交还发言权 / 跳过或直接收尾），不经过策略。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 延迟后自动重试同一轮，不打扰用户
    RetryRound { delay: Duration },
    /// 显示错误并把发言权交给用户（辩论保持进行）
    AwaitUser,
}
