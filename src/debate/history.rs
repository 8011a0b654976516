//! 辩论上下文：从本场开始标记起，只保留辩论标记、用户发言与两位参与者的台词
//!
//! 之前的普通聊天、其他角色的消息、错误提示与临时占位都不会送进辩论请求。

use crate::debate::DebateSession;
use crate::llm::HistoryEntry;
use crate::memory::{Message, MessageStore, Sender};
use crate::persona::Persona;

/// 单条消息是否属于辩论上下文
pub fn is_debate_context(msg: &Message, participants: &[Persona]) -> bool {
    match msg.sender {
        Sender::System => msg.kind.is_debate_marker(),
        Sender::User => true,
        Sender::Agent => msg.is_from_any(participants),
    }
}

/// 构造辩论请求的历史
pub fn debate_history(store: &MessageStore, session: &DebateSession) -> Vec<HistoryEntry> {
    store
        .since(session.start_marker())
        .iter()
        .filter(|m| is_debate_context(m, session.participants()))
        .map(HistoryEntry::from)
        .collect()
}
