//! 消息日志：对话记录的唯一存储
//!
//! 按插入顺序保存消息；对控制器而言只追加，唯一可变字段是 `read`。
//! 唯一允许删除的是「正在总结」这类临时占位消息。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::persona::{Persona, PersonaId};

/// 消息 ID（不透明唯一值）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

/// 发送方
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Agent,
    System,
}

/// 消息类别：用类型标记辩论生命周期，不再靠匹配文本
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// 普通对话内容（用户输入或角色台词）
    Chat,
    /// 辩论开场布景
    SceneSet,
    /// 辩论开始
    DebateStart,
    /// 「正在总结」临时占位
    SummaryPending,
    /// 辩论总结
    Summary,
    /// 辩论结束标记
    DebateEnd,
    /// 「哪一方更有说服力」提问
    PersuasionQuery,
    /// 失败提示
    Error,
}

impl MessageKind {
    /// 辩论上下文中需要保留的系统标记
    pub fn is_debate_marker(self) -> bool {
        matches!(
            self,
            MessageKind::SceneSet
                | MessageKind::DebateStart
                | MessageKind::Summary
                | MessageKind::DebateEnd
                | MessageKind::PersuasionQuery
        )
    }

    pub fn is_transient(self) -> bool {
        matches!(self, MessageKind::SummaryPending)
    }
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub kind: MessageKind,
    pub text: String,
    /// 角色消息所属角色
    pub agent_id: Option<PersonaId>,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

impl Message {
    fn new(sender: Sender, kind: MessageKind, text: String, agent_id: Option<PersonaId>) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            kind,
            text,
            agent_id,
            timestamp: Utc::now(),
            read: false,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, MessageKind::Chat, text.into(), None)
    }

    pub fn agent(persona: &PersonaId, text: impl Into<String>) -> Self {
        Self::new(
            Sender::Agent,
            MessageKind::Chat,
            text.into(),
            Some(persona.clone()),
        )
    }

    pub fn system(kind: MessageKind, text: impl Into<String>) -> Self {
        Self::new(Sender::System, kind, text.into(), None)
    }

    /// 是否由给定角色之一发出
    pub fn is_from_any(&self, personas: &[Persona]) -> bool {
        match &self.agent_id {
            Some(id) => personas.iter().any(|p| &p.id == id),
            None => false,
        }
    }
}

/// 消息日志：插入顺序即唯一顺序保证
#[derive(Clone, Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条消息，返回其 ID
    pub fn push(&mut self, msg: Message) -> MessageId {
        let id = msg.id;
        self.messages.push(msg);
        id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn position(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// 从某条消息（含）开始的切片；找不到或未指定时返回全部
    pub fn since(&self, marker: Option<MessageId>) -> &[Message] {
        let start = marker.and_then(|id| self.position(id)).unwrap_or(0);
        &self.messages[start..]
    }

    /// 在 marker 之后（含）是否已存在某类消息
    pub fn contains_kind_since(&self, kind: MessageKind, marker: Option<MessageId>) -> bool {
        self.since(marker).iter().any(|m| m.kind == kind)
    }

    /// 删除临时占位消息；非临时消息不可删除
    pub fn remove_transient(&mut self, id: MessageId) -> bool {
        match self.position(id) {
            Some(idx) if self.messages[idx].kind.is_transient() => {
                self.messages.remove(idx);
                true
            }
            _ => false,
        }
    }

    /// 清理所有临时占位（会话被拆除时）
    pub fn remove_all_transient(&mut self) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| !m.kind.is_transient());
        before - self.messages.len()
    }

    /// 将所有未读的用户消息标为已读，返回标记条数
    pub fn mark_user_read(&mut self) -> usize {
        let mut n = 0;
        for m in self
            .messages
            .iter_mut()
            .filter(|m| m.sender == Sender::User && !m.read)
        {
            m.read = true;
            n += 1;
        }
        n
    }

    /// 导出区间 [from, to]（均含，缺省为首/尾），跳过临时占位
    pub fn export(&self, from: Option<MessageId>, to: Option<MessageId>) -> Vec<Message> {
        let start = from.and_then(|id| self.position(id)).unwrap_or(0);
        let end = to
            .and_then(|id| self.position(id))
            .unwrap_or_else(|| self.messages.len().saturating_sub(1));
        if self.messages.is_empty() || start > end {
            return Vec::new();
        }
        self.messages[start..=end]
            .iter()
            .filter(|m| !m.kind.is_transient())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_preserves_order() {
        let mut store = MessageStore::new();
        let a = store.push(Message::user("one"));
        let b = store.push(Message::user("two"));
        assert_eq!(store.position(a), Some(0));
        assert_eq!(store.position(b), Some(1));
        assert_eq!(store.messages()[1].text, "two");
    }

    #[test]
    fn test_remove_transient_only() {
        let mut store = MessageStore::new();
        let chat = store.push(Message::user("hi"));
        let pending = store.push(Message::system(MessageKind::SummaryPending, "..."));
        assert!(!store.remove_transient(chat));
        assert!(store.remove_transient(pending));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_contains_kind_since_is_scoped() {
        let mut store = MessageStore::new();
        store.push(Message::system(MessageKind::DebateEnd, "ended"));
        let start = store.push(Message::system(MessageKind::DebateStart, "start"));
        assert!(store.contains_kind_since(MessageKind::DebateEnd, None));
        assert!(!store.contains_kind_since(MessageKind::DebateEnd, Some(start)));
    }

    #[test]
    fn test_mark_user_read() {
        let mut store = MessageStore::new();
        store.push(Message::user("a"));
        store.push(Message::agent(&PersonaId::new("alice"), "b"));
        store.push(Message::user("c"));
        assert_eq!(store.mark_user_read(), 2);
        assert_eq!(store.mark_user_read(), 0);
        assert!(!store.messages()[1].read);
    }

    #[test]
    fn test_export_range_skips_placeholder() {
        let mut store = MessageStore::new();
        store.push(Message::user("before"));
        let from = store.push(Message::user("first"));
        store.push(Message::system(MessageKind::SummaryPending, "..."));
        let to = store.push(Message::system(MessageKind::Summary, "sum"));
        store.push(Message::user("after"));

        let out = store.export(Some(from), Some(to));
        let texts: Vec<_> = out.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "sum"]);
        assert_eq!(store.export(None, None).len(), 4);
    }
}
