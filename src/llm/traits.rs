//! 生成服务客户端抽象
//!
//! 四类请求：聊天回合、辩论轮次、辩论总结、最终陈述。所有后端（HTTP / Mock）实现 GenerationClient。
//! 传输错误与结构化错误统一为 GenerationError（消息 + 可选状态码）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::GenerationError;
use crate::debate::DebateStyle;
use crate::memory::{Message, MessageId, Sender};
use crate::persona::PersonaId;

/// 发给生成服务的历史条目
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: MessageId,
    pub sender: Sender,
    pub text: String,
    pub agent_id: Option<PersonaId>,
}

impl From<&Message> for HistoryEntry {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id,
            sender: m.sender,
            text: m.text.clone(),
            agent_id: m.agent_id.clone(),
        }
    }
}

/// 普通聊天回合
#[derive(Clone, Debug)]
pub struct ChatTurnRequest {
    pub participant_ids: Vec<PersonaId>,
    pub history: Vec<HistoryEntry>,
    pub user_display_name: String,
}

/// 辩论轮次
#[derive(Clone, Debug)]
pub struct DebateRoundRequest {
    pub participant_ids: Vec<PersonaId>,
    pub topic: String,
    pub style: DebateStyle,
    pub history: Vec<HistoryEntry>,
    pub round: u32,
    pub user_display_name: String,
}

/// 辩论总结
#[derive(Clone, Debug)]
pub struct SummaryRequest {
    pub participant_ids: Vec<PersonaId>,
    pub topic: String,
    pub history: Vec<HistoryEntry>,
}

/// 单个角色的最终陈述
#[derive(Clone, Debug)]
pub struct FinalStatementRequest {
    pub participant_ids: Vec<PersonaId>,
    pub participant_id: PersonaId,
    pub topic: String,
    pub history: Vec<HistoryEntry>,
}

/// 某个角色本次生成的若干段台词
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Utterance {
    pub participant_id: PersonaId,
    pub texts: Vec<String>,
}

impl Utterance {
    pub fn new(participant_id: impl Into<String>, texts: Vec<String>) -> Self {
        Self {
            participant_id: PersonaId::new(participant_id),
            texts,
        }
    }
}

/// 聊天回合 / 辩论轮次的响应
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenerationReply {
    pub utterances: Vec<Utterance>,
}

/// 生成服务客户端 trait
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn chat_turn(&self, req: &ChatTurnRequest) -> Result<GenerationReply, GenerationError>;

    async fn debate_round(
        &self,
        req: &DebateRoundRequest,
    ) -> Result<GenerationReply, GenerationError>;

    /// 返回总结正文
    async fn debate_summary(&self, req: &SummaryRequest) -> Result<String, GenerationError>;

    /// 返回该角色的最终陈述
    async fn final_statement(&self, req: &FinalStatementRequest)
        -> Result<String, GenerationError>;
}
