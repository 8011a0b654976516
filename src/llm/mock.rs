//! Mock 生成客户端（用于测试与离线运行，无需后端）
//!
//! 每个角色回一段固定格式的台词；可按轮次注入失败，并记录每次调用，方便断言请求内容与时刻。

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::core::GenerationError;
use crate::llm::{
    ChatTurnRequest, DebateRoundRequest, FinalStatementRequest, GenerationClient, GenerationReply,
    HistoryEntry, SummaryRequest, Utterance,
};
use crate::memory::Sender;
use crate::persona::PersonaId;

/// 记录下来的一次调用
#[derive(Clone, Debug)]
pub enum MockCall {
    ChatTurn {
        at: Instant,
        participant_ids: Vec<PersonaId>,
        history: Vec<HistoryEntry>,
    },
    DebateRound {
        at: Instant,
        round: u32,
        history: Vec<HistoryEntry>,
    },
    Summary {
        at: Instant,
        history: Vec<HistoryEntry>,
    },
    FinalStatement {
        at: Instant,
        participant_id: PersonaId,
    },
}

impl MockCall {
    pub fn at(&self) -> Instant {
        match self {
            MockCall::ChatTurn { at, .. }
            | MockCall::DebateRound { at, .. }
            | MockCall::Summary { at, .. }
            | MockCall::FinalStatement { at, .. } => *at,
        }
    }
}

/// Mock 客户端：可配置失败
#[derive(Debug, Default)]
pub struct MockGenerationClient {
    /// 轮次 -> 剩余失败次数
    round_failures: Mutex<HashMap<u32, usize>>,
    chat_failures: Mutex<usize>,
    fail_summary: bool,
    fail_final_for: HashSet<PersonaId>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockGenerationClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 第 round 轮的前 times 次请求失败
    pub fn fail_round(self, round: u32, times: usize) -> Self {
        lock(&self.round_failures).insert(round, times);
        self
    }

    /// 接下来 times 次聊天回合失败
    pub fn fail_chat(self, times: usize) -> Self {
        *lock(&self.chat_failures) = times;
        self
    }

    pub fn fail_summary(mut self) -> Self {
        self.fail_summary = true;
        self
    }

    pub fn fail_final_statement(mut self, persona: &str) -> Self {
        self.fail_final_for.insert(PersonaId::new(persona));
        self
    }

    /// 迄今的全部调用（按时间顺序）
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// 迄今请求过的辩论轮次号
    pub fn requested_rounds(&self) -> Vec<u32> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                MockCall::DebateRound { round, .. } => Some(*round),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MockCall) {
        lock(&self.calls).push(call);
    }

    fn take_round_failure(&self, round: u32) -> bool {
        let mut failures = lock(&self.round_failures);
        match failures.get_mut(&round) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn last_user_text(history: &[HistoryEntry]) -> &str {
    history
        .iter()
        .rev()
        .find(|h| h.sender == Sender::User)
        .map(|h| h.text.as_str())
        .unwrap_or("(no input)")
}

#[async_trait]
impl GenerationClient for MockGenerationClient {
    async fn chat_turn(&self, req: &ChatTurnRequest) -> Result<GenerationReply, GenerationError> {
        self.record(MockCall::ChatTurn {
            at: Instant::now(),
            participant_ids: req.participant_ids.clone(),
            history: req.history.clone(),
        });
        {
            let mut left = lock(&self.chat_failures);
            if *left > 0 {
                *left -= 1;
                return Err(GenerationError::Transport("mock chat failure".to_string()));
            }
        }
        let heard = last_user_text(&req.history);
        Ok(GenerationReply {
            utterances: req
                .participant_ids
                .iter()
                .map(|id| Utterance {
                    participant_id: id.clone(),
                    texts: vec![format!("{id} heard {}: \"{heard}\"", req.user_display_name)],
                })
                .collect(),
        })
    }

    async fn debate_round(
        &self,
        req: &DebateRoundRequest,
    ) -> Result<GenerationReply, GenerationError> {
        self.record(MockCall::DebateRound {
            at: Instant::now(),
            round: req.round,
            history: req.history.clone(),
        });
        if self.take_round_failure(req.round) {
            return Err(GenerationError::Backend {
                message: format!("mock failure on round {}", req.round),
                status: Some(503),
            });
        }
        Ok(GenerationReply {
            utterances: req
                .participant_ids
                .iter()
                .map(|id| Utterance {
                    participant_id: id.clone(),
                    texts: vec![
                        format!("{id} argues round {} on \"{}\"", req.round, req.topic),
                        "(unused second line)".to_string(),
                    ],
                })
                .collect(),
        })
    }

    async fn debate_summary(&self, req: &SummaryRequest) -> Result<String, GenerationError> {
        self.record(MockCall::Summary {
            at: Instant::now(),
            history: req.history.clone(),
        });
        if self.fail_summary {
            return Err(GenerationError::Transport("mock summary failure".to_string()));
        }
        Ok(format!(
            "Both sides debated \"{}\" across {} exchanges.",
            req.topic,
            req.history.len()
        ))
    }

    async fn final_statement(
        &self,
        req: &FinalStatementRequest,
    ) -> Result<String, GenerationError> {
        self.record(MockCall::FinalStatement {
            at: Instant::now(),
            participant_id: req.participant_id.clone(),
        });
        if self.fail_final_for.contains(&req.participant_id) {
            return Err(GenerationError::Backend {
                message: "mock final statement failure".to_string(),
                status: Some(500),
            });
        }
        Ok(format!("{} rests the case on \"{}\".", req.participant_id, req.topic))
    }
}
