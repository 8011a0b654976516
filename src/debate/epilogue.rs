//! 收尾流程：占位 -> 总结 -> 双方最终陈述 -> 结束标记
//!
//! 纯同步的子状态机，不发请求也不计时；控制器按返回的 `EpilogueStep` 去请求或等待，
//! 结果再喂回来。每一步只写消息日志，失败只影响本阶段。

use std::time::Duration;

use crate::core::GenerationError;
use crate::debate::history::debate_history;
use crate::debate::DebateSession;
use crate::llm::{FinalStatementRequest, SummaryRequest};
use crate::memory::{Message, MessageId, MessageKind, MessageStore};

pub const SUMMARY_PENDING_TEXT: &str = "Summarizing the debate...";
pub const SUMMARY_FAILED_TEXT: &str = "Failed to generate the debate summary.";
pub const DEBATE_ENDED_TEXT: &str = "The debate has ended.";

/// 收尾阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EpilogueStage {
    Summary,
    /// 第 n 位参与者（0 或 1）的最终陈述
    FinalStatement(usize),
    Close,
}

/// 需要发给生成服务的请求
#[derive(Clone, Debug)]
pub enum EpilogueRequest {
    Summary(SummaryRequest),
    FinalStatement { index: usize, request: FinalStatementRequest },
}

/// 控制器下一步要做的事
#[derive(Clone, Debug)]
pub enum EpilogueStep {
    Request(EpilogueRequest),
    /// 等待后调用 `advance(stage)`
    Wait(Duration, EpilogueStage),
    /// 结果与当前阶段不符，什么都不做
    Idle,
    Finished,
}

#[derive(Debug, Clone, Copy)]
pub struct EpilogueTimings {
    /// 总结 -> 第一位陈述
    pub summary_gap: Duration,
    /// 两位陈述之间
    pub statement_gap: Duration,
    /// 第二位陈述 -> 结束标记
    pub closing_delay: Duration,
}

impl Default for EpilogueTimings {
    fn default() -> Self {
        Self {
            summary_gap: Duration::from_millis(500),
            statement_gap: Duration::from_millis(800),
            closing_delay: Duration::from_millis(800),
        }
    }
}

/// 收尾子状态机
#[derive(Debug)]
pub struct EpilogueSequencer {
    session: DebateSession,
    timings: EpilogueTimings,
    placeholder: Option<MessageId>,
    pending: Option<EpilogueStage>,
}

impl EpilogueSequencer {
    /// 写入占位并给出总结请求
    pub fn begin(
        session: DebateSession,
        timings: EpilogueTimings,
        store: &mut MessageStore,
    ) -> (Self, EpilogueStep) {
        let placeholder =
            store.push(Message::system(MessageKind::SummaryPending, SUMMARY_PENDING_TEXT));
        let mut seq = Self {
            session,
            timings,
            placeholder: Some(placeholder),
            pending: None,
        };
        let step = seq.advance(EpilogueStage::Summary, store);
        (seq, step)
    }

    pub fn session(&self) -> &DebateSession {
        &self.session
    }

    /// 当前等待结果的阶段
    pub fn pending(&self) -> Option<EpilogueStage> {
        self.pending
    }

    /// 进入某阶段：返回请求，或在 Close 时直接写结束标记
    pub fn advance(&mut self, stage: EpilogueStage, store: &mut MessageStore) -> EpilogueStep {
        match stage {
            EpilogueStage::Summary => {
                self.pending = Some(stage);
                EpilogueStep::Request(EpilogueRequest::Summary(SummaryRequest {
                    participant_ids: self.session.participant_ids(),
                    topic: self.session.topic().to_string(),
                    history: debate_history(store, &self.session),
                }))
            }
            EpilogueStage::FinalStatement(index) => {
                let Some(participant) = self.session.participants().get(index) else {
                    return self.advance(EpilogueStage::Close, store);
                };
                self.pending = Some(stage);
                EpilogueStep::Request(EpilogueRequest::FinalStatement {
                    index,
                    request: FinalStatementRequest {
                        participant_ids: self.session.participant_ids(),
                        participant_id: participant.id.clone(),
                        topic: self.session.topic().to_string(),
                        history: debate_history(store, &self.session),
                    },
                })
            }
            EpilogueStage::Close => {
                self.pending = None;
                self.close(store);
                EpilogueStep::Finished
            }
        }
    }

    /// 总结结果（已清洗）；空字符串视为失败
    pub fn on_summary(
        &mut self,
        result: Result<String, GenerationError>,
        store: &mut MessageStore,
    ) -> EpilogueStep {
        if self.pending != Some(EpilogueStage::Summary) {
            tracing::warn!("summary result arrived out of order, ignored");
            return EpilogueStep::Idle;
        }
        self.pending = None;
        if let Some(id) = self.placeholder.take() {
            store.remove_transient(id);
        }

        let result = result.and_then(|s| {
            if s.trim().is_empty() {
                Err(GenerationError::Malformed("empty summary".to_string()))
            } else {
                Ok(s)
            }
        });
        match result {
            Ok(summary) => {
                store.push(Message::system(
                    MessageKind::Summary,
                    format!("Debate summary\n\n{summary}"),
                ));
                EpilogueStep::Wait(self.timings.summary_gap, EpilogueStage::FinalStatement(0))
            }
            Err(err) => {
                tracing::warn!(error = %err, "debate summary failed");
                store.push(Message::system(MessageKind::Error, SUMMARY_FAILED_TEXT));
                // 总结失败不再请求陈述，直接写结束标记
                self.advance(EpilogueStage::Close, store)
            }
        }
    }

    /// 第 index 位的最终陈述结果（已清洗）；失败只记日志并跳过
    pub fn on_final_statement(
        &mut self,
        index: usize,
        result: Result<String, GenerationError>,
        store: &mut MessageStore,
    ) -> EpilogueStep {
        if self.pending != Some(EpilogueStage::FinalStatement(index)) {
            tracing::warn!(index, "final statement arrived out of order, ignored");
            return EpilogueStep::Idle;
        }
        self.pending = None;

        let participant = self.session.participants()[index].id.clone();
        match result {
            Ok(text) if !text.trim().is_empty() => {
                store.push(Message::agent(&participant, text));
            }
            Ok(_) => tracing::warn!(%participant, "empty final statement skipped"),
            Err(err) => {
                tracing::warn!(%participant, error = %err, "final statement failed, skipped");
            }
        }

        if index + 1 < self.session.participants().len() {
            EpilogueStep::Wait(
                self.timings.statement_gap,
                EpilogueStage::FinalStatement(index + 1),
            )
        } else {
            EpilogueStep::Wait(self.timings.closing_delay, EpilogueStage::Close)
        }
    }

    /// 写入结束标记；本场已有则不重复写。返回是否写入。
    pub fn close(&self, store: &mut MessageStore) -> bool {
        let marker = self.session.start_marker();
        if store.contains_kind_since(MessageKind::DebateEnd, marker) {
            tracing::debug!("debate end marker already present");
            return false;
        }
        store.push(Message::system(MessageKind::DebateEnd, DEBATE_ENDED_TEXT));
        true
    }
}
