//! 辩论会话：主题、风格、轮次、双方立场位置、等待用户标志
//!
//! 只在辩论进行中存在；双方必须恰好两名且互不相同，轮次单调不减。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::TransitionError;
use crate::debate::InterventionGate;
use crate::memory::MessageId;
use crate::persona::{Persona, PersonaId};

/// 辩论风格
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateStyle {
    #[default]
    Aggressive,
    Calm,
    Playful,
    Balanced,
}

impl fmt::Display for DebateStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebateStyle::Aggressive => write!(f, "aggressive"),
            DebateStyle::Calm => write!(f, "calm"),
            DebateStyle::Playful => write!(f, "playful"),
            DebateStyle::Balanced => write!(f, "balanced"),
        }
    }
}

impl FromStr for DebateStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aggressive" => Ok(DebateStyle::Aggressive),
            "calm" => Ok(DebateStyle::Calm),
            "playful" => Ok(DebateStyle::Playful),
            "balanced" => Ok(DebateStyle::Balanced),
            other => Err(format!("unknown debate style '{other}'")),
        }
    }
}

/// 画面上的座位
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// 一场辩论的全部状态
#[derive(Clone, Debug)]
pub struct DebateSession {
    topic: String,
    style: DebateStyle,
    pub(crate) round: u32,
    participants: [Persona; 2],
    positions: BTreeMap<PersonaId, Side>,
    pub(crate) awaiting_user_input: bool,
    pub(crate) gate: InterventionGate,
    start_marker: Option<MessageId>,
}

impl DebateSession {
    /// 校验后创建：恰好两名不同角色、主题非空；轮次归零
    pub fn new(
        topic: &str,
        style: DebateStyle,
        participants: &[Persona],
    ) -> Result<Self, TransitionError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(TransitionError::EmptyTopic);
        }
        let [first, second] = participants else {
            return Err(TransitionError::ParticipantCount(participants.len()));
        };
        if first.id == second.id {
            return Err(TransitionError::DuplicateParticipant(first.id.to_string()));
        }

        let positions = BTreeMap::from([
            (first.id.clone(), Side::Left),
            (second.id.clone(), Side::Right),
        ]);
        Ok(Self {
            topic: topic.to_string(),
            style,
            round: 0,
            participants: [first.clone(), second.clone()],
            positions,
            awaiting_user_input: false,
            gate: InterventionGate::default(),
            start_marker: None,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 展示用主题：去掉省略号
    pub fn display_topic(&self) -> String {
        self.topic.replace("...", "").replace('…', "")
    }

    pub fn style(&self) -> DebateStyle {
        self.style
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn participants(&self) -> &[Persona; 2] {
        &self.participants
    }

    pub fn participant_ids(&self) -> Vec<PersonaId> {
        self.participants.iter().map(|p| p.id.clone()).collect()
    }

    pub fn is_participant(&self, id: &PersonaId) -> bool {
        self.positions.contains_key(id)
    }

    pub fn side_of(&self, id: &PersonaId) -> Option<Side> {
        self.positions.get(id).copied()
    }

    pub fn positions(&self) -> &BTreeMap<PersonaId, Side> {
        &self.positions
    }

    pub fn awaiting_user_input(&self) -> bool {
        self.awaiting_user_input
    }

    pub fn gate(&self) -> &InterventionGate {
        &self.gate
    }

    pub fn intervention_visible(&self) -> bool {
        self.gate.is_visible()
    }

    pub fn start_marker(&self) -> Option<MessageId> {
        self.start_marker
    }

    pub(crate) fn set_start_marker(&mut self, id: MessageId) {
        self.start_marker = Some(id);
    }
}
