//! 状态定义：UiState 投影
//!
//! 界面只持有轻量的 UiState（阶段、回合、辩论视图、介入面板、锁、提示、历史）；
//! 完整状态由控制器持有，每处理一个事件就重新投影一次。

use std::collections::BTreeMap;

use serde::Serialize;

use crate::debate::{
    choices, DebateSession, DebateStyle, InterventionChoice, Phase, SessionTurnState, Side,
    TurnMachine,
};
use crate::memory::Message;
use crate::persona::{Persona, PersonaId};

/// 界面看到的投影状态
#[derive(Clone, Debug, Serialize)]
pub struct UiState {
    pub phase: Phase,
    pub turn: SessionTurnState,
    /// 当前选中的角色（1 或 2 位）
    pub personas: Vec<Persona>,
    pub debate: Option<DebateView>,
    pub gate: Option<GateView>,
    /// 当前阶段不接受输入
    pub input_locked: bool,
    /// 有请求或揭示正在进行
    pub busy: bool,
    /// 最近一次被拒绝的输入给出的提示
    pub notice: Option<String>,
    pub history: Vec<Message>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            phase: Phase::UserTurn,
            turn: SessionTurnState::default(),
            personas: Vec::new(),
            debate: None,
            gate: None,
            input_locked: false,
            busy: false,
            notice: None,
            history: Vec::new(),
        }
    }
}

/// 辩论信息栏
#[derive(Clone, Debug, Serialize)]
pub struct DebateView {
    pub topic: String,
    pub style: DebateStyle,
    pub round: u32,
    pub positions: BTreeMap<PersonaId, Side>,
    pub awaiting_user_input: bool,
}

impl From<&DebateSession> for DebateView {
    fn from(s: &DebateSession) -> Self {
        Self {
            topic: s.display_topic(),
            style: s.style(),
            round: s.round(),
            positions: s.positions().clone(),
            awaiting_user_input: s.awaiting_user_input(),
        }
    }
}

/// 介入面板
#[derive(Clone, Debug, Serialize)]
pub struct GateView {
    pub choices: Vec<InterventionChoice>,
    pub visible: bool,
}

/// 投影时需要的控制器侧信息
#[derive(Debug, Default)]
pub struct ProjectionInput<'a> {
    pub personas: &'a [Persona],
    pub busy: bool,
    pub notice: Option<String>,
    pub history: Vec<Message>,
}

/// 把状态机与控制器侧信息合并为 UiState
pub fn project(machine: &TurnMachine, input: ProjectionInput<'_>) -> UiState {
    let debate = machine.debate();
    let gate = debate
        .filter(|d| d.gate().is_offered())
        .map(|d| GateView {
            choices: choices(d.participants()).to_vec(),
            visible: d.intervention_visible(),
        });
    UiState {
        phase: machine.phase(),
        turn: machine.turn(),
        personas: input.personas.to_vec(),
        debate: debate.map(DebateView::from),
        gate,
        input_locked: !machine.input_allowed(),
        busy: input.busy,
        notice: input.notice,
        history: input.history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::Event;

    #[test]
    fn test_project_idle_machine() {
        let m = TurnMachine::default();
        let ui = project(&m, ProjectionInput::default());
        assert_eq!(ui.phase, Phase::UserTurn);
        assert!(!ui.input_locked);
        assert!(ui.debate.is_none());
        assert!(ui.gate.is_none());
    }

    #[test]
    fn test_project_awaiting_user_shows_gate() {
        let pair = vec![Persona::new("alice", "Alice"), Persona::new("bob", "Bob")];
        let mut m = TurnMachine::default();
        let session = DebateSession::new("Cats...", DebateStyle::Calm, &pair).unwrap();
        m.dispatch(Event::DebateConfirmed(session)).unwrap();
        let ui = project(&m, ProjectionInput { personas: &pair, ..Default::default() });
        assert!(ui.input_locked);
        assert!(ui.gate.is_none());
        assert_eq!(ui.debate.as_ref().unwrap().topic, "Cats");

        m.dispatch(Event::RoundRevealed).unwrap();
        m.dispatch(Event::RoundRevealed).unwrap();
        let ui = project(&m, ProjectionInput { personas: &pair, ..Default::default() });
        let gate = ui.gate.unwrap();
        assert!(gate.visible);
        assert_eq!(gate.choices.len(), 3);
        assert_eq!(ui.debate.unwrap().round, 3);
        assert!(!ui.input_locked);
    }
}
