//! 回合 / 辩论状态机
//!
//! 唯一持有「轮到谁」「第几轮」「是否在等用户」的地方。所有变更都经过 `dispatch(event)`：
//! 合法事件返回新阶段与驱动方要执行的下一步动作；非法事件返回 TransitionError 且状态不变。
//!
//! 阶段流转：
//! - UserTurn -> AgentTurn -> UserTurn（普通聊天）
//! - UserTurn -> DebateRound1 -> DebateRound2 -> DebateAwaitingUser <-> DebateFreeRound
//! - 任一辩论阶段 -> DebateEpilogue -> DebateEnded -> UserTurn
//! - 任一阶段 --Aborted--> UserTurn（离开画面，直接拆除）

use std::time::Duration;

use serde::Serialize;

use crate::core::{GenerationError, RecoveryAction, RecoveryPolicy, TransitionError};
use crate::debate::DebateSession;

/// 状态机阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    UserTurn,
    AgentTurn,
    DebateRound1,
    DebateRound2,
    DebateFreeRound,
    DebateAwaitingUser,
    DebateEpilogue,
    DebateEnded,
}

impl Phase {
    /// 正在生成 / 揭示某一轮
    pub fn is_debate_round(self) -> bool {
        matches!(
            self,
            Phase::DebateRound1 | Phase::DebateRound2 | Phase::DebateFreeRound
        )
    }

    /// 辩论进行中（尚未进入收尾）
    pub fn is_debate_running(self) -> bool {
        self.is_debate_round() || self == Phase::DebateAwaitingUser
    }
}

/// 发言权
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnOwner {
    User,
    Agent,
}

/// 输入框读取的回合状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SessionTurnState {
    pub owner: TurnOwner,
    pub debate_active: bool,
}

impl Default for SessionTurnState {
    fn default() -> Self {
        Self {
            owner: TurnOwner::User,
            debate_active: false,
        }
    }
}

/// 驱动状态机的事件
#[derive(Debug, Clone)]
pub enum Event {
    /// 普通聊天：用户提交了非空文本（消息已写入）
    UserSubmitted,
    /// 普通聊天：回复全部揭示完毕，或失败已提示
    AgentTurnFinished,
    /// 用户确认开始辩论（会话已校验）
    DebateConfirmed(DebateSession),
    /// 当前轮的批次揭示完毕
    RoundRevealed,
    /// 当前轮生成失败
    RoundFailed(GenerationError),
    /// 等待用户时，用户提交了自由文本或介入选项（消息已写入）
    UserIntervened,
    /// 用户确认结束辩论
    EndRequested,
    /// 收尾流程结束（成功或失败）
    EpilogueFinished,
    /// DebateEnded 回到 UserTurn
    Reset,
    /// 离开画面：拆除一切
    Aborted,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::UserSubmitted => "user_submitted",
            Event::AgentTurnFinished => "agent_turn_finished",
            Event::DebateConfirmed(_) => "debate_confirmed",
            Event::RoundRevealed => "round_revealed",
            Event::RoundFailed(_) => "round_failed",
            Event::UserIntervened => "user_intervened",
            Event::EndRequested => "end_requested",
            Event::EpilogueFinished => "epilogue_finished",
            Event::Reset => "reset",
            Event::Aborted => "aborted",
        }
    }
}

/// 驱动方在转移之后要做的事
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    /// 发起普通聊天回合请求
    RequestTurn,
    /// 延迟后请求第 round 轮
    RequestRound { round: u32, delay: Duration },
    /// 失败后延迟重试同一轮
    RetryRound { round: u32, delay: Duration },
    /// 交给用户，展示介入面板
    AwaitUser { round: u32 },
    /// 启动收尾流程
    StartEpilogue,
    /// 辩论已清除，发言权回到用户
    ReturnToUser,
    /// 取消所有挂起工作
    Teardown,
}

/// 一次转移的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub phase: Phase,
    pub action: Action,
}

/// 状态机内使用的固定延迟
#[derive(Debug, Clone, Copy)]
pub struct MachineTimings {
    /// 确认辩论后到请求第 1 轮
    pub start_delay: Duration,
    /// 第 1 轮揭示完毕后到请求第 2 轮
    pub round_gap: Duration,
    /// 用户介入后到请求下一轮
    pub resume_delay: Duration,
}

impl Default for MachineTimings {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_millis(500),
            round_gap: Duration::from_millis(500),
            resume_delay: Duration::from_millis(1000),
        }
    }
}

/// 回合 / 辩论状态机
#[derive(Debug)]
pub struct TurnMachine {
    phase: Phase,
    turn: SessionTurnState,
    debate: Option<DebateSession>,
    recovery: RecoveryPolicy,
    timings: MachineTimings,
}

impl TurnMachine {
    pub fn new(recovery: RecoveryPolicy, timings: MachineTimings) -> Self {
        Self {
            phase: Phase::UserTurn,
            turn: SessionTurnState::default(),
            debate: None,
            recovery,
            timings,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn turn(&self) -> SessionTurnState {
        self.turn
    }

    pub fn debate(&self) -> Option<&DebateSession> {
        self.debate.as_ref()
    }

    /// 仅供界面开关与记录开始标记使用；阶段与轮次只能经 dispatch 改变
    pub(crate) fn debate_mut(&mut self) -> Option<&mut DebateSession> {
        self.debate.as_mut()
    }

    /// 当前是否允许用户提交
    pub fn input_allowed(&self) -> bool {
        self.turn.owner == TurnOwner::User
            && matches!(self.phase, Phase::UserTurn | Phase::DebateAwaitingUser)
    }

    /// 唯一的状态变更入口
    pub fn dispatch(&mut self, event: Event) -> Result<Step, TransitionError> {
        let from = self.phase;
        let name = event.name();
        let step = self.transition(event)?;
        tracing::info!(
            ?from,
            to = ?step.phase,
            event = name,
            round = self.debate.as_ref().map(|d| d.round),
            "state transition"
        );
        Ok(step)
    }

    fn transition(&mut self, event: Event) -> Result<Step, TransitionError> {
        let phase = self.phase;
        let not_allowed = TransitionError::NotAllowed {
            phase,
            event: event.name(),
        };

        let step = match (phase, event) {
            (Phase::UserTurn, Event::UserSubmitted) => {
                self.turn.owner = TurnOwner::Agent;
                self.enter(Phase::AgentTurn, Action::RequestTurn)
            }
            (Phase::AgentTurn, Event::AgentTurnFinished) => {
                self.turn.owner = TurnOwner::User;
                self.enter(Phase::UserTurn, Action::None)
            }
            (Phase::UserTurn, Event::DebateConfirmed(mut session)) => {
                session.round = 1;
                session.awaiting_user_input = false;
                session.gate.withdraw();
                self.debate = Some(session);
                self.turn = SessionTurnState {
                    owner: TurnOwner::Agent,
                    debate_active: true,
                };
                let delay = self.timings.start_delay;
                self.enter(Phase::DebateRound1, Action::RequestRound { round: 1, delay })
            }
            (Phase::DebateRound1, Event::RoundRevealed) => {
                let round = self.advance_round()?;
                let delay = self.timings.round_gap;
                self.enter(Phase::DebateRound2, Action::RequestRound { round, delay })
            }
            (Phase::DebateRound2 | Phase::DebateFreeRound, Event::RoundRevealed) => {
                let round = self.advance_round()?;
                self.await_user(round)
            }
            (p, Event::RoundFailed(err)) if p.is_debate_round() => {
                let round = self.current_round()?;
                match self.recovery.decide(&err, round) {
                    RecoveryAction::RetryRound { delay } => {
                        self.enter(p, Action::RetryRound { round, delay })
                    }
                    RecoveryAction::AwaitUser => self.await_user(round),
                }
            }
            (Phase::DebateAwaitingUser, Event::UserIntervened) => {
                let delay = self.timings.resume_delay;
                let session = self.debate.as_mut().ok_or(TransitionError::NoDebate)?;
                session.awaiting_user_input = false;
                session.gate.withdraw();
                let round = session.round;
                self.turn.owner = TurnOwner::Agent;
                self.enter(Phase::DebateFreeRound, Action::RequestRound { round, delay })
            }
            (p, Event::EndRequested) if p.is_debate_running() => {
                let session = self.debate.as_mut().ok_or(TransitionError::NoDebate)?;
                session.awaiting_user_input = false;
                session.gate.withdraw();
                self.turn.owner = TurnOwner::Agent;
                self.enter(Phase::DebateEpilogue, Action::StartEpilogue)
            }
            (Phase::DebateEpilogue, Event::EpilogueFinished) => {
                self.debate = None;
                self.turn = SessionTurnState::default();
                self.enter(Phase::DebateEnded, Action::ReturnToUser)
            }
            (Phase::DebateEnded, Event::Reset) => self.enter(Phase::UserTurn, Action::None),
            (_, Event::Aborted) => {
                self.debate = None;
                self.turn = SessionTurnState::default();
                self.enter(Phase::UserTurn, Action::Teardown)
            }
            _ => return Err(not_allowed),
        };
        Ok(step)
    }

    fn enter(&mut self, phase: Phase, action: Action) -> Step {
        self.phase = phase;
        Step { phase, action }
    }

    fn current_round(&self) -> Result<u32, TransitionError> {
        self.debate
            .as_ref()
            .map(|d| d.round)
            .ok_or(TransitionError::NoDebate)
    }

    fn advance_round(&mut self) -> Result<u32, TransitionError> {
        let session = self.debate.as_mut().ok_or(TransitionError::NoDebate)?;
        session.round += 1;
        Ok(session.round)
    }

    fn await_user(&mut self, round: u32) -> Step {
        if let Some(session) = self.debate.as_mut() {
            session.awaiting_user_input = true;
            session.gate.offer();
        }
        self.turn.owner = TurnOwner::User;
        self.enter(Phase::DebateAwaitingUser, Action::AwaitUser { round })
    }
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self::new(RecoveryPolicy::default(), MachineTimings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::DebateStyle;
    use crate::persona::Persona;

    fn session() -> DebateSession {
        DebateSession::new(
            "Is loyalty more important than honesty?",
            DebateStyle::Balanced,
            &[Persona::new("alice", "Alice"), Persona::new("bob", "Bob")],
        )
        .unwrap()
    }

    fn failure() -> GenerationError {
        GenerationError::Transport("down".to_string())
    }

    /// 进入第 3 轮等待用户
    fn machine_at_round_three() -> TurnMachine {
        let mut m = TurnMachine::default();
        m.dispatch(Event::DebateConfirmed(session())).unwrap();
        m.dispatch(Event::RoundRevealed).unwrap();
        m.dispatch(Event::RoundRevealed).unwrap();
        m
    }

    #[test]
    fn test_chat_turn_round_trip() {
        let mut m = TurnMachine::default();
        assert!(m.input_allowed());
        let step = m.dispatch(Event::UserSubmitted).unwrap();
        assert_eq!(step.phase, Phase::AgentTurn);
        assert_eq!(step.action, Action::RequestTurn);
        assert_eq!(m.turn().owner, TurnOwner::Agent);
        assert!(!m.input_allowed());

        let step = m.dispatch(Event::AgentTurnFinished).unwrap();
        assert_eq!(step.phase, Phase::UserTurn);
        assert_eq!(m.turn().owner, TurnOwner::User);
    }

    #[test]
    fn test_debate_reaches_round_two_without_user() {
        let mut m = TurnMachine::default();
        let step = m.dispatch(Event::DebateConfirmed(session())).unwrap();
        assert_eq!(step.phase, Phase::DebateRound1);
        assert!(matches!(step.action, Action::RequestRound { round: 1, .. }));
        assert!(m.turn().debate_active);
        assert_eq!(m.debate().unwrap().round(), 1);

        let step = m.dispatch(Event::RoundRevealed).unwrap();
        assert_eq!(step.phase, Phase::DebateRound2);
        assert!(matches!(step.action, Action::RequestRound { round: 2, .. }));
        assert_eq!(m.debate().unwrap().round(), 2);
    }

    #[test]
    fn test_round_two_hands_over_to_user_at_round_three() {
        let m = machine_at_round_three();
        assert_eq!(m.phase(), Phase::DebateAwaitingUser);
        assert_eq!(m.turn().owner, TurnOwner::User);
        let d = m.debate().unwrap();
        assert_eq!(d.round(), 3);
        assert!(d.awaiting_user_input());
        assert!(d.intervention_visible());
        assert!(m.input_allowed());
    }

    #[test]
    fn test_free_round_increments_by_one() {
        let mut m = machine_at_round_three();
        for expected in 3..8 {
            let step = m.dispatch(Event::UserIntervened).unwrap();
            assert_eq!(step.phase, Phase::DebateFreeRound);
            assert!(matches!(step.action, Action::RequestRound { round, .. } if round == expected));
            assert!(!m.debate().unwrap().intervention_visible());

            let step = m.dispatch(Event::RoundRevealed).unwrap();
            assert_eq!(step.action, Action::AwaitUser { round: expected + 1 });
            assert_eq!(m.debate().unwrap().round(), expected + 1);
        }
    }

    #[test]
    fn test_early_round_failure_retries_same_round() {
        let mut m = TurnMachine::default();
        m.dispatch(Event::DebateConfirmed(session())).unwrap();
        let step = m.dispatch(Event::RoundFailed(failure())).unwrap();
        assert_eq!(step.phase, Phase::DebateRound1);
        assert!(matches!(step.action, Action::RetryRound { round: 1, .. }));
        assert_eq!(m.debate().unwrap().round(), 1);
    }

    #[test]
    fn test_round_three_failure_retries() {
        let mut m = machine_at_round_three();
        m.dispatch(Event::UserIntervened).unwrap();
        let step = m.dispatch(Event::RoundFailed(failure())).unwrap();
        assert!(matches!(step.action, Action::RetryRound { round: 3, .. }));
        assert_eq!(step.phase, Phase::DebateFreeRound);
    }

    #[test]
    fn test_round_four_failure_awaits_user() {
        let mut m = machine_at_round_three();
        m.dispatch(Event::UserIntervened).unwrap();
        m.dispatch(Event::RoundRevealed).unwrap();
        m.dispatch(Event::UserIntervened).unwrap();
        assert_eq!(m.debate().unwrap().round(), 4);

        let step = m.dispatch(Event::RoundFailed(failure())).unwrap();
        assert_eq!(step.phase, Phase::DebateAwaitingUser);
        assert_eq!(step.action, Action::AwaitUser { round: 4 });
        let d = m.debate().unwrap();
        assert!(d.awaiting_user_input());
        assert_eq!(d.round(), 4, "failed round is not counted");
    }

    #[test]
    fn test_policy_threshold_drives_round_failure() {
        let policy = RecoveryPolicy::new(1, Duration::from_millis(10));
        let mut m = TurnMachine::new(policy, MachineTimings::default());
        m.dispatch(Event::DebateConfirmed(session())).unwrap();
        let step = m.dispatch(Event::RoundFailed(failure())).unwrap();
        assert_eq!(
            step.action,
            Action::RetryRound { round: 1, delay: Duration::from_millis(10) }
        );

        m.dispatch(Event::RoundRevealed).unwrap();
        let step = m.dispatch(Event::RoundFailed(failure())).unwrap();
        assert_eq!(step.phase, Phase::DebateAwaitingUser);
        assert_eq!(step.action, Action::AwaitUser { round: 2 });
        assert!(m.debate().unwrap().intervention_visible());
    }

    #[test]
    fn test_end_and_epilogue_clear_session() {
        let mut m = machine_at_round_three();
        let step = m.dispatch(Event::EndRequested).unwrap();
        assert_eq!(step.action, Action::StartEpilogue);
        assert!(m.turn().debate_active);
        assert!(!m.input_allowed());

        // 收尾期间不能再次结束
        assert!(m.dispatch(Event::EndRequested).is_err());

        let step = m.dispatch(Event::EpilogueFinished).unwrap();
        assert_eq!(step.phase, Phase::DebateEnded);
        assert!(m.debate().is_none());
        assert_eq!(m.turn(), SessionTurnState::default());

        let step = m.dispatch(Event::Reset).unwrap();
        assert_eq!(step.phase, Phase::UserTurn);
    }

    #[test]
    fn test_end_allowed_mid_round() {
        let mut m = TurnMachine::default();
        m.dispatch(Event::DebateConfirmed(session())).unwrap();
        let step = m.dispatch(Event::EndRequested).unwrap();
        assert_eq!(step.phase, Phase::DebateEpilogue);
    }

    #[test]
    fn test_abort_tears_down_from_anywhere() {
        let mut m = machine_at_round_three();
        m.dispatch(Event::UserIntervened).unwrap();
        let step = m.dispatch(Event::Aborted).unwrap();
        assert_eq!(step, Step { phase: Phase::UserTurn, action: Action::Teardown });
        assert!(m.debate().is_none());
        assert!(!m.turn().debate_active);
    }

    #[test]
    fn test_illegal_events_leave_state_untouched() {
        let mut m = TurnMachine::default();
        let err = m.dispatch(Event::RoundRevealed).unwrap_err();
        assert!(matches!(err, TransitionError::NotAllowed { phase: Phase::UserTurn, .. }));
        assert!(m.dispatch(Event::EndRequested).is_err());
        assert_eq!(m.phase(), Phase::UserTurn);

        m.dispatch(Event::UserSubmitted).unwrap();
        assert!(m.dispatch(Event::DebateConfirmed(session())).is_err());
        assert!(m.dispatch(Event::UserSubmitted).is_err());
        assert_eq!(m.phase(), Phase::AgentTurn);
    }

    #[test]
    fn test_user_intervention_only_while_awaiting() {
        let mut m = TurnMachine::default();
        m.dispatch(Event::DebateConfirmed(session())).unwrap();
        assert!(m.dispatch(Event::UserIntervened).is_err());
        assert_eq!(m.phase(), Phase::DebateRound1);
    }
}
