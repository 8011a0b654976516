//! 辩论层：会话、回合状态机、介入面板、辩论上下文过滤、收尾流程

pub mod epilogue;
pub mod history;
pub mod intervention;
pub mod machine;
pub mod session;

pub use epilogue::{EpilogueRequest, EpilogueSequencer, EpilogueStage, EpilogueStep, EpilogueTimings};
pub use history::{debate_history, is_debate_context};
pub use intervention::{choice_text, choices, InterventionChoice, InterventionGate, Stance};
pub use machine::{
    Action, Event, MachineTimings, Phase, SessionTurnState, Step, TurnMachine, TurnOwner,
};
pub use session::{DebateSession, DebateStyle, Side};
