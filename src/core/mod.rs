//! 核心编排层：错误与恢复、状态投影、会话监管、揭示调度、主控循环

pub mod controller;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod round_scheduler;
pub mod session_supervisor;
pub mod state;

pub use controller::{Controller, ControllerEvent, RevealItem};
pub use error::{GenerationError, RecoveryAction, TransitionError};
pub use orchestrator::{create_client_from_config, create_controller, create_duet, Command};
pub use recovery::RecoveryPolicy;
pub use round_scheduler::{BatchId, Pacing, RevealEvent, RoundScheduler};
pub use session_supervisor::SessionSupervisor;
pub use state::{DebateView, GateView, UiState};
