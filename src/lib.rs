//! Duet - 陪伴聊天的回合与辩论编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 主控循环、错误与恢复、会话监管、揭示调度、UI 状态投影
//! - **debate**: 辩论会话、回合状态机、介入面板、辩论上下文、收尾流程
//! - **llm**: 生成服务客户端抽象与实现（HTTP / Mock）、台词清洗
//! - **memory**: 消息日志
//! - **persona**: 角色标识与展示名

pub mod config;
pub mod core;
pub mod debate;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod persona;

pub use crate::core::{create_controller, create_duet, Command, UiState};
pub use crate::persona::{Persona, PersonaId};
