//! 编排入口：命令定义、后端选择、启动主控循环
//!
//! 建立 cmd/state 两条通道：界面 -> 核心的用户命令；核心 -> 界面的 UiState 快照。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::config::{load_config, AppConfig};
use crate::core::controller::Controller;
use crate::core::UiState;
use crate::debate::DebateStyle;
use crate::llm::{DefaultSanitizer, GenerationClient, HttpGenerationClient, MockGenerationClient, Sanitize};
use crate::memory::{Message, MessageId};
use crate::persona::Persona;

/// 从界面发往主控循环的用户命令
#[derive(Debug)]
pub enum Command {
    /// 选择 1 或 2 位角色
    SelectPersonas(Vec<Persona>),
    /// 提交文本：普通聊天，或辩论中等待用户时的自由输入
    Submit(String),
    /// 确认开始辩论（当前需恰好选中两位角色）
    ConfirmDebate { topic: String, style: DebateStyle },
    /// 选择介入选项（1..=3）
    Intervene(usize),
    /// 收起/展开介入面板
    ToggleGate,
    /// 结束辩论（界面已确认）
    EndDebate,
    /// 离开辩论画面：直接拆除，不走收尾
    LeaveScreen,
    /// 导出区间 [from, to] 的记录
    Export {
        from: Option<MessageId>,
        to: Option<MessageId>,
        reply: oneshot::Sender<Vec<Message>>,
    },
    /// 退出
    Quit,
}

/// 根据配置选择生成后端（HTTP / Mock）
pub fn create_client_from_config(cfg: &AppConfig) -> Arc<dyn GenerationClient> {
    match (cfg.backend.provider.to_lowercase().as_str(), cfg.backend.base_url.as_deref()) {
        ("http", Some(base_url)) => {
            tracing::info!("Using HTTP generation backend ({})", base_url);
            Arc::new(HttpGenerationClient::new(
                base_url,
                cfg.backend.api_token.as_deref(),
            ))
        }
        ("http", None) => {
            tracing::warn!("backend.provider = http but no base_url set, using Mock backend");
            Arc::new(MockGenerationClient::new())
        }
        (provider, _) => {
            if provider != "mock" {
                tracing::warn!("Unknown backend provider '{}', using Mock backend", provider);
            } else {
                tracing::info!("Using Mock generation backend");
            }
            Arc::new(MockGenerationClient::new())
        }
    }
}

/// 启动主控循环：返回命令发送端与状态接收端
pub fn create_controller(
    cfg: &AppConfig,
    client: Arc<dyn GenerationClient>,
    sanitizer: Arc<dyn Sanitize>,
) -> (mpsc::UnboundedSender<Command>, watch::Receiver<UiState>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(UiState::default());

    let controller = Controller::new(cfg, client, sanitizer, events_tx, state_tx);
    tokio::spawn(controller.run(cmd_rx, events_rx));

    (cmd_tx, state_rx)
}

/// 加载配置、选择后端并启动主控循环
pub async fn create_duet(
    config_path: Option<PathBuf>,
) -> anyhow::Result<(
    AppConfig,
    mpsc::UnboundedSender<Command>,
    watch::Receiver<UiState>,
)> {
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let client = create_client_from_config(&cfg);
    let (cmd_tx, state_rx) = create_controller(&cfg, client, Arc::new(DefaultSanitizer));
    Ok((cfg, cmd_tx, state_rx))
}
