//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DUET__*` 覆盖（双下划线表示嵌套，如 `DUET__BACKEND__PROVIDER=http`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{Pacing, RecoveryPolicy};
use crate::debate::{EpilogueTimings, MachineTimings};
use crate::persona::Persona;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub backend: BackendSection,
    pub pacing: PacingSection,
    pub debate: DebateSection,
}

/// [app] 段：用户昵称、默认角色
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_user_display_name")]
    pub user_display_name: String,
    /// 启动时默认选中的角色（1 或 2 位）
    #[serde(default)]
    pub personas: Vec<Persona>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            user_display_name: default_user_display_name(),
            personas: Vec::new(),
        }
    }
}

fn default_user_display_name() -> String {
    "User".to_string()
}

/// [backend] 段：生成服务
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSection {
    /// http / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    pub base_url: Option<String>,
    /// 未设置时读环境变量 DUET_API_TOKEN
    pub api_token: Option<String>,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            api_token: None,
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

/// [pacing] 段：揭示节拍（毫秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingSection {
    pub reveal_interval_ms: u64,
    pub completion_step_ms: u64,
    pub settle_ms: u64,
}

impl Default for PacingSection {
    fn default() -> Self {
        Self {
            reveal_interval_ms: 800,
            completion_step_ms: 1500,
            settle_ms: 2000,
        }
    }
}

impl PacingSection {
    pub fn to_pacing(&self) -> Pacing {
        Pacing {
            reveal_interval: Duration::from_millis(self.reveal_interval_ms),
            completion_step: Duration::from_millis(self.completion_step_ms),
            settle: Duration::from_millis(self.settle_ms),
        }
    }
}

/// [debate] 段：辩论各处延迟与重试上限（毫秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebateSection {
    pub start_delay_ms: u64,
    pub round_gap_ms: u64,
    pub resume_delay_ms: u64,
    pub retry_delay_ms: u64,
    /// 此轮及之前的失败自动重试
    pub max_retry_round: u32,
    pub summary_gap_ms: u64,
    pub statement_gap_ms: u64,
    pub closing_delay_ms: u64,
    /// 每次交还用户时追加一条「哪一方更有说服力」提问
    pub prompt_on_intervention: bool,
}

impl Default for DebateSection {
    fn default() -> Self {
        Self {
            start_delay_ms: 500,
            round_gap_ms: 500,
            resume_delay_ms: 1000,
            retry_delay_ms: 3000,
            max_retry_round: 3,
            summary_gap_ms: 500,
            statement_gap_ms: 800,
            closing_delay_ms: 800,
            prompt_on_intervention: false,
        }
    }
}

impl DebateSection {
    pub fn machine_timings(&self) -> MachineTimings {
        MachineTimings {
            start_delay: Duration::from_millis(self.start_delay_ms),
            round_gap: Duration::from_millis(self.round_gap_ms),
            resume_delay: Duration::from_millis(self.resume_delay_ms),
        }
    }

    pub fn epilogue_timings(&self) -> EpilogueTimings {
        EpilogueTimings {
            summary_gap: Duration::from_millis(self.summary_gap_ms),
            statement_gap: Duration::from_millis(self.statement_gap_ms),
            closing_delay: Duration::from_millis(self.closing_delay_ms),
        }
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy::new(
            self.max_retry_round,
            Duration::from_millis(self.retry_delay_ms),
        )
    }
}

/// 从 config 目录加载配置，环境变量 DUET__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DUET__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DUET")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置（调用方决定是否用新配置重建控制器）
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.user_display_name, "User");
        assert_eq!(cfg.backend.provider, "mock");
        assert_eq!(cfg.pacing.to_pacing(), Pacing::default());
        assert_eq!(cfg.debate.recovery_policy().max_retry_round(), 3);
        assert_eq!(cfg.debate.machine_timings().resume_delay, Duration::from_millis(1000));
        assert_eq!(cfg.debate.epilogue_timings().statement_gap, Duration::from_millis(800));
    }

    #[test]
    fn test_load_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[app]
user_display_name = "Mina"
personas = [{{ id = "alice", name = "Alice" }}, {{ id = "bob", name = "Bob (the bard)" }}]

[pacing]
reveal_interval_ms = 10

[debate]
max_retry_round = 5
prompt_on_intervention = true
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.app.user_display_name, "Mina");
        assert_eq!(cfg.app.personas.len(), 2);
        assert_eq!(cfg.app.personas[1].short_name(), "Bob");
        assert_eq!(cfg.pacing.reveal_interval_ms, 10);
        assert_eq!(cfg.pacing.settle_ms, 2000);
        assert_eq!(cfg.debate.max_retry_round, 5);
        assert!(cfg.debate.prompt_on_intervention);
        assert_eq!(cfg.debate.retry_delay_ms, 3000);
    }
}
