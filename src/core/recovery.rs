//! 失败恢复策略
//!
//! 辩论前几轮失败自动重试同一轮，之后把发言权交还用户；阈值可配置。

use std::time::Duration;

use crate::core::{GenerationError, RecoveryAction};

/// 默认自动重试的最大轮次（含）
pub const DEFAULT_MAX_RETRY_ROUND: u32 = 3;

/// 将辩论轮次失败映射为动作；传输错误与畸形响应同等对待
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    max_retry_round: u32,
    retry_delay: Duration,
}

impl RecoveryPolicy {
    pub fn new(max_retry_round: u32, retry_delay: Duration) -> Self {
        Self {
            max_retry_round,
            retry_delay,
        }
    }

    pub fn max_retry_round(&self) -> u32 {
        self.max_retry_round
    }

    pub fn decide(&self, err: &GenerationError, round: u32) -> RecoveryAction {
        let action = if round <= self.max_retry_round {
            RecoveryAction::RetryRound {
                delay: self.retry_delay,
            }
        } else {
            RecoveryAction::AwaitUser
        };
        tracing::debug!(round, status = ?err.status(), ?action, "recovery decision: {}", err);
        action
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRY_ROUND, Duration::from_millis(3000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> GenerationError {
        GenerationError::Transport("connection reset".to_string())
    }

    #[test]
    fn test_recovery_retries_early_rounds() {
        let policy = RecoveryPolicy::default();
        for round in 1..=3 {
            let action = policy.decide(&transport(), round);
            assert!(matches!(action, RecoveryAction::RetryRound { .. }));
        }
    }

    #[test]
    fn test_recovery_surfaces_round_four() {
        let policy = RecoveryPolicy::default();
        assert_eq!(policy.decide(&transport(), 4), RecoveryAction::AwaitUser);
    }

    #[test]
    fn test_recovery_malformed_same_as_transport() {
        let policy = RecoveryPolicy::default();
        let err = GenerationError::Malformed("no utterances".to_string());
        assert_eq!(policy.decide(&err, 2), policy.decide(&transport(), 2));
        assert_eq!(policy.decide(&err, 5), policy.decide(&transport(), 5));
    }

    #[test]
    fn test_recovery_threshold_configurable() {
        let policy = RecoveryPolicy::new(1, Duration::from_millis(10));
        assert!(matches!(
            policy.decide(&transport(), 1),
            RecoveryAction::RetryRound { delay } if delay == Duration::from_millis(10)
        ));
        assert_eq!(policy.decide(&transport(), 2), RecoveryAction::AwaitUser);
    }

    #[test]
    fn test_recovery_backend_status_does_not_change_decision() {
        let policy = RecoveryPolicy::default();
        let err = GenerationError::Backend {
            message: "boom".to_string(),
            status: Some(500),
        };
        assert_eq!(policy.decide(&err, 4), RecoveryAction::AwaitUser);
        assert!(matches!(policy.decide(&err, 3), RecoveryAction::RetryRound { .. }));
    }
}
