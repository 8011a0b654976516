//! 介入选项：第 3 轮起每轮之间给用户的三个快捷反应
//!
//! 选项文本随两名参与者动态生成；选中后作为普通用户消息写入（不加任何装饰前缀），
//! 并触发与自由输入相同的状态转移。面板的收起/展开只是界面开关，不改变辩论状态。

use serde::Serialize;

use crate::core::TransitionError;
use crate::persona::Persona;

/// 选项立场
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    /// 第一位更有说服力
    First,
    /// 第二位更有说服力
    Second,
    /// 都有道理，想再听听
    Neutral,
}

/// 单个选项（编号从 1 开始）
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InterventionChoice {
    pub number: usize,
    pub stance: Stance,
    pub text: String,
}

/// 生成三个选项
pub fn choices(participants: &[Persona; 2]) -> [InterventionChoice; 3] {
    [
        InterventionChoice {
            number: 1,
            stance: Stance::First,
            text: format!("{}'s argument is more convincing", participants[0].short_name()),
        },
        InterventionChoice {
            number: 2,
            stance: Stance::Second,
            text: format!("{}'s argument is more convincing", participants[1].short_name()),
        },
        InterventionChoice {
            number: 3,
            stance: Stance::Neutral,
            text: "Both have merit, tell me more".to_string(),
        },
    ]
}

/// 按编号取选项文本
pub fn choice_text(participants: &[Persona; 2], number: usize) -> Option<String> {
    choices(participants)
        .into_iter()
        .find(|c| c.number == number)
        .map(|c| c.text)
}

/// 面板状态：是否由状态机提供（offered），以及用户是否手动收起（collapsed）
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterventionGate {
    offered: bool,
    collapsed: bool,
}

impl InterventionGate {
    /// 进入等待用户时自动展开
    pub(crate) fn offer(&mut self) {
        self.offered = true;
        self.collapsed = false;
    }

    /// 用户提交后收回
    pub(crate) fn withdraw(&mut self) {
        self.offered = false;
        self.collapsed = false;
    }

    /// 收起/展开切换，返回切换后是否可见
    pub fn toggle(&mut self) -> Result<bool, TransitionError> {
        if !self.offered {
            return Err(TransitionError::GateNotOffered);
        }
        self.collapsed = !self.collapsed;
        Ok(self.is_visible())
    }

    pub fn is_offered(&self) -> bool {
        self.offered
    }

    pub fn is_visible(&self) -> bool {
        self.offered && !self.collapsed
    }
}
