//! 角色（Persona）标识与展示名

use std::fmt;

use serde::{Deserialize, Serialize};

/// 角色 ID（后端定义的不透明字符串，如 "alice"）
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonaId(String);

impl PersonaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersonaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PersonaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// 参与对话的角色：ID + 展示名
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: PersonaId,
    pub name: String,
}

impl Persona {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: PersonaId::new(id),
            name: name.into(),
        }
    }

    /// 简称：去掉 " (" 之后的修饰部分，如 "Alice (the knight)" -> "Alice"
    pub fn short_name(&self) -> &str {
        match self.name.find(" (") {
            Some(idx) => &self.name[..idx],
            None => &self.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name_strips_qualifier() {
        let p = Persona::new("alice", "Alice (the knight)");
        assert_eq!(p.short_name(), "Alice");
        let q = Persona::new("bob", "Bob");
        assert_eq!(q.short_name(), "Bob");
    }
}
