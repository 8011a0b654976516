//! 角色台词清洗
//!
//! 所有来自角色的文本在写入消息日志前都经过 `Sanitize`：去掉 Markdown 粗体、评分/元数据尾巴，
//! 替换 `{{USER}}` 等模板变量，修剪首尾空白。纯函数，无副作用。

use std::sync::OnceLock;

use regex::Regex;

/// 清洗接口：给定原文与用户昵称，返回可展示文本
pub trait Sanitize: Send + Sync {
    fn sanitize(&self, text: &str, user_display_name: &str) -> String;
}

impl<F> Sanitize for F
where
    F: Fn(&str, &str) -> String + Send + Sync,
{
    fn sanitize(&self, text: &str, user_display_name: &str) -> String {
        self(text, user_display_name)
    }
}

/// 默认清洗规则
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSanitizer;

fn metadata_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^\s*(Scoring result|Time context compliance rate|Score|Compliance rate|점수|준수율):.*$")
            .expect("static regex")
    })
}

fn inline_metadata() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)(Scoring result|Time context compliance rate):.*$").expect("static regex")
    })
}

impl Sanitize for DefaultSanitizer {
    fn sanitize(&self, text: &str, user_display_name: &str) -> String {
        let cleaned = text.replace("**", "");
        let cleaned = metadata_line().replace_all(&cleaned, "");
        let cleaned = inline_metadata().replace_all(&cleaned, "");
        let cleaned = if user_display_name.is_empty() {
            cleaned.into_owned()
        } else {
            cleaned
                .replace("{{USER}}", user_display_name)
                .replace("{{user_nickname}}", user_display_name)
        };
        cleaned.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_bold_and_templates() {
        let s = DefaultSanitizer.sanitize("  **Well**, {{USER}}, listen.  ", "Mina");
        assert_eq!(s, "Well, Mina, listen.");
    }

    #[test]
    fn test_sanitize_drops_metadata_lines() {
        let raw = "I stand by it.\nScore: 9/10\nCompliance rate: 95%";
        assert_eq!(DefaultSanitizer.sanitize(raw, "Mina"), "I stand by it.");
    }

    #[test]
    fn test_sanitize_drops_inline_scoring_tail() {
        let raw = "Loyalty first. Scoring result: 8";
        assert_eq!(DefaultSanitizer.sanitize(raw, ""), "Loyalty first.");
    }

    #[test]
    fn test_closure_sanitizer() {
        let upper = |t: &str, _: &str| t.to_uppercase();
        assert_eq!(upper.sanitize("abc", "x"), "ABC");
    }
}
