//! HTTP 生成后端客户端
//!
//! 通过 reqwest 以 JSON POST 调用远端生成服务：
//! - `/chat`：普通聊天回合
//! - `/chat/debate`：辩论轮次
//! - `/chat/debate/summary`：辩论总结
//! - `/chat/debate/final-statements`：单个角色的最终陈述
//!
//! 非 2xx 响应解析 `detail` / `message` 字段作为错误消息，并带上 HTTP 状态码。

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::GenerationError;
use crate::debate::DebateStyle;
use crate::llm::{
    ChatTurnRequest, DebateRoundRequest, FinalStatementRequest, GenerationClient, GenerationReply,
    HistoryEntry, SummaryRequest, Utterance,
};
use crate::memory::Sender;
use crate::persona::PersonaId;

/// HTTP 客户端：持有 reqwest::Client、服务地址与可选 Bearer token
pub struct HttpGenerationClient {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpGenerationClient {
    pub fn new(base_url: &str, api_token: Option<&str>) -> Self {
        let api_token = api_token
            .map(String::from)
            .or_else(|| std::env::var("DUET_API_TOKEN").ok());
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, GenerationError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.post(&url).json(body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(%url, "generation request");
        let response = request
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_body(status.as_u16(), &body));
        }
        response
            .json::<R>()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))
    }
}

// ---- 线上格式 ----

#[derive(Serialize)]
struct WireHistoryItem<'a> {
    id: usize,
    sender: &'static str,
    text: &'a str,
    #[serde(rename = "characterId")]
    character_id: Option<&'a str>,
}

#[derive(Serialize)]
struct WireChatRequest<'a> {
    character_ids: Vec<&'a str>,
    user_nickname: &'a str,
    chat_history: Vec<WireHistoryItem<'a>>,
}

#[derive(Serialize)]
struct WireDebateRequest<'a> {
    character_ids: Vec<&'a str>,
    topic: &'a str,
    user_nickname: &'a str,
    chat_history: Vec<WireHistoryItem<'a>>,
    round: u32,
    style: DebateStyle,
}

#[derive(Serialize)]
struct WireSummaryRequest<'a> {
    character_ids: Vec<&'a str>,
    topic: &'a str,
    messages: Vec<WireHistoryItem<'a>>,
}

#[derive(Serialize)]
struct WireFinalStatementRequest<'a> {
    character_ids: Vec<&'a str>,
    character_id: &'a str,
    topic: &'a str,
    messages: Vec<WireHistoryItem<'a>>,
}

#[derive(Deserialize)]
struct WireReply {
    #[serde(default)]
    responses: Option<Vec<WireUtterance>>,
}

#[derive(Deserialize)]
struct WireUtterance {
    id: String,
    #[serde(default)]
    texts: Vec<String>,
}

#[derive(Deserialize)]
struct WireSummary {
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Deserialize)]
struct WireFinalStatement {
    #[serde(default)]
    final_statement: Option<String>,
}

fn wire_sender(sender: Sender) -> &'static str {
    match sender {
        Sender::User => "user",
        Sender::Agent => "ai",
        Sender::System => "system",
    }
}

fn wire_history(history: &[HistoryEntry]) -> Vec<WireHistoryItem<'_>> {
    history
        .iter()
        .enumerate()
        .map(|(idx, h)| WireHistoryItem {
            id: idx + 1,
            sender: wire_sender(h.sender),
            text: &h.text,
            character_id: h.agent_id.as_ref().map(PersonaId::as_str),
        })
        .collect()
}

fn wire_ids(ids: &[PersonaId]) -> Vec<&str> {
    ids.iter().map(PersonaId::as_str).collect()
}

fn into_reply(wire: WireReply) -> Result<GenerationReply, GenerationError> {
    let responses = wire.responses.unwrap_or_default();
    if responses.is_empty() {
        return Err(GenerationError::Malformed(
            "response has no utterances".to_string(),
        ));
    }
    Ok(GenerationReply {
        utterances: responses
            .into_iter()
            .map(|r| Utterance {
                participant_id: PersonaId::new(r.id),
                texts: r.texts,
            })
            .collect(),
    })
}

/// 从错误响应体提取消息：优先 `detail`，其次 `message`，都没有时用状态码
fn error_from_body(status: u16, body: &str) -> GenerationError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["detail", "message"].iter().find_map(|key| match v.get(*key) {
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(serde_json::Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            })
        })
        .unwrap_or_else(|| format!("Server error (HTTP {status})"));
    GenerationError::Backend {
        message,
        status: Some(status),
    }
}

fn non_empty(text: Option<String>, what: &str) -> Result<String, GenerationError> {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t),
        _ => Err(GenerationError::Malformed(format!("response has no {what}"))),
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn chat_turn(&self, req: &ChatTurnRequest) -> Result<GenerationReply, GenerationError> {
        let body = WireChatRequest {
            character_ids: wire_ids(&req.participant_ids),
            user_nickname: &req.user_display_name,
            chat_history: wire_history(&req.history),
        };
        into_reply(self.post("/chat", &body).await?)
    }

    async fn debate_round(
        &self,
        req: &DebateRoundRequest,
    ) -> Result<GenerationReply, GenerationError> {
        let body = WireDebateRequest {
            character_ids: wire_ids(&req.participant_ids),
            topic: &req.topic,
            user_nickname: &req.user_display_name,
            chat_history: wire_history(&req.history),
            round: req.round,
            style: req.style,
        };
        into_reply(self.post("/chat/debate", &body).await?)
    }

    async fn debate_summary(&self, req: &SummaryRequest) -> Result<String, GenerationError> {
        let body = WireSummaryRequest {
            character_ids: wire_ids(&req.participant_ids),
            topic: &req.topic,
            messages: wire_history(&req.history),
        };
        let wire: WireSummary = self.post("/chat/debate/summary", &body).await?;
        non_empty(wire.summary, "summary")
    }

    async fn final_statement(
        &self,
        req: &FinalStatementRequest,
    ) -> Result<String, GenerationError> {
        let body = WireFinalStatementRequest {
            character_ids: wire_ids(&req.participant_ids),
            character_id: req.participant_id.as_str(),
            topic: &req.topic,
            messages: wire_history(&req.history),
        };
        let wire: WireFinalStatement = self.post("/chat/debate/final-statements", &body).await?;
        non_empty(wire.final_statement, "final statement")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Message, MessageKind};

    #[test]
    fn test_error_from_body_prefers_detail() {
        let err = error_from_body(400, r#"{"detail":"need two personas","message":"x"}"#);
        assert_eq!(err.message(), "need two personas");
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn test_error_from_body_structured_detail() {
        let err = error_from_body(422, r#"{"detail":[{"loc":["body","topic"]}]}"#);
        assert!(err.message().contains("topic"));
    }

    #[test]
    fn test_error_from_body_not_json() {
        let err = error_from_body(502, "<html>bad gateway</html>");
        assert_eq!(err.message(), "Server error (HTTP 502)");
        assert_eq!(err.status(), Some(502));
    }

    #[test]
    fn test_into_reply_rejects_missing_utterances() {
        let wire: WireReply = serde_json::from_str(r#"{"chat_id": 3}"#).unwrap();
        assert!(matches!(into_reply(wire), Err(GenerationError::Malformed(_))));
        let wire: WireReply = serde_json::from_str(r#"{"responses": []}"#).unwrap();
        assert!(matches!(into_reply(wire), Err(GenerationError::Malformed(_))));
    }

    #[test]
    fn test_into_reply_maps_ids_and_texts() {
        let wire: WireReply = serde_json::from_str(
            r#"{"responses":[{"id":"alice","texts":["hi","there"]},{"id":"bob","texts":["yo"]}]}"#,
        )
        .unwrap();
        let reply = into_reply(wire).unwrap();
        assert_eq!(reply.utterances.len(), 2);
        assert_eq!(reply.utterances[0].participant_id.as_str(), "alice");
        assert_eq!(reply.utterances[0].texts, vec!["hi", "there"]);
    }

    #[test]
    fn test_debate_request_wire_shape() {
        let history: Vec<HistoryEntry> = vec![
            HistoryEntry::from(&Message::system(MessageKind::DebateStart, "start")),
            HistoryEntry::from(&Message::agent(&PersonaId::new("alice"), "point")),
        ];
        let ids = vec![PersonaId::new("alice"), PersonaId::new("bob")];
        let body = WireDebateRequest {
            character_ids: wire_ids(&ids),
            topic: "t",
            user_nickname: "User",
            chat_history: wire_history(&history),
            round: 3,
            style: DebateStyle::Playful,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["character_ids"][1], "bob");
        assert_eq!(v["style"], "playful");
        assert_eq!(v["round"], 3);
        assert_eq!(v["chat_history"][1]["sender"], "ai");
        assert_eq!(v["chat_history"][1]["characterId"], "alice");
        assert!(v["chat_history"][0]["characterId"].is_null());
    }

    #[test]
    fn test_non_empty_rejects_blank_summary() {
        assert!(non_empty(Some("  ".to_string()), "summary").is_err());
        assert!(non_empty(None, "summary").is_err());
        assert_eq!(non_empty(Some("ok".to_string()), "summary").unwrap(), "ok");
    }
}
