use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::LanguageModel;
use crate::retrieval::{RetrievalRouter, RouteDecision, RoutingPolicy};

const GROUNDED_SYSTEM_PROMPT: &str = "你是一個有用的AI助理。請根據以下提供的「背景資料」來回答用戶的問題。這些資料比你的內部知識更新，請優先使用。";
const PLAIN_SYSTEM_PROMPT: &str = "你是一個有用的AI助理。請用繁體中文回答用戶的問題。";
const FAILURE_REPLY: &str = "抱歉，處理請求時發生錯誤。";
const HISTORY_TURNS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub rag_used: bool,
    pub rag_context: String,
    pub route: RouteDecision,
}

/// One chat turn: route, retrieve, prompt, complete, tidy.
pub struct ChatPipeline {
    router: Arc<RetrievalRouter>,
    policy: Arc<dyn RoutingPolicy>,
    model: Arc<dyn LanguageModel>,
    top_k: usize,
}

impl ChatPipeline {
    pub fn new(
        router: Arc<RetrievalRouter>,
        policy: Arc<dyn RoutingPolicy>,
        model: Arc<dyn LanguageModel>,
        top_k: usize,
    ) -> Self {
        Self {
            router,
            policy,
            model,
            top_k,
        }
    }

    /// Answer `query` with the bases chosen by the routing policy.
    pub fn chat(&self, query: &str, history: &[ChatTurn]) -> ChatReply {
        let route = self.policy.route(query);
        self.chat_with_route(query, history, route)
    }

    /// Answer `query` with an explicit choice of knowledge bases. Never fails:
    /// a model error becomes a fixed apology.
    pub fn chat_with_route(&self, query: &str, history: &[ChatTurn], route: RouteDecision) -> ChatReply {
        info!(
            "Chat query (static: {}, dynamic: {})",
            route.use_static, route.use_dynamic
        );

        let bundle = self
            .router
            .query(query, self.top_k, route.use_static, route.use_dynamic);

        let (prompt, system) = if bundle.has_context {
            (grounded_prompt(query, &bundle.context, history), GROUNDED_SYSTEM_PROMPT)
        } else {
            (plain_prompt(query, history), PLAIN_SYSTEM_PROMPT)
        };

        let response = match self.model.complete(&prompt, Some(system)) {
            Ok(text) => tidy_response(&text),
            Err(e) => {
                error!("Language model call failed: {e}");
                FAILURE_REPLY.to_string()
            }
        };

        ChatReply {
            response,
            rag_used: bundle.has_context,
            rag_context: bundle.context,
            route,
        }
    }
}

fn push_history(parts: &mut Vec<String>, history: &[ChatTurn]) {
    if history.is_empty() {
        return;
    }
    parts.push("--- 對話歷史 ---".to_string());
    let start = history.len().saturating_sub(HISTORY_TURNS);
    for turn in &history[start..] {
        let speaker = match turn.role {
            Role::User => "用戶",
            Role::Assistant => "助手",
        };
        parts.push(format!("{speaker}: {}", turn.content));
    }
    parts.push(String::new());
}

pub fn grounded_prompt(query: &str, context: &str, history: &[ChatTurn]) -> String {
    let mut parts = vec![
        "=== 背景資料 ===".to_string(),
        context.to_string(),
        "=".repeat(18),
        String::new(),
    ];
    push_history(&mut parts, history);
    parts.push(format!("用戶問題: {query}"));
    parts.push("\n請根據上述背景資料和對話歷史，回答用戶的問題：".to_string());
    parts.join("\n")
}

pub fn plain_prompt(query: &str, history: &[ChatTurn]) -> String {
    let mut parts = Vec::new();
    push_history(&mut parts, history);
    parts.push(format!("用戶問題: {query}"));
    parts.join("\n")
}

/// Normalize 臺 to 台 and trim.
pub fn tidy_response(text: &str) -> String {
    text.trim().replace('臺', "台")
}
