/// MCP Tool handlers for dualrag.
///
/// 1. query_knowledge        – labelled context from explicitly chosen bases
/// 2. route_query            – let the keyword policy pick the bases, then query
/// 3. rebuild_knowledge_base – full rebuild of static, dynamic or both
/// 4. knowledge_base_stats   – per-base availability, record counts and source files
/// 5. chat                   – grounded answer from the configured language model
/// 6. search_knowledge       – raw ranked chunks with previews and metadata
///
/// Every handler runs its work on the blocking pool: searches hit SQLite and
/// the embedder synchronously, and rebuilds and chat can take seconds.
use crate::app::{AppContext, RebuildTarget};
use crate::llm::ChatTurn;
use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{ErrorData as McpError, handler::server::tool::ToolRouter, model::*, tool, tool_router};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct QueryParams {
    /// Query text (natural language)
    query: String,
    /// Chunks to retrieve per knowledge base (default: search_top_k)
    top_k: Option<usize>,
    /// Search the static document base (default: true)
    use_static: Option<bool>,
    /// Search the dynamic live-data base (default: false)
    use_dynamic: Option<bool>,
}

#[derive(Deserialize, JsonSchema)]
struct RouteParams {
    /// Query text (natural language)
    query: String,
    /// Chunks to retrieve per knowledge base (default: search_top_k)
    top_k: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
struct RebuildParams {
    /// Which base to rebuild: static | dynamic | all
    target: String,
}

#[derive(Deserialize, JsonSchema)]
struct SearchParams {
    /// Query text (natural language)
    query: String,
    /// Maximum hits to return (default: 10)
    limit: Option<usize>,
    /// Which bases to search: static | dynamic | all (default: all)
    target: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct ChatParams {
    /// The user's message
    message: String,
    /// Earlier turns, oldest first; only the last three are used
    history: Option<Vec<ChatTurn>>,
}

// ── Response helpers ─────────────────────────────────────────────────

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("serialization failed: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn error_result(msg: &str) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.to_string())]))
}

/// Run `f` on the blocking pool against the shared context.
async fn blocking<T, F>(ctx: &Arc<AppContext>, f: F) -> Result<T, McpError>
where
    T: Send + 'static,
    F: FnOnce(&AppContext) -> T + Send + 'static,
{
    let ctx = Arc::clone(ctx);
    tokio::task::spawn_blocking(move || f(&ctx))
        .await
        .map_err(|e| McpError::internal_error(format!("worker task failed: {e}"), None))
}

const DEFAULT_SEARCH_LIMIT: usize = 10;

fn parse_target(target: &str) -> Option<RebuildTarget> {
    match target.trim().to_ascii_lowercase().as_str() {
        "static" => Some(RebuildTarget::Static),
        "dynamic" => Some(RebuildTarget::Dynamic),
        "all" => Some(RebuildTarget::All),
        _ => None,
    }
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct AppTools {
    pub ctx: Arc<AppContext>,
    pub tool_router: ToolRouter<Self>,
}

impl ServerHandler for AppTools {}

#[tool_router]
impl AppTools {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    // ── Tool 1: query_knowledge ─────────────────────────────────────

    #[tool(
        description = "Retrieve labelled context from the static document base and/or the dynamic live-data base. Returns has_context, the assembled context and per-base sources."
    )]
    async fn query_knowledge(
        &self,
        params: Parameters<QueryParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.query.trim().is_empty() {
            return error_result("query is required");
        }

        let top_k = p.top_k.unwrap_or(self.ctx.config.search_top_k);
        let use_static = p.use_static.unwrap_or(true);
        let use_dynamic = p.use_dynamic.unwrap_or(false);

        let bundle = blocking(&self.ctx, move |ctx| {
            ctx.router.query(&p.query, top_k, use_static, use_dynamic)
        })
        .await?;
        json_result(&bundle)
    }

    // ── Tool 2: route_query ─────────────────────────────────────────

    #[tool(
        description = "Decide from the query text which knowledge bases apply (weather terms enable live data; short weather questions skip static documents), then retrieve context."
    )]
    async fn route_query(&self, params: Parameters<RouteParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.query.trim().is_empty() {
            return error_result("query is required");
        }

        let top_k = p.top_k.unwrap_or(self.ctx.config.search_top_k);
        let (route, bundle) = blocking(&self.ctx, move |ctx| {
            let route = ctx.policy.route(&p.query);
            let bundle = ctx
                .router
                .query(&p.query, top_k, route.use_static, route.use_dynamic);
            (route, bundle)
        })
        .await?;

        json_result(&serde_json::json!({
            "route": route,
            "result": bundle,
        }))
    }

    // ── Tool 3: rebuild_knowledge_base ──────────────────────────────

    #[tool(
        description = "Fully rebuild a knowledge base from its source directory (static | dynamic | all). Queries keep answering from the previous data until the new build is swapped in."
    )]
    async fn rebuild_knowledge_base(
        &self,
        params: Parameters<RebuildParams>,
    ) -> Result<CallToolResult, McpError> {
        let Some(target) = parse_target(&params.0.target) else {
            return error_result("target must be one of: static, dynamic, all");
        };

        let outcomes = blocking(&self.ctx, move |ctx| ctx.rebuild(target)).await?;
        let failed = outcomes.iter().any(|o| o.error.is_some());
        let body = serde_json::json!({ "success": !failed, "results": outcomes });

        if failed {
            let text = serde_json::to_string_pretty(&body).unwrap_or_default();
            return Ok(CallToolResult::error(vec![Content::text(text)]));
        }
        json_result(&body)
    }

    // ── Tool 4: knowledge_base_stats ────────────────────────────────

    #[tool(
        description = "Show each knowledge base's availability, record count, model and location, plus the loadable document files in its source directory"
    )]
    async fn knowledge_base_stats(&self) -> Result<CallToolResult, McpError> {
        let status = blocking(&self.ctx, |ctx| ctx.status()).await?;
        json_result(&serde_json::json!({ "knowledge_bases": status }))
    }

    // ── Tool 5: chat ────────────────────────────────────────────────

    #[tool(
        description = "Answer a chat message with the configured language model, grounded in whichever knowledge bases the query routes to."
    )]
    async fn chat(&self, params: Parameters<ChatParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.message.trim().is_empty() {
            return error_result("message is required");
        }

        let history = p.history.unwrap_or_default();
        let reply = blocking(&self.ctx, move |ctx| ctx.chat.chat(&p.message, &history)).await?;
        json_result(&reply)
    }

    // ── Tool 6: search_knowledge ────────────────────────────────────

    #[tool(
        description = "Similarity search returning the ranked chunks themselves: a 200-character preview, source file, type, position and similarity for each hit."
    )]
    async fn search_knowledge(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.query.trim().is_empty() {
            return error_result("query is required");
        }
        let target = match p.target.as_deref() {
            None => RebuildTarget::All,
            Some(t) => match parse_target(t) {
                Some(target) => target,
                None => return error_result("target must be one of: static, dynamic, all"),
            },
        };

        let limit = p.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        let hits = blocking(&self.ctx, move |ctx| ctx.search(&p.query, limit, target)).await?;
        json_result(&serde_json::json!({ "count": hits.len(), "results": hits }))
    }
}
