//! # dualrag: dual knowledge-base RAG retrieval core
//!
//! Answers chat queries from two independently maintained knowledge bases:
//! a static corpus of reference documents and a dynamic corpus regenerated
//! from a live data feed. Context is served to AI assistants over the Model
//! Context Protocol (MCP) or printed by the CLI.
//!
//! ## Architecture
//!
//! - **[`config`]**: JSON configuration with defaults and validation
//! - **[`ingest`]**: file loaders, text cleaning and recursive chunking
//! - **[`embedder`]**: text embedding via ONNX Runtime, or a deterministic hashing embedder
//! - **[`db`]**: per-collection SQLite + sqlite-vec storage and its manifest
//! - **[`knowledge`]**: embedding index, staged rebuilds, live knowledge-base handles
//! - **[`retrieval`]**: query routing, per-base search and context budgeting
//! - **[`llm`]**: language-model contract, Ollama client and chat pipeline
//! - **[`app`]**: wiring shared by the CLI and the MCP server
//! - **[`mcp`]**: MCP server with 5 tool handlers (stdio transport via rmcp)

pub mod app;
pub mod config;
pub mod db;
pub mod embedder;
pub mod ingest;
pub mod knowledge;
pub mod llm;
pub mod mcp;
pub mod retrieval;
