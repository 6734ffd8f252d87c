/// End-to-end integration tests for the dualrag pipeline.
///
/// Tests the complete flow:
///   Config → Ingest → Build → Promote → Route → Budget → Context
use dualrag::app::{AppContext, RebuildTarget};
use dualrag::config::{CollectionSpec, Config};
use dualrag::embedder::Embedder;
use dualrag::embedder::hashing::HashingEmbedder;
use dualrag::knowledge::KnowledgeKind;
use dualrag::llm::{LanguageModel, LlmError};
use dualrag::retrieval::TruncationPolicy;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const PM_TEXT: &str = "專案管理是什麼？專案管理是運用知識、技能、工具與技術於專案活動上，以符合專案需求的過程。它涵蓋範疇、時程、成本、品質、資源、溝通、風險、採購以及利害關係人等知識領域。專案經理負責整合這些領域，帶領團隊在限制條件下交付成果，並持續監控進度與變更，確保專案目標能夠如期達成。良好的專案管理能降低風險並提升成功率。";

const WEATHER_TEXT: &str = "【高雄】\n- 天氣: 晴\n- 溫度: 29.5°C\n- 濕度: 78%\n- 氣壓: 1008 hPa\n\n【台北】\n- 天氣: 多雲\n- 溫度: 27.1°C\n- 濕度: 82%\n- 氣壓: 1010 hPa";

/// Echoes the prompt back so tests can see what the model was given.
struct EchoModel;

impl LanguageModel for EchoModel {
    fn complete(&self, prompt: &str, _system: Option<&str>) -> Result<String, LlmError> {
        Ok(prompt.to_string())
    }
}

fn test_config(root: &Path) -> Config {
    let mut config = Config {
        static_kb: CollectionSpec::new(
            "static_docs",
            root.join("documents"),
            "*",
            root.join("embeddings/static_db"),
        ),
        dynamic_kb: CollectionSpec::new(
            "dynamic_data",
            root.join("data"),
            "*_for_llm.txt",
            root.join("embeddings/dynamic_db"),
        ),
        chunk_size: 120,
        chunk_overlap: 20,
        ..Config::default()
    };
    config.model.dimensions = 128;
    config
}

fn app(config: Config) -> AppContext {
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(config.model.dimensions));
    AppContext::with_components(config, embedder, Arc::new(EchoModel))
}

fn write_sources(root: &Path) {
    fs::create_dir_all(root.join("documents")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    fs::write(root.join("documents/pm.txt"), PM_TEXT).unwrap();
    fs::write(root.join("data/weather_for_llm.txt"), WEATHER_TEXT).unwrap();
    // Raw feed output that the dynamic pattern must skip
    fs::write(root.join("data/weather_raw.json"), r#"{"TEMP": 29.5}"#).unwrap();
}

/// A static query over a freshly built static base returns text from the source file
#[test]
fn test_static_query_returns_source_text() {
    let temp_dir = tempdir().unwrap();
    write_sources(temp_dir.path());
    assert_eq!(PM_TEXT.chars().count(), 200);

    let app = app(test_config(temp_dir.path()));
    let outcomes = app.rebuild(RebuildTarget::Static);
    let report = outcomes[0].report.as_ref().expect("static rebuild should succeed");
    assert_eq!(report.files_seen, 1);
    assert!(report.stored >= 2, "200 chars at chunk_size 120 should split");

    let bundle = app.router.query("專案管理", 3, true, false);
    assert!(bundle.has_context);
    assert!(bundle.context.starts_with("【相關專業知識】\n"));

    let body = bundle.context.trim_start_matches("【相關專業知識】\n");
    let first_chunk = body.split("\n\n---\n\n").next().unwrap();
    assert!(
        PM_TEXT.contains(first_chunk),
        "context should quote the source file, got: {first_chunk}"
    );
    assert_eq!(bundle.sections.len(), 1);
    assert!(bundle.sections[0].sources[0].ends_with("documents/pm.txt"));
}

/// Two empty collections yield no context at all
#[test]
fn test_empty_collections_have_no_context() {
    let temp_dir = tempdir().unwrap();
    fs::create_dir_all(temp_dir.path().join("documents")).unwrap();
    fs::create_dir_all(temp_dir.path().join("data")).unwrap();

    let app = app(test_config(temp_dir.path()));
    for outcome in app.rebuild(RebuildTarget::All) {
        assert_eq!(outcome.report.unwrap().stored, 0);
    }

    let bundle = app.router.query("天氣", 3, true, true);
    assert!(!bundle.has_context);
    assert_eq!(bundle.context, "");
}

/// With both bases populated and enabled, the static section comes first
#[test]
fn test_static_section_precedes_dynamic() {
    let temp_dir = tempdir().unwrap();
    write_sources(temp_dir.path());

    let app = app(test_config(temp_dir.path()));
    assert!(app.rebuild(RebuildTarget::All).iter().all(|o| o.error.is_none()));

    let bundle = app.router.query("天氣", 3, true, true);
    let static_at = bundle.context.find("【相關專業知識】").expect("static label");
    let dynamic_at = bundle.context.find("【相關即時資訊】").expect("dynamic label");
    assert!(static_at < dynamic_at);
    assert_eq!(bundle.sections[0].kind, KnowledgeKind::Static);
    assert_eq!(bundle.sections[1].kind, KnowledgeKind::Dynamic);
    assert!(bundle.sections[1].sources[0].ends_with("weather_for_llm.txt"));
}

/// Rebuilding twice from the same sources stores the same number of records
#[test]
fn test_rebuild_twice_same_count() {
    let temp_dir = tempdir().unwrap();
    write_sources(temp_dir.path());

    let app = app(test_config(temp_dir.path()));
    app.rebuild(RebuildTarget::All);
    let first: Vec<usize> = app
        .status()
        .iter()
        .map(|s| s.stats.as_ref().unwrap().count)
        .collect();

    app.rebuild(RebuildTarget::All);
    let second: Vec<usize> = app
        .status()
        .iter()
        .map(|s| s.stats.as_ref().unwrap().count)
        .collect();

    assert_eq!(first, second);
    assert!(first.iter().all(|&n| n > 0));
}

/// A fresh, never-built collection answers with nothing
#[test]
fn test_fresh_collection_search_is_empty() {
    let temp_dir = tempdir().unwrap();
    let app = app(test_config(temp_dir.path()));

    assert!(app.static_kb.search("專案管理", 3).is_empty());
    assert!(app.dynamic_kb.search("天氣", 3).is_empty());
    assert!(!app.router.query("專案管理", 3, true, true).has_context);
}

/// Built collections survive a restart, and a model change is refused
#[test]
fn test_reopen_and_model_mismatch() {
    let temp_dir = tempdir().unwrap();
    write_sources(temp_dir.path());

    let config = test_config(temp_dir.path());
    app(config.clone()).rebuild(RebuildTarget::Static);

    let reopened = app(config.clone());
    assert!(reopened.router.query("專案管理", 3, true, false).has_context);

    let mut other_model = config;
    other_model.model.dimensions = 64;
    let mismatched = app(other_model);
    assert!(!mismatched.static_kb.is_available());
    assert!(!mismatched.router.query("專案管理", 3, true, false).has_context);
}

/// A missing dynamic source directory does not affect the static base
#[test]
fn test_missing_dynamic_source_is_isolated() {
    let temp_dir = tempdir().unwrap();
    fs::create_dir_all(temp_dir.path().join("documents")).unwrap();
    fs::write(temp_dir.path().join("documents/pm.txt"), PM_TEXT).unwrap();

    let app = app(test_config(temp_dir.path()));
    let outcomes = app.rebuild(RebuildTarget::All);
    assert!(outcomes[0].error.is_none());
    assert!(outcomes[1].error.is_some());

    let bundle = app.router.query("專案管理 天氣", 3, true, true);
    assert!(bundle.has_context);
    assert!(!bundle.context.contains("【相關即時資訊】"));
}

/// Per-base budgets bound the assembled context
#[test]
fn test_context_budget_bounds_sections() {
    let temp_dir = tempdir().unwrap();
    write_sources(temp_dir.path());

    let mut config = test_config(temp_dir.path());
    config.max_context_chars = 150;
    config.truncation = TruncationPolicy::PartialTrailing { min_remaining: 10 };
    let app = app(config);
    app.rebuild(RebuildTarget::All);

    let bundle = app.router.query("專案管理與天氣", 5, true, true);
    for (i, section) in bundle.context.split("\n\n【").enumerate() {
        let body = section.split_once('\n').map(|(_, b)| b).unwrap_or("");
        assert!(
            body.chars().count() <= 150,
            "section {i} exceeds its budget: {} chars",
            body.chars().count()
        );
    }
}

/// The chat pipeline routes a short weather question to live data only
#[test]
fn test_chat_routes_weather_question() {
    let temp_dir = tempdir().unwrap();
    write_sources(temp_dir.path());

    let app = app(test_config(temp_dir.path()));
    app.rebuild(RebuildTarget::All);

    let reply = app.chat.chat("高雄天氣", &[]);
    assert!(reply.rag_used);
    assert!(!reply.route.use_static);
    assert!(reply.rag_context.starts_with("【相關即時資訊】"));
    // The echo model returns the grounded prompt
    assert!(reply.response.starts_with("=== 背景資料 ==="));
    assert!(reply.response.contains("用戶問題: 高雄天氣"));
}

#[test]
fn test_config_defaults_and_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.labels.static_label, "【相關專業知識】");
    assert_eq!(config.labels.dynamic_label, "【相關即時資訊】");

    let mut bad = Config::default();
    bad.chunk_overlap = bad.chunk_size + 1;
    assert!(bad.validate().is_err());
}

#[test]
fn test_hashing_embedder_consistency() {
    let a = HashingEmbedder::new(128);
    let b = HashingEmbedder::new(128);
    assert_eq!(a.embed("專案管理").unwrap(), b.embed("專案管理").unwrap());
    assert_eq!(a.model_name(), b.model_name());
}

/// Raw search returns previews with their source metadata
#[test]
fn test_search_returns_previews_and_metadata() {
    let temp_dir = tempdir().unwrap();
    write_sources(temp_dir.path());

    let mut config = test_config(temp_dir.path());
    config.chunk_size = 400;
    config.chunk_overlap = 0;
    let app = app(config);
    app.rebuild(RebuildTarget::All);

    let hits = app.search("專案管理", 10, RebuildTarget::Static);
    assert_eq!(hits.len(), 1);
    // The whole 200-char document fits a preview uncut
    assert!(!hits[0].preview.ends_with("..."));
    assert!(PM_TEXT.contains(hits[0].preview.as_str()));
    assert_eq!(hits[0].filename, "pm.txt");
    assert_eq!(hits[0].file_type, "txt");
    assert_eq!(hits[0].position, 0);

    let status = app.status();
    let dynamic_files: Vec<&str> = status[1]
        .document_files
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(dynamic_files, vec!["weather_for_llm.txt"]);
    assert_eq!(status[0].document_files[0].size, PM_TEXT.len() as u64);
}
