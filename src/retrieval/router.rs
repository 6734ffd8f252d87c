/// Combines the static and dynamic knowledge bases into one labelled
/// context string.
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::budget::ContextBudget;
use super::routing::RoutingPolicy;
use crate::config::LabelConfig;
use crate::knowledge::{KnowledgeKind, ScoredChunk};

/// Anything that can answer a top-k query. Must not fail: errors become an
/// empty result.
pub trait Retriever: Send + Sync {
    fn search(&self, query: &str, k: usize) -> Vec<ScoredChunk>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionInfo {
    pub kind: KnowledgeKind,
    pub chunks_used: usize,
    /// Distinct source paths of the chunks used, in rank order.
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextBundle {
    pub has_context: bool,
    pub context: String,
    pub sections: Vec<SectionInfo>,
}

pub struct RetrievalRouter {
    static_kb: Arc<dyn Retriever>,
    dynamic_kb: Arc<dyn Retriever>,
    budget: ContextBudget,
    labels: LabelConfig,
}

impl RetrievalRouter {
    pub fn new(
        static_kb: Arc<dyn Retriever>,
        dynamic_kb: Arc<dyn Retriever>,
        budget: ContextBudget,
        labels: LabelConfig,
    ) -> Self {
        Self {
            static_kb,
            dynamic_kb,
            budget,
            labels,
        }
    }

    /// Query the enabled bases, static first, and assemble the context.
    ///
    /// Each base gets its own budget. A disabled base is never searched.
    pub fn query(&self, text: &str, k: usize, use_static: bool, use_dynamic: bool) -> ContextBundle {
        let plan = [
            (use_static, KnowledgeKind::Static, &self.static_kb, &self.labels.static_label),
            (use_dynamic, KnowledgeKind::Dynamic, &self.dynamic_kb, &self.labels.dynamic_label),
        ];

        let mut parts = Vec::new();
        let mut sections = Vec::new();

        for (enabled, kind, retriever, label) in plan {
            if !enabled {
                continue;
            }
            let hits = retriever.search(text, k);
            debug!("{kind} knowledge base returned {} hits", hits.len());
            if hits.is_empty() {
                continue;
            }

            let contents: Vec<&str> = hits.iter().map(|h| h.content.as_str()).collect();
            let fitted = self.budget.fit(&contents);
            if fitted.text.is_empty() {
                continue;
            }

            let mut sources: Vec<String> = Vec::new();
            for &i in &fitted.included {
                if !sources.contains(&hits[i].source) {
                    sources.push(hits[i].source.clone());
                }
            }

            parts.push(format!("{label}\n{}", fitted.text));
            sections.push(SectionInfo {
                kind,
                chunks_used: fitted.included.len(),
                sources,
            });
        }

        ContextBundle {
            has_context: !parts.is_empty(),
            context: parts.join("\n\n"),
            sections,
        }
    }

    /// Let `policy` decide which bases to consult, then [`query`](Self::query).
    pub fn route_and_query(&self, text: &str, k: usize, policy: &dyn RoutingPolicy) -> ContextBundle {
        let decision = policy.route(text);
        self.query(text, k, decision.use_static, decision.use_dynamic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::routing::KeywordRouting;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns canned chunks and counts how often it was asked.
    struct CountingRetriever {
        chunks: Vec<(&'static str, &'static str)>,
        calls: AtomicUsize,
    }

    impl CountingRetriever {
        fn new(chunks: Vec<(&'static str, &'static str)>) -> Arc<Self> {
            Arc::new(Self {
                chunks,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Retriever for CountingRetriever {
        fn search(&self, _query: &str, k: usize) -> Vec<ScoredChunk> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.chunks
                .iter()
                .take(k)
                .enumerate()
                .map(|(i, (content, source))| ScoredChunk {
                    record_id: format!("doc_{i}"),
                    content: content.to_string(),
                    source: source.to_string(),
                    filename: source.to_string(),
                    file_type: "txt".to_string(),
                    position: i,
                    similarity: 1.0 - i as f64 * 0.1,
                })
                .collect()
        }
    }

    fn router(
        static_kb: Arc<CountingRetriever>,
        dynamic_kb: Arc<CountingRetriever>,
        max_chars: usize,
    ) -> RetrievalRouter {
        RetrievalRouter::new(
            static_kb,
            dynamic_kb,
            ContextBudget::new(max_chars),
            LabelConfig::default(),
        )
    }

    #[test]
    fn test_disabled_base_is_never_touched() {
        let s = CountingRetriever::new(vec![("專案管理知識", "pm.txt")]);
        let d = CountingRetriever::new(vec![("高雄 晴", "weather_for_llm.txt")]);
        let r = router(s.clone(), d.clone(), 2000);

        let bundle = r.query("專案管理", 3, true, false);
        assert!(bundle.has_context);
        assert_eq!(s.calls(), 1);
        assert_eq!(d.calls(), 0);
        assert!(!bundle.context.contains("【相關即時資訊】"));
    }

    #[test]
    fn test_static_section_precedes_dynamic() {
        let s = CountingRetriever::new(vec![("專案管理知識", "pm.txt")]);
        let d = CountingRetriever::new(vec![("高雄 晴", "weather_for_llm.txt")]);
        let bundle = router(s, d, 2000).query("天氣與專案", 3, true, true);

        assert_eq!(
            bundle.context,
            "【相關專業知識】\n專案管理知識\n\n【相關即時資訊】\n高雄 晴"
        );
        assert_eq!(bundle.sections.len(), 2);
        assert_eq!(bundle.sections[0].kind, KnowledgeKind::Static);
        assert_eq!(bundle.sections[1].sources, vec!["weather_for_llm.txt"]);
    }

    #[test]
    fn test_nothing_enabled_or_found() {
        let s = CountingRetriever::new(vec![]);
        let d = CountingRetriever::new(vec![]);
        let r = router(s.clone(), d.clone(), 2000);

        let none = r.query("任何問題", 3, false, false);
        assert_eq!(none, ContextBundle::default());
        assert_eq!(s.calls() + d.calls(), 0);

        let empty = r.query("任何問題", 3, true, true);
        assert!(!empty.has_context);
        assert_eq!(empty.context, "");
        assert!(empty.sections.is_empty());
    }

    #[test]
    fn test_budget_applies_per_base() {
        let s = CountingRetriever::new(vec![("a", "s1"), ("b", "s2"), ("c", "s1")]);
        let d = CountingRetriever::new(vec![("x", "d1"), ("y", "d2")]);
        // One-char chunks plus 7-char separators: 1 + 8 = 9 fits two per base
        let bundle = router(s, d, 9).query("q", 3, true, true);

        assert_eq!(bundle.sections[0].chunks_used, 2);
        assert_eq!(bundle.sections[0].sources, vec!["s1", "s2"]);
        assert_eq!(bundle.sections[1].chunks_used, 2);
        assert!(bundle.context.contains("a\n\n---\n\nb"));
        assert!(!bundle.context.contains('c'));
    }

    #[test]
    fn test_sources_deduplicated() {
        let s = CountingRetriever::new(vec![("甲", "same.txt"), ("乙", "same.txt")]);
        let d = CountingRetriever::new(vec![]);
        let bundle = router(s, d, 2000).query("q", 3, true, false);
        assert_eq!(bundle.sections[0].sources, vec!["same.txt"]);
        assert_eq!(bundle.sections[0].chunks_used, 2);
    }

    #[test]
    fn test_route_and_query_follows_policy() {
        let s = CountingRetriever::new(vec![("專案管理知識", "pm.txt")]);
        let d = CountingRetriever::new(vec![("高雄 晴", "weather_for_llm.txt")]);
        let r = router(s.clone(), d.clone(), 2000);
        let policy = KeywordRouting::default();

        let bundle = r.route_and_query("高雄天氣", 3, &policy);
        assert_eq!(s.calls(), 0);
        assert_eq!(d.calls(), 1);
        assert!(bundle.context.starts_with("【相關即時資訊】"));

        r.route_and_query("專案範疇如何定義？", 3, &policy);
        assert_eq!(s.calls(), 1);
        assert_eq!(d.calls(), 1);
    }
}
