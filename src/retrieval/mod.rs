//! Query-time retrieval: intent routing, per-base search and context budgeting.
pub mod budget;
pub mod router;
pub mod routing;

pub use budget::{ContextBudget, TruncationPolicy};
pub use router::{ContextBundle, RetrievalRouter, Retriever, SectionInfo};
pub use routing::{KeywordRouting, RouteDecision, RoutingPolicy};
