//! Context Engine Core Components
//!
//! The Context Engine decides, per question, how retrieval is weighted:
//! - Query normalisation
//! - Lookup / inferential classification
//! - Sparse/dense routing weights

mod query_router;

pub use query_router::{Query, QueryClass, QueryRouter, RoutingSignals, RoutingWeights};
