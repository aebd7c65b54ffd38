pub mod engine;

pub use engine::{ClonePair, EntityCount, QueryEngine, RepositoryStatistics};
