// Pipelines: multi-step operations built on the store and engine.

pub mod ingest;
