//! Proposition memory: persistent natural-language facts for AI agents.
//!
//! recollect stores *propositions* (facts such as "Alice likes hiking") with a
//! confidence that decays exponentially since the fact was last revised, the
//! entity mentions they contain, and the source windows they were derived from.
//! It is exposed as an [MCP](https://modelcontextprotocol.io/) server and a
//! library.
//!
//! | Concern | Module |
//! |---------|--------|
//! | Store CRUD, scoped deletion, entity/grounding lookup | [`proposition::store`], [`proposition::lookup`] |
//! | Typed queries, decay filtering, similarity search, clustering | [`proposition::query`], [`proposition::search`] |
//! | Idempotent processed-window history | [`history`] |
//! | Incremental, windowed extraction from growing sources | [`extraction`] |
//! | Relationship projection and entity storage | [`graph`] |
//!
//! # Architecture
//!
//! - **Storage**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   for cosine nearest-neighbour search
//! - **Embeddings**: local ONNX Runtime with all-MiniLM-L6-v2 (384 dimensions)
//! - **Extraction**: a pluggable [`extraction::PropositionPipeline`] driven by a
//!   single-flight orchestrator that only re-reads unprocessed windows
//! - **Transport**: MCP over stdio (primary) or streamable HTTP
//!
//! # Modules
//!
//! - [`config`]: configuration loading from TOML files and environment variables
//! - [`db`]: SQLite initialization, schema, migrations, vector index and health checks
//! - [`embedding`]: text-to-vector embedding via ONNX Runtime
//! - [`proposition`]: the proposition store and query engine
//! - [`server`], [`tools`]: the MCP surface

pub mod config;
pub mod db;
pub mod embedding;
pub mod extraction;
pub mod graph;
pub mod history;
pub mod proposition;
pub mod server;
pub mod tools;
