//! specsift — test-impact analysis for Page-Object-Model suites.
//!
//! Given a change set, the engine computes the subset of `*.spec.*` files
//! whose behavior may have changed, so CI can run those instead of the full
//! suite. The pipeline is fail-safe: when a call site cannot be resolved
//! statically it over-selects rather than dropping coverage.
//!
//! The core stages:
//! 1. Normalize the change set (one entry per path, canonical status).
//! 2. Global watch: config-level changes force a full run.
//! 3. Diff changed page-object sources member by member at the AST level.
//! 4. Propagate impact through the call, composition and inheritance graphs.
//! 5. Select specs by fixture bindings, import reachability and call-site
//!    matching under the configured bias.

pub mod analyzer;
pub mod changeset;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod fixtures;
pub mod globwatch;
pub mod importgraph;
pub mod inheritance;
pub mod model;
pub mod propagate;
pub mod report;
pub mod selection;
pub mod source;
pub mod util;

pub use config::{GlobalWatchMode, Profile, SelectionBias, SelectionConfig};
pub use engine::{select_specs, select_specs_in_repo};
pub use error::EngineError;
pub use model::{ChangeEntry, ChangeStatus, SelectionReason};
pub use report::SelectionReport;
pub use source::{ChangeEnumerator, GitWorkspace, RevisionReader, TreeLister};
