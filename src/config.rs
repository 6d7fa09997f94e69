//! Selection-run configuration.
//!
//! One record per invocation; nothing is read from the environment. The
//! profile describes where the test suite and its page objects live inside
//! the repository.

use crate::error::EngineError;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Predicate selecting which changed source files participate in the
/// semantic analysis (page-object classes, fixtures and friends).
pub type PomPathPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// How uncertain call sites in a spec are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionBias {
    /// Keep the spec when a call site cannot be pinned statically.
    FailOpen,
    /// Reserved; currently behaves as `FailClosed`.
    Balanced,
    /// Drop the spec unless a precise match exists.
    FailClosed,
}

impl SelectionBias {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionBias::FailOpen => "fail-open",
            SelectionBias::Balanced => "balanced",
            SelectionBias::FailClosed => "fail-closed",
        }
    }

    /// Whether uncertain call sites keep a spec in the selection.
    pub fn keeps_uncertain(self) -> bool {
        matches!(self, SelectionBias::FailOpen)
    }
}

impl Default for SelectionBias {
    fn default() -> Self {
        SelectionBias::FailOpen
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalWatchMode {
    /// A change matching a global-watch pattern (or its import closure)
    /// selects every spec in the project.
    ForceAllInProject,
    Disabled,
}

impl Default for GlobalWatchMode {
    fn default() -> Self {
        GlobalWatchMode::ForceAllInProject
    }
}

/// Patterns that force a full run when matched by any change. Extensions are
/// intentionally open (`.*`) so config files in either dialect match.
pub const DEFAULT_GLOBAL_WATCH_PATTERNS: &[&str] = &[
    "playwright.config.*",
    "playwright.*.config.*",
    "src/fixtures/**",
    "package.json",
    "tsconfig*.json",
];

/// Where the suite lives and which sources feed the analysis.
#[derive(Clone)]
pub struct Profile {
    /// Directory under which spec files live, repo-relative.
    pub tests_root_relative: String,
    /// Path prefix identifying direct spec changes.
    pub changed_spec_prefix: String,
    /// Which changed source files participate in semantic analysis.
    pub is_relevant_pom_path: PomPathPredicate,
    /// Directories scanned for class and call graphs.
    pub analysis_roots_relative: Vec<String>,
    /// Fixture map declaration file. `None` uses
    /// `src/fixtures/types.<first extension>`.
    pub fixtures_types_relative: Option<String>,
    pub global_watch_patterns: Vec<String>,
    pub global_watch_mode: GlobalWatchMode,
    /// Repo-relative directory of the project this profile describes, for
    /// repositories hosting several suites. Change entries outside it are
    /// dropped during normalization and the file-tree scans stay inside
    /// it. `None` scopes to the whole repository. Set through
    /// [`Profile::for_project`].
    pub scope_prefix_relative: Option<String>,
}

impl Profile {
    pub fn new(
        tests_root_relative: impl Into<String>,
        changed_spec_prefix: impl Into<String>,
        is_relevant_pom_path: PomPathPredicate,
    ) -> Self {
        Profile {
            tests_root_relative: tests_root_relative.into(),
            changed_spec_prefix: changed_spec_prefix.into(),
            is_relevant_pom_path,
            analysis_roots_relative: vec!["src".to_string()],
            fixtures_types_relative: None,
            global_watch_patterns: DEFAULT_GLOBAL_WATCH_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            global_watch_mode: GlobalWatchMode::default(),
            scope_prefix_relative: None,
        }
    }

    /// Profile for one project directory inside a larger repository.
    /// `tests_root_relative` and `changed_spec_prefix` are still given
    /// relative to the repo root (`apps/web/tests`, `apps/web/tests/`);
    /// the analysis root defaults to `<project>/src` and every change
    /// entry outside the project directory is dropped. Project layouts
    /// that keep the fixture declaration elsewhere should also set
    /// `fixtures_types_relative`.
    pub fn for_project(
        project_dir_relative: impl Into<String>,
        tests_root_relative: impl Into<String>,
        changed_spec_prefix: impl Into<String>,
        is_relevant_pom_path: PomPathPredicate,
    ) -> Self {
        let project_dir = project_dir_relative.into();
        let project_dir = project_dir.trim_end_matches('/').to_string();
        let mut profile = Profile::new(
            tests_root_relative,
            changed_spec_prefix,
            is_relevant_pom_path,
        );
        profile.analysis_roots_relative = vec![format!("{project_dir}/src")];
        profile.scope_prefix_relative = Some(project_dir);
        profile
    }

    /// Whether a changed source file participates in the semantic analysis.
    pub fn is_relevant(&self, path: &str) -> bool {
        (self.is_relevant_pom_path.as_ref())(path)
    }

    /// Effective fixture declaration path for the given extension list.
    pub fn fixtures_types_path(&self, extensions: &[String]) -> String {
        match &self.fixtures_types_relative {
            Some(path) => path.clone(),
            None => {
                let ext = extensions.first().map(String::as_str).unwrap_or(".ts");
                format!("src/fixtures/types{ext}")
            }
        }
    }
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("tests_root_relative", &self.tests_root_relative)
            .field("changed_spec_prefix", &self.changed_spec_prefix)
            .field("analysis_roots_relative", &self.analysis_roots_relative)
            .field("fixtures_types_relative", &self.fixtures_types_relative)
            .field("global_watch_patterns", &self.global_watch_patterns)
            .field("global_watch_mode", &self.global_watch_mode)
            .field("scope_prefix_relative", &self.scope_prefix_relative)
            .finish_non_exhaustive()
    }
}

/// Full configuration for one selection run.
#[derive(Debug, Clone)]
pub struct SelectionConfig {
    /// Repository root; all relative paths resolve against it.
    pub repo_root: PathBuf,
    /// Revision for the base-vs-head diff. `None` compares the working tree
    /// against the head commit only.
    pub base_ref: Option<String>,
    pub profile: Profile,
    /// Whether untracked spec files count as direct changes.
    pub include_untracked_specs: bool,
    /// Whether to union base-vs-head with working-tree-vs-head.
    pub include_working_tree_with_base: bool,
    /// Source extensions, lowercase with leading dot.
    pub file_extensions: Vec<String>,
    pub selection_bias: SelectionBias,
}

impl SelectionConfig {
    pub fn new(repo_root: impl Into<PathBuf>, profile: Profile) -> Self {
        SelectionConfig {
            repo_root: repo_root.into(),
            base_ref: None,
            profile,
            include_untracked_specs: true,
            include_working_tree_with_base: true,
            file_extensions: vec![".ts".to_string(), ".tsx".to_string()],
            selection_bias: SelectionBias::default(),
        }
    }

    /// Validate the record and normalize extensions. Fails with the fatal
    /// configuration error; no partial result is ever produced after this.
    pub fn validate(&mut self) -> Result<(), EngineError> {
        if self.repo_root.as_os_str().is_empty() {
            return Err(EngineError::configuration("repo_root is required"));
        }
        if !self.repo_root.is_absolute() {
            return Err(EngineError::configuration(format!(
                "repo_root must be absolute, got {}",
                self.repo_root.display()
            )));
        }
        if self.profile.tests_root_relative.is_empty() {
            return Err(EngineError::configuration(
                "profile.tests_root_relative is required",
            ));
        }
        if self.profile.changed_spec_prefix.is_empty() {
            return Err(EngineError::configuration(
                "profile.changed_spec_prefix is required",
            ));
        }
        if self.file_extensions.is_empty() {
            return Err(EngineError::configuration(
                "file_extensions must not be empty",
            ));
        }
        for ext in &mut self.file_extensions {
            *ext = ext.to_lowercase();
            if !ext.starts_with('.') {
                ext.insert(0, '.');
            }
        }
        if let Some(base) = &self.base_ref {
            if base.trim().is_empty() {
                self.base_ref = None;
            }
        }
        Ok(())
    }
}
