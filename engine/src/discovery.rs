//! Target discovery: walks the benchmark roots and yields every file that
//! matches the naming convention and the name filter.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use benchwatch_types::{ChangeEvent, ChangeKind, Target};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::{Walk, WalkBuilder};
use regex::Regex;

use crate::SetupError;

/// File-name convention plus display-name filter.
#[derive(Debug, Clone)]
pub struct TargetMatcher {
    globs: GlobSet,
    filter: Regex,
}

impl TargetMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S], filter: &str) -> Result<Self, SetupError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|source| SetupError::Pattern {
                    pattern: pattern.to_string(),
                    source,
                })?;
            builder.add(glob);
        }
        let globs = builder.build().map_err(|source| SetupError::Pattern {
            pattern: patterns
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join(", "),
            source,
        })?;

        let filter = if filter.is_empty() { "." } else { filter };
        let filter = Regex::new(filter).map_err(|source| SetupError::Filter {
            pattern: filter.to_string(),
            source,
        })?;

        Ok(Self { globs, filter })
    }

    /// Does the file name follow the target convention?
    #[must_use]
    pub fn matches_file(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.globs.is_match(Path::new(name)))
    }

    /// Is the display name (path relative to its root) matched by the filter?
    #[must_use]
    pub fn accepts(&self, target: &Target) -> bool {
        self.filter.is_match(target.display_name())
    }

    #[must_use]
    pub fn filter_pattern(&self) -> &str {
        self.filter.as_str()
    }
}

/// A subpath the walk could not read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryDiagnostic {
    pub path: Option<PathBuf>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Discovery {
    roots: Vec<PathBuf>,
    matcher: TargetMatcher,
}

impl Discovery {
    #[must_use]
    pub fn new(roots: Vec<PathBuf>, matcher: TargetMatcher) -> Self {
        Self { roots, matcher }
    }

    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    #[must_use]
    pub fn matcher(&self) -> &TargetMatcher {
        &self.matcher
    }

    /// Start a fresh lazy walk over every root.
    #[must_use]
    pub fn walk(&self) -> DiscoveryWalk<'_> {
        DiscoveryWalk {
            discovery: self,
            pending_roots: self.roots.iter().collect(),
            current: None,
            diagnostics: Vec::new(),
            filtered_out: 0,
        }
    }

    /// Targets to re-run for one filesystem change.
    ///
    /// A change to a target file re-runs that target. Any other change re-runs
    /// every target in the same directory. Paths outside every root yield
    /// nothing.
    #[must_use]
    pub fn targets_for_change(&self, event: &ChangeEvent) -> Vec<Target> {
        let Some(root) = self.root_for(&event.path) else {
            tracing::debug!(path = %event.path.display(), "change outside watched roots");
            return Vec::new();
        };

        if event.kind != ChangeKind::Remove
            && self.matcher.matches_file(&event.path)
            && event.path.is_file()
        {
            let target = Target::under_root(event.path.clone(), root);
            return if self.matcher.accepts(&target) {
                vec![target]
            } else {
                Vec::new()
            };
        }

        let Some(dir) = event.path.parent() else {
            return Vec::new();
        };
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!(dir = %dir.display(), "cannot list directory for change: {err}");
                return Vec::new();
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|ty| ty.is_file()))
            .map(|entry| entry.path())
            .filter(|path| self.matcher.matches_file(path))
            .collect();
        paths.sort();

        paths
            .into_iter()
            .map(|path| Target::under_root(path, root))
            .filter(|target| self.matcher.accepts(target))
            .collect()
    }

    /// Deepest root containing `path`.
    fn root_for(&self, path: &Path) -> Option<&Path> {
        self.roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map(PathBuf::as_path)
    }
}

/// Lazy iterator over discovered targets.
///
/// Unreadable entries are skipped and collected as diagnostics.
pub struct DiscoveryWalk<'a> {
    discovery: &'a Discovery,
    pending_roots: VecDeque<&'a PathBuf>,
    current: Option<(&'a Path, Walk)>,
    diagnostics: Vec<DiscoveryDiagnostic>,
    filtered_out: usize,
}

impl DiscoveryWalk<'_> {
    #[must_use]
    pub fn diagnostics(&self) -> &[DiscoveryDiagnostic] {
        &self.diagnostics
    }

    /// Convention files seen so far that the name filter rejected.
    #[must_use]
    pub fn filtered_out(&self) -> usize {
        self.filtered_out
    }
}

impl<'a> Iterator for DiscoveryWalk<'a> {
    type Item = Target;

    fn next(&mut self) -> Option<Target> {
        loop {
            if self.current.is_none() {
                let root = self.pending_roots.pop_front()?;
                let walk = walk_builder(root).build();
                self.current = Some((root.as_path(), walk));
            }
            let (root, walk) = self.current.as_mut()?;
            let root: &'a Path = *root;

            let Some(item) = walk.next() else {
                self.current = None;
                continue;
            };

            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    let path = error_path(&err);
                    tracing::warn!(
                        path = ?path,
                        "skipping unreadable path during discovery: {err}"
                    );
                    self.diagnostics.push(DiscoveryDiagnostic {
                        path,
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|ty| ty.is_file()) {
                continue;
            }
            if !self.discovery.matcher.matches_file(entry.path()) {
                continue;
            }

            let target = Target::under_root(entry.into_path(), root);
            if self.discovery.matcher.accepts(&target) {
                return Some(target);
            }
            self.filtered_out += 1;
        }
    }
}

/// Walker shared by discovery and the watcher's per-directory subscription.
///
/// Hidden entries are skipped and ignore files are not honoured. Symlinks are
/// followed, and a link back to an ancestor surfaces as a loop error instead
/// of recursing.
pub(crate) fn walk_builder(root: &Path) -> WalkBuilder {
    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .hidden(true)
        .follow_links(true)
        .sort_by_file_name(|a, b| a.cmp(b));
    builder
}

fn error_path(err: &ignore::Error) -> Option<PathBuf> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.clone()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        ignore::Error::Partial(errs) => errs.iter().find_map(error_path),
        ignore::Error::Loop { child, .. } => Some(child.clone()),
        _ => None,
    }
}

/// Resolve command-line directories to absolute, existing roots.
///
/// With no directories, `default_root` (relative to the working directory)
/// is used.
pub fn resolve_roots(dirs: &[PathBuf], default_root: &Path) -> Result<Vec<PathBuf>, SetupError> {
    let requested: Vec<&Path> = if dirs.is_empty() {
        vec![default_root]
    } else {
        dirs.iter().map(PathBuf::as_path).collect()
    };

    let mut roots: Vec<PathBuf> = Vec::with_capacity(requested.len());
    for dir in requested {
        let resolved = fs::canonicalize(dir).map_err(|source| SetupError::MissingRoot {
            path: dir.to_path_buf(),
            source,
        })?;
        if !resolved.is_dir() {
            return Err(SetupError::NotADirectory { path: resolved });
        }
        if !roots.contains(&resolved) {
            roots.push(resolved);
        }
    }
    Ok(roots)
}
