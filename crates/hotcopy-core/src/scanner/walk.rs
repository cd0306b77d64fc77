use super::classify::classify;
use crate::config;
use crate::error::Error;
use crate::model::{DiscoveredItem, StoreKind};
use glob::Pattern;
use rayon::prelude::*;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, trace, warn};
use walkdir::WalkDir;

/// Include/exclude globs applied to discovered files. Exclude wins; an empty
/// include list admits everything. Directories are never filtered.
#[derive(Debug, Clone, Default)]
pub struct GlobFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl GlobFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        Self {
            include: compile_patterns(include),
            exclude: compile_patterns(exclude),
        }
    }

    /// Patterns are tested against the bare file name and the root-relative path.
    pub fn allows(&self, file_name: &OsStr, relative: &Path) -> bool {
        let name = file_name.to_string_lossy();
        let matches = |p: &Pattern| p.matches(&name) || p.matches_path(relative);

        if self.exclude.iter().any(matches) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(matches)
    }
}

fn compile_patterns(globs: &[String]) -> Vec<Pattern> {
    globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect()
}

/// Hands out collision-free display names within one discovery run.
#[derive(Debug, Default)]
pub struct NameRegistry {
    taken: HashSet<String>,
}

impl NameRegistry {
    pub fn claim(&mut self, base: &str) -> String {
        let base = if base.is_empty() { "item" } else { base };
        if self.taken.insert(base.to_string()) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{}-{}", base, n))
            .find(|candidate| self.taken.insert(candidate.clone()))
            .unwrap_or_default()
    }
}

/// Join the normal components of a relative path into one level.
pub fn flatten_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// Result of discovering several roots; failed roots do not stop the others.
#[derive(Debug, Default)]
pub struct Discovery {
    pub items: Vec<DiscoveredItem>,
    pub errors: Vec<Error>,
}

impl Discovery {
    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(|i| i.size_bytes).sum()
    }
}

/// Discover the stores under a single root.
pub fn discover(root: &Path, filter: &GlobFilter) -> Result<Vec<DiscoveredItem>, Error> {
    let mut registry = NameRegistry::default();
    let mut items = discover_raw(root, filter)?;
    assign_names(&mut items, &mut registry);
    Ok(items)
}

/// Discover every root in parallel. Nested roots are collapsed into their
/// parent first; names are made unique across roots in root order.
pub fn discover_all(roots: &[PathBuf], filter: &GlobFilter) -> Discovery {
    let roots = config::non_overlapping_directories(roots.to_vec());
    debug!("Discovering roots: {:?}", roots);

    let per_root: Vec<Result<Vec<DiscoveredItem>, Error>> = roots
        .par_iter()
        .map(|root| discover_raw(root, filter))
        .collect();

    let mut registry = NameRegistry::default();
    let mut discovery = Discovery::default();
    for result in per_root {
        match result {
            Ok(mut items) => {
                assign_names(&mut items, &mut registry);
                discovery.items.extend(items);
            }
            Err(e) => {
                error!("{}", e);
                discovery.errors.push(e);
            }
        }
    }
    discovery
}

fn assign_names(items: &mut [DiscoveredItem], registry: &mut NameRegistry) {
    for item in items.iter_mut() {
        item.display_name = registry.claim(&item.display_name);
    }
}

/// Items carry their flattened base name; uniqueness comes from `assign_names`.
fn discover_raw(root: &Path, filter: &GlobFilter) -> Result<Vec<DiscoveredItem>, Error> {
    let metadata = fs::metadata(root).map_err(|e| Error::Discovery {
        path: root.to_path_buf(),
        reason: e.to_string(),
    })?;

    let root_kind = classify(root);
    if root_kind != StoreKind::Unknown {
        let base = root
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let size = if metadata.is_dir() {
            dir_size(root)
        } else {
            metadata.len()
        };
        return Ok(vec![DiscoveredItem {
            path: root.to_path_buf(),
            kind: root_kind,
            display_name: base,
            source_root: root.to_path_buf(),
            size_bytes: size,
        }]);
    }

    if !metadata.is_dir() {
        debug!("{} is not a recognized store", root.display());
        return Ok(Vec::new());
    }

    fs::read_dir(root).map_err(|e| Error::Discovery {
        path: root.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut items = Vec::new();
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            continue;
        }

        let path = entry.path();
        let kind = classify(path);
        if kind == StoreKind::Unknown {
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        let size = if file_type.is_dir() {
            walker.skip_current_dir();
            dir_size(path)
        } else {
            if !filter.allows(entry.file_name(), relative) {
                trace!("Filtered out {}", path.display());
                continue;
            }
            match entry.metadata() {
                Ok(m) => m.len(),
                Err(e) => {
                    warn!("Cannot stat {}: {}", path.display(), e);
                    continue;
                }
            }
        };

        debug!("Discovered {} ({}, {} bytes)", path.display(), kind, size);
        items.push(DiscoveredItem {
            path: path.to_path_buf(),
            kind,
            display_name: flatten_name(relative),
            source_root: root.to_path_buf(),
            size_bytes: size,
        });
    }

    Ok(items)
}

/// Recursive byte sum of the regular files under `path`.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
