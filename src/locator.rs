//! Scenario locator: resolves a scenario node against a root and enumerates
//! the scenarios underneath it.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::HarnessError;
use crate::scenario::{Scenario, ScenarioDiscovery, ScenarioFilter, WalkOptions, rejected};

/// Case id of the synthetic scenario used when no node is requested.
pub const DEFAULT_CASE_ID: &str = "default_sippscen";

/// What to look for.
#[derive(Debug, Clone, Copy)]
pub struct LocateRequest<'a> {
    /// Scenario database root
    pub root: &'a Path,
    /// Requested node; `None` or empty selects the default scenario
    pub node: Option<&'a str>,
    /// Name of the declaring test, for diagnostics
    pub function: &'a str,
    /// Candidate filters, applied in order
    pub filters: &'a [Arc<dyn ScenarioFilter>],
}

/// A located scenario and its case id.
#[derive(Debug)]
pub struct Candidate {
    pub id: String,
    pub scenario: Box<dyn Scenario>,
}

/// Path to walk for `node`: the node itself when it names an existing
/// directory, otherwise `root/node`.
pub fn resolve_search_path(root: &Path, node: &str) -> PathBuf {
    let node_path = Path::new(node);
    if node_path.is_dir() {
        node_path.to_path_buf()
    } else {
        root.join(node_path)
    }
}

/// `path` relative to `search_path`, with `/` separators.
pub fn relative_id(search_path: &Path, path: &Path) -> String {
    match path.strip_prefix(search_path) {
        Ok(rel) => rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => {
            let full = path.to_string_lossy();
            let prefix_len = search_path.as_os_str().len();
            full.get(prefix_len + 1..).unwrap_or(&full).to_string()
        }
    }
}

/// Enumerate the scenarios selected by `request`.
///
/// Scenario objects are rebuilt on every call so that no two test cases ever
/// share one.
#[tracing::instrument(skip_all, fields(function = request.function, node = request.node))]
pub fn locate(discovery: &dyn ScenarioDiscovery, request: LocateRequest<'_>) -> Result<Vec<Candidate>, HarnessError> {
    let opts = WalkOptions::default();

    let Some(node) = request.node.filter(|n| !n.is_empty()) else {
        return Ok(vec![Candidate {
            id: DEFAULT_CASE_ID.to_string(),
            scenario: discovery.default_scenario(opts),
        }]);
    };

    let search_path = resolve_search_path(request.root, node);
    tracing::debug!(search_path = %search_path.display(), "walking scenario database");

    let mut candidates = Vec::new();
    for entry in discovery.walk(&search_path, request.filters, opts)? {
        let (path, scenario) = entry?;
        if rejected(request.filters, &path) {
            tracing::debug!(path = %path.display(), "scenario excluded");
            continue;
        }
        candidates.push(Candidate {
            id: relative_id(&search_path, &path),
            scenario,
        });
    }

    if candidates.is_empty() {
        return Err(HarnessError::Discovery {
            search_path,
            function: request.function.to_string(),
            node: node.to_string(),
            root: request.root.to_path_buf(),
        });
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{Options, PatternFilter, ScenarioError, Walk};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone)]
    struct Stub(PathBuf);

    impl Scenario for Stub {
        fn dirpath(&self) -> &Path {
            &self.0
        }

        fn pformat_cmds(&self) -> String {
            String::new()
        }

        fn run(&mut self, _timeout: Duration, _options: &Options) -> Result<(), ScenarioError> {
            Ok(())
        }

        fn clone_box(&self) -> Box<dyn Scenario> {
            Box::new(self.clone())
        }
    }

    struct Listing {
        paths: Vec<&'static str>,
        walks: AtomicUsize,
    }

    impl Listing {
        fn new(paths: Vec<&'static str>) -> Self {
            Self {
                paths,
                walks: AtomicUsize::new(0),
            }
        }
    }

    impl ScenarioDiscovery for Listing {
        fn default_scenario(&self, _opts: WalkOptions) -> Box<dyn Scenario> {
            Box::new(Stub(PathBuf::new()))
        }

        fn walk<'a>(
            &'a self,
            path: &Path,
            _filters: &'a [Arc<dyn ScenarioFilter>],
            _opts: WalkOptions,
        ) -> Result<Walk<'a>, HarnessError> {
            self.walks.fetch_add(1, Ordering::SeqCst);
            let prefix = path.to_path_buf();
            Ok(Box::new(
                self.paths
                    .iter()
                    .map(PathBuf::from)
                    .filter(move |p| p.starts_with(&prefix))
                    .map(|p| Ok::<_, HarnessError>((p.clone(), Box::new(Stub(p)) as Box<dyn Scenario>))),
            ))
        }
    }

    fn request<'a>(node: Option<&'a str>, filters: &'a [Arc<dyn ScenarioFilter>]) -> LocateRequest<'a> {
        LocateRequest {
            root: Path::new(""),
            node,
            function: "test_sipp",
            filters,
        }
    }

    fn ids(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_ids_relative_to_search_path() {
        let discovery = Listing::new(vec!["refer/A", "refer/B", "siprelay/C"]);
        let found = locate(&discovery, request(Some("refer"), &[])).unwrap();
        assert_eq!(ids(&found), vec!["A", "B"]);
    }

    #[test]
    fn test_nested_ids_keep_inner_separators() {
        let discovery = Listing::new(vec!["refer/attended/2call", "refer/blind"]);
        let found = locate(&discovery, request(Some("refer"), &[])).unwrap();
        assert_eq!(ids(&found), vec!["attended/2call", "blind"]);
    }

    #[test]
    fn test_no_node_skips_walk() {
        let discovery = Listing::new(vec!["refer/A"]);
        for node in [None, Some("")] {
            let found = locate(&discovery, request(node, &[])).unwrap();
            assert_eq!(ids(&found), vec![DEFAULT_CASE_ID]);
        }
        assert_eq!(discovery.walks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_exclusion_drops_matching_candidates() {
        let discovery = Listing::new(vec!["refer/A", "refer/B", "refer/AB"]);
        let filters: Vec<Arc<dyn ScenarioFilter>> = vec![Arc::new(PatternFilter::new("refer/A").unwrap())];
        let found = locate(&discovery, request(Some("refer"), &filters)).unwrap();
        assert_eq!(ids(&found), vec!["B"]);
    }

    #[test]
    fn test_empty_walk_is_discovery_error() {
        let discovery = Listing::new(vec![]);
        let err = locate(&discovery, request(Some("refer"), &[])).unwrap_err();
        match err {
            HarnessError::Discovery {
                search_path,
                function,
                node,
                root,
            } => {
                assert_eq!(search_path, PathBuf::from("refer"));
                assert_eq!(function, "test_sipp");
                assert_eq!(node, "refer");
                assert_eq!(root, PathBuf::new());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_existing_directory_used_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let node = dir.path().to_string_lossy().into_owned();
        assert_eq!(resolve_search_path(Path::new("/elsewhere"), &node), dir.path());
        assert_eq!(
            resolve_search_path(Path::new("/scripts"), "refer"),
            PathBuf::from("/scripts/refer")
        );
    }

    #[test]
    fn test_relative_id_fallback_slices_prefix() {
        assert_eq!(relative_id(Path::new("ref"), Path::new("refer/A")), "r/A");
    }
}
