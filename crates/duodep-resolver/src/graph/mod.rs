//! Include graph built with petgraph
//!
//! Documents reference other documents through `local_dependencies` (and
//! path-like entries in selected optional groups). The walker resolves those
//! references through a [`DocumentSource`], deduplicates documents by their
//! normalized path, rejects cycles and flattens everything into one ordered
//! entry list for the merge engine.

use std::collections::{BTreeSet, HashMap, VecDeque};

use camino::{Utf8Path, Utf8PathBuf};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, warn};

use duodep_core::types::{
    looks_like_path, DocumentSource, LocalPackage, LocatedReference,
};
use duodep_core::utils::{normalize_path, split_path_and_extras};
use duodep_core::{Document, DuoError, EntryName, PlatformSet, RawEntry};

use crate::ResolverResult;

/// Optional group name selecting every group
pub const ALL_EXTRAS: &str = "*";

/// A document the merge starts from, with the optional groups to include
#[derive(Debug, Clone)]
pub struct RootRequest {
    pub document: Document,
    pub extras: Vec<String>,
}

impl RootRequest {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            extras: Vec::new(),
        }
    }

    pub fn with_extras(mut self, extras: impl IntoIterator<Item = String>) -> Self {
        self.extras.extend(extras);
        self
    }
}

/// One document in the include graph
#[derive(Debug, Clone)]
pub struct DocumentNode {
    pub document: Document,
    /// Active optional dependency groups
    pub extras: BTreeSet<String>,
    /// Included documents, in reference order
    pub children: Vec<NodeIndex>,
    /// Local packages referenced by this document
    pub local_packages: Vec<LocalPackage>,
    expanded: BTreeSet<String>,
}

impl DocumentNode {
    fn new(document: Document) -> Self {
        Self {
            document,
            extras: BTreeSet::new(),
            children: Vec::new(),
            local_packages: Vec::new(),
            expanded: BTreeSet::new(),
        }
    }

    /// Activate optional groups; returns true when anything new was enabled
    fn activate(&mut self, extras: &[String]) -> bool {
        let mut changed = false;
        for extra in extras {
            if extra != ALL_EXTRAS && !self.document.optional_dependencies.contains_key(extra) {
                warn!(
                    "{} has no optional dependency group `{}`",
                    self.document.id, extra
                );
                continue;
            }
            changed |= self.extras.insert(extra.clone());
        }
        changed
    }

    /// Optional groups currently included, in document order
    pub fn active_groups(&self) -> impl Iterator<Item = (&String, &Vec<RawEntry>)> {
        let all = self.extras.contains(ALL_EXTRAS);
        self.document
            .optional_dependencies
            .iter()
            .filter(move |(group, _)| all || self.extras.contains(*group))
    }

    /// Every reference this node currently includes
    fn references(&self) -> Vec<String> {
        let mut references = self.document.local_dependencies.clone();
        for (_, entries) in self.active_groups() {
            references.extend(entries.iter().filter_map(path_reference));
        }
        references
    }

    fn base_dir(&self) -> Utf8PathBuf {
        self.document
            .path
            .as_deref()
            .and_then(Utf8Path::parent)
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| Utf8PathBuf::from("."))
    }
}

/// Path-like entry text inside an optional group, if any
fn path_reference(entry: &RawEntry) -> Option<String> {
    match &entry.name {
        EntryName::Bare(text) => {
            let text = text.trim();
            let (path, _) = split_path_and_extras(text);
            looks_like_path(path).then(|| text.to_string())
        },
        EntryName::ManagerQualified { .. } => None,
    }
}

/// Include relationship between two documents
#[derive(Debug, Clone)]
pub struct IncludeEdge {
    /// Reference text as written, including any `[extras]`
    pub reference: String,
}

/// Directed graph of documents and their includes
#[derive(Debug, Default)]
pub struct IncludeGraph {
    graph: DiGraph<DocumentNode, IncludeEdge>,
    /// Map from document key to NodeIndex for fast lookups
    node_map: HashMap<String, NodeIndex>,
    roots: Vec<NodeIndex>,
}

fn document_key(document: &Document) -> String {
    match &document.path {
        Some(path) => path.to_string(),
        None => document.id.clone(),
    }
}

impl IncludeGraph {
    /// Resolve every reference reachable from `roots`
    pub fn build(roots: Vec<RootRequest>, source: &dyn DocumentSource) -> ResolverResult<Self> {
        let mut graph = IncludeGraph::default();
        let mut queue = VecDeque::new();

        for root in roots {
            let (index, changed) = graph.add_document(root.document, &root.extras);
            if !graph.roots.contains(&index) {
                graph.roots.push(index);
            }
            if changed || graph.graph[index].expanded.is_empty() {
                queue.push_back(index);
            }
        }

        while let Some(index) = queue.pop_front() {
            let node = &graph.graph[index];
            let base_dir = node.base_dir();
            let pending: Vec<String> = node
                .references()
                .into_iter()
                .filter(|reference| !node.expanded.contains(reference))
                .collect();

            for reference in pending {
                graph.graph[index].expanded.insert(reference.clone());
                let (path, extras) = split_path_and_extras(&reference);
                match source.locate(&base_dir, path)? {
                    LocatedReference::Document(document) => {
                        debug!("{} includes {}", graph.graph[index].document.id, document.id);
                        let known = graph.node_map.contains_key(&document_key(&document));
                        let (child, changed) = graph.add_document(document, &extras);
                        if !known || changed {
                            queue.push_back(child);
                        }
                        if graph.graph.find_edge(index, child).is_none() {
                            graph.graph.add_edge(index, child, IncludeEdge { reference });
                            graph.graph[index].children.push(child);
                        }
                    },
                    LocatedReference::LocalPackage(package) => {
                        debug!(
                            "{} is a local package; its dependencies are not merged",
                            package.path
                        );
                        let node = &mut graph.graph[index];
                        if !node.local_packages.contains(&package) {
                            node.local_packages.push(package);
                        }
                    },
                }
            }
        }

        Ok(graph)
    }

    /// Add a document or activate extras on an existing one
    fn add_document(&mut self, document: Document, extras: &[String]) -> (NodeIndex, bool) {
        let key = document_key(&document);
        if let Some(&existing) = self.node_map.get(&key) {
            let changed = self.graph[existing].activate(extras);
            return (existing, changed);
        }

        let mut node = DocumentNode::new(document);
        node.activate(extras);
        let index = self.graph.add_node(node);
        self.node_map.insert(key, index);
        (index, true)
    }

    pub fn node(&self, index: NodeIndex) -> &DocumentNode {
        &self.graph[index]
    }

    /// Look up a document by its normalized path or id
    pub fn find(&self, key: &str) -> Option<&DocumentNode> {
        self.node_map.get(key).map(|&index| &self.graph[index])
    }

    pub fn document_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn include_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Detect include cycles
    pub fn detect_cycles(&self) -> Result<(), Vec<NodeIndex>> {
        use petgraph::algo::toposort;

        match toposort(&self.graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(self.extract_cycle_path(cycle.node_id())),
        }
    }

    /// Shortest include path from `start` back to itself
    fn extract_cycle_path(&self, start: NodeIndex) -> Vec<NodeIndex> {
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            for &child in &self.graph[current].children {
                if child == start {
                    let mut path = vec![start, current];
                    let mut cursor = current;
                    while let Some(&previous) = parent.get(&cursor) {
                        path.push(previous);
                        cursor = previous;
                    }
                    path.reverse();
                    return rotate_to_earliest(path);
                }
                if !parent.contains_key(&child) {
                    parent.insert(child, current);
                    queue.push_back(child);
                }
            }
        }

        vec![start]
    }

    /// Format a cycle as "a -> b -> a"
    pub fn format_cycle(&self, cycle: &[NodeIndex]) -> String {
        cycle
            .iter()
            .map(|&index| self.graph[index].document.id.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Fail with [`DuoError::CyclicInclude`] if any document includes itself
    pub fn validate_no_cycles(&self) -> ResolverResult<()> {
        self.detect_cycles().map_err(|cycle| DuoError::CyclicInclude {
            cycle: self.format_cycle(&cycle),
        })
    }

    /// Depth-first preorder from the roots; each document appears once
    fn preorder(&self) -> Vec<NodeIndex> {
        let mut visited = BTreeSet::new();
        let mut order = Vec::new();
        for &root in &self.roots {
            let mut stack = vec![root];
            while let Some(index) = stack.pop() {
                if !visited.insert(index) {
                    continue;
                }
                order.push(index);
                stack.extend(self.graph[index].children.iter().rev());
            }
        }
        order
    }

    /// Flatten into the merge engine's input
    pub fn flatten(&self) -> Flattened {
        let mut flat = Flattened::default();

        for index in self.preorder() {
            let node = &self.graph[index];
            let document = &node.document;

            let optional = node
                .active_groups()
                .flat_map(|(_, entries)| entries.iter())
                .filter(|entry| path_reference(entry).is_none());
            for entry in document.dependencies.iter().chain(optional) {
                let mut entry = entry.clone();
                entry.origin.sequence = flat.entries.len();
                flat.entries.push(entry);
            }

            for channel in &document.channels {
                if !flat.channels.contains(channel) {
                    flat.channels.push(channel.clone());
                }
            }
            for index_url in &document.pip_indices {
                if !flat.pip_indices.contains(index_url) {
                    flat.pip_indices.push(index_url.clone());
                }
            }
            if let Some(ref platforms) = document.platforms {
                let declared: PlatformSet = platforms.iter().copied().collect();
                flat.platforms = Some(flat.platforms.unwrap_or_default().union(&declared));
            }
            if let Some(ref name) = document.name {
                flat.names.push(name.clone());
            }
            for package in &node.local_packages {
                if !flat.local_packages.contains(package) {
                    flat.local_packages.push(package.clone());
                }
            }
        }

        flat
    }
}

/// Start a closed cycle at its earliest-added document
fn rotate_to_earliest(closed: Vec<NodeIndex>) -> Vec<NodeIndex> {
    let body = &closed[..closed.len().saturating_sub(1)];
    let Some(start) = body.iter().enumerate().min_by_key(|(_, index)| **index).map(|(i, _)| i)
    else {
        return closed;
    };
    let mut rotated: Vec<NodeIndex> = body[start..].iter().chain(&body[..start]).copied().collect();
    rotated.push(body[start]);
    rotated
}

/// Every document's contribution, in traversal order
#[derive(Debug, Clone, Default)]
pub struct Flattened {
    /// Entries with a global `origin.sequence`
    pub entries: Vec<RawEntry>,
    pub channels: Vec<String>,
    /// Union of declared platforms; `None` when no document declares any
    pub platforms: Option<PlatformSet>,
    pub local_packages: Vec<LocalPackage>,
    pub pip_indices: Vec<String>,
    /// Document names, root first
    pub names: Vec<String>,
}

/// Build the include graph, reject cycles and flatten
pub fn flatten(roots: Vec<RootRequest>, source: &dyn DocumentSource) -> ResolverResult<Flattened> {
    let graph = IncludeGraph::build(roots, source)?;
    graph.validate_no_cycles()?;
    debug!(
        "Flattened {} documents with {} includes",
        graph.document_count(),
        graph.include_count()
    );
    Ok(graph.flatten())
}

/// A [`DocumentSource`] over documents held in memory, keyed by path
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    documents: HashMap<Utf8PathBuf, Document>,
    packages: HashMap<Utf8PathBuf, LocalPackage>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document; it must carry a path
    pub fn insert(&mut self, document: Document) -> &mut Self {
        if let Some(path) = document.path.clone() {
            self.documents.insert(normalize_path(&path), document);
        }
        self
    }

    pub fn insert_package(&mut self, package: LocalPackage) -> &mut Self {
        self.packages.insert(normalize_path(&package.path), package);
        self
    }
}

impl DocumentSource for MemorySource {
    fn locate(
        &self,
        base_dir: &Utf8Path,
        reference: &str,
    ) -> duodep_core::DuoResult<LocatedReference> {
        let path = normalize_path(&base_dir.join(reference));
        let as_file = path.join("requirements.yaml");
        if let Some(document) = self.documents.get(&path).or_else(|| self.documents.get(&as_file)) {
            return Ok(LocatedReference::Document(document.clone()));
        }
        if let Some(package) = self.packages.get(&path) {
            return Ok(LocatedReference::LocalPackage(package.clone()));
        }
        Err(DuoError::DocumentNotFound {
            path: path.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duodep_core::types::LocalPackageKind;
    use duodep_core::Platform;

    fn doc(path: &str) -> Document {
        Document::new(path).with_path(path)
    }

    fn names(flat: &Flattened) -> Vec<String> {
        flat.entries.iter().map(RawEntry::display_text).collect()
    }

    #[test]
    fn test_single_document() {
        let source = MemorySource::new();
        let root = doc("/p/requirements.yaml")
            .with_dependency("numpy")
            .with_channel("conda-forge");
        let flat = flatten(vec![RootRequest::new(root)], &source).unwrap();
        assert_eq!(names(&flat), vec!["numpy"]);
        assert_eq!(flat.channels, vec!["conda-forge"]);
        assert_eq!(flat.platforms, None);
    }

    #[test]
    fn test_include_order_and_sequence() {
        let mut source = MemorySource::new();
        source.insert(doc("/p/lib/requirements.yaml").with_dependency("scipy"));
        let root = doc("/p/app/requirements.yaml")
            .with_dependency("numpy")
            .with_local_dependency("../lib");

        let flat = flatten(vec![RootRequest::new(root)], &source).unwrap();
        assert_eq!(names(&flat), vec!["numpy", "scipy"]);
        let sequences: Vec<_> = flat.entries.iter().map(|e| e.origin.sequence).collect();
        assert_eq!(sequences, vec![0, 1]);
        assert_eq!(flat.entries[1].origin.document, "/p/lib/requirements.yaml");
    }

    #[test]
    fn test_diamond_is_deduplicated() {
        let mut source = MemorySource::new();
        source.insert(
            doc("/p/a/requirements.yaml")
                .with_dependency("a")
                .with_local_dependency("../common"),
        );
        source.insert(
            doc("/p/b/requirements.yaml")
                .with_dependency("b")
                .with_local_dependency("../common/requirements.yaml"),
        );
        source.insert(doc("/p/common/requirements.yaml").with_dependency("common"));
        let root = doc("/p/requirements.yaml")
            .with_local_dependency("a")
            .with_local_dependency("./b");

        let graph = IncludeGraph::build(vec![RootRequest::new(root)], &source).unwrap();
        assert_eq!(graph.document_count(), 4);
        assert_eq!(graph.include_count(), 4);
        assert_eq!(names(&graph.flatten()), vec!["a", "common", "b"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut source = MemorySource::new();
        source.insert(doc("/p/a/requirements.yaml").with_local_dependency("../b"));
        source.insert(doc("/p/b/requirements.yaml").with_local_dependency("../a"));

        let root = doc("/p/a/requirements.yaml").with_local_dependency("../b");
        let err = flatten(vec![RootRequest::new(root)], &source).unwrap_err();
        match err {
            DuoError::CyclicInclude { cycle } => {
                assert_eq!(
                    cycle,
                    "/p/a/requirements.yaml -> /p/b/requirements.yaml -> /p/a/requirements.yaml"
                );
            },
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_include_is_a_cycle() {
        let mut source = MemorySource::new();
        let root = doc("/p/requirements.yaml").with_local_dependency(".");
        source.insert(root.clone());
        let err = flatten(vec![RootRequest::new(root)], &source).unwrap_err();
        assert!(matches!(err, DuoError::CyclicInclude { ref cycle } if cycle.contains(" -> ")));
    }

    #[test]
    fn test_local_package_contributes_no_entries() {
        let mut source = MemorySource::new();
        source.insert_package(LocalPackage {
            path: Utf8PathBuf::from("/p/vendor/tool"),
            kind: LocalPackageKind::Project {
                pip_installable: true,
            },
        });
        source.insert_package(LocalPackage {
            path: Utf8PathBuf::from("/p/dist/pkg.whl"),
            kind: LocalPackageKind::Archive,
        });
        let root = doc("/p/requirements.yaml")
            .with_dependency("numpy")
            .with_local_dependency("vendor/tool")
            .with_local_dependency("dist/pkg.whl")
            .with_local_dependency("vendor/tool");

        let flat = flatten(vec![RootRequest::new(root)], &source).unwrap();
        assert_eq!(names(&flat), vec!["numpy"]);
        let paths: Vec<_> = flat.local_packages.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["/p/vendor/tool", "/p/dist/pkg.whl"]);
    }

    #[test]
    fn test_missing_reference() {
        let source = MemorySource::new();
        let root = doc("/p/requirements.yaml").with_local_dependency("../nowhere");
        let err = flatten(vec![RootRequest::new(root)], &source).unwrap_err();
        assert!(matches!(err, DuoError::DocumentNotFound { ref path } if path == "/nowhere"));
    }

    #[test]
    fn test_extras_on_root_and_include() {
        let mut source = MemorySource::new();
        source.insert(
            doc("/p/lib/requirements.yaml")
                .with_dependency("scipy")
                .with_optional("test", "pytest")
                .with_optional("docs", "sphinx"),
        );
        let root = doc("/p/requirements.yaml")
            .with_dependency("numpy")
            .with_optional("dev", "../p/lib[test]")
            .with_optional("dev", "ipython")
            .with_optional("gpu", "cupy");

        let flat = flatten(
            vec![RootRequest::new(root).with_extras(["dev".to_string()])],
            &source,
        )
        .unwrap();
        assert_eq!(names(&flat), vec!["numpy", "ipython", "scipy", "pytest"]);
    }

    #[test]
    fn test_extras_activated_on_revisit() {
        let mut source = MemorySource::new();
        source.insert(
            doc("/p/common/requirements.yaml")
                .with_dependency("common")
                .with_optional("test", "pytest"),
        );
        source.insert(doc("/p/a/requirements.yaml").with_local_dependency("../common"));
        let root = doc("/p/requirements.yaml")
            .with_local_dependency("a")
            .with_local_dependency("common[*]");

        let flat = flatten(vec![RootRequest::new(root)], &source).unwrap();
        assert_eq!(names(&flat), vec!["common", "pytest"]);
    }

    #[test]
    fn test_platforms_union() {
        let mut source = MemorySource::new();
        source.insert(doc("/p/lib/requirements.yaml").with_platforms(&[Platform::Osx64]));
        let root = doc("/p/requirements.yaml")
            .with_platforms(&[Platform::Linux64])
            .with_local_dependency("lib");
        let flat = flatten(vec![RootRequest::new(root)], &source).unwrap();
        let expected: PlatformSet = [Platform::Linux64, Platform::Osx64].into_iter().collect();
        assert_eq!(flat.platforms, Some(expected));
    }

    #[test]
    fn test_multiple_roots_share_documents() {
        let mut source = MemorySource::new();
        source.insert(doc("/p/common/requirements.yaml").with_dependency("common"));
        let a = doc("/p/a/requirements.yaml")
            .with_dependency("a")
            .with_local_dependency("../common");
        let b = doc("/p/b/requirements.yaml")
            .with_dependency("b")
            .with_local_dependency("../common");
        let flat = flatten(vec![RootRequest::new(a), RootRequest::new(b)], &source).unwrap();
        assert_eq!(names(&flat), vec!["a", "common", "b"]);
    }
}
