//! Route tree merging and path matching.
//!
//! Modules contribute route subtrees at start-up. `merge_routes` folds a
//! subtree into the application's tree; the compiled [`Router`] must then be
//! rebuilt from the result, which [`RouteTable::add_routes`] does in one step.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::ExtensionError;
use crate::state::ComponentRef;

/// A node in the route tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteNode {
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
    pub component: ComponentRef,
    #[serde(default)]
    pub children: Vec<RouteNode>,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub redirect: Option<String>,
}

impl RouteNode {
    pub fn new(path: impl Into<String>, component: impl Into<ComponentRef>) -> Self {
        Self {
            path: path.into(),
            name: None,
            component: component.into(),
            children: Vec::new(),
            meta: serde_json::Map::new(),
            redirect: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_children(mut self, children: Vec<RouteNode>) -> Self {
        self.children = children;
        self
    }
}

/// Custom merge strategy a module may pass to `add_routes`.
pub type MergeFn = dyn Fn(&mut Vec<RouteNode>, Vec<RouteNode>) + Send + Sync;

/// Total number of nodes in a forest.
pub fn count_nodes(nodes: &[RouteNode]) -> usize {
    nodes.iter().map(|n| 1 + count_nodes(&n.children)).sum()
}

fn find_named_mut<'a>(nodes: &'a mut [RouteNode], name: &str) -> Option<&'a mut RouteNode> {
    for node in nodes.iter_mut() {
        if node.name.as_deref() == Some(name) {
            return Some(node);
        }
        if let Some(found) = find_named_mut(&mut node.children, name) {
            return Some(found);
        }
    }
    None
}

/// Merge `incoming` into `existing`.
///
/// A named incoming node whose name already exists somewhere in `existing`
/// is not added again: its children are merged into the existing node,
/// whose own fields are kept. Every other node is appended.
pub fn merge_routes(existing: &mut Vec<RouteNode>, incoming: Vec<RouteNode>) {
    for node in incoming {
        let target = match node.name.as_deref() {
            Some(name) => find_named_mut(existing, name),
            None => None,
        };
        match target {
            Some(target) => merge_routes(&mut target.children, node.children),
            None => existing.push(node),
        }
    }
}

// ─── Router ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
    Wildcard,
}

impl Segment {
    fn rank(&self) -> u8 {
        match self {
            Segment::Static(_) => 3,
            Segment::Param(_) => 2,
            Segment::Wildcard => 1,
        }
    }
}

/// Exact (wildcard-free) first, then per-segment rank, then depth.
type RouteScore = (bool, Vec<u8>, usize);

#[derive(Debug, Clone)]
struct RouteRecord {
    full_path: String,
    name: Option<String>,
    segments: Vec<Segment>,
    /// Components from the outermost ancestor down to this node.
    components: Vec<ComponentRef>,
    meta: serde_json::Map<String, serde_json::Value>,
    redirect: Option<String>,
}

impl RouteRecord {
    fn matches(&self, parts: &[&str]) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard => {
                    params.insert("pathMatch".to_string(), parts[i.min(parts.len())..].join("/"));
                    return Some(params);
                }
                Segment::Static(s) => {
                    if parts.get(i) != Some(&s.as_str()) {
                        return None;
                    }
                }
                Segment::Param(p) => {
                    let value = parts.get(i)?;
                    params.insert(p.clone(), (*value).to_string());
                }
            }
        }
        (parts.len() == self.segments.len()).then_some(params)
    }

    fn score(&self) -> RouteScore {
        (
            !self.segments.contains(&Segment::Wildcard),
            self.segments.iter().map(Segment::rank).collect(),
            self.components.len(),
        )
    }
}

/// The result of resolving a path.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    pub path: String,
    pub full_path: String,
    pub name: Option<String>,
    pub params: HashMap<String, String>,
    pub components: Vec<ComponentRef>,
    pub meta: serde_json::Map<String, serde_json::Value>,
    pub redirect: Option<String>,
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn join_paths(parent: &str, child: &str) -> String {
    if child.starts_with('/') {
        return child.to_string();
    }
    let parent = parent.trim_end_matches('/');
    if child.is_empty() {
        if parent.is_empty() {
            "/".to_string()
        } else {
            parent.to_string()
        }
    } else {
        format!("{parent}/{child}")
    }
}

fn parse_segments(full_path: &str) -> Result<Vec<Segment>, ExtensionError> {
    let parts = split_path(full_path);
    let mut segments = Vec::with_capacity(parts.len());
    for (i, part) in parts.iter().enumerate() {
        let segment = if *part == "*" || *part == "**" {
            if i + 1 != parts.len() {
                return Err(ExtensionError::Route(format!(
                    "wildcard must be the last segment in '{full_path}'"
                )));
            }
            Segment::Wildcard
        } else if let Some(param) = part.strip_prefix(':') {
            if param.is_empty() {
                return Err(ExtensionError::Route(format!(
                    "empty parameter name in '{full_path}'"
                )));
            }
            Segment::Param(param.to_string())
        } else {
            Segment::Static((*part).to_string())
        };
        segments.push(segment);
    }
    Ok(segments)
}

/// Compiled path matcher built from a route tree.
#[derive(Debug, Clone, Default)]
pub struct Router {
    records: Vec<RouteRecord>,
}

impl Router {
    /// Compile a route tree. Fails on duplicate names or malformed paths.
    pub fn build(routes: &[RouteNode]) -> Result<Self, ExtensionError> {
        let mut records = Vec::new();
        let mut names = HashSet::new();
        Self::collect(routes, "", &[], &mut records, &mut names)?;
        Ok(Self { records })
    }

    fn collect(
        nodes: &[RouteNode],
        parent_path: &str,
        parent_components: &[ComponentRef],
        records: &mut Vec<RouteRecord>,
        names: &mut HashSet<String>,
    ) -> Result<(), ExtensionError> {
        for node in nodes {
            if let Some(ref name) = node.name {
                if !names.insert(name.clone()) {
                    return Err(ExtensionError::Route(format!(
                        "duplicate route name '{name}'"
                    )));
                }
            }

            let full_path = join_paths(parent_path, &node.path);
            let mut components = parent_components.to_vec();
            components.push(node.component.clone());

            records.push(RouteRecord {
                segments: parse_segments(&full_path)?,
                full_path: full_path.clone(),
                name: node.name.clone(),
                components: components.clone(),
                meta: node.meta.clone(),
                redirect: node.redirect.clone(),
            });

            Self::collect(&node.children, &full_path, &components, records, names)?;
        }
        Ok(())
    }

    /// Resolve `path` to the most specific matching route.
    ///
    /// Static segments beat parameters, parameters beat wildcards; on a tie
    /// the deeper route wins, then the one declared first.
    pub fn resolve(&self, path: &str) -> Option<RouteMatch> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let parts = split_path(path);

        let mut best: Option<(&RouteRecord, HashMap<String, String>, RouteScore)> = None;
        for record in &self.records {
            let Some(params) = record.matches(&parts) else {
                continue;
            };
            let score = record.score();
            if best.as_ref().map_or(true, |(_, _, s)| score > *s) {
                best = Some((record, params, score));
            }
        }

        best.map(|(record, params, _)| RouteMatch {
            path: path.to_string(),
            full_path: record.full_path.clone(),
            name: record.name.clone(),
            params,
            components: record.components.clone(),
            meta: record.meta.clone(),
            redirect: record.redirect.clone(),
        })
    }

    /// Whether a route with this name exists.
    pub fn has_named(&self, name: &str) -> bool {
        self.records
            .iter()
            .any(|r| r.name.as_deref() == Some(name))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ─── Route table ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct TableInner {
    tree: Vec<RouteNode>,
    router: Router,
}

/// The application's route tree together with its compiled router.
///
/// `resolve` hands out an owned [`RouteMatch`], so a navigation resolved
/// before a merge keeps its result; merged routes apply from the next
/// `resolve` on.
#[derive(Debug, Default)]
pub struct RouteTable {
    inner: RwLock<TableInner>,
}

impl RouteTable {
    pub fn new(routes: Vec<RouteNode>) -> Result<Self, ExtensionError> {
        let router = Router::build(&routes)?;
        Ok(Self {
            inner: RwLock::new(TableInner {
                tree: routes,
                router,
            }),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, TableInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TableInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Merge `routes` (with `merge` or [`merge_routes`]) and rebuild the router.
    ///
    /// The table is left untouched when the merged tree does not compile.
    pub fn add_routes(
        &self,
        routes: Vec<RouteNode>,
        merge: Option<&MergeFn>,
    ) -> Result<(), ExtensionError> {
        let mut inner = self.write();
        let mut tree = inner.tree.clone();
        match merge {
            Some(merge) => merge(&mut tree, routes),
            None => merge_routes(&mut tree, routes),
        }
        let router = Router::build(&tree)?;
        tracing::debug!(records = router.len(), "router rebuilt");
        inner.tree = tree;
        inner.router = router;
        Ok(())
    }

    pub fn resolve(&self, path: &str) -> Option<RouteMatch> {
        self.read().router.resolve(path)
    }

    pub fn routes(&self) -> Vec<RouteNode> {
        self.read().tree.clone()
    }

    pub fn has_named(&self, name: &str) -> bool {
        self.read().router.has_named(name)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn admin_tree() -> Vec<RouteNode> {
        vec![
            RouteNode::new("/", "Layout").named("root").with_children(vec![
                RouteNode::new("", "Home").named("home"),
                RouteNode::new("posts/:id", "Post").named("post"),
            ]),
            RouteNode::new("/error", "ErrorView").named("error"),
        ]
    }

    fn plugin_subtree() -> Vec<RouteNode> {
        vec![RouteNode::new("/", "PluginLayout")
            .named("root")
            .with_children(vec![
                RouteNode::new("gallery", "gallery::Index").named("gallery"),
                RouteNode::new("gallery/:album", "gallery::Album").named("gallery-album"),
            ])]
    }

    #[test]
    fn test_merge_disjoint_names_sums_node_count() {
        let mut tree = admin_tree();
        let extra = vec![
            RouteNode::new("/links", "links::Index")
                .named("links")
                .with_children(vec![RouteNode::new(":id", "links::Detail").named("link")]),
            RouteNode::new("/about", "about::Page").named("about"),
        ];
        let expected = count_nodes(&tree) + count_nodes(&extra);

        merge_routes(&mut tree, extra);
        assert_eq!(count_nodes(&tree), expected);
    }

    #[test]
    fn test_merge_collision_merges_children_and_keeps_fields() {
        let mut tree = admin_tree();
        merge_routes(&mut tree, plugin_subtree());

        assert_eq!(tree.len(), 2);
        let root = &tree[0];
        assert_eq!(root.component, ComponentRef::new("Layout"));
        let names: Vec<_> = root.children.iter().filter_map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["home", "post", "gallery", "gallery-album"]);
    }

    #[test]
    fn test_merge_same_subtree_twice_has_no_duplicate_names() {
        let mut tree = admin_tree();
        merge_routes(&mut tree, plugin_subtree());
        let once = count_nodes(&tree);
        merge_routes(&mut tree, plugin_subtree());
        assert_eq!(count_nodes(&tree), once);
        assert!(Router::build(&tree).is_ok());
    }

    #[test]
    fn test_merge_finds_nested_name() {
        let mut tree = admin_tree();
        merge_routes(
            &mut tree,
            vec![RouteNode::new("/ignored", "Ignored")
                .named("post")
                .with_children(vec![RouteNode::new("comments", "Comments").named("comments")])],
        );
        let post = &tree[0].children[1];
        assert_eq!(post.path, "posts/:id");
        assert_eq!(post.children[0].name.as_deref(), Some("comments"));
    }

    #[test]
    fn test_unnamed_nodes_are_appended() {
        let mut tree = vec![RouteNode::new("/a", "A")];
        merge_routes(&mut tree, vec![RouteNode::new("/a", "A")]);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_router_resolves_nested_and_params() {
        let router = Router::build(&admin_tree()).unwrap();

        let home = router.resolve("/").unwrap();
        assert_eq!(home.name.as_deref(), Some("home"));
        assert_eq!(
            home.components,
            vec![ComponentRef::new("Layout"), ComponentRef::new("Home")]
        );

        let post = router.resolve("/posts/42?preview=1").unwrap();
        assert_eq!(post.name.as_deref(), Some("post"));
        assert_eq!(post.params["id"], "42");
        assert_eq!(post.full_path, "/posts/:id");

        assert!(router.resolve("/posts").is_none());
        assert!(router.resolve("/nowhere").is_none());
    }

    #[test]
    fn test_router_prefers_static_over_param_over_wildcard() {
        let routes = vec![
            RouteNode::new("/*", "NotFound").named("not-found"),
            RouteNode::new("/posts/:slug", "Post").named("post"),
            RouteNode::new("/posts/new", "NewPost").named("new-post"),
        ];
        let router = Router::build(&routes).unwrap();

        assert_eq!(
            router.resolve("/posts/new").unwrap().name.as_deref(),
            Some("new-post")
        );
        assert_eq!(
            router.resolve("/posts/hello").unwrap().name.as_deref(),
            Some("post")
        );
        let missing = router.resolve("/a/b/c").unwrap();
        assert_eq!(missing.name.as_deref(), Some("not-found"));
        assert_eq!(missing.params["pathMatch"], "a/b/c");
    }

    #[test]
    fn test_router_rejects_duplicate_names() {
        let routes = vec![
            RouteNode::new("/a", "A").named("dup"),
            RouteNode::new("/b", "B").named("dup"),
        ];
        let err = Router::build(&routes).unwrap_err();
        assert!(matches!(err, ExtensionError::Route(_)));
        assert!(err.to_string().contains("dup"));
    }

    #[test]
    fn test_router_rejects_inner_wildcard() {
        let routes = vec![RouteNode::new("/a/*/b", "A")];
        assert!(Router::build(&routes).is_err());
    }

    #[test]
    fn test_table_add_routes_rebuilds_router() {
        let table = RouteTable::new(admin_tree()).unwrap();
        assert!(table.resolve("/gallery").is_none());

        table.add_routes(plugin_subtree(), None).unwrap();
        let m = table.resolve("/gallery/summer").unwrap();
        assert_eq!(m.name.as_deref(), Some("gallery-album"));
        assert_eq!(m.params["album"], "summer");
        assert!(table.has_named("gallery"));
    }

    #[test]
    fn test_table_resolved_match_is_not_retroactive() {
        let table = RouteTable::new(vec![RouteNode::new("/*", "NotFound").named("not-found")])
            .unwrap();
        let current = table.resolve("/gallery").unwrap();

        table
            .add_routes(vec![RouteNode::new("/gallery", "Gallery").named("gallery")], None)
            .unwrap();

        assert_eq!(current.name.as_deref(), Some("not-found"));
        assert_eq!(
            table.resolve("/gallery").unwrap().name.as_deref(),
            Some("gallery")
        );
    }

    #[test]
    fn test_table_custom_merge_and_rollback() {
        let table = RouteTable::new(admin_tree()).unwrap();
        let replace: &MergeFn = &|tree: &mut Vec<RouteNode>, routes: Vec<RouteNode>| {
            tree.retain(|n| n.name.as_deref() != Some("error"));
            tree.extend(routes);
        };
        table
            .add_routes(vec![RouteNode::new("/oops", "Oops").named("error")], Some(replace))
            .unwrap();
        assert_eq!(table.resolve("/oops").unwrap().name.as_deref(), Some("error"));

        let naive: &MergeFn = &|tree: &mut Vec<RouteNode>, routes: Vec<RouteNode>| {
            tree.extend(routes);
        };
        let before = table.routes();
        let err = table.add_routes(vec![RouteNode::new("/x", "X").named("home")], Some(naive));
        assert!(err.is_err());
        assert_eq!(table.routes(), before);
    }

    #[test]
    fn test_route_node_deserialize() {
        let node: RouteNode = serde_json::from_str(
            r#"{"path":"/gallery","name":"gallery","component":"gallery::Index","meta":{"title":"Gallery"}}"#,
        )
        .unwrap();
        assert_eq!(node.component.as_str(), "gallery::Index");
        assert!(node.children.is_empty());
        assert_eq!(node.meta["title"], "Gallery");
    }
}
