//! The test hierarchy: a tree of named nodes carrying fixtures, mocks, and parameter axes,
//! addressed by arena index rather than the original's parent/child/sibling raw pointers.
//!
//! Grounded on `np/testnode.hxx` in full (`testnode_t`, `parameter_t`, `assignment_t`,
//! `preorder_iterator`). The arena/`NodeId` representation mirrors this crate's own
//! `dwarf::Reference`/`AddrIndex` choice to avoid raw pointers, per the expanded specification's
//! guidance to prefer indices over pointer chasing.

use std::collections::HashMap;
use std::ffi::CString;

use smallvec::SmallVec;
use tracing::info;

use crate::error::InterceptError;
use crate::intercept::{Disposition, Handler, InterceptEngine};
use crate::platform::Platform;

/// The five fixture slots a node can carry, indexed in `funcs_[FT_NUM_SINGULAR]` in the original.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FixtureKind {
    BeforeAll,
    Before,
    Test,
    After,
    AfterAll,
}

impl FixtureKind {
    pub const ALL: [FixtureKind; 5] = [
        FixtureKind::BeforeAll,
        FixtureKind::Before,
        FixtureKind::Test,
        FixtureKind::After,
        FixtureKind::AfterAll,
    ];

    fn slot(self) -> usize {
        match self {
            FixtureKind::BeforeAll => 0,
            FixtureKind::Before => 1,
            FixtureKind::Test => 2,
            FixtureKind::After => 3,
            FixtureKind::AfterAll => 4,
        }
    }

    /// `before` kinds collect root-first along a chain; `after` kinds collect node-first.
    fn is_before(self) -> bool {
        matches!(self, FixtureKind::BeforeAll | FixtureKind::Before)
    }
}

/// A fixture or test body: a bare code pointer the harness calls directly, no intercept involved.
pub type FixtureFn = extern "C" fn();

/// One mock registration: redirect calls reaching `target` to `mock` instead. `name` is an
/// optional diagnostic label for the address+name+address overload (carried through to
/// `dump`-style reporting, not consulted by `pre_run`/`post_run` themselves).
#[derive(Clone, Debug)]
struct MockRegistration {
    target: usize,
    mock: usize,
    name: Option<String>,
}

/// One parameter axis: a name, a raw `char *` slot the harness assigns into for the duration of
/// a test run, and the list of string values to cross-product over.
///
/// Representation carries over the original's raw `char **`/`vector<char *>` rather than
/// `String`/`Vec<String>`: the slot is read by already-compiled native code under test, which
/// expects a C string, not a Rust `String`'s layout.
pub struct Parameter {
    name: String,
    slot: *mut *const libc::c_char,
    values: Vec<CString>,
}

impl Parameter {
    /// # Safety
    /// `slot` must point at a `char *` that stays valid (and is not read concurrently from
    /// another thread) for as long as this `Parameter` and any `Assignment` built from it are
    /// alive.
    pub unsafe fn new(
        name: impl Into<String>,
        slot: *mut *const libc::c_char,
        values: impl IntoIterator<Item = impl Into<Vec<u8>>>,
    ) -> Result<Self, std::ffi::NulError> {
        let values = values
            .into_iter()
            .map(CString::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: name.into(),
            slot,
            values,
        })
    }
}

/// One cross-product point over a node's parameter axes: for each parameter, which value index
/// is currently assigned.
#[derive(Clone, Debug)]
pub struct Assignment {
    indices: Vec<usize>,
}

impl Assignment {
    /// Writes every axis's selected value into its slot.
    ///
    /// # Safety
    /// Every [`Parameter::slot`] this assignment touches must currently be valid per
    /// [`Parameter::new`]'s contract.
    pub unsafe fn apply(&self, params: &[Parameter]) {
        for (param, &idx) in params.iter().zip(&self.indices) {
            *param.slot = param.values[idx].as_ptr();
        }
    }

    /// Resets every axis's slot to a null pointer, the original's convention for "unassigned".
    ///
    /// # Safety
    /// Same contract as [`Assignment::apply`].
    pub unsafe fn unapply(&self, params: &[Parameter]) {
        for param in params {
            *param.slot = std::ptr::null();
        }
    }

    pub fn as_string(&self, params: &[Parameter]) -> String {
        params
            .iter()
            .zip(&self.indices)
            .map(|(param, &idx)| format!("{}={}", param.name, param.values[idx].to_string_lossy()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// An arena index into a [`TestTree`]; stable for the tree's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

struct Node {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    fixtures: [Option<FixtureFn>; 5],
    mocks: SmallVec<[MockRegistration; 2]>,
    parameters: SmallVec<[Parameter; 1]>,
}

/// The test hierarchy, arena-allocated: nodes are addressed by [`NodeId`] rather than raw
/// parent/child/sibling pointers.
pub struct TestTree {
    nodes: Vec<Node>,
}

impl TestTree {
    /// Builds a tree with a single root node named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            nodes: vec![Node {
                name: name.into(),
                parent: None,
                children: Vec::new(),
                fixtures: [None; 5],
                mocks: SmallVec::new(),
                parameters: SmallVec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    /// The parent-chain concatenation with `.` separators, root included.
    pub fn full_name(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(n) = cur {
            parts.push(self.node(n).name.clone());
            cur = self.node(n).parent;
        }
        parts.reverse();
        parts.join(".")
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Looks up `dotted_path` by walking child names segment by segment from `start`.
    pub fn find(&self, start: NodeId, dotted_path: &str) -> Option<NodeId> {
        let mut cur = start;
        for segment in dotted_path.split('.') {
            cur = self.child_named(cur, segment)?;
        }
        Some(cur)
    }

    fn child_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent)
            .children
            .iter()
            .copied()
            .find(|&c| self.node(c).name == name)
    }

    /// Like [`TestTree::find`], but creates any missing intermediate (or final) segment as a new
    /// child node instead of failing.
    pub fn make_path(&mut self, start: NodeId, dotted_path: &str) -> NodeId {
        let mut cur = start;
        for segment in dotted_path.split('.') {
            cur = match self.child_named(cur, segment) {
                Some(existing) => existing,
                None => self.add_child(cur, segment),
            };
        }
        cur
    }

    fn add_child(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            name: name.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            fixtures: [None; 5],
            mocks: SmallVec::new(),
            parameters: SmallVec::new(),
        });
        self.node_mut(parent).children.push(id);
        id
    }

    pub fn set_fixture(&mut self, id: NodeId, kind: FixtureKind, func: FixtureFn) {
        self.node_mut(id).fixtures[kind.slot()] = Some(func);
    }

    pub fn fixture(&self, id: NodeId, kind: FixtureKind) -> Option<FixtureFn> {
        self.node(id).fixtures[kind.slot()]
    }

    /// Collects `kind` fixtures along the root-to-`id` chain: root-first for before-kinds,
    /// node-first for after-kinds.
    pub fn fixtures_along_chain(&self, id: NodeId, kind: FixtureKind) -> Vec<FixtureFn> {
        let mut chain = Vec::new();
        let mut cur = Some(id);
        while let Some(n) = cur {
            if let Some(f) = self.fixture(n, kind) {
                chain.push(f);
            }
            cur = self.node(n).parent;
        }
        if kind.is_before() {
            chain.reverse();
        }
        chain
    }

    /// Registers a redirect from `target` to `mock` (the original's `addr_t, addr_t` overload),
    /// installed by a later [`TestTree::pre_run`].
    pub fn add_mock(&mut self, id: NodeId, target: usize, mock: usize) {
        self.node_mut(id).mocks.push(MockRegistration {
            target,
            mock,
            name: None,
        });
    }

    /// Registers a redirect from `target` to `mock`, carrying `name` as a diagnostic label (the
    /// original's `addr_t, const char *, addr_t` overload — the name is typically the mocked
    /// symbol, useful in reports when several mocks are active at once).
    pub fn add_named_mock(&mut self, id: NodeId, target: usize, name: impl Into<String>, mock: usize) {
        self.node_mut(id).mocks.push(MockRegistration {
            target,
            mock,
            name: Some(name.into()),
        });
    }

    /// Registers a redirect between two fixture-style function pointers (the original's
    /// `function_t *, function_t *` overload), converting both to code addresses.
    pub fn add_function_mock(&mut self, id: NodeId, target: FixtureFn, mock: FixtureFn) {
        self.add_mock(id, target as usize, mock as usize);
    }

    fn mocks_along_chain(&self, id: NodeId) -> Vec<MockRegistration> {
        let mut chain = Vec::new();
        let mut cur = Some(id);
        while let Some(n) = cur {
            chain.extend(self.node(n).mocks.iter().cloned());
            cur = self.node(n).parent;
        }
        chain.reverse(); // root-first
        chain
    }

    /// Installs every mock registered along the root-to-`id` chain via `engine`.
    pub fn pre_run<P: Platform>(
        &self,
        id: NodeId,
        engine: &InterceptEngine<P>,
    ) -> Result<(), InterceptError> {
        for mock in self.mocks_along_chain(id) {
            let handler: Handler = Box::new(move |_frame| Disposition::Redirect(mock.mock as u64));
            engine.install(mock.target, handler)?;
        }
        Ok(())
    }

    /// Uninstalls every mock [`TestTree::pre_run`] installed for `id`, in reverse order.
    pub fn post_run<P: Platform>(
        &self,
        id: NodeId,
        engine: &InterceptEngine<P>,
    ) -> Result<(), InterceptError> {
        let mut chain = self.mocks_along_chain(id);
        chain.reverse();
        for mock in chain {
            engine.uninstall(mock.target)?;
        }
        Ok(())
    }

    pub fn add_parameter(&mut self, id: NodeId, param: Parameter) {
        self.node_mut(id).parameters.push(param);
    }

    pub fn parameters(&self, id: NodeId) -> &[Parameter] {
        &self.node(id).parameters
    }

    /// The cross-product of every value of every parameter axis registered directly on `id`
    /// (axes are not inherited from ancestors, unlike fixtures and mocks).
    pub fn create_assignments(&self, id: NodeId) -> Vec<Assignment> {
        let params = self.parameters(id);
        if params.is_empty() {
            return Vec::new();
        }
        let mut assignments = vec![Assignment { indices: vec![0; params.len()] }];
        for (axis, param) in params.iter().enumerate() {
            let mut next = Vec::new();
            for assignment in &assignments {
                for value_idx in 0..param.values.len() {
                    let mut indices = assignment.indices.clone();
                    indices[axis] = value_idx;
                    next.push(Assignment { indices });
                }
            }
            assignments = next;
        }
        assignments
    }

    /// `true` when `id` carries no fixtures of any kind and has exactly one child — the original's
    /// criterion for collapsing a node out of a displayed path.
    pub fn is_elidable(&self, id: NodeId) -> bool {
        let node = self.node(id);
        node.fixtures.iter().all(Option::is_none) && node.children.len() == 1
    }

    /// Visits `id` and its descendants in preorder (node before children, children left to
    /// right).
    pub fn preorder(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut stack = vec![id];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            let children = &self.node(next).children;
            stack.extend(children.iter().rev().copied());
            Some(next)
        })
    }

    /// A flat `NodeId -> full dotted name` map, useful for reporting and the illustrative demo.
    pub fn full_names(&self) -> HashMap<NodeId, String> {
        (0..self.nodes.len())
            .map(|i| {
                let id = NodeId(i as u32);
                (id, self.full_name(id))
            })
            .collect()
    }

    /// Logs `id`'s full name and its registered mocks at the `tracing` info level — the
    /// introspection-side counterpart of the original's `testnode_t::dump(level)`.
    pub fn dump(&self, id: NodeId) {
        info!(node = %self.full_name(id), "test node");
        for mock in &self.node(id).mocks {
            match &mock.name {
                Some(name) => info!(target_addr = mock.target, mock_addr = mock.mock, name = %name, "mock"),
                None => info!(target_addr = mock.target, mock_addr = mock.mock, "mock"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::FakePlatform;

    #[test]
    fn make_path_creates_missing_segments_and_find_locates_them() {
        let mut tree = TestTree::new("root");
        let leaf = tree.make_path(tree.root(), "suite.group.case");
        assert_eq!(tree.full_name(leaf), "root.suite.group.case");
        assert_eq!(tree.find(tree.root(), "suite.group.case"), Some(leaf));
        assert_eq!(tree.find(tree.root(), "suite.missing"), None);
    }

    #[test]
    fn make_path_reuses_existing_segments() {
        let mut tree = TestTree::new("root");
        let a = tree.make_path(tree.root(), "suite.case_a");
        let b = tree.make_path(tree.root(), "suite.case_b");
        assert_ne!(a, b);
        assert_eq!(tree.find(tree.root(), "suite"), tree.parent(a));
    }

    extern "C" fn noop() {}

    #[test]
    fn before_fixtures_collect_root_first_after_fixtures_collect_node_first() {
        let mut tree = TestTree::new("root");
        let child = tree.make_path(tree.root(), "child");
        tree.set_fixture(tree.root(), FixtureKind::Before, noop);
        tree.set_fixture(child, FixtureKind::Before, noop);
        tree.set_fixture(tree.root(), FixtureKind::After, noop);
        tree.set_fixture(child, FixtureKind::After, noop);

        let before = tree.fixtures_along_chain(child, FixtureKind::Before);
        let after = tree.fixtures_along_chain(child, FixtureKind::After);
        assert_eq!(before.len(), 2);
        assert_eq!(after.len(), 2);
    }

    #[test]
    fn preorder_visits_parent_before_children_left_to_right() {
        let mut tree = TestTree::new("root");
        let a = tree.make_path(tree.root(), "a");
        let b = tree.make_path(tree.root(), "b");
        let order: Vec<NodeId> = tree.preorder(tree.root()).collect();
        assert_eq!(order, vec![tree.root(), a, b]);
    }

    #[test]
    fn parameter_cross_product_enumerates_every_combination() {
        let mut tree = TestTree::new("root");
        let mut slot_a: *const libc::c_char = std::ptr::null();
        let mut slot_b: *const libc::c_char = std::ptr::null();
        // SAFETY: `slot_a`/`slot_b` outlive every assignment built from these parameters.
        let param_a = unsafe { Parameter::new("a", &mut slot_a, ["x", "y"]).unwrap() };
        let param_b = unsafe { Parameter::new("b", &mut slot_b, ["1", "2"]).unwrap() };
        tree.add_parameter(tree.root(), param_a);
        tree.add_parameter(tree.root(), param_b);

        let assignments = tree.create_assignments(tree.root());
        assert_eq!(assignments.len(), 4);
        let strings: Vec<String> = assignments
            .iter()
            .map(|a| a.as_string(tree.parameters(tree.root())))
            .collect();
        assert!(strings.contains(&"a=x,b=1".to_string()));
        assert!(strings.contains(&"a=y,b=2".to_string()));
    }

    #[test]
    fn is_elidable_requires_no_fixtures_and_exactly_one_child() {
        let mut tree = TestTree::new("root");
        let mid = tree.make_path(tree.root(), "mid");
        tree.make_path(mid, "leaf");
        assert!(tree.is_elidable(mid));
        tree.set_fixture(mid, FixtureKind::Before, noop);
        assert!(!tree.is_elidable(mid));
    }

    #[test]
    fn pre_run_and_post_run_install_and_restore_mocked_bytes() {
        let mut code = [0x55u8, 0x90];
        let target = code.as_mut_ptr() as usize;
        let mut tree = TestTree::new("root");
        tree.add_mock(tree.root(), target, 0xdead_beef);
        let engine = InterceptEngine::with_platform(FakePlatform::default());

        tree.pre_run(tree.root(), &engine).unwrap();
        assert_eq!(code[0], 0xCC);
        tree.post_run(tree.root(), &engine).unwrap();
        assert_eq!(code[0], 0x55);
    }

    #[test]
    fn named_mock_overload_installs_and_restores_like_the_plain_one() {
        let mut code = [0x55u8, 0x90];
        let mut tree = TestTree::new("root");
        tree.add_named_mock(tree.root(), code.as_mut_ptr() as usize, "read", 0x1111);

        let engine = InterceptEngine::with_platform(FakePlatform::default());
        tree.pre_run(tree.root(), &engine).unwrap();
        assert_eq!(code[0], 0xCC);
        tree.post_run(tree.root(), &engine).unwrap();
        assert_eq!(code[0], 0x55);
    }

    #[test]
    fn function_mock_overload_converts_both_pointers_to_addresses() {
        let mut tree = TestTree::new("root");
        tree.add_function_mock(tree.root(), noop, noop);
        let chain = tree.mocks_along_chain(tree.root());
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].target, noop as usize);
        assert_eq!(chain[0].mock, noop as usize);
    }

    #[test]
    fn dump_does_not_panic_on_a_node_with_named_and_unnamed_mocks() {
        let mut tree = TestTree::new("root");
        tree.add_mock(tree.root(), 0x1000, 0x2000);
        tree.add_named_mock(tree.root(), 0x3000, "syslog", 0x4000);
        tree.dump(tree.root());
    }

    #[test]
    fn assignment_apply_writes_the_selected_value_into_the_slot() {
        let mut slot: *const libc::c_char = std::ptr::null();
        // SAFETY: `slot` outlives the assignment used below.
        let param = unsafe { Parameter::new("mode", &mut slot, ["fast", "slow"]).unwrap() };
        let params = vec![param];
        let assignment = Assignment { indices: vec![1] };
        // SAFETY: `slot` is a local still on this stack frame.
        unsafe { assignment.apply(&params) };
        let read = unsafe { std::ffi::CStr::from_ptr(slot) };
        assert_eq!(read.to_str().unwrap(), "slow");
        unsafe { assignment.unapply(&params) };
        assert!(slot.is_null());
    }

    #[test]
    fn fixture_slot_round_trips_through_set_and_get() {
        let mut tree = TestTree::new("root");
        tree.set_fixture(tree.root(), FixtureKind::Test, noop);
        assert!(tree.fixture(tree.root(), FixtureKind::Test).is_some());
        assert!(tree.fixture(tree.root(), FixtureKind::After).is_none());
    }
}
