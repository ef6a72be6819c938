//! Iterator objects over tensor storage levels.
//!
//! One iterator exists per `(tensor path, step)`, plus a root iterator per
//! path. Iterators live in a flat arena owned by [`Iterators`] and refer to
//! their parents by index, so the parent chain carries no ownership cycles.
//!
//! An iterator exposes its level kind's capability set as predicates and a
//! family of IR-producing operations. Asking for an operation whose
//! capability the level does not advertise is a programmer error and
//! asserts.

use std::collections::HashMap;
use std::ops::Index;

use tensorloom_ir::ir::{simplify, Expr, Stmt, TensorProperty, Type};
use tensorloom_ir::{LevelKind, TensorVar};

use crate::context::NameGenerator;
use crate::iteration_graph::IterationGraph;
use crate::tensor_path::{PathId, PathStep};

/// Handle into the iterator arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IteratorId(usize);

/// One iterator: a storage level of one path, or a path's root.
#[derive(Clone, Debug)]
pub struct IteratorNode {
    pub parent: Option<IteratorId>,
    kind: Option<LevelKind>,
    level: usize,
    tensor: Expr,
    alloc_hint: i64,
    iterator_var: Expr,
    pos_var: Expr,
    end_var: Expr,
    derived_var: Expr,
    valid_var: Expr,
    begin_var: Expr,
    segend_var: Expr,
    pos_cap_var: Expr,
    idx_cap_var: Expr,
    init_loop_var: Expr,
}

impl IteratorNode {
    fn root(tensor: Expr) -> Self {
        let zero = Expr::int(0);
        IteratorNode {
            parent: None,
            kind: None,
            level: 0,
            tensor,
            alloc_hint: 0,
            iterator_var: zero.clone(),
            pos_var: zero.clone(),
            end_var: zero.clone(),
            derived_var: zero.clone(),
            valid_var: zero.clone(),
            begin_var: zero.clone(),
            segend_var: zero.clone(),
            pos_cap_var: zero.clone(),
            idx_cap_var: zero.clone(),
            init_loop_var: zero,
        }
    }

    pub fn is_root(&self) -> bool {
        self.kind.is_none()
    }

    pub fn level_kind(&self) -> LevelKind {
        self.kind.expect("root iterators have no level kind")
    }

    pub fn tensor(&self) -> &Expr {
        &self.tensor
    }

    pub fn level(&self) -> usize {
        self.level
    }

    // Capability queries; all false for the root iterator.

    pub fn has_coord_val_iter(&self) -> bool {
        self.kind.is_some_and(LevelKind::has_coord_val_iter)
    }

    pub fn has_coord_pos_iter(&self) -> bool {
        self.kind.is_some_and(LevelKind::has_coord_pos_iter)
    }

    pub fn has_locate(&self) -> bool {
        self.kind.is_some_and(LevelKind::has_locate)
    }

    pub fn has_insert(&self) -> bool {
        self.kind.is_some_and(LevelKind::has_insert)
    }

    pub fn has_append(&self) -> bool {
        self.kind.is_some_and(LevelKind::has_append)
    }

    pub fn is_unique(&self) -> bool {
        self.kind.is_some_and(LevelKind::is_unique)
    }

    pub fn is_full(&self) -> bool {
        self.kind.is_some_and(LevelKind::is_full)
    }

    pub fn is_branchless(&self) -> bool {
        self.kind.is_some_and(LevelKind::is_branchless)
    }

    // Symbol family.

    /// The advancing cursor: the position for coord-pos levels, the
    /// coordinate for coord-val levels.
    pub fn iterator_var(&self) -> &Expr {
        &self.iterator_var
    }

    /// The current position into the child level. For coord-pos levels this
    /// is the cursor itself; the root's position is literal zero.
    pub fn pos(&self) -> &Expr {
        &self.pos_var
    }

    pub fn end_var(&self) -> &Expr {
        &self.end_var
    }

    /// The dereferenced coordinate at the cursor.
    pub fn derived_var(&self) -> &Expr {
        &self.derived_var
    }

    pub fn valid_var(&self) -> &Expr {
        &self.valid_var
    }

    /// Segment start stashed before an append level's loop.
    pub fn begin_var(&self) -> &Expr {
        &self.begin_var
    }

    /// Segment end for deduplicating non-unique coord-pos levels.
    pub fn segend_var(&self) -> &Expr {
        &self.segend_var
    }

    fn pos_array(&self) -> Expr {
        Expr::property(self.tensor.clone(), TensorProperty::Pos(self.level))
    }

    fn idx_array(&self) -> Expr {
        Expr::property(self.tensor.clone(), TensorProperty::Idx(self.level))
    }

    /// The number of coordinates one parent position expands to.
    pub fn size(&self) -> Expr {
        match self.level_kind() {
            LevelKind::Dense => {
                Expr::property(self.tensor.clone(), TensorProperty::Dimension(self.level))
            }
            LevelKind::Fixed => Expr::load(self.pos_array(), Expr::int(0)),
            kind => panic!("level kind {:?} has no static size", kind),
        }
    }

    /// Position bounds `[begin, end)` of the segment under `parent_pos`.
    pub fn pos_iter(&self, parent_pos: &Expr) -> (Option<Stmt>, Expr, Expr) {
        assert!(self.has_coord_pos_iter(), "pos_iter needs a coord-pos level");
        match self.level_kind() {
            LevelKind::Sparse => {
                let begin = Expr::load(self.pos_array(), parent_pos.clone());
                let end = Expr::load(
                    self.pos_array(),
                    simplify(&Expr::add(parent_pos.clone(), Expr::int(1))),
                );
                (None, begin, end)
            }
            LevelKind::Fixed => {
                let n = self.size();
                let begin = simplify(&Expr::mul(parent_pos.clone(), n.clone()));
                let end = simplify(&Expr::mul(
                    Expr::add(parent_pos.clone(), Expr::int(1)),
                    n,
                ));
                (None, begin, end)
            }
            kind => panic!("coord-pos iteration over {:?}", kind),
        }
    }

    /// Coordinate bounds `[0, size)` for a coord-val level.
    pub fn coord_iter(&self) -> (Option<Stmt>, Expr, Expr) {
        assert!(self.has_coord_val_iter(), "coord_iter needs a coord-val level");
        (None, Expr::int(0), self.size())
    }

    /// Load the coordinate stored at `pos`.
    pub fn pos_access(&self, pos: &Expr) -> (Option<Stmt>, Expr, Expr) {
        assert!(self.has_coord_pos_iter(), "pos_access needs a coord-pos level");
        (
            None,
            Expr::load(self.idx_array(), pos.clone()),
            Expr::boolean(true),
        )
    }

    /// Synthesize the coordinate for a coord-val level: the cursor itself.
    pub fn coord_access(&self, coord: &Expr) -> (Option<Stmt>, Expr, Expr) {
        assert!(self.has_coord_val_iter(), "coord_access needs a coord-val level");
        (None, coord.clone(), Expr::boolean(true))
    }

    /// Random access: the child position of `coord` under `parent_pos`.
    pub fn locate(&self, parent_pos: &Expr, coord: &Expr) -> (Option<Stmt>, Expr, Expr) {
        assert!(self.has_locate(), "locate needs a locate-capable level");
        let pos = simplify(&Expr::add(
            Expr::mul(parent_pos.clone(), self.size()),
            coord.clone(),
        ));
        (None, pos, Expr::boolean(true))
    }

    // Insert assembly (dense levels store no index arrays, so these emit
    // nothing; they exist so the engine can drive any insert level).

    pub fn insert_init_coords(&self, _begin: &Expr, _end: &Expr) -> Option<Stmt> {
        assert!(self.has_insert(), "insert_init_coords needs an insert level");
        None
    }

    pub fn insert_coord(&self, _pos: &Expr, _coord: &Expr) -> Option<Stmt> {
        assert!(self.has_insert(), "insert_coord needs an insert level");
        None
    }

    pub fn insert_init_level(&self, _parent_size: &Expr, _size: &Expr) -> Option<Stmt> {
        assert!(self.has_insert(), "insert_init_level needs an insert level");
        None
    }

    pub fn insert_finalize_level(&self, _parent_size: &Expr, _size: &Expr) -> Option<Stmt> {
        assert!(self.has_insert(), "insert_finalize_level needs an insert level");
        None
    }

    // Append assembly. The `pos` array accumulates segment *sizes* during
    // assembly; the finalize pass turns them into offsets with a prefix sum.
    // Rows never visited keep their zero entry, which the prefix sum turns
    // into an empty segment.

    /// Allocate and zero the `pos` array, and give `idx` its initial
    /// capacity.
    pub fn append_init_level(&self, parent_size: &Expr, _size: &Expr) -> Option<Stmt> {
        assert!(self.has_append(), "append_init_level needs an append level");
        let entries = simplify(&Expr::add(parent_size.clone(), Expr::int(1)));
        let zero_loop = Stmt::for_range(
            self.init_loop_var.clone(),
            Expr::int(0),
            entries.clone(),
            Stmt::store(self.pos_array(), self.init_loop_var.clone(), Expr::int(0)),
        );
        Some(Stmt::block(vec![
            Stmt::alloc(self.pos_array(), entries.clone()),
            Stmt::decl(self.pos_cap_var.clone(), entries),
            zero_loop,
            Stmt::alloc(self.idx_array(), Expr::int(self.alloc_hint)),
            Stmt::decl(self.idx_cap_var.clone(), Expr::int(self.alloc_hint)),
        ]))
    }

    /// Append the coordinate at `pos`, growing `idx` geometrically.
    pub fn append_coord(&self, pos: &Expr, coord: &Expr) -> Option<Stmt> {
        assert!(self.has_append(), "append_coord needs an append level");
        let needed = simplify(&Expr::add(pos.clone(), Expr::int(1)));
        let new_cap = Expr::mul(Expr::int(2), needed.clone());
        let grow = Stmt::block(vec![
            Stmt::realloc(self.idx_array(), new_cap.clone()),
            Stmt::assign(self.idx_cap_var.clone(), new_cap),
        ]);
        Some(Stmt::block(vec![
            Stmt::if_then(Expr::lte(self.idx_cap_var.clone(), pos.clone()), grow),
            Stmt::store(self.idx_array(), pos.clone(), coord.clone()),
        ]))
    }

    /// Record the segment size of `parent_pos`.
    pub fn append_edges(&self, parent_pos: &Expr, begin: &Expr, end: &Expr) -> Option<Stmt> {
        assert!(self.has_append(), "append_edges needs an append level");
        Some(Stmt::store(
            self.pos_array(),
            simplify(&Expr::add(parent_pos.clone(), Expr::int(1))),
            simplify(&Expr::sub(end.clone(), begin.clone())),
        ))
    }

    /// Make room for parent positions `(pbegin, pend]` and zero their size
    /// entries.
    pub fn append_init_edges(&self, pbegin: &Expr, pend: &Expr) -> Option<Stmt> {
        assert!(self.has_append(), "append_init_edges needs an append level");
        let needed = simplify(&Expr::add(pend.clone(), Expr::int(1)));
        let new_cap = Expr::mul(Expr::int(2), needed.clone());
        let grow = Stmt::block(vec![
            Stmt::realloc(self.pos_array(), new_cap.clone()),
            Stmt::assign(self.pos_cap_var.clone(), new_cap),
        ]);
        let zero_loop = Stmt::for_range(
            self.init_loop_var.clone(),
            simplify(&Expr::add(pbegin.clone(), Expr::int(1))),
            needed.clone(),
            Stmt::store(self.pos_array(), self.init_loop_var.clone(), Expr::int(0)),
        );
        Some(Stmt::block(vec![
            Stmt::if_then(Expr::lte(self.pos_cap_var.clone(), pend.clone()), grow),
            zero_loop,
        ]))
    }

    /// Prefix-sum the assembled segment sizes into offsets.
    pub fn append_finalize_level(&self, parent_size: &Expr, _size: &Expr) -> Option<Stmt> {
        assert!(self.has_append(), "append_finalize_level needs an append level");
        let p = self.init_loop_var.clone();
        let prev = Expr::load(
            self.pos_array(),
            Expr::sub(p.clone(), Expr::int(1)),
        );
        let body = Stmt::store(
            self.pos_array(),
            p.clone(),
            Expr::add(Expr::load(self.pos_array(), p.clone()), prev),
        );
        Some(Stmt::for_range(
            p,
            Expr::int(1),
            simplify(&Expr::add(parent_size.clone(), Expr::int(1))),
            body,
        ))
    }
}

/// The iterator directory: maps each `(path, step)` to its iterator.
#[derive(Debug)]
pub struct Iterators {
    nodes: Vec<IteratorNode>,
    roots: HashMap<PathId, IteratorId>,
    steps: HashMap<PathStep, IteratorId>,
}

impl Iterators {
    pub fn new(
        graph: &IterationGraph,
        tensor_vars: &HashMap<TensorVar, Expr>,
        alloc_hint: i64,
        names: &mut NameGenerator,
    ) -> Self {
        let mut iterators = Iterators {
            nodes: Vec::new(),
            roots: HashMap::new(),
            steps: HashMap::new(),
        };

        let path_ids: Vec<PathId> = (0..graph.paths().len())
            .map(PathId::Operand)
            .chain(std::iter::once(PathId::Result))
            .collect();
        for id in path_ids {
            let path = graph.path(id);
            let tensor_var = tensor_vars[path.tensor()].clone();
            let tensor_name = path.tensor().name().to_string();

            let root = iterators.push(IteratorNode::root(tensor_var.clone()));
            iterators.roots.insert(id, root);

            let mut parent = root;
            for (level, var) in path.vars().iter().enumerate() {
                let prefix = names.fresh(&format!("{}{}", tensor_name, level + 1));
                let kind = path.level_kind(level);
                let int_var = |suffix: &str| Expr::var(format!("{}{}", prefix, suffix), Type::Int);
                let iterator_var = if kind.has_coord_pos_iter() {
                    int_var("_pos")
                } else {
                    int_var("_it")
                };
                let pos_var = if kind.has_coord_pos_iter() {
                    iterator_var.clone()
                } else {
                    int_var("_pos")
                };
                let node = IteratorNode {
                    parent: Some(parent),
                    kind: Some(kind),
                    level,
                    tensor: tensor_var.clone(),
                    alloc_hint,
                    derived_var: Expr::var(
                        names.fresh(&format!("{}{}", var.name(), tensor_name)),
                        Type::Int,
                    ),
                    iterator_var,
                    pos_var,
                    end_var: int_var("_end"),
                    valid_var: Expr::var(format!("{}_valid", prefix), Type::Bool),
                    begin_var: int_var("_begin"),
                    segend_var: int_var("_segend"),
                    pos_cap_var: int_var("_pos_capacity"),
                    idx_cap_var: int_var("_idx_capacity"),
                    init_loop_var: int_var("_p"),
                };
                parent = iterators.push(node);
                iterators.steps.insert(PathStep { path: id, level }, parent);
            }
        }
        iterators
    }

    fn push(&mut self, node: IteratorNode) -> IteratorId {
        self.nodes.push(node);
        IteratorId(self.nodes.len() - 1)
    }

    pub fn root(&self, path: PathId) -> IteratorId {
        self.roots[&path]
    }

    pub fn step(&self, step: PathStep) -> IteratorId {
        self.steps[&step]
    }

    /// The path an iterator belongs to (`None` for path roots).
    pub fn path_of(&self, id: IteratorId) -> Option<PathId> {
        self.steps
            .iter()
            .find(|(_, &it)| it == id)
            .map(|(step, _)| step.path)
    }

    /// The parent's position expression (literal zero at a root).
    pub fn parent_pos(&self, id: IteratorId) -> Expr {
        match self[id].parent {
            Some(p) => self[p].pos().clone(),
            None => Expr::int(0),
        }
    }
}

impl Index<IteratorId> for Iterators {
    type Output = IteratorNode;

    fn index(&self, id: IteratorId) -> &IteratorNode {
        &self.nodes[id.0]
    }
}
