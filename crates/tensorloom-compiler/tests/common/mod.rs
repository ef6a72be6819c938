//! Test support: a coordinate packer and a small interpreter for the
//! generated IR.
//!
//! The library's job ends at the IR tree; these helpers stand in for the
//! backend so end-to-end tests can check concrete values.

use std::collections::HashMap;

use tensorloom_ir::ir::{Expr, Function, Literal, Stmt, TensorProperty, Type};
use tensorloom_ir::{LevelKind, TensorVar};

/// Index arrays of one storage level.
#[derive(Clone, Debug, PartialEq)]
pub enum LevelIndex {
    Dense,
    Sparse { pos: Vec<i64>, idx: Vec<i64> },
    Fixed { ptr: Vec<i64>, idx: Vec<i64> },
}

/// A packed tensor: per-level index arrays plus a values array.
#[derive(Clone, Debug)]
pub struct PackedTensor {
    pub tensor: TensorVar,
    pub dims: Vec<i64>,
    pub levels: Vec<LevelIndex>,
    pub vals: Vec<f64>,
    pub vals_size: i64,
}

/// Packs `(coordinate, value)` entries into the tensor's format.
/// Duplicate coordinates are summed.
pub fn pack(tensor: &TensorVar, dims: &[i64], entries: &[(Vec<i64>, f64)]) -> PackedTensor {
    let format = tensor.format();
    let num_levels = format.num_levels();

    let mut items: Vec<(Vec<i64>, f64)> = entries
        .iter()
        .map(|(coords, value)| {
            assert_eq!(coords.len(), num_levels, "coordinate arity");
            let stored: Vec<i64> = format.order().iter().map(|&d| coords[d]).collect();
            (stored, *value)
        })
        .collect();
    items.sort_by(|a, b| a.0.cmp(&b.0));

    // One segment of `items` per position of the current level.
    let mut segments: Vec<(usize, usize)> = vec![(0, items.len())];
    let mut levels = Vec::new();
    for level in 0..num_levels {
        let dim = dims[format.dimension_of(level)];
        let mut next = Vec::new();
        match format.level(level) {
            LevelKind::Dense => {
                levels.push(LevelIndex::Dense);
                for &(start, end) in &segments {
                    let mut at = start;
                    for coord in 0..dim {
                        let lo = at;
                        while at < end && items[at].0[level] == coord {
                            at += 1;
                        }
                        next.push((lo, at));
                    }
                }
            }
            LevelKind::Sparse => {
                let mut pos = vec![0i64];
                let mut idx = Vec::new();
                for &(start, end) in &segments {
                    let mut at = start;
                    while at < end {
                        let coord = items[at].0[level];
                        let lo = at;
                        while at < end && items[at].0[level] == coord {
                            at += 1;
                        }
                        idx.push(coord);
                        next.push((lo, at));
                    }
                    pos.push(idx.len() as i64);
                }
                levels.push(LevelIndex::Sparse { pos, idx });
            }
            LevelKind::Fixed => {
                // Uniform segment length; shorter segments pad with their
                // last coordinate and a zero value.
                let mut grouped: Vec<Vec<(i64, (usize, usize))>> = Vec::new();
                for &(start, end) in &segments {
                    let mut group = Vec::new();
                    let mut at = start;
                    while at < end {
                        let coord = items[at].0[level];
                        let lo = at;
                        while at < end && items[at].0[level] == coord {
                            at += 1;
                        }
                        group.push((coord, (lo, at)));
                    }
                    grouped.push(group);
                }
                let width = grouped.iter().map(Vec::len).max().unwrap_or(0);
                let mut idx = Vec::new();
                for group in &grouped {
                    let pad = group.last().map(|(c, _)| *c).unwrap_or(0);
                    for &(coord, range) in group {
                        idx.push(coord);
                        next.push(range);
                    }
                    for _ in group.len()..width {
                        idx.push(pad);
                        next.push((0, 0));
                    }
                }
                levels.push(LevelIndex::Fixed {
                    ptr: vec![width as i64],
                    idx,
                });
            }
            kind => panic!("cannot pack level kind {:?}", kind),
        }
        segments = next;
    }

    let vals: Vec<f64> = segments
        .iter()
        .map(|&(start, end)| items[start..end].iter().map(|(_, v)| v).sum())
        .collect();
    let vals_size = vals.len() as i64;
    PackedTensor {
        tensor: tensor.clone(),
        dims: dims.to_vec(),
        levels,
        vals,
        vals_size,
    }
}

/// Expands a packed tensor to a dense row-major value vector over its
/// logical dimensions.
pub fn to_dense(t: &PackedTensor) -> Vec<f64> {
    let size = t.dims.iter().product::<i64>().max(1) as usize;
    let mut out = vec![0.0; size];
    let mut coords = vec![0i64; t.dims.len()];
    expand(t, 0, 0, &mut coords, &mut out);
    out
}

fn expand(t: &PackedTensor, level: usize, pos: i64, coords: &mut Vec<i64>, out: &mut Vec<f64>) {
    let format = t.tensor.format();
    if level == format.num_levels() {
        let mut linear = 0i64;
        for (d, &dim) in t.dims.iter().enumerate() {
            linear = linear * dim + coords[d];
        }
        // Fixed-level padding carries zero values, so accumulation is safe.
        out[linear as usize] += t.vals[pos as usize];
        return;
    }
    let dim_of = format.dimension_of(level);
    match &t.levels[level] {
        LevelIndex::Dense => {
            let dim = t.dims[dim_of];
            for coord in 0..dim {
                coords[dim_of] = coord;
                expand(t, level + 1, pos * dim + coord, coords, out);
            }
        }
        LevelIndex::Sparse { pos: pos_arr, idx } => {
            for q in pos_arr[pos as usize]..pos_arr[pos as usize + 1] {
                coords[dim_of] = idx[q as usize];
                expand(t, level + 1, q, coords, out);
            }
        }
        LevelIndex::Fixed { ptr, idx } => {
            let width = ptr[0];
            for q in pos * width..(pos + 1) * width {
                coords[dim_of] = idx[q as usize];
                expand(t, level + 1, q, coords, out);
            }
        }
    }
}

#[derive(Clone, Debug)]
enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(String, TensorProperty),
}

impl Value {
    fn as_int(&self) -> i64 {
        match self {
            Value::Int(v) => *v,
            Value::Bool(b) => *b as i64,
            other => panic!("expected an integer, got {:?}", other),
        }
    }

    fn as_float(&self) -> f64 {
        match self {
            Value::Float(v) => *v,
            Value::Int(v) => *v as f64,
            other => panic!("expected a float, got {:?}", other),
        }
    }

    fn as_bool(&self) -> bool {
        match self {
            Value::Bool(v) => *v,
            other => panic!("expected a bool, got {:?}", other),
        }
    }
}

struct Machine {
    tensors: HashMap<String, PackedTensor>,
    vars: HashMap<String, Value>,
    steps: u64,
}

/// Runs a lowered function over packed tensors bound positionally to
/// `results ++ arguments`; returns the tensors in the same order.
pub fn run(func: &Function, tensors: Vec<PackedTensor>) -> Vec<PackedTensor> {
    let params: Vec<String> = func
        .results
        .iter()
        .chain(func.arguments.iter())
        .map(|p| p.var_name().expect("tensor parameters are variables").to_string())
        .collect();
    assert_eq!(params.len(), tensors.len(), "parameter count");

    let mut machine = Machine {
        tensors: params.iter().cloned().zip(tensors).collect(),
        vars: HashMap::new(),
        steps: 0,
    };
    machine.exec(&func.body);
    params
        .into_iter()
        .map(|name| machine.tensors.remove(&name).expect("tensor"))
        .collect()
}

impl Machine {
    fn eval(&self, expr: &Expr) -> Value {
        match expr {
            Expr::Var { name, .. } => self
                .vars
                .get(name)
                .unwrap_or_else(|| panic!("variable {} read before assignment", name))
                .clone(),
            Expr::Literal(Literal::Int(v)) => Value::Int(*v),
            Expr::Literal(Literal::Float(v)) => Value::Float(*v),
            Expr::Literal(Literal::Bool(v)) => Value::Bool(*v),
            Expr::Load { array, index } => {
                let (tensor, property) = self.resolve_array(array);
                let i = self.eval(index).as_int() as usize;
                let t = &self.tensors[&tensor];
                match property {
                    TensorProperty::Values => Value::Float(t.vals[i]),
                    TensorProperty::Pos(level) => Value::Int(self.index_array(t, level, true)[i]),
                    TensorProperty::Idx(level) => Value::Int(self.index_array(t, level, false)[i]),
                    p => panic!("cannot load from {:?}", p),
                }
            }
            Expr::GetProperty { tensor, property } => {
                let name = tensor.var_name().expect("tensor handle").to_string();
                match property {
                    TensorProperty::Dimension(level) => {
                        let t = &self.tensors[&name];
                        Value::Int(t.dims[t.tensor.format().dimension_of(*level)])
                    }
                    TensorProperty::ValuesSize => Value::Int(self.tensors[&name].vals_size),
                    p => Value::Array(name, *p),
                }
            }
            Expr::Neg(e) => match self.eval(e) {
                Value::Int(v) => Value::Int(-v),
                Value::Float(v) => Value::Float(-v),
                other => panic!("cannot negate {:?}", other),
            },
            Expr::Sqrt(e) => Value::Float(self.eval(e).as_float().sqrt()),
            Expr::Add(l, r) => self.arith(l, r, |a, b| a + b, |a, b| a + b),
            Expr::Sub(l, r) => self.arith(l, r, |a, b| a - b, |a, b| a - b),
            Expr::Mul(l, r) => self.arith(l, r, |a, b| a * b, |a, b| a * b),
            Expr::Div(l, r) => self.arith(l, r, |a, b| a / b, |a, b| a / b),
            Expr::Eq(l, r) => self.compare(l, r, |o| o == std::cmp::Ordering::Equal),
            Expr::Neq(l, r) => self.compare(l, r, |o| o != std::cmp::Ordering::Equal),
            Expr::Lt(l, r) => self.compare(l, r, |o| o == std::cmp::Ordering::Less),
            Expr::Lte(l, r) => self.compare(l, r, |o| o != std::cmp::Ordering::Greater),
            Expr::And(l, r) => Value::Bool(self.eval(l).as_bool() && self.eval(r).as_bool()),
            Expr::Or(l, r) => Value::Bool(self.eval(l).as_bool() || self.eval(r).as_bool()),
            Expr::BitAnd(l, r) => Value::Int(self.eval(l).as_int() & self.eval(r).as_int()),
            Expr::Cast { expr, ty } => match ty {
                Type::Int => Value::Int(self.eval(expr).as_int()),
                Type::Float => Value::Float(self.eval(expr).as_float()),
                Type::Bool => Value::Bool(self.eval(expr).as_bool()),
            },
        }
    }

    fn arith(
        &self,
        l: &Expr,
        r: &Expr,
        int_op: fn(i64, i64) -> i64,
        float_op: fn(f64, f64) -> f64,
    ) -> Value {
        match (self.eval(l), self.eval(r)) {
            (Value::Int(a), Value::Int(b)) => Value::Int(int_op(a, b)),
            (a, b) => Value::Float(float_op(a.as_float(), b.as_float())),
        }
    }

    fn compare(&self, l: &Expr, r: &Expr, accept: fn(std::cmp::Ordering) -> bool) -> Value {
        let ordering = match (self.eval(l), self.eval(r)) {
            (Value::Int(a), Value::Int(b)) => a.cmp(&b),
            (a, b) => a
                .as_float()
                .partial_cmp(&b.as_float())
                .expect("comparable floats"),
        };
        Value::Bool(accept(ordering))
    }

    fn resolve_array(&self, expr: &Expr) -> (String, TensorProperty) {
        match self.eval(expr) {
            Value::Array(tensor, property) => (tensor, property),
            other => panic!("expected an array, got {:?}", other),
        }
    }

    fn index_array<'t>(&self, t: &'t PackedTensor, level: usize, pos: bool) -> &'t Vec<i64> {
        match (&t.levels[level], pos) {
            (LevelIndex::Sparse { pos, .. }, true) => pos,
            (LevelIndex::Sparse { idx, .. }, false) => idx,
            (LevelIndex::Fixed { ptr, .. }, true) => ptr,
            (LevelIndex::Fixed { idx, .. }, false) => idx,
            (level, _) => panic!("level {:?} has no index arrays", level),
        }
    }

    fn index_array_mut<'t>(
        t: &'t mut PackedTensor,
        level: usize,
        pos: bool,
    ) -> &'t mut Vec<i64> {
        match (&mut t.levels[level], pos) {
            (LevelIndex::Sparse { pos, .. }, true) => pos,
            (LevelIndex::Sparse { idx, .. }, false) => idx,
            (LevelIndex::Fixed { ptr, .. }, true) => ptr,
            (LevelIndex::Fixed { idx, .. }, false) => idx,
            (level, _) => panic!("level {:?} has no index arrays", level),
        }
    }

    fn exec(&mut self, stmt: &Stmt) {
        self.steps += 1;
        assert!(self.steps < 100_000_000, "runaway kernel");
        match stmt {
            Stmt::Store {
                array,
                index,
                value,
            } => {
                let (tensor, property) = self.resolve_array(array);
                let i = self.eval(index).as_int() as usize;
                let v = self.eval(value);
                let t = self.tensors.get_mut(&tensor).expect("tensor");
                match property {
                    TensorProperty::Values => t.vals[i] = v.as_float(),
                    TensorProperty::Pos(level) => Self::index_array_mut(t, level, true)[i] = v.as_int(),
                    TensorProperty::Idx(level) => Self::index_array_mut(t, level, false)[i] = v.as_int(),
                    p => panic!("cannot store to {:?}", p),
                }
            }
            Stmt::VarAssign { var, value, .. } => match var {
                Expr::Var { name, .. } => {
                    let v = self.eval(value);
                    self.vars.insert(name.clone(), v);
                }
                Expr::GetProperty { tensor, property } => {
                    let name = tensor.var_name().expect("tensor handle").to_string();
                    let v = self.eval(value).as_int();
                    match property {
                        TensorProperty::ValuesSize => {
                            self.tensors.get_mut(&name).expect("tensor").vals_size = v;
                        }
                        p => panic!("cannot assign to {:?}", p),
                    }
                }
                other => panic!("bad assignment target {:?}", other),
            },
            Stmt::For {
                var,
                start,
                end,
                body,
                ..
            } => {
                let name = var.var_name().expect("loop variable").to_string();
                let start = self.eval(start).as_int();
                let end = self.eval(end).as_int();
                for i in start..end {
                    self.vars.insert(name.clone(), Value::Int(i));
                    self.exec(body);
                }
            }
            Stmt::While { cond, body } => {
                while self.eval(cond).as_bool() {
                    self.exec(body);
                    self.steps += 1;
                    assert!(self.steps < 100_000_000, "runaway merge loop");
                }
            }
            Stmt::IfThenElse {
                cond,
                then_body,
                else_body,
            } => {
                if self.eval(cond).as_bool() {
                    self.exec(then_body);
                } else if let Some(else_body) = else_body {
                    self.exec(else_body);
                }
            }
            Stmt::Case { clauses, .. } => {
                for (guard, body) in clauses {
                    if self.eval(guard).as_bool() {
                        self.exec(body);
                        break;
                    }
                }
            }
            Stmt::Switch { control, cases } => {
                let selector = self.eval(control).as_int();
                for (pattern, body) in cases {
                    if pattern.as_int_literal() == Some(selector) {
                        self.exec(body);
                        break;
                    }
                }
            }
            Stmt::Block(stmts) => {
                for s in stmts {
                    self.exec(s);
                }
            }
            Stmt::Allocate {
                array,
                size,
                realloc,
            } => {
                let (tensor, property) = self.resolve_array(array);
                let n = self.eval(size).as_int() as usize;
                let t = self.tensors.get_mut(&tensor).expect("tensor");
                match property {
                    TensorProperty::Values => {
                        if *realloc {
                            t.vals.resize(n.max(t.vals.len()), 0.0);
                        } else {
                            t.vals = vec![0.0; n];
                        }
                    }
                    TensorProperty::Pos(level) => {
                        let arr = Self::index_array_mut(t, level, true);
                        if *realloc {
                            let len = arr.len();
                            arr.resize(n.max(len), 0);
                        } else {
                            *arr = vec![0; n];
                        }
                    }
                    TensorProperty::Idx(level) => {
                        let arr = Self::index_array_mut(t, level, false);
                        if *realloc {
                            let len = arr.len();
                            arr.resize(n.max(len), 0);
                        } else {
                            *arr = vec![0; n];
                        }
                    }
                    p => panic!("cannot allocate {:?}", p),
                }
            }
        }
    }
}
