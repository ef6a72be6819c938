//! # Tensorloom Compiler
//!
//! Lowers index-notation statements over sparse tensors — e.g.
//! `A(i,j) = B(i,k) * C(k,j)` with a per-tensor storage format — to an
//! imperative loop-nest IR that merges the operands' iteration spaces and
//! assembles and/or computes the result.
//!
//! The pipeline:
//!
//! 1. An [`IterationGraph`] orders the statement's index variables into a
//!    loop forest from the operand and result storage orders.
//! 2. [`Iterators`] gives every `(tensor path, level)` an iterator object
//!    exposing its level kind's capability set.
//! 3. Per index variable, a [`MergeLattice`] enumerates the co-iteration
//!    cases over the operands that range over it.
//! 4. [`lower`] drives the recursion: one loop per lattice point, guarded
//!    cases per sub-lattice point, result assembly, and value computation.
//!
//! The produced [`Function`](tensorloom_ir::ir::Function) is an IR tree;
//! printing or JIT-compiling it is the backend's concern.
//!
//! # Quick Start
//!
//! ```rust
//! use tensorloom_compiler::{lower, Property};
//! use tensorloom_ir::{Access, Assignment, Format, IndexExpr, IndexVar, TensorVar};
//!
//! let (i, j) = (IndexVar::new("i"), IndexVar::new("j"));
//! let y = TensorVar::new("y", Format::dense(1));
//! let a = TensorVar::new("A", Format::csr());
//! let x = TensorVar::new("x", Format::dense(1));
//!
//! // y(i) = A(i,j) * x(j)
//! let spmv = Assignment::new(
//!     Access::new(y, vec![i.clone()]),
//!     IndexExpr::mul(
//!         IndexExpr::access(a, vec![i, j.clone()]),
//!         IndexExpr::access(x, vec![j]),
//!     ),
//! );
//!
//! let kernel = lower(&spmv, "spmv", &[Property::Compute], 1 << 20).unwrap();
//! println!("{}", kernel);
//! ```

mod context;
mod expr_tools;
mod iteration_graph;
mod iterators;
mod lower;
mod merge_lattice;
mod tensor_path;


pub use context::{Ctx, NameGenerator, Property, Target};
pub use expr_tools::{available_expressions, project_exhausted, sub_expr};
pub use iteration_graph::IterationGraph;
pub use iterators::{IteratorId, IteratorNode, Iterators};
pub use lower::{is_lowerable, lower};
pub use merge_lattice::{exhausted_accesses, MergeLattice, MergePoint};
pub use tensor_path::{PathId, PathStep, TensorPath};
