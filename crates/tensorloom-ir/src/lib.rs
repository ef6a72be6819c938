//! # Tensorloom IR
//!
//! Index notation and imperative IR for the tensorloom sparse-tensor-algebra
//! compiler.
//!
//! This crate is the foundational layer the compiler builds on. It defines
//! both ends of the lowering pipeline:
//!
//! - **Index notation** ([`IndexExpr`], [`Access`], [`Assignment`]): the
//!   producer-facing expression tree over typed tensor variables, e.g.
//!   `A(i,j) = B(i,k) * C(k,j)`.
//! - **Formats** ([`Format`], [`LevelKind`]): per-dimension storage kinds
//!   (dense, sparse, fixed) with the capability sets the lowering engine
//!   dispatches through.
//! - **Imperative IR** ([`ir`]): the loop-nest tree the lowering engine
//!   emits — loops, merges, stores, allocations — consumed by a backend
//!   printer or JIT.
//!
//! ## Quick Start
//!
//! ```rust
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
//! assert_eq!(spmv.reduction_vars().len(), 1);
//! ```

mod error;
mod expr;
mod format;
pub mod ir;
mod rewrite;


pub use error::IrError;
pub use expr::{Access, Assignment, IndexExpr, IndexVar, TensorVar};
pub use format::{Format, LevelKind};
pub use rewrite::replace;
