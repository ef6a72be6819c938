//! Tensor storage formats: per-dimension level kinds and their capabilities.

use serde::{Deserialize, Serialize};

use crate::error::IrError;

/// Storage kind of one tensor level.
///
/// A format assigns one kind to each storage dimension. The kind determines
/// which index arrays the level keeps at runtime and which capabilities the
/// lowering engine may use when iterating or assembling it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LevelKind {
    /// The level stores only its dimension size; every coordinate in
    /// `[0, size)` is present.
    Dense,
    /// The level stores a `pos` segment array and an `idx` coordinate array
    /// (CSR-style), keeping only the nonzero coordinates.
    Sparse,
    /// Like `Sparse`, but every segment has the same length, padded with
    /// repeated coordinates (ELL-style). Padding makes coordinates
    /// non-unique within a segment.
    Fixed,
    /// Reserved; not supported by the lowering engine.
    Offset,
    /// Reserved; not supported by the lowering engine.
    Replicated,
}

impl LevelKind {
    /// The level produces coordinate values over a contiguous range.
    pub fn has_coord_val_iter(self) -> bool {
        matches!(self, LevelKind::Dense)
    }

    /// The level produces `(position, coordinate)` pairs from a parent
    /// position.
    pub fn has_coord_pos_iter(self) -> bool {
        matches!(self, LevelKind::Sparse | LevelKind::Fixed)
    }

    /// Given a coordinate, the level can compute the child position in O(1).
    pub fn has_locate(self) -> bool {
        matches!(self, LevelKind::Dense)
    }

    /// The level supports `(pos, coord)` random writes during assembly.
    pub fn has_insert(self) -> bool {
        matches!(self, LevelKind::Dense)
    }

    /// The level supports append-only emission of coordinates.
    pub fn has_append(self) -> bool {
        matches!(self, LevelKind::Sparse)
    }

    /// Coordinates within any segment are distinct.
    pub fn is_unique(self) -> bool {
        matches!(self, LevelKind::Dense | LevelKind::Sparse)
    }

    /// The level iterates exactly over `[0, size)` with no gaps.
    pub fn is_full(self) -> bool {
        matches!(self, LevelKind::Dense)
    }

    /// The level has at most one child segment entry per parent position.
    pub fn is_branchless(self) -> bool {
        false
    }

    /// Whether the lowering engine implements this kind.
    pub fn is_supported(self) -> bool {
        !matches!(self, LevelKind::Offset | LevelKind::Replicated)
    }
}

/// An ordered sequence of level kinds plus a permutation from storage
/// dimension order to logical dimension order.
///
/// `order[s] = d` means storage level `s` iterates logical dimension `d`.
/// The identity permutation stores dimensions in the order they are
/// accessed; CSC, for example, is `[Dense, Sparse]` with order `[1, 0]`.
///
/// # Examples
///
/// ```
/// use tensorloom_ir::{Format, LevelKind};
///
/// let csr = Format::csr();
/// assert_eq!(csr.level(0), LevelKind::Dense);
/// assert_eq!(csr.level(1), LevelKind::Sparse);
/// assert_eq!(csr.order(), &[0, 1]);
///
/// let csc = Format::csc();
/// assert_eq!(csc.order(), &[1, 0]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Format {
    levels: Vec<LevelKind>,
    order: Vec<usize>,
}

impl Format {
    /// Format with the given level kinds and the identity permutation.
    pub fn new(levels: Vec<LevelKind>) -> Self {
        let order = (0..levels.len()).collect();
        Format { levels, order }
    }

    /// Format with an explicit storage-to-logical dimension permutation.
    pub fn with_order(levels: Vec<LevelKind>, order: Vec<usize>) -> Result<Self, IrError> {
        let mut seen = vec![false; levels.len()];
        let valid = order.len() == levels.len()
            && order.iter().all(|&d| {
                if d < seen.len() && !seen[d] {
                    seen[d] = true;
                    true
                } else {
                    false
                }
            });
        if !valid {
            return Err(IrError::InvalidFormatOrder {
                order,
                levels: levels.len(),
            });
        }
        Ok(Format { levels, order })
    }

    /// All-dense format of the given order.
    pub fn dense(order: usize) -> Self {
        Format::new(vec![LevelKind::Dense; order])
    }

    /// All-sparse format of the given order (DCSR for matrices).
    pub fn sparse(order: usize) -> Self {
        Format::new(vec![LevelKind::Sparse; order])
    }

    /// Compressed sparse row: dense rows over sparse columns.
    pub fn csr() -> Self {
        Format::new(vec![LevelKind::Dense, LevelKind::Sparse])
    }

    /// Compressed sparse column: CSR with the dimensions swapped.
    pub fn csc() -> Self {
        Format::with_order(vec![LevelKind::Dense, LevelKind::Sparse], vec![1, 0])
            .expect("[1, 0] is a permutation")
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn levels(&self) -> &[LevelKind] {
        &self.levels
    }

    pub fn level(&self, storage_level: usize) -> LevelKind {
        self.levels[storage_level]
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// The logical dimension iterated by the given storage level.
    pub fn dimension_of(&self, storage_level: usize) -> usize {
        self.order[storage_level]
    }

    pub fn is_all_dense(&self) -> bool {
        self.levels.iter().all(|l| l.is_full())
    }
}
