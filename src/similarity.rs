//! Overlap scoring between a reference structure and a user contour.
//!
//! Masks travel as flat C-order voxel indices (slice, row, column), the same
//! compressed form the viewer posts for grading.

use std::collections::HashSet;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SimilarityError {
    #[error("mask shapes must match, got {reference:?} and {user:?}")]
    ShapeMismatch {
        reference: MaskShape,
        user: MaskShape,
    },
    #[error("mask shape {0:?} has more voxels than fit in memory")]
    ShapeTooLarge(MaskShape),
}

/// Volume dimensions as (depth, height, width).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskShape {
    pub depth: usize,
    pub height: usize,
    pub width: usize,
}

impl MaskShape {
    pub const fn new(depth: usize, height: usize, width: usize) -> Self {
        Self {
            depth,
            height,
            width,
        }
    }

    /// `None` when the product overflows.
    pub fn voxel_count(&self) -> Option<usize> {
        self.depth
            .checked_mul(self.height)?
            .checked_mul(self.width)
    }

    pub fn contains(&self, z: usize, y: usize, x: usize) -> bool {
        z < self.depth && y < self.height && x < self.width
    }

    /// Splits a flat index into (slice, row, column).
    pub fn unravel(&self, index: u64) -> Option<(usize, usize, usize)> {
        let plane = self.height.checked_mul(self.width)? as u64;
        if plane == 0 {
            return None;
        }
        let z = index / plane;
        let remainder = index % plane;
        let y = remainder / self.width as u64;
        let x = remainder % self.width as u64;
        if z < self.depth as u64 {
            Some((z as usize, y as usize, x as usize))
        } else {
            None
        }
    }
}

/// Binary volume.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    shape: MaskShape,
    voxels: Vec<bool>,
}

impl Mask {
    pub fn empty(shape: MaskShape) -> Result<Self, SimilarityError> {
        let count = shape
            .voxel_count()
            .ok_or(SimilarityError::ShapeTooLarge(shape))?;
        Ok(Self {
            shape,
            voxels: vec![false; count],
        })
    }

    pub fn shape(&self) -> MaskShape {
        self.shape
    }

    /// Out-of-range coordinates read as background.
    pub fn get(&self, z: usize, y: usize, x: usize) -> bool {
        if !self.shape.contains(z, y, x) {
            return false;
        }
        let offset = (z * self.shape.height + y) * self.shape.width + x;
        self.voxels.get(offset).copied().unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.voxels.iter().filter(|v| **v).count()
    }
}

/// Rebuilds a full volume from non-zero indices. Indices outside the
/// volume are skipped.
pub fn reconstruct_mask(indices: &[u64], shape: MaskShape) -> Result<Mask, SimilarityError> {
    let mut mask = Mask::empty(shape)?;
    if indices.is_empty() {
        warn!("No indices provided, returning empty mask");
        return Ok(mask);
    }

    let mut skipped = 0usize;
    for &index in indices {
        match shape.unravel(index) {
            Some((z, y, x)) => {
                let offset = (z * shape.height + y) * shape.width + x;
                mask.voxels[offset] = true;
            }
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!("{} indices out of bounds for {:?}, skipped", skipped, shape);
    }
    debug!("Reconstructed mask has {} non-zero voxels", mask.count());
    Ok(mask)
}

/// Dice coefficient `2|A∩B| / (|A|+|B|)`. Two empty masks agree perfectly.
pub fn dice_score(reference: &Mask, user: &Mask) -> Result<f64, SimilarityError> {
    if reference.shape != user.shape {
        return Err(SimilarityError::ShapeMismatch {
            reference: reference.shape,
            user: user.shape,
        });
    }

    let mut intersection = 0usize;
    let mut reference_count = 0usize;
    let mut user_count = 0usize;
    for (r, u) in reference.voxels.iter().zip(user.voxels.iter()) {
        if *r {
            reference_count += 1;
        }
        if *u {
            user_count += 1;
        }
        if *r && *u {
            intersection += 1;
        }
    }

    Ok(coefficient(intersection, reference_count, user_count))
}

/// Dice over deduplicated index sets, without materializing the volume.
pub fn dice_from_indices(reference: &[u64], user: &[u64]) -> f64 {
    let reference: HashSet<u64> = reference.iter().copied().collect();
    let user: HashSet<u64> = user.iter().copied().collect();
    let intersection = reference.intersection(&user).count();

    debug!(
        "Dice over indices: reference={}, user={}, intersection={}",
        reference.len(),
        user.len(),
        intersection
    );

    coefficient(intersection, reference.len(), user.len())
}

fn coefficient(intersection: usize, reference: usize, user: usize) -> f64 {
    if reference + user == 0 {
        return 1.0;
    }
    (2.0 * intersection as f64) / (reference + user) as f64
}
