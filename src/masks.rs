use crate::atomic_arrays::AtomicArray2D;
use crate::cluster::Cluster;
use crate::common::Error;
use std::sync::atomic::{AtomicU32, Ordering};

/// Mean of an 8-bit per-pixel mask over every cluster's members.
///
/// The divisor is the cluster's `num_members` (clamped to at least one), so
/// the descriptors must match the label map; `slic::iterate` leaves them in
/// that state. The result saturates to 255. Pixels with a label outside
/// `0..clusters.len()` contribute nothing.
pub fn get_mask_density(
    clusters: &[Cluster],
    assignments: &AtomicArray2D<AtomicU32>,
    mask: &[u8],
) -> Result<Vec<u8>, Error> {
    if mask.len() != assignments.len() {
        return Err(Error::DimensionMismatch {
            expected: assignments.len(),
            actual: mask.len(),
        });
    }
    let mut sums = vec![0u32; clusters.len()];
    for (word, mask_value) in assignments.as_slice().iter().zip(mask) {
        let label = word.load(Ordering::Relaxed) as usize;
        if label < sums.len() {
            sums[label] += *mask_value as u32;
        }
    }
    Ok(clusters
        .iter()
        .map(|cluster| {
            (sums[cluster.number as usize] / cluster.num_members.max(1)).min(255) as u8
        })
        .collect())
}

/// Broadcasts per-cluster 8-bit values back over the label map.
///
/// Pixels with a label outside `0..densities.len()` become 0.
pub fn cluster_density_to_mask(
    assignments: &AtomicArray2D<AtomicU32>,
    densities: &[u8],
) -> Vec<u8> {
    assignments
        .as_slice()
        .iter()
        .map(|word| {
            let label = word.load(Ordering::Relaxed) as usize;
            if label < densities.len() {
                densities[label]
            } else {
                0
            }
        })
        .collect()
}
