use crate::atomic_arrays::AtomicArray2D;
use crate::cluster::Cluster;
use crate::slic::search_region;
use rayon::prelude::*;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Every cluster keeps at most this many boundary neighbors. Superpixels are
/// roughly planar, so their degree rarely gets anywhere near this.
const MAX_CONNECTIVITY: usize = 12;

/// Undirected cluster adjacency list.
///
/// Stored as two flat arrays: a prefix-sum offset table and one concatenated
/// neighbor-id array. `offsets[k]..offsets[k + 1]` indexes the neighbors of
/// cluster `k`.
#[derive(Debug)]
pub struct Connectivity {
    pub num_nodes: u16,
    offsets: Vec<u32>,
    neighbors: Vec<u16>,
}

impl Connectivity {
    fn from_lists(lists: Vec<Vec<u16>>) -> Self {
        let mut offsets = Vec::with_capacity(lists.len() + 1);
        offsets.push(0u32);
        let mut neighbors = Vec::with_capacity(lists.iter().map(Vec::len).sum());
        for list in &lists {
            neighbors.extend_from_slice(list);
            offsets.push(neighbors.len() as u32);
        }
        Connectivity {
            num_nodes: lists.len() as u16,
            offsets,
            neighbors,
        }
    }

    pub fn num_neighbors(&self, node: u16) -> usize {
        self.neighbors(node).len()
    }

    pub fn neighbors(&self, node: u16) -> &[u16] {
        let node = node as usize;
        &self.neighbors[self.offsets[node] as usize..self.offsets[node + 1] as usize]
    }
}

/// `h(s, t) == h(t, s)`, so one probe covers the edge in both directions.
#[inline(always)]
fn symmetric_int_hash(x: u32, y: u32) -> u32 {
    (x.wrapping_mul(0x1f1f1f1f) ^ y).wrapping_add(y.wrapping_mul(0x1f1f1f1f) ^ x)
}

/// Builds the boundary adjacency of a finished label map.
///
/// Scans each pixel against its right, lower and lower-right neighbor and
/// records every pair of distinct labels. A `32 * K` bit bitmap indexed by the
/// symmetric hash filters out edges seen before; a set bit can collide, so
/// membership is confirmed by scanning both endpoints' lists before skipping.
/// Pixels with labels outside `0..num_clusters` are ignored.
pub fn get_connectivity(
    assignments: &AtomicArray2D<AtomicU32>,
    num_clusters: u16,
) -> Connectivity {
    let k = num_clusters as usize;
    let width = assignments.width;
    let words = assignments.as_slice();
    let mut num_neighbors = vec![0usize; k];
    let mut neighbor_lists = vec![0u16; k * MAX_CONNECTIVITY];
    let mut hashtable = vec![0u32; k];

    for i in 0..assignments.height.saturating_sub(1) {
        for j in 0..width.saturating_sub(1) {
            let base_index = width * i + j;
            let source = words[base_index].load(Ordering::Relaxed);
            if source >= k as u32 {
                continue;
            }
            for target_index in [base_index + 1, base_index + width, base_index + width + 1] {
                let target = words[target_index].load(Ordering::Relaxed);
                if target >= k as u32 || source == target {
                    continue;
                }
                let (s, t) = (source as usize, target as usize);
                if num_neighbors[s] >= MAX_CONNECTIVITY || num_neighbors[t] >= MAX_CONNECTIVITY {
                    continue;
                }
                let hash_idx =
                    (symmetric_int_hash(source, target) % (k as u32 * 32)) as usize;
                if hashtable[hash_idx / 32] & (1u32 << (hash_idx % 32)) != 0 {
                    let exists = neighbor_lists
                        [s * MAX_CONNECTIVITY..s * MAX_CONNECTIVITY + num_neighbors[s]]
                        .contains(&(target as u16))
                        || neighbor_lists
                            [t * MAX_CONNECTIVITY..t * MAX_CONNECTIVITY + num_neighbors[t]]
                            .contains(&(source as u16));
                    if exists {
                        continue;
                    }
                }
                neighbor_lists[t * MAX_CONNECTIVITY + num_neighbors[t]] = source as u16;
                num_neighbors[t] += 1;
                neighbor_lists[s * MAX_CONNECTIVITY + num_neighbors[s]] = target as u16;
                num_neighbors[s] += 1;
                hashtable[hash_idx / 32] |= 1u32 << (hash_idx % 32);
            }
        }
    }

    Connectivity::from_lists(
        (0..k)
            .map(|s| {
                neighbor_lists[s * MAX_CONNECTIVITY..s * MAX_CONNECTIVITY + num_neighbors[s]]
                    .to_vec()
            })
            .collect(),
    )
}

/// For each cluster, up to `num_neighbors` nearest other clusters by centroid
/// L1 distance.
///
/// Clusters are binned into a grid of cell side _S_ and only a `[c-3, c+3)`
/// block of cells around a cluster's own cell is searched, so true nearest
/// neighbors can be missed where clusters are sparse. That is accepted: the
/// result is a local adjacency hint, not an exact KNN answer.
pub fn knn_connectivity(
    width: usize,
    height: usize,
    clusters: &[Cluster],
    num_neighbors: usize,
) -> Connectivity {
    let s = search_region(width, height, clusters.len() as u16) as usize;
    let nh = height.div_ceil(s);
    let nw = width.div_ceil(s);

    let mut cells: Vec<Vec<u16>> = vec![Vec::new(); nh * nw];
    for cluster in clusters {
        cells[(cluster.y as usize / s) * nw + (cluster.x as usize / s)].push(cluster.number);
    }

    let lists: Vec<Vec<u16>> = clusters
        .par_iter()
        .map(|cluster| {
            let cell_center_y = cluster.y as usize / s;
            let cell_center_x = cluster.x as usize / s;
            // Max-heap on distance; the worst candidate is dropped first.
            let mut heap: BinaryHeap<(u32, u16)> = BinaryHeap::new();
            for cy in cell_center_y.saturating_sub(3)..(cell_center_y + 3).min(nh) {
                for cx in cell_center_x.saturating_sub(3)..(cell_center_x + 3).min(nw) {
                    for number in &cells[cy * nw + cx] {
                        if *number == cluster.number {
                            continue;
                        }
                        let cluster_around = &clusters[*number as usize];
                        let distance = (cluster_around.x.abs_diff(cluster.x)
                            + cluster_around.y.abs_diff(cluster.y))
                            as u32;
                        if let Some((worst, _)) = heap.peek() {
                            if *worst <= distance {
                                continue;
                            }
                        }
                        heap.push((distance, *number));
                        while heap.len() > num_neighbors {
                            heap.pop();
                        }
                    }
                }
            }
            heap.into_iter().map(|(_, number)| number).collect()
        })
        .collect();

    Connectivity::from_lists(lists)
}
