use crate::arrays::RgbImage;
use crate::assign::UNASSIGNED_LABEL;
use crate::atomic_arrays::AtomicArray2D;
use crate::common::{split_length_to_ranges, Config};
use crate::slic::Clusters;
use assume::assume;
use multiversion::multiversion;
use rayon::current_num_threads;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};

/// Flat view of the connected components found by `DisjointSet::flatten()`.
///
/// Components are numbered in the order of their leaders (the smallest pixel
/// index of the component), so a component's number is always larger than the
/// numbers of the components left of and above its leader.
#[derive(Debug)]
pub struct ComponentSet {
    pub(crate) component_assignment: Vec<u32>,
    pub(crate) num_component_members: Vec<u32>,
    pub(crate) component_leaders: Vec<u32>,
}

/// Union-find over pixel indices.
///
/// Parent pointers only ever decrease: `merge` hangs the higher-numbered root
/// below the lower one, so a root index never exceeds the indices of its
/// members. `flatten` depends on that ordering.
pub struct DisjointSet {
    parents: Vec<AtomicU32>,
}

impl DisjointSet {
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "disjoint set needs at least one node");
        assert!(len < u32::MAX as usize, "node indices must fit in u32");
        DisjointSet {
            parents: (0..len as u32).map(AtomicU32::new).collect(),
        }
    }

    /// Follows parent pointers up to the root, halving the path on the way
    /// so later walks from the same region stay short.
    fn root_of(&self, start: u32) -> u32 {
        let mut node = start;
        let mut parent = self.parents[node as usize].load(Ordering::Relaxed);
        while parent != node {
            assume!(unsafe: (parent as usize) < self.parents.len(), "parent: {parent} > {}", self.parents.len());
            let grandparent = self.parents[parent as usize].load(Ordering::Relaxed);
            self.parents[node as usize].store(grandparent, Ordering::Relaxed);
            node = parent;
            parent = grandparent;
        }
        node
    }

    /// Joins the trees containing the two nodes.
    #[inline]
    pub fn merge(&self, node_a: u32, node_b: u32) {
        let root_a = self.root_of(node_a);
        let root_b = self.root_of(node_b);
        if root_a == root_b {
            return;
        }
        let (low, high) = if root_a < root_b {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        self.parents[high as usize].store(low, Ordering::Relaxed);
    }

    /// Numbers the components and counts their members.
    ///
    /// A single ascending sweep is enough: `parents[i] <= i` holds after any
    /// sequence of merges, so the parent of every non-root node is already
    /// numbered when the node is visited.
    pub fn flatten(&self) -> ComponentSet {
        let len = self.parents.len();
        let mut component_assignment = vec![u32::MAX; len];
        let mut num_component_members: Vec<u32> = Vec::new();
        let mut component_leaders: Vec<u32> = Vec::new();
        for i in 0..len {
            let parent = self.parents[i].load(Ordering::Relaxed) as usize;
            assume!(unsafe: parent < len, "parent: {parent} > {len}");
            if parent == i {
                component_assignment[i] = component_leaders.len() as u32;
                component_leaders.push(i as u32);
                num_component_members.push(1);
            } else {
                let component_no = component_assignment[parent];
                assume!(unsafe: (component_no as usize) < num_component_members.len(), "component_no: {component_no} > {}", num_component_members.len());
                component_assignment[i] = component_no;
                num_component_members[component_no as usize] += 1;
            }
        }
        ComponentSet {
            component_assignment,
            num_component_members,
            component_leaders,
        }
    }
}

/// Merges 4-connected pixels with equal labels into components.
#[multiversion(targets = "simd")]
pub fn assign_disjoint_set(assignments: &AtomicArray2D<AtomicU32>) -> DisjointSet {
    let width = assignments.width;
    let set = DisjointSet::new(assignments.len());
    let num_threads = current_num_threads().min(assignments.height);
    let row_bands = split_length_to_ranges(assignments.height, num_threads);
    let seam_rows: Vec<usize> = row_bands.iter().skip(1).map(|band| band.start).collect();

    // Inside a band every row merges with its left and upper neighbors. The
    // band's first row skips the upper pass, so no two workers ever touch
    // the same tree.
    row_bands.into_par_iter().for_each(|band| {
        let first_row = band.start;
        for row_num in band {
            let row = assignments.get_row(row_num);
            let row_base = (width * row_num) as u32;
            merge_equal_left(&set, row, row_base);
            if row_num > first_row {
                merge_equal_up(&set, row, assignments.get_row(row_num - 1), row_base);
            }
        }
    });

    // Stitch the seams between the bands.
    for seam_row in seam_rows {
        merge_equal_up(
            &set,
            assignments.get_row(seam_row),
            assignments.get_row(seam_row - 1),
            (width * seam_row) as u32,
        );
    }
    set
}

#[inline(always)]
fn merge_equal_left(set: &DisjointSet, row: &[AtomicU32], row_base: u32) {
    for (offset, pair) in row.windows(2).enumerate() {
        if pair[0].load(Ordering::Relaxed) == pair[1].load(Ordering::Relaxed) {
            let index = row_base + offset as u32;
            set.merge(index, index + 1);
        }
    }
}

#[inline(always)]
fn merge_equal_up(set: &DisjointSet, row: &[AtomicU32], row_above: &[AtomicU32], row_base: u32) {
    let width = row.len() as u32;
    for (offset, (label, label_above)) in row.iter().zip(row_above).enumerate() {
        if label.load(Ordering::Relaxed) == label_above.load(Ordering::Relaxed) {
            let index = row_base + offset as u32;
            set.merge(index - width, index);
        }
    }
}

/// This function implements the CCA step.
///
/// Components smaller than `min_size_factor * (width * height / K)` take the
/// label of the component left of (or above) their leader; larger components
/// keep their own label, so surviving cluster numbers are preserved.
pub fn enforce_connectivity(clusters: &mut Clusters, image: &RgbImage, config: &Config) {
    let min_threshold = ((image.width * image.height / config.num_of_clusters as usize) as f32
        * config.min_size_factor)
        .round() as u32;

    let disjoint_set = assign_disjoint_set(&clusters.assignments);
    let cc_set = disjoint_set.flatten();

    let num_components = cc_set.component_leaders.len();
    let mut substitute = vec![UNASSIGNED_LABEL; num_components];
    for component_no in 0..num_components {
        let leader_index = cc_set.component_leaders[component_no] as usize;
        let own_label = clusters.assignments.as_slice()[leader_index].load(Ordering::Relaxed) as u16;
        if cc_set.num_component_members[component_no] >= min_threshold {
            substitute[component_no] = own_label;
            continue;
        }
        // The neighboring component's leader sits at a smaller index, so its
        // substitute is already resolved.
        substitute[component_no] = if leader_index % image.width > 0 {
            substitute
                [cc_set.component_assignment[leader_index - 1] as usize]
        } else if leader_index >= image.width {
            substitute
                [cc_set.component_assignment[leader_index - image.width] as usize]
        } else {
            own_label
        };
    }

    // Relabeling
    let output_chunks_ranges =
        split_length_to_ranges(clusters.assignments.len(), current_num_threads());
    output_chunks_ranges.into_par_iter().for_each(|r| {
        (r.start..).zip(&clusters.assignments.as_slice()[r.clone()]).for_each(|(i, label)| {
            assume!(unsafe: i < cc_set.component_assignment.len(), "i: {i} > {}", cc_set.component_assignment.len());
            let component_assignment = cc_set.component_assignment[i] as usize;
            assume!(unsafe: component_assignment < substitute.len(), "i: {i}, component_assignment: {} > {}", component_assignment, substitute.len());
            label.store(substitute[component_assignment] as u32, Ordering::Relaxed)
        })
    });
}
