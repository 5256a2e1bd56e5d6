use crate::arrays::RgbImage;
use crate::atomic_arrays::AtomicArray2D;
use crate::cluster::Cluster;
use crate::common::{split_length_to_ranges, Config};
use crate::slic::Clusters;
use multiversion::multiversion;
use rayon::current_num_threads;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};

/// Assignment word of a pixel no cluster has claimed yet.
pub(crate) const UNASSIGNED_WORD: u32 = 0xFFFF_FFFF;
/// Low 16 bits of an assignment word: the cluster number.
pub(crate) const LABEL_MASK: u32 = 0x0000_FFFF;
/// Label of a pixel outside every cluster's search window.
pub const UNASSIGNED_LABEL: u16 = 0xFFFF;

/// This function implements the assign step in SLIC algorithm.
///
/// Every assignment word is reset to `0xFFFFFFFF`, then each cluster scans its
/// clipped `2S+1 x 2S+1` window and folds
/// `(color_dist + spatial_dist) << 16 | number` into the per-pixel word with
/// an atomic min. The distance sits in the high 16 bits, so the unsigned min
/// is a lexicographic compare on (distance, cluster number) and ties go to the
/// lower cluster number. After the sweep only the low label bits are kept.
#[multiversion(targets = "simd")]
pub fn assign(
    image: &RgbImage,
    config: &Config,
    clusters: &mut Clusters,
    spatial_distance_lut: &[u16],
    search_region_size: u16,
) {
    let num_threads = current_num_threads();
    let word_ranges = split_length_to_ranges(clusters.assignments.len(), num_threads);
    word_ranges.into_par_iter().for_each(|range| {
        clusters.assignments.as_slice()[range]
            .iter()
            .for_each(|word| word.store(UNASSIGNED_WORD, Ordering::Relaxed))
    });

    // Sorting clusters by morton order of their grid cell distributes
    // spatially coherent clusters evenly between the workers.
    let mut order: Vec<(u32, u16)> = clusters
        .clusters
        .iter()
        .map(|c| {
            (
                morton_score(c.y / search_region_size, c.x / search_region_size),
                c.number,
            )
        })
        .collect();
    order.sort_unstable();

    rayon::scope(|s| {
        let assignments = &clusters.assignments;
        let cluster_slice = clusters.clusters.as_slice();
        for range in split_length_to_ranges(order.len(), num_threads) {
            let order_part = &order[range];
            s.spawn(move |_| {
                for (_, number) in order_part {
                    assign_cluster(
                        &cluster_slice[*number as usize],
                        image,
                        assignments,
                        spatial_distance_lut,
                        search_region_size,
                        config.quantize_level,
                    );
                }
            });
        }
    });

    let word_ranges = split_length_to_ranges(clusters.assignments.len(), num_threads);
    word_ranges.into_par_iter().for_each(|range| {
        clusters.assignments.as_slice()[range]
            .iter()
            .for_each(|word| {
                word.fetch_and(LABEL_MASK, Ordering::Relaxed);
            })
    });
}

/// Walks one cluster's window row by row. Within a row the Manhattan distance
/// falls by one per step towards the center column and rises by one past it,
/// so the left half zips against the reversed LUT slice and the right half
/// against the forward one.
#[inline(always)]
fn assign_cluster(
    cluster: &Cluster,
    image: &RgbImage,
    assignments: &AtomicArray2D<AtomicU32>,
    spatial_distance_lut: &[u16],
    search_region_size: u16,
    quantize_level: u8,
) {
    let cy = cluster.y as usize;
    let cx = cluster.x as usize;
    let y_lo = cluster.top(search_region_size);
    let y_hi = cluster.bottom(image, search_region_size);
    let x_lo = cluster.left(search_region_size);
    let x_hi = cluster.right(image, search_region_size);
    let left_len = cx - x_lo;
    let cluster_color = [cluster.r, cluster.g, cluster.b];

    for i in y_lo..y_hi {
        let dy = cy.abs_diff(i);
        let image_row = image.get_row_part(i, x_lo, x_hi - 1);
        let assign_row = &assignments.get_row(i)[x_lo..x_hi];
        debug_assert_eq!(image_row.len(), assign_row.len() * 3);
        debug_assert!(dy + left_len <= spatial_distance_lut.len());
        debug_assert!(dy + (x_hi - cx) <= spatial_distance_lut.len());

        assign_span(
            &image_row[..3 * left_len],
            &assign_row[..left_len],
            spatial_distance_lut[dy + 1..dy + 1 + left_len].iter().rev(),
            &cluster_color,
            cluster.number,
            quantize_level,
        );
        assign_span(
            &image_row[3 * left_len..],
            &assign_row[left_len..],
            spatial_distance_lut[dy..dy + (x_hi - cx)].iter(),
            &cluster_color,
            cluster.number,
            quantize_level,
        );
    }
}

#[inline(always)]
fn assign_span<'a>(
    pixels: &[u8],
    words: &[AtomicU32],
    spatial_dists: impl Iterator<Item = &'a u16>,
    cluster_color: &[u16; 3],
    cluster_number: u16,
    quantize_level: u8,
) {
    for ((pixel, word), spatial_dist) in pixels.chunks_exact(3).zip(words).zip(spatial_dists) {
        let color_dist = (pixel[0] as u16).abs_diff(cluster_color[0])
            + (pixel[1] as u16).abs_diff(cluster_color[1])
            + (pixel[2] as u16).abs_diff(cluster_color[2]);
        let color_dist = ((color_dist as u32) << quantize_level).min(LABEL_MASK) as u16;
        let dist = color_dist.saturating_add(*spatial_dist);
        let val = ((dist as u32) << 16) | cluster_number as u32;
        word.fetch_min(val, Ordering::Relaxed);
    }
}

#[inline(always)]
fn interleave_u16(mut n: u32) -> u32 {
    n &= 0x0000_ffff;
    n = (n ^ (n << 8)) & 0x00ff_00ff;
    n = (n ^ (n << 4)) & 0x0f0f_0f0f;
    n = (n ^ (n << 2)) & 0x3333_3333;
    n = (n ^ (n << 1)) & 0x5555_5555;
    n
}

/// Z-order curve key of a cluster's grid cell.
#[inline(always)]
pub(crate) fn morton_score(cell_y: u16, cell_x: u16) -> u32 {
    (interleave_u16(cell_y as u32) << 1) | interleave_u16(cell_x as u32)
}
