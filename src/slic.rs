use crate::arrays::RgbImage;
use crate::assign::{assign, UNASSIGNED_LABEL, UNASSIGNED_WORD};
use crate::atomic_arrays::AtomicArray2D;
use crate::cluster::Cluster;
use crate::common::{split_length_to_ranges, Config, Error};
use crate::conectivity::enforce_connectivity;
use multiversion::multiversion;
use rayon::current_num_threads;
use std::array;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

/// Convenient struct for passing values around.
#[derive(Debug)]
pub struct Clusters {
    /// For every pixel in image this stores to which cluster it belongs
    /// (see `Cluster.number`). During the assign sweep the high 16 bits hold
    /// the packed distance; between steps only the label remains.
    pub assignments: AtomicArray2D<AtomicU32>,
    pub clusters: Vec<Cluster>,
}

impl Clusters {
    /// Default initialize clusters function.
    ///
    /// Seeds `num_of_clusters` clusters on a regular grid with colors sampled
    /// from the image. For custom implementations the needed filled fields in
    /// new cluster are `x`, `y`, `r`, `g`, `b` and unique `number` used as an
    /// identification.
    pub fn initialize_clusters(image: &RgbImage, config: &Config) -> Result<Clusters, Error> {
        config.validate()?;
        if image.width * image.height < config.num_of_clusters as usize {
            return Err(Error::InvalidArgument {
                reason: "num_of_clusters exceeds the number of pixels",
            });
        }
        let mut clusters = Clusters {
            assignments: AtomicArray2D::filled(UNASSIGNED_WORD, image.width, image.height),
            clusters: Vec::with_capacity(config.num_of_clusters as usize),
        };
        let n_y = ((config.num_of_clusters as f32).sqrt() as u16).max(1);
        let mut n_xs: Vec<u16> = vec![config.num_of_clusters / n_y; n_y as usize];
        let mut remainder = config.num_of_clusters % n_y;
        let mut row = 0;
        while remainder > 0 {
            n_xs[row] += 1;
            row += 2;
            if row >= n_y as usize {
                row = 1;
            }
            remainder -= 1;
        }
        let h = image.height.div_ceil(n_y as usize);
        let mut acc_k: usize = 0;
        for i in (0..image.height).step_by(h) {
            let w = image
                .width
                .div_ceil(n_xs[std::cmp::min(i / h, (n_y - 1) as usize)] as usize);
            for j in (0..image.width).step_by(w) {
                if acc_k >= config.num_of_clusters as usize {
                    break;
                }
                let center_y = (i + h / 2).clamp(0, image.height - 1) as u16;
                let center_x = (j + w / 2).clamp(0, image.width - 1) as u16;
                let p = image.get_pixel(center_x as usize, center_y as usize);
                clusters.clusters.push(Cluster {
                    x: center_x,
                    y: center_y,
                    r: p[0] as u16,
                    g: p[1] as u16,
                    b: p[2] as u16,
                    number: acc_k as u16,
                    ..Cluster::default()
                });
                acc_k += 1;
            }
        }
        while acc_k < config.num_of_clusters as usize {
            let center_y = image.height as u16 / 2;
            let center_x = image.width as u16 / 2;
            let p = image.get_pixel(center_x as usize, center_y as usize);
            clusters.clusters.push(Cluster {
                x: center_x,
                y: center_y,
                r: p[0] as u16,
                g: p[1] as u16,
                b: p[2] as u16,
                number: acc_k as u16,
                ..Cluster::default()
            });
            acc_k += 1;
        }
        debug_assert_eq!(clusters.clusters.len(), config.num_of_clusters as usize);
        Ok(clusters)
    }
}

/// Nominal superpixel side length _S_.
pub fn search_region(width: usize, height: usize, num_of_clusters: u16) -> u16 {
    (((width * height / num_of_clusters as usize) as f64).sqrt() as u16).max(1)
}

/// This function computes the LUT for spatial distances.
///
/// Entry `m` holds the quantized penalty of Manhattan distance `m` from the
/// cluster center, for `m` in `0..=2S`:
/// `round(compactness * m * (1 << quantize_level) / S)`, saturated to `u16`.
/// The table is read-only afterwards and shared between all workers.
pub fn compute_spatial_distance_lut(config: &Config, search_region_size: u16) -> Vec<u16> {
    let coef = config.compactness * (1u32 << config.quantize_level) as f32
        / search_region_size as f32;
    (0..=2 * search_region_size as usize)
        .map(|m| (coef * m as f32).round().min(u16::MAX as f32) as u16)
        .collect()
}

/// This function does the update step.
///
/// Instead of median, average is used for the performance.
#[multiversion(targets = "simd")]
pub fn update(clusters: &mut Clusters, image: &RgbImage, config: &Config) {
    let num_cluster_members: Vec<AtomicU32> =
        Vec::from_iter((0..config.num_of_clusters).map(|_| AtomicU32::new(0)));
    let cluster_acc_vec: Vec<[AtomicU32; 5]> =
        Vec::from_iter((0..config.num_of_clusters).map(|_| array::from_fn(|_| AtomicU32::new(0))));

    fn update_part(
        rows: Range<usize>,
        image: &RgbImage,
        assignments: &AtomicArray2D<AtomicU32>,
        config: &Config,
        num_cluster_members: &[AtomicU32],
        cluster_acc_vec: &[[AtomicU32; 5]],
    ) {
        let mut num_cluster_members_local: Vec<u32> = vec![0; config.num_of_clusters as usize];
        let mut cluster_acc_local: Vec<[u32; 5]> =
            vec![[0, 0, 0, 0, 0]; config.num_of_clusters as usize];
        for row in rows {
            let image_row = image.get_row(row);
            let assignments_row = assignments.get_row(row);
            for (column, (pixel, assignment)) in
                image_row.chunks_exact(3).zip(assignments_row).enumerate()
            {
                let cluster_n = assignment.load(Ordering::Relaxed) as u16;
                if cluster_n == UNASSIGNED_LABEL {
                    continue;
                }
                num_cluster_members_local[cluster_n as usize] += 1;
                cluster_acc_local[cluster_n as usize][0] += row as u32;
                cluster_acc_local[cluster_n as usize][1] += column as u32;
                cluster_acc_local[cluster_n as usize][2] += pixel[0] as u32;
                cluster_acc_local[cluster_n as usize][3] += pixel[1] as u32;
                cluster_acc_local[cluster_n as usize][4] += pixel[2] as u32;
            }
        }
        for (cluster_n, num_members) in num_cluster_members_local
            .into_iter()
            .enumerate()
            .filter(|(_, x)| *x != 0)
        {
            num_cluster_members[cluster_n].fetch_add(num_members, Ordering::Relaxed);
            for dim in 0..5 {
                cluster_acc_vec[cluster_n][dim]
                    .fetch_add(cluster_acc_local[cluster_n][dim], Ordering::Relaxed);
            }
        }
    }

    rayon::scope(|s| {
        let assignments = &clusters.assignments;
        let num_cluster_members = &num_cluster_members;
        let cluster_acc_vec = &cluster_acc_vec;
        for rows in split_length_to_ranges(image.height, current_num_threads()) {
            s.spawn(move |_| {
                update_part(
                    rows,
                    image,
                    assignments,
                    config,
                    num_cluster_members,
                    cluster_acc_vec,
                )
            })
        }
    });

    for cluster in clusters.clusters.iter_mut() {
        let cluster_num = cluster.number as usize;
        let cluster_members = num_cluster_members[cluster_num].load(Ordering::Relaxed);
        cluster.num_members = cluster_members;
        if cluster_members == 0 {
            continue;
        }
        let cluster_members_half = cluster_members / 2;
        let next_x = ((cluster_acc_vec[cluster_num][1].load(Ordering::Relaxed)
            + cluster_members_half)
            / cluster_members) as u16;
        let next_y = ((cluster_acc_vec[cluster_num][0].load(Ordering::Relaxed)
            + cluster_members_half)
            / cluster_members) as u16;
        debug_assert!(
            next_x < image.width as u16,
            "{:?} trying to update x which is out of bounds - x={next_x}",
            cluster,
        );
        debug_assert!(
            next_y < image.height as u16,
            "{:?} trying to update y which is out of bounds - y={next_y}",
            cluster,
        );
        cluster.y = next_y;
        cluster.x = next_x;
        cluster.r = ((cluster_acc_vec[cluster_num][2].load(Ordering::Relaxed)
            + cluster_members_half)
            / cluster_members) as u16;
        cluster.g = ((cluster_acc_vec[cluster_num][3].load(Ordering::Relaxed)
            + cluster_members_half)
            / cluster_members) as u16;
        cluster.b = ((cluster_acc_vec[cluster_num][4].load(Ordering::Relaxed)
            + cluster_members_half)
            / cluster_members) as u16;
    }
}

/// This function is the main loop.
///
/// The steps are generally:
/// - N iterations
///     - assign
///     - update
/// - enforce_connectivity (CCA)
/// - update (so `num_members` and the descriptors match the relabeled map)
///
/// Preconditions are checked before any caller-owned buffer is touched.
pub fn iterate(image: &RgbImage, config: &Config, clusters: &mut Clusters) -> Result<(), Error> {
    config.validate()?;
    if image.width * image.height < config.num_of_clusters as usize {
        return Err(Error::InvalidArgument {
            reason: "num_of_clusters exceeds the number of pixels",
        });
    }
    if clusters.clusters.len() != config.num_of_clusters as usize {
        return Err(Error::DimensionMismatch {
            expected: config.num_of_clusters as usize,
            actual: clusters.clusters.len(),
        });
    }
    if clusters.assignments.width != image.width || clusters.assignments.height != image.height {
        return Err(Error::DimensionMismatch {
            expected: image.width * image.height,
            actual: clusters.assignments.width * clusters.assignments.height,
        });
    }
    let search_region_size = search_region(image.width, image.height, config.num_of_clusters);
    let spatial_distance_lut = compute_spatial_distance_lut(config, search_region_size);
    for _ in 0..config.max_iterations {
        assign(image, config, clusters, &spatial_distance_lut, search_region_size);
        update(clusters, image, config);
    }
    if config.max_iterations == 0 {
        // The connectivity pass still needs a valid label map.
        assign(image, config, clusters, &spatial_distance_lut, search_region_size);
    }
    enforce_connectivity(clusters, image, config);
    update(clusters, image, config);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{compute_spatial_distance_lut, iterate, search_region, update, Clusters};
    use crate::arrays::RgbImage;
    use crate::common::{Config, Error};
    use std::sync::atomic::Ordering;

    fn labels(clusters: &Clusters) -> Vec<u16> {
        clusters
            .assignments
            .as_slice()
            .iter()
            .map(|w| w.load(Ordering::Relaxed) as u16)
            .collect()
    }

    #[test]
    fn initialize_clusters_test() {
        let buf: Vec<u8> = (0..16 * 16 * 3).map(|i| (i % 256) as u8).collect();
        let image = RgbImage::from_raw_slice(&buf, 16, 16).unwrap();
        let config = Config {
            num_of_clusters: 4,
            ..Config::default()
        };
        let clusters = Clusters::initialize_clusters(&image, &config).unwrap();
        assert_eq!(clusters.clusters.len(), 4);
        for (k, cluster) in clusters.clusters.iter().enumerate() {
            assert_eq!(cluster.number, k as u16);
            assert!((cluster.y as usize) < 16);
            assert!((cluster.x as usize) < 16);
            let p = image.get_pixel(cluster.x as usize, cluster.y as usize);
            assert_eq!([cluster.r, cluster.g, cluster.b], [
                p[0] as u16,
                p[1] as u16,
                p[2] as u16
            ]);
        }
        // One cluster is valid too.
        let single = Config {
            num_of_clusters: 1,
            ..Config::default()
        };
        let clusters = Clusters::initialize_clusters(&image, &single).unwrap();
        assert_eq!(clusters.clusters.len(), 1);
    }

    #[test]
    fn initialize_clusters_rejects_too_many_test() {
        let buf = vec![0u8; 4 * 4 * 3];
        let image = RgbImage::from_raw_slice(&buf, 4, 4).unwrap();
        let config = Config {
            num_of_clusters: 17,
            ..Config::default()
        };
        assert_eq!(
            Clusters::initialize_clusters(&image, &config).unwrap_err(),
            Error::InvalidArgument {
                reason: "num_of_clusters exceeds the number of pixels"
            }
        );
    }

    #[test]
    fn spatial_distance_lut_test() {
        let config = Config {
            compactness: 10.0,
            quantize_level: 7,
            ..Config::default()
        };
        let lut = compute_spatial_distance_lut(&config, 8);
        assert_eq!(lut.len(), 17);
        assert_eq!(lut[0], 0);
        // round(10 * m * 128 / 8) = 160 * m
        assert_eq!(lut[1], 160);
        assert_eq!(lut[16], 2560);
        // Saturates instead of wrapping.
        let extreme = Config {
            compactness: 1e6,
            quantize_level: 15,
            ..Config::default()
        };
        let lut = compute_spatial_distance_lut(&extreme, 2);
        assert_eq!(lut[4], u16::MAX);
    }

    #[test]
    fn update_means_and_empty_clusters_test() {
        let width = 4;
        let height = 2;
        let mut buf = vec![0u8; width * height * 3];
        // Left half dark, right half bright.
        for y in 0..height {
            for x in 2..width {
                let idx = (y * width + x) * 3;
                buf[idx] = 200;
                buf[idx + 1] = 100;
                buf[idx + 2] = 50;
            }
        }
        let image = RgbImage::from_raw_slice(&buf, width, height).unwrap();
        let config = Config {
            num_of_clusters: 3,
            ..Config::default()
        };
        let mut clusters = Clusters::initialize_clusters(&image, &config).unwrap();
        clusters.clusters[2].x = 3;
        clusters.clusters[2].y = 1;
        clusters.clusters[2].r = 7;
        for y in 0..height {
            for x in 0..width {
                let label = if x < 2 { 0u32 } else { 1u32 };
                clusters.assignments[(x, y)].store(label, Ordering::Relaxed);
            }
        }
        update(&mut clusters, &image, &config);
        assert_eq!(clusters.clusters[0].num_members, 4);
        assert_eq!(clusters.clusters[1].num_members, 4);
        // Rounded means: y over {0,0,1,1} -> (2+2)/4 = 1, x over {0,0,1,1} -> 1.
        assert_eq!((clusters.clusters[0].y, clusters.clusters[0].x), (1, 1));
        assert_eq!((clusters.clusters[1].y, clusters.clusters[1].x), (1, 3));
        assert_eq!(
            (
                clusters.clusters[1].r,
                clusters.clusters[1].g,
                clusters.clusters[1].b
            ),
            (200, 100, 50)
        );
        // Empty cluster keeps its descriptors, count drops to zero.
        assert_eq!(clusters.clusters[2].num_members, 0);
        assert_eq!(clusters.clusters[2].x, 3);
        assert_eq!(clusters.clusters[2].r, 7);
    }

    #[test]
    fn iterate_constant_image_test() {
        // A pure gray image splits into four roughly equal quadrants.
        let width = 16;
        let height = 16;
        let buf = vec![128u8; width * height * 3];
        let image = RgbImage::from_raw_slice(&buf, width, height).unwrap();
        let config = Config {
            num_of_clusters: 4,
            max_iterations: 5,
            compactness: 10.0,
            quantize_level: 7,
            ..Config::default()
        };
        let mut clusters = Clusters::initialize_clusters(&image, &config).unwrap();
        iterate(&image, &config, &mut clusters).unwrap();
        let labels = labels(&clusters);
        assert!(labels.iter().all(|l| *l < 4));
        let total: u32 = clusters.clusters.iter().map(|c| c.num_members).sum();
        assert_eq!(total, (width * height) as u32);
        for cluster in &clusters.clusters {
            assert!(
                cluster.num_members >= 32,
                "cluster {} degenerated to {} members",
                cluster.number,
                cluster.num_members
            );
            assert_eq!((cluster.r, cluster.g, cluster.b), (128, 128, 128));
            assert!((cluster.y as usize) < height);
            assert!((cluster.x as usize) < width);
        }
    }

    #[test]
    fn iterate_single_cluster_test() {
        let width = 8;
        let height = 8;
        let buf: Vec<u8> = (0..width * height * 3).map(|i| (i * 3 % 256) as u8).collect();
        let image = RgbImage::from_raw_slice(&buf, width, height).unwrap();
        let config = Config {
            num_of_clusters: 1,
            max_iterations: 3,
            ..Config::default()
        };
        let mut clusters = Clusters::initialize_clusters(&image, &config).unwrap();
        iterate(&image, &config, &mut clusters).unwrap();
        assert!(labels(&clusters).iter().all(|l| *l == 0));
        let cluster = &clusters.clusters[0];
        assert_eq!(cluster.num_members, 64);
        // Rounded mean of 0..=7 in both axes.
        assert_eq!((cluster.y, cluster.x), (4, 4));
        let n = (width * height) as u32;
        for (channel, got) in [cluster.r, cluster.g, cluster.b].into_iter().enumerate() {
            let sum: u32 = (0..width * height)
                .map(|p| buf[p * 3 + channel] as u32)
                .sum();
            assert_eq!(got as u32, (sum + n / 2) / n);
        }
    }

    #[test]
    fn iterate_two_color_split_test() {
        let width = 8;
        let height = 4;
        let mut buf = vec![0u8; width * height * 3];
        for y in 0..height {
            for x in width / 2..width {
                let idx = (y * width + x) * 3;
                buf[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        let image = RgbImage::from_raw_slice(&buf, width, height).unwrap();
        let config = Config {
            num_of_clusters: 2,
            max_iterations: 10,
            ..Config::default()
        };
        let mut clusters = Clusters::initialize_clusters(&image, &config).unwrap();
        iterate(&image, &config, &mut clusters).unwrap();
        for y in 0..height {
            for x in 0..width {
                let expected = if x < width / 2 { 0 } else { 1 };
                assert_eq!(
                    clusters.assignments[(x, y)].load(Ordering::Relaxed),
                    expected,
                    "wrong side at ({x}, {y})"
                );
            }
        }
        let black = &clusters.clusters[0];
        let white = &clusters.clusters[1];
        assert_eq!((black.r, black.g, black.b), (0, 0, 0));
        assert_eq!((white.r, white.g, white.b), (255, 255, 255));
        assert_eq!((black.y, black.x), (2, 2));
        assert_eq!((white.y, white.x), (2, 6));
        assert_eq!(black.num_members, 16);
        assert_eq!(white.num_members, 16);
    }

    #[test]
    fn iterate_is_deterministic_test() {
        let width = 32;
        let height = 24;
        let buf: Vec<u8> = (0..width * height * 3)
            .map(|i| ((i * 31 + i / 7) % 256) as u8)
            .collect();
        let image = RgbImage::from_raw_slice(&buf, width, height).unwrap();
        let config = Config {
            num_of_clusters: 12,
            max_iterations: 4,
            ..Config::default()
        };
        let mut first = Clusters::initialize_clusters(&image, &config).unwrap();
        iterate(&image, &config, &mut first).unwrap();
        let mut second = Clusters::initialize_clusters(&image, &config).unwrap();
        iterate(&image, &config, &mut second).unwrap();
        assert_eq!(labels(&first), labels(&second));
        for (a, b) in first.clusters.iter().zip(&second.clusters) {
            assert_eq!(
                (a.y, a.x, a.r, a.g, a.b, a.num_members),
                (b.y, b.x, b.r, b.g, b.b, b.num_members)
            );
        }
    }

    #[test]
    fn iterate_rejects_bad_arguments_test() {
        let buf = vec![0u8; 8 * 8 * 3];
        let image = RgbImage::from_raw_slice(&buf, 8, 8).unwrap();
        let config = Config {
            num_of_clusters: 4,
            ..Config::default()
        };
        let mut clusters = Clusters::initialize_clusters(&image, &config).unwrap();

        let too_many = Config {
            num_of_clusters: 65,
            ..Config::default()
        };
        assert!(iterate(&image, &too_many, &mut clusters).is_err());

        let bad_quantize = Config {
            quantize_level: 0,
            ..config.clone()
        };
        assert!(iterate(&image, &bad_quantize, &mut clusters).is_err());

        let mismatched = Config {
            num_of_clusters: 5,
            ..config.clone()
        };
        assert_eq!(
            iterate(&image, &mismatched, &mut clusters).unwrap_err(),
            Error::DimensionMismatch {
                expected: 5,
                actual: 4
            }
        );
    }

    #[test]
    fn search_region_test() {
        assert_eq!(search_region(16, 16, 4), 8);
        assert_eq!(search_region(640, 480, 100), 55);
        // Never collapses to zero.
        assert_eq!(search_region(2, 2, 4), 1);
    }
}
