//! Quantized SLIC superpixel segmentation in Rust.
//!
//! This crate segments packed RGB24 images into superpixels using a fast
//! integer variant of SLIC. Floating-point distance arithmetic is quantized
//! down to 16 bits, the per-pixel state is one packed
//! `(distance << 16) | cluster` word updated with an atomic min, and both the
//! assign and update steps run in parallel. The aim is throughput: roughly an
//! order of magnitude over a reference floating-point SLIC at comparable
//! segmentation quality.
//!
//! The following example segments an in-memory RGB24 buffer (the default
//! layout of the image crate):
//!
//! ```rust
//! use quick_slic::arrays::RgbImage;
//! use quick_slic::common::Config;
//! use quick_slic::slic::{iterate, Clusters};
//!
//! fn main() {
//!     let width = 64;
//!     let height = 48;
//!     // Any packed RGB24 buffer works; here a synthetic gradient.
//!     let rgb: Vec<u8> = (0..width * height * 3).map(|i| (i / 9) as u8).collect();
//!     let image = RgbImage::from_raw_slice(&rgb, width, height).unwrap();
//!     // create config with defaults
//!     let mut config = Config::default();
//!     // override the cluster count for such a small image
//!     config.num_of_clusters = 32;
//!     // initialize clusters (it's possible to write custom initializer to have e.g. ROI)
//!     let mut clusters = Clusters::initialize_clusters(&image, &config).unwrap();
//!     // make the computation
//!     iterate(&image, &config, &mut clusters).unwrap();
//!     // low 16 bits of every assignment word now hold the cluster number
//! }
//! ```
//!
//! After `iterate()` the label map can be turned into a cluster adjacency
//! graph with `adjacency::get_connectivity` (boundary neighbors, deduplicated
//! through a hash bitmap) or `adjacency::knn_connectivity` (nearest clusters
//! by centroid distance through a coarse grid), and per-cluster statistics of
//! an external mask can be pushed back and forth with the `masks` module.
//!
//! The distance packing makes the result independent of scheduling: when two
//! clusters tie on distance, the lower cluster number wins everywhere, and
//! the atomic min keeps that exact even across thread counts.

pub mod adjacency;
pub mod arrays;
pub mod assign;
pub mod atomic_arrays;
pub mod cluster;
pub mod common;
pub mod conectivity;
pub mod masks;
pub mod slic;
