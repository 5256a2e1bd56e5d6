use std::ops::Range;
use thiserror::Error;

/// Errors reported before any caller-owned buffer is touched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A precondition on the arguments does not hold.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: &'static str },
    /// A buffer does not have the shape implied by the image/cluster counts.
    #[error("dimension mismatch: expected {expected} elements, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Main config for the processing.
///
/// `num_of_clusters` directly influences the search region size (_S_), which
/// is calculated as _S = sqrt((image width * height) / num_of_clusters)_.
/// Generally for good performance _S_ should be somewhere between 20 (more
/// clusters) and 50 (fewer clusters).
#[derive(Clone)]
pub struct Config {
    /// Number of clusters (superpixels).
    pub num_of_clusters: u16,
    /// How many assign/update rounds are done before the connectivity pass.
    ///
    /// Currently, there is no support for preemptive exit.
    pub max_iterations: u16,
    /// Weight of the spatial distance against the color distance.
    /// Higher means more compact superpixels -> this is about trading color
    /// accuracy for locality.
    pub compactness: f32,
    /// Connected components smaller than
    /// `min_size_factor * (width * height / num_of_clusters)` pixels are
    /// relabeled into a neighboring cluster after the last iteration.
    pub min_size_factor: f32,
    /// Bit-shift mapping the floating-point distance weights into 16-bit
    /// integer arithmetic. Valid range 1..=15.
    pub quantize_level: u8,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            num_of_clusters: 2000,
            max_iterations: 10,
            compactness: 10f32,
            min_size_factor: 0.25,
            quantize_level: 7,
        }
    }
}

impl Config {
    /// Checks every precondition that does not need the image shape.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.num_of_clusters == 0 {
            return Err(Error::InvalidArgument {
                reason: "num_of_clusters must be at least 1",
            });
        }
        if self.quantize_level == 0 || self.quantize_level > 15 {
            return Err(Error::InvalidArgument {
                reason: "quantize_level must be in 1..=15",
            });
        }
        if !self.compactness.is_finite() || self.compactness < 0.0 {
            return Err(Error::InvalidArgument {
                reason: "compactness must be finite and non-negative",
            });
        }
        if !self.min_size_factor.is_finite() || self.min_size_factor < 0.0 {
            return Err(Error::InvalidArgument {
                reason: "min_size_factor must be finite and non-negative",
            });
        }
        Ok(())
    }
}

pub(crate) fn split_length_to_ranges(length: usize, splits: usize) -> Vec<Range<usize>> {
    let chunk_size = length / splits;
    let rem = length % splits;
    (0..splits)
        .scan((rem, 0usize), |(r, acc), _split| {
            let mut size = chunk_size;
            if *r > 0 {
                *r -= 1;
                size += 1;
            }
            let out = (*acc, *acc + size);
            *acc += size;
            Some(out.0..out.1)
        })
        .collect()
}
