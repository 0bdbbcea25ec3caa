//! Distance spaces.
//!
//! A [`DistanceSpace`] bundles the metric, the scalar type, the dimension,
//! and the derived byte size of one vector, and computes distances directly
//! over the raw row bytes both engines store. All kernels report f32 where
//! lower is closer: L2 is the sum of squared differences, inner product is
//! `1 - dot`.
//!
//! The f32 kernels run an 8-lane chunked accumulator over the aligned
//! prefix with a scalar epilogue for the tail, so dimensions that are not a
//! multiple of the lane width still work. u8 kernels accumulate in i32,
//! f16 kernels widen to f32 lane by lane.

use crate::config::{DataType, MetricType};
use crate::error::{IndexError, Result};
use crate::DistanceType;
use half::f16;

/// Lane count of the chunked f32 kernels.
const LANES: usize = 8;

/// Metric + data type + dimension, validated at construction.
#[derive(Debug, Clone, Copy)]
pub struct DistanceSpace {
    metric: MetricType,
    data_type: DataType,
    dimension: u32,
    data_size: usize,
}

impl DistanceSpace {
    /// Build a space, refusing unsupported combinations.
    ///
    /// `Cosine` is refused outright: pre-normalize and use
    /// [`MetricType::InnerProduct`].
    pub fn new(metric: MetricType, data_type: DataType, dimension: u32) -> Result<Self> {
        if dimension == 0 {
            return Err(IndexError::InvalidArgument(
                "dimension must not be 0".into(),
            ));
        }
        match metric {
            MetricType::L2 | MetricType::InnerProduct => {}
            MetricType::Cosine => {
                return Err(IndexError::InvalidArgument(
                    "cosine is not supported; normalize the vectors and use inner product".into(),
                ));
            }
        }
        Ok(Self {
            metric,
            data_type,
            dimension,
            data_size: dimension as usize * data_type.size(),
        })
    }

    /// Byte length of one vector.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    pub fn metric(&self) -> MetricType {
        self.metric
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Distance between two raw vector rows of exactly
    /// [`DistanceSpace::data_size`] bytes each.
    #[inline]
    pub fn dist(&self, a: &[u8], b: &[u8]) -> DistanceType {
        debug_assert_eq!(a.len(), self.data_size);
        debug_assert_eq!(b.len(), self.data_size);
        match (self.metric, self.data_type) {
            (MetricType::L2, DataType::Float32) => {
                l2_sq_f32(bytemuck::cast_slice(a), bytemuck::cast_slice(b))
            }
            (MetricType::InnerProduct, DataType::Float32) => {
                1.0 - dot_f32(bytemuck::cast_slice(a), bytemuck::cast_slice(b))
            }
            (MetricType::L2, DataType::Float16) => {
                l2_sq_f16(bytemuck::cast_slice(a), bytemuck::cast_slice(b))
            }
            (MetricType::InnerProduct, DataType::Float16) => {
                1.0 - dot_f16(bytemuck::cast_slice(a), bytemuck::cast_slice(b))
            }
            (MetricType::L2, DataType::Uint8) => l2_sq_u8(a, b),
            (MetricType::InnerProduct, DataType::Uint8) => 1.0 - dot_u8(a, b),
            (MetricType::Cosine, _) => unreachable!("cosine refused at construction"),
        }
    }
}

/// Squared L2 over f32 lanes: chunked accumulator, scalar epilogue.
fn l2_sq_f32(a: &[f32], b: &[f32]) -> f32 {
    let chunks = a.len() / LANES;
    let mut acc = [0.0f32; LANES];
    for i in 0..chunks {
        let base = i * LANES;
        for lane in 0..LANES {
            let d = a[base + lane] - b[base + lane];
            acc[lane] += d * d;
        }
    }
    let mut sum: f32 = acc.iter().sum();
    for i in chunks * LANES..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum
}

/// Dot product over f32 lanes: chunked accumulator, scalar epilogue.
fn dot_f32(a: &[f32], b: &[f32]) -> f32 {
    let chunks = a.len() / LANES;
    let mut acc = [0.0f32; LANES];
    for i in 0..chunks {
        let base = i * LANES;
        for lane in 0..LANES {
            acc[lane] += a[base + lane] * b[base + lane];
        }
    }
    let mut sum: f32 = acc.iter().sum();
    for i in chunks * LANES..a.len() {
        sum += a[i] * b[i];
    }
    sum
}

fn l2_sq_f16(a: &[f16], b: &[f16]) -> f32 {
    let mut sum = 0.0f32;
    for (&x, &y) in a.iter().zip(b) {
        let d = x.to_f32() - y.to_f32();
        sum += d * d;
    }
    sum
}

fn dot_f16(a: &[f16], b: &[f16]) -> f32 {
    let mut sum = 0.0f32;
    for (&x, &y) in a.iter().zip(b) {
        sum += x.to_f32() * y.to_f32();
    }
    sum
}

/// Squared L2 over u8 components with i32 accumulation. A 32-element chunk
/// of squared differences stays far below i32::MAX.
fn l2_sq_u8(a: &[u8], b: &[u8]) -> f32 {
    let mut sum = 0i64;
    for (chunk_a, chunk_b) in a.chunks(32).zip(b.chunks(32)) {
        let mut acc = 0i32;
        for (&x, &y) in chunk_a.iter().zip(chunk_b) {
            let d = x as i32 - y as i32;
            acc += d * d;
        }
        sum += acc as i64;
    }
    sum as f32
}

fn dot_u8(a: &[u8], b: &[u8]) -> f32 {
    let mut sum = 0i64;
    for (chunk_a, chunk_b) in a.chunks(32).zip(b.chunks(32)) {
        let mut acc = 0i32;
        for (&x, &y) in chunk_a.iter().zip(chunk_b) {
            acc += x as i32 * y as i32;
        }
        sum += acc as i64;
    }
    sum as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_space(metric: MetricType, dim: u32) -> DistanceSpace {
        DistanceSpace::new(metric, DataType::Float32, dim).unwrap()
    }

    fn as_bytes(v: &[f32]) -> &[u8] {
        bytemuck::cast_slice(v)
    }

    #[test]
    fn test_cosine_refused() {
        let err = DistanceSpace::new(MetricType::Cosine, DataType::Float32, 8).unwrap_err();
        assert!(matches!(err, IndexError::InvalidArgument(_)));
    }

    #[test]
    fn test_zero_dimension_refused() {
        let err = DistanceSpace::new(MetricType::L2, DataType::Float32, 0).unwrap_err();
        assert!(matches!(err, IndexError::InvalidArgument(_)));
    }

    #[test]
    fn test_data_size() {
        assert_eq!(f32_space(MetricType::L2, 16).data_size(), 64);
        let s = DistanceSpace::new(MetricType::L2, DataType::Float16, 16).unwrap();
        assert_eq!(s.data_size(), 32);
        let s = DistanceSpace::new(MetricType::L2, DataType::Uint8, 16).unwrap();
        assert_eq!(s.data_size(), 16);
    }

    #[test]
    fn test_l2_f32() {
        let space = f32_space(MetricType::L2, 3);
        let a = [0.0f32, 0.0, 0.0];
        let b = [3.0f32, 4.0, 0.0];
        assert_eq!(space.dist(as_bytes(&a), as_bytes(&b)), 25.0);
        assert_eq!(space.dist(as_bytes(&b), as_bytes(&b)), 0.0);
    }

    #[test]
    fn test_inner_product_f32() {
        let space = f32_space(MetricType::InnerProduct, 3);
        let a = [1.0f32, 2.0, 3.0];
        let b = [4.0f32, 5.0, 6.0];
        // 1 - 32
        assert_eq!(space.dist(as_bytes(&a), as_bytes(&b)), -31.0);
    }

    #[test]
    fn test_smaller_is_closer_for_inner_product() {
        let space = f32_space(MetricType::InnerProduct, 2);
        let q = [1.0f32, 0.0];
        let near = [1.0f32, 0.0];
        let far = [0.0f32, 1.0];
        assert!(space.dist(as_bytes(&q), as_bytes(&near)) < space.dist(as_bytes(&q), as_bytes(&far)));
    }

    #[test]
    fn test_tail_epilogue_matches_reference() {
        // 19 is not a multiple of the lane width.
        let a: Vec<f32> = (0..19).map(|i| i as f32 * 0.5).collect();
        let b: Vec<f32> = (0..19).map(|i| 9.5 - i as f32).collect();
        let space = f32_space(MetricType::L2, 19);
        let reference: f32 = a.iter().zip(&b).map(|(x, y)| (x - y) * (x - y)).sum();
        let got = space.dist(as_bytes(&a), as_bytes(&b));
        assert!((got - reference).abs() < 1e-3, "{got} vs {reference}");
    }

    #[test]
    fn test_u8_kernels() {
        let space = DistanceSpace::new(MetricType::L2, DataType::Uint8, 4).unwrap();
        let a = [0u8, 10, 20, 255];
        let b = [0u8, 10, 25, 250];
        assert_eq!(space.dist(&a, &b), 50.0);

        let space = DistanceSpace::new(MetricType::InnerProduct, DataType::Uint8, 2).unwrap();
        let a = [2u8, 3];
        let b = [4u8, 5];
        assert_eq!(space.dist(&a, &b), 1.0 - 23.0);
    }

    #[test]
    fn test_f16_kernels() {
        let a: Vec<f16> = [1.0f32, 2.0, 3.0].iter().map(|&x| f16::from_f32(x)).collect();
        let b: Vec<f16> = [1.0f32, 2.0, 5.0].iter().map(|&x| f16::from_f32(x)).collect();
        let space = DistanceSpace::new(MetricType::L2, DataType::Float16, 3).unwrap();
        let d = space.dist(bytemuck::cast_slice(&a), bytemuck::cast_slice(&b));
        assert!((d - 4.0).abs() < 1e-2, "{d}");
    }
}
