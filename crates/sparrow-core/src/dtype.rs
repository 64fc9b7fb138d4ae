use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

// DType: Numeric element types of a network
//
// Weights and activations share one element type per engine instance:
//
//   F32  - 32-bit IEEE float, the default
//   F64  - 64-bit IEEE float
//
// Row pointers, column indices, active-row lists and row lengths are always
// 32-bit unsigned integers (see `INDEX_SIZE` in `geometry`).

/// Enum of the supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    /// Dtype stored in a file with the given value width (in bytes).
    pub fn from_width(width: u32) -> Option<DType> {
        match width {
            4 => Some(DType::F32),
            8 => Some(DType::F64),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "f32" | "float" => Ok(DType::F32),
            "f64" | "double" => Ok(DType::F64),
            other => Err(Error::config(format!(
                "unsupported element type '{other}' (expected f32 or f64)"
            ))),
        }
    }
}

// Scalar: anything that can live in a host/device buffer
//
// Buffers are moved between memory spaces as raw bytes, so every scalar must
// be plain-old-data.

/// Plain-old-data value that can be stored in a backend buffer.
pub trait Scalar: bytemuck::Pod + Send + Sync + fmt::Debug + 'static {}

impl<S: bytemuck::Pod + Send + Sync + fmt::Debug + 'static> Scalar for S {}

mod private {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Element type of a network's weights and activations.
///
/// Sealed: only `f32` and `f64` implement it, so an engine over any other
/// type does not compile.
///
/// ```compile_fail
/// fn needs_element<T: sparrow_core::Element>() {}
/// needs_element::<i32>();
/// ```
pub trait Element:
    private::Sealed + Scalar + num_traits::Float + Default + fmt::Display
{
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    fn to_f64(self) -> f64;

    fn from_f64(v: f64) -> Self;

    /// The activation rule: `min(ymax, max(0, self))`.
    #[inline]
    fn clamp_activation(self, ymax: Self) -> Self {
        if self > ymax {
            ymax
        } else if self > Self::zero() {
            self
        } else {
            Self::zero()
        }
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;
    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
}
