/// Defines the possible data types for Tensor elements.
///
/// Only floating-point types are needed by the update engine. `F16` and
/// `BF16` are the reduced-precision types that take part in mixed-precision
/// training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating-point type. The full-precision type used for master weights.
    F32,
    /// 64-bit floating-point type.
    F64,
    /// IEEE 754 half-precision type.
    F16,
    /// Brain floating-point (8-bit exponent, 7-bit mantissa).
    BF16,
}

impl DType {
    /// Returns true for `F16` and `BF16`.
    pub fn is_reduced_precision(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16)
    }

    /// Size in bytes of one element.
    pub fn size_of(&self) -> usize {
        match self {
            DType::F32 => std::mem::size_of::<f32>(),
            DType::F64 => std::mem::size_of::<f64>(),
            DType::F16 => std::mem::size_of::<half::f16>(),
            DType::BF16 => std::mem::size_of::<half::bf16>(),
        }
    }

    /// The dtype used for scalars derived from tensors of this dtype.
    ///
    /// Learning rates are never kept in reduced precision.
    pub fn scalar_dtype(&self) -> DType {
        if self.is_reduced_precision() {
            DType::F32
        } else {
            *self
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::F16 => "float16",
            DType::BF16 => "bfloat16",
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
