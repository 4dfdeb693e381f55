//! Scalar and composite GLSL data types
//!
//! Every value a script can write into a buffer or push-constant range is
//! described by a [`DataType`]: a scalar base plus a vector or matrix
//! shape. Type names follow the GLSL spelling used in scripts
//! (`float`, `uint8_t`, `ivec3`, `dmat3x2`, ...).

/// Scalar base type of a script value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    /// 8-bit signed integer (`int8_t`)
    Int8,
    /// 8-bit unsigned integer (`uint8_t`)
    UInt8,
    /// 16-bit signed integer (`int16_t`)
    Int16,
    /// 16-bit unsigned integer (`uint16_t`)
    UInt16,
    /// 32-bit signed integer (`int`)
    Int32,
    /// 32-bit unsigned integer (`uint`)
    UInt32,
    /// 64-bit signed integer (`int64_t`)
    Int64,
    /// 64-bit unsigned integer (`uint64_t`)
    UInt64,
    /// 32-bit IEEE float (`float`)
    Float,
    /// 64-bit IEEE float (`double`)
    Double,
}

impl ScalarType {
    /// Size of one scalar in bytes
    pub fn size(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float => 4,
            Self::Int64 | Self::UInt64 | Self::Double => 8,
        }
    }

    /// Whether the scalar is one of the signed or unsigned integer types
    pub fn is_integer(self) -> bool {
        !matches!(self, Self::Float | Self::Double)
    }

    /// Load one scalar from little-endian bytes, widened to `f64`
    ///
    /// Probe comparisons work in `f64` regardless of the stored type.
    pub fn load_f64(self, bytes: &[u8]) -> f64 {
        match self {
            Self::Int8 => f64::from(bytes[0] as i8),
            Self::UInt8 => f64::from(bytes[0]),
            Self::Int16 => f64::from(i16::from_le_bytes([bytes[0], bytes[1]])),
            Self::UInt16 => f64::from(u16::from_le_bytes([bytes[0], bytes[1]])),
            Self::Int32 => f64::from(i32::from_le_bytes(bytes[..4].try_into().unwrap())),
            Self::UInt32 => f64::from(u32::from_le_bytes(bytes[..4].try_into().unwrap())),
            Self::Int64 => i64::from_le_bytes(bytes[..8].try_into().unwrap()) as f64,
            Self::UInt64 => u64::from_le_bytes(bytes[..8].try_into().unwrap()) as f64,
            Self::Float => f64::from(f32::from_le_bytes(bytes[..4].try_into().unwrap())),
            Self::Double => f64::from_le_bytes(bytes[..8].try_into().unwrap()),
        }
    }

    fn from_scalar_name(name: &str) -> Option<Self> {
        match name {
            "int" => Some(Self::Int32),
            "uint" => Some(Self::UInt32),
            "int8_t" => Some(Self::Int8),
            "uint8_t" => Some(Self::UInt8),
            "int16_t" => Some(Self::Int16),
            "uint16_t" => Some(Self::UInt16),
            "int64_t" => Some(Self::Int64),
            "uint64_t" => Some(Self::UInt64),
            "float" => Some(Self::Float),
            "double" => Some(Self::Double),
            _ => None,
        }
    }

    fn from_vector_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "" => Some(Self::Float),
            "d" => Some(Self::Double),
            "i" => Some(Self::Int32),
            "u" => Some(Self::UInt32),
            "i8" => Some(Self::Int8),
            "u8" => Some(Self::UInt8),
            "i16" => Some(Self::Int16),
            "u16" => Some(Self::UInt16),
            "i64" => Some(Self::Int64),
            "u64" => Some(Self::UInt64),
            _ => None,
        }
    }
}

/// A scalar, vector, or matrix type as named in a script
///
/// Scalars have `cols == 1, rows == 1`; a vector of N components has
/// `cols == 1, rows == N`; a `matCxR` has `cols == C, rows == R`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataType {
    /// Base type of every component
    pub scalar: ScalarType,
    /// Number of columns (1 except for matrices)
    pub cols: usize,
    /// Number of rows (components per column)
    pub rows: usize,
}

impl DataType {
    /// A single scalar
    pub fn scalar(scalar: ScalarType) -> Self {
        Self { scalar, cols: 1, rows: 1 }
    }

    /// A column vector of `rows` components
    pub fn vector(scalar: ScalarType, rows: usize) -> Self {
        Self { scalar, cols: 1, rows }
    }

    /// A matrix of `cols` columns and `rows` rows
    pub fn matrix(scalar: ScalarType, cols: usize, rows: usize) -> Self {
        Self { scalar, cols, rows }
    }

    /// Whether this type is a matrix
    pub fn is_matrix(&self) -> bool {
        self.cols > 1
    }

    /// Total number of scalar components
    pub fn components(&self) -> usize {
        self.cols * self.rows
    }

    /// Parse a GLSL type name as used in `[test]` commands
    ///
    /// Accepts scalar names (`float`, `int16_t`), vectors with optional
    /// base prefix (`vec3`, `dvec2`, `u8vec4`), and matrices
    /// (`mat3`, `mat2x4`, `dmat3x2`).
    pub fn from_name(name: &str) -> Option<Self> {
        if let Some(scalar) = ScalarType::from_scalar_name(name) {
            return Some(Self::scalar(scalar));
        }

        if let Some(pos) = name.find("vec") {
            let (prefix, rest) = name.split_at(pos);
            let scalar = ScalarType::from_vector_prefix(prefix)?;
            let rows = parse_dimension(&rest[3..])?;
            return Some(Self::vector(scalar, rows));
        }

        if let Some(pos) = name.find("mat") {
            let (prefix, rest) = name.split_at(pos);
            let scalar = match prefix {
                "" => ScalarType::Float,
                "d" => ScalarType::Double,
                _ => return None,
            };
            let dims = &rest[3..];
            return match dims.split_once('x') {
                Some((c, r)) => {
                    let cols = parse_dimension(c)?;
                    let rows = parse_dimension(r)?;
                    Some(Self::matrix(scalar, cols, rows))
                }
                None => {
                    let n = parse_dimension(dims)?;
                    Some(Self::matrix(scalar, n, n))
                }
            };
        }

        None
    }
}

fn parse_dimension(s: &str) -> Option<usize> {
    match s {
        "2" => Some(2),
        "3" => Some(3),
        "4" => Some(4),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_names() {
        assert_eq!(
            DataType::from_name("float"),
            Some(DataType::scalar(ScalarType::Float))
        );
        assert_eq!(
            DataType::from_name("uint8_t"),
            Some(DataType::scalar(ScalarType::UInt8))
        );
        assert_eq!(
            DataType::from_name("int"),
            Some(DataType::scalar(ScalarType::Int32))
        );
        assert_eq!(DataType::from_name("short"), None);
    }

    #[test]
    fn test_vector_names() {
        assert_eq!(
            DataType::from_name("vec3"),
            Some(DataType::vector(ScalarType::Float, 3))
        );
        assert_eq!(
            DataType::from_name("dvec2"),
            Some(DataType::vector(ScalarType::Double, 2))
        );
        assert_eq!(
            DataType::from_name("i16vec4"),
            Some(DataType::vector(ScalarType::Int16, 4))
        );
        assert_eq!(DataType::from_name("vec5"), None);
        assert_eq!(DataType::from_name("xvec3"), None);
    }

    #[test]
    fn test_load_f64() {
        assert_eq!(ScalarType::Int8.load_f64(&[0xff]), -1.0);
        assert_eq!(ScalarType::UInt8.load_f64(&[0xff]), 255.0);
        assert_eq!(ScalarType::Int16.load_f64(&[0x00, 0x80]), -32768.0);
        assert_eq!(ScalarType::UInt32.load_f64(&[1, 0, 0, 0]), 1.0);
        assert_eq!(
            ScalarType::Float.load_f64(&0.5f32.to_le_bytes()),
            0.5
        );
        assert_eq!(
            ScalarType::Double.load_f64(&(-2.25f64).to_le_bytes()),
            -2.25
        );
    }

    #[test]
    fn test_matrix_names() {
        assert_eq!(
            DataType::from_name("mat3"),
            Some(DataType::matrix(ScalarType::Float, 3, 3))
        );
        assert_eq!(
            DataType::from_name("mat2x4"),
            Some(DataType::matrix(ScalarType::Float, 2, 4))
        );
        assert_eq!(
            DataType::from_name("dmat3x2"),
            Some(DataType::matrix(ScalarType::Double, 3, 2))
        );
        assert_eq!(DataType::from_name("imat3"), None);
    }
}
