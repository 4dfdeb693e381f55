//! Buffer layout rules for script values
//!
//! Uniform and storage blocks lay their members out according to the
//! GLSL std140/std430 rules; matrices are additionally stored column- or
//! row-major. A [`Layout`] combines the two choices and answers, for any
//! [`DataType`], the questions the parser and execution engine need:
//! how big is a value, how far apart are array elements, and at which
//! byte offset does each scalar component live.

pub mod tolerance;
pub mod types;

pub use tolerance::Tolerance;
pub use types::{DataType, ScalarType};

/// Block packing rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutStd {
    /// std140: array and matrix strides round up to 16 bytes
    #[default]
    Std140,
    /// std430: natural alignment throughout
    Std430,
}

/// Matrix component ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatrixMajor {
    /// Matrices stored one column after another
    #[default]
    Column,
    /// Matrices stored one row after another
    Row,
}

/// Layout of a uniform or storage buffer region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Layout {
    /// Packing rules for the enclosing block
    pub std: LayoutStd,
    /// Matrix ordering for the enclosing block
    pub major: MatrixMajor,
}

fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Alignment of a column vector of `n` components per the GLSL rules:
/// scalars align to their size, vec2 to twice it, vec3 and vec4 to four
/// times it.
fn vector_alignment(scalar: ScalarType, n: usize) -> usize {
    let s = scalar.size();
    match n {
        1 => s,
        2 => 2 * s,
        _ => 4 * s,
    }
}

impl Layout {
    /// Layout for push-constant and storage blocks (std430, column major)
    pub fn std430() -> Self {
        Self { std: LayoutStd::Std430, major: MatrixMajor::Column }
    }

    /// Layout for uniform blocks (std140, column major)
    pub fn std140() -> Self {
        Self { std: LayoutStd::Std140, major: MatrixMajor::Column }
    }

    /// Number of vectors a matrix is stored as, along the major axis
    fn major_count(self, ty: DataType) -> usize {
        match self.major {
            MatrixMajor::Column => ty.cols,
            MatrixMajor::Row => ty.rows,
        }
    }

    /// Components in each stored vector of a matrix
    fn minor_count(self, ty: DataType) -> usize {
        match self.major {
            MatrixMajor::Column => ty.rows,
            MatrixMajor::Row => ty.cols,
        }
    }

    /// Base alignment of a value of `ty` inside a block
    pub fn base_alignment(self, ty: DataType) -> usize {
        let align = if ty.is_matrix() {
            vector_alignment(ty.scalar, self.minor_count(ty))
        } else {
            vector_alignment(ty.scalar, ty.rows)
        };
        if ty.is_matrix() && self.std == LayoutStd::Std140 {
            align_up(align, 16)
        } else {
            align
        }
    }

    /// Stride between the stored vectors of a matrix
    pub fn matrix_stride(self, ty: DataType) -> usize {
        self.base_alignment(ty)
    }

    /// Bytes occupied by one value, including internal matrix padding but
    /// not trailing array padding (`vec3` has size 12)
    pub fn size(self, ty: DataType) -> usize {
        if ty.is_matrix() {
            let stride = self.matrix_stride(ty);
            (self.major_count(ty) - 1) * stride + self.minor_count(ty) * ty.scalar.size()
        } else {
            ty.rows * ty.scalar.size()
        }
    }

    /// Stride between consecutive array elements of `ty`
    pub fn array_stride(self, ty: DataType) -> usize {
        let mut align = self.base_alignment(ty);
        if self.std == LayoutStd::Std140 {
            align = align_up(align, 16);
        }
        align_up(self.size(ty), align)
    }

    /// Invoke `f` with the scalar type and byte offset of every component
    /// of `ty`, in the order components are written in a script (column
    /// by column for matrices)
    pub fn for_each_component<F>(self, ty: DataType, mut f: F)
    where
        F: FnMut(ScalarType, usize),
    {
        let s = ty.scalar.size();
        if ty.is_matrix() {
            let stride = self.matrix_stride(ty);
            for c in 0..ty.cols {
                for r in 0..ty.rows {
                    let offset = match self.major {
                        MatrixMajor::Column => c * stride + r * s,
                        MatrixMajor::Row => r * stride + c * s,
                    };
                    f(ty.scalar, offset);
                }
            }
        } else {
            for r in 0..ty.rows {
                f(ty.scalar, r * s);
            }
        }
    }

    /// Byte offset of every component of `ty`, in script order
    pub fn component_offsets(self, ty: DataType) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(ty.components());
        self.for_each_component(ty, |_, offset| offsets.push(offset));
        offsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std140_reference_sizes() {
        let l = Layout::std140();
        let vec3 = DataType::vector(ScalarType::Float, 3);
        assert_eq!(l.size(vec3), 12);
        assert_eq!(l.array_stride(vec3), 16);

        let float = DataType::scalar(ScalarType::Float);
        assert_eq!(l.size(float), 4);
        assert_eq!(l.array_stride(float), 16);

        let vec4 = DataType::vector(ScalarType::Float, 4);
        assert_eq!(l.size(vec4), 16);
        assert_eq!(l.array_stride(vec4), 16);
    }

    #[test]
    fn test_std430_natural_strides() {
        let l = Layout::std430();
        assert_eq!(l.array_stride(DataType::scalar(ScalarType::Float)), 4);
        assert_eq!(l.array_stride(DataType::vector(ScalarType::Float, 2)), 8);
        // vec3 aligns to 16 even in std430
        assert_eq!(l.array_stride(DataType::vector(ScalarType::Float, 3)), 16);
        assert_eq!(l.array_stride(DataType::scalar(ScalarType::UInt16)), 2);
    }

    #[test]
    fn test_matrix_strides() {
        let mat2 = DataType::matrix(ScalarType::Float, 2, 2);
        // std140 rounds column stride to 16; std430 keeps vec2 alignment
        assert_eq!(Layout::std140().matrix_stride(mat2), 16);
        assert_eq!(Layout::std140().size(mat2), 24);
        assert_eq!(Layout::std430().matrix_stride(mat2), 8);
        assert_eq!(Layout::std430().size(mat2), 16);

        let mat3 = DataType::matrix(ScalarType::Float, 3, 3);
        assert_eq!(Layout::std430().matrix_stride(mat3), 16);
        assert_eq!(Layout::std430().size(mat3), 44);
        assert_eq!(Layout::std430().array_stride(mat3), 48);
    }

    #[test]
    fn test_double_vectors() {
        let dvec3 = DataType::vector(ScalarType::Double, 3);
        assert_eq!(Layout::std430().size(dvec3), 24);
        assert_eq!(Layout::std430().base_alignment(dvec3), 32);
        assert_eq!(Layout::std430().array_stride(dvec3), 32);
    }

    #[test]
    fn test_component_offsets_column_major() {
        let mat2x3 = DataType::matrix(ScalarType::Float, 2, 3);
        let l = Layout::std430();
        // columns are vec3s with stride 16
        assert_eq!(
            l.component_offsets(mat2x3),
            vec![0, 4, 8, 16, 20, 24]
        );
    }

    #[test]
    fn test_component_offsets_row_major() {
        let mat2x3 = DataType::matrix(ScalarType::Float, 2, 3);
        let l = Layout { std: LayoutStd::Std430, major: MatrixMajor::Row };
        // rows are vec2s with stride 8; script order stays column-major
        assert_eq!(
            l.component_offsets(mat2x3),
            vec![0, 8, 16, 4, 12, 20]
        );
    }

    #[test]
    fn test_size_equals_max_component_extent() {
        // size(T, L) covers the last component plus its scalar size
        let l = Layout::std140();
        for ty in [
            DataType::scalar(ScalarType::Double),
            DataType::vector(ScalarType::Float, 3),
            DataType::matrix(ScalarType::Float, 4, 2),
            DataType::matrix(ScalarType::Double, 3, 3),
        ] {
            let max_end = l
                .component_offsets(ty)
                .iter()
                .map(|o| o + ty.scalar.size())
                .max()
                .unwrap();
            assert_eq!(l.size(ty), max_end);
        }
    }
}
