/// Row-major `f32` matrix holding one embedding per row.
///
/// An empty matrix has no fixed width; the first pushed row sets it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingMatrix {
    dims: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap flat row-major data. Returns `None` when `data` is not a whole
    /// number of rows.
    pub fn from_flat(dims: usize, data: Vec<f32>) -> Option<Self> {
        if dims == 0 {
            return data.is_empty().then(Self::new);
        }
        (data.len() % dims == 0).then_some(Self { dims, data })
    }

    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, String> {
        let mut matrix = Self::new();
        for row in rows {
            matrix.push_row(row)?;
        }
        Ok(matrix)
    }

    /// Width of each row; zero while empty
    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.dims)?;
        self.data.get(start..start + self.dims).filter(|r| !r.is_empty())
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dims.max(1))
    }

    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    /// Append a row, rejecting widths that differ from existing rows
    pub fn push_row(&mut self, row: &[f32]) -> Result<(), String> {
        if row.is_empty() {
            return Err("empty embedding vector".to_string());
        }
        if self.is_empty() {
            self.dims = row.len();
        } else if row.len() != self.dims {
            return Err(format!(
                "vector has {} dimensions, expected {}",
                row.len(),
                self.dims
            ));
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.dims = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_read_rows() {
        let mut matrix = EmbeddingMatrix::new();
        assert_eq!(matrix.len(), 0);
        assert!(matrix.row(0).is_none());

        matrix.push_row(&[1.0, 2.0]).unwrap();
        matrix.push_row(&[3.0, 4.0]).unwrap();

        assert_eq!(matrix.dims(), 2);
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix.row(1), Some(&[3.0, 4.0][..]));
        assert!(matrix.row(2).is_none());
        assert_eq!(matrix.rows().count(), 2);
        assert!(matrix.push_row(&[1.0]).is_err());
    }

    #[test]
    fn test_from_flat_requires_whole_rows() {
        assert!(EmbeddingMatrix::from_flat(3, vec![0.0; 7]).is_none());
        let matrix = EmbeddingMatrix::from_flat(3, vec![0.0; 6]).unwrap();
        assert_eq!(matrix.len(), 2);
        assert!(EmbeddingMatrix::from_flat(0, Vec::new()).unwrap().is_empty());
    }
}
