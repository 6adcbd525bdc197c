use super::error::LinalgError;

pub type Vector = Vec<f64>;

const SINGULAR_EPS: f64 = 1e-10;
const SYMMETRY_TOL: f64 = 1e-9;

/// Dense row-major matrix. Shape is fixed at construction and checked by
/// every operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, LinalgError> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            if row.len() != cols {
                return Err(LinalgError::shape((rows.len(), cols), (rows.len(), row.len())));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m.data[i * n + i] = 1.0;
        }
        m
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.rows).map(|r| self.row(r).to_vec()).collect()
    }

    pub fn multiply(&self, other: &Matrix) -> Result<Matrix, LinalgError> {
        if self.cols != other.rows {
            return Err(LinalgError::shape(
                (self.cols, other.cols),
                (other.rows, other.cols),
            ));
        }
        let mut out = Matrix::zeros(self.rows, other.cols);
        for i in 0..self.rows {
            for k in 0..self.cols {
                let a = self.get(i, k);
                if a == 0.0 {
                    continue;
                }
                for j in 0..other.cols {
                    out.data[i * other.cols + j] += a * other.get(k, j);
                }
            }
        }
        Ok(out)
    }

    pub fn transpose(&self) -> Matrix {
        let mut out = Matrix::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                out.set(j, i, self.get(i, j));
            }
        }
        out
    }

    pub fn add(&self, other: &Matrix) -> Result<Matrix, LinalgError> {
        if self.shape() != other.shape() {
            return Err(LinalgError::shape(self.shape(), other.shape()));
        }
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| a + b)
            .collect();
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }

    pub fn scalar_multiply(&self, s: f64) -> Matrix {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|v| v * s).collect(),
        }
    }

    pub fn mul_vec(&self, x: &[f64]) -> Result<Vector, LinalgError> {
        if x.len() != self.cols {
            return Err(LinalgError::length(self.cols, x.len()));
        }
        Ok((0..self.rows)
            .map(|r| self.row(r).iter().zip(x).map(|(a, b)| a * b).sum())
            .collect())
    }

    pub fn determinant(&self) -> Result<f64, LinalgError> {
        if !self.is_square() {
            return Err(LinalgError::shape((self.rows, self.rows), self.shape()));
        }
        let m = |i, j| self.get(i, j);
        match self.rows {
            1 => Ok(m(0, 0)),
            2 => Ok(m(0, 0) * m(1, 1) - m(0, 1) * m(1, 0)),
            3 => Ok(m(0, 0) * (m(1, 1) * m(2, 2) - m(1, 2) * m(2, 1))
                - m(0, 1) * (m(1, 0) * m(2, 2) - m(1, 2) * m(2, 0))
                + m(0, 2) * (m(1, 0) * m(2, 1) - m(1, 1) * m(2, 0))),
            n => Err(LinalgError::UnsupportedSize(n)),
        }
    }

    pub fn inverse2x2(&self) -> Result<Matrix, LinalgError> {
        if self.shape() != (2, 2) {
            return Err(LinalgError::shape((2, 2), self.shape()));
        }
        let det = self.determinant()?;
        if det.abs() < SINGULAR_EPS {
            return Err(LinalgError::SingularMatrix { determinant: det });
        }
        let inv = 1.0 / det;
        Ok(Matrix {
            rows: 2,
            cols: 2,
            data: vec![
                self.get(1, 1) * inv,
                -self.get(0, 1) * inv,
                -self.get(1, 0) * inv,
                self.get(0, 0) * inv,
            ],
        })
    }

    pub fn inverse3x3(&self) -> Result<Matrix, LinalgError> {
        if self.shape() != (3, 3) {
            return Err(LinalgError::shape((3, 3), self.shape()));
        }
        let det = self.determinant()?;
        if det.abs() < SINGULAR_EPS {
            return Err(LinalgError::SingularMatrix { determinant: det });
        }
        let m = |i, j| self.get(i, j);
        // Transposed cofactor matrix divided by the determinant.
        let cofactor = |i: usize, j: usize| {
            let (r0, r1) = match i {
                0 => (1, 2),
                1 => (0, 2),
                _ => (0, 1),
            };
            let (c0, c1) = match j {
                0 => (1, 2),
                1 => (0, 2),
                _ => (0, 1),
            };
            let minor = m(r0, c0) * m(r1, c1) - m(r0, c1) * m(r1, c0);
            if (i + j) % 2 == 0 { minor } else { -minor }
        };
        let mut out = Matrix::zeros(3, 3);
        for i in 0..3 {
            for j in 0..3 {
                out.set(j, i, cofactor(i, j) / det);
            }
        }
        Ok(out)
    }

    /// Exact inverse for matrices up to 3x3. Larger systems are never
    /// inverted; callers use the iterative optimizer path instead.
    pub fn inverse(&self) -> Result<Matrix, LinalgError> {
        if !self.is_square() {
            return Err(LinalgError::shape((self.rows, self.rows), self.shape()));
        }
        match self.rows {
            1 => {
                let v = self.get(0, 0);
                if v.abs() < SINGULAR_EPS {
                    return Err(LinalgError::SingularMatrix { determinant: v });
                }
                Ok(Matrix {
                    rows: 1,
                    cols: 1,
                    data: vec![1.0 / v],
                })
            }
            2 => self.inverse2x2(),
            3 => self.inverse3x3(),
            n => Err(LinalgError::UnsupportedSize(n)),
        }
    }

    /// xᵀAx
    pub fn quadratic_form(&self, x: &[f64]) -> Result<f64, LinalgError> {
        if !self.is_square() {
            return Err(LinalgError::shape((self.rows, self.rows), self.shape()));
        }
        dot(x, &self.mul_vec(x)?)
    }

    pub fn is_symmetric(&self, tol: f64) -> bool {
        if !self.is_square() {
            return false;
        }
        for i in 0..self.rows {
            for j in (i + 1)..self.cols {
                if (self.get(i, j) - self.get(j, i)).abs() > tol {
                    return false;
                }
            }
        }
        true
    }
}

pub fn dot(a: &[f64], b: &[f64]) -> Result<f64, LinalgError> {
    if a.len() != b.len() {
        return Err(LinalgError::length(a.len(), b.len()));
    }
    Ok(a.iter().zip(b).map(|(x, y)| x * y).sum())
}

/// Square, symmetric matrix with non-negative finite variances on the
/// diagonal, indexed in the same asset order as the return vector it is
/// paired with.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceMatrix(Matrix);

impl CovarianceMatrix {
    pub fn new(matrix: Matrix) -> Result<Self, LinalgError> {
        if !matrix.is_square() {
            return Err(LinalgError::shape((matrix.rows, matrix.rows), matrix.shape()));
        }
        if matrix.data.iter().any(|v| !v.is_finite()) {
            return Err(LinalgError::InvalidCovariance(
                "entries must be finite".to_string(),
            ));
        }
        if !matrix.is_symmetric(SYMMETRY_TOL) {
            return Err(LinalgError::InvalidCovariance(
                "matrix must be symmetric".to_string(),
            ));
        }
        if let Some(i) = (0..matrix.rows).find(|&i| matrix.get(i, i) < 0.0) {
            return Err(LinalgError::InvalidCovariance(format!(
                "variance of asset {i} is negative"
            )));
        }
        Ok(Self(matrix))
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, LinalgError> {
        Self::new(Matrix::from_rows(rows)?)
    }

    pub fn dim(&self) -> usize {
        self.0.rows
    }

    pub fn variance(&self, asset: usize) -> f64 {
        self.0.get(asset, asset)
    }

    pub fn matrix(&self) -> &Matrix {
        &self.0
    }

    pub fn portfolio_variance(&self, weights: &[f64]) -> Result<f64, LinalgError> {
        self.0.quadratic_form(weights)
    }
}
