use std::io::{Read, Write};

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Dense row-major `f64` array with an explicit shape.
///
/// The leading axis is the "row" axis: a batch of images shaped
/// `[batch, channels, height, width]` has one row per image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Array {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Array {
    pub fn zeros(shape: &[usize]) -> Array {
        Array {
            shape: shape.to_vec(),
            data: vec![0.0; shape.iter().product()],
        }
    }

    /// Zero-mean uniform samples in `[-spread / 2, spread / 2)`.
    pub fn uniform(shape: &[usize], spread: f64) -> Array {
        let mut rng = rand::thread_rng();
        let mut res = Array::zeros(shape);
        for x in res.data.iter_mut() {
            *x = spread * rng.gen::<f64>() - spread / 2.0;
        }
        res
    }

    pub fn from_vec(shape: Vec<usize>, data: Vec<f64>) -> Result<Array> {
        match element_count(&shape) {
            Some(expected) if expected == data.len() => {}
            Some(expected) => {
                return Err(PipelineError::Shape(format!(
                    "shape {:?} needs {} elements, got {}",
                    shape,
                    expected,
                    data.len()
                )))
            }
            None => {
                return Err(PipelineError::Shape(format!("shape {shape:?} overflows")));
            }
        }
        Ok(Array { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Length of the leading axis; 0 for a scalar-shaped array.
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Number of elements in one row.
    pub fn row_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.row_len();
        &self.data[i * n..(i + 1) * n]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        let n = self.row_len();
        &mut self.data[i * n..(i + 1) * n]
    }

    /// Copies the selected rows into a new array. Never a view: mutating the
    /// result leaves `self` untouched.
    pub fn gather_rows(&self, indices: &[usize]) -> Array {
        let n = self.row_len();
        let mut shape = self.shape.clone();
        match shape.first_mut() {
            Some(rows) => *rows = indices.len(),
            None => shape.push(indices.len()),
        }
        let mut data = Vec::with_capacity(indices.len() * n);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Array { shape, data }
    }

    /// Mirrors row `i` along the last axis (left/right flip for images).
    pub fn flip_row_last_axis(&mut self, i: usize) {
        let width = self.shape.last().copied().unwrap_or(0);
        if width < 2 || self.shape.len() < 2 {
            return;
        }
        for line in self.row_mut(i).chunks_mut(width) {
            line.reverse();
        }
    }

    pub fn map<F>(&self, functor: F) -> Array
    where
        F: Fn(f64) -> f64,
    {
        Array {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| functor(x)).collect(),
        }
    }

    /// Writes the bincode form of the array.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    /// Reads an array previously written by `write_to`, rejecting entries
    /// whose shape does not account for their data.
    pub fn read_from<R: Read>(reader: R) -> Result<Array> {
        let array: Array = bincode::deserialize_from(reader)?;
        Array::from_vec(array.shape, array.data)
    }
}

/// Product of `shape`, or `None` on overflow.
fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

impl Default for Array {
    fn default() -> Self {
        Array { shape: vec![0], data: vec![] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_returns_an_independent_copy() {
        let source = Array::from_vec(vec![3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let mut picked = source.gather_rows(&[2, 0, 2]);
        assert_eq!(picked.shape(), &[3, 2]);
        assert_eq!(picked.data(), &[5.0, 6.0, 1.0, 2.0, 5.0, 6.0]);

        picked.data_mut()[0] = -1.0;
        assert_eq!(source.row(2), &[5.0, 6.0]);
    }

    #[test]
    fn gather_from_a_scalar_yields_a_vector() {
        let scalar = Array::from_vec(vec![], vec![4.0]).unwrap();
        assert_eq!(scalar.gather_rows(&[]), Array::from_vec(vec![0], vec![]).unwrap());
        assert_eq!(scalar.gather_rows(&[0, 0]).shape(), &[2]);
    }

    #[test]
    fn flip_mirrors_only_the_selected_row() {
        let mut a = Array::from_vec(vec![2, 1, 2, 3], (0..12).map(|x| x as f64).collect()).unwrap();
        a.flip_row_last_axis(1);
        assert_eq!(a.row(0), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(a.row(1), &[8.0, 7.0, 6.0, 11.0, 10.0, 9.0]);
    }

    #[test]
    fn from_vec_rejects_wrong_element_count() {
        let err = Array::from_vec(vec![2, 2], vec![1.0; 3]).unwrap_err();
        assert!(matches!(err, PipelineError::Shape(_)));
    }

    #[test]
    fn binary_codec_preserves_shape_and_values() {
        let a = Array::uniform(&[2, 3, 4], 1.0);
        let mut bytes = Vec::new();
        a.write_to(&mut bytes).unwrap();
        let b = Array::read_from(bytes.as_slice()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn corrupt_encodings_are_errors() {
        // A shape whose element count overflows, with no data behind it.
        let bytes = bincode::serialize(&(vec![1usize << 62, 8], Vec::<f64>::new())).unwrap();
        let err = Array::read_from(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, PipelineError::Shape(_)));

        let bytes = bincode::serialize(&(vec![2usize, 2], vec![1.0f64; 3])).unwrap();
        let err = Array::read_from(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, PipelineError::Shape(_)));

        let err = Array::read_from(&b"garbage"[..]).unwrap_err();
        assert!(matches!(err, PipelineError::Binary(_)));
    }

    #[test]
    fn uniform_respects_spread() {
        let a = Array::uniform(&[100], 0.5);
        assert!(a.data().iter().all(|&x| (-0.25..0.25).contains(&x)));
    }
}
