//! Datasets.
use crate::error::ConfigError;
use anyhow::{ensure, Result};
use ndarray::{s, ArcArray1, ArcArray2, ArrayBase, Data, Ix1, Ix2};
use num_traits::AsPrimitive;

#[cfg(feature = "mnist")]
pub mod mnist;

/// A dataset split.
///
/// Inputs are `[rows, features]`, labels are the class index of each row. The arrays are shared,
/// mini-batches are sliced without copying.
#[derive(Clone, Debug)]
pub struct Split {
    inputs: ArcArray2<f32>,
    labels: ArcArray1<u32>,
}

impl Split {
    /// Creates a split.
    ///
    /// **Errors**
    ///
    /// [`ConfigError::RowMismatch`] if `inputs` and `labels` have different row counts.
    pub fn new(inputs: ArcArray2<f32>, labels: ArcArray1<u32>) -> Result<Self> {
        let rows = inputs.nrows();
        if rows != labels.len() {
            return Err(ConfigError::RowMismatch {
                inputs: rows,
                labels: labels.len(),
            }
            .into());
        }
        Ok(Self { inputs, labels })
    }
    /// Creates a split from arrays of any numeric type.
    ///
    /// Inputs are cast to f32 and labels to u32.
    ///
    ///```
    /// # use convnet::dataset::Split;
    /// # use ndarray::{arr1, arr2};
    /// # fn main() -> anyhow::Result<()> {
    /// let split = Split::from_arrays(&arr2(&[[0u8, 255], [255, 0]]), &arr1(&[1u8, 0]))?;
    /// assert_eq!(split.len(), 2);
    /// # Ok(())
    /// # }
    ///```
    pub fn from_arrays<S1, S2, X, T>(
        inputs: &ArrayBase<S1, Ix2>,
        labels: &ArrayBase<S2, Ix1>,
    ) -> Result<Self>
    where
        S1: Data<Elem = X>,
        S2: Data<Elem = T>,
        X: AsPrimitive<f32>,
        T: AsPrimitive<u32>,
    {
        Self::new(
            inputs.map(|x| (*x).as_()).into_shared(),
            labels.map(|t| (*t).as_()).into_shared(),
        )
    }
    /// The inputs.
    pub fn inputs(&self) -> &ArcArray2<f32> {
        &self.inputs
    }
    /// The labels.
    pub fn labels(&self) -> &ArcArray1<u32> {
        &self.labels
    }
    /// The number of rows.
    pub fn len(&self) -> usize {
        self.labels.len()
    }
    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
    /// The number of columns per row.
    pub fn features(&self) -> usize {
        self.inputs.ncols()
    }
    /// The number of full mini-batches.
    ///
    /// Remaining rows are not used.
    pub fn batch_count(&self, mini_batch_size: usize) -> usize {
        if mini_batch_size == 0 {
            0
        } else {
            self.len() / mini_batch_size
        }
    }
    /// Rows `[index * mini_batch_size, (index + 1) * mini_batch_size)`.
    pub fn mini_batch(
        &self,
        index: usize,
        mini_batch_size: usize,
    ) -> Result<(ArcArray2<f32>, ArcArray1<u32>)> {
        let count = self.batch_count(mini_batch_size);
        ensure!(
            index < count,
            "Mini-batch {index} out of range, split has {count} batches of {mini_batch_size}!"
        );
        let start = index * mini_batch_size;
        let end = start + mini_batch_size;
        let inputs = self.inputs.clone().slice_move(s![start..end, ..]);
        let labels = self.labels.clone().slice_move(s![start..end]);
        Ok((inputs, labels))
    }
}
