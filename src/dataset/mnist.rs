//! The [MNIST](<http://yann.lecun.com/exdb/mnist/>) dataset.
use super::Split;
use anyhow::{bail, ensure, Context, Result};
use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::GzDecoder;
use ndarray::{s, Array1, Array2};
use std::{
    fs::File,
    io::Read,
    path::Path,
};

const IMAGES_MAGIC: i32 = 2_051;
const LABELS_MAGIC: i32 = 2_049;

/// Mnist builder.
pub mod builders {
    use super::{Mnist, Result};
    use std::path::{Path, PathBuf};

    /// Mnist builder.
    #[derive(Clone, Debug)]
    pub struct MnistBuilder {
        pub(super) path: Option<PathBuf>,
        pub(super) validation_len: usize,
    }

    impl Default for MnistBuilder {
        fn default() -> Self {
            Self {
                path: None,
                validation_len: 10_000,
            }
        }
    }

    impl MnistBuilder {
        /// The folder containing the gzip'd IDX files.
        ///
        /// If not specified, uses "mnist" in the OS specific "Downloads" directory or the "Temp"
        /// directory.
        pub fn path(self, path: impl AsRef<Path>) -> Self {
            Self {
                path: Some(path.as_ref().to_owned()),
                ..self
            }
        }
        /// The number of training images held out for validation. Defaults to 10_000.
        ///
        /// The validation split is taken from the end of the training images.
        pub fn validation_len(self, validation_len: usize) -> Self {
            Self {
                validation_len,
                ..self
            }
        }
        /// Loads the dataset.
        ///
        /// **Errors**
        /// - The files were not found.
        /// - Decompressing / parsing the data failed.
        /// - There are not more training images than `validation_len`.
        pub fn build(&self) -> Result<Mnist> {
            Mnist::build(self)
        }
    }
}
use builders::MnistBuilder;

/// The MNIST dataset.
///
/// Images are flattened to rows of `height * width` pixels in `[0, 1]`.
#[derive(Clone, Debug)]
pub struct Mnist {
    training: Split,
    validation: Split,
    test: Split,
    image_shape: [usize; 2],
}

impl Mnist {
    /// Returns an [`MnistBuilder`] used to specify options.
    ///
    ///```no_run
    /// # use convnet::dataset::mnist::Mnist;
    /// # fn main() -> anyhow::Result<()> {
    /// let mnist = Mnist::builder().path("data/mnist").build()?;
    /// assert_eq!(mnist.training().len(), 50_000);
    /// # Ok(())
    /// # }
    ///```
    pub fn builder() -> MnistBuilder {
        MnistBuilder::default()
    }
    fn build(builder: &MnistBuilder) -> Result<Self> {
        let path = builder.path.clone().unwrap_or_else(|| {
            dirs::download_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("mnist")
        });
        let (train_images, image_shape) = read_images(&path.join("train-images-idx3-ubyte.gz"))?;
        let train_labels = read_labels(&path.join("train-labels-idx1-ubyte.gz"))?;
        let (test_images, test_shape) = read_images(&path.join("t10k-images-idx3-ubyte.gz"))?;
        let test_labels = read_labels(&path.join("t10k-labels-idx1-ubyte.gz"))?;
        ensure!(
            image_shape == test_shape,
            "Training images are {image_shape:?} but test images are {test_shape:?}!"
        );
        let rows = train_images.nrows();
        let validation_len = builder.validation_len;
        ensure!(
            validation_len < rows,
            "Can not hold out {validation_len} of {rows} training images for validation!"
        );
        let offset = rows - validation_len;
        let training = Split::from_arrays(
            &train_images.slice(s![..offset, ..]),
            &train_labels.slice(s![..offset]),
        )?;
        let validation = Split::from_arrays(
            &train_images.slice(s![offset.., ..]),
            &train_labels.slice(s![offset..]),
        )?;
        let test = Split::from_arrays(&test_images, &test_labels)?;
        tracing::info!(
            "loaded mnist from {}: {} training, {} validation, {} test",
            path.display(),
            training.len(),
            validation.len(),
            test.len()
        );
        Ok(Self {
            training,
            validation,
            test,
            image_shape,
        })
    }
    /// The training split.
    pub fn training(&self) -> &Split {
        &self.training
    }
    /// The validation split.
    pub fn validation(&self) -> &Split {
        &self.validation
    }
    /// The test split.
    pub fn test(&self) -> &Split {
        &self.test
    }
    /// `[height, width]` of the images.
    pub fn image_shape(&self) -> [usize; 2] {
        self.image_shape
    }
}

fn open(path: &Path) -> Result<GzDecoder<File>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}!", path.display()))?;
    Ok(GzDecoder::new(file))
}

fn read_dim(decoder: &mut GzDecoder<File>, path: &Path, name: &str) -> Result<usize> {
    let dim = decoder.read_i32::<BigEndian>()?;
    ensure!(dim >= 0, "{} has negative {name} {dim}!", path.display());
    Ok(dim as usize)
}

fn read_header(decoder: &mut GzDecoder<File>, path: &Path, magic: i32) -> Result<usize> {
    let found = decoder.read_i32::<BigEndian>()?;
    ensure!(
        found == magic,
        "{} has magic number {found}, expected {magic}!",
        path.display()
    );
    read_dim(decoder, path, "length")
}

/// Pixels scaled to `[0, 1]`.
fn read_images(path: &Path) -> Result<(Array2<f32>, [usize; 2])> {
    let mut decoder = open(path)?;
    let n = read_header(&mut decoder, path, IMAGES_MAGIC)?;
    let height = read_dim(&mut decoder, path, "height")?;
    let width = read_dim(&mut decoder, path, "width")?;
    let pixels = height
        .checked_mul(width)
        .and_then(|pixels| pixels.checked_mul(n).map(|len| (pixels, len)));
    let Some((pixels, len)) = pixels else {
        bail!(
            "{} has {n} images of {height} x {width}, which overflows!",
            path.display()
        );
    };
    let mut data = Vec::new();
    decoder.read_to_end(&mut data)?;
    ensure!(
        data.len() == len,
        "{} has {} bytes of pixels, expected {len}!",
        path.display(),
        data.len(),
    );
    let images = Array2::from_shape_vec([n, pixels], data)?.map(|x| *x as f32 / 255.);
    Ok((images, [height, width]))
}

fn read_labels(path: &Path) -> Result<Array1<u8>> {
    let mut decoder = open(path)?;
    let n = read_header(&mut decoder, path, LABELS_MAGIC)?;
    let mut data = Vec::new();
    decoder.read_to_end(&mut data)?;
    ensure!(
        data.len() == n,
        "{} has {} labels, expected {n}!",
        path.display(),
        data.len()
    );
    Ok(Array1::from(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    fn write_idx(path: &Path, magic: i32, dims: &[i32], data: &[u8]) -> Result<()> {
        let mut encoder = GzEncoder::new(File::create(path)?, Compression::fast());
        encoder.write_i32::<BigEndian>(magic)?;
        for dim in dims {
            encoder.write_i32::<BigEndian>(*dim)?;
        }
        encoder.write_all(data)?;
        encoder.finish()?;
        Ok(())
    }

    fn write_mnist(dir: &Path, train: usize, test: usize) -> Result<()> {
        for (prefix, n) in [("train", train), ("t10k", test)] {
            let pixels: Vec<u8> = (0..n * 4).map(|i| (i % 256) as u8).collect();
            let labels: Vec<u8> = (0..n).map(|i| (i % 10) as u8).collect();
            write_idx(
                &dir.join(format!("{prefix}-images-idx3-ubyte.gz")),
                IMAGES_MAGIC,
                &[n as i32, 2, 2],
                &pixels,
            )?;
            write_idx(
                &dir.join(format!("{prefix}-labels-idx1-ubyte.gz")),
                LABELS_MAGIC,
                &[n as i32],
                &labels,
            )?;
        }
        Ok(())
    }

    #[test]
    fn mnist_splits() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_mnist(dir.path(), 12, 5)?;
        let mnist = Mnist::builder()
            .path(dir.path())
            .validation_len(4)
            .build()?;
        assert_eq!(mnist.image_shape(), [2, 2]);
        assert_eq!(mnist.training().len(), 8);
        assert_eq!(mnist.validation().len(), 4);
        assert_eq!(mnist.test().len(), 5);
        assert_eq!(mnist.training().features(), 4);
        assert_eq!(mnist.validation().labels()[0], 8);
        assert_eq!(mnist.training().inputs()[[0, 3]], 3. / 255.);
        assert!(mnist
            .training()
            .inputs()
            .iter()
            .all(|x| (0. ..=1.).contains(x)));
        Ok(())
    }

    #[test]
    fn mnist_bad_magic() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_mnist(dir.path(), 12, 5)?;
        write_idx(
            &dir.path().join("t10k-labels-idx1-ubyte.gz"),
            IMAGES_MAGIC,
            &[5],
            &[0; 5],
        )?;
        assert!(Mnist::builder().path(dir.path()).validation_len(4).build().is_err());
        Ok(())
    }

    #[test]
    fn mnist_corrupt_image_header() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_mnist(dir.path(), 12, 5)?;
        let images = dir.path().join("t10k-images-idx3-ubyte.gz");
        write_idx(&images, IMAGES_MAGIC, &[5, -2, 2], &[0; 20])?;
        let error = Mnist::builder()
            .path(dir.path())
            .validation_len(4)
            .build()
            .unwrap_err();
        assert!(format!("{error:#}").contains("negative height"), "{error:#}");
        write_idx(&images, IMAGES_MAGIC, &[i32::MAX, i32::MAX, i32::MAX], &[0; 20])?;
        let error = Mnist::builder()
            .path(dir.path())
            .validation_len(4)
            .build()
            .unwrap_err();
        assert!(format!("{error:#}").contains("overflows"), "{error:#}");
        Ok(())
    }

    #[test]
    fn mnist_validation_too_large() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_mnist(dir.path(), 12, 5)?;
        assert!(Mnist::builder().path(dir.path()).build().is_err());
        Ok(())
    }
}
