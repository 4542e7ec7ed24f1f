//! Reading and writing 2-D label images, and a background writer.
//!
//! Labels are stored as single-channel 8- or 16-bit grayscale (PNG or TIFF,
//! chosen by file extension). Values are taken verbatim, never rescaled.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{PoolError, ShutdownMode, WorkerPool};
use image::{DynamicImage, ImageBuffer, Luma};
use ndarray::{ArrayD, ArrayViewD, IxDyn};

use crate::voxel::Label;

#[derive(Debug, thiserror::Error)]
pub enum ImageIoError {
    #[error("Failed to read '{path}'")]
    Read {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Failed to write '{path}'")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("'{path}' has color type {color}, expected single-channel grayscale")]
    UnsupportedColorType { path: PathBuf, color: String },
    #[error("Only 2-D label images can be stored, got shape {0:?}")]
    UnsupportedShape(Vec<usize>),
    #[error("Label {0} does not fit into 16 bits")]
    LabelOverflow(u64),
    #[error("Invalid image shape")]
    Shape(#[from] ndarray::ShapeError),
    #[error("{0} image writes failed")]
    WriteFailed(usize),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

pub type Result<T> = std::result::Result<T, ImageIoError>;

/// Loads a grayscale label image as a `[height, width]` array.
pub fn load_label_image(path: &Path) -> Result<ArrayD<u16>> {
    let img = image::open(path).map_err(|source| ImageIoError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let (width, height) = (img.width() as usize, img.height() as usize);
    let pixels: Vec<u16> = match img {
        DynamicImage::ImageLuma8(buffer) => buffer.into_raw().into_iter().map(u16::from).collect(),
        DynamicImage::ImageLuma16(buffer) => buffer.into_raw(),
        other => {
            return Err(ImageIoError::UnsupportedColorType {
                path: path.to_path_buf(),
                color: format!("{:?}", other.color()),
            });
        }
    };

    tracing::debug!("Loaded {}x{} label image {}", width, height, path.display());
    Ok(ArrayD::from_shape_vec(IxDyn(&[height, width]), pixels)?)
}

/// Saves a `[height, width]` label image as 16-bit grayscale.
pub fn save_label_image<L: Label>(path: &Path, image: ArrayViewD<'_, L>) -> Result<()> {
    let &[height, width] = image.shape() else {
        return Err(ImageIoError::UnsupportedShape(image.shape().to_vec()));
    };

    let pixels = image
        .iter()
        .map(|&v| {
            let label = v.to_label();
            u16::try_from(label).map_err(|_| ImageIoError::LabelOverflow(label))
        })
        .collect::<Result<Vec<u16>>>()?;

    let buffer = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| ImageIoError::UnsupportedShape(vec![height, width]))?;
    buffer.save(path).map_err(|source| ImageIoError::Write {
        path: path.to_path_buf(),
        source,
    })
}

// ============================================================================
// ImageWriter
// ============================================================================

/// One queued image write.
#[derive(Debug)]
pub struct WriteJob {
    pub path: PathBuf,
    pub image: ArrayD<u16>,
}

/// Saves label images on background threads.
///
/// [`write`](Self::write) blocks while `queue_limit` writes are already
/// waiting. Failed writes are logged and counted; [`finish`](Self::finish)
/// reports them.
#[derive(Debug)]
pub struct ImageWriter {
    pool: WorkerPool<WriteJob>,
    queue_limit: usize,
    failures: Arc<AtomicUsize>,
}

impl ImageWriter {
    pub fn new(worker_count: usize, queue_limit: usize) -> Result<Self> {
        if queue_limit == 0 {
            return Err(PoolError::ZeroQueueLimit.into());
        }

        let failures = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new("image-writer", worker_count, {
            let failures = Arc::clone(&failures);
            move |job: WriteJob| match save_label_image(&job.path, job.image.view()) {
                Ok(()) => tracing::debug!("Wrote {}", job.path.display()),
                Err(err) => {
                    tracing::error!("Failed to write {}: {}", job.path.display(), err);
                    failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        })?;

        Ok(Self {
            pool,
            queue_limit,
            failures,
        })
    }

    /// Queues a write, waiting while the queue is full.
    pub fn write(&self, path: impl Into<PathBuf>, image: ArrayD<u16>) -> Result<()> {
        let job = WriteJob {
            path: path.into(),
            image,
        };
        self.pool.submit_bounded(job, self.queue_limit)?;
        Ok(())
    }

    /// Queues a write without waiting.
    pub fn write_nonblocking(&self, path: impl Into<PathBuf>, image: ArrayD<u16>) -> Result<()> {
        let job = WriteJob {
            path: path.into(),
            image,
        };
        self.pool.submit(job)?;
        Ok(())
    }

    pub fn queued(&self) -> usize {
        self.pool.queued()
    }

    /// Completes every queued write and stops the workers.
    pub fn finish(mut self) -> Result<()> {
        self.pool.shutdown(ShutdownMode::Drain);
        match self.failures.load(Ordering::Relaxed) {
            0 => Ok(()),
            failed => Err(ImageIoError::WriteFailed(failed)),
        }
    }

    /// Drops queued writes, waits for running ones and stops the workers.
    /// Returns the number of dropped writes.
    pub fn abort(mut self) -> usize {
        let abandoned = self.pool.shutdown(ShutdownMode::Abandon);
        if abandoned > 0 {
            tracing::warn!("Image writer aborted, {} writes dropped", abandoned);
        }
        abandoned
    }
}
