//! K-space assembly buffer
//!
//! One image acquisition fills a 2-D grid of complex samples, one
//! phase-encode row per readout. Rows are write-once; completeness is
//! decided purely by how many rows have been written, not by the order
//! they arrived in, so a server that delivers lines out of order still
//! produces a complete buffer.

use ndarray::Array2;
use num_complex::Complex;

use crate::error::{ConsoleError, Result};

/// Samples kept per phase-encode line by the default crop
const DEFAULT_CROP_PER_LINE: usize = 10;

/// 2-D grid of complex samples, rows indexed by phase-encode line
#[derive(Debug, Clone, PartialEq)]
pub struct KSpaceBuffer {
    data: Array2<Complex<f32>>,
    written: Vec<bool>,
    rows_received: usize,
    crop_offset: usize,
}

impl KSpaceBuffer {
    /// Create an empty buffer of `npe` rows by `crop_len` columns
    ///
    /// Each incoming readout is cropped to `[crop_offset, crop_offset +
    /// crop_len)` on ingest, capturing the echo window within the raw
    /// trace.
    pub fn new(npe: usize, crop_len: usize, crop_offset: usize) -> Self {
        KSpaceBuffer {
            data: Array2::zeros((npe, crop_len)),
            written: vec![false; npe],
            rows_received: 0,
            crop_offset,
        }
    }

    /// Create a buffer with the instrument's default crop window
    pub fn with_default_crop(npe: usize) -> Self {
        Self::new(npe, Self::default_crop_len(npe), 0)
    }

    /// Default crop length for `npe` phase-encode lines
    pub fn default_crop_len(npe: usize) -> usize {
        npe * DEFAULT_CROP_PER_LINE
    }

    /// Number of phase-encode rows
    pub fn npe(&self) -> usize {
        self.data.nrows()
    }

    /// Samples kept per row
    pub fn crop_len(&self) -> usize {
        self.data.ncols()
    }

    /// Write one phase-encode row from a raw readout
    ///
    /// Rows may arrive in any order, but each row is writable exactly
    /// once.
    ///
    /// # Errors
    ///
    /// - [`ConsoleError::InvalidParameter`] - Row out of range or already
    ///   written
    /// - [`ConsoleError::InvalidFrame`] - Readout shorter than the crop
    ///   window
    pub fn set_row(&mut self, row: usize, readout: &[Complex<f32>]) -> Result<()> {
        let npe = self.npe();
        if row >= npe {
            return Err(ConsoleError::InvalidParameter(format!(
                "phase-encode row {row} out of range 0..{npe}"
            )));
        }
        if self.written[row] {
            return Err(ConsoleError::InvalidParameter(format!(
                "phase-encode row {row} already written"
            )));
        }
        let end = self.crop_offset + self.crop_len();
        if readout.len() < end {
            return Err(ConsoleError::InvalidFrame {
                expected: end,
                actual: readout.len(),
            });
        }

        let window = &readout[self.crop_offset..end];
        for (dst, src) in self.data.row_mut(row).iter_mut().zip(window) {
            *dst = *src;
        }
        self.written[row] = true;
        self.rows_received += 1;
        Ok(())
    }

    /// Whether a given row has been written
    pub fn row_written(&self, row: usize) -> bool {
        self.written.get(row).copied().unwrap_or(false)
    }

    /// Number of rows written so far
    pub fn rows_received(&self) -> usize {
        self.rows_received
    }

    /// True iff every phase-encode row has been written
    pub fn complete(&self) -> bool {
        self.rows_received == self.npe()
    }

    /// The assembled grid
    pub fn data(&self) -> &Array2<Complex<f32>> {
        &self.data
    }
}
