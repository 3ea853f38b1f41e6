//! Signal processing for acquired sample buffers
//!
//! Everything in this module is pure: functions of the sample data and
//! parameters alone, with no instrument or network state. The acquisition
//! layer feeds raw readouts in and gets spectra, images, and fitted
//! relaxation curves out.

pub mod kspace;
pub mod recon;
pub mod relaxometry;
pub mod spectrum;

pub use kspace::KSpaceBuffer;
pub use recon::{default_center, reconstruct, ReconstructedImage};
pub use relaxometry::{fit, FitBounds, RelaxationFit, RelaxationKind, RelaxationSeries};
pub use spectrum::{Fwhm, PeakParameters, SpectrumRecord};
