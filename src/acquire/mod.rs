//! Acquisition sequencing
//!
//! The orchestrator runs one acquisition at a time over one transport;
//! the relaxometer composes repeated single-shot acquisitions into a
//! fitted relaxation curve.

pub mod orchestrator;
pub mod relaxometer;

pub use orchestrator::{
    AcquisitionDriver, AcquisitionParams, AcquisitionState, CancelToken, ImageAcquisition,
    InstrumentState,
};
pub use relaxometer::{Relaxometer, RelaxometryRun, SequenceProvider};
