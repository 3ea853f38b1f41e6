//! Magnetic-Resonance Spectrometer Console in Rust
//!
//! This library drives a networked magnetic-resonance spectrometer: it
//! encodes acquisition commands over a persistent stream connection to an
//! instrument server, streams back raw complex sample buffers, and turns
//! those buffers into spectra, assembled 2-D k-space images, and fitted
//! relaxation curves.
//!
//! # Features
//!
//! - **Typed command codec** - The legacy bit-packed trigger protocol as a
//!   tagged `Command` enum, validated before any bytes hit the wire
//! - **Structured control packets** - A versioned, map-carrying record
//!   format for richer exchanges, round-trippable in both directions
//! - **Deadline-bearing transport** - Blocking TCP with all-or-nothing
//!   receives that never corrupt connection state on timeout
//! - **Spectral analysis** - Peak detection, FWHM, SNR, and an
//!   evaluability gate shared by every acquisition type
//! - **K-space assembly and reconstruction** - Write-once-per-row buffers
//!   and a pure 2-D centered FFT, so live previews match final images
//! - **Relaxometry** - Bounded exponential fitting and root solving for
//!   T1/T2 with explicit, non-throwing failure sentinels
//!
//! # Quick Start
//!
//! ## Acquiring a spectrum
//!
//! ```no_run
//! use mrconsole_rust::acquire::{AcquisitionDriver, AcquisitionParams, InstrumentState};
//! use mrconsole_rust::io::TcpTransport;
//!
//! let mut transport = TcpTransport::new();
//! transport.connect("192.168.1.101:1001")?;
//!
//! let mut driver = AcquisitionDriver::new(transport);
//! let state = InstrumentState {
//!     frequency_mhz: 20.0971,
//!     attenuation_db: 10.0,
//!     gradient_offsets_ma: [0, 0, 0, 0],
//!     sample_count: 50_000,
//! };
//! driver.apply_instrument_state(&state)?;
//!
//! let params = AcquisitionParams::default();
//! let record = driver.acquire_spectrum(&state, &params)?;
//! if record.is_evaluable() {
//!     let peak = record.peak_parameters();
//!     println!("peak at {} MHz", peak.center_frequency_mhz);
//! }
//! # Ok::<(), mrconsole_rust::error::ConsoleError>(())
//! ```
//!
//! ## Acquiring a 2-D image
//!
//! ```no_run
//! use mrconsole_rust::acquire::{AcquisitionDriver, AcquisitionParams, CancelToken, InstrumentState};
//! use mrconsole_rust::io::TcpTransport;
//!
//! let mut transport = TcpTransport::new();
//! transport.connect("192.168.1.101:1001")?;
//! let mut driver = AcquisitionDriver::new(transport);
//!
//! let state = InstrumentState::default();
//! let params = AcquisitionParams::default();
//! let cancel = CancelToken::new();
//! let outcome = driver.acquire_image(
//!     &state,
//!     &params,
//!     64,
//!     4000,
//!     |percent| println!("{percent}%"),
//!     &cancel,
//! )?;
//! println!("image shape: {:?}", outcome.image.magnitude.dim());
//! # Ok::<(), mrconsole_rust::error::ConsoleError>(())
//! ```
//!
//! # Architecture
//!
//! - **`protocol`** - Wire formats
//!   - `command` - Legacy 32-bit little-endian command words
//!   - `packet` - Structured 5-element control records
//!   - `readout` - Raw complex sample stream decoding
//!
//! - **`io`** - Network I/O layer
//!   - `Transport` - Blocking, deadline-bearing send/receive seam
//!   - `TcpTransport` - The TCP implementation with state subscribers
//!
//! - **`analysis`** - Signal processing
//!   - `spectrum` - Time/frequency views and derived spectral metrics
//!   - `kspace` - Phase-encode row assembly
//!   - `recon` - 2-D centered FFT reconstruction
//!   - `relaxometry` - Exponential model fitting and relaxation times
//!
//! - **`acquire`** - Sequencing
//!   - `AcquisitionDriver` - The per-acquisition state machine
//!   - `Relaxometer` - Repeated single-shot measurement loops
//!
//! - **`error`** - `ConsoleError` and the `Result<T>` alias
//! - **`config`** - TOML-backed default instrument parameters
//!
//! # Error Handling
//!
//! All fallible operations return `Result<T, ConsoleError>`. Connection and
//! protocol errors abort the acquisition in flight and leave the connection
//! consistent for retry. Undefined spectral metrics and failed fits are not
//! errors: they come back as NaN sentinels with explicit validity flags, so
//! display code can render "no data" instead of crashing.

pub mod acquire;
pub mod analysis;
pub mod config;
pub mod error;
pub mod io;
pub mod protocol;

// Re-export commonly used types
pub use error::{ConsoleError, Result};
