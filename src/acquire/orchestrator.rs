//! Per-acquisition state machine
//!
//! One [`AcquisitionDriver`] owns one transport and drives exactly one
//! acquisition at a time through `Idle -> Triggered -> AwaitingData ->
//! Processing -> Complete | Failed`. Serialization comes from the state
//! machine itself, not from locks, because there is exactly one
//! connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::analysis::kspace::KSpaceBuffer;
use crate::analysis::recon::{default_center, reconstruct, ReconstructedImage};
use crate::analysis::spectrum::SpectrumRecord;
use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, Result};
use crate::io::Transport;
use crate::protocol::command::{Command, GradientAxis, ProjectionAxis};
use crate::protocol::readout::{decode_readout, readout_len};

/// Phases of a single acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Triggered,
    AwaitingData,
    Processing,
    Complete,
    Failed,
}

impl AcquisitionState {
    /// True while an acquisition occupies the connection
    pub fn in_flight(&self) -> bool {
        matches!(
            self,
            AcquisitionState::Triggered
                | AcquisitionState::AwaitingData
                | AcquisitionState::Processing
        )
    }
}

/// Instrument parameters for one acquisition
///
/// An explicit value passed into the driver rather than process-wide
/// state, so the transport, the codec, and any display layer never
/// share hidden parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentState {
    /// Excitation frequency in MHz
    pub frequency_mhz: f64,
    /// Transmit attenuation in dB
    pub attenuation_db: f64,
    /// Shim currents in mA for the X, Y, Z, Z2 gradient channels
    pub gradient_offsets_ma: [i32; 4],
    /// Complex samples per readout
    pub sample_count: usize,
}

impl Default for InstrumentState {
    fn default() -> Self {
        let config = ConsoleConfig::default();
        InstrumentState {
            frequency_mhz: config.excitation_frequency_mhz,
            attenuation_db: config.attenuation_db,
            gradient_offsets_ma: config.gradient_offsets_ma,
            sample_count: config.sample_count,
        }
    }
}

/// Processing parameters shared by every acquisition type
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionParams {
    /// Acquisition window kept for analysis, in milliseconds
    pub sample_time_ms: f64,
    /// Receive bandwidth in Hz, spanning the full spectrum
    pub frequency_range_hz: f64,
    /// Deadline for each readout receive
    pub receive_deadline: Duration,
    /// First raw sample kept when cropping a readout into k-space
    pub kspace_crop_offset: usize,
    /// Reconstruction center column, or `None` for the instrument default
    pub recon_center: Option<usize>,
}

impl Default for AcquisitionParams {
    fn default() -> Self {
        let config = ConsoleConfig::default();
        AcquisitionParams {
            sample_time_ms: config.sample_time_ms,
            frequency_range_hz: config.frequency_range_hz,
            receive_deadline: Duration::from_secs(10),
            kspace_crop_offset: config.kspace_crop_offset,
            recon_center: config.recon_center,
        }
    }
}

/// Cooperative cancellation flag
///
/// Cancellation is honored between discrete steps only: between
/// phase-encode rows and between relaxometry timing points, never inside
/// a half-received buffer.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation at the next step boundary
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Result of a completed 2-D image acquisition
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAcquisition {
    /// The fully assembled k-space buffer
    pub kspace: KSpaceBuffer,
    /// Reconstruction of that buffer
    pub image: ReconstructedImage,
}

/// Drives acquisitions over one transport
pub struct AcquisitionDriver<T: Transport> {
    transport: T,
    state: AcquisitionState,
    last_frequency_word: Option<u32>,
}

impl<T: Transport> AcquisitionDriver<T> {
    pub fn new(transport: T) -> Self {
        AcquisitionDriver {
            transport,
            state: AcquisitionState::Idle,
            last_frequency_word: None,
        }
    }

    /// Current phase of the state machine
    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the driver and return its transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Push the full instrument state to the server
    ///
    /// Sends attenuation and all four gradient offsets unconditionally,
    /// and the frequency only when it differs from the last value sent.
    pub fn apply_instrument_state(&mut self, state: &InstrumentState) -> Result<()> {
        self.set_frequency(state.frequency_mhz)?;
        self.send(&Command::SetAttenuation(state.attenuation_db))?;
        let axes = [
            GradientAxis::X,
            GradientAxis::Y,
            GradientAxis::Z,
            GradientAxis::Z2,
        ];
        for (axis, &offset) in axes.iter().zip(&state.gradient_offsets_ma) {
            self.send(&Command::SetGradientOffset(*axis, offset))?;
        }
        info!(
            frequency_mhz = state.frequency_mhz,
            attenuation_db = state.attenuation_db,
            "Applied instrument state"
        );
        Ok(())
    }

    /// Set the excitation frequency, skipping redundant writes
    ///
    /// Two frequencies that encode to the same command word are the same
    /// frequency as far as the instrument is concerned, so the comparison
    /// happens on the encoded word.
    pub fn set_frequency(&mut self, frequency_mhz: f64) -> Result<()> {
        let command = Command::SetFrequency(frequency_mhz);
        let word = command.word()?;
        if self.last_frequency_word == Some(word) {
            debug!(frequency_mhz, "Frequency unchanged, write suppressed");
            return Ok(());
        }
        self.send(&command)?;
        self.last_frequency_word = Some(word);
        Ok(())
    }

    /// Upload an assembled pulse-sequence byte stream
    pub fn upload_sequence(&mut self, sequence: &[u8]) -> Result<()> {
        if self.state.in_flight() {
            return Err(ConsoleError::AcquisitionInProgress);
        }
        self.send(&Command::UploadSequence(sequence.to_vec()))?;
        info!(bytes = sequence.len(), "Uploaded pulse sequence");
        Ok(())
    }

    /// Trigger a single-shot spectrum acquisition and analyze the readout
    pub fn acquire_spectrum(
        &mut self,
        state: &InstrumentState,
        params: &AcquisitionParams,
    ) -> Result<SpectrumRecord> {
        self.begin()?;
        self.guarded(|driver| {
            driver.set_frequency(state.frequency_mhz)?;
            driver.send(&Command::TriggerSpectrum)?;
            driver.receive_record(state, params)
        })
    }

    /// Trigger a 1-D projection along one gradient axis
    ///
    /// The axis is validated before any bytes are sent.
    pub fn acquire_projection(
        &mut self,
        state: &InstrumentState,
        params: &AcquisitionParams,
        axis: ProjectionAxis,
    ) -> Result<SpectrumRecord> {
        self.begin()?;
        self.guarded(|driver| {
            driver.set_frequency(state.frequency_mhz)?;
            driver.send(&Command::TriggerProjection(axis))?;
            driver.receive_record(state, params)
        })
    }

    /// Trigger a 2-D image acquisition and assemble all phase-encode rows
    ///
    /// `progress` is called once per received row with a percentage in
    /// `1..=100`. Phase-encode rows are assumed to arrive in phase-encode
    /// order; the server sends them sequentially and the readouts carry no
    /// row tag. A timed-out or cancelled acquisition surfaces the partial
    /// buffer through [`ConsoleError::IncompleteAcquisition`] so a caller
    /// may still reconstruct what arrived.
    pub fn acquire_image(
        &mut self,
        state: &InstrumentState,
        params: &AcquisitionParams,
        npe: u16,
        repetition_time: u16,
        mut progress: impl FnMut(u32),
        cancel: &CancelToken,
    ) -> Result<ImageAcquisition> {
        self.begin()?;
        self.guarded(|driver| {
            driver.send(&Command::TriggerImage(npe, repetition_time))?;
            driver.state = AcquisitionState::AwaitingData;

            let npe = npe as usize;
            let crop_len = KSpaceBuffer::default_crop_len(npe);
            let mut buffer = KSpaceBuffer::new(npe, crop_len, params.kspace_crop_offset);
            let frame_len = readout_len(state.sample_count);

            for row in 0..npe {
                if cancel.is_cancelled() {
                    warn!(row, npe, "Image acquisition cancelled");
                    return Err(incomplete(buffer, npe));
                }
                let bytes = match driver
                    .transport
                    .receive_exact(frame_len, params.receive_deadline)
                {
                    Ok(bytes) => bytes,
                    Err(ConsoleError::Timeout { .. }) => {
                        warn!(row, npe, "Readout deadline elapsed");
                        return Err(incomplete(buffer, npe));
                    }
                    Err(err) => return Err(err),
                };
                let samples = decode_readout(&bytes)?;
                buffer.set_row(row, &samples)?;
                progress((100 * (row + 1) / npe) as u32);
            }

            driver.state = AcquisitionState::Processing;
            let center = params.recon_center.unwrap_or_else(|| default_center(crop_len));
            let image = reconstruct(&buffer, center);
            info!(npe, "Image acquisition complete");
            Ok(ImageAcquisition {
                kspace: buffer,
                image,
            })
        })
    }

    /// Reject a new acquisition while one is in flight
    fn begin(&mut self) -> Result<()> {
        if self.state.in_flight() {
            return Err(ConsoleError::AcquisitionInProgress);
        }
        self.state = AcquisitionState::Triggered;
        Ok(())
    }

    /// Run one acquisition body, pinning the terminal state
    fn guarded<R>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        match body(self) {
            Ok(value) => {
                self.state = AcquisitionState::Complete;
                Ok(value)
            }
            Err(err) => {
                self.state = AcquisitionState::Failed;
                Err(err)
            }
        }
    }

    /// Receive one readout and derive its spectrum record
    fn receive_record(
        &mut self,
        state: &InstrumentState,
        params: &AcquisitionParams,
    ) -> Result<SpectrumRecord> {
        self.state = AcquisitionState::AwaitingData;
        let bytes = self
            .transport
            .receive_exact(readout_len(state.sample_count), params.receive_deadline)?;
        self.state = AcquisitionState::Processing;
        let samples = decode_readout(&bytes)?;
        Ok(SpectrumRecord::new(
            &samples,
            params.sample_time_ms,
            params.frequency_range_hz,
            state.frequency_mhz,
        ))
    }

    fn send(&mut self, command: &Command) -> Result<()> {
        let bytes = command.encode()?;
        self.transport.send(&bytes)
    }
}

fn incomplete(buffer: KSpaceBuffer, expected: usize) -> ConsoleError {
    ConsoleError::IncompleteAcquisition {
        rows_received: buffer.rows_received(),
        expected,
        partial: Box::new(buffer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ConnectionState;
    use std::collections::VecDeque;

    /// Scripted transport: records sent bytes, replays queued replies
    struct ScriptedTransport {
        sent: Vec<Vec<u8>>,
        replies: VecDeque<Vec<u8>>,
    }

    impl ScriptedTransport {
        fn new() -> Self {
            ScriptedTransport {
                sent: Vec::new(),
                replies: VecDeque::new(),
            }
        }

        fn queue_readout(&mut self, samples: &[(f32, f32)]) {
            let mut bytes = Vec::with_capacity(samples.len() * 8);
            for &(re, im) in samples {
                bytes.extend_from_slice(&re.to_le_bytes());
                bytes.extend_from_slice(&im.to_le_bytes());
            }
            self.replies.push_back(bytes);
        }
    }

    impl Transport for ScriptedTransport {
        fn send(&mut self, bytes: &[u8]) -> Result<()> {
            self.sent.push(bytes.to_vec());
            Ok(())
        }

        fn receive_exact(&mut self, n: usize, _deadline: Duration) -> Result<Vec<u8>> {
            match self.replies.pop_front() {
                Some(bytes) if bytes.len() == n => Ok(bytes),
                Some(bytes) => Err(ConsoleError::Timeout {
                    wanted: n,
                    received: bytes.len(),
                }),
                None => Err(ConsoleError::Timeout {
                    wanted: n,
                    received: 0,
                }),
            }
        }

        fn state(&self) -> ConnectionState {
            ConnectionState::Connected
        }
    }

    fn small_state(sample_count: usize) -> InstrumentState {
        InstrumentState {
            sample_count,
            ..InstrumentState::default()
        }
    }

    fn fast_params() -> AcquisitionParams {
        AcquisitionParams {
            receive_deadline: Duration::from_millis(10),
            ..AcquisitionParams::default()
        }
    }

    fn word(bytes: &[u8]) -> u32 {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[test]
    fn test_apply_instrument_state_sends_six_commands() {
        let mut driver = AcquisitionDriver::new(ScriptedTransport::new());
        let state = InstrumentState {
            frequency_mhz: 20.0971,
            attenuation_db: 10.0,
            gradient_offsets_ma: [10, -20, 30, 0],
            sample_count: 50_000,
        };
        driver.apply_instrument_state(&state).unwrap();
        let sent = &driver.transport().sent;
        assert_eq!(sent.len(), 6);
        assert_eq!(word(&sent[0]), (2 << 28) | 20_097_100);
        assert_eq!(word(&sent[1]), (3 << 28) | 40);
        assert_eq!(word(&sent[2]), (5 << 28) | 10);
        assert_eq!(word(&sent[3]), (5 << 28) | (1 << 24) | (1 << 20) | 20);
    }

    #[test]
    fn test_redundant_frequency_write_is_suppressed() {
        let mut driver = AcquisitionDriver::new(ScriptedTransport::new());
        driver.set_frequency(20.0971).unwrap();
        driver.set_frequency(20.0971).unwrap();
        assert_eq!(driver.transport().sent.len(), 1);
        driver.set_frequency(20.1).unwrap();
        assert_eq!(driver.transport().sent.len(), 2);
    }

    #[test]
    fn test_spectrum_acquisition_completes() {
        let mut transport = ScriptedTransport::new();
        let samples: Vec<(f32, f32)> = (0..256)
            .map(|i| {
                let t = i as f32 / 256.0;
                let phase = 2.0 * std::f32::consts::PI * 8.0 * t;
                let envelope = (-3.0 * t).exp();
                (envelope * phase.cos(), envelope * phase.sin())
            })
            .collect();
        transport.queue_readout(&samples);

        let mut driver = AcquisitionDriver::new(transport);
        let record = driver
            .acquire_spectrum(&small_state(256), &fast_params())
            .unwrap();
        assert_eq!(driver.state(), AcquisitionState::Complete);
        assert_eq!(record.t_magnitude().len(), 256);
        // Trigger word follows the frequency word
        let sent = &driver.transport().sent;
        assert_eq!(word(&sent[sent.len() - 1]), 1 << 28);
    }

    #[test]
    fn test_spectrum_timeout_fails_the_machine() {
        let mut driver = AcquisitionDriver::new(ScriptedTransport::new());
        let result = driver.acquire_spectrum(&small_state(16), &fast_params());
        assert!(matches!(result, Err(ConsoleError::Timeout { .. })));
        assert_eq!(driver.state(), AcquisitionState::Failed);
        // The failed machine accepts a fresh acquisition
        driver
            .transport_mut()
            .queue_readout(&vec![(1.0, 0.0); 16]);
        assert!(driver
            .acquire_spectrum(&small_state(16), &fast_params())
            .is_ok());
    }

    #[test]
    fn test_projection_sends_axis_word() {
        let mut transport = ScriptedTransport::new();
        transport.queue_readout(&vec![(1.0, 0.0); 16]);
        let mut driver = AcquisitionDriver::new(transport);
        driver
            .acquire_projection(&small_state(16), &fast_params(), ProjectionAxis::Z)
            .unwrap();
        let sent = &driver.transport().sent;
        assert_eq!(word(&sent[sent.len() - 1]), (7 << 28) | 2);
    }

    #[test]
    fn test_image_acquisition_reports_monotone_progress() {
        let npe = 4u16;
        let sample_count = KSpaceBuffer::default_crop_len(npe as usize);
        let mut transport = ScriptedTransport::new();
        for _ in 0..npe {
            transport.queue_readout(&vec![(1.0, -1.0); sample_count]);
        }
        let mut driver = AcquisitionDriver::new(transport);

        let mut reports = Vec::new();
        let outcome = driver
            .acquire_image(
                &small_state(sample_count),
                &fast_params(),
                npe,
                4000,
                |percent| reports.push(percent),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(reports, vec![25, 50, 75, 100]);
        assert!(outcome.kspace.complete());
        assert_eq!(outcome.image.magnitude.dim(), (4, 4));
        assert_eq!(driver.state(), AcquisitionState::Complete);
    }

    #[test]
    fn test_image_timeout_surfaces_partial_buffer() {
        let npe = 4u16;
        let sample_count = KSpaceBuffer::default_crop_len(npe as usize);
        let mut transport = ScriptedTransport::new();
        for _ in 0..2 {
            transport.queue_readout(&vec![(1.0, 0.0); sample_count]);
        }
        let mut driver = AcquisitionDriver::new(transport);

        let result = driver.acquire_image(
            &small_state(sample_count),
            &fast_params(),
            npe,
            4000,
            |_| {},
            &CancelToken::new(),
        );
        match result {
            Err(ConsoleError::IncompleteAcquisition {
                rows_received,
                expected,
                partial,
            }) => {
                assert_eq!(rows_received, 2);
                assert_eq!(expected, 4);
                assert!(partial.row_written(0));
                assert!(partial.row_written(1));
                assert!(!partial.row_written(2));
            }
            other => panic!("expected IncompleteAcquisition, got {other:?}"),
        }
        assert_eq!(driver.state(), AcquisitionState::Failed);
    }

    #[test]
    fn test_cancellation_between_rows() {
        let npe = 4u16;
        let sample_count = KSpaceBuffer::default_crop_len(npe as usize);
        let mut transport = ScriptedTransport::new();
        for _ in 0..npe {
            transport.queue_readout(&vec![(1.0, 0.0); sample_count]);
        }
        let mut driver = AcquisitionDriver::new(transport);

        let cancel = CancelToken::new();
        let seen = std::cell::Cell::new(0u32);
        let result = driver.acquire_image(
            &small_state(sample_count),
            &fast_params(),
            npe,
            4000,
            |percent| {
                seen.set(percent);
                if percent >= 50 {
                    cancel.cancel();
                }
            },
            &cancel,
        );
        match result {
            Err(ConsoleError::IncompleteAcquisition { rows_received, .. }) => {
                assert_eq!(rows_received, 2);
            }
            other => panic!("expected IncompleteAcquisition, got {other:?}"),
        }
        assert_eq!(seen.get(), 50);

        // The two unread rows are still queued; a fresh acquisition
        // consumes one of them without reconnecting.
        let record = driver
            .acquire_spectrum(&small_state(sample_count), &fast_params())
            .expect("driver usable after cancellation");
        assert_eq!(record.t_magnitude().len(), sample_count);
        assert_eq!(driver.state(), AcquisitionState::Complete);
    }

    #[test]
    fn test_default_instrument_state_matches_config() {
        let state = InstrumentState::default();
        assert_eq!(state.sample_count, 50_000);
        assert!((state.frequency_mhz - 20.0971).abs() < 1e-9);
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
