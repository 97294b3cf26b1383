//! The radio supervisor.
//!
//! One async task owns the device and the state machine; the public
//! [`Radio`] handle talks to it over a command channel, the way a UI
//! expects: fire a command, watch the status change.
//!
//! The machine's job is to move between OFF, STARTING, PLAYING,
//! CHG_FREQ, SCANNING, and STOPPING without ever tearing a sample
//! block in half: USB reads drain before the tuner is touched, and at
//! most two blocks are ever in flight toward the decoder.

use std::sync::{
    Arc,
    atomic::{
        AtomicBool,
        AtomicU32,
        AtomicUsize,
        Ordering,
    },
};

use airwave_dsp::Mode;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{
    Mutex,
    mpsc,
    oneshot,
};

use crate::{
    RadioError,
    audio::{
        AudioSink,
        RecordingSink,
    },
    decoder::{
        BlockTag,
        DecodedBlock,
        DecoderHandle,
        DecoderMessage,
    },
    device::{
        SdrBackend,
        SdrProvider,
    },
};

/// The tuner always streams at this rate; everything downstream is
/// sized for it.
pub const SAMPLE_RATE: u32 = 1_024_000;
pub const OUT_RATE: u32 = 48_000;
pub const BUFS_PER_SEC: u32 = 5;
pub const SAMPLES_PER_BUF: usize = (SAMPLE_RATE / BUFS_PER_SEC) as usize;

/// Frequency changes within this distance of the tuned center are
/// done in the DSP by shifting; beyond it the tuner is re-tuned.
const RETUNE_THRESHOLD: u32 = 300_000;

/// A scan stops on the first block whose decoded signal level
/// exceeds this.
const SCAN_SIGNAL_LEVEL: f32 = 0.5;

/// Decoded blocks averaged for one PPM estimate.
const PPM_ESTIMATE_BLOCKS: u32 = 50;

/// Scan range; the frequency wraps at the edges.
#[derive(Clone, Copy, Debug)]
pub struct ScanParams {
    pub min: u32,
    pub max: u32,
    pub step: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Off,
    Starting,
    Playing,
    /// Draining in-flight blocks before acting on a frequency change.
    ChangingFrequency,
    /// Scanning: stepping the frequency (draining), or waiting for
    /// the one detection block.
    ScanTuning,
    ScanDetecting,
    Stopping,
}

enum Command {
    Start {
        reply: oneshot::Sender<Result<(), RadioError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    SetFrequency(u32),
    Scan(ScanParams),
    SetMode(Mode),
    EnableStereo(bool),
    SetSquelch(f32),
    SetVolume(f32),
    SetCorrectionPpm(i32),
    SetAutoGain,
    SetManualGain(f32),
    EstimatePpm(bool),
    StartRecording(Box<dyn RecordingSink>),
    StopRecording,
    SetOnError(Box<dyn Fn(&RadioError) + Send>),
}

enum ReadOutcome {
    Data { bytes: Vec<u8>, tag: BlockTag },
    Failed(RadioError),
}

/// Status mirrored out of the supervisor for the cheap getters.
#[derive(Default)]
struct Status {
    playing: AtomicBool,
    scanning: AtomicBool,
    stereo: AtomicBool,
    frequency: AtomicU32,
    requesting_blocks: AtomicUsize,
    playing_blocks: AtomicUsize,
    mode: SyncMutex<Option<Mode>>,
    ppm_estimate: SyncMutex<Option<i32>>,
}

/// Handle to a running radio. Cheap to clone; all clones drive the
/// same supervisor.
#[derive(Clone)]
pub struct Radio {
    commands: mpsc::Sender<Command>,
    status: Arc<Status>,
}

impl Radio {
    /// Builds the radio around a device provider and an audio sink
    /// and spawns its supervisor task.
    pub fn new<P: SdrProvider>(provider: P, sink: impl AudioSink) -> Self {
        let (commands, command_rx) = mpsc::channel(32);
        let status = Arc::new(Status::default());
        status.frequency.store(88_500_000, Ordering::Relaxed);
        *status.mode.lock() = Some(Mode::default());

        let supervisor = Supervisor::new(provider, Box::new(sink), status.clone(), command_rx);
        tokio::spawn(supervisor.run());

        Self { commands, status }
    }

    /// Powers the radio up. Resolves once playback is running (or
    /// with the error that stopped it).
    pub async fn start(&self) -> Result<(), RadioError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Start { reply }).await?;
        response.await.map_err(|_| RadioError::DecoderDead)?
    }

    /// Stops playback and closes the device. Resolves once the radio
    /// is off.
    pub async fn stop(&self) -> Result<(), RadioError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Stop { reply }).await?;
        response.await.map_err(|_| RadioError::DecoderDead)
    }

    pub async fn set_frequency(&self, frequency: u32) -> Result<(), RadioError> {
        self.send(Command::SetFrequency(frequency)).await
    }

    pub fn get_frequency(&self) -> u32 {
        self.status.frequency.load(Ordering::Relaxed)
    }

    /// Starts scanning from the current frequency until a station is
    /// found or another command interrupts.
    pub async fn scan(&self, min: u32, max: u32, step: u32) -> Result<(), RadioError> {
        self.send(Command::Scan(ScanParams { min, max, step })).await
    }

    pub fn is_scanning(&self) -> bool {
        self.status.scanning.load(Ordering::Relaxed)
    }

    pub fn is_playing(&self) -> bool {
        self.status.playing.load(Ordering::Relaxed)
    }

    pub fn is_stereo(&self) -> bool {
        self.status.stereo.load(Ordering::Relaxed)
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<(), RadioError> {
        self.send(Command::SetMode(mode)).await
    }

    pub fn get_mode(&self) -> Option<Mode> {
        *self.status.mode.lock()
    }

    pub async fn enable_stereo(&self, enable: bool) -> Result<(), RadioError> {
        self.send(Command::EnableStereo(enable)).await
    }

    /// Signal level below which audio is muted.
    pub async fn set_squelch(&self, level: f32) -> Result<(), RadioError> {
        self.send(Command::SetSquelch(level)).await
    }

    pub async fn set_volume(&self, volume: f32) -> Result<(), RadioError> {
        self.send(Command::SetVolume(volume)).await
    }

    /// Takes effect at the next start.
    pub async fn set_correction_ppm(&self, ppm: i32) -> Result<(), RadioError> {
        self.send(Command::SetCorrectionPpm(ppm)).await
    }

    pub async fn set_auto_gain(&self) -> Result<(), RadioError> {
        self.send(Command::SetAutoGain).await
    }

    pub async fn set_manual_gain(&self, gain_db: f32) -> Result<(), RadioError> {
        self.send(Command::SetManualGain(gain_db)).await
    }

    /// Starts or stops accumulating a frequency-correction estimate
    /// from the decoded audio's DC offset.
    pub async fn estimate_ppm(&self, enable: bool) -> Result<(), RadioError> {
        self.send(Command::EstimatePpm(enable)).await
    }

    pub fn get_ppm_estimate(&self) -> Option<i32> {
        *self.status.ppm_estimate.lock()
    }

    pub async fn start_recording(&self, sink: impl RecordingSink) -> Result<(), RadioError> {
        self.send(Command::StartRecording(Box::new(sink))).await
    }

    pub async fn stop_recording(&self) -> Result<(), RadioError> {
        self.send(Command::StopRecording).await
    }

    /// Installs the error handler. Without one, errors abort the
    /// process.
    pub async fn set_on_error(
        &self,
        handler: impl Fn(&RadioError) + Send + 'static,
    ) -> Result<(), RadioError> {
        self.send(Command::SetOnError(Box::new(handler))).await
    }

    /// In-flight USB reads and blocks inside the decoder. Never more
    /// than two of each.
    pub fn buffer_stats(&self) -> (usize, usize) {
        (
            self.status.requesting_blocks.load(Ordering::Relaxed),
            self.status.playing_blocks.load(Ordering::Relaxed),
        )
    }

    async fn send(&self, command: Command) -> Result<(), RadioError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RadioError::DecoderDead)
    }
}

/// What to do once all in-flight blocks have drained.
enum Pending {
    ChangeFrequency(u32),
    ScanStep,
    Stop(Vec<oneshot::Sender<()>>),
}

struct Supervisor<P: SdrProvider> {
    provider: P,
    device: Option<Arc<Mutex<P::Backend>>>,
    status: Arc<Status>,
    commands: mpsc::Receiver<Command>,
    reads_tx: mpsc::Sender<ReadOutcome>,
    reads_rx: mpsc::Receiver<ReadOutcome>,
    decoder: DecoderHandle,
    decoded_rx: mpsc::Receiver<DecodedBlock>,
    sink: Box<dyn AudioSink>,
    recorder: Option<Box<dyn RecordingSink>>,
    on_error: Option<Box<dyn Fn(&RadioError) + Send>>,

    state: State,
    pending: Option<Pending>,
    /// The frequency the user hears.
    frequency: u32,
    /// The frequency the tuner is parked at; differs from
    /// `frequency` by at most the retune threshold.
    center_frequency: u32,
    scan: Option<ScanParams>,
    requesting_blocks: usize,
    playing_blocks: usize,

    stereo_enabled: bool,
    squelch: f32,
    volume: f32,
    ppm: i32,
    gain: Option<f32>,

    estimating_ppm: bool,
    ppm_offset_sum: f64,
    ppm_blocks: u32,

    interleave_buffer: Vec<f32>,
}

impl<P: SdrProvider> Supervisor<P> {
    fn new(
        provider: P,
        sink: Box<dyn AudioSink>,
        status: Arc<Status>,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let (decoder, decoded_rx) = DecoderHandle::spawn(SAMPLE_RATE, OUT_RATE);
        let (reads_tx, reads_rx) = mpsc::channel(4);
        Self {
            provider,
            device: None,
            status,
            commands,
            reads_tx,
            reads_rx,
            decoder,
            decoded_rx,
            sink,
            recorder: None,
            on_error: None,
            state: State::Off,
            pending: None,
            frequency: 88_500_000,
            center_frequency: 88_500_000,
            scan: None,
            requesting_blocks: 0,
            playing_blocks: 0,
            stereo_enabled: true,
            squelch: 0.0,
            volume: 1.0,
            ppm: 0,
            gain: None,
            estimating_ppm: false,
            ppm_offset_sum: 0.0,
            ppm_blocks: 0,
            interleave_buffer: Vec::new(),
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command
                    else {
                        // all handles dropped; shut down quietly
                        if self.state != State::Off {
                            self.shut_down().await;
                        }
                        break;
                    };
                    self.handle_command(command).await;
                }
                Some(outcome) = self.reads_rx.recv() => {
                    self.handle_read(outcome).await;
                }
                Some(block) = self.decoded_rx.recv() => {
                    self.handle_decoded(block).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { reply } => {
                if self.state != State::Off {
                    let _ = reply.send(Ok(()));
                    return;
                }
                match self.do_start().await {
                    Ok(()) => {
                        let _ = reply.send(Ok(()));
                    }
                    Err(error) => {
                        self.report_error(&error);
                        self.shut_down().await;
                        let _ = reply.send(Err(error));
                    }
                }
            }
            Command::Stop { reply } => {
                match self.state {
                    State::Off => {
                        let _ = reply.send(());
                    }
                    State::Stopping => {
                        if let Some(Pending::Stop(replies)) = self.pending.as_mut() {
                            replies.push(reply);
                        }
                    }
                    _ => {
                        self.state = State::Stopping;
                        self.publish_state();
                        self.pending = Some(Pending::Stop(vec![reply]));
                        self.try_finish_pending().await;
                    }
                }
            }
            Command::SetFrequency(frequency) => self.request_frequency(frequency).await,
            Command::Scan(params) => {
                match self.state {
                    State::Off | State::Starting | State::Stopping => {}
                    _ => {
                        self.scan = Some(params);
                        self.state = State::ScanTuning;
                        self.pending = Some(Pending::ScanStep);
                        self.publish_state();
                        self.try_finish_pending().await;
                    }
                }
            }
            Command::SetMode(mode) => {
                *self.status.mode.lock() = Some(mode);
                if self.decoder.send(DecoderMessage::SetMode(mode)).await.is_err() {
                    self.report_error(&RadioError::DecoderDead);
                }
            }
            Command::EnableStereo(enable) => self.stereo_enabled = enable,
            Command::SetSquelch(level) => self.squelch = level,
            Command::SetVolume(volume) => self.volume = volume,
            Command::SetCorrectionPpm(ppm) => self.ppm = ppm,
            Command::SetAutoGain => self.gain = None,
            Command::SetManualGain(gain_db) => self.gain = Some(gain_db),
            Command::EstimatePpm(enable) => {
                self.estimating_ppm = enable;
                self.ppm_offset_sum = 0.0;
                self.ppm_blocks = 0;
                if enable {
                    *self.status.ppm_estimate.lock() = None;
                }
            }
            Command::StartRecording(sink) => self.recorder = Some(sink),
            Command::StopRecording => self.recorder = None,
            Command::SetOnError(handler) => self.on_error = Some(handler),
        }
    }

    /// OFF -> STARTING -> PLAYING, or an error.
    async fn do_start(&mut self) -> Result<(), RadioError> {
        self.state = State::Starting;
        self.publish_state();

        let mut backend = self.provider.acquire(self.ppm, self.gain).await?;
        if let Err(error) = Self::bring_up(&mut backend, self.frequency).await {
            let _ = backend.close().await;
            return Err(error);
        }
        self.center_frequency = self.frequency;
        self.device = Some(Arc::new(Mutex::new(backend)));

        self.state = State::Playing;
        self.publish_state();

        // two read cycles keep the pipe full: one block in the
        // decoder while the next is on the wire
        self.schedule_read();
        self.schedule_read();
        Ok(())
    }

    async fn bring_up(backend: &mut P::Backend, frequency: u32) -> Result<(), RadioError> {
        backend.open().await?;
        backend.set_sample_rate(SAMPLE_RATE).await?;
        backend.set_center_frequency(frequency).await?;
        backend.reset_buffer().await?;
        Ok(())
    }

    async fn request_frequency(&mut self, frequency: u32) {
        self.frequency = frequency;
        self.status.frequency.store(frequency, Ordering::Relaxed);
        match self.state {
            State::Playing | State::ScanTuning | State::ScanDetecting => {
                // an explicit frequency supersedes a running scan
                self.scan = None;
                self.state = State::ChangingFrequency;
                self.pending = Some(Pending::ChangeFrequency(frequency));
                self.publish_state();
                self.try_finish_pending().await;
            }
            State::ChangingFrequency => {
                // coalesce: latest frequency wins
                self.pending = Some(Pending::ChangeFrequency(frequency));
            }
            State::Off | State::Starting | State::Stopping => {}
        }
    }

    fn schedule_read(&mut self) {
        let Some(device) = self.device.clone()
        else {
            return;
        };
        let tag = BlockTag {
            scanning: matches!(self.state, State::ScanTuning | State::ScanDetecting),
            frequency: self.frequency,
        };
        self.requesting_blocks += 1;
        self.status
            .requesting_blocks
            .store(self.requesting_blocks, Ordering::Relaxed);
        let reads_tx = self.reads_tx.clone();
        tokio::spawn(async move {
            let result = {
                let device = device.lock().await;
                device.read_samples(SAMPLES_PER_BUF).await
            };
            let outcome = match result {
                Ok(bytes) => ReadOutcome::Data { bytes, tag },
                Err(error) => ReadOutcome::Failed(error),
            };
            let _ = reads_tx.send(outcome).await;
        });
    }

    async fn handle_read(&mut self, outcome: ReadOutcome) {
        self.requesting_blocks -= 1;
        self.status
            .requesting_blocks
            .store(self.requesting_blocks, Ordering::Relaxed);

        match outcome {
            ReadOutcome::Failed(error) => {
                match self.state {
                    State::Stopping | State::Off => {
                        self.try_finish_pending().await;
                    }
                    _ => {
                        self.report_error(&error);
                        self.state = State::Stopping;
                        self.pending = Some(Pending::Stop(Vec::new()));
                        self.publish_state();
                        self.try_finish_pending().await;
                    }
                }
            }
            ReadOutcome::Data { bytes, tag } => {
                match self.state {
                    State::Playing => {
                        self.dispatch_block(bytes, tag).await;
                        self.schedule_read();
                    }
                    State::ScanDetecting => {
                        self.dispatch_block(bytes, tag).await;
                    }
                    // draining: the block belongs to a superseded
                    // frequency, drop it
                    _ => {
                        self.try_finish_pending().await;
                    }
                }
            }
        }
    }

    /// Hands one raw block to the decoder, unless it is already two
    /// blocks behind.
    async fn dispatch_block(&mut self, bytes: Vec<u8>, tag: BlockTag) {
        if self.playing_blocks >= 2 {
            tracing::warn!("decoder back-pressured, dropping a block");
            return;
        }
        let freq_offset = f64::from(self.center_frequency) - f64::from(tag.frequency);
        let message = DecoderMessage::Process {
            bytes,
            in_stereo: self.stereo_enabled,
            freq_offset,
            tag,
        };
        if self.decoder.send(message).await.is_err() {
            self.report_error(&RadioError::DecoderDead);
            return;
        }
        self.playing_blocks += 1;
        self.status
            .playing_blocks
            .store(self.playing_blocks, Ordering::Relaxed);
    }

    async fn handle_decoded(&mut self, block: DecodedBlock) {
        self.playing_blocks -= 1;
        self.status
            .playing_blocks
            .store(self.playing_blocks, Ordering::Relaxed);

        let DecodedBlock { audio, tag } = block;
        self.status.stereo.store(audio.stereo, Ordering::Relaxed);
        self.update_ppm_estimate(&audio);
        self.emit_audio(&audio);

        if self.state == State::ScanDetecting && tag.scanning {
            if audio.signal_level > SCAN_SIGNAL_LEVEL {
                tracing::debug!(frequency = tag.frequency, "scan found a station");
                self.scan = None;
                self.request_frequency(tag.frequency).await;
            }
            else {
                self.state = State::ScanTuning;
                self.pending = Some(Pending::ScanStep);
                self.try_finish_pending().await;
            }
            return;
        }

        self.try_finish_pending().await;
    }

    fn emit_audio(&mut self, audio: &airwave_dsp::StereoAudio) {
        let muted = audio.signal_level < self.squelch;
        let len = audio.left.len().min(audio.right.len());
        self.interleave_buffer.clear();
        self.interleave_buffer.reserve(2 * len);
        for n in 0..len {
            if muted {
                self.interleave_buffer.push(0.0);
                self.interleave_buffer.push(0.0);
            }
            else {
                self.interleave_buffer.push(audio.left.data[n] * self.volume);
                self.interleave_buffer.push(audio.right.data[n] * self.volume);
            }
        }
        self.sink.play(&self.interleave_buffer);
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.write_block(&audio.left.data[..len], &audio.right.data[..len]);
        }
    }

    fn update_ppm_estimate(&mut self, audio: &airwave_dsp::StereoAudio) {
        if !self.estimating_ppm || audio.left.is_empty() {
            return;
        }
        let mean: f64 = audio.left.data.iter().map(|&x| f64::from(x)).sum::<f64>()
            / audio.left.len() as f64;
        self.ppm_offset_sum += mean;
        self.ppm_blocks += 1;
        if self.ppm_blocks >= PPM_ESTIMATE_BLOCKS {
            let mean_offset = self.ppm_offset_sum / f64::from(self.ppm_blocks);
            let estimate = (f64::from(self.ppm)
                - 1e6 * (75_000.0 * mean_offset) / f64::from(self.frequency))
            .round() as i32;
            *self.status.ppm_estimate.lock() = Some(estimate);
            self.ppm_offset_sum = 0.0;
            self.ppm_blocks = 0;
        }
    }

    /// If all in-flight blocks have drained, performs whatever
    /// transition is parked in `pending`.
    async fn try_finish_pending(&mut self) {
        if self.requesting_blocks > 0 || self.playing_blocks > 0 {
            return;
        }
        let Some(pending) = self.pending.take()
        else {
            return;
        };
        match pending {
            Pending::ChangeFrequency(frequency) => {
                match self.retune(frequency).await {
                    Ok(()) => {
                        self.state = State::Playing;
                        self.publish_state();
                        self.schedule_read();
                        self.schedule_read();
                    }
                    Err(error) => {
                        self.report_error(&error);
                        self.shut_down().await;
                    }
                }
            }
            Pending::ScanStep => self.scan_step().await,
            Pending::Stop(replies) => {
                self.shut_down().await;
                for reply in replies {
                    let _ = reply.send(());
                }
            }
        }
    }

    /// Moves the listening frequency, touching the tuner only when
    /// the target falls outside the DSP's shifting range.
    async fn retune(&mut self, frequency: u32) -> Result<(), RadioError> {
        self.frequency = frequency;
        self.status.frequency.store(frequency, Ordering::Relaxed);
        let delta = frequency.abs_diff(self.center_frequency);
        if delta > RETUNE_THRESHOLD {
            let device = self.device.clone().ok_or(RadioError::DeviceNotFound)?;
            let mut device = device.lock().await;
            device.set_center_frequency(frequency).await?;
            device.reset_buffer().await?;
            self.center_frequency = frequency;
        }
        Ok(())
    }

    /// Advances the scan one step and reads a single detection block.
    async fn scan_step(&mut self) {
        let Some(scan) = self.scan
        else {
            return;
        };
        let mut frequency = self.frequency.saturating_add(scan.step);
        if frequency > scan.max {
            frequency = scan.min;
        }
        else if frequency < scan.min {
            frequency = scan.max;
        }
        if let Err(error) = self.retune(frequency).await {
            self.report_error(&error);
            self.shut_down().await;
            return;
        }
        self.state = State::ScanDetecting;
        self.publish_state();
        self.schedule_read();
    }

    /// Closes the device, whatever state things are in, and lands in
    /// OFF. Close errors are reported but do not stop the landing.
    async fn shut_down(&mut self) {
        if let Some(device) = self.device.take() {
            let mut device = device.lock().await;
            if let Err(error) = device.close().await {
                self.report_error(&error);
            }
        }
        self.scan = None;
        self.pending = None;
        self.state = State::Off;
        self.publish_state();
    }

    fn report_error(&self, error: &RadioError) {
        tracing::error!(%error, "radio error");
        match self.on_error.as_ref() {
            Some(handler) => handler(error),
            None => panic!("unhandled radio error: {error}"),
        }
    }

    fn publish_state(&self) {
        self.status
            .playing
            .store(self.state == State::Playing, Ordering::Relaxed);
        self.status.scanning.store(
            matches!(self.state, State::ScanTuning | State::ScanDetecting),
            Ordering::Relaxed,
        );
    }
}
