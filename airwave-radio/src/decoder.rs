//! The decoder worker: a dedicated thread that owns the current
//! demodulator and turns raw sample blocks into audio.
//!
//! DSP is CPU-bound, so it runs off the async runtime on its own
//! thread, fed through a bounded channel. Blocks come back out in
//! submission order, tagged with whatever the submitter attached.

use std::thread;

use airwave_dsp::{
    Decoder,
    FrequencyShifter,
    Mode,
    StereoAudio,
    make_decoder,
    samples_from_u8,
};
use tokio::sync::mpsc;

/// Metadata that rides along with a block through the decoder and
/// comes back attached to its audio.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockTag {
    /// The block was read for scan detection, not steady playback.
    pub scanning: bool,
    /// Listening frequency the block was read at.
    pub frequency: u32,
}

#[derive(Debug)]
pub enum DecoderMessage {
    /// Replace the demodulator with a fresh one for `mode`.
    SetMode(Mode),
    /// Decode one block. The buffer is consumed.
    Process {
        bytes: Vec<u8>,
        in_stereo: bool,
        freq_offset: f64,
        tag: BlockTag,
    },
}

/// One decoded block.
#[derive(Debug)]
pub struct DecodedBlock {
    pub audio: StereoAudio,
    pub tag: BlockTag,
}

/// At most this many blocks queue toward the worker; the controller's
/// in-flight accounting keeps the number lower still.
const QUEUE_SIZE: usize = 2;

/// Handle to the decoder thread.
pub struct DecoderHandle {
    sender: mpsc::Sender<DecoderMessage>,
}

impl DecoderHandle {
    /// Spawns the worker. Decoded blocks arrive on the returned
    /// receiver in submission order.
    pub fn spawn(in_rate: u32, out_rate: u32) -> (Self, mpsc::Receiver<DecodedBlock>) {
        let (sender, receiver) = mpsc::channel(QUEUE_SIZE);
        let (output_sender, output_receiver) = mpsc::channel(QUEUE_SIZE);

        thread::spawn(move || {
            decoder_thread(receiver, output_sender, in_rate, out_rate);
        });

        (Self { sender }, output_receiver)
    }

    pub async fn send(&self, message: DecoderMessage) -> Result<(), crate::RadioError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| crate::RadioError::DecoderDead)
    }
}

fn decoder_thread(
    mut receiver: mpsc::Receiver<DecoderMessage>,
    output: mpsc::Sender<DecodedBlock>,
    in_rate: u32,
    out_rate: u32,
) {
    let _guard = tracing::debug_span!("decoder thread").entered();

    let mut decoder: Box<dyn Decoder> = make_decoder(Mode::default(), in_rate, out_rate);
    let mut shifter = FrequencyShifter::new();

    while let Some(message) = receiver.blocking_recv() {
        match message {
            DecoderMessage::SetMode(mode) => {
                tracing::debug!(?mode, "decoder mode change");
                decoder = make_decoder(mode, in_rate, out_rate);
                shifter = FrequencyShifter::new();
            }
            DecoderMessage::Process {
                bytes,
                in_stereo,
                freq_offset,
                tag,
            } => {
                let mut samples = samples_from_u8(&bytes, in_rate);
                drop(bytes);
                shifter.shift_in_place(&mut samples, freq_offset);
                let audio = decoder.decode(&samples, in_stereo);
                if output.blocking_send(DecodedBlock { audio, tag }).is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!("decoder thread terminating");
}
