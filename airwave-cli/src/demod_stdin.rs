//! Demodulates raw 8-bit I/Q from stdin and writes the audio as
//! 16-bit signed little-endian interleaved stereo to stdout.
//!
//! ```text
//! demod-stdin --mod WBFM < capture.iq | aplay -f S16_LE -r 48000 -c 2
//! ```

use std::io::{
    Read,
    Write,
};

use airwave_dsp::{
    Decoder,
    Mode,
    make_decoder,
    samples::Samples,
};
use byteorder::{
    LittleEndian,
    WriteBytesExt,
};
use clap::{
    Parser,
    ValueEnum,
};
use color_eyre::eyre::Result;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Modulation {
    #[value(name = "AM")]
    Am,
    #[value(name = "WBFM")]
    Wbfm,
    #[value(name = "NBFM")]
    Nbfm,
}

#[derive(Debug, Parser)]
#[command(about = "Demodulate a raw 8-bit I/Q stream into s16le stereo audio")]
struct Args {
    /// Modulation to decode.
    #[arg(long = "mod", value_enum, default_value = "WBFM")]
    modulation: Modulation,

    /// Decode in mono even if a stereo pilot is present.
    #[arg(long)]
    mono: bool,

    /// Input bytes per block; rounded down to a whole number of
    /// samples.
    #[arg(long, default_value_t = 65536)]
    blocksize: usize,

    /// Input sample rate in Hz.
    #[arg(long, default_value_t = 1_024_000)]
    inrate: u32,

    /// Output sample rate in Hz.
    #[arg(long, default_value_t = 48_000)]
    outrate: u32,

    /// Maximum frequency deviation for NBFM, in Hz.
    #[arg(long, default_value_t = 10_000)]
    maxf: u32,

    /// Signal bandwidth for AM, in Hz.
    #[arg(long, default_value_t = 10_000)]
    bandwidth: u32,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let args = Args::try_parse().unwrap_or_else(|error| {
        let _ = error.print();
        std::process::exit(1);
    });

    let mode = match args.modulation {
        Modulation::Am => {
            Mode::Am {
                bandwidth: args.bandwidth,
            }
        }
        Modulation::Wbfm => Mode::Wbfm,
        Modulation::Nbfm => Mode::Nbfm { max_f: args.maxf },
    };
    let mut decoder: Box<dyn Decoder> = make_decoder(mode, args.inrate, args.outrate);
    let block_size = args.blocksize - args.blocksize % 2;

    let mut stdin = std::io::stdin().lock();
    let stdout = std::io::stdout().lock();
    let mut out = std::io::BufWriter::new(stdout);
    let mut buffer = vec![0u8; block_size];

    loop {
        let read = read_block(&mut stdin, &mut buffer)?;
        if read == 0 {
            break;
        }
        let samples = airwave_dsp::samples_from_u8(&buffer[..read - read % 2], args.inrate);
        let audio = decoder.decode(&samples, !args.mono);
        write_audio(&mut out, &audio.left, &audio.right)?;
    }
    out.flush()?;
    Ok(())
}

/// Fills `buffer` from the reader, stopping early only at EOF.
fn read_block(reader: &mut impl Read, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn write_audio(out: &mut impl Write, left: &Samples, right: &Samples) -> std::io::Result<()> {
    for n in 0..left.len().min(right.len()) {
        out.write_i16::<LittleEndian>(to_i16(left.data[n]))?;
        out.write_i16::<LittleEndian>(to_i16(right.data[n]))?;
    }
    Ok(())
}

fn to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32767.0, 32767.0) as i16
}
