//! Generates a modulated test signal as raw 8-bit I/Q on stdout:
//! one or more audio tones, FM- or AM-modulated onto a baseband
//! carrier. Feed it to `demod-stdin` to hear the pipeline.

use std::io::Write;

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
#[command(about = "Generate a tone-modulated raw 8-bit I/Q stream")]
struct Args {
    /// Modulation to apply.
    #[arg(long = "mod", value_enum, default_value = "WBFM")]
    modulation: Modulation,

    /// Audio tone frequencies in Hz; repeat for a chord.
    #[arg(long = "tone", default_values_t = [1000.0])]
    tones: Vec<f64>,

    /// Output sample rate in Hz.
    #[arg(long, default_value_t = 1_024_000)]
    rate: u32,

    /// Length of the generated stream in seconds.
    #[arg(long, default_value_t = 1.0)]
    seconds: f64,

    /// Maximum frequency deviation for the FM modes, in Hz.
    #[arg(long, default_value_t = 75_000.0)]
    maxf: f64,

    /// Modulation depth, 0..1.
    #[arg(long, default_value_t = 0.5)]
    depth: f64,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::try_parse().unwrap_or_else(|error| {
        let _ = error.print();
        std::process::exit(1);
    });

    let stdout = std::io::stdout().lock();
    let mut out = std::io::BufWriter::new(stdout);

    let total = (args.seconds * f64::from(args.rate)) as usize;
    let tau = std::f64::consts::TAU;
    let mut phase = 0.0f64;
    let mut block = Vec::with_capacity(2 * 4096);

    for start in (0..total).step_by(4096) {
        block.clear();
        for n in start..total.min(start + 4096) {
            let t = n as f64 / f64::from(args.rate);
            let audio: f64 = args
                .tones
                .iter()
                .map(|&freq| (tau * freq * t).sin())
                .sum::<f64>()
                / args.tones.len() as f64;

            let (i, q) = match args.modulation {
                Modulation::Wbfm | Modulation::Nbfm => {
                    phase += tau * args.maxf * args.depth * audio / f64::from(args.rate);
                    (phase.cos(), phase.sin())
                }
                Modulation::Am => {
                    let envelope = 0.5 * (1.0 + args.depth * audio);
                    // a small residual carrier keeps the envelope
                    // detector's DC removal honest
                    let carrier = tau * 1000.0 * t;
                    (envelope * carrier.cos(), envelope * carrier.sin())
                }
            };
            block.push(to_u8(i));
            block.push(to_u8(q));
        }
        out.write_all(&block)?;
    }
    out.flush()?;
    Ok(())
}

fn to_u8(sample: f64) -> u8 {
    (127.5 + 127.0 * sample).round().clamp(0.0, 255.0) as u8
}
