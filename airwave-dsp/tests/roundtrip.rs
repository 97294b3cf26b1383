//! End-to-end demodulation checks: synthesize a modulated I/Q stream,
//! run it through the decoder chain, and correlate the audio against
//! the original program material.

use std::f64::consts::TAU;

use airwave_dsp::{
    Decoder,
    Mode,
    coeffs::get_lowpass_fir_coeffs,
    demod::FmDemodulator,
    filters::Downsampler,
    make_decoder,
    samples::Samples,
};

const IN_RATE: u32 = 1_024_000;
const OUT_RATE: u32 = 48_000;

/// Normalized cross-correlation, maximized over small alignment lags
/// to absorb the filter chain's group delay.
fn peak_correlation(reference: &[f32], signal: &[f32], max_lag: usize) -> f32 {
    let mut best = f32::MIN;
    for lag in 0..=max_lag {
        let n = reference.len().min(signal.len() - lag);
        let a = &reference[..n];
        let b = &signal[lag..lag + n];
        let mean_a: f32 = a.iter().sum::<f32>() / n as f32;
        let mean_b: f32 = b.iter().sum::<f32>() / n as f32;
        let mut cross = 0.0;
        let mut pow_a = 0.0;
        let mut pow_b = 0.0;
        for i in 0..n {
            let x = a[i] - mean_a;
            let y = b[i] - mean_b;
            cross += x * y;
            pow_a += x * x;
            pow_b += y * y;
        }
        if pow_a > 0.0 && pow_b > 0.0 {
            best = best.max(cross / (pow_a * pow_b).sqrt());
        }
    }
    best
}

/// Frequency-modulates a baseband signal into an interleaved I/Q
/// stream at `IN_RATE`.
fn fm_modulate(baseband: impl Fn(f64) -> f64, max_f: f64, seconds: f64) -> Samples {
    let len = (seconds * f64::from(IN_RATE)) as usize;
    let mut data = Vec::with_capacity(2 * len);
    let mut phase = 0.0f64;
    for n in 0..len {
        let t = n as f64 / f64::from(IN_RATE);
        phase += TAU * max_f * baseband(t) / f64::from(IN_RATE);
        data.push(phase.cos() as f32);
        data.push(phase.sin() as f32);
    }
    Samples::new(data, IN_RATE)
}

fn tone_at_out_rate(freq: f64, seconds: f64) -> Vec<f32> {
    let len = (seconds * f64::from(OUT_RATE)) as usize;
    (0..len)
        .map(|n| (TAU * freq * n as f64 / f64::from(OUT_RATE)).sin() as f32)
        .collect()
}

#[test]
fn fm_demodulator_round_trips_a_tone() {
    let modulating = |t: f64| 0.8 * (TAU * 1000.0 * t).sin();
    let iq = fm_modulate(modulating, 75_000.0, 0.5);

    // the wideband chain minus de-emphasis: discriminate at 336 kHz,
    // then filter down to audio
    let mut demod = FmDemodulator::new(IN_RATE, 336_000, 75_000, 67_500.0, 101);
    let audio_coefs = get_lowpass_fir_coeffs(336_000, 10_000.0, 41);
    let mut sampler = Downsampler::new(336_000, OUT_RATE, &audio_coefs);

    let discriminated = demod.demodulate_tuned(&iq);
    assert!(demod.has_carrier());
    let audio = sampler.downsample(&discriminated);

    let reference: Vec<f32> = (0..audio.len())
        .map(|n| modulating(n as f64 / f64::from(OUT_RATE)) as f32)
        .collect();
    // drop the settling period at the head of both
    let corr = peak_correlation(&reference[480..], &audio.data[480..], 64);
    assert!(corr > 0.99, "FM round-trip correlation {corr}");
}

#[test]
fn am_decoder_round_trips_a_tone() {
    let modulating = |t: f64| 0.5 * (TAU * 600.0 * t).sin();
    // carrier with a 1 kHz residual offset, as after coarse tuning
    let len = IN_RATE as usize / 2;
    let mut data = Vec::with_capacity(2 * len);
    for n in 0..len {
        let t = n as f64 / f64::from(IN_RATE);
        let envelope = 0.5 * (1.0 + modulating(t));
        let carrier = TAU * 1000.0 * t;
        data.push((envelope * carrier.cos()) as f32);
        data.push((envelope * carrier.sin()) as f32);
    }
    let iq = Samples::new(data, IN_RATE);

    let mut decoder = make_decoder(Mode::Am { bandwidth: 10_000 }, IN_RATE, OUT_RATE);
    let audio = decoder.decode(&iq, false);

    let reference: Vec<f32> = (0..audio.left.len())
        .map(|n| modulating(n as f64 / f64::from(OUT_RATE)) as f32)
        .collect();
    let corr = peak_correlation(&reference[480..], &audio.left.data[480..], 64);
    assert!(corr > 0.98, "AM round-trip correlation {corr}");
    assert!(audio.signal_level > 0.0);
    assert_eq!(audio.left.data, audio.right.data);
}

/// FM stereo composite: program sum, 19 kHz pilot, and the difference
/// signal on the phase-locked 38 kHz subcarrier.
fn stereo_composite(
    left: impl Fn(f64) -> f64,
    right: impl Fn(f64) -> f64,
    pilot_ampl: f64,
) -> impl Fn(f64) -> f64 {
    move |t| {
        let l = left(t);
        let r = right(t);
        0.45 * (l + r)
            + pilot_ampl * (TAU * 19_000.0 * t).sin()
            + 0.45 * (l - r) * (TAU * 38_000.0 * t).sin()
    }
}

#[test]
fn wbfm_recovers_both_stereo_channels() {
    let left_tone = |t: f64| (TAU * 800.0 * t).sin();
    let right_tone = |t: f64| (TAU * 1500.0 * t).sin();
    let composite = stereo_composite(left_tone, right_tone, 0.1);
    let iq = fm_modulate(composite, 75_000.0, 1.0);

    let mut decoder = make_decoder(Mode::Wbfm, IN_RATE, OUT_RATE);

    // feed in pipeline-sized blocks so inter-block state is exercised
    let mut left = Vec::new();
    let mut right = Vec::new();
    let mut stereo = false;
    for block in iq.data.chunks(409_600) {
        let audio = decoder.decode(&Samples::new(block.to_vec(), IN_RATE), true);
        stereo = audio.stereo;
        left.extend_from_slice(&audio.left.data);
        right.extend_from_slice(&audio.right.data);
        assert!(audio.signal_level > 0.0);
    }
    assert!(stereo, "pilot not detected");

    // judge only the second half, after the pilot loop has locked
    let half = left.len() / 2;
    let ref_left = tone_at_out_rate(800.0, 1.0);
    let ref_right = tone_at_out_rate(1500.0, 1.0);
    let corr_left = peak_correlation(&ref_left[half..], &left[half..], 64);
    let corr_right = peak_correlation(&ref_right[half..], &right[half..], 64);
    assert!(corr_left > 0.95, "left correlation {corr_left}");
    assert!(corr_right > 0.95, "right correlation {corr_right}");
}

#[test]
fn wbfm_mono_keeps_channels_identical() {
    let left_tone = |t: f64| (TAU * 800.0 * t).sin();
    let right_tone = |t: f64| (TAU * 1500.0 * t).sin();
    let composite = stereo_composite(left_tone, right_tone, 0.1);
    let iq = fm_modulate(composite, 75_000.0, 0.3);

    let mut decoder = make_decoder(Mode::Wbfm, IN_RATE, OUT_RATE);
    let audio = decoder.decode(&iq, false);
    assert!(!audio.stereo);
    assert_eq!(audio.left.data, audio.right.data);
}

#[test]
fn wbfm_without_pilot_stays_mono() {
    let left_tone = |t: f64| (TAU * 800.0 * t).sin();
    let right_tone = |t: f64| (TAU * 1500.0 * t).sin();
    // pilot amplitude zero; the subcarrier alone must not fool the
    // separator
    let composite = stereo_composite(left_tone, right_tone, 0.0);
    let iq = fm_modulate(composite, 75_000.0, 0.5);

    let mut decoder = make_decoder(Mode::Wbfm, IN_RATE, OUT_RATE);
    let mut stereo = false;
    for block in iq.data.chunks(409_600) {
        let audio = decoder.decode(&Samples::new(block.to_vec(), IN_RATE), true);
        stereo = audio.stereo;
    }
    assert!(!stereo);
}

#[test]
fn nbfm_round_trips_a_tone() {
    let modulating = |t: f64| 0.7 * (TAU * 700.0 * t).sin();
    let iq = fm_modulate(modulating, 10_000.0, 0.5);

    let mut decoder = make_decoder(Mode::Nbfm { max_f: 10_000 }, IN_RATE, OUT_RATE);
    let audio = decoder.decode(&iq, false);

    let reference: Vec<f32> = (0..audio.left.len())
        .map(|n| modulating(n as f64 / f64::from(OUT_RATE)) as f32)
        .collect();
    let corr = peak_correlation(&reference[480..], &audio.left.data[480..], 64);
    assert!(corr > 0.95, "NBFM round-trip correlation {corr}");
}

#[test]
fn ssb_produces_audio_in_band() {
    // an upper-sideband voice tone is a carrier offset by the audio
    // frequency
    let len = IN_RATE as usize / 2;
    let mut data = Vec::with_capacity(2 * len);
    for n in 0..len {
        let t = n as f64 / f64::from(IN_RATE);
        let phase = TAU * 1200.0 * t;
        data.push((0.5 * phase.cos()) as f32);
        data.push((0.5 * phase.sin()) as f32);
    }
    let iq = Samples::new(data, IN_RATE);

    let mut decoder = make_decoder(
        Mode::Ssb {
            bandwidth: 3000,
            upper: true,
        },
        IN_RATE,
        OUT_RATE,
    );
    let audio = decoder.decode(&iq, false);

    let reference = tone_at_out_rate(1200.0, 0.5);
    let settled = audio.left.len() / 2;
    let corr = peak_correlation(&reference[settled..], &audio.left.data[settled..], 64);
    assert!(corr > 0.9, "USB tone correlation {corr}");
}
