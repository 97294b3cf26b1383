//! FIR kernel design.

use std::f64::consts::PI;

/// Designs a windowed-sinc low-pass kernel with the given
/// half-amplitude frequency. The length is forced odd and the
/// coefficients are normalized to unity gain at DC.
pub fn get_lowpass_fir_coeffs(sample_rate: u32, half_ampl_freq: f32, length: usize) -> Vec<f32> {
    let length = length + (length + 1) % 2;
    let freq = f64::from(half_ampl_freq) / f64::from(sample_rate);
    let center = (length / 2) as isize;
    let mut sum = 0.0;
    let mut coefficients = vec![0.0f32; length];
    for (i, coefficient) in coefficients.iter_mut().enumerate() {
        let k = i as isize - center;
        let val = if k == 0 {
            2.0 * PI * freq
        }
        else {
            let angle = 2.0 * PI * (i + 1) as f64 / (length + 1) as f64;
            (2.0 * PI * freq * k as f64).sin() / k as f64
                * (0.42 - 0.5 * angle.cos() + 0.08 * (2.0 * angle).cos())
        };
        sum += val;
        *coefficient = val as f32;
    }
    for coefficient in &mut coefficients {
        *coefficient /= sum as f32;
    }
    coefficients
}

/// Designs a Hilbert-transform kernel: only the taps at an odd offset
/// from the center are nonzero, `2/(pi*k)` under the same window as
/// the low-pass design. Used by the SSB demodulator to phase-shift the
/// Q arm by 90 degrees across the audio band.
pub fn get_hilbert_coeffs(length: usize) -> Vec<f32> {
    let length = length + (length + 1) % 2;
    let center = (length / 2) as isize;
    let mut coefficients = vec![0.0f32; length];
    for (i, coefficient) in coefficients.iter_mut().enumerate() {
        let k = i as isize - center;
        if k % 2 != 0 {
            let angle = 2.0 * PI * (i + 1) as f64 / (length + 1) as f64;
            let window = 0.42 - 0.5 * angle.cos() + 0.08 * (2.0 * angle).cos();
            *coefficient = (2.0 / (PI * k as f64) * window) as f32;
        }
    }
    coefficients
}
