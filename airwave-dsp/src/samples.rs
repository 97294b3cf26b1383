//! Sample containers.
//!
//! Every stream carries its sample rate so that rate mismatches are
//! caught at the point where two streams meet, not three stages later
//! as mysteriously-pitched audio.

/// A block of floating-point samples at a given rate.
///
/// For an I/Q stream the data is interleaved: I at even indices, Q at
/// odd indices, and `rate` is the rate of the I/Q *pairs*.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Samples {
    pub data: Vec<f32>,
    pub rate: u32,
}

impl Samples {
    pub fn new(data: Vec<f32>, rate: u32) -> Self {
        Self { data, rate }
    }

    pub fn zeroed(len: usize, rate: u32) -> Self {
        Self {
            data: vec![0.0; len],
            rate,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A deinterleaved I/Q block. Both planes have the same length and
/// share one rate.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IqSamples {
    pub i: Vec<f32>,
    pub q: Vec<f32>,
    pub rate: u32,
}

impl IqSamples {
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.i.len(), self.q.len());
        self.i.len()
    }

    pub fn is_empty(&self) -> bool {
        self.i.is_empty()
    }
}

/// One decoded audio block: two 48 kHz channels plus what the decoder
/// learned about the signal while producing them.
#[derive(Clone, Debug, Default)]
pub struct StereoAudio {
    pub left: Samples,
    pub right: Samples,
    /// True when a stereo subcarrier was found and used.
    pub stereo: bool,
    /// Rough signal strength, 0 for noise, around 1 for a strong
    /// station. Drives squelch and scan stop.
    pub signal_level: f32,
}

/// Converts raw tuner bytes into an interleaved float block.
///
/// The tuner delivers unsigned bytes centered at 127.5; the 0.995
/// offset also takes out the small DC bias the ADC leaves behind.
pub fn samples_from_u8(buffer: &[u8], rate: u32) -> Samples {
    let data = buffer.iter().map(|&b| f32::from(b) / 128.0 - 0.995).collect();
    Samples { data, rate }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u8_conversion_is_centered() {
        let samples = samples_from_u8(&[0, 128, 255], 1000);
        assert_eq!(samples.rate, 1000);
        assert!(samples.data[0] < -0.9);
        assert!(samples.data[1].abs() < 0.01);
        assert!(samples.data[2] > 0.9);
    }
}
