//! Filtering and resampling primitives.

use crate::samples::{
    IqSamples,
    Samples,
};

/// A finite impulse response filter over successive sample blocks.
///
/// The coefficient vector is reversed once at construction; the only
/// mutable state is a history buffer that keeps `(len - 1) * step`
/// trailing samples from the previous block so that block boundaries
/// are seamless.
#[derive(Clone, Debug)]
pub struct FirFilter {
    coefficients: Vec<f32>,
    history: Vec<f32>,
    step: usize,
    offset: usize,
}

impl FirFilter {
    pub fn new(coefficients: &[f32], step: usize) -> Self {
        let mut reversed = coefficients.to_vec();
        reversed.reverse();
        let offset = (coefficients.len() - 1) * step;
        Self {
            coefficients: reversed,
            history: vec![0.0; offset],
            step,
            offset,
        }
    }

    /// Makes `samples` the current block, keeping the tail of the
    /// previous one as lead-in.
    pub fn load(&mut self, samples: &[f32]) {
        let tail_start = self.history.len() - self.offset;
        self.history.copy_within(tail_start.., 0);
        self.history.resize(self.offset + samples.len(), 0.0);
        self.history[self.offset..].copy_from_slice(samples);
    }

    /// Returns the filtered sample at `index` of the current block.
    ///
    /// This inner loop is where the receiver spends almost all of its
    /// CPU time; keep it free of branches and allocations.
    #[inline]
    pub fn get(&self, index: usize) -> f32 {
        let mut out = 0.0;
        let mut at = index;
        for &coefficient in &self.coefficients {
            out += coefficient * self.history[at];
            at += self.step;
        }
        out
    }

    /// Returns the *unfiltered* input sample at `index`, delayed by
    /// half the kernel. Lets a parallel path stay time-aligned with a
    /// filtered one.
    #[inline]
    pub fn delayed(&self, index: usize) -> f32 {
        self.history[index + self.offset / 2]
    }
}

/// Applies a low-pass filter and resamples to a lower rate.
#[derive(Clone, Debug)]
pub struct Downsampler {
    filter: FirFilter,
    in_rate: u32,
    out_rate: u32,
    rate_mul: f32,
}

impl Downsampler {
    pub fn new(in_rate: u32, out_rate: u32, coefficients: &[f32]) -> Self {
        Self {
            filter: FirFilter::new(coefficients, 1),
            in_rate,
            out_rate,
            rate_mul: in_rate as f32 / out_rate as f32,
        }
    }

    pub fn downsample(&mut self, samples: &Samples) -> Samples {
        assert_eq!(samples.rate, self.in_rate, "downsampler rate mismatch");
        self.filter.load(&samples.data);
        let out_len = (samples.data.len() as f32 / self.rate_mul) as usize;
        let mut data = Vec::with_capacity(out_len);
        let mut read_from = 0.0f32;
        for _ in 0..out_len {
            data.push(self.filter.get(read_from as usize));
            read_from += self.rate_mul;
        }
        Samples {
            data,
            rate: self.out_rate,
        }
    }
}

/// Downsamples and deinterleaves an I/Q stream in one pass: a single
/// step-2 filter reads I at even indices and Q at odd indices.
#[derive(Clone, Debug)]
pub struct IqDownsampler {
    filter: FirFilter,
    in_rate: u32,
    out_rate: u32,
    rate_mul: f32,
}

impl IqDownsampler {
    pub fn new(in_rate: u32, out_rate: u32, coefficients: &[f32]) -> Self {
        Self {
            filter: FirFilter::new(coefficients, 2),
            in_rate,
            out_rate,
            rate_mul: in_rate as f32 / out_rate as f32,
        }
    }

    pub fn downsample(&mut self, samples: &Samples) -> IqSamples {
        assert_eq!(samples.rate, self.in_rate, "downsampler rate mismatch");
        let out_len = (samples.data.len() as f32 / (2.0 * self.rate_mul)) as usize;
        self.filter.load(&samples.data);
        let mut i = Vec::with_capacity(out_len);
        let mut q = Vec::with_capacity(out_len);
        let mut read_from = 0.0f32;
        for _ in 0..out_len {
            let index = 2 * (read_from as usize);
            i.push(self.filter.get(index));
            q.push(self.filter.get(index + 1));
            read_from += self.rate_mul;
        }
        IqSamples {
            i,
            q,
            rate: self.out_rate,
        }
    }
}

/// An exponential moving average, optionally tracking the variance of
/// the input through the same recurrence.
#[derive(Clone, Debug)]
pub struct ExpAverage {
    weight: f32,
    calc_variance: bool,
    avg: f32,
    variance: f32,
}

impl ExpAverage {
    pub fn new(weight: u32) -> Self {
        Self {
            weight: weight as f32,
            calc_variance: false,
            avg: 0.0,
            variance: 0.0,
        }
    }

    pub fn with_variance(weight: u32) -> Self {
        Self {
            calc_variance: true,
            ..Self::new(weight)
        }
    }

    pub fn add(&mut self, value: f32) -> f32 {
        self.avg = (self.weight * self.avg + value) / (self.weight + 1.0);
        if self.calc_variance {
            let dev = value - self.avg;
            self.variance = (self.weight * self.variance + dev * dev) / (self.weight + 1.0);
        }
        self.avg
    }

    pub fn get(&self) -> f32 {
        self.avg
    }

    pub fn variance(&self) -> f32 {
        self.variance
    }
}

/// Single-pole IIR that undoes the broadcaster's pre-emphasis.
#[derive(Clone, Debug)]
pub struct Deemphasizer {
    mult: f64,
    val: f64,
}

impl Deemphasizer {
    /// `time_constant_us` is 50 in most of the world, 75 in the
    /// Americas and South Korea.
    pub fn new(sample_rate: u32, time_constant_us: u32) -> Self {
        Self {
            mult: (-1e6 / f64::from(time_constant_us * sample_rate)).exp(),
            val: 0.0,
        }
    }

    pub fn in_place(&mut self, samples: &mut Samples) {
        for sample in &mut samples.data {
            self.val = (1.0 - self.mult) * f64::from(*sample) + self.mult * self.val;
            *sample = self.val as f32;
        }
    }
}
