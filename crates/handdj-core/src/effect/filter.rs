//! IIR filter building blocks
//!
//! Butterworth designs (bilinear transform with pre-warping) expressed as
//! cascades of second-order sections, a shelving EQ, and zero-phase
//! forward-backward filtering for offline rendering.

use std::f64::consts::PI;

/// Transposed direct form II biquad coefficients (a0 normalized to 1)
///
/// A first-order section is a biquad with `b2 = a2 = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Biquad {
    /// DC gain H(z = 1)
    fn dc_gain(&self) -> f64 {
        let den = 1.0 + self.a1 + self.a2;
        if den.abs() < 1e-12 {
            0.0
        } else {
            (self.b0 + self.b1 + self.b2) / den
        }
    }

    /// State that makes a constant input `x` produce a constant output
    fn steady_state(&self, x: f64) -> [f64; 2] {
        let y = x * self.dc_gain();
        let z2 = self.b2 * x - self.a2 * y;
        let z1 = y - self.b0 * x;
        [z1, z2]
    }

    #[inline]
    fn tick(&self, x: f64, z: &mut [f64; 2]) -> f64 {
        let y = self.b0 * x + z[0];
        z[0] = self.b1 * x - self.a1 * y + z[1];
        z[1] = self.b2 * x - self.a2 * y;
        y
    }
}

/// Filter response type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    LowPass,
    HighPass,
}

/// Cascade of second-order sections
#[derive(Debug, Clone, PartialEq)]
pub struct SosFilter {
    sections: Vec<Biquad>,
}

impl SosFilter {
    /// Butterworth filter of the given order (1-3) at `cutoff_hz`
    ///
    /// The cutoff is kept below 0.99 of Nyquist.
    pub fn butterworth(order: usize, kind: FilterKind, cutoff_hz: f64, sample_rate: u32) -> Self {
        let nyquist = sample_rate as f64 / 2.0;
        let cutoff = cutoff_hz.clamp(1.0, nyquist * 0.99);
        let k = (PI * cutoff / sample_rate as f64).tan();

        let sections = match order {
            0 => Vec::new(),
            1 => vec![first_order(kind, k)],
            2 => vec![second_order(kind, k, std::f64::consts::FRAC_1_SQRT_2)],
            // Third order: real pole + complex pair with Q = 1
            _ => vec![first_order(kind, k), second_order(kind, k, 1.0)],
        };
        Self { sections }
    }

    /// RBJ high-shelf (shelf slope S = 1) boosting/cutting above `corner_hz`
    pub fn high_shelf(corner_hz: f64, gain_db: f64, sample_rate: u32) -> Self {
        let nyquist = sample_rate as f64 / 2.0;
        let corner = corner_hz.clamp(1.0, nyquist * 0.99);
        let a = 10f64.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * corner / sample_rate as f64;
        let (sin_w0, cos_w0) = w0.sin_cos();
        // S = 1: alpha = sin(w0)/2 * sqrt(2)
        let alpha = sin_w0 / 2.0 * std::f64::consts::SQRT_2;
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let b0 = a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha);
        let b1 = -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0);
        let b2 = a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha);
        let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha;
        let a1 = 2.0 * ((a - 1.0) - (a + 1.0) * cos_w0);
        let a2 = (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha;

        Self {
            sections: vec![Biquad {
                b0: b0 / a0,
                b1: b1 / a0,
                b2: b2 / a0,
                a1: a1 / a0,
                a2: a2 / a0,
            }],
        }
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Causal filtering from a zero state
    pub fn filter(&self, signal: &[f64]) -> Vec<f64> {
        let mut out = signal.to_vec();
        for section in &self.sections {
            let mut z = [0.0; 2];
            for x in out.iter_mut() {
                *x = section.tick(*x, &mut z);
            }
        }
        out
    }

    /// Zero-phase forward-backward filtering
    ///
    /// The signal is padded with an odd reflection at both ends and each
    /// pass starts from the steady state for its first sample, which keeps
    /// the edges free of start-up transients. Output length equals input length.
    pub fn filtfilt(&self, signal: &[f64]) -> Vec<f64> {
        let n = signal.len();
        if n == 0 || self.sections.is_empty() {
            return signal.to_vec();
        }

        let pad = (3 * (2 * self.sections.len() + 1)).min(n - 1);
        let mut ext = Vec::with_capacity(n + 2 * pad);
        let first = signal[0];
        let last = signal[n - 1];
        for i in (1..=pad).rev() {
            ext.push(2.0 * first - signal[i]);
        }
        ext.extend_from_slice(signal);
        for i in 1..=pad {
            ext.push(2.0 * last - signal[n - 1 - i]);
        }

        self.run_from_steady_state(&mut ext);
        ext.reverse();
        self.run_from_steady_state(&mut ext);
        ext.reverse();

        ext[pad..pad + n].to_vec()
    }

    fn run_from_steady_state(&self, data: &mut [f64]) {
        let Some(&x0) = data.first() else {
            return;
        };
        let mut level = x0;
        for section in &self.sections {
            let mut z = section.steady_state(level);
            level *= section.dc_gain();
            for x in data.iter_mut() {
                *x = section.tick(*x, &mut z);
            }
        }
    }
}

fn first_order(kind: FilterKind, k: f64) -> Biquad {
    let a1 = (k - 1.0) / (k + 1.0);
    match kind {
        FilterKind::LowPass => {
            let b0 = k / (1.0 + k);
            Biquad { b0, b1: b0, b2: 0.0, a1, a2: 0.0 }
        }
        FilterKind::HighPass => {
            let b0 = 1.0 / (1.0 + k);
            Biquad { b0, b1: -b0, b2: 0.0, a1, a2: 0.0 }
        }
    }
}

fn second_order(kind: FilterKind, k: f64, q: f64) -> Biquad {
    let k2 = k * k;
    let norm = 1.0 / (1.0 + k / q + k2);
    let a1 = 2.0 * (k2 - 1.0) * norm;
    let a2 = (1.0 - k / q + k2) * norm;
    match kind {
        FilterKind::LowPass => {
            let b0 = k2 * norm;
            Biquad { b0, b1: 2.0 * b0, b2: b0, a1, a2 }
        }
        FilterKind::HighPass => {
            let b0 = norm;
            Biquad { b0, b1: -2.0 * b0, b2: b0, a1, a2 }
        }
    }
}
