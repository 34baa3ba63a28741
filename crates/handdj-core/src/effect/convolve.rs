//! FFT convolution
//!
//! Whole-buffer ("offline") convolution: the impulse response spectrum is
//! computed once and reused for every channel of the signal.

use realfft::num_complex::Complex;
use realfft::RealFftPlanner;

use super::RenderError;

/// Convolves signals of a fixed length with one impulse response
///
/// Output uses "same" alignment: length equals the signal length and the
/// full convolution is cropped starting at `(ir_len - 1) / 2`.
pub struct SameConvolver {
    planner: RealFftPlanner<f64>,
    fft_len: usize,
    signal_len: usize,
    ir_len: usize,
    ir_spectrum: Vec<Complex<f64>>,
}

impl SameConvolver {
    pub fn new(ir: &[f64], signal_len: usize) -> Result<Self, RenderError> {
        if ir.is_empty() {
            return Err(RenderError::InvalidBuffer("empty impulse response".into()));
        }
        let full_len = signal_len + ir.len() - 1;
        let fft_len = full_len.next_power_of_two().max(2);

        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(fft_len);
        let mut padded = fft.make_input_vec();
        padded[..ir.len()].copy_from_slice(ir);
        let mut ir_spectrum = fft.make_output_vec();
        fft.process(&mut padded, &mut ir_spectrum)
            .map_err(|e| RenderError::Fft(format!("forward FFT failed: {:?}", e)))?;

        Ok(Self {
            planner,
            fft_len,
            signal_len,
            ir_len: ir.len(),
            ir_spectrum,
        })
    }

    pub fn convolve(&mut self, signal: &[f64]) -> Result<Vec<f64>, RenderError> {
        if signal.len() != self.signal_len {
            return Err(RenderError::InvalidBuffer(format!(
                "expected {} samples, got {}",
                self.signal_len,
                signal.len()
            )));
        }
        if signal.is_empty() {
            return Ok(Vec::new());
        }

        let fft = self.planner.plan_fft_forward(self.fft_len);
        let ifft = self.planner.plan_fft_inverse(self.fft_len);

        let mut padded = fft.make_input_vec();
        padded[..signal.len()].copy_from_slice(signal);
        let mut spectrum = fft.make_output_vec();
        let mut scratch = fft.make_scratch_vec();
        fft.process_with_scratch(&mut padded, &mut spectrum, &mut scratch)
            .map_err(|e| RenderError::Fft(format!("forward FFT failed: {:?}", e)))?;

        for (bin, ir_bin) in spectrum.iter_mut().zip(&self.ir_spectrum) {
            *bin = *bin * *ir_bin;
        }
        // DC and Nyquist bins of a real signal have no imaginary part
        if let Some(first) = spectrum.first_mut() {
            first.im = 0.0;
        }
        if let Some(last) = spectrum.last_mut() {
            last.im = 0.0;
        }

        let mut output = ifft.make_output_vec();
        let mut scratch = ifft.make_scratch_vec();
        ifft.process_with_scratch(&mut spectrum, &mut output, &mut scratch)
            .map_err(|e| RenderError::Fft(format!("inverse FFT failed: {:?}", e)))?;

        let scale = 1.0 / self.fft_len as f64;
        let start = (self.ir_len - 1) / 2;
        Ok(output[start..start + self.signal_len]
            .iter()
            .map(|v| v * scale)
            .collect())
    }
}

/// One-shot "same" convolution of `signal` with `ir`
pub fn convolve_same(signal: &[f64], ir: &[f64]) -> Result<Vec<f64>, RenderError> {
    SameConvolver::new(ir, signal.len())?.convolve(signal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_full(signal: &[f64], ir: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; signal.len() + ir.len() - 1];
        for (i, s) in signal.iter().enumerate() {
            for (j, h) in ir.iter().enumerate() {
                out[i + j] += s * h;
            }
        }
        out
    }

    #[test]
    fn test_matches_direct_convolution() {
        let signal: Vec<f64> = (0..37).map(|i| ((i * 7) % 11) as f64 - 5.0).collect();
        let ir = [0.5, -0.25, 0.125, 1.0, 0.3];
        let full = direct_full(&signal, &ir);
        let start = (ir.len() - 1) / 2;

        let same = convolve_same(&signal, &ir).unwrap();
        assert_eq!(same.len(), signal.len());
        for (a, b) in same.iter().zip(&full[start..start + signal.len()]) {
            assert!((a - b).abs() < 1e-9, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_identity_impulse() {
        let signal = vec![1.0, 2.0, 3.0, 4.0];
        let out = convolve_same(&signal, &[1.0]).unwrap();
        for (a, b) in out.iter().zip(&signal) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_reuse_for_several_channels() {
        let ir = [0.25, 0.5, 0.25];
        let mut convolver = SameConvolver::new(&ir, 4).unwrap();
        let left = convolver.convolve(&[1.0, 0.0, 0.0, 0.0]).unwrap();
        let right = convolver.convolve(&[0.0, 0.0, 0.0, 1.0]).unwrap();
        assert!((left[0] - 0.5).abs() < 1e-12);
        assert!((left[1] - 0.25).abs() < 1e-12);
        assert!((right[3] - 0.5).abs() < 1e-12);
        assert!(convolver.convolve(&[0.0; 3]).is_err());
    }

    #[test]
    fn test_empty_ir_rejected() {
        assert!(matches!(
            convolve_same(&[1.0], &[]),
            Err(RenderError::InvalidBuffer(_))
        ));
    }
}
