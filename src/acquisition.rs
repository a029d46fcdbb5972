use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::cacode::CaCode;
use crate::constants::{CPS_HZ, FFT_LEN, NUM_SATS};
use crate::runtime::yield_now;
use crate::sampler::{bipolar, mix_to_baseband, MixerLut};

pub const SNR_THRESHOLD: f32 = 25.0;

#[derive(Clone, Copy, Debug)]
pub struct Detection {
    pub snr: f32,
    pub lo_shift: i32,  // Doppler, FFT bin units
    pub ca_shift: usize, // code offset, sample units
}

// C/A code replica resampled to the receiver sample rate, with linear
// blending across chip boundaries.
pub fn code_replica(sv: usize, fs: f64) -> Vec<Complex32> {
    let ca_rate = CPS_HZ / fs;
    let mut ca = CaCode::for_sv(sv);
    let mut ca_phase = 0.0f64;
    let mut buf = Vec::with_capacity(FFT_LEN);

    for _ in 0..FFT_LEN {
        let mut chip = bipolar(ca.chip()); // chip at start of sample period

        ca_phase += ca_rate; // NCO phase at end of period
        if ca_phase >= 1.0 {
            // reached or crossed chip boundary
            ca_phase -= 1.0;
            ca.clock();
            chip *= 1.0 - ca_phase as f32;
            chip += ca_phase as f32 * bipolar(ca.chip());
        }
        buf.push(Complex32::new(chip, 0.0));
    }
    buf
}

// Parallel code-and-Doppler search: the window is transformed once, then
// cross-correlated against each SV's precomputed replica spectrum at every
// candidate Doppler bin.
pub struct Acquirer {
    fs: f64,
    max_fo: f64,
    fwd: Arc<dyn Fft<f32>>,
    inv: Arc<dyn Fft<f32>>,
    codes: Vec<Vec<Complex32>>, // per-SV replica spectra
    data: Vec<Complex32>,       // current window, frequency domain
    scratch: Vec<Complex32>,
}

impl Acquirer {
    pub fn new(fs: f64, max_fo: f64) -> Self {
        let mut planner = FftPlanner::new();
        let fwd = planner.plan_fft_forward(FFT_LEN);
        let inv = planner.plan_fft_inverse(FFT_LEN);

        let codes = (0..NUM_SATS)
            .map(|sv| {
                let mut buf = code_replica(sv, fs);
                fwd.process(&mut buf);
                buf
            })
            .collect();

        Self {
            fs,
            max_fo,
            fwd,
            inv,
            codes,
            data: vec![Complex32::default(); FFT_LEN],
            scratch: vec![Complex32::default(); FFT_LEN],
        }
    }

    pub fn load_bits(&mut self, bits: &[u8], fc: f64, lut: MixerLut) {
        mix_to_baseband(bits, fc, self.fs, lut, &mut self.data);
        self.fwd.process(&mut self.data);
    }

    pub fn load_baseband(&mut self, iq: &[Complex32]) {
        self.data.clear();
        self.data.extend_from_slice(iq);
        self.fwd.process(&mut self.data);
    }

    // Best (Doppler bin, code offset) for one SV across the whole search
    // space. The SNR metric is peak power over mean power within one code
    // period of the cross-correlation.
    pub async fn correlate(&mut self, sv: usize) -> Option<Detection> {
        let bins = (self.max_fo * FFT_LEN as f64 / self.fs) as i32;
        let period = (self.fs / 1000.0) as usize; // one code period in samples
        let code = &self.codes[sv];
        let mut best: Option<Detection> = None;

        for dop in -bins..=bins {
            for i in 0..FFT_LEN {
                let j = (i as i32 - dop).rem_euclid(FFT_LEN as i32) as usize;
                self.scratch[i] = self.data[i].conj() * code[j];
            }
            self.inv.process(&mut self.scratch);
            yield_now().await;

            let mut max_pwr = 0.0f32;
            let mut tot_pwr = 0.0f32;
            let mut max_pwr_i = None;
            for (i, p) in self.scratch[..period].iter().enumerate() {
                let pwr = p.norm_sqr();
                if pwr > max_pwr {
                    max_pwr = pwr;
                    max_pwr_i = Some(i);
                }
                tot_pwr += pwr;
            }

            // a bin with no power at all holds no candidate
            let Some(max_pwr_i) = max_pwr_i else { continue };

            let snr = max_pwr / (tot_pwr / period as f32);
            if best.as_ref().is_none_or(|b| snr > b.snr) {
                best = Some(Detection {
                    snr,
                    lo_shift: dop,
                    ca_shift: max_pwr_i,
                });
            }
        }
        best
    }
}
