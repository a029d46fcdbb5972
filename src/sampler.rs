use rustfft::num_complex::Complex32;
use std::error::Error;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::constants::FFT_LEN;

pub const PACKET: usize = 512;
pub const BLOCK_BYTES: usize = FFT_LEN / 8;

// Quadrature local oscillator look-up tables, one entry per NCO quadrant.
const LO_SIN: [u8; 4] = [1, 1, 0, 0];
const LO_COS: [u8; 4] = [1, 0, 0, 1];
const LO_COS_SWAP: [u8; 4] = [0, 1, 1, 0];

// The two sample-path sign conventions in the wild: the radio front end and
// captured files disagree on the cosine LUT phase.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MixerLut {
    Radio,
    Capture,
}

pub fn bipolar(bit: u8) -> f32 {
    if bit != 0 { -1.0 } else { 1.0 }
}

// Down-convert 1-bit IF samples (packed LSB first) to complex baseband by
// XORing against the quadrature oscillators of a 4-phase NCO.
pub fn mix_to_baseband(bits: &[u8], fc: f64, fs: f64, lut: MixerLut, out: &mut Vec<Complex32>) {
    out.clear();
    let lo_rate = 4.0 * fc / fs; // NCO rate
    let mut lo_phase = 0.0f64;

    for &byte in bits {
        let mut b = byte;
        for _ in 0..8 {
            let bit = b & 1;
            b >>= 1;
            let p = lo_phase as usize;
            let (re, im) = match lut {
                MixerLut::Radio => (bipolar(bit ^ LO_SIN[p]), bipolar(bit ^ LO_COS[p])),
                MixerLut::Capture => (bipolar(bit ^ LO_COS_SWAP[p]), bipolar(bit ^ LO_SIN[p])),
            };
            out.push(Complex32::new(re, im));
            lo_phase += lo_rate;
            if lo_phase >= 4.0 {
                lo_phase -= 4.0;
            }
        }
    }
}

// 1-bit IF capture replayed from disk, one FFT window at a time.
pub struct CaptureFile {
    reader: BufReader<File>,
    pub size_bytes: u64,
}

impl CaptureFile {
    pub fn open(path: &Path) -> Result<Self, Box<dyn Error>> {
        let file = File::open(path)?;
        let size_bytes = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            size_bytes,
        })
    }

    // Ok(false) once the capture is exhausted.
    pub fn read_block(&mut self, buf: &mut [u8]) -> Result<bool, Box<dyn Error>> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
