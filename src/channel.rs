use colored::Colorize;

use crate::constants::CPS_HZ;
use crate::ephemeris::Ephemeris;
use crate::util::{hex_str, pack_bits};

pub const PWR_LEN: usize = 8;
pub const MAX_BITS: usize = 64;
pub const SUBFRAME_BITS: usize = 300;
const HOLD_LEN: usize = SUBFRAME_BITS + MAX_BITS - 1;

pub const UPLOAD_BYTES: usize = 44;

const PREAMBLE_UPRIGHT: [u8; 8] = [1, 0, 0, 0, 1, 0, 1, 1];
const PREAMBLE_INVERSE: [u8; 8] = [0, 1, 1, 1, 0, 1, 0, 0];

// Channel state uploaded from the embedded CPU loop (GetChan reply).
#[derive(Default, Clone, Copy)]
pub struct ChannelUpload {
    pub nav_ms: u16,    // milliseconds into bit, 0..19
    pub nav_bits: u16,  // bit count
    pub nav_glitch: u16, // glitch count
    pub nav_prev: u16,  // last data bit
    pub nav_buf: [u16; MAX_BITS / 16], // NAV data buffer
    pub ca_freq: [u16; 4], // code loop filter integrator
    pub lo_freq: [u16; 4], // carrier loop filter integrator
    pub iq: [i16; 2],   // last I, Q samples
    pub ca_gain: [u16; 2], // code loop ki, kp
    pub lo_gain: [u16; 2], // carrier loop ki, kp
}

impl ChannelUpload {
    pub fn parse(raw: &[u8]) -> Self {
        let w = |i: usize| u16::from_le_bytes([raw[2 * i], raw[2 * i + 1]]);
        Self {
            nav_ms: w(0),
            nav_bits: w(1),
            nav_glitch: w(2),
            nav_prev: w(3),
            nav_buf: [w(4), w(5), w(6), w(7)],
            ca_freq: [w(8), w(9), w(10), w(11)],
            lo_freq: [w(12), w(13), w(14), w(15)],
            iq: [w(16) as i16, w(17) as i16],
            ca_gain: [w(18), w(19)],
            lo_gain: [w(20), w(21)],
        }
    }

    #[cfg(test)]
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut words = vec![self.nav_ms, self.nav_bits, self.nav_glitch, self.nav_prev];
        words.extend_from_slice(&self.nav_buf);
        words.extend_from_slice(&self.ca_freq);
        words.extend_from_slice(&self.lo_freq);
        words.push(self.iq[0] as u16);
        words.push(self.iq[1] as u16);
        words.extend_from_slice(&self.ca_gain);
        words.extend_from_slice(&self.lo_gain);
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

// NCO loop-filter integrator to Hertz: Q64 fraction of the sample rate.
pub fn nco_freq(u: &[u16; 4], fs: f64) -> f64 {
    (u[0] as f64 * 2f64.powi(-64)
        + u[1] as f64 * 2f64.powi(-48)
        + u[2] as f64 * 2f64.powi(-32)
        + u[3] as f64 * 2f64.powi(-16))
        * fs
}

// IS-GPS-200 word parity over the 24 uncomplemented data bits.
fn parity_of(d: &[u8], d29: u8, d30: u8) -> [u8; 6] {
    [
        d29 ^ d[0] ^ d[1] ^ d[2] ^ d[4] ^ d[5] ^ d[9] ^ d[10] ^ d[11] ^ d[12] ^ d[13] ^ d[16]
            ^ d[17] ^ d[19] ^ d[22],
        d30 ^ d[1] ^ d[2] ^ d[3] ^ d[5] ^ d[6] ^ d[10] ^ d[11] ^ d[12] ^ d[13] ^ d[14] ^ d[17]
            ^ d[18] ^ d[20] ^ d[23],
        d29 ^ d[0] ^ d[2] ^ d[3] ^ d[4] ^ d[6] ^ d[7] ^ d[11] ^ d[12] ^ d[13] ^ d[14] ^ d[15]
            ^ d[18] ^ d[19] ^ d[21],
        d30 ^ d[1] ^ d[3] ^ d[4] ^ d[5] ^ d[7] ^ d[8] ^ d[12] ^ d[13] ^ d[14] ^ d[15] ^ d[16]
            ^ d[19] ^ d[20] ^ d[22],
        d30 ^ d[0] ^ d[2] ^ d[4] ^ d[5] ^ d[6] ^ d[8] ^ d[9] ^ d[13] ^ d[14] ^ d[15] ^ d[16]
            ^ d[17] ^ d[20] ^ d[21] ^ d[23],
        d29 ^ d[2] ^ d[4] ^ d[5] ^ d[7] ^ d[8] ^ d[9] ^ d[10] ^ d[12] ^ d[14] ^ d[18] ^ d[21]
            ^ d[22] ^ d[23],
    ]
}

// Check one 30-bit word in place: data bits are de-inverted per D30 of the
// previous word, then the received parity must match.
fn word_parity(word: &mut [u8], d29: u8, d30: u8) -> bool {
    for b in word[..24].iter_mut() {
        *b ^= d30;
    }
    let p = parity_of(&word[..24], d29, d30);
    word[24..30] == p
}

// Locally-held per-channel tracking state.
pub struct Channel {
    pub ul: ChannelUpload,
    pub ch: usize,
    pub sv: usize,
    fs: f64,
    fc: f64,

    pwr: [f32; PWR_LEN], // running window of signal power
    pwr_tot: f32,
    pwr_pos: usize,
    gain_adj: i32,

    probation: u32, // non-zero keeps a noisy channel out of the solver
    holding: usize, // NAV bits held locally
    rd_pos: usize,  // read cursor into the hardware circular buffer
    buf: [u8; HOLD_LEN],
}

impl Channel {
    pub fn new(ch: usize, fs: f64, fc: f64) -> Self {
        Self {
            ul: ChannelUpload::default(),
            ch,
            sv: 0,
            fs,
            fc,
            pwr: [0.0; PWR_LEN],
            pwr_tot: 0.0,
            pwr_pos: 0,
            gain_adj: 0,
            probation: 2,
            holding: 0,
            rd_pos: 0,
            buf: [0; HOLD_LEN],
        }
    }

    pub fn reset(&mut self) {
        self.pwr = [0.0; PWR_LEN];
        self.pwr_tot = 0.0;
        self.pwr_pos = 0;
        self.gain_adj = 0;
        self.probation = 2;
        self.holding = 0;
        self.rd_pos = 0;
    }

    // NAV bits still held in the hardware circular buffer.
    pub fn remote_bits(&self, wr_pos: u16) -> usize {
        (wr_pos.wrapping_sub(self.rd_pos as u16) as usize) & (MAX_BITS - 1)
    }

    // Move whole 16-bit words from the uploaded circular buffer into the
    // linear holding buffer, MSB first.
    pub fn drain_bits(&mut self) {
        let mut avail = self.remote_bits(self.ul.nav_bits) & !0xF;
        while avail > 0 {
            let mut word = self.ul.nav_buf[self.rd_pos / 16] as u32;
            for _ in 0..16 {
                word <<= 1;
                self.buf[self.holding] = ((word >> 16) & 1) as u8;
                self.holding += 1;
            }
            self.rd_pos = (self.rd_pos + 16) & (MAX_BITS - 1);
            avail -= 16;
        }
    }

    // Run the holding buffer through subframe framing and parity. Returns
    // true if at least one clean subframe was decoded.
    pub fn frames(&mut self, eph: &mut Ephemeris) -> bool {
        let mut clean = false;
        while self.holding >= SUBFRAME_BITS {
            let (ok, nbits) = self.parity_check(eph);
            clean |= ok;
            self.buf.copy_within(nbits..self.holding, 0);
            self.holding -= nbits;
        }
        clean
    }

    fn parity_check(&mut self, eph: &mut Ephemeris) -> (bool, usize) {
        // Upright or inverted preamble? The parity-bit seed resolves the
        // Costas 180-degree phase ambiguity.
        let (mut d29, mut d30) = if self.buf[..8] == PREAMBLE_UPRIGHT {
            (0, 0)
        } else if self.buf[..8] == PREAMBLE_INVERSE {
            (1, 1)
        } else {
            return (false, 1); // slide one bit
        };

        for i in (0..SUBFRAME_BITS).step_by(30) {
            let word = &mut self.buf[i..i + 30];
            if !word_parity(word, d29, d30) {
                log::warn!(
                    "chan {} prn {} {} word {} -- {}",
                    self.ch,
                    self.sv + 1,
                    "parity".red(),
                    i / 30 + 1,
                    self.status(),
                );
                self.probation = 2;
                return (false, i + 30); // slide past the bad word
            }
            d29 = word[28];
            d30 = word[29];
        }

        let mut data = [0u8; 38];
        pack_bits(&self.buf[..SUBFRAME_BITS], &mut data);
        let id = eph.subframe(self.sv, &data);
        log::info!(
            "chan {} prn {} sub {} tow {} -- {}",
            self.ch,
            self.sv + 1,
            id,
            eph.tow,
            self.status(),
        );
        log::debug!("chan {} lnav {}", self.ch, hex_str(&data, SUBFRAME_BITS));
        self.probation = self.probation.saturating_sub(1);
        (true, SUBFRAME_BITS)
    }

    // Running average of received signal power, with two-threshold AGC
    // hysteresis. Returns a new gain adjustment when it changes.
    pub fn check_power(&mut self) -> Option<i32> {
        self.pwr_tot -= self.pwr[self.pwr_pos];
        let p = (self.ul.iq[0] as f32).powi(2) + (self.ul.iq[1] as f32).powi(2);
        self.pwr[self.pwr_pos] = p;
        self.pwr_tot += p;
        self.pwr_pos = (self.pwr_pos + 1) % PWR_LEN;

        // Carrier loop gain is proportional to signal power; the loop goes
        // unstable if the gain is not reduced for strong signals.
        const HYST_LO: f32 = 1200.0 * 1200.0;
        const HYST_HI: f32 = 1400.0 * 1400.0;

        let mean = self.power();
        if self.gain_adj != 0 {
            if mean < HYST_LO {
                self.gain_adj = 0;
                return Some(0);
            }
        } else if mean > HYST_HI {
            self.gain_adj = -1; // half loop gain
            return Some(-1);
        }
        None
    }

    pub fn power(&self) -> f32 {
        self.pwr_tot / PWR_LEN as f32
    }

    pub fn gain_adj(&self) -> i32 {
        self.gain_adj
    }

    pub fn on_probation(&self) -> bool {
        self.probation > 0
    }

    // Per-channel clocks for the solver. Refused while the channel is on
    // probation after a reset or a parity failure.
    pub fn get_snapshot(&self, wr_pos: u16) -> Option<(usize, usize, f32)> {
        if self.probation > 0 {
            return None;
        }
        Some((self.sv, self.holding + self.remote_bits(wr_pos), self.power()))
    }

    pub fn status(&self) -> String {
        let rssi = self.power().sqrt();
        let lo_f = nco_freq(&self.ul.lo_freq, self.fs) - self.fc;
        let ca_f = nco_freq(&self.ul.ca_freq, self.fs) - CPS_HZ;
        format!(
            "rssi {rssi:4.0} adj {:2} freq {lo_f:5.0} {ca_f:6.3}",
            self.gain_adj
        )
    }
}

// Test-side encoder for NAV words: complements the data bits per trailing
// D30 and appends the six computed parity bits.
#[cfg(test)]
pub(crate) fn encode_words(data: &[[u8; 24]], d29: u8, d30: u8) -> (Vec<u8>, u8, u8) {
    let (mut d29, mut d30) = (d29, d30);
    let mut out = vec![];
    for dw in data {
        let p = parity_of(dw, d29, d30);
        for &b in dw {
            out.push(b ^ d30);
        }
        out.extend_from_slice(&p);
        d29 = out[out.len() - 2];
        d30 = out[out.len() - 1];
    }
    (out, d29, d30)
}

#[cfg(test)]
pub(crate) fn set_bits(word: &mut [u8; 24], off: usize, len: usize, val: u64) {
    for i in 0..len {
        word[off + i] = ((val >> (len - 1 - i)) & 1) as u8;
    }
}

// A minimal well-formed subframe: preamble in word 1, TOW count and
// subframe id in word 2 (the HOW).
#[cfg(test)]
pub(crate) fn test_subframe(tow: u32, id: u32) -> Vec<[u8; 24]> {
    let mut words = vec![[0u8; 24]; 10];
    words[0][..8].copy_from_slice(&PREAMBLE_UPRIGHT);
    set_bits(&mut words[1], 0, 17, tow as u64);
    set_bits(&mut words[1], 19, 3, id as u64);
    words
}
