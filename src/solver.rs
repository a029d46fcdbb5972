use crate::cacode;
use crate::constants::{
    BPS, CPS_HZ, NUM_CHANS, OMEGA_E, SPEED_OF_LIGHT, WGS84_A, WGS84_E2,
};
use crate::ephemeris::Ephemeris;
use crate::runtime::yield_now;

pub const MAX_ITER: usize = 20;

pub const CLOCK_WORDS: usize = 1 + NUM_CHANS * 3 * 2;
pub const CLOCK_BYTES: usize = CLOCK_WORDS * 2;

// GetClocks reply: service-request bitmap, then per-channel embedded CPU
// words in channel order, then per-channel FPGA words in reverse order.
pub struct ClockBlock {
    pub srq: u16,
    pub up: [[u16; 3]; NUM_CHANS], // ms, bit write pointer, glitch
    pub dn: [[u16; 3]; NUM_CHANS], // G1 register + code NCO phase, ...
}

impl ClockBlock {
    pub fn parse(raw: &[u8]) -> Self {
        let w = |i: usize| u16::from_le_bytes([raw[2 * i], raw[2 * i + 1]]);
        let mut up = [[0u16; 3]; NUM_CHANS];
        let mut dn = [[0u16; 3]; NUM_CHANS];
        for ch in 0..NUM_CHANS {
            for k in 0..3 {
                up[ch][k] = w(1 + 3 * ch + k);
                dn[ch][k] = w(1 + 3 * NUM_CHANS + 3 * (NUM_CHANS - 1 - ch) + k);
            }
        }
        Self { srq: w(0), up, dn }
    }
}

// Everything the solver needs from one channel, captured atomically.
#[derive(Clone, Copy)]
pub struct Snapshot {
    pub eph: Ephemeris,
    pub power: f64,
    pub ch: usize,
    pub sv: usize,
    pub ms: u32,       // milliseconds into bit
    pub bits: u32,     // total NAV bits held locally + remotely
    pub g1: u16,       // code generator G1 register
    pub ca_phase: u16, // 6-bit fractional code NCO phase
}

impl Snapshot {
    // Un-corrected satellite clock at the snapshot instant. TOW refers to
    // the leading edge of the next subframe; un-processed bits remain in
    // the holding buffers and are counted here.
    pub fn transmit_time(&self) -> Option<f64> {
        let chips = cacode::search_code(self.sv, self.g1)?;
        Some(
            self.eph.tow as f64 * 6.0
                + self.bits as f64 / BPS
                + self.ms as f64 * 1e-3
                + chips as f64 / CPS_HZ
                + self.ca_phase as f64 * 2f64.powi(-6) / CPS_HZ,
        )
    }

    pub fn measurement(&self) -> Option<Measurement> {
        let mut t_tx = self.transmit_time()?;
        t_tx -= self.eph.clock_correction(t_tx);
        Some(Measurement {
            t_tx,
            pos: self.eph.pos_ecef(t_tx),
            weight: self.power,
        })
    }
}

pub struct Measurement {
    pub t_tx: f64,     // corrected time of transmission, seconds of week
    pub pos: [f64; 3], // SV position in ECEF at t_tx
    pub weight: f64,
}

pub struct Solution {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub t_bias: f64,
    pub t_rx: f64, // corrected GPS time of the snapshot, seconds of week
    pub iters: usize,
}

// 4x4 inverse by cofactor expansion, determinant computed once.
fn invert4(m: &[[f64; 4]; 4]) -> Option<[[f64; 4]; 4]> {
    let minor = |r: usize, c: usize| {
        let mut s = [[0.0f64; 3]; 3];
        let mut sr = 0;
        for i in 0..4 {
            if i == r {
                continue;
            }
            let mut sc = 0;
            for j in 0..4 {
                if j == c {
                    continue;
                }
                s[sr][sc] = m[i][j];
                sc += 1;
            }
            sr += 1;
        }
        s[0][0] * (s[1][1] * s[2][2] - s[1][2] * s[2][1])
            - s[0][1] * (s[1][0] * s[2][2] - s[1][2] * s[2][0])
            + s[0][2] * (s[1][0] * s[2][1] - s[1][1] * s[2][0])
    };

    let mut cof = [[0.0f64; 4]; 4];
    for r in 0..4 {
        for c in 0..4 {
            let sign = if (r + c) % 2 == 0 { 1.0 } else { -1.0 };
            cof[r][c] = sign * minor(r, c);
        }
    }
    let det: f64 = (0..4).map(|c| m[0][c] * cof[0][c]).sum();
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    let mut inv = [[0.0f64; 4]; 4];
    for r in 0..4 {
        for c in 0..4 {
            inv[r][c] = cof[c][r] / det;
        }
    }
    Some(inv)
}

// Iterative weighted least squares for receiver (x, y, z, t_bias), per-SV
// weights taken from received signal power. None on singular geometry or
// when MAX_ITER is reached without the position update converging.
pub async fn solve(meas: &[Measurement]) -> Option<Solution> {
    let chans = meas.len();

    let (mut x_n, mut y_n, mut z_n, mut t_bias) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);

    // Approximate starting value for receiver clock: mean transmit time
    // plus nominal travel time.
    let t_pc = meas.iter().map(|m| m.t_tx).sum::<f64>() / chans as f64 + 75e-3;

    let mut jac = vec![[0.0f64; 4]; chans];
    let mut dpr = vec![0.0f64; chans];

    let mut iter = 0;
    while iter < MAX_ITER {
        yield_now().await;
        let t_rx = t_pc - t_bias;

        for (i, m) in meas.iter().enumerate() {
            // SV position at transmit time, rotated to ECI of the receive
            // instant (IS-GPS-200 20.3.3.4.3.3.2)
            let theta = (m.t_tx - t_rx) * OMEGA_E;
            let (sin_t, cos_t) = theta.sin_cos();
            let x_eci = m.pos[0] * cos_t - m.pos[1] * sin_t;
            let y_eci = m.pos[0] * sin_t + m.pos[1] * cos_t;
            let z_eci = m.pos[2];

            // geometric range (20.3.3.4.3.4)
            let gr = ((x_n - x_eci).powi(2) + (y_n - y_eci).powi(2) + (z_n - z_eci).powi(2))
                .sqrt();

            dpr[i] = SPEED_OF_LIGHT * (t_rx - m.t_tx) - gr;
            jac[i] = [
                (x_n - x_eci) / gr,
                (y_n - y_eci) / gr,
                (z_n - z_eci) / gr,
                SPEED_OF_LIGHT,
            ];
        }

        // normal equations: transpose(H) * W * H
        let mut ma = [[0.0f64; 4]; 4];
        for r in 0..4 {
            for c in 0..4 {
                ma[r][c] = (0..chans).map(|i| jac[i][r] * meas[i].weight * jac[i][c]).sum();
            }
        }

        let mb = invert4(&ma)?;

        // correction = inverse(HtWH) * Ht * W * dPR
        let mut md = [0.0f64; 4];
        for r in 0..4 {
            for i in 0..chans {
                let hti: f64 = (0..4).map(|k| mb[r][k] * jac[i][k]).sum();
                md[r] += hti * meas[i].weight * dpr[i];
            }
        }

        iter += 1;
        if (md[0] * md[0] + md[1] * md[1] + md[2] * md[2]).sqrt() < 1.0 {
            return Some(Solution {
                x: x_n,
                y: y_n,
                z: z_n,
                t_bias,
                t_rx,
                iters: iter,
            });
        }

        x_n += md[0];
        y_n += md[1];
        z_n += md[2];
        t_bias += md[3];
    }
    None
}

// WGS-84 ECEF to geodetic, iterative latitude refinement.
pub fn lat_lon_alt(x: f64, y: f64, z: f64) -> (f64, f64, f64) {
    let p = (x * x + y * y).sqrt();
    let lon = 2.0 * y.atan2(x + p);
    let mut lat = (z / (p * (1.0 - WGS84_E2))).atan();
    let mut alt = 0.0;

    loop {
        let prev = alt;
        let n = WGS84_A / (1.0 - WGS84_E2 * lat.sin().powi(2)).sqrt();
        alt = p / lat.cos() - n;
        lat = (z / (p * (1.0 - WGS84_E2 * n / (n + alt)))).atan();
        if (alt - prev).abs() < 1e-3 {
            break;
        }
    }
    (lat, lon, alt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PI;
    use crate::runtime::block_on;

    fn ecef_from_geodetic(lat: f64, lon: f64, alt: f64) -> [f64; 3] {
        let n = WGS84_A / (1.0 - WGS84_E2 * lat.sin().powi(2)).sqrt();
        [
            (n + alt) * lat.cos() * lon.cos(),
            (n + alt) * lat.cos() * lon.sin(),
            (n * (1.0 - WGS84_E2) + alt) * lat.sin(),
        ]
    }

    #[test]
    fn cofactor_inverse() {
        let m = [
            [4.0, 1.0, 0.5, 2.0],
            [1.0, 3.0, 0.0, 1.0],
            [0.5, 0.0, 2.0, 0.3],
            [2.0, 1.0, 0.3, 5.0],
        ];
        let inv = invert4(&m).unwrap();
        for r in 0..4 {
            for c in 0..4 {
                let v: f64 = (0..4).map(|k| m[r][k] * inv[k][c]).sum();
                let expect = if r == c { 1.0 } else { 0.0 };
                assert!((v - expect).abs() < 1e-12, "[{r}][{c}] = {v}");
            }
        }
    }

    #[test]
    fn singular_matrix_is_rejected() {
        let mut m = [[0.0; 4]; 4];
        m[0] = [1.0, 2.0, 3.0, 4.0];
        m[1] = [2.0, 4.0, 6.0, 8.0]; // dependent row
        m[2] = [0.0, 1.0, 0.0, 0.0];
        m[3] = [0.0, 0.0, 1.0, 0.0];
        assert!(invert4(&m).is_none());
    }

    #[test]
    fn geodetic_round_trip() {
        let mut lat_deg = -85.0;
        while lat_deg <= 85.0 {
            let mut lon_deg = -175.0;
            while lon_deg < 180.0 {
                for alt in [0.0, 50.0, 1000.0, 20000.0] {
                    let (lat, lon) = (lat_deg * PI / 180.0, lon_deg * PI / 180.0);
                    let [x, y, z] = ecef_from_geodetic(lat, lon, alt);
                    let (lat2, lon2, alt2) = lat_lon_alt(x, y, z);
                    assert!((lat2 - lat).abs() < 1e-9, "lat {lat_deg}");
                    assert!((lon2 - lon).abs() < 1e-9, "lon {lon_deg}");
                    assert!((alt2 - alt).abs() < 1e-3, "alt {alt}");
                }
                lon_deg += 25.0;
            }
            lat_deg += 5.0;
        }
    }

    // Noise-free pseudoranges from known SV positions; the solver must
    // come back to the receiver location.
    fn synthetic_measurements(rcv: [f64; 3], t_rx: f64, sv_geo: &[(f64, f64)]) -> Vec<Measurement> {
        sv_geo
            .iter()
            .map(|&(lat_deg, lon_deg)| {
                let pos = ecef_from_geodetic(
                    lat_deg * PI / 180.0,
                    lon_deg * PI / 180.0,
                    20_000e3,
                );
                // transit time and earth rotation interlock; a few rounds settle it
                let mut t_tx = t_rx;
                for _ in 0..4 {
                    let theta = (t_tx - t_rx) * OMEGA_E;
                    let (s, c) = theta.sin_cos();
                    let eci = [pos[0] * c - pos[1] * s, pos[0] * s + pos[1] * c, pos[2]];
                    let gr = ((rcv[0] - eci[0]).powi(2)
                        + (rcv[1] - eci[1]).powi(2)
                        + (rcv[2] - eci[2]).powi(2))
                    .sqrt();
                    t_tx = t_rx - gr / SPEED_OF_LIGHT;
                }
                Measurement {
                    t_tx,
                    pos,
                    weight: 1.0,
                }
            })
            .collect()
    }

    #[test]
    fn converges_on_known_position() {
        let lat = 51.5 * PI / 180.0;
        let lon = 0.0;
        let alt = 50.0;
        let rcv = ecef_from_geodetic(lat, lon, alt);
        let t_rx = 345600.0;
        let meas = synthetic_measurements(
            rcv,
            t_rx,
            &[(70.0, 0.0), (45.0, -40.0), (45.0, 40.0), (25.0, -10.0), (30.0, 15.0)],
        );

        let sol = block_on(solve(&meas)).unwrap();
        assert!(sol.iters < 10, "iters = {}", sol.iters);
        let (lat2, lon2, alt2) = lat_lon_alt(sol.x, sol.y, sol.z);
        assert!((sol.x - rcv[0]).abs() < 1.0);
        assert!((sol.y - rcv[1]).abs() < 1.0);
        assert!((sol.z - rcv[2]).abs() < 1.0);
        assert!((lat2 - lat).abs() < 2e-7);
        assert!((lon2 - lon).abs() < 2e-7);
        assert!((alt2 - alt).abs() < 1.5);

        // the solved receiver clock is consistent with the synthetic epoch
        assert!((sol.t_rx - t_rx).abs() < 1e-8);
    }

    #[test]
    fn transmit_time_formula() {
        let mut eph = Ephemeris::default();
        eph.tow = 0x0A5A5;
        let snap = Snapshot {
            eph,
            power: 1.0,
            ch: 0,
            sv: 0,
            ms: 0,
            bits: 0,
            g1: 0x3FF, // generator initial state: chip 0
            ca_phase: 0,
        };
        let t = snap.transmit_time().unwrap();
        assert_eq!(t, 0x0A5A5 as f64 * 6.0);

        // each term advances the clock
        let snap2 = Snapshot {
            ms: 3,
            bits: 17,
            ca_phase: 32,
            ..snap
        };
        let t2 = snap2.transmit_time().unwrap();
        let expect = 0x0A5A5 as f64 * 6.0 + 17.0 / BPS + 3e-3 + 0.5 / CPS_HZ;
        assert!((t2 - expect).abs() < 1e-12);
    }

    #[test]
    fn unreachable_g1_state_yields_no_measurement() {
        let snap = Snapshot {
            eph: Ephemeris::default(),
            power: 1.0,
            ch: 0,
            sv: 0,
            ms: 0,
            bits: 0,
            g1: 0, // never occurs in the G1 sequence
            ca_phase: 0,
        };
        assert!(snap.transmit_time().is_none());
    }

    #[test]
    fn clock_block_layout() {
        let mut raw = vec![0u8; CLOCK_BYTES];
        let put = |raw: &mut [u8], i: usize, v: u16| {
            raw[2 * i..2 * i + 2].copy_from_slice(&v.to_le_bytes())
        };
        put(&mut raw, 0, 0b101); // service requests on ch 0 and 2
        put(&mut raw, 1, 7); // ch0 ms
        put(&mut raw, 2, 48); // ch0 write pointer
        put(&mut raw, 1 + 3 * NUM_CHANS + 3 * (NUM_CHANS - 1), (5 << 10) | 0x2AB); // ch0 dn
        put(&mut raw, 1 + 3 * 11, 19); // ch11 ms
        put(&mut raw, 1 + 3 * NUM_CHANS, 0x3FF); // ch11 dn

        let blk = ClockBlock::parse(&raw);
        assert_eq!(blk.srq, 0b101);
        assert_eq!(blk.up[0], [7, 48, 0]);
        assert_eq!(blk.dn[0][0] & 0x3FF, 0x2AB);
        assert_eq!(blk.dn[0][0] >> 10, 5);
        assert_eq!(blk.up[11][0], 19);
        assert_eq!(blk.dn[11][0], 0x3FF);
    }
}
