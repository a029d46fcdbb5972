use colored::Colorize;

use crate::constants::{
    F_REL, MU, OMEGA_E, P2_5, P2_19, P2_24, P2_27, P2_29, P2_30, P2_31, P2_33, P2_43, P2_55,
    SC2RAD,
};
use crate::util::{getbits, getbits2, getbitu, getbitu2};

const HALF_WEEK_SEC: f64 = 302400.0;
const WEEK_SEC: f64 = 604800.0;

#[derive(Default, Clone, Copy)]
pub struct Ephemeris {
    pub tow: u32, // time-of-week count of the latest subframe, 6-second units
    pub tlm: u32,

    // Subframe 1
    pub week: u32,
    pub sva: u32,  // SV accuracy (URA index)
    pub svh: u32,  // SV health (0:ok)
    pub code: u32, // code on L2
    pub flag: u32, // L2 P data flag
    pub iodc: u32,
    pub tgd: f64, // estimated group delay differential
    pub toc: u32, // time of clock
    pub f0: f64,  // SV clock bias correction coefficient
    pub f1: f64,  // SV clock drift correction coefficient
    pub f2: f64,  // drift rate correction coefficient

    // Subframe 2
    pub iode2: u32,
    pub crs: f64,  // sine harmonic correction to orbit radius
    pub deln: f64, // mean motion difference from computed value
    pub m0: f64,   // mean anomaly at reference time
    pub cuc: f64,  // cosine harmonic correction to argument of latitude
    pub ecc: f64,  // eccentricity
    pub cus: f64,  // sine harmonic correction to argument of latitude
    pub sqrt_a: f64,
    pub a: f64, // semi major axis
    pub toe: u32, // reference time ephemeris
    pub fit: u32, // fit interval flag

    // Subframe 3
    pub iode3: u32,
    pub cic: f64, // cosine harmonic correction to inclination
    pub omg0: f64, // longitude of ascending node at weekly epoch
    pub cis: f64, // sine harmonic correction to inclination
    pub i0: f64,  // inclination at reference time
    pub crc: f64, // cosine harmonic correction to orbit radius
    pub omg: f64, // argument of perigee
    pub omg_dot: f64, // rate of right ascension
    pub i_dot: f64, // rate of inclination

    // Subframe 4 page 18: broadcast ionospheric model
    pub alpha: [f64; 4],
    pub beta: [f64; 4],

    have: [bool; 3],
}

impl Ephemeris {
    // `buf` holds the 300 parity-checked subframe bits packed MSB first.
    // Returns the subframe id.
    pub fn subframe(&mut self, sv: usize, buf: &[u8]) -> u32 {
        let id = getbitu(buf, 49, 3);
        self.tow = getbitu(buf, 30, 17);
        self.tlm = getbitu(buf, 8, 14);

        match id {
            1 => self.subframe1(sv, buf),
            2 => self.subframe2(sv, buf),
            3 => self.subframe3(sv, buf),
            4 => self.subframe4(sv, buf),
            5 => {}
            _ => log::warn!("prn {}: invalid subframe id={id}", sv + 1),
        }
        id
    }

    fn subframe1(&mut self, sv: usize, buf: &[u8]) {
        self.week = getbitu(buf, 60, 10) + 2048;
        self.code = getbitu(buf, 70, 2);
        self.sva = getbitu(buf, 72, 4);
        self.svh = getbitu(buf, 76, 6);
        self.iodc = getbitu2(buf, 82, 2, 210, 8);
        self.flag = getbitu(buf, 90, 1);
        self.tgd = getbits(buf, 196, 8) as f64 * P2_31;
        self.toc = getbitu(buf, 218, 16) * 16;
        self.f2 = getbits(buf, 240, 8) as f64 * P2_55;
        self.f1 = getbits(buf, 248, 16) as f64 * P2_43;
        self.f0 = getbits(buf, 270, 22) as f64 * P2_31;
        self.have[0] = true;

        log::warn!(
            "prn {}: {} tow={} week={} svh={} iodc={} tgd={:+e} toc={} a0={:+e} a1={:+e} a2={:+e}",
            sv + 1,
            "subframe-1".blue(),
            self.tow,
            self.week,
            self.svh,
            self.iodc,
            self.tgd,
            self.toc,
            self.f0,
            self.f1,
            self.f2
        );
    }

    fn subframe2(&mut self, sv: usize, buf: &[u8]) {
        self.iode2 = getbitu(buf, 60, 8);
        self.crs = getbits(buf, 68, 16) as f64 * P2_5;
        self.deln = getbits(buf, 90, 16) as f64 * P2_43 * SC2RAD;
        self.m0 = getbits2(buf, 106, 8, 120, 24) as f64 * P2_31 * SC2RAD;
        self.cuc = getbits(buf, 150, 16) as f64 * P2_29;
        self.ecc = getbitu2(buf, 166, 8, 180, 24) as f64 * P2_33;
        self.cus = getbits(buf, 210, 16) as f64 * P2_29;
        self.sqrt_a = getbitu2(buf, 226, 8, 240, 24) as f64 * P2_19;
        self.toe = getbitu(buf, 270, 16) * 16;
        self.fit = getbitu(buf, 286, 1);
        self.a = self.sqrt_a * self.sqrt_a;
        self.have[1] = true;

        log::warn!(
            "prn {}: {} tow={} iode={} a={:.1} ecc={:.6} m0={:.6} toe={}",
            sv + 1,
            "subframe-2".blue(),
            self.tow,
            self.iode2,
            self.a,
            self.ecc,
            self.m0,
            self.toe,
        );
    }

    fn subframe3(&mut self, sv: usize, buf: &[u8]) {
        self.cic = getbits(buf, 60, 16) as f64 * P2_29;
        self.omg0 = getbits2(buf, 76, 8, 90, 24) as f64 * P2_31 * SC2RAD;
        self.cis = getbits(buf, 120, 16) as f64 * P2_29;
        self.i0 = getbits2(buf, 136, 8, 150, 24) as f64 * P2_31 * SC2RAD;
        self.crc = getbits(buf, 180, 16) as f64 * P2_5;
        self.omg = getbits2(buf, 196, 8, 210, 24) as f64 * P2_31 * SC2RAD;
        self.omg_dot = getbits(buf, 240, 24) as f64 * P2_43 * SC2RAD;
        self.iode3 = getbitu(buf, 270, 8);
        self.i_dot = getbits(buf, 278, 14) as f64 * P2_43 * SC2RAD;
        self.have[2] = true;

        log::warn!(
            "prn {}: {} tow={} iode={} omg={:.6} omg0={:.6} i0={:.6}",
            sv + 1,
            "subframe-3".blue(),
            self.tow,
            self.iode3,
            self.omg,
            self.omg0,
            self.i0,
        );
    }

    fn subframe4(&mut self, sv: usize, buf: &[u8]) {
        let data_id = getbitu(buf, 60, 2);
        let page_id = getbitu(buf, 62, 6);

        if data_id == 1 && page_id == 56 {
            // page 18: ionospheric model and UTC parameters
            self.alpha[0] = getbits(buf, 68, 8) as f64 * P2_30;
            self.alpha[1] = getbits(buf, 76, 8) as f64 * P2_27;
            self.alpha[2] = getbits(buf, 84, 8) as f64 * P2_24;
            self.alpha[3] = getbits(buf, 92, 8) as f64 * P2_24;
            self.beta[0] = getbits(buf, 100, 8) as f64 * 2048.0;
            self.beta[1] = getbits(buf, 108, 8) as f64 * 16384.0;
            self.beta[2] = getbits(buf, 116, 8) as f64 * 65536.0;
            self.beta[3] = getbits(buf, 124, 8) as f64 * 65536.0;
        }

        log::info!(
            "prn {}: subframe-4 data_id={data_id} page={page_id} tow={}",
            sv + 1,
            self.tow
        );
    }

    // Subframes 1..3 describe the same data set.
    pub fn valid(&self) -> bool {
        self.have == [true; 3] && self.iode2 == self.iode3 && self.iode2 == (self.iodc & 0xFF)
    }

    fn time_from(t: f64, t_ref: u32) -> f64 {
        let mut dt = t - t_ref as f64;
        if dt > HALF_WEEK_SEC {
            dt -= WEEK_SEC;
        }
        if dt < -HALF_WEEK_SEC {
            dt += WEEK_SEC;
        }
        dt
    }

    fn eccentric_anomaly(&self, t_k: f64) -> f64 {
        let n0 = (MU / self.a.powi(3)).sqrt(); // computed mean motion
        let n = n0 + self.deln; // corrected mean motion
        let mk = self.m0 + n * t_k; // mean anomaly

        let mut e = mk;
        let mut e_k = f64::MAX;
        let mut n_iter = 0;
        while (e - e_k).abs() > 1e-13 && n_iter < 30 {
            e_k = e;
            e += (mk - e + self.ecc * e.sin()) / (1.0 - self.ecc * e.cos());
            n_iter += 1;
        }
        e
    }

    // SV clock offset at time t, relativistic term and group delay included.
    pub fn clock_correction(&self, t: f64) -> f64 {
        let tk = Self::time_from(t, self.toc);
        let ek = self.eccentric_anomaly(Self::time_from(t, self.toe));
        self.f0 + self.f1 * tk + self.f2 * tk * tk
            + F_REL * self.ecc * self.sqrt_a * ek.sin()
            - self.tgd
    }

    // SV antenna position in ECEF at time t, from the broadcast orbit.
    pub fn pos_ecef(&self, t: f64) -> [f64; 3] {
        let tk = Self::time_from(t, self.toe);
        let ek = self.eccentric_anomaly(tk);

        // true anomaly and argument of latitude
        let vk = ((1.0 - self.ecc * self.ecc).sqrt() * ek.sin()).atan2(ek.cos() - self.ecc);
        let phi_k = vk + self.omg;

        // second-harmonic perturbations
        let duk = self.cus * (2.0 * phi_k).sin() + self.cuc * (2.0 * phi_k).cos();
        let drk = self.crs * (2.0 * phi_k).sin() + self.crc * (2.0 * phi_k).cos();
        let dik = self.cis * (2.0 * phi_k).sin() + self.cic * (2.0 * phi_k).cos();

        let uk = phi_k + duk;
        let rk = self.a * (1.0 - self.ecc * ek.cos()) + drk;
        let ik = self.i0 + self.i_dot * tk + dik;

        let orb_x = rk * uk.cos();
        let orb_y = rk * uk.sin();

        // corrected longitude of ascending node
        let omega =
            self.omg0 + (self.omg_dot - OMEGA_E) * tk - OMEGA_E * self.toe as f64;

        [
            orb_x * omega.cos() - orb_y * ik.cos() * omega.sin(),
            orb_x * omega.sin() + orb_y * ik.cos() * omega.cos(),
            orb_y * ik.sin(),
        ]
    }
}
