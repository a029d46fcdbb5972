use crate::constants::{CA_CODE_LEN, NUM_SATS};

pub struct Satellite {
    pub prn: u8,
    pub t1: usize,
    pub t2: usize,
}

// Canonical IS-GPS-200 PRN -> G2 tap assignments, indexed by sv = prn - 1.
pub const SATS: [Satellite; NUM_SATS] = [
    Satellite { prn: 1, t1: 2, t2: 6 },
    Satellite { prn: 2, t1: 3, t2: 7 },
    Satellite { prn: 3, t1: 4, t2: 8 },
    Satellite { prn: 4, t1: 5, t2: 9 },
    Satellite { prn: 5, t1: 1, t2: 9 },
    Satellite { prn: 6, t1: 2, t2: 10 },
    Satellite { prn: 7, t1: 1, t2: 8 },
    Satellite { prn: 8, t1: 2, t2: 9 },
    Satellite { prn: 9, t1: 3, t2: 10 },
    Satellite { prn: 10, t1: 2, t2: 3 },
    Satellite { prn: 11, t1: 3, t2: 4 },
    Satellite { prn: 12, t1: 5, t2: 6 },
    Satellite { prn: 13, t1: 6, t2: 7 },
    Satellite { prn: 14, t1: 7, t2: 8 },
    Satellite { prn: 15, t1: 8, t2: 9 },
    Satellite { prn: 16, t1: 9, t2: 10 },
    Satellite { prn: 17, t1: 1, t2: 4 },
    Satellite { prn: 18, t1: 2, t2: 5 },
    Satellite { prn: 19, t1: 3, t2: 6 },
    Satellite { prn: 20, t1: 4, t2: 7 },
    Satellite { prn: 21, t1: 5, t2: 8 },
    Satellite { prn: 22, t1: 6, t2: 9 },
    Satellite { prn: 23, t1: 1, t2: 3 },
    Satellite { prn: 24, t1: 4, t2: 6 },
    Satellite { prn: 25, t1: 5, t2: 7 },
    Satellite { prn: 26, t1: 6, t2: 8 },
    Satellite { prn: 27, t1: 7, t2: 9 },
    Satellite { prn: 28, t1: 8, t2: 10 },
    Satellite { prn: 29, t1: 1, t2: 6 },
    Satellite { prn: 30, t1: 2, t2: 7 },
    Satellite { prn: 31, t1: 3, t2: 8 },
    Satellite { prn: 32, t1: 4, t2: 9 },
];

// Tap pair packed for the hardware code generator command.
pub fn taps_word(sv: usize) -> u16 {
    ((SATS[sv].t1 << 4) + SATS[sv].t2) as u16
}

// C/A Gold code generator: two 10-bit LFSRs, both seeded all-ones.
// Register index 0..9 holds stages 1..10 of IS-GPS-200.
pub struct CaCode {
    g1: [u8; 10],
    g2: [u8; 10],
    t1: usize,
    t2: usize,
}

impl CaCode {
    pub fn new(t1: usize, t2: usize) -> Self {
        Self {
            g1: [1; 10],
            g2: [1; 10],
            t1,
            t2,
        }
    }

    pub fn for_sv(sv: usize) -> Self {
        Self::new(SATS[sv].t1, SATS[sv].t2)
    }

    pub fn chip(&self) -> u8 {
        self.g1[9] ^ self.g2[self.t1 - 1] ^ self.g2[self.t2 - 1]
    }

    pub fn clock(&mut self) {
        let b1 = self.g1[2] ^ self.g1[9];
        let b2 = self.g2[1] ^ self.g2[2] ^ self.g2[5] ^ self.g2[7] ^ self.g2[8] ^ self.g2[9];
        self.g1.rotate_right(1);
        self.g2.rotate_right(1);
        self.g1[0] = b1;
        self.g2[0] = b2;
    }

    // Current G1 register value, stage 1 in the LSB.
    pub fn g1_word(&self) -> u16 {
        (0..10).rev().fold(0, |acc, i| (acc << 1) | self.g1[i] as u16)
    }
}

// Chip index within the 1023-chip period at which the G1 register holds `g1`.
// Used at solve time to recover code phase from the hardware G1 snapshot.
pub fn search_code(sv: usize, g1: u16) -> Option<u32> {
    let mut ca = CaCode::for_sv(sv);
    for chips in 0..CA_CODE_LEN as u32 {
        if ca.g1_word() == g1 {
            return Some(chips);
        }
        ca.clock();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prn1_first_chips() {
        let mut ca = CaCode::for_sv(0);
        let mut chips = vec![];
        for _ in 0..10 {
            chips.push(ca.chip());
            ca.clock();
        }
        assert_eq!(chips, [1, 1, 0, 0, 1, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn period_and_balance() {
        for sv in 0..NUM_SATS {
            let mut ca = CaCode::for_sv(sv);
            let mut ones = 0u32;
            for _ in 0..CA_CODE_LEN {
                ones += ca.chip() as u32;
                ca.clock();
            }
            assert_eq!(ones, 512, "prn {}", sv + 1);
            // both registers are back at all-ones
            assert_eq!(ca.g1_word(), 0x3FF, "prn {}", sv + 1);
            let first = CaCode::for_sv(sv);
            assert_eq!(ca.chip(), first.chip());
        }
    }

    #[test]
    fn search_code_inverts_generator() {
        for sv in [0, 7, 14, 31] {
            let mut ca = CaCode::for_sv(sv);
            for k in 0..CA_CODE_LEN as u32 {
                assert_eq!(search_code(sv, ca.g1_word()), Some(k));
                ca.clock();
            }
        }
    }

    #[test]
    fn search_code_rejects_unreachable_state() {
        // G1 is a maximal-length LFSR: the all-zero state never occurs
        assert_eq!(search_code(0, 0), None);
    }
}
