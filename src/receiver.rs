use colored::Colorize;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::acquisition::{Acquirer, Detection, SNR_THRESHOLD};
use crate::cacode;
use crate::channel::{nco_freq, Channel, ChannelUpload, UPLOAD_BYTES};
use crate::config::Config;
use crate::constants::{CPS_HZ, FFT_LEN, L1_HZ, NUM_CHANS, NUM_SATS, PI};
use crate::ephemeris::Ephemeris;
use crate::runtime::{timer_wait, yield_now, Scheduler, EVT_EXIT, EVT_POS, EVT_PRN, EVT_TIME};
use crate::sampler::{CaptureFile, BLOCK_BYTES, PACKET};
use crate::solver::{self, ClockBlock, Snapshot};
use crate::transport::{SpiBus, SpiCmd, SpiLink};

const TIMEOUT_POLLS: u32 = 80; // bail after 20 s without a clean subframe
const SOLVE_PERIOD_MS: u64 = 4000;
const GLITCH_GUARD_MS: u64 = 500;

const WEEKDAY: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

pub struct Fix {
    pub chans: usize,
    pub iters: usize,
    pub t_bias: f64,
    pub t_rx: f64,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
}

pub enum BitSource {
    Capture(CaptureFile),
    Radio,
}

// Owns every shared piece of receiver state. Tasks interleave only at
// yield points, so plain Cell/RefCell fields are safe.
pub struct Receiver<B: SpiBus> {
    pub cfg: Config,
    pub sched: Scheduler,
    pub spi: SpiLink<B>,
    chans: Vec<RefCell<Channel>>,
    ephemeris: RefCell<Vec<Ephemeris>>,
    sat_busy: RefCell<[bool; NUM_SATS]>, // SVs already owned by a channel
    busy_mask: Cell<u32>,                // hardware loop enables, one bit per channel
    source: RefCell<BitSource>,
    pub last_fix: RefCell<Option<Fix>>,
}

fn gain_word(ki: i32, kp: i32) -> u32 {
    (ki + ((kp - ki) << 16)) as u32
}

impl<B: SpiBus + 'static> Receiver<B> {
    pub fn new(cfg: Config, bus: B, source: BitSource, sched: Scheduler) -> Rc<Self> {
        Rc::new(Self {
            cfg,
            sched,
            spi: SpiLink::new(bus),
            chans: (0..NUM_CHANS)
                .map(|ch| RefCell::new(Channel::new(ch, cfg.fs, cfg.fc)))
                .collect(),
            ephemeris: RefCell::new(vec![Ephemeris::default(); NUM_SATS]),
            sat_busy: RefCell::new([false; NUM_SATS]),
            busy_mask: Cell::new(0),
            source: RefCell::new(source),
            last_fix: RefCell::new(None),
        })
    }

    // Spawn the whole task set and run until EVT_EXIT.
    pub fn start(self: &Rc<Self>, exit_req: Arc<AtomicBool>) {
        let rcv = self.clone();
        self.sched.spawn(async move {
            // put the TCVCXO bang on 10.000000 MHz
            rcv.spi.set(SpiCmd::SetDAC, 2560, 0).await;
        });
        let rcv = self.clone();
        self.sched.spawn(async move { rcv.search_task().await });
        for ch in 0..NUM_CHANS {
            let rcv = self.clone();
            self.sched.spawn(async move { rcv.chan_task(ch).await });
        }
        let rcv = self.clone();
        self.sched.spawn(async move { rcv.solve_task().await });
        let rcv = self.clone();
        self.sched.spawn(async move { rcv.control_task(exit_req).await });
        self.sched.run();
    }

    // One FFT window of packed 1-bit samples, from the capture or by
    // triggering the hardware sampler.
    async fn sample_block(&self) -> Option<Vec<u8>> {
        {
            let mut src = self.source.borrow_mut();
            if let BitSource::Capture(file) = &mut *src {
                let mut buf = vec![0u8; BLOCK_BYTES];
                return match file.read_block(&mut buf) {
                    Ok(true) => Some(buf),
                    _ => None, // capture exhausted
                };
            }
        }

        // Trigger the sampler (this also resets the hardware code
        // generator), wait out the sample window, then drain it.
        self.spi.set(SpiCmd::Sample, 0, 0).await;
        timer_wait((1000.0 * FFT_LEN as f64 / self.cfg.fs) as u64).await;

        let mut block = Vec::with_capacity(BLOCK_BYTES + PACKET);
        while block.len() < BLOCK_BYTES {
            let pkt = self.spi.get(SpiCmd::GetSamples, 0, PACKET).await;
            block.extend_from_slice(&pkt);
        }
        block.truncate(BLOCK_BYTES);
        Some(block)
    }

    // Pick an idle channel and program its hardware defaults.
    async fn chan_reset(&self) -> Option<usize> {
        let ch = (0..NUM_CHANS).find(|&ch| self.busy_mask.get() & (1 << ch) == 0)?;

        let ca_rate = (CPS_HZ / self.cfg.fs * 2f64.powi(32)) as u32;
        self.spi.set(SpiCmd::SetRateCA, ch as u16, ca_rate).await;
        self.spi
            .set(SpiCmd::SetGainCA, ch as u16, gain_word(20 - 9, 27 - 4))
            .await;
        self.set_gain_adj(ch, 0).await;

        self.chans[ch].borrow_mut().reset();
        Some(ch)
    }

    async fn set_gain_adj(&self, ch: usize, adj: i32) {
        self.spi
            .set(SpiCmd::SetGainLO, ch as u16, gain_word(20 + adj, 27 + adj))
            .await;
    }

    // Hand a detected SV over to a hardware channel.
    async fn chan_start(&self, ch: usize, sv: usize, t_sample: Instant, det: &Detection) {
        self.chans[ch].borrow_mut().sv = sv;

        // Doppler estimate from the FFT bin shift
        let lo_dop = det.lo_shift as f64 * self.cfg.fs / FFT_LEN as f64;
        let ca_dop = lo_dop / L1_HZ * CPS_HZ;

        let lo_rate = ((self.cfg.fc + lo_dop) / self.cfg.fs * 2f64.powi(32)) as u32;
        let ca_rate = ((CPS_HZ + ca_dop) / self.cfg.fs * 2f64.powi(32)) as u32;
        self.spi.set(SpiCmd::SetRateLO, ch as u16, lo_rate).await;
        self.spi.set(SpiCmd::SetRateCA, ch as u16, ca_rate).await;

        // Code creep due to code-rate Doppler since the sample was taken
        let secs = t_sample.elapsed().as_secs_f64();
        let ca_shift =
            det.ca_shift as i64 + (ca_dop * secs * self.cfg.fs / CPS_HZ).round() as i64;

        // Align the code generator by pausing its NCO
        let ca_pause = (20000 - ca_shift).rem_euclid(10000) as u32;
        if ca_pause != 0 {
            self.spi.set(SpiCmd::Pause, ch as u16, ca_pause - 1).await;
        }

        self.spi
            .set(SpiCmd::SetSV, ch as u16, cacode::taps_word(sv) as u32)
            .await;

        // Loop phase errors are garbage for the first epochs; let them
        // settle before enabling the embedded PI controllers.
        timer_wait(3).await;
        self.busy_mask.set(self.busy_mask.get() | 1 << ch);
        self.spi
            .set(SpiCmd::SetMask, self.busy_mask.get() as u16, 0)
            .await;

        log::warn!(
            "{}",
            format!(
                "chan {ch} prn {:2} snr {:.1} dopp {:5.0} ca_shift {}",
                sv + 1,
                det.snr,
                lo_dop,
                det.ca_shift
            )
            .green()
        );
    }

    async fn search_task(self: Rc<Self>) {
        let mut acq = Acquirer::new(self.cfg.fs, self.cfg.max_doppler_hz);
        while !self.sched.shutting_down() {
            for sv in 0..NUM_SATS {
                if self.sched.shutting_down() {
                    return;
                }
                if self.sat_busy.borrow()[sv] {
                    continue;
                }

                let ch = loop {
                    if self.sched.shutting_down() {
                        return;
                    }
                    match self.chan_reset().await {
                        Some(ch) => break ch,
                        None => yield_now().await, // all channels busy
                    }
                };

                let t_sample = Instant::now();
                let Some(block) = self.sample_block().await else {
                    self.sched.raise(EVT_EXIT);
                    return;
                };
                acq.load_bits(&block, self.cfg.fc, self.cfg.lut);

                let Some(det) = acq.correlate(sv).await else {
                    continue;
                };
                self.sched.raise(EVT_PRN);
                log::debug!(
                    "prn {:2} snr {:5.1} lo_shift {:3} ca_shift {:5}",
                    sv + 1,
                    det.snr,
                    det.lo_shift,
                    det.ca_shift
                );
                if det.snr < SNR_THRESHOLD {
                    continue;
                }

                self.sat_busy.borrow_mut()[sv] = true;
                self.chan_start(ch, sv, t_sample, &det).await;
            }
            yield_now().await;
        }
    }

    async fn chan_task(self: Rc<Self>, ch: usize) {
        let bit = 1u32 << ch;
        while !self.sched.shutting_down() {
            if self.busy_mask.get() & bit != 0 {
                self.service(ch).await; // returns after loss of signal
            }
            yield_now().await;
        }
    }

    async fn service(&self, ch: usize) {
        let sv = self.chans[ch].borrow().sv;
        log::info!("chan {ch} prn {:2} enter", sv + 1);
        self.aiding(ch).await;
        self.tracking(ch).await;
        self.signal_lost(ch).await;
        log::info!("chan {ch} prn {:2} leave", sv + 1);
    }

    // The code loop always locks, but the carrier sometimes falls outside
    // the Costas capture range: the FFT bin is wider than the loop
    // bandwidth. Measure Doppler off the converged code NCO and re-aim the
    // carrier NCO.
    async fn aiding(&self, ch: usize) {
        timer_wait(5000).await;
        self.upload_state(ch).await;

        let ca_dop = {
            let c = self.chans[ch].borrow();
            nco_freq(&c.ul.ca_freq, self.cfg.fs) - CPS_HZ
        };
        let lo_rate =
            ((self.cfg.fc + ca_dop * L1_HZ / CPS_HZ) / self.cfg.fs * 2f64.powi(32)) as u32;
        self.spi.set(SpiCmd::SetRateLO, ch as u16, lo_rate).await;
    }

    async fn upload_state(&self, ch: usize) {
        let raw = self.spi.get(SpiCmd::GetChan, ch as u16, UPLOAD_BYTES).await;
        self.chans[ch].borrow_mut().ul = ChannelUpload::parse(&raw);
    }

    async fn tracking(&self, ch: usize) {
        let mut watchdog = 0;
        while watchdog < TIMEOUT_POLLS && !self.sched.shutting_down() {
            watchdog += 1;
            timer_wait(self.cfg.polling_ms).await;
            self.upload_state(ch).await;

            let adj = {
                let mut c = self.chans[ch].borrow_mut();
                let mut eph = self.ephemeris.borrow_mut();
                c.drain_bits();
                let sv = c.sv;
                if c.frames(&mut eph[sv]) {
                    watchdog = 0;
                }
                c.check_power()
            };
            if let Some(adj) = adj {
                self.set_gain_adj(ch, adj).await;
            }
        }
    }

    async fn signal_lost(&self, ch: usize) {
        // disable the embedded PI controllers
        self.busy_mask.set(self.busy_mask.get() & !(1 << ch));
        self.spi
            .set(SpiCmd::SetMask, self.busy_mask.get() as u16, 0)
            .await;

        // re-enable search for this SV
        let sv = self.chans[ch].borrow().sv;
        self.sat_busy.borrow_mut()[sv] = false;
        log::warn!("{}", format!("chan {ch} prn {:2} lost", sv + 1).red());
    }

    // Consistent snapshot of all channel clocks. Runs inside the SPI hog:
    // nothing else can touch channel or ephemeris state until it returns.
    fn load_atomic(&self, raw: &[u8]) -> Vec<Snapshot> {
        let clocks = ClockBlock::parse(raw);
        let eph = self.ephemeris.borrow();
        let mut reps = vec![];

        for ch in 0..NUM_CHANS {
            if self.busy_mask.get() & (1 << ch) == 0 {
                continue;
            }
            let mut ms = clocks.up[ch][0] as u32;
            if clocks.srq >> ch & 1 == 1 {
                ms += 1; // un-serviced epoch
            }
            let c = self.chans[ch].borrow();
            let Some((sv, bits, pwr)) = c.get_snapshot(clocks.up[ch][1]) else {
                continue;
            };
            if !eph[sv].valid() {
                continue;
            }
            reps.push(Snapshot {
                eph: eph[sv],
                power: pwr as f64,
                ch,
                sv,
                ms,
                bits: bits as u32,
                g1: clocks.dn[ch][0] & 0x3FF,
                ca_phase: clocks.dn[ch][0] >> 10,
            });
        }
        reps
    }

    async fn load_replicas(&self) -> Vec<Snapshot> {
        let glitch = |raw: &[u8], ch: usize| u16::from_le_bytes([raw[2 * ch], raw[2 * ch + 1]]);

        // glitch counters before and after bracket the snapshot
        let before = self.spi.get(SpiCmd::GetGlitches, 0, NUM_CHANS * 2).await;
        timer_wait(GLITCH_GUARD_MS).await;

        let reps = self
            .spi
            .hog(SpiCmd::GetClocks, solver::CLOCK_BYTES, |raw| {
                self.load_atomic(raw)
            })
            .await;

        timer_wait(GLITCH_GUARD_MS).await;
        let after = self.spi.get(SpiCmd::GetGlitches, 0, NUM_CHANS * 2).await;

        // strip channels that glitched around the snapshot
        reps.into_iter()
            .filter(|r| glitch(&before, r.ch) == glitch(&after, r.ch))
            .collect()
    }

    async fn solve_task(self: Rc<Self>) {
        while !self.sched.shutting_down() {
            timer_wait(SOLVE_PERIOD_MS).await;

            let reps = self.load_replicas().await;
            if reps.len() < 4 {
                continue;
            }

            let meas: Vec<_> = reps.iter().filter_map(|r| r.measurement()).collect();
            if meas.len() < 4 {
                continue;
            }

            let Some(sol) = solver::solve(&meas).await else {
                continue; // no fix this cycle
            };
            let (lat, lon, alt) = solver::lat_lon_alt(sol.x, sol.y, sol.z);

            log::warn!(
                "{}",
                format!(
                    "fix: {} chans, {} iters, lat {:.5} lon {:.5} alt {:.1}",
                    meas.len(),
                    sol.iters,
                    lat * 180.0 / PI,
                    lon * 180.0 / PI,
                    alt
                )
                .green()
            );
            *self.last_fix.borrow_mut() = Some(Fix {
                chans: meas.len(),
                iters: sol.iters,
                t_bias: sol.t_bias,
                t_rx: sol.t_rx,
                lat_deg: lat * 180.0 / PI,
                lon_deg: lon * 180.0 / PI,
                alt_m: alt,
            });
            self.sched.raise(EVT_POS | EVT_TIME);
        }
    }

    // Event dispatch: fixes to stdout, exit request to the scheduler.
    async fn control_task(self: Rc<Self>, exit_req: Arc<AtomicBool>) {
        loop {
            if exit_req.load(Ordering::SeqCst) {
                self.sched.raise(EVT_EXIT);
            }
            if self.sched.catch(EVT_EXIT) != 0 {
                log::info!("exit requested");
                self.sched.request_shutdown();
                return;
            }
            if self.sched.catch(EVT_POS) != 0 {
                if let Some(fix) = self.last_fix.borrow().as_ref() {
                    println!(
                        "{},{},{:.6},{:.5},{:.5},{:.2}",
                        fix.chans, fix.iters, fix.t_bias, fix.lat_deg, fix.lon_deg, fix.alt_m
                    );
                }
            }
            if self.sched.catch(EVT_TIME) != 0 {
                if let Some(fix) = self.last_fix.borrow().as_ref() {
                    let day = (fix.t_rx / 86400.0) as usize;
                    let secs = fix.t_rx - 86400.0 * day as f64;
                    let h = (secs / 3600.0) as u32;
                    let m = (secs / 60.0) as u32 % 60;
                    let s = secs % 60.0;
                    log::info!("{} {h:02}:{m:02}:{s:02.0}", WEEKDAY[day % 7]);
                }
            }
            timer_wait(100).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{encode_words, set_bits, test_subframe};
    use crate::runtime::block_on;
    use crate::transport::StubBus;

    fn test_cfg() -> Config {
        Config {
            polling_ms: 1,
            ..Config::default()
        }
    }

    // Encode subframes back to back, forcing the trailing parity bits of
    // each to zero so every preamble arrives upright.
    fn encode_stream(frames: &[Vec<[u8; 24]>]) -> Vec<u8> {
        let mut out = vec![];
        let (mut d29, mut d30) = (0u8, 0u8);
        for frame in frames {
            for (w, data) in frame.iter().enumerate() {
                let mut data = *data;
                if w == 9 {
                    for t in 0..4u8 {
                        data[22] = t >> 1;
                        data[23] = t & 1;
                        let (_, n29, n30) = encode_words(&[data], d29, d30);
                        if n29 == 0 && n30 == 0 {
                            break;
                        }
                    }
                }
                let (bits, n29, n30) = encode_words(&[data], d29, d30);
                out.extend_from_slice(&bits);
                d29 = n29;
                d30 = n30;
            }
        }
        out
    }

    // Subframes 1..3 of one consistent data set (IODC mod 256 == IODE).
    fn ephemeris_frames(iode: u64) -> Vec<Vec<[u8; 24]>> {
        let mut sf1 = test_subframe(1000, 1);
        set_bits(&mut sf1[2], 22, 2, 0);
        set_bits(&mut sf1[7], 0, 8, iode);
        let mut sf2 = test_subframe(1001, 2);
        set_bits(&mut sf2[2], 0, 8, iode);
        let mut sf3 = test_subframe(1002, 3);
        set_bits(&mut sf3[9], 0, 8, iode);
        vec![sf1, sf2, sf3]
    }

    fn stream_words(bits: &[u8]) -> Vec<u16> {
        bits.chunks(16)
            .map(|c| {
                let mut w = 0u16;
                for (i, &b) in c.iter().enumerate() {
                    w |= (b as u16) << (15 - i);
                }
                w
            })
            .collect()
    }

    fn script_uploads(bus: &mut StubBus, words: &[u16]) {
        // 48 bits per poll through the 4-word circular buffer
        let polls = words.len().div_ceil(3);
        for k in 0..polls {
            let wr_word = usize::min(3 * (k + 1), words.len());
            let mut nav_buf = [0u16; 4];
            for w in wr_word.saturating_sub(4)..wr_word {
                nav_buf[w % 4] = words[w];
            }
            let ul = ChannelUpload {
                nav_ms: 5,
                nav_bits: (wr_word * 16) as u16,
                nav_buf,
                iq: [800, 0],
                ..Default::default()
            };
            bus.push_reply(SpiCmd::GetChan, ul.to_bytes());
        }
    }

    #[test]
    fn tracking_decodes_scripted_stream() {
        let sched = Scheduler::new();
        let mut bus = StubBus::new();

        let mut bits = encode_stream(&ephemeris_frames(0x57));
        assert_eq!(bits.len(), 900);
        bits.resize(912, 0); // pad to whole buffer words
        script_uploads(&mut bus, &stream_words(&bits));

        let rcv = Receiver::new(test_cfg(), bus, BitSource::Radio, sched);
        rcv.busy_mask.set(1);
        rcv.chans[0].borrow_mut().sv = 3;

        block_on(rcv.tracking(0));

        let eph = rcv.ephemeris.borrow();
        assert!(eph[3].valid());
        assert_eq!(eph[3].tow, 1002);
        assert!(!rcv.chans[0].borrow().on_probation()); // two clean subframes seen
    }

    #[test]
    fn load_replicas_applies_probation_and_glitch_filters() {
        let sched = Scheduler::new();
        let mut bus = StubBus::new();

        let mut bits = encode_stream(&ephemeris_frames(0x21));
        bits.resize(912, 0);
        script_uploads(&mut bus, &stream_words(&bits));

        let rcv = Receiver::new(test_cfg(), bus, BitSource::Radio, sched);
        rcv.busy_mask.set(1);
        rcv.chans[0].borrow_mut().sv = 7;
        block_on(rcv.tracking(0));
        assert!(rcv.ephemeris.borrow()[7].valid());

        // after the scripted stream the read cursor has wrapped to 0 and
        // 60 bits sit in the holding buffer
        let mut clocks = vec![0u8; solver::CLOCK_BYTES];
        let put = |raw: &mut [u8], i: usize, v: u16| {
            raw[2 * i..2 * i + 2].copy_from_slice(&v.to_le_bytes())
        };
        put(&mut clocks, 0, 1); // service request pending on ch 0
        put(&mut clocks, 1, 5); // ms
        put(&mut clocks, 2, 16); // 16 bits still in hardware
        let dn0 = 1 + 3 * NUM_CHANS + 3 * (NUM_CHANS - 1);
        put(&mut clocks, dn0, (9 << 10) | 0x3FF);

        // clean pass: glitch counters match
        {
            let mut b = rcv.spi.bus();
            b.push_reply(SpiCmd::GetGlitches, vec![0; NUM_CHANS * 2]);
            b.push_reply(SpiCmd::GetClocks, clocks.clone());
            b.push_reply(SpiCmd::GetGlitches, vec![0; NUM_CHANS * 2]);
        }
        let reps = block_on(rcv.load_replicas());
        assert_eq!(reps.len(), 1);
        let r = &reps[0];
        assert_eq!(r.sv, 7);
        assert_eq!(r.ms, 6); // 5 + 1 for the un-serviced epoch
        assert_eq!(r.bits, 60 + 16); // held locally + still remote
        assert_eq!(r.g1, 0x3FF);
        assert_eq!(r.ca_phase, 9);

        // glitched pass: counters moved, channel dropped
        {
            let mut b = rcv.spi.bus();
            b.push_reply(SpiCmd::GetGlitches, vec![0; NUM_CHANS * 2]);
            b.push_reply(SpiCmd::GetClocks, clocks.clone());
            let mut after = vec![0; NUM_CHANS * 2];
            after[0] = 3;
            b.push_reply(SpiCmd::GetGlitches, after);
        }
        let reps = block_on(rcv.load_replicas());
        assert!(reps.is_empty());
    }

    #[test]
    fn chan_start_programs_hardware() {
        let sched = Scheduler::new();
        let rcv = Receiver::new(test_cfg(), StubBus::new(), BitSource::Radio, sched);

        let ch = block_on(rcv.chan_reset()).unwrap();
        assert_eq!(ch, 0);
        let det = Detection {
            snr: 30.0,
            lo_shift: 6,
            ca_shift: 4321,
        };
        block_on(rcv.chan_start(ch, 14, Instant::now(), &det));

        assert_eq!(rcv.busy_mask.get(), 1);
        let bus = rcv.spi.bus();
        let find = |cmd: SpiCmd| {
            bus.log
                .iter()
                .find(|&&(c, _, _)| c == cmd)
                .map(|&(_, w, l)| (w, l))
                .unwrap()
        };
        // reset defaults
        assert_eq!(find(SpiCmd::SetGainCA).1, gain_word(11, 23));
        assert_eq!(find(SpiCmd::SetGainLO).1, gain_word(20, 27));
        // code generator alignment and taps for PRN 15
        assert_eq!(find(SpiCmd::Pause).1, ((20000 - 4321) % 10000 - 1) as u32);
        assert_eq!(find(SpiCmd::SetSV).1, ((8 << 4) + 9) as u32);
        // carrier NCO re-programmed for +1500 Hz Doppler
        let lo_rate = find(SpiCmd::SetRateLO).1;
        let expect = ((2.6e6 + 1500.0) / 10e6 * 2f64.powi(32)) as u32;
        assert_eq!(lo_rate, expect);
        // hardware loop mask mirrors the busy mask
        assert_eq!(find(SpiCmd::SetMask).0, 1);
    }

    #[test]
    fn radio_sample_block_drains_packets() {
        let sched = Scheduler::new();
        let rcv = Receiver::new(test_cfg(), StubBus::new(), BitSource::Radio, sched);
        let block = block_on(rcv.sample_block()).unwrap();
        assert_eq!(block.len(), BLOCK_BYTES);

        let bus = rcv.spi.bus();
        assert_eq!(bus.log[0].0, SpiCmd::Sample);
        let gets = bus.log.iter().filter(|&&(c, _, _)| c == SpiCmd::GetSamples).count();
        assert_eq!(gets, BLOCK_BYTES.div_ceil(PACKET));
    }
}
