use bytesize::ByteSize;
use colored::Colorize;
use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use structopt::StructOpt;

use l1ca_rcv::acquisition::{Acquirer, Detection, SNR_THRESHOLD};
use l1ca_rcv::cacode::CaCode;
use l1ca_rcv::config::Config;
use l1ca_rcv::constants::NUM_SATS;
use l1ca_rcv::receiver::{BitSource, Receiver};
use l1ca_rcv::runtime::{block_on, Scheduler};
use l1ca_rcv::sampler::{CaptureFile, BLOCK_BYTES};
use l1ca_rcv::transport::StubBus;

#[derive(StructOpt)]
#[structopt(name = "l1ca-rcv", about = "GPS L1 C/A software receiver")]
struct Options {
    #[structopt(short = "g", help = "print the first C/A chips of every PRN")]
    gen_ca_codes: bool,
    #[structopt(
        long,
        help = "run the full receiver task set instead of the offline scan"
    )]
    radio: bool,
    #[structopt(default_value = "gps.samples.1bit.I.fs5456.if4092.bin")]
    file: PathBuf,
    #[structopt(default_value = "4092000")]
    fc_hz: f64,
    #[structopt(default_value = "5456000")]
    fs_hz: f64,
    #[structopt(default_value = "5000")]
    max_fo_hz: f64,
    #[structopt(long, short = "v")]
    verbose: bool,
}

fn print_ca_codes() {
    for sv in 0..NUM_SATS {
        let mut ca = CaCode::for_sv(sv);
        let mut chips = vec![];
        for _ in 0..16 {
            chips.push(ca.chip());
            ca.clock();
        }
        println!("  code-{:02}: {:?}", sv + 1, chips);
    }
}

fn exit_flag() -> Result<Arc<AtomicBool>, Box<dyn Error>> {
    let exit_req = Arc::new(AtomicBool::new(false));
    let flag = exit_req.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;
    Ok(exit_req)
}

// Sweep the capture: one FFT window per SV, one summary per sweep.
fn scan(opt: &Options) -> Result<(), Box<dyn Error>> {
    let cfg = Config::offline(opt.fc_hz, opt.fs_hz, opt.max_fo_hz);
    let mut capture = CaptureFile::open(&opt.file)?;
    let exit_req = exit_flag()?;

    println!(
        "{} -- {} fc={} Hz fs={} Hz max_fo={} Hz",
        opt.file.display().to_string().green(),
        ByteSize::b(capture.size_bytes).display().iec().to_string().bold(),
        cfg.fc,
        cfg.fs,
        cfg.max_doppler_hz,
    );

    let mut acq = Acquirer::new(cfg.fs, cfg.max_doppler_hz);
    let mut block = vec![0u8; BLOCK_BYTES];
    let mut sweep = 0;

    'sweeps: loop {
        let mut hits: Vec<(usize, Detection)> = vec![];
        let mut snrs = [0f32; NUM_SATS];

        for sv in 0..NUM_SATS {
            if exit_req.load(Ordering::SeqCst) {
                break 'sweeps;
            }
            if !capture.read_block(&mut block)? {
                println!("run out of file");
                break 'sweeps;
            }
            acq.load_bits(&block, cfg.fc, cfg.lut);
            let Some(det) = block_on(acq.correlate(sv)) else {
                continue;
            };
            snrs[sv] = det.snr;
            if det.snr >= SNR_THRESHOLD {
                hits.push((sv, det));
            }
        }

        print!("{sweep:2} satellite: ");
        for (sv, _) in &hits {
            print!("{sv:5} ");
        }
        print!("\n{sweep:2} SNR(>=25): ");
        for (_, det) in &hits {
            print!("{:5.1} ", det.snr);
        }
        print!("\n{sweep:2}  lo_shift: ");
        for (_, det) in &hits {
            print!("{:5} ", det.lo_shift);
        }
        print!("\n{sweep:2}  ca_shift: ");
        for (_, det) in &hits {
            print!("{:5} ", det.ca_shift);
        }
        println!();
        for snr in snrs {
            print!("{snr:2.0} ");
        }
        println!("\n");
        sweep += 1;
    }
    Ok(())
}

// Full cooperative task set. Without real front-end hardware the stub
// transport answers every command with zeros, so this idles until ^C.
fn run_radio() -> Result<(), Box<dyn Error>> {
    let exit_req = exit_flag()?;
    let sched = Scheduler::new();
    let rcv = Receiver::new(
        Config::default(),
        StubBus::new(),
        BitSource::Radio,
        sched,
    );
    rcv.start(exit_req);
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Options::from_args();

    env_logger::Builder::from_default_env()
        .filter_level(if opt.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    if opt.gen_ca_codes {
        print_ca_codes();
        return Ok(());
    }
    if opt.radio {
        return run_radio();
    }
    scan(&opt)
}
