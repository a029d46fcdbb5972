use crate::constants::{FC_HZ, FS_HZ};
use crate::sampler::MixerLut;

// Startup-selectable front-end parameters. The live radio runs the
// defaults; offline captures override sample rate, IF and Doppler span.
#[derive(Clone, Copy)]
pub struct Config {
    pub fs: f64,
    pub fc: f64,
    pub max_doppler_hz: f64,
    pub lut: MixerLut,
    pub polling_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fs: FS_HZ,
            fc: FC_HZ,
            max_doppler_hz: 5000.0,
            lut: MixerLut::Radio,
            polling_ms: 250,
        }
    }
}

impl Config {
    pub fn offline(fc: f64, fs: f64, max_fo: f64) -> Self {
        Self {
            fs,
            fc,
            max_doppler_hz: max_fo,
            lut: MixerLut::Capture,
            ..Default::default()
        }
    }
}
