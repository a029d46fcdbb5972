use std::cell::{Cell, RefCell, RefMut};
use std::collections::{HashMap, VecDeque};

use crate::runtime::yield_now;

// Embedded CPU not yet done with the previous request; retry.
pub const BUSY: u8 = 0x90;

pub const MOSI_LEN: usize = 9;
pub const MISO_MAX: usize = 2048;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(u16)]
pub enum SpiCmd {
    Sample = 0,
    SetMask,
    SetRateCA,
    SetRateLO,
    SetGainCA,
    SetGainLO,
    SetSV,
    Pause,
    SetVCO,
    GetSamples,
    GetChan,
    GetClocks,
    GetGlitches,
    SetDAC,
    SetLCD,
    GetJoy,
}

impl SpiCmd {
    pub fn from_u16(v: u16) -> Option<Self> {
        use SpiCmd::*;
        Some(match v {
            0 => Sample,
            1 => SetMask,
            2 => SetRateCA,
            3 => SetRateLO,
            4 => SetGainCA,
            5 => SetGainLO,
            6 => SetSV,
            7 => Pause,
            8 => SetVCO,
            9 => GetSamples,
            10 => GetChan,
            11 => GetClocks,
            12 => GetGlitches,
            13 => SetDAC,
            14 => SetLCD,
            15 => GetJoy,
            _ => return None,
        })
    }
}

// Command frame: u16 cmd, u16 wparam, u32 lparam, one pad byte.
pub fn encode_mosi(cmd: SpiCmd, wparam: u16, lparam: u32) -> [u8; MOSI_LEN] {
    let mut msg = [0u8; MOSI_LEN];
    msg[0..2].copy_from_slice(&(cmd as u16).to_le_bytes());
    msg[2..4].copy_from_slice(&wparam.to_le_bytes());
    msg[4..8].copy_from_slice(&lparam.to_le_bytes());
    msg
}

// Raw byte channel to the front end. Implementations: the SPI peripheral
// on real hardware, or a scripted stub when there is none.
pub trait SpiBus {
    fn transfer(&mut self, mosi: &[u8], miso: &mut [u8]);
}

// Command-level access with "first come, first served" arbitration: each
// caller takes a ticket and yields until it is served, so requests complete
// in the order they were issued even when tasks interleave.
pub struct SpiLink<B: SpiBus> {
    bus: RefCell<B>,
    next_ticket: Cell<u64>,
    served: Cell<u64>,
}

struct Turn<'a> {
    served: &'a Cell<u64>,
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        self.served.set(self.served.get() + 1);
    }
}

impl<B: SpiBus> SpiLink<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus: RefCell::new(bus),
            next_ticket: Cell::new(0),
            served: Cell::new(0),
        }
    }

    pub fn bus(&self) -> RefMut<'_, B> {
        self.bus.borrow_mut()
    }

    async fn enter(&self) -> Turn<'_> {
        let ticket = self.next_ticket.get();
        self.next_ticket.set(ticket + 1);
        while self.served.get() < ticket {
            yield_now().await;
        }
        Turn {
            served: &self.served,
        }
    }

    fn exchange(&self, cmd: SpiCmd, wparam: u16, lparam: u32, rxlen: usize) -> (u8, Vec<u8>) {
        let mosi = encode_mosi(cmd, wparam, lparam);
        let mut miso = vec![0u8; 1 + rxlen];
        self.bus.borrow_mut().transfer(&mosi, &mut miso);
        let status = miso[0];
        miso.remove(0);
        (status, miso)
    }

    pub async fn set(&self, cmd: SpiCmd, wparam: u16, lparam: u32) {
        let _turn = self.enter().await;
        loop {
            let (status, _) = self.exchange(cmd, wparam, lparam, 0);
            if status != BUSY {
                return;
            }
            yield_now().await;
        }
    }

    pub async fn get(&self, cmd: SpiCmd, wparam: u16, rxlen: usize) -> Vec<u8> {
        let _turn = self.enter().await;
        loop {
            let (status, body) = self.exchange(cmd, wparam, 0, rxlen);
            if status != BUSY {
                return body;
            }
            yield_now().await;
        }
    }

    // Atomic exchange: `collect` runs on the response before the turn is
    // released and cannot yield, so no other task observes or changes
    // shared state in between.
    pub async fn hog<R>(
        &self,
        cmd: SpiCmd,
        rxlen: usize,
        collect: impl FnOnce(&[u8]) -> R,
    ) -> R {
        let _turn = self.enter().await;
        let body = loop {
            let (status, body) = self.exchange(cmd, 0, 0, rxlen);
            if status != BUSY {
                break body;
            }
            yield_now().await;
        };
        collect(&body)
    }
}

// Stand-in for the hardware link: replays scripted responses and records
// every accepted command. Doubles as the no-hardware driver.
#[derive(Default)]
pub struct StubBus {
    pub log: Vec<(SpiCmd, u16, u32)>,
    replies: HashMap<u16, VecDeque<Vec<u8>>>,
    busy_streak: u32,
}

impl StubBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&mut self, cmd: SpiCmd, body: Vec<u8>) {
        self.replies.entry(cmd as u16).or_default().push_back(body);
    }

    pub fn set_busy_streak(&mut self, n: u32) {
        self.busy_streak = n;
    }
}

impl SpiBus for StubBus {
    fn transfer(&mut self, mosi: &[u8], miso: &mut [u8]) {
        if self.busy_streak > 0 {
            self.busy_streak -= 1;
            miso[0] = BUSY;
            return;
        }
        miso[0] = 0;

        let cmd = u16::from_le_bytes([mosi[0], mosi[1]]);
        let wparam = u16::from_le_bytes([mosi[2], mosi[3]]);
        let lparam = u32::from_le_bytes([mosi[4], mosi[5], mosi[6], mosi[7]]);
        if let Some(cmd) = SpiCmd::from_u16(cmd) {
            self.log.push((cmd, wparam, lparam));
        }

        if let Some(q) = self.replies.get_mut(&cmd) {
            if let Some(body) = q.pop_front() {
                let n = usize::min(body.len(), miso.len() - 1);
                miso[1..1 + n].copy_from_slice(&body[..n]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{block_on, Scheduler};
    use std::rc::Rc;

    #[test]
    fn mosi_frame_layout() {
        let msg = encode_mosi(SpiCmd::SetRateCA, 0x1234, 0xDEADBEEF);
        assert_eq!(msg[0..2], [2, 0]);
        assert_eq!(msg[2..4], [0x34, 0x12]);
        assert_eq!(msg[4..8], [0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(msg[8], 0);
    }

    #[test]
    fn busy_is_retried() {
        let mut bus = StubBus::new();
        bus.set_busy_streak(3);
        bus.push_reply(SpiCmd::GetJoy, vec![0x55]);
        let link = SpiLink::new(bus);
        let body = block_on(link.get(SpiCmd::GetJoy, 0, 1));
        assert_eq!(body, vec![0x55]);
        // only the accepted transfer is logged
        assert_eq!(link.bus().log.len(), 1);
    }

    #[test]
    fn requests_complete_first_come_first_served() {
        let sched = Scheduler::new();
        let mut bus = StubBus::new();
        bus.set_busy_streak(2); // first caller has to retry while holding its turn
        let link = Rc::new(SpiLink::new(bus));

        for ch in 0..3u16 {
            let link = link.clone();
            sched.spawn(async move {
                link.set(SpiCmd::SetMask, ch, 0).await;
            });
        }
        sched.run();

        let order: Vec<u16> = link.bus().log.iter().map(|&(_, w, _)| w).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn hog_excludes_other_commands() {
        let sched = Scheduler::new();
        let mut bus = StubBus::new();
        bus.push_reply(SpiCmd::GetClocks, vec![7; 4]);
        let link = Rc::new(SpiLink::new(bus));

        let seen = Rc::new(Cell::new(0usize));
        {
            let link = link.clone();
            let seen = seen.clone();
            sched.spawn(async move {
                link.hog(SpiCmd::GetClocks, 4, |body| {
                    assert_eq!(body, [7; 4]);
                    // commands logged so far: ours only
                    seen.set(link.bus().log.len());
                })
                .await;
            });
        }
        {
            let link = link.clone();
            sched.spawn(async move {
                link.set(SpiCmd::SetDAC, 0, 2560).await;
            });
        }
        sched.run();
        assert_eq!(seen.get(), 1);
        assert_eq!(link.bus().log.len(), 2);
    }
}
