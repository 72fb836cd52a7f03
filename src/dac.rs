//! AD5061 write framing over a bit-banged 3-wire interface.

use anyhow::Result;

use crate::traits::TrimDac;
use crate::trim::DAC_MIDPOINT;

/// The three output lines a frame is clocked over. Firmware maps these to
/// port pins; the tests and the bench record them.
pub trait DacPins {
    fn set_cs(&mut self, high: bool);
    fn set_clk(&mut self, high: bool);
    fn set_data(&mut self, high: bool);
}

/// AD5061 behind three GPIO lines.
///
/// A frame is 24 bits with CS held low: 6 padding zeros, 2 shutdown-control
/// bits kept at 00 (the part must never power down), then the 16 data bits
/// MSB first. The part shifts DIN on the falling clock edge and slews the
/// output when CS rises. The part's minimum clock timing is far faster
/// than any caller here, so no delays are needed between transitions.
pub struct Ad5061<P: DacPins> {
    pins: P,
    last_word: u16,
}

impl<P: DacPins> Ad5061<P> {
    /// The part powers up at mid-scale, so a first command of 0x8000 is
    /// already satisfied and gets suppressed like any other repeat.
    pub fn new(pins: P) -> Self {
        Ad5061 {
            pins,
            last_word: DAC_MIDPOINT,
        }
    }

    pub fn last_word(&self) -> u16 {
        self.last_word
    }

    fn clock_bit(&mut self, bit: bool) {
        self.pins.set_data(bit);
        self.pins.set_clk(false);
        self.pins.set_clk(true);
    }
}

impl<P: DacPins> TrimDac for Ad5061<P> {
    fn write(&mut self, word: u16) -> Result<()> {
        if word == self.last_word {
            return Ok(());
        }
        self.last_word = word;

        self.pins.set_clk(true);
        self.pins.set_cs(false);
        for _ in 0..8 {
            self.clock_bit(false);
        }
        for i in (0..16).rev() {
            self.clock_bit(word >> i & 1 == 1);
        }
        self.pins.set_cs(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Edge {
        Cs(bool),
        Clk(bool),
        Data(bool),
    }

    #[derive(Default)]
    struct RecordingPins {
        edges: Rc<RefCell<Vec<Edge>>>,
    }

    impl RecordingPins {
        fn with_log() -> (Self, Rc<RefCell<Vec<Edge>>>) {
            let pins = RecordingPins::default();
            let log = pins.edges.clone();
            (pins, log)
        }
    }

    impl DacPins for RecordingPins {
        fn set_cs(&mut self, high: bool) {
            self.edges.borrow_mut().push(Edge::Cs(high));
        }
        fn set_clk(&mut self, high: bool) {
            self.edges.borrow_mut().push(Edge::Clk(high));
        }
        fn set_data(&mut self, high: bool) {
            self.edges.borrow_mut().push(Edge::Data(high));
        }
    }

    /// Replay the edge log: the data level latched at each falling clock.
    fn shifted_bits(edges: &[Edge]) -> Vec<bool> {
        let mut data = false;
        let mut bits = Vec::new();
        for &edge in edges {
            match edge {
                Edge::Data(level) => data = level,
                Edge::Clk(false) => bits.push(data),
                _ => {}
            }
        }
        bits
    }

    #[test]
    fn test_frame_shape() {
        let (pins, log) = RecordingPins::with_log();
        let mut dac = Ad5061::new(pins);
        dac.write(0xA5F0).unwrap();

        let edges = log.borrow();
        // CS falls after the idle-high clock and rises at the end.
        assert_eq!(edges[1], Edge::Cs(false));
        assert_eq!(*edges.last().unwrap(), Edge::Cs(true));

        let bits = shifted_bits(&edges);
        assert_eq!(bits.len(), 24);
        // 6 pad + 2 shutdown-control bits, all zero.
        assert!(bits[..8].iter().all(|&b| !b));
        let word = bits[8..]
            .iter()
            .fold(0u16, |acc, &b| (acc << 1) | u16::from(b));
        assert_eq!(word, 0xA5F0);
    }

    #[test]
    fn test_repeated_word_is_one_physical_write() {
        let (pins, log) = RecordingPins::with_log();
        let mut dac = Ad5061::new(pins);
        dac.write(0x9000).unwrap();
        let edges_after_first = log.borrow().len();
        dac.write(0x9000).unwrap();
        assert_eq!(log.borrow().len(), edges_after_first);
    }

    #[test]
    fn test_powerup_midscale_write_suppressed() {
        let (pins, log) = RecordingPins::with_log();
        let mut dac = Ad5061::new(pins);
        dac.write(DAC_MIDPOINT).unwrap();
        assert!(log.borrow().is_empty());
        assert_eq!(dac.last_word(), DAC_MIDPOINT);
    }

    #[test]
    fn test_distinct_words_each_framed() {
        let (pins, log) = RecordingPins::with_log();
        let mut dac = Ad5061::new(pins);
        dac.write(0x8001).unwrap();
        dac.write(0x8002).unwrap();
        let cs_rises = log
            .borrow()
            .iter()
            .filter(|&&e| e == Edge::Cs(true))
            .count();
        assert_eq!(cs_rises, 2);
        assert_eq!(dac.last_word(), 0x8002);
    }
}
