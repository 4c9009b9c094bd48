//! Log lines written while the tick progress bar is drawn would otherwise leave fragments of
//! the bar behind them on the terminal.

use log::Record;
use log4rs::encode::{Encode, Write};

/// Clears the current terminal line before delegating to the wrapped encoder.
#[derive(Debug)]
pub struct PBWrapperEncoder {
    inner: Box<dyn Encode>,
}

impl PBWrapperEncoder {
    pub fn new(inner: Box<dyn Encode>) -> Self {
        Self { inner }
    }
}

impl Encode for PBWrapperEncoder {
    fn encode(&self, w: &mut dyn Write, record: &Record) -> Result<(), anyhow::Error> {
        if crate::progress::tick_progress_active() {
            w.write_all("\x1B[2K\r".as_bytes())?;
        }
        self.inner.encode(w, record)
    }
}
