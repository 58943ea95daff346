//! Log lines written while the replicate progress bar is drawn would otherwise leave the tail of
//! the bar on screen.

use log::Record;
use log4rs::encode::{Encode, Write};

/// Clears the current terminal line, then delegates to the wrapped encoder.
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
        w.write_all(b"\x1B[2K\r")?;
        self.inner.encode(w, record)
    }
}
