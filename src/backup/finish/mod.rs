use flate2::write::GzEncoder;
use std::io::{Error, Write};

/// Flushes trailing stream data and hands back the wrapped writer.
pub trait Finish<O> {
    fn finish(self) -> Result<O, Error>;
}

impl<W: Write> Finish<W> for GzEncoder<W> {
    fn finish(self) -> Result<W, Error> {
        self.finish()
    }
}
