//! GNSS output selection.
//!
//! The corrections go to the receiver's serial port in the normal setup;
//! `-` writes to stdout instead, which is handy for piping into other
//! tools or for str2str-style relaying.

use std::io::{self, Write};
use std::time::Duration;

use miette::{miette, Result};

/// Open the downstream byte sink named on the command line.
pub fn open_sink(device: &str, baud: u32) -> Result<Box<dyn Write + Send>> {
    if device == "-" {
        return Ok(Box::new(io::stdout()));
    }
    let port = serialport::new(device, baud)
        .timeout(Duration::from_millis(250))
        .open()
        .map_err(|e| miette!("cannot open serial device {}: {}", device, e))?;
    Ok(Box::new(port))
}
