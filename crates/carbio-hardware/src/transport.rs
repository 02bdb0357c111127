//! Byte transport contract.
//!
//! A [`Transport`] moves raw bytes to and from the sensor. It knows nothing
//! about frames. `read_exact` and `write_exact` keep going until the buffer is
//! done or the timeout runs out and then report how far they got: a short
//! count is how a timeout is signalled, and callers must compare it with the
//! requested length.

use carbio_core::Result;
use std::time::Duration;

pub trait Transport: Send {
    /// Open the device node at `path`.
    fn open(&mut self, path: &str) -> Result<()>;

    /// Close the device. Closing a closed transport is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Change the line speed of an open device.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Fill `buf`, waiting at most `timeout` in total.
    ///
    /// Returns the number of bytes read; less than `buf.len()` means the
    /// timeout elapsed or the device failed.
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> usize;

    /// Write all of `buf`, waiting at most `timeout` in total.
    ///
    /// Returns the number of bytes written; less than `buf.len()` means the
    /// timeout elapsed or the device failed.
    fn write_exact(&mut self, buf: &[u8], timeout: Duration) -> usize;

    /// Discard unread input and unsent output.
    fn flush(&mut self) -> Result<()>;

    /// Block until all written output has been transmitted.
    fn drain(&mut self) -> Result<()>;

    /// Bytes waiting to be read.
    fn available(&self) -> usize;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self, path: &str) -> Result<()> {
        (**self).open(path)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        (**self).set_baud_rate(baud_rate)
    }

    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> usize {
        (**self).read_exact(buf, timeout)
    }

    fn write_exact(&mut self, buf: &[u8], timeout: Duration) -> usize {
        (**self).write_exact(buf, timeout)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn drain(&mut self) -> Result<()> {
        (**self).drain()
    }

    fn available(&self) -> usize {
        (**self).available()
    }
}
