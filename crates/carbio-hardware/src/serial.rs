//! POSIX serial transport.
//!
//! The port is opened through `serialport` (raw mode, 8N1, no flow control,
//! exclusive access) and then switched to non-blocking mode. Reads and
//! writes wait on `select(2)` with whatever is left of the caller's timeout,
//! recomputed on every pass, so there is no fixed sleep anywhere in the loop.

use crate::transport::Transport;
use carbio_core::constants::DEFAULT_BAUD_RATE;
use carbio_core::{Error, Result};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits, TTYPort};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

/// UART transport backed by a tty device node.
pub struct SerialTransport {
    port: Option<TTYPort>,
    path: String,
    baud_rate: u32,
}

impl SerialTransport {
    pub fn new() -> Self {
        Self {
            port: None,
            path: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    /// Path of the currently (or last) opened device.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn fd(&self) -> Option<RawFd> {
        self.port.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn port(&self) -> Result<&TTYPort> {
        self.port.as_ref().ok_or(Error::NotOpen)
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("path", &self.path)
            .field("baud_rate", &self.baud_rate)
            .field("open", &self.port.is_some())
            .finish()
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own; no memory is passed.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Wait until `fd` is ready in `direction` or `timeout` passes.
///
/// Returns `Ok(false)` on timeout.
fn wait_ready(fd: RawFd, direction: Direction, timeout: Duration) -> io::Result<bool> {
    // SAFETY: fd_set is plain data; FD_ZERO/FD_SET initialise it for `fd`,
    // which is below FD_SETSIZE for any tty we open.
    let mut set: libc::fd_set = unsafe { std::mem::zeroed() };
    unsafe {
        libc::FD_ZERO(&mut set);
        libc::FD_SET(fd, &mut set);
    }

    let mut tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };

    let set_ptr: *mut libc::fd_set = &mut set;
    let (read_set, write_set) = match direction {
        Direction::Read => (set_ptr, std::ptr::null_mut()),
        Direction::Write => (std::ptr::null_mut(), set_ptr),
    };

    // SAFETY: all pointers are either null or point to live locals.
    let rc = unsafe { libc::select(fd + 1, read_set, write_set, std::ptr::null_mut(), &mut tv) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc > 0)
}

fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

/// Shared loop for both directions. `step` performs one read or write at the
/// given offset and returns the raw syscall result.
fn transfer(
    fd: RawFd,
    direction: Direction,
    len: usize,
    timeout: Duration,
    mut step: impl FnMut(usize) -> isize,
) -> usize {
    let deadline = Instant::now() + timeout;
    let mut done = 0;

    while done < len {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        match wait_ready(fd, direction, remaining) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) if is_retryable(&err) => continue,
            Err(err) => {
                warn!(error = %err, ?direction, "select failed");
                break;
            }
        }

        let n = step(done);
        if n > 0 {
            done += n as usize;
            continue;
        }
        if n == 0 {
            debug!(?direction, "serial device returned end of file");
            break;
        }

        let err = io::Error::last_os_error();
        if !is_retryable(&err) {
            warn!(error = %err, ?direction, "serial transfer aborted");
            break;
        }
    }

    trace!(?direction, requested = len, transferred = done, "serial transfer");
    done
}

impl Transport for SerialTransport {
    fn open(&mut self, path: &str) -> Result<()> {
        self.close();

        let port = serialport::new(path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::ZERO)
            .open_native()
            .map_err(|e| Error::serial(format!("{path}: {e}")))?;

        set_nonblocking(port.as_raw_fd())?;

        info!("Opened serial device {} at {} bps", path, self.baud_rate);
        self.path = path.to_string();
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closed serial device {}", self.path);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotOpen)?;
        port.set_baud_rate(baud_rate)
            .map_err(|e| Error::serial(format!("set baud rate {baud_rate}: {e}")))?;
        debug!(baud_rate, "line speed changed");
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> usize {
        let Some(fd) = self.fd() else {
            return 0;
        };
        let len = buf.len();
        transfer(fd, Direction::Read, len, timeout, |offset| {
            let rest = &mut buf[offset..];
            // SAFETY: `rest` is a live, writable slice of exactly this length.
            unsafe { libc::read(fd, rest.as_mut_ptr().cast(), rest.len()) }
        })
    }

    fn write_exact(&mut self, buf: &[u8], timeout: Duration) -> usize {
        let Some(fd) = self.fd() else {
            return 0;
        };
        transfer(fd, Direction::Write, buf.len(), timeout, |offset| {
            let rest = &buf[offset..];
            // SAFETY: `rest` is a live slice of exactly this length.
            unsafe { libc::write(fd, rest.as_ptr().cast(), rest.len()) }
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.port()?
            .clear(ClearBuffer::All)
            .map_err(|e| Error::serial(format!("flush: {e}")))
    }

    fn drain(&mut self) -> Result<()> {
        let fd = self.fd().ok_or(Error::NotOpen)?;
        loop {
            // SAFETY: tcdrain on an open tty descriptor.
            if unsafe { libc::tcdrain(fd) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err.into());
            }
        }
    }

    fn available(&self) -> usize {
        self.port
            .as_ref()
            .and_then(|port| port.bytes_to_read().ok())
            .map_or(0, |n| n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_transport() {
        let mut transport = SerialTransport::new();
        assert!(!transport.is_open());
        assert_eq!(transport.available(), 0);
        assert_eq!(transport.read_exact(&mut [0u8; 4], Duration::from_millis(1)), 0);
        assert_eq!(transport.write_exact(&[1, 2], Duration::from_millis(1)), 0);
        assert!(matches!(transport.flush(), Err(Error::NotOpen)));
        assert!(matches!(transport.drain(), Err(Error::NotOpen)));
        assert!(matches!(transport.set_baud_rate(9600), Err(Error::NotOpen)));
    }

    #[test]
    fn test_open_missing_device() {
        let mut transport = SerialTransport::new();
        let err = transport.open("/dev/carbio-does-not-exist").unwrap_err();
        assert!(matches!(err, Error::Serial(_)));
        assert!(!transport.is_open());
    }

    #[test]
    fn test_wait_ready_times_out_on_idle_pipe() {
        let mut fds = [0 as RawFd; 2];
        // SAFETY: pipe writes two descriptors into the array.
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

        let ready = wait_ready(fds[0], Direction::Read, Duration::from_millis(5)).unwrap();
        assert!(!ready);
        let ready = wait_ready(fds[1], Direction::Write, Duration::from_millis(5)).unwrap();
        assert!(ready);

        // SAFETY: closing descriptors created above.
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }

    #[test]
    fn test_transfer_short_count_on_timeout() {
        let mut fds = [0 as RawFd; 2];
        // SAFETY: pipe writes two descriptors into the array.
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        set_nonblocking(fds[0]).unwrap();

        let payload = [0xEFu8, 0x01, 0xFF];
        // SAFETY: writing a live buffer into the pipe.
        unsafe { libc::write(fds[1], payload.as_ptr().cast(), payload.len()) };

        let mut buf = [0u8; 8];
        let read_fd = fds[0];
        let n = transfer(read_fd, Direction::Read, buf.len(), Duration::from_millis(20), |off| {
            let rest = &mut buf[off..];
            // SAFETY: live slice.
            unsafe { libc::read(read_fd, rest.as_mut_ptr().cast(), rest.len()) }
        });
        assert_eq!(n, 3);
        assert_eq!(&buf[..3], &payload);

        // SAFETY: closing descriptors created above.
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}
