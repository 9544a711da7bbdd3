//! TUN device abstraction.
//!
//! The core only needs to read and write whole inner packets; device
//! allocation, naming, and platform quirks are pushed behind a small trait so
//! the pipeline (and its tests) can run against an in-memory stand-in.

use std::io::{self, Read, Write};

/// A packet-mode TUN interface: every `read` yields exactly one inner IP
/// packet, every `write` accepts exactly one.
pub trait TunDevice: Read + Write + Send {}

impl<T: Read + Write + Send> TunDevice for T {}

/// Linux `/dev/net/tun` backend, opened in packet mode (`IFF_TUN | IFF_NO_PI`).
#[cfg(target_os = "linux")]
pub mod linux {
    use std::ffi::CString;
    use std::fs::File;
    use std::io;
    use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

    const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
    const IFF_TUN: libc::c_short = 0x0001;
    const IFF_NO_PI: libc::c_short = 0x1000;
    const IFNAMSIZ: usize = 16;

    #[repr(C)]
    struct IfReq {
        name: [libc::c_char; IFNAMSIZ],
        flags: libc::c_short,
        _pad: [u8; 22],
    }

    /// An open Linux TUN device, usable as a plain file for read/write.
    pub struct LinuxTun {
        file: File,
        name: String,
    }

    impl LinuxTun {
        /// Open (creating if necessary) the named TUN interface in packet mode.
        pub fn open(requested_name: &str) -> io::Result<Self> {
            let path = CString::new("/dev/net/tun").unwrap();
            let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }

            if requested_name.len() >= IFNAMSIZ {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "tun device name too long"));
            }

            let mut req = IfReq {
                name: [0; IFNAMSIZ],
                flags: IFF_TUN | IFF_NO_PI,
                _pad: [0; 22],
            };
            for (dst, src) in req.name.iter_mut().zip(requested_name.bytes()) {
                *dst = src as libc::c_char;
            }

            let rc = unsafe { libc::ioctl(fd, TUNSETIFF, &req) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(err);
            }

            let name = requested_name.to_string();
            // Safety: `fd` was just returned by a successful `open` and is not
            // owned anywhere else.
            let file = unsafe { File::from_raw_fd(fd) };
            Ok(Self { file, name })
        }

        pub fn name(&self) -> &str {
            &self.name
        }
    }

    impl AsRawFd for LinuxTun {
        fn as_raw_fd(&self) -> RawFd {
            self.file.as_raw_fd()
        }
    }

    impl io::Read for LinuxTun {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.file.read(buf)
        }
    }

    impl io::Write for LinuxTun {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.file.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }
}

/// An in-memory `TunDevice` backed by byte-vector queues, for tests and
/// platforms without a real TUN backend.
pub struct MemTun {
    inbound: std::collections::VecDeque<Vec<u8>>,
    outbound: Vec<Vec<u8>>,
}

impl MemTun {
    pub fn new() -> Self {
        Self { inbound: std::collections::VecDeque::new(), outbound: Vec::new() }
    }

    /// Queue a packet that a subsequent `read` will return.
    pub fn push_inbound(&mut self, packet: Vec<u8>) {
        self.inbound.push_back(packet);
    }

    /// Packets written so far, in order.
    pub fn written(&self) -> &[Vec<u8>] {
        &self.outbound
    }
}

impl Default for MemTun {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for MemTun {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inbound.pop_front() {
            Some(packet) => {
                let n = packet.len().min(buf.len());
                buf[..n].copy_from_slice(&packet[..n]);
                Ok(n)
            }
            None => Err(io::Error::new(io::ErrorKind::WouldBlock, "no queued packet")),
        }
    }
}

impl Write for MemTun {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
