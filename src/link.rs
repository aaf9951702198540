//! Raw Ethernet link carrying EtherDFS frames.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::error::{EthersrvError, Result};
use crate::proto::MacAddr;

/// Something frames can be received from and sent to.
pub trait FrameLink: AsRawFd {
    /// Receive one frame without blocking. `Ok(None)` when nothing is pending.
    fn recv_frame(&self, buf: &mut [u8]) -> io::Result<Option<usize>>;

    fn send_frame(&self, frame: &[u8]) -> io::Result<()>;
}

/// AF_PACKET socket bound to one interface, filtered to the EtherDFS
/// ethertype, with the interface in promiscuous mode.
pub struct RawLink {
    inner: sys::Socket,
    interface: String,
    mac: MacAddr,
}

impl RawLink {
    pub fn open(interface: &str) -> Result<Self> {
        let link_err = |e: io::Error| EthersrvError::Link {
            interface: interface.to_string(),
            reason: e.to_string(),
        };
        let (inner, mac) = sys::Socket::open(interface).map_err(link_err)?;
        Ok(Self {
            inner,
            interface: interface.to_string(),
            mac,
        })
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl AsRawFd for RawLink {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl FrameLink for RawLink {
    fn recv_frame(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        would_block_is_none(self.inner.recv(buf))
    }

    fn send_frame(&self, frame: &[u8]) -> io::Result<()> {
        let sent = self.inner.send(frame)?;
        if sent != frame.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send: {} of {} bytes", sent, frame.len()),
            ));
        }
        Ok(())
    }
}

/// Datagram sockets keep frame boundaries, which makes them a stand-in link
/// for running the server loop without a network interface.
impl FrameLink for std::os::unix::net::UnixDatagram {
    fn recv_frame(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        would_block_is_none(self.recv(buf))
    }

    fn send_frame(&self, frame: &[u8]) -> io::Result<()> {
        self.send(frame).map(|_| ())
    }
}

fn would_block_is_none(res: io::Result<usize>) -> io::Result<Option<usize>> {
    match res {
        Ok(n) => Ok(Some(n)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use std::io::{self, Read};
    use std::mem;
    use std::os::unix::io::{AsRawFd, RawFd};

    use nix::ifaddrs::getifaddrs;
    use nix::net::if_::if_nametoindex;
    use socket2::{Domain, Protocol, SockAddr, Type};

    use crate::proto::{MacAddr, ETHERTYPE_DFS};

    nix::ioctl_read_bad!(get_if_flags, libc::SIOCGIFFLAGS, libc::ifreq);
    nix::ioctl_write_ptr_bad!(set_if_flags, libc::SIOCSIFFLAGS, libc::ifreq);

    pub struct Socket {
        inner: socket2::Socket,
    }

    impl Socket {
        pub fn open(interface: &str) -> io::Result<(Self, MacAddr)> {
            let mut ifr = ifreq_for(interface)?;
            let ifindex = if_nametoindex(interface).map_err(io::Error::from)?;
            let mac = hw_addr(interface)?;

            let proto = ETHERTYPE_DFS.to_be();
            let inner = socket2::Socket::new(
                Domain::PACKET,
                Type::RAW,
                Some(Protocol::from(proto as libc::c_int)),
            )?;
            inner.bind(&packet_addr(ifindex, proto)?)?;

            let fd = inner.as_raw_fd();
            let res = unsafe { get_if_flags(fd, &mut ifr) };
            res.map_err(io::Error::from)?;
            unsafe { ifr.ifr_ifru.ifru_flags |= libc::IFF_PROMISC as libc::c_short };
            let res = unsafe { set_if_flags(fd, &ifr) };
            res.map_err(io::Error::from)?;

            inner.set_nonblocking(true)?;
            Ok((Socket { inner }, mac))
        }

        pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
            (&self.inner).read(buf)
        }

        pub fn send(&self, frame: &[u8]) -> io::Result<usize> {
            self.inner.send(frame)
        }
    }

    impl AsRawFd for Socket {
        fn as_raw_fd(&self) -> RawFd {
            self.inner.as_raw_fd()
        }
    }

    fn ifreq_for(interface: &str) -> io::Result<libc::ifreq> {
        let name = interface.as_bytes();
        if name.is_empty() || name.len() >= libc::IFNAMSIZ || name.contains(&0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid interface name",
            ));
        }
        let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
        for (dst, &src) in ifr.ifr_name.iter_mut().zip(name) {
            *dst = src as libc::c_char;
        }
        Ok(ifr)
    }

    fn hw_addr(interface: &str) -> io::Result<MacAddr> {
        getifaddrs()
            .map_err(io::Error::from)?
            .filter(|ifa| ifa.interface_name == interface)
            .find_map(|ifa| ifa.address?.as_link_addr()?.addr())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "interface has no hardware address")
            })
    }

    /// `sockaddr_ll` restricting the socket to one interface and ethertype.
    fn packet_addr(ifindex: libc::c_uint, proto: u16) -> io::Result<SockAddr> {
        let res = unsafe {
            SockAddr::try_init(|storage, len| {
                let ll = storage.cast::<libc::sockaddr_ll>();
                (*ll).sll_family = libc::AF_PACKET as libc::c_ushort;
                (*ll).sll_protocol = proto;
                (*ll).sll_ifindex = ifindex as libc::c_int;
                *len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
                Ok(())
            })
        };
        let ((), addr) = res?;
        Ok(addr)
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use std::io;
    use std::os::unix::io::{AsRawFd, RawFd};

    use crate::proto::MacAddr;

    pub struct Socket;

    impl Socket {
        pub fn open(_interface: &str) -> io::Result<(Self, MacAddr)> {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "raw Ethernet links are only supported on Linux",
            ))
        }

        pub fn recv(&self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }

        pub fn send(&self, _frame: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }
    }

    impl AsRawFd for Socket {
        fn as_raw_fd(&self) -> RawFd {
            -1
        }
    }
}
