use socket2::{Domain, Protocol, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

pub(crate) const RECEIVE_BUFFER_SIZE: usize = 2048;
pub(crate) const SOCKET_TIMEOUT: Duration = Duration::from_secs(1);

/// A destination-bound, ICMP-filtered datagram channel.
///
/// Implementors are the sole holders of the underlying network handle; the
/// handle is released when the value is dropped. `receive` blocks until a
/// datagram arrives or the configured timeout elapses, in which case it
/// fails with a timeout error.
pub trait Transport: Send + Sync {
    fn send(&self, buf: &[u8]) -> io::Result<usize>;
    fn receive(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Raw ICMPv4 socket connected to a single destination.
///
/// Received datagrams carry the full IPv4 header. Datagrams larger than the
/// caller's buffer are truncated.
pub struct RawSocket {
    socket: socket2::Socket,
}

impl RawSocket {
    pub fn connect(destination: Ipv4Addr, timeout: Duration) -> io::Result<RawSocket> {
        let socket = socket2::Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        socket.set_read_timeout(Some(timeout))?;
        socket.connect(&SocketAddr::V4(SocketAddrV4::new(destination, 0)).into())?;
        Ok(RawSocket { socket })
    }
}

impl Transport for RawSocket {
    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }

    fn receive(&self, buf: &mut [u8]) -> io::Result<usize> {
        // Socket2 gives a safety guaranty which allows us to do an unsafe cast
        // from `&mut [u8]` to `&mut [std::mem::MaybeUninit<u8>]`. In fact, even
        // if we use MaybeUninit here we have to use unsafe somewhere to copy
        // the data out of MaybeUninit.
        // https://docs.rs/socket2/0.4.7/socket2/struct.Socket.html#method.recv
        self.socket.recv(unsafe {
            &mut *(std::ptr::addr_of_mut!(*buf) as *mut [u8] as *mut [std::mem::MaybeUninit<u8>])
        })
    }
}
