//! Non-blocking socket wrapper with an outbound write buffer.
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net;

use super::Link;

/// Stream operations that aren't part of plain [`Read`]/[`Write`], needed by
/// the reactor to tear down and introspect a connection.
pub trait Stream: Read + Write {
    fn shutdown(&self) -> io::Result<()>;
    fn local_addr(&self) -> io::Result<net::SocketAddr>;
}

impl Stream for net::TcpStream {
    fn shutdown(&self) -> io::Result<()> {
        net::TcpStream::shutdown(self, net::Shutdown::Both)
    }

    fn local_addr(&self) -> io::Result<net::SocketAddr> {
        net::TcpStream::local_addr(self)
    }
}

/// A registered peer connection: the raw stream plus a queue of bytes
/// waiting to be flushed out when the socket next becomes writable.
pub struct Socket<R> {
    raw: R,
    address: net::SocketAddr,
    pub link: Link,
    outbound: VecDeque<u8>,
}

impl<R: Stream> Socket<R> {
    pub fn from(raw: R, address: net::SocketAddr, link: Link) -> Self {
        Self {
            raw,
            address,
            link,
            outbound: VecDeque::new(),
        }
    }

    /// Queue bytes to be written on the next flush.
    pub fn push(&mut self, bytes: &[u8]) {
        self.outbound.extend(bytes.iter().copied());
    }

    /// Attempt to write as much of the outbound queue as the socket allows
    /// without blocking.
    pub fn flush(&mut self) -> io::Result<()> {
        while !self.outbound.is_empty() {
            let (front, _) = self.outbound.as_slices();
            let chunk = if front.is_empty() {
                self.outbound.make_contiguous()
            } else {
                front
            };
            match self.raw.write(chunk) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.raw.read(buf)
    }

    pub fn disconnect(&self) -> io::Result<()> {
        self.raw.shutdown()
    }

    pub fn local_address(&self) -> io::Result<net::SocketAddr> {
        self.raw.local_addr()
    }

    pub fn remote_address(&self) -> net::SocketAddr {
        self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct MockStream(Rc<RefCell<Vec<u8>>>);

    impl Read for MockStream {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Stream for MockStream {
        fn shutdown(&self) -> io::Result<()> {
            Ok(())
        }

        fn local_addr(&self) -> io::Result<net::SocketAddr> {
            Ok("127.0.0.1:0".parse().unwrap())
        }
    }

    #[test]
    fn flush_drains_the_outbound_queue() {
        let stream = MockStream::default();
        let mut socket = Socket::from(stream.clone(), "1.2.3.4:9590".parse().unwrap(), Link::Outbound);
        socket.push(&[1, 2, 3]);
        socket.flush().unwrap();
        assert_eq!(stream.0.borrow().as_slice(), &[1, 2, 3]);
    }
}
