//! Byte transport underneath a [`Session`](crate::session::Session).
//!
//! The session never touches sockets directly: it opens a [`Transport`],
//! receives raw chunks through a channel, and hands serialized frames back
//! to [`Transport::send`].

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, trace};

/// Size of one socket read.
const READ_CHUNK: usize = 64 * 1024;

/// A peer that stops reading fails our writes after this long.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub trait Transport: Send + Sync {
    /// Opens the connection and starts delivering inbound bytes to
    /// `inbound`, one chunk per read.
    ///
    /// Every clone of `inbound` must be dropped once the connection ends, so
    /// the receiving side observes the close.
    fn open(&self, inbound: Sender<Vec<u8>>) -> io::Result<()>;

    /// Writes `bytes` in full.
    fn send(&self, bytes: &[u8]) -> io::Result<()>;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Closes the connection. Must be idempotent, and must unblock a pending
    /// read so the inbound channel closes.
    fn shutdown(&self);
}

/// Blocking TCP transport with one reader thread per connection.
///
/// Writers hold `writer` for a whole frame batch. `control` is a second
/// handle to the same socket so [`shutdown`](Transport::shutdown) can close
/// it while a write is blocked.
pub struct TcpTransport {
    addr: SocketAddr,
    connect_timeout: Duration,
    writer: Mutex<Option<TcpStream>>,
    control: Mutex<Option<TcpStream>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_timeout(addr, Duration::from_secs(10))
    }

    pub fn with_timeout(addr: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            addr,
            connect_timeout,
            writer: Mutex::new(None),
            control: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }
}

fn read_loop(mut stream: TcpStream, inbound: Sender<Vec<u8>>) {
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        match stream.read(&mut buf) {
            Ok(0) => {
                debug!("peer closed the connection");
                break;
            }
            Ok(n) => {
                trace!(bytes = n, "read");
                if inbound.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "read failed");
                break;
            }
        }
    }
}

impl Transport for TcpTransport {
    fn open(&self, inbound: Sender<Vec<u8>>) -> io::Result<()> {
        // A previous connection must be fully torn down first.
        self.shutdown();

        let stream = TcpStream::connect_timeout(&self.addr, self.connect_timeout)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        let read_half = stream.try_clone()?;
        let control = stream.try_clone()?;

        let reader = thread::Builder::new()
            .name("btc-p2p-socket".into())
            .spawn(move || read_loop(read_half, inbound))?;

        *self.writer.lock() = Some(stream);
        *self.control.lock() = Some(control);
        *self.reader.lock() = Some(reader);
        debug!(peer = %self.addr, "socket open");
        Ok(())
    }

    fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock();
        let stream = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport is not open"))?;
        stream.write_all(bytes)?;
        stream.flush()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.control.lock().as_ref()?.local_addr().ok()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.addr)
    }

    fn shutdown(&self) {
        // Closing through the control handle fails any blocked write, which
        // releases the writer lock below.
        if let Some(control) = self.control.lock().take() {
            let _ = control.shutdown(Shutdown::Both);
        }
        self.writer.lock().take();
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            let _ = reader.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::net::TcpListener;

    #[test]
    fn delivers_chunks_and_closes_channel_on_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.write_all(b"hello").unwrap();
            let mut echo = [0u8; 4];
            conn.read_exact(&mut echo).unwrap();
            echo
        });

        let transport = TcpTransport::new(addr);
        let (tx, rx) = unbounded();
        transport.open(tx).unwrap();
        assert_eq!(transport.peer_addr(), Some(addr));
        assert!(transport.local_addr().is_some());

        let mut received = vec![];
        while received.len() < 5 {
            received.extend(rx.recv().unwrap());
        }
        assert_eq!(received, b"hello");

        transport.send(b"ping").unwrap();
        assert_eq!(&server.join().unwrap(), b"ping");

        // server dropped its end
        assert!(rx.iter().all(|chunk| !chunk.is_empty()));
        transport.shutdown();
        transport.shutdown();
    }

    #[test]
    fn shutdown_unblocks_a_stalled_write() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);

        // accepts, then never reads
        let server = thread::spawn(move || {
            let (_conn, _) = listener.accept().unwrap();
            let _ = release_rx.recv();
        });

        let transport = std::sync::Arc::new(TcpTransport::new(addr));
        let (tx, _rx) = unbounded();
        transport.open(tx).unwrap();

        let writer = {
            let transport = transport.clone();
            thread::spawn(move || transport.send(&vec![0u8; 64 * 1024 * 1024]))
        };
        thread::sleep(Duration::from_millis(200));

        let start = std::time::Instant::now();
        transport.shutdown();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(writer.join().unwrap().is_err());

        let _ = release_tx.send(());
        server.join().unwrap();
    }

    #[test]
    fn send_before_open_fails() {
        let transport = TcpTransport::new("127.0.0.1:1".parse().unwrap());
        let err = transport.send(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
