//! Async frame transport over a connected `AF_UNIX` stream socket.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tokio::net::UnixStream;

use crate::raw::{self, RECV_CHUNK_SIZE};

/// Result of draining one logical frame off the wire: the frame layer does
/// not interpret `data` at all, it only hands it to the caller along with
/// any file descriptors that rode in via `SCM_RIGHTS`.
pub struct RawParsedMessage {
    pub data: Vec<u8>,
    pub fds: Vec<OwnedFd>,
    /// Set when a non-`SCM_RIGHTS` control message arrived at
    /// `SOL_SOCKET`; the frame must be discarded and the session closed.
    pub bad: bool,
}

impl RawParsedMessage {
    fn empty() -> Self {
        Self {
            data: Vec::new(),
            fds: Vec::new(),
            bad: false,
        }
    }
}

#[derive(Debug)]
pub enum TransportError {
    Io(io::Error),
    /// The peer performed an orderly shutdown.
    Closed,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "transport I/O error: {e}"),
            TransportError::Closed => write!(f, "transport closed by peer"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e)
    }
}

/// Frame transport over one connected `AF_UNIX`/`SOCK_STREAM` socket.
pub struct FrameTransport {
    sock: AsyncFd<UnixStream>,
}

impl FrameTransport {
    pub fn new(sock: UnixStream) -> io::Result<Self> {
        Ok(Self {
            sock: AsyncFd::new(sock)?,
        })
    }

    pub fn from_std(sock: StdUnixStream) -> io::Result<Self> {
        sock.set_nonblocking(true)?;
        Self::new(UnixStream::from_std(sock)?)
    }

    /// Creates a connected pair for tests.
    pub fn pair() -> io::Result<(Self, Self)> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self::new(a)?, Self::new(b)?))
    }

    fn raw_fd(&self) -> RawFd {
        self.sock.get_ref().as_raw_fd()
    }

    /// Sends `bytes` with `fds` riding out-of-band on the first write.
    /// Partial writes are retried until the whole payload is drained; the
    /// control message only rides the very first send call.
    pub async fn send_with_fds(&self, bytes: &[u8], fds: &[RawFd]) -> Result<(), TransportError> {
        let mut offset = 0usize;
        loop {
            let mut guard = self.sock.writable().await?;
            let result = guard.try_io(|inner| {
                let fd = inner.get_ref().as_raw_fd();
                if offset == 0 {
                    raw::sendmsg_with_fds(fd, bytes, fds)
                } else {
                    raw::send_all_plain(inner.get_ref(), &bytes[offset..]).map(|_| bytes.len() - offset)
                }
            });
            match result {
                Ok(Ok(n)) => {
                    offset += n;
                    if offset >= bytes.len() {
                        return Ok(());
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_would_block) => continue,
            }
        }
    }

    /// Reads one logical frame's worth of bytes off the wire: the first
    /// `recvmsg` call blocks (by awaiting readiness), subsequent calls
    /// within the same frame are drained non-blocking until the kernel
    /// returns a short read, EOF, or `EAGAIN`.
    pub async fn parse_frame(&self) -> Result<RawParsedMessage, TransportError> {
        let mut msg = RawParsedMessage::empty();
        let mut first = true;

        loop {
            let chunk = if first {
                self.recv_blocking().await?
            } else {
                match self.recv_nonblocking()? {
                    Some(chunk) => chunk,
                    None => break, // EAGAIN: frame is fully drained for now
                }
            };
            first = false;

            if chunk.eof {
                if msg.data.is_empty() && msg.fds.is_empty() {
                    tracing::debug!("peer closed the connection");
                    return Err(TransportError::Closed);
                }
                break;
            }
            if chunk.bad_cmsg {
                tracing::warn!("received a non-SCM_RIGHTS control message, discarding frame");
                msg.bad = true;
                break;
            }

            let short_read = chunk.data.len() < RECV_CHUNK_SIZE;
            msg.data.extend_from_slice(&chunk.data);
            for fd in chunk.fds {
                // Safety: fd was just handed to us by recvmsg(2) via
                // SCM_RIGHTS; we are its sole owner until adopted.
                msg.fds.push(unsafe { OwnedFd::from_raw_fd(fd) });
            }

            if short_read {
                break;
            }
        }

        Ok(msg)
    }

    async fn recv_blocking(&self) -> Result<raw::RecvChunk, TransportError> {
        loop {
            let mut guard = self.sock.readable().await?;
            match guard.try_io(|inner| raw::recvmsg_chunk(inner.get_ref().as_raw_fd(), false)) {
                Ok(result) => return Ok(result?),
                Err(_would_block) => continue,
            }
        }
    }

    fn recv_nonblocking(&self) -> Result<Option<raw::RecvChunk>, TransportError> {
        match self
            .sock
            .get_ref()
            .try_io(Interest::READABLE, || raw::recvmsg_chunk(self.raw_fd(), true))
        {
            Ok(chunk) => Ok(Some(chunk)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
