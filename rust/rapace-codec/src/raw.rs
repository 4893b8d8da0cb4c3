//! Thin, unsafe wrappers around `sendmsg(2)`/`recvmsg(2)` for passing file
//! descriptors over `AF_UNIX` sockets via `SCM_RIGHTS`.

use std::io;
use std::mem::{size_of, zeroed};
use std::os::fd::{AsRawFd, RawFd};

/// Maximum number of bytes pulled from the socket per `recvmsg` call.
pub const RECV_CHUNK_SIZE: usize = 8 * 1024;

/// Maximum number of file descriptors accepted in a single ancillary buffer.
pub const MAX_RECV_FDS: usize = 255;

fn cmsg_space(fd_count: usize) -> usize {
    unsafe { libc::CMSG_SPACE((fd_count * size_of::<RawFd>()) as u32) as usize }
}

/// Sends `bytes` with an optional set of file descriptors riding in a single
/// `SCM_RIGHTS` control message. Returns the number of payload bytes
/// actually written (may be short; callers must retry with the remainder).
pub fn sendmsg_with_fds(sock: RawFd, bytes: &[u8], fds: &[RawFd]) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: bytes.as_ptr() as *mut _,
        iov_len: bytes.len(),
    };

    let mut cmsg_buf = if fds.is_empty() {
        Vec::new()
    } else {
        vec![0u8; cmsg_space(fds.len())]
    };

    let mut msg: libc::msghdr = unsafe { zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    if !fds.is_empty() {
        msg.msg_control = cmsg_buf.as_mut_ptr() as *mut _;
        msg.msg_controllen = cmsg_buf.len() as _;

        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            debug_assert!(!cmsg.is_null());
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN((fds.len() * size_of::<RawFd>()) as u32) as _;
            let data = libc::CMSG_DATA(cmsg) as *mut RawFd;
            std::ptr::copy_nonoverlapping(fds.as_ptr(), data, fds.len());
        }
    }

    let sent = unsafe { libc::sendmsg(sock, &msg, libc::MSG_NOSIGNAL) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sent as usize)
}

/// Sends the remainder of a payload with no ancillary data, retrying on
/// partial writes until the buffer is fully drained.
pub fn send_all_plain(sock: &impl AsRawFd, mut bytes: &[u8]) -> io::Result<()> {
    let fd = sock.as_raw_fd();
    while !bytes.is_empty() {
        let n = unsafe {
            libc::send(
                fd,
                bytes.as_ptr() as *const _,
                bytes.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        bytes = &bytes[n as usize..];
    }
    Ok(())
}

/// Outcome of a single `recvmsg` call.
pub struct RecvChunk {
    pub data: Vec<u8>,
    pub fds: Vec<RawFd>,
    /// A control message arrived at `SOL_SOCKET` whose type was not
    /// `SCM_RIGHTS`; the frame must be treated as malformed.
    pub bad_cmsg: bool,
    /// The peer performed an orderly shutdown (zero-length read).
    pub eof: bool,
}

/// Reads up to [`RECV_CHUNK_SIZE`] bytes and up to [`MAX_RECV_FDS`] file
/// descriptors from `sock`. `nonblocking` controls whether `MSG_DONTWAIT`
/// is passed; callers use a blocking first call and non-blocking follow-ups
/// within the same logical frame.
pub fn recvmsg_chunk(sock: RawFd, nonblocking: bool) -> io::Result<RecvChunk> {
    let mut buf = vec![0u8; RECV_CHUNK_SIZE];
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut _,
        iov_len: buf.len(),
    };

    let mut cmsg_buf = vec![0u8; cmsg_space(MAX_RECV_FDS)];

    let mut msg: libc::msghdr = unsafe { zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut _;
    msg.msg_controllen = cmsg_buf.len() as _;

    let flags = if nonblocking { libc::MSG_DONTWAIT } else { 0 };
    let n = unsafe { libc::recvmsg(sock, &mut msg, flags) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    let n = n as usize;
    buf.truncate(n);

    if n == 0 {
        return Ok(RecvChunk {
            data: Vec::new(),
            fds: Vec::new(),
            bad_cmsg: false,
            eof: true,
        });
    }

    let mut fds = Vec::new();
    let mut bad_cmsg = false;
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET {
                if (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                    let header_len = libc::CMSG_LEN(0) as usize;
                    let payload_len = (*cmsg).cmsg_len as usize - header_len;
                    let count = payload_len / size_of::<RawFd>();
                    let data = libc::CMSG_DATA(cmsg) as *const RawFd;
                    for i in 0..count {
                        fds.push(*data.add(i));
                    }
                } else {
                    bad_cmsg = true;
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok(RecvChunk {
        data: buf,
        fds,
        bad_cmsg,
        eof: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::FromRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn plain_bytes_round_trip_without_fds() {
        let (a, b) = UnixStream::pair().unwrap();
        sendmsg_with_fds(a.as_raw_fd(), b"hello", &[]).unwrap();
        let chunk = recvmsg_chunk(b.as_raw_fd(), false).unwrap();
        assert_eq!(chunk.data, b"hello");
        assert!(chunk.fds.is_empty());
        assert!(!chunk.bad_cmsg);
        assert!(!chunk.eof);
    }

    #[test]
    fn fd_rides_along_with_payload() {
        let (a, b) = UnixStream::pair().unwrap();
        let (fd_a, _fd_b) = UnixStream::pair().unwrap();

        sendmsg_with_fds(a.as_raw_fd(), b"fd-attached", &[fd_a.as_raw_fd()]).unwrap();
        let chunk = recvmsg_chunk(b.as_raw_fd(), false).unwrap();

        assert_eq!(chunk.data, b"fd-attached");
        assert_eq!(chunk.fds.len(), 1);

        // The received fd refers to the same kernel socket as the original.
        let received = unsafe { std::os::unix::net::UnixStream::from_raw_fd(chunk.fds[0]) };
        let orig_stat = fstat(fd_a.as_raw_fd());
        let recv_stat = fstat(received.as_raw_fd());
        assert_eq!(orig_stat.st_ino, recv_stat.st_ino);
        std::mem::forget(received); // avoid double-close in this unit test
        unsafe { libc::close(chunk.fds[0]) };
    }

    #[test]
    fn eof_on_peer_shutdown() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(a);
        let chunk = recvmsg_chunk(b.as_raw_fd(), false).unwrap();
        assert!(chunk.eof);
    }

    fn fstat(fd: RawFd) -> libc::stat {
        unsafe {
            let mut st: libc::stat = zeroed();
            assert_eq!(libc::fstat(fd, &mut st), 0);
            st
        }
    }
}
