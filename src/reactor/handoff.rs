//! Client socket hand-off between the acceptor and proxy workers
//!
//! Each descriptor travels as `SCM_RIGHTS` ancillary data attached to a single
//! payload byte on a Unix stream socket.

use super::ProxyStream;
use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Pass `socket` over `channel`
///
/// The caller keeps its own copy of the descriptor and should close it once
/// the send succeeded.
pub fn send_socket<C: AsRawFd, S: AsRawFd>(channel: &C, socket: &S) -> io::Result<()> {
    let fds = [socket.as_raw_fd()];
    let payload = [0u8; 1];
    let iov = [IoSlice::new(&payload)];
    let cmsgs = [ControlMessage::ScmRights(&fds)];

    let sent = sendmsg::<()>(channel.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None)?;
    if sent != payload.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            "descriptor hand-off was not sent",
        ));
    }
    Ok(())
}

/// Receive one descriptor from `channel`
///
/// Returns `Ok(None)` when the sending side closed the channel.
pub fn recv_socket<C: AsRawFd>(channel: &C) -> io::Result<Option<OwnedFd>> {
    let mut payload = [0u8; 1];
    let mut iov = [IoSliceMut::new(&mut payload)];
    let mut cmsg_buf = nix::cmsg_space!([RawFd; 1]);

    let msg = recvmsg::<()>(
        channel.as_raw_fd(),
        &mut iov,
        Some(&mut cmsg_buf),
        MsgFlags::empty(),
    )?;
    if msg.bytes == 0 {
        return Ok(None);
    }

    let mut received = None;
    for cmsg in msg.cmsgs() {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            for fd in fds {
                // SAFETY: the kernel installed `fd` in this process for us and
                // nothing else refers to it yet.
                let owned = unsafe { OwnedFd::from_raw_fd(fd) };
                if received.is_none() {
                    received = Some(owned);
                }
            }
        }
    }

    received.map(Some).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            "hand-off message carried no descriptor",
        )
    })
}

/// Turn a received descriptor into a non-blocking stream
pub fn into_stream(fd: OwnedFd) -> io::Result<ProxyStream> {
    let socket = socket2::Socket::from(fd);
    if socket.local_addr()?.as_socket().is_some() {
        ProxyStream::from_std_tcp(socket.into())
    } else {
        ProxyStream::from_std_unix(socket.into())
    }
}
