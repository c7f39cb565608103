// src/exec/pty.rs

//! Pseudo-terminal allocation for interactive interpreters.
//!
//! An interpreter started under a PTY gets one pair for stdin/stdout and a
//! second pair for stderr, so the two output streams stay separable.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Master and slave ends of one pseudo-terminal.
#[derive(Debug)]
pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

/// Allocate a new PTY pair. Both ends are close-on-exec; the child receives
/// the slave through its stdio redirections only.
pub fn open_pty() -> io::Result<PtyPair> {
    let mut master: libc::c_int = -1;
    let mut slave: libc::c_int = -1;

    let rc = unsafe {
        libc::openpty(
            &mut master,
            &mut slave,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: openpty succeeded, so both descriptors are open and owned by us.
    let pair = unsafe {
        PtyPair {
            master: OwnedFd::from_raw_fd(master),
            slave: OwnedFd::from_raw_fd(slave),
        }
    };

    set_cloexec(pair.master.as_raw_fd())?;
    set_cloexec(pair.slave.as_raw_fd())?;
    Ok(pair)
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Turn off local echo so fed commands are not mirrored back into stdout.
pub fn disable_echo(fd: BorrowedFd<'_>) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let mut termios = std::mem::MaybeUninit::<libc::termios>::uninit();

    if unsafe { libc::tcgetattr(raw, termios.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: tcgetattr filled the struct.
    let mut termios = unsafe { termios.assume_init() };
    termios.c_lflag &= !(libc::ECHO | libc::ECHONL);

    if unsafe { libc::tcsetattr(raw, libc::TCSANOW, &termios) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Runs in the forked child before `exec`: start a new session and make the
/// PTY on stdin the controlling terminal, so job control and SIGINT reach
/// the interpreter's foreground job.
pub fn become_session_leader() -> io::Result<()> {
    if unsafe { libc::setsid() } < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY as _, 0) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Read, Write};
    use std::os::fd::AsFd;

    #[test]
    fn pair_round_trips_bytes() {
        let pair = open_pty().unwrap();
        disable_echo(pair.slave.as_fd()).unwrap();

        let mut master = File::from(pair.master);
        let mut slave = File::from(pair.slave);

        master.write_all(b"ping\n").unwrap();
        let mut buf = [0u8; 16];
        let n = slave.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping\n");
    }
}
