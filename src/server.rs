//! The main loop: wait for frames, answer them one at a time.

use std::io;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::link::FrameLink;
use crate::proto::{format_mac, MAX_FRAME_LEN};

/// Single-threaded server. Stops once `stop` becomes readable.
pub struct Server<L, S> {
    link: L,
    dispatcher: Dispatcher,
    stop: S,
    heartbeat: Option<Duration>,
}

impl<L: FrameLink, S: AsRawFd> Server<L, S> {
    pub fn new(link: L, dispatcher: Dispatcher, stop: S, heartbeat: Option<Duration>) -> Self {
        Self {
            link,
            dispatcher,
            stop,
            heartbeat,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Serve until the stop descriptor is readable.
    pub fn run(&mut self) -> Result<()> {
        info!(
            "Serving on {} (heartbeat {:?})",
            format_mac(self.dispatcher.mac()),
            self.heartbeat
        );
        let timeout = self
            .heartbeat
            .map(|d| d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);
        let mut ticks: u64 = 0;

        loop {
            let mut fds = [
                libc::pollfd {
                    fd: self.link.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.stop.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }
            if ret == 0 {
                ticks += 1;
                trace!("heartbeat {}", ticks);
                continue;
            }

            if fds[1].revents != 0 {
                info!("Shutdown requested");
                return Ok(());
            }
            if fds[0].revents & libc::POLLIN != 0 {
                self.drain();
            } else if fds[0].revents != 0 {
                warn!("Link reported poll events {:#x}", fds[0].revents);
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link closed").into());
            }
        }
    }

    /// Answer every frame currently queued on the link.
    fn drain(&mut self) {
        let mut buf = [0u8; MAX_FRAME_LEN];
        loop {
            let len = match self.link.recv_frame(&mut buf) {
                Ok(Some(len)) => len,
                Ok(None) => return,
                Err(e) => {
                    warn!("Receive failed: {}", e);
                    return;
                }
            };
            let Some(reply) = self.dispatcher.handle_frame(&buf[..len]) else {
                continue;
            };
            debug!("reply of {} bytes", reply.len());
            if let Err(e) = self.link.send_frame(reply) {
                warn!("Send failed: {}", e);
            }
        }
    }
}
