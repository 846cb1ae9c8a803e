//! Instrument hosting: the control server side.
//!
//! An `InstrumentServer` binds a TCP endpoint and, once started, serves a
//! single connection with a strictly sequential receive loop: read one
//! request frame, dispatch it against the instrument, reply if the op calls
//! for one, repeat. The loop ends on peer disconnect, transport failure, or
//! an explicit `stop()`; rebinding after that is the owner's decision.
//!
//! Per-request failures (unknown names, rejected bounds) never terminate
//! the session. They are logged, `get`/`call` reply with a null response so
//! the half-duplex peer is never left blocking, and `set` stays silent as
//! the base protocol has no acknowledgment channel.

use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::instrument::Instrument;
use crate::remote::protocol::{read_frame, scalar, write_frame, Reply, Request};

/// A bound, not-yet-serving control server. `start()` moves it onto its
/// receive thread.
pub struct InstrumentServer {
    listener: TcpListener,
    instrument: Instrument,
}

/// Handle to a running server. `stop()` signals the receive thread,
/// unblocks it, and joins it, returning the loop's exit result.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    conn: Arc<Mutex<Option<TcpStream>>>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl InstrumentServer {
    /// Bind the endpoint immediately. Use `"127.0.0.1:0"` to let the OS
    /// pick a port, then read it back with `local_addr()`.
    pub fn bind(addr: impl ToSocketAddrs, instrument: Instrument) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(InstrumentServer { listener, instrument })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Spawn the receive thread: accept one connection, then serve it until
    /// disconnect or shutdown.
    pub fn start(self) -> Result<ServerHandle> {
        let addr = self.listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let conn: Arc<Mutex<Option<TcpStream>>> = Arc::new(Mutex::new(None));

        let flag = shutdown.clone();
        let slot = conn.clone();
        let listener = self.listener;
        let mut instrument = self.instrument;
        let thread = thread::spawn(move || serve(&listener, &mut instrument, &flag, &slot));

        Ok(ServerHandle {
            addr,
            shutdown,
            conn,
            thread: Some(thread),
        })
    }
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown, unblock the receive thread, and join it.
    pub fn stop(mut self) -> Result<()> {
        self.signal();
        match self.thread.take() {
            Some(thread) => match thread.join() {
                Ok(result) => result,
                Err(_) => Err(Error::Transport(std::io::Error::other(
                    "server thread panicked",
                ))),
            },
            None => Ok(()),
        }
    }

    fn signal(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let live = match self.conn.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match live {
            // Unblock a loop parked in read_frame.
            Some(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
            }
            // Unblock a loop parked in accept.
            None => {
                let _ = TcpStream::connect(self.addr);
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.signal();
        }
    }
}

fn serve(
    listener: &TcpListener,
    instrument: &mut Instrument,
    shutdown: &AtomicBool,
    slot: &Mutex<Option<TcpStream>>,
) -> Result<()> {
    let (mut stream, peer) = listener.accept()?;

    // Publish the connection so stop() can unblock the read, then re-check
    // the flag: a stop() racing the accept must still win.
    {
        let clone = stream.try_clone()?;
        match slot.lock() {
            Ok(mut guard) => *guard = Some(clone),
            Err(poisoned) => *poisoned.into_inner() = Some(clone),
        }
    }
    if shutdown.load(Ordering::SeqCst) {
        return Ok(());
    }
    debug!(%peer, "control session opened");

    loop {
        let request: Request = match read_frame(&mut stream) {
            Ok(request) => request,
            Err(Error::Transport(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!(%peer, "control session closed by peer");
                return Ok(());
            }
            Err(e) => {
                if shutdown.load(Ordering::SeqCst) {
                    return Ok(());
                }
                warn!(%peer, error = %e, "control session failed");
                return Err(e);
            }
        };
        if shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(reply) = dispatch(request, instrument) {
            if let Err(e) = write_frame(&mut stream, &reply) {
                if shutdown.load(Ordering::SeqCst) {
                    return Ok(());
                }
                warn!(%peer, error = %e, "control session failed");
                return Err(e);
            }
        }
    }
}

/// Translate one request into instrument operations. Returns the reply to
/// send, if the op elicits one.
fn dispatch(request: Request, instrument: &mut Instrument) -> Option<Reply> {
    match request {
        Request::Get { parameter } => {
            let result = match instrument.parameter(&parameter) {
                Some(p) => p.read(),
                None => Err(Error::UnknownParameter(parameter.clone())),
            };
            let response = match result {
                Ok(v) => {
                    debug!(parameter = %parameter, value = v, "get");
                    scalar(v)
                }
                Err(e) => {
                    warn!(parameter = %parameter, error = %e, "get rejected");
                    Value::Null
                }
            };
            Some(Reply { response })
        }
        Request::Set { parameter, value } => {
            let result = match instrument.parameter(&parameter) {
                Some(p) => p.write(value),
                None => Err(Error::UnknownParameter(parameter.clone())),
            };
            match result {
                Ok(()) => debug!(parameter = %parameter, value = value, "set"),
                // Base protocol: no acknowledgment channel for set, so a
                // rejection is logged and the session moves on.
                Err(e) => warn!(parameter = %parameter, error = %e, "set rejected"),
            }
            None
        }
        Request::Call { function, args, kwargs } => {
            let response = match instrument.call_method(&function, &args, &kwargs) {
                Ok(v) => {
                    debug!(function = %function, "call");
                    v
                }
                Err(e) => {
                    warn!(function = %function, error = %e, "call rejected");
                    Value::Null
                }
            };
            Some(Reply { response })
        }
    }
}
