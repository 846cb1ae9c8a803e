//! Remote instrument control: the client side.
//!
//! A `RemoteInstrument` connects to an `InstrumentServer` and mirrors the
//! server's declared parameters as local proxy cells. Reading a proxy sends
//! a `get` and blocks for the reply; writing sends a `set` and returns
//! without waiting, matching the base protocol's silent set. `call()` is
//! the arbitrary remote-procedure escape hatch.
//!
//! The declared parameter set comes from a template instrument supplied at
//! connection time, a point-in-time snapshot of names and kinds. It is not
//! re-synced if the server's registry changes later.
//!
//! All proxies share one connection behind a mutex, which both preserves
//! the half-duplex request/response discipline and serializes callers.
//! Calls block with no timeout; a stalled peer stalls the caller.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::instrument::Instrument;
use crate::parameter::{Kind, Parameter};
use crate::remote::protocol::{read_frame, write_frame, Reply, Request};

pub struct RemoteInstrument {
    conn: Arc<Mutex<TcpStream>>,
    mirror: Instrument,
}

fn lock(conn: &Arc<Mutex<TcpStream>>) -> MutexGuard<'_, TcpStream> {
    match conn.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Build the proxy cell for one remote parameter. Template measurements
/// mirror as read-only: they get no set path at all.
fn proxy(name: &str, kind: Kind, conn: &Arc<Mutex<TcpStream>>) -> Parameter {
    let get_conn = conn.clone();
    let get_name = name.to_string();
    let builder = Parameter::builder(name).kind(kind).read_hook(move || {
        let mut stream = lock(&get_conn);
        write_frame(
            &mut *stream,
            &Request::Get { parameter: get_name.clone() },
        )?;
        let reply: Reply = read_frame(&mut *stream)?;
        // A null response is the server's "could not read" signal.
        reply
            .response
            .as_f64()
            .ok_or_else(|| Error::UnsetValue(get_name.clone()))
    });

    if kind == Kind::Measurement {
        return builder.build();
    }

    let set_conn = conn.clone();
    let set_name = name.to_string();
    builder
        .write_hook(move |value| {
            let mut stream = lock(&set_conn);
            write_frame(
                &mut *stream,
                &Request::Set { parameter: set_name.clone(), value },
            )
        })
        .build()
}

impl RemoteInstrument {
    /// Connect to a hosting server and mirror every parameter the template
    /// declares (children flatten under their dotted names).
    pub fn connect(addr: impl ToSocketAddrs, template: &Instrument) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        let conn = Arc::new(Mutex::new(stream));

        let mut mirror = Instrument::new(template.name());
        for (name, cell) in template.enumerate(None) {
            mirror.declare(proxy(&name, cell.kind(), &conn))?;
        }

        Ok(RemoteInstrument { conn, mirror })
    }

    /// The local mirror registry of proxy cells.
    pub fn mirror(&self) -> &Instrument {
        &self.mirror
    }

    /// Proxy cell for a mirrored parameter name, if the template declared it.
    pub fn parameter(&self, name: &str) -> Option<Parameter> {
        self.mirror.parameter(name)
    }

    /// Read a remote parameter through its proxy.
    pub fn read(&self, name: &str) -> Result<f64> {
        self.parameter(name)
            .ok_or_else(|| Error::UnknownParameter(name.to_string()))?
            .read()
    }

    /// Write a remote parameter through its proxy. Fire-and-forget: a
    /// server-side rejection is logged over there, not reported here.
    pub fn write(&self, name: &str, value: f64) -> Result<()> {
        self.parameter(name)
            .ok_or_else(|| Error::UnknownParameter(name.to_string()))?
            .write(value)
    }

    /// Invoke a method registered on the hosting instrument and block for
    /// its result. Arguments must be JSON-representable; types survive the
    /// boundary only as far as JSON carries them.
    pub fn call(
        &self,
        function: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value> {
        let mut stream = lock(&self.conn);
        write_frame(
            &mut *stream,
            &Request::Call {
                function: function.to_string(),
                args,
                kwargs,
            },
        )?;
        let reply: Reply = read_frame(&mut *stream)?;
        Ok(reply.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::{Access, Bounds};
    use crate::remote::server::{InstrumentServer, ServerHandle};
    use serde_json::json;
    use std::net::SocketAddr;

    /// Host a rig with knob `x = 5` in [0, 10], measurement `temp`, and an
    /// `add` method. Returns a server-side handle to `x` for parity checks.
    fn hosted_rig() -> (ServerHandle, SocketAddr, Parameter) {
        let mut inst = Instrument::new("rig");
        let x = inst
            .declare(
                Parameter::builder("x")
                    .initial(5.0)
                    .bounds(Bounds::closed(0.0, 10.0))
                    .build(),
            )
            .unwrap();
        inst.declare(
            Parameter::builder("temp")
                .kind(Kind::Measurement)
                .read_hook(|| Ok(293.0))
                .build(),
        )
        .unwrap();
        inst.register_method("add", |args, kwargs| {
            let mut total: f64 = args.iter().filter_map(|v| v.as_f64()).sum();
            if let Some(extra) = kwargs.get("extra").and_then(|v| v.as_f64()) {
                total += extra;
            }
            Ok(json!(total))
        })
        .unwrap();

        let server = InstrumentServer::bind("127.0.0.1:0", inst).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.start().unwrap();
        (handle, addr, x)
    }

    /// The client-side declaration of the same rig: names and kinds only.
    fn rig_template() -> Instrument {
        let mut template = Instrument::new("rig");
        template.declare(Parameter::new("x")).unwrap();
        template
            .declare(Parameter::builder("temp").kind(Kind::Measurement).build())
            .unwrap();
        template
    }

    #[test]
    fn remote_parity_read_write_read() {
        let (handle, addr, x) = hosted_rig();
        let remote = RemoteInstrument::connect(addr, &rig_template()).unwrap();

        assert_eq!(remote.read("x").unwrap(), 5.0);

        remote.write("x", 7.0).unwrap();
        // The next get on the same connection flushes the set past the
        // sequential server loop.
        assert_eq!(remote.read("x").unwrap(), 7.0);
        assert_eq!(x.read().unwrap(), 7.0);

        handle.stop().unwrap();
    }

    #[test]
    fn proxy_cells_behave_like_parameters() {
        let (handle, addr, _x) = hosted_rig();
        let remote = RemoteInstrument::connect(addr, &rig_template()).unwrap();

        let proxy = remote.parameter("x").unwrap();
        proxy.write(2.5).unwrap();
        assert_eq!(proxy.read().unwrap(), 2.5);

        // Mirrored measurements are read-only proxies.
        let temp = remote.parameter("temp").unwrap();
        assert_eq!(temp.access(), Access::ReadOnly);
        assert_eq!(temp.read().unwrap(), 293.0);
        assert!(matches!(temp.write(0.0), Err(Error::ReadOnly(_))));

        handle.stop().unwrap();
    }

    #[test]
    fn rejected_remote_set_is_silently_dropped() {
        let (handle, addr, x) = hosted_rig();
        let remote = RemoteInstrument::connect(addr, &rig_template()).unwrap();

        // 99 violates the server-side [0, 10] bounds. The base protocol
        // offers no error channel for set, so the write "succeeds" here.
        remote.write("x", 99.0).unwrap();
        assert_eq!(remote.read("x").unwrap(), 5.0);
        assert_eq!(x.read().unwrap(), 5.0);

        handle.stop().unwrap();
    }

    #[test]
    fn call_round_trips_json_arguments() {
        let (handle, addr, _x) = hosted_rig();
        let remote = RemoteInstrument::connect(addr, &rig_template()).unwrap();

        let mut kwargs = Map::new();
        kwargs.insert("extra".into(), json!(3));
        let result = remote
            .call("add", vec![json!(1), json!(2)], kwargs)
            .unwrap();
        assert_eq!(result, json!(6.0));

        // Unknown methods reply null rather than stalling the session.
        let result = remote.call("missing", vec![], Map::new()).unwrap();
        assert_eq!(result, Value::Null);
        assert_eq!(remote.read("x").unwrap(), 5.0);

        handle.stop().unwrap();
    }

    #[test]
    fn template_name_absent_from_server_reads_as_unset() {
        let (handle, addr, _x) = hosted_rig();
        let mut template = rig_template();
        template.declare(Parameter::new("ghost")).unwrap();
        let remote = RemoteInstrument::connect(addr, &template).unwrap();

        assert!(matches!(
            remote.read("ghost"),
            Err(Error::UnsetValue(name)) if name == "ghost"
        ));
        // The session survives the unknown name.
        assert_eq!(remote.read("x").unwrap(), 5.0);

        handle.stop().unwrap();
    }

    #[test]
    fn name_never_mirrored_fails_locally() {
        let (handle, addr, _x) = hosted_rig();
        let remote = RemoteInstrument::connect(addr, &rig_template()).unwrap();
        assert!(matches!(
            remote.read("nope"),
            Err(Error::UnknownParameter(_))
        ));
        handle.stop().unwrap();
    }

    #[test]
    fn nested_registries_mirror_under_dotted_names() {
        let mut inst = Instrument::new("rig");
        let mut laser = Instrument::new("laser");
        let power = laser
            .declare(Parameter::with_value("power", 0.5))
            .unwrap();
        inst.attach(laser).unwrap();

        let server = InstrumentServer::bind("127.0.0.1:0", inst).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.start().unwrap();

        let mut template = Instrument::new("rig");
        let mut laser = Instrument::new("laser");
        laser.declare(Parameter::new("power")).unwrap();
        template.attach(laser).unwrap();

        let remote = RemoteInstrument::connect(addr, &template).unwrap();
        assert_eq!(remote.read("laser.power").unwrap(), 0.5);
        remote.write("laser.power", 0.75).unwrap();
        assert_eq!(remote.read("laser.power").unwrap(), 0.75);
        assert_eq!(power.read().unwrap(), 0.75);

        handle.stop().unwrap();
    }

    #[test]
    fn stop_is_deterministic_with_and_without_a_client() {
        // No client ever connects.
        let server = InstrumentServer::bind("127.0.0.1:0", Instrument::new("idle")).unwrap();
        server.start().unwrap().stop().unwrap();

        // A client is mid-session.
        let (handle, addr, _x) = hosted_rig();
        let remote = RemoteInstrument::connect(addr, &rig_template()).unwrap();
        assert_eq!(remote.read("x").unwrap(), 5.0);
        handle.stop().unwrap();
    }

    #[test]
    fn client_disconnect_ends_the_session_cleanly() {
        let (handle, addr, _x) = hosted_rig();
        {
            let remote = RemoteInstrument::connect(addr, &rig_template()).unwrap();
            assert_eq!(remote.read("x").unwrap(), 5.0);
        }
        // Peer hung up; the loop exits Ok and stop() just joins.
        handle.stop().unwrap();
    }
}
