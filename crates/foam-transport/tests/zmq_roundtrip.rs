//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Loopback tests for the ZeroMQ consumer."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::thread;
use std::time::Duration;

use anyhow::Result;
use apache_avro::types::Value;
use foam_common::{DeserializerKind, SocketMode};
use foam_transport::{Consumer, TransportError, ZmqConsumer};

fn bind(context: &zmq::Context, kind: zmq::SocketType) -> Result<(zmq::Socket, String)> {
    let socket = context.socket(kind)?;
    socket.bind("tcp://127.0.0.1:*")?;
    let endpoint = socket
        .get_last_endpoint()?
        .map_err(|_| anyhow::anyhow!("endpoint is not utf-8"))?;
    Ok((socket, endpoint))
}

#[test]
fn pull_socket_receives_pushed_json() -> Result<()> {
    let context = zmq::Context::new();
    let (push, endpoint) = bind(&context, zmq::PUSH)?;

    let mut consumer = ZmqConsumer::connect(
        &endpoint,
        SocketMode::Pull,
        DeserializerKind::Json,
        Duration::from_millis(2000),
    )?;
    push.send(r#"{"trainId": 10, "detector": "AGIPD"}"#, 0)?;

    let record = consumer.next()?;
    assert_eq!(record["trainId"], Value::Long(10));
    assert_eq!(record["detector"], Value::String("AGIPD".into()));
    Ok(())
}

#[test]
fn idle_pull_socket_times_out() -> Result<()> {
    let context = zmq::Context::new();
    let (_push, endpoint) = bind(&context, zmq::PUSH)?;
    let mut consumer = ZmqConsumer::connect(
        &endpoint,
        SocketMode::Pull,
        DeserializerKind::Json,
        Duration::from_millis(50),
    )?;
    assert!(matches!(consumer.next(), Err(TransportError::Timeout)));
    Ok(())
}

#[test]
fn req_socket_requests_before_each_receive() -> Result<()> {
    let context = zmq::Context::new();
    let (rep, endpoint) = bind(&context, zmq::REP)?;
    let server = thread::spawn(move || -> Result<Vec<Vec<u8>>> {
        let mut requests = Vec::new();
        for index in 0..2 {
            requests.push(rep.recv_bytes(0)?);
            rep.send(format!(r#"{{"index": {index}}}"#).as_str(), 0)?;
        }
        Ok(requests)
    });

    let mut consumer = ZmqConsumer::connect(
        &endpoint,
        SocketMode::Req,
        DeserializerKind::Json,
        Duration::from_millis(2000),
    )?;
    assert_eq!(consumer.next()?["index"], Value::Long(0));
    assert_eq!(consumer.next()?["index"], Value::Long(1));

    let requests = server
        .join()
        .map_err(|_| anyhow::anyhow!("server thread panicked"))??;
    assert_eq!(requests.len(), 2);
    Ok(())
}
