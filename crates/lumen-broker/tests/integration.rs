use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use lumen_broker::BrokerTask;
use lumen_core::Blackboard;
use lumen_scheduler::{Task, ThreadedTask};

fn connect(task: &BrokerTask) -> (TcpStream, BufReader<TcpStream>) {
    let write = TcpStream::connect(("127.0.0.1", task.local_port())).expect("connect");
    let read = BufReader::new(write.try_clone().unwrap());
    (write, read)
}

#[test]
fn unsubscribed_clients_receive_nothing_and_unknown_command_errors() {
    let mut task = BrokerTask::new("127.0.0.1", 0);
    task.setup().unwrap();
    task.setup_inthread().unwrap();

    let (mut w1, mut r1) = connect(&task);
    w1.write_all(br#"{"command":"nope"}"#).unwrap();
    w1.write_all(b"\n").unwrap();
    let mut line = String::new();
    r1.read_line(&mut line).unwrap();
    assert!(line.contains("\"code\":3"));

    // never subscribed -> a frame publish should produce nothing readable
    // right away (no data, so the socket just has no bytes queued).
    let mut bb = Blackboard::new(0.0);
    bb.audio = Some(vec![0.5]);
    task.run(&mut bb).unwrap();

    drop(w1);
    task.teardown_inthread();
}

#[test]
fn two_clients_can_hold_independent_subscriptions() {
    let mut task = BrokerTask::new("127.0.0.1", 0);
    task.setup().unwrap();
    task.setup_inthread().unwrap();

    let (mut w1, mut r1) = connect(&task);
    let (mut w2, mut r2) = connect(&task);

    w1.write_all(br#"{"command":"subscribe","params":{"events":["audio"]}}"#).unwrap();
    w1.write_all(b"\n").unwrap();
    let mut ack1 = String::new();
    r1.read_line(&mut ack1).unwrap();
    assert!(ack1.contains("audio"));

    w2.write_all(br#"{"command":"subscribe","params":{"events":[]}}"#).unwrap();
    w2.write_all(b"\n").unwrap();
    let mut ack2 = String::new();
    r2.read_line(&mut ack2).unwrap();
    assert!(ack2.contains("\"result\":[]"));

    let mut bb = Blackboard::new(0.0);
    bb.audio = Some(vec![1.0, 2.0]);
    task.run(&mut bb).unwrap();

    let mut published = String::new();
    r1.read_line(&mut published).unwrap();
    assert!(published.contains("\"command\":\"audio\""));
    assert!(published.contains('1') && published.contains('2'));

    task.teardown_inthread();
}

#[test]
fn restart_rebinds_a_fresh_listener() {
    let mut task = BrokerTask::new("127.0.0.1", 0);
    task.setup().unwrap();
    task.setup_inthread().unwrap();
    assert!(!task.has_failed());

    task.teardown_inthread();
    let mut fresh = task.restart();
    fresh.setup().unwrap();
    fresh.setup_inthread().unwrap();
    assert!(!fresh.has_failed());
    fresh.teardown_inthread();
}
