//! `BrokerTask`: a background TCP accept loop plus a UDP discovery-broadcast
//! loop, wired into the frame scheduler as a [`ThreadedTask`]. Grounded in
//! `components/network.py::NetworkThread`, reimplemented with a
//! `parking_lot`-guarded client table shared between the accept thread and
//! the per-frame publish call rather than `select()`.

use std::collections::HashMap;
use std::io::BufRead;
use std::net::{Shutdown, TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use lumen_core::Blackboard;
use lumen_scheduler::{Task, TaskError, ThreadedTask};

use crate::client::Client;
use crate::error::BrokerError;
use crate::protocol::{broadcast_line, process_line};

type ClientId = u64;
type ClientTable = Arc<Mutex<HashMap<ClientId, Client>>>;

/// Discovery UDP port, per spec.md §6 (also the default TCP port).
const DISCOVERY_PORT: u16 = 37_737;
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(2);
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct BrokerTask {
    host: String,
    port: u16,
    clients: ClientTable,
    next_client_id: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
    discovery_handle: Option<JoinHandle<()>>,
}

impl BrokerTask {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            clients: Arc::new(Mutex::new(HashMap::new())),
            next_client_id: Arc::new(AtomicU64::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
            failed: Arc::new(AtomicBool::new(false)),
            accept_handle: None,
            discovery_handle: None,
        }
    }

    /// The TCP port this task bound to. Differs from `self.port` when
    /// constructed with port `0` (used by tests to pick an ephemeral port).
    pub fn local_port(&self) -> u16 {
        self.port
    }
}

impl Task for BrokerTask {
    fn name(&self) -> &str {
        "broker"
    }

    /// Per frame, push `{command: "audio", params: {data}}` to every
    /// client subscribed to `"audio"`; drop any that have gone away.
    fn run(&mut self, blackboard: &mut Blackboard) -> Result<(), TaskError> {
        let line = broadcast_line("audio", serde_json::json!({ "data": blackboard.audio }));
        let mut clients = self.clients.lock();
        let mut dead = Vec::new();
        for (id, client) in clients.iter_mut() {
            if client.is_subscribed("audio") && client.send_line(&line).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            clients.remove(&id);
        }
        Ok(())
    }
}

impl ThreadedTask for BrokerTask {
    fn setup_inthread(&mut self) -> Result<(), TaskError> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr).map_err(|e| TaskError::new(BrokerError::Bind(addr, e)))?;
        self.port = listener.local_addr().map_err(TaskError::new)?.port();
        listener.set_nonblocking(true).map_err(TaskError::new)?;

        let clients = self.clients.clone();
        let next_id = self.next_client_id.clone();
        let stop = self.stop.clone();
        let failed = self.failed.clone();
        self.accept_handle = Some(std::thread::spawn(move || {
            accept_loop(&listener, &clients, &next_id, &stop, &failed);
        }));

        let port = self.port;
        let stop = self.stop.clone();
        let failed = self.failed.clone();
        self.discovery_handle = Some(std::thread::spawn(move || {
            discovery_loop(port, &stop, &failed);
        }));

        Ok(())
    }

    fn teardown_inthread(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for client in self.clients.lock().values() {
            let _ = client.stream.shutdown(Shutdown::Both);
        }
        if let Some(h) = self.accept_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.discovery_handle.take() {
            let _ = h.join();
        }
        self.clients.lock().clear();
    }

    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn restart(&self) -> Box<dyn ThreadedTask> {
        Box::new(BrokerTask::new(self.host.clone(), self.port))
    }
}

fn accept_loop(listener: &TcpListener, clients: &ClientTable, next_id: &Arc<AtomicU64>, stop: &Arc<AtomicBool>, failed: &Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                let id = next_id.fetch_add(1, Ordering::SeqCst);
                tracing::info!(client = %addr, id, "broker client connected");
                let write_half = match stream.try_clone() {
                    Ok(s) => s,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to clone broker client stream");
                        continue;
                    }
                };
                clients.lock().insert(id, Client::new(write_half));
                let clients = clients.clone();
                let stop = stop.clone();
                std::thread::spawn(move || client_read_loop(id, &stream, &clients, &stop));
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => {
                tracing::error!(error = %err, "broker accept loop failed");
                failed.store(true, Ordering::SeqCst);
                return;
            }
        }
    }
}

fn client_read_loop(id: ClientId, stream: &TcpStream, clients: &ClientTable, stop: &Arc<AtomicBool>) {
    let reader = std::io::BufReader::new(stream);
    for line in reader.lines() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let Ok(line) = line else { break };
        if line.is_empty() {
            continue;
        }
        let Some(response) = clients
            .lock()
            .get_mut(&id)
            .map(|client| process_line(line.as_bytes(), &mut client.subscriptions))
        else {
            break;
        };
        let mut table = clients.lock();
        let sent_ok = table.get_mut(&id).is_some_and(|client| client.send_line(&response).is_ok());
        if !sent_ok {
            table.remove(&id);
            break;
        }
    }
    clients.lock().remove(&id);
    tracing::info!(id, "broker client disconnected");
}

/// Broadcasts `partylights-server:<port>\n` to the LAN every two seconds so
/// clients can discover this broker without being told its address.
fn discovery_loop(port: u16, stop: &Arc<AtomicBool>, failed: &Arc<AtomicBool>) {
    let socket = match UdpSocket::bind("0.0.0.0:0") {
        Ok(s) => s,
        Err(err) => {
            tracing::error!(error = %BrokerError::UdpBind(err), "discovery broadcast disabled");
            failed.store(true, Ordering::SeqCst);
            return;
        }
    };
    if let Err(err) = socket.set_broadcast(true) {
        tracing::error!(error = %err, "failed to enable UDP broadcast");
        failed.store(true, Ordering::SeqCst);
        return;
    }
    let message = format!("partylights-server:{port}\n");
    let target = format!("255.255.255.255:{DISCOVERY_PORT}");

    while !stop.load(Ordering::SeqCst) {
        if let Err(err) = socket.send_to(message.as_bytes(), &target) {
            tracing::warn!(error = %err, "UDP discovery broadcast failed");
        }
        let mut waited = Duration::ZERO;
        while waited < DISCOVERY_INTERVAL {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(ACCEPT_POLL_INTERVAL);
            waited += ACCEPT_POLL_INTERVAL;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, Write};
    use std::net::TcpStream as ClientStream;

    #[test]
    fn subscribe_handshake_over_a_real_socket() {
        let mut task = BrokerTask::new("127.0.0.1", 0);
        task.setup().unwrap();
        task.setup_inthread().unwrap();
        let port = task.local_port();

        let mut client = ClientStream::connect(("127.0.0.1", port)).expect("connect to broker");
        client.write_all(br#"{"id":1,"command":"subscribe","params":{"events":["audio"]}}"#).unwrap();
        client.write_all(b"\n").unwrap();

        let mut reader = std::io::BufReader::new(client.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(line.contains("\"result\":[\"audio\"]"), "unexpected response: {line}");

        let mut bb = Blackboard::new(0.0);
        bb.audio = Some(vec![0.1, 0.2]);
        task.run(&mut bb).unwrap();

        let mut published = String::new();
        reader.read_line(&mut published).unwrap();
        assert!(published.contains("\"command\":\"audio\""), "unexpected publish: {published}");

        task.teardown_inthread();
    }
}
