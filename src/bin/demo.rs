//! Interactive demo: run one process as the server and any number of
//! others as clients, then type lines to exchange messages.

use std::error::Error;
use std::io::{self, BufRead, Write};

use udp_courier::{
    ClientHandlers, Peer, ServerHandlers, UdpClient, UdpServer, DEFAULT_LISTENER_COUNT,
};

struct PrintClientHandlers;

impl ClientHandlers for PrintClientHandlers {
    fn on_text_message(&self, message: String) {
        println!("server says: {message}");
    }

    fn on_bytes_message(&self, message: Vec<u8>) {
        println!("server sent {} bytes", message.len());
    }

    fn on_start(&self) {
        println!("client started");
    }

    fn on_terminate(&self) {
        println!("client terminated");
    }
}

struct PrintServerHandlers;

impl ServerHandlers for PrintServerHandlers {
    fn on_text_message(&self, message: String, peer: &Peer) {
        println!("[{}:{}] {message}", peer.address(), peer.port());
    }

    fn on_bytes_message(&self, message: Vec<u8>, peer: &Peer) {
        println!("[{}:{}] sent {} bytes", peer.address(), peer.port(), message.len());
    }

    fn on_start(&self) {
        println!("server started");
    }

    fn on_terminate(&self) {
        println!("server terminated");
    }
}

fn prompt(stdin: &mut impl BufRead, question: &str) -> Result<String, Box<dyn Error>> {
    print!("{question} ");
    io::stdout().flush()?;
    let mut line = String::new();
    stdin.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn run_server(stdin: &mut impl BufRead) -> Result<(), Box<dyn Error>> {
    let port: u16 = prompt(stdin, "port number?")?.parse()?;

    let server = UdpServer::listen(port, DEFAULT_LISTENER_COUNT)?;
    server.set_handlers(PrintServerHandlers)?;
    server.start()?;

    for line in stdin.lines() {
        let line = line?;
        if line.eq_ignore_ascii_case("quit") {
            server.terminate()?;
            break;
        }
        println!("broadcasting: {line}");
        server.broadcast_text(&line)?;
    }
    Ok(())
}

fn run_client(stdin: &mut impl BufRead) -> Result<(), Box<dyn Error>> {
    let host = prompt(stdin, "hostname?")?;
    let port: u16 = prompt(stdin, "port number?")?.parse()?;

    let client = UdpClient::connect(&host, port)?;
    client.set_handlers(PrintClientHandlers)?;
    client.start()?;

    for line in stdin.lines() {
        let line = line?;
        if line.eq_ignore_ascii_case("quit") {
            client.terminate()?;
            break;
        }
        println!("sending: {line}");
        client.send_text(&line)?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let stdin = io::stdin();
    let mut stdin = stdin.lock();

    let mode = prompt(&mut stdin, "run mode (client/server)?")?;
    if mode.eq_ignore_ascii_case("server") {
        run_server(&mut stdin)
    } else if mode.eq_ignore_ascii_case("client") {
        run_client(&mut stdin)
    } else {
        Err(format!("unknown run mode: {mode}").into())
    }
}
