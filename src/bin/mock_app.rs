//! Mock application binary for integration testing
//!
//! Answers the debugging HTTP endpoints on the port passed as
//! `--remote-debugging-port=N` without any browser behind it.
//!
//! Flags:
//! - `--startup-delay-ms=N`: wait before binding the port
//! - `--ignore-term`: ignore SIGTERM so only SIGKILL stops the process
//! - `--record=PATH`: write the pid and working directory to PATH

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

fn main() {
    let mut port: Option<u16> = None;
    let mut startup_delay = Duration::ZERO;
    let mut ignore_term = false;
    let mut record: Option<String> = None;

    for arg in std::env::args().skip(1) {
        if let Some(value) = arg.strip_prefix("--remote-debugging-port=") {
            port = value.parse().ok();
        } else if let Some(value) = arg.strip_prefix("--startup-delay-ms=") {
            startup_delay = Duration::from_millis(value.parse().unwrap_or(0));
        } else if let Some(value) = arg.strip_prefix("--record=") {
            record = Some(value.to_string());
        } else if arg == "--ignore-term" {
            ignore_term = true;
        }
    }

    let Some(port) = port else {
        eprintln!("mock_app: missing --remote-debugging-port=N");
        std::process::exit(2);
    };

    if ignore_term {
        ignore_sigterm();
    }

    if let Some(path) = record {
        let cwd = std::env::current_dir()
            .map(|d| d.display().to_string())
            .unwrap_or_default();
        let _ = std::fs::write(path, format!("{}\n{}\n", std::process::id(), cwd));
    }

    std::thread::sleep(startup_delay);

    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("mock_app: cannot bind port {}: {}", port, e);
            std::process::exit(1);
        }
    };

    for stream in listener.incoming().flatten() {
        std::thread::spawn(move || handle(stream, port));
    }
}

fn handle(mut stream: TcpStream, port: u16) {
    let mut buf = [0u8; 2048];
    let n = stream.read(&mut buf).unwrap_or(0);
    let request = String::from_utf8_lossy(&buf[..n]);
    let path = request.split_whitespace().nth(1).unwrap_or("/");

    let body = match path {
        "/json/version" => format!(
            r#"{{"Browser":"mock_app/1.0","Protocol-Version":"1.3","webSocketDebuggerUrl":"ws://127.0.0.1:{}/devtools/browser/mock"}}"#,
            port
        ),
        "/json/list" | "/json" => "[]".to_string(),
        _ => "{}".to_string(),
    };

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

#[cfg(unix)]
fn ignore_sigterm() {
    // SAFETY: installing SIG_IGN has no preconditions
    unsafe {
        libc::signal(libc::SIGTERM, libc::SIG_IGN);
    }
}

#[cfg(not(unix))]
fn ignore_sigterm() {}
