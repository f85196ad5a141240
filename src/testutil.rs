//! Shared test fixtures: a one-shot canned HTTP server and an in-memory
//! zip builder. Test-only, never compiled into the binary.

use std::io::{Cursor, Read, Write};
use std::net::TcpListener;
use std::thread;
use zip::write::SimpleFileOptions;

/// Binds an ephemeral localhost port, answers exactly one request with the
/// canned response, then exits. Returns the base URL and the server thread;
/// joining the handle asserts the request actually arrived.
pub fn stub_http_once(
    status: u16,
    content_type: &str,
    body: &[u8],
) -> (String, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let content_type = content_type.to_string();
    let body = body.to_vec();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        // Drain the request head so the client never sees a reset.
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|window| window == b"\r\n\r\n") {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => head.extend_from_slice(&buf[..n]),
            }
        }
        let reason = match status {
            200 => "OK",
            404 => "Not Found",
            500 => "Internal Server Error",
            _ => "Canned",
        };
        let response_head = format!(
            "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(response_head.as_bytes()).unwrap();
        stream.write_all(&body).unwrap();
        let _ = stream.flush();
    });
    (base, handle)
}

/// Builds a zip archive in memory. Entry names ending in `/` become bare
/// directories.
pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, data) in entries {
        if name.ends_with('/') {
            writer
                .add_directory(name.trim_end_matches('/'), options)
                .unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}
