use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpListener};
use std::path::Path;
use std::thread::JoinHandle;
use std::time::Duration;

use clamwire_client::protocol::{read_chunks, DEFAULT_MAX_STREAM_LEN};
use clamwire_client::ClamdClient;
use clamwire_core::{ClamdError, ClientConfig, ScanMode, ServerFileSeparator};

/// What the mock daemon saw on one connection.
#[derive(Debug)]
struct Received {
    /// Request line without its terminator.
    line: String,
    /// INSTREAM payload, reassembled.
    payload: Option<Vec<u8>>,
}

/// Mock clamd: serves one connection per canned reply, in order, then exits.
fn mock_clamd(replies: Vec<&'static str>) -> (ClientConfig, JoinHandle<Vec<Received>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = std::thread::spawn(move || {
        let mut seen = Vec::new();
        for reply in replies {
            let (conn, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(conn);

            let mut line = Vec::new();
            let terminator = match reader.fill_buf().unwrap().first() {
                Some(b'n') => b'\n',
                _ => b'\0',
            };
            reader.read_until(terminator, &mut line).unwrap();
            line.pop();
            let line = String::from_utf8(line).unwrap();

            let payload = (line == "zINSTREAM")
                .then(|| read_chunks(&mut reader, DEFAULT_MAX_STREAM_LEN).unwrap());

            let conn = reader.get_mut();
            conn.write_all(reply.as_bytes()).unwrap();
            conn.flush().unwrap();
            seen.push(Received { line, payload });
        }
        seen
    });

    let config = ClientConfig {
        connect_timeout_ms: 1_000,
        read_timeout_ms: 5_000,
        ..ClientConfig::new("127.0.0.1", port)
    };
    (config, handle)
}

#[test]
fn ping_version_and_stats() {
    let (config, server) = mock_clamd(vec![
        "PONG\0",
        "ClamAV 1.0.5/27210/Tue Mar 12 08:35:00 2024\0",
        "ClamAV 1.0.5/27210| COMMANDS: SCAN PING INSTREAM\0",
        "POOLS: 1\n\nSTATE: VALID PRIMARY\nEND\0",
    ]);
    let client = ClamdClient::new(&config);

    assert!(client.ping().unwrap());
    assert!(client.version().unwrap().starts_with("ClamAV 1.0.5"));
    assert_eq!(
        client.version_commands().unwrap(),
        vec!["SCAN", "PING", "INSTREAM"]
    );
    assert!(client.stats().unwrap().ends_with("END"));

    let lines: Vec<String> = server.join().unwrap().into_iter().map(|r| r.line).collect();
    assert_eq!(lines, ["zPING", "zVERSION", "zVERSIONCOMMANDS", "zSTATS"]);
}

#[test]
fn last_run_details_track_latest_exchange() {
    let (config, server) = mock_clamd(vec!["PONG\0", "RELOADING\0"]);
    let client = ClamdClient::new(&config);

    client.ping().unwrap();
    assert_eq!(client.last_command_run_details().unwrap().command, "zPING\\0");

    client.reload_virus_databases().unwrap();
    let details = client.last_command_run_details().unwrap();
    assert_eq!(details.command, "zRELOAD\\0");
    assert_eq!(details.response, "RELOADING\0");

    server.join().unwrap();
}

#[test]
fn scan_sends_server_path() {
    let (mut config, server) = mock_clamd(vec!["\\srv\\in\\a.txt: OK\0"]);
    config.file_separator = ServerFileSeparator::Windows;
    let client = ClamdClient::new(&config);

    let result = client.scan(Path::new("/srv/in/a.txt"), ScanMode::Scan).unwrap();
    assert!(result.is_ok());

    let seen = server.join().unwrap();
    assert_eq!(seen[0].line, "zSCAN \\srv\\in\\a.txt");
    assert!(seen[0].payload.is_none());
}

#[test]
fn contscan_reports_detections() {
    let (config, server) = mock_clamd(vec![
        "/d/a: OK\0/d/b: Eicar-Test-Signature FOUND\0/d/c: Sig-2 FOUND\0",
    ]);
    let client = ClamdClient::new(&config);

    let result = client.scan(Path::new("/d"), ScanMode::Cont).unwrap();
    let detections = result.detections().unwrap();
    assert_eq!(detections["/d/b"], ["Eicar-Test-Signature"]);
    assert_eq!(detections["/d/c"], ["Sig-2"]);

    assert_eq!(server.join().unwrap()[0].line, "zCONTSCAN /d");
}

#[test]
fn instream_uploads_payload() {
    let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let (mut config, server) = mock_clamd(vec!["stream: Eicar-Test-Signature FOUND\0"]);
    config.chunk_size = 1024;
    let client = ClamdClient::new(&config);

    let result = client.scan_stream(&data[..]).unwrap();
    assert_eq!(
        result.detections().unwrap()["stream"],
        ["Eicar-Test-Signature"]
    );

    let seen = server.join().unwrap();
    assert_eq!(seen[0].line, "zINSTREAM");
    assert_eq!(seen[0].payload.as_deref(), Some(&data[..]));
}

#[test]
fn instream_of_empty_source() {
    let (config, server) = mock_clamd(vec!["stream: OK\0"]);
    let client = ClamdClient::new(&config);

    assert!(client.scan_stream(std::io::empty()).unwrap().is_ok());
    assert_eq!(server.join().unwrap()[0].payload.as_deref(), Some(&[][..]));
}

#[test]
fn scan_all_merges_results() {
    let (config, server) = mock_clamd(vec![
        "/a: Sig-1 FOUND\0",
        "/b: OK\0",
        "/a: Sig-1 FOUND\0",
    ]);
    let client = ClamdClient::new(&config);

    let result = client.scan_all(["/a", "/b", "/a"], ScanMode::Multi).unwrap();
    assert_eq!(result.detections().unwrap()["/a"], ["Sig-1", "Sig-1"]);
    assert_eq!(server.join().unwrap().len(), 3);
}

#[test]
fn daemon_errors_surface() {
    let (config, server) = mock_clamd(vec![
        "UNKNOWN COMMAND\0",
        "/nope: lstat() failed: No such file or directory. ERROR\0",
        "INSTREAM size limit exceeded. ERROR\0",
        "what?\0",
    ]);
    let client = ClamdClient::new(&config);

    assert!(matches!(
        client.version_commands(),
        Err(ClamdError::UnknownCommand("VERSIONCOMMANDS"))
    ));
    assert!(matches!(
        client.scan(Path::new("/nope"), ScanMode::Scan),
        Err(ClamdError::ScanFailure(_))
    ));
    assert!(matches!(
        client.scan_stream(&b"x"[..]),
        Err(ClamdError::ScanFailure(_))
    ));
    assert!(matches!(
        client.reload_virus_databases(),
        Err(ClamdError::InvalidResponse { command: "RELOAD", .. })
    ));

    server.join().unwrap();
}

#[test]
fn oversized_instream_reports_daemon_answer() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    // clamd stops reading at StreamMaxLength, answers and closes.
    let server = std::thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();
        let mut consumed = vec![0u8; "zINSTREAM\0".len() + 256 * 1024];
        conn.read_exact(&mut consumed).unwrap();
        conn.write_all(b"INSTREAM size limit exceeded. ERROR\0").unwrap();
        conn.shutdown(Shutdown::Write).unwrap();
    });

    let client = ClamdClient::new(&ClientConfig {
        read_timeout_ms: 5_000,
        ..ClientConfig::new("127.0.0.1", port)
    });
    let data = vec![0u8; 32 * 1024 * 1024];
    let err = client.scan_stream_chunked(&data[..], 64 * 1024).unwrap_err();
    assert!(
        matches!(&err, ClamdError::ScanFailure(text) if text.contains("size limit exceeded")),
        "unexpected error {err:?}"
    );
    let details = client.last_command_run_details().unwrap();
    assert_eq!(details.command, "zINSTREAM\\0");
    assert!(details.response.starts_with("INSTREAM size limit exceeded"));

    server.join().unwrap();
}

#[test]
fn read_timeout_is_communication_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let (conn, _) = listener.accept().unwrap();
        std::thread::sleep(Duration::from_millis(800));
        drop(conn);
    });

    let client = ClamdClient::new(&ClientConfig {
        read_timeout_ms: 100,
        ..ClientConfig::new("127.0.0.1", port)
    });
    assert!(client.ping().unwrap_err().is_communication());
    assert!(client.last_command_run_details().is_none());

    server.join().unwrap();
}
