//! CLI contract tests for the tormon binary.
//!
//! Contract guarantees tested:
//! - `--help` documents every environment variable
//! - Invalid configuration exits 64 with a remediation hint
//! - `--check` validates and exits 0 without touching the network
//! - Startup failures map to exit codes 1 (sink), 2 (control), 3 (auth)
//! - The control password never appears in output
//! - SIGTERM after startup exits 0

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const ENV_VARS: &[&str] = &[
    "TORMON_CONFIG",
    "TOR_FP",
    "INFLUX_HOST",
    "INFLUX_PORT",
    "INFLUX_DB",
    "TAG_HOST",
    "TORCONTROL_HOST",
    "TORCONTROL_PORT",
    "TORCONTROL_PASSWORD",
    "TORCONTROL_COOKIE_FILE",
    "TORMON_LOG_LEVEL",
    "TORMON_LOG_FORMAT",
    "RUST_LOG",
];

// =============================================================================
// Fixture helpers
// =============================================================================

/// The binary with a clean environment.
fn tormon() -> Command {
    let mut cmd = Command::cargo_bin("tormon").expect("binary built");
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd
}

/// A local port with nothing listening on it.
fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}

/// Minimal HTTP responder answering 204 to every request.
fn spawn_fake_influx() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            answer_http(stream);
        }
    });
    port
}

fn answer_http(mut stream: TcpStream) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));
    let mut content_length = 0usize;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            return;
        }
        if line == "\r\n" {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    let _ = reader.read_exact(&mut body);
    let _ = stream.write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n");
}

/// Control port that answers every command with `reply`.
fn spawn_fake_tor(reply: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let mut writer = stream.try_clone().expect("clone");
            for line in BufReader::new(stream).lines() {
                if line.is_err() || writer.write_all(reply.as_bytes()).is_err() {
                    break;
                }
            }
        }
    });
    port
}

// =============================================================================
// Help and configuration
// =============================================================================

#[test]
fn help_lists_environment_variables() {
    let mut assert = tormon().arg("--help").assert().success();
    for var in ["TOR_FP", "INFLUX_HOST", "INFLUX_PORT", "INFLUX_DB", "TAG_HOST", "TORCONTROL_PASSWORD"] {
        assert = assert.stdout(predicate::str::contains(var));
    }
}

#[test]
fn missing_fingerprint_exits_64() {
    tormon()
        .assert()
        .code(64)
        .stderr(predicate::str::contains("missing required setting: fingerprint"))
        .stderr(predicate::str::contains("tormon --help"));
}

#[test]
fn password_and_cookie_together_exit_64() {
    tormon()
        .args(["--fingerprint", "ABCD", "--control-cookie-file", "/run/tor/cookie"])
        .env("TORCONTROL_PASSWORD", "hunter2")
        .assert()
        .code(64)
        .stderr(predicate::str::contains("mutually exclusive"))
        .stderr(predicate::str::contains("hunter2").not());
}

#[test]
fn unreadable_config_file_exits_64() {
    let dir = TempDir::new().expect("temp dir");
    tormon()
        .arg("--config")
        .arg(dir.path().join("missing.toml"))
        .assert()
        .code(64)
        .stderr(predicate::str::contains("missing.toml"));
}

#[test]
fn check_accepts_env_and_config_file() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("tormon.toml");
    std::fs::write(
        &path,
        "fingerprint = \"FROMFILE\"\n\n[sink]\ndatabase = \"relays\"\n\n[control]\nport = 9151\n",
    )
    .expect("write config");

    tormon()
        .args(["--check", "--config"])
        .arg(&path)
        .env("TOR_FP", "9695DFC35FFEB861329B9F1AB04C46397020CE31")
        .env("INFLUX_PORT", "18086")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "fingerprint=9695DFC35FFEB861329B9F1AB04C46397020CE31",
        ))
        .stdout(predicate::str::contains("sink=localhost:18086/relays"))
        .stdout(predicate::str::contains("control=127.0.0.1:9151"));
}

// =============================================================================
// Startup failures
// =============================================================================

#[test]
fn unreachable_sink_exits_1() {
    tormon()
        .args(["--fingerprint", "ABCD", "--influx-host", "127.0.0.1"])
        .args(["--influx-port", &closed_port().to_string()])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .code(1);
}

#[test]
fn unreachable_control_port_exits_2() {
    let influx = spawn_fake_influx();
    tormon()
        .args(["--fingerprint", "ABCD", "--influx-host", "127.0.0.1"])
        .args(["--influx-port", &influx.to_string()])
        .args(["--control-port", &closed_port().to_string()])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .code(2);
}

#[test]
fn rejected_authentication_exits_3() {
    let influx = spawn_fake_influx();
    let tor = spawn_fake_tor("515 Authentication failed: Password did not match\r\n");
    tormon()
        .args(["--fingerprint", "ABCD", "--influx-host", "127.0.0.1"])
        .args(["--influx-port", &influx.to_string()])
        .args(["--control-port", &tor.to_string()])
        .env("TORCONTROL_PASSWORD", "hunter2")
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .code(3)
        .stdout(predicate::str::contains("hunter2").not())
        .stderr(predicate::str::contains("hunter2").not());
}

// =============================================================================
// Shutdown
// =============================================================================

#[cfg(unix)]
#[test]
fn sigterm_exits_cleanly() {
    use std::process::{Command as StdCommand, Stdio};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    let influx = spawn_fake_influx();
    let tor = spawn_fake_tor("250 OK\r\n");

    let mut cmd = StdCommand::new(env!("CARGO_BIN_EXE_tormon"));
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    let mut child = cmd
        .args(["--fingerprint", "ABCD", "--influx-host", "127.0.0.1"])
        .args(["--influx-port", &influx.to_string()])
        .args(["--control-port", &tor.to_string()])
        .env("TORMON_LOG_FORMAT", "json")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn tormon");

    let stderr = child.stderr.take().expect("stderr");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                return;
            }
        }
    });

    let mut output = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(30);
    while !output.iter().any(|line: &String| line.contains("Authenticated")) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(line) => output.push(line),
            Err(err) => {
                let _ = child.kill();
                panic!("no startup line ({err}): {output:#?}");
            }
        }
    }

    let status = StdCommand::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .expect("run kill");
    assert!(status.success());

    let deadline = Instant::now() + Duration::from_secs(30);
    let exit = loop {
        if let Some(exit) = child.try_wait().expect("wait") {
            break exit;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("tormon did not exit after SIGTERM");
        }
        thread::sleep(Duration::from_millis(50));
    };
    output.extend(rx.iter());

    assert_eq!(exit.code(), Some(0), "{output:#?}");
    assert!(output.iter().any(|line| line.contains("\"Exit\"")), "{output:#?}");
}
