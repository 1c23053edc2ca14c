//! The console host as a child process.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

fn write_fallback_config(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("updogo.toml");
    let mut file = std::fs::File::create(&path).expect("create config");
    writeln!(
        file,
        r#"[capabilities]
force_fallback = ["tts", "stt", "emotion", "nlp", "camera", "image_save"]

[supervisor]
shutdown_timeout_ms = 500
terminate_grace_ms = 200

[image_save]
directory = "{}"
"#,
        dir.join("snapshots").display()
    )
    .expect("write config");
    path
}

/// Forward the child's stdout lines so the test can wait with a deadline.
fn stdout_lines(child: &mut Child) -> mpsc::Receiver<String> {
    let stdout = child.stdout.take().expect("piped stdout");
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn wait_for_line(lines: &mpsc::Receiver<String>, needle: &str) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let line = lines
            .recv_timeout(remaining)
            .unwrap_or_else(|_| panic!("host never printed {needle:?}"));
        if line.contains(needle) {
            return;
        }
    }
}

#[cfg(unix)]
#[test]
fn host_exits_on_interrupt_while_stdin_stays_open() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_fallback_config(dir.path());

    let mut child = Command::new(env!("CARGO_BIN_EXE_updogo-host"))
        .arg("--config")
        .arg(&config)
        .arg("run")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env("RUST_LOG", "warn")
        .spawn()
        .expect("spawn host");
    // Held open for the whole test: the host must not wait for EOF.
    let _stdin = child.stdin.take().expect("piped stdin");
    let lines = stdout_lines(&mut child);
    wait_for_line(&lines, "voices, using dummy_voice_en");

    let status = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .expect("run kill");
    assert!(status.success());

    let deadline = Instant::now() + Duration::from_secs(10);
    let exit = loop {
        if let Some(exit) = child.try_wait().expect("poll host") {
            break exit;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("host still running 10s after SIGINT with stdin open");
        }
        std::thread::sleep(Duration::from_millis(50));
    };
    assert!(exit.success(), "host exited with {exit}");
}

#[test]
fn quit_command_ends_the_host() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_fallback_config(dir.path());

    let mut child = Command::new(env!("CARGO_BIN_EXE_updogo-host"))
        .arg("--config")
        .arg(&config)
        .arg("run")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env("RUST_LOG", "warn")
        .spawn()
        .expect("spawn host");
    let mut stdin = child.stdin.take().expect("piped stdin");
    let lines = stdout_lines(&mut child);
    wait_for_line(&lines, "Type /help for commands.");

    writeln!(stdin, "who is your creator").expect("write");
    wait_for_line(&lines, "I was created by Umar Ibrahim.");
    writeln!(stdin, "/quit").expect("write");

    let deadline = Instant::now() + Duration::from_secs(10);
    let exit = loop {
        if let Some(exit) = child.try_wait().expect("poll host") {
            break exit;
        }
        assert!(Instant::now() < deadline, "host ignored /quit");
        std::thread::sleep(Duration::from_millis(50));
    };
    assert!(exit.success());
    drop(stdin);
}
