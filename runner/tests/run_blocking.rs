use std::time::{Duration, Instant};

use runner::errors::ProcessError;
use runner::{OutputStream, run_blocking};

fn sh(script: &str) -> (i32, Vec<(OutputStream, String)>) {
    let mut lines = Vec::new();
    let code = run_blocking(&["/bin/sh", "-c", script], |stream, line| {
        lines.push((stream, line.to_string()))
    })
    .unwrap();
    (code, lines)
}

#[test]
fn captures_both_streams_and_exit_code() {
    let (code, lines) = sh("echo checking; echo 'bad inode' >&2; echo done; exit 4");
    assert_eq!(code, 4);
    assert!(lines.contains(&(OutputStream::Stdout, "checking".to_string())));
    assert!(lines.contains(&(OutputStream::Stdout, "done".to_string())));
    assert!(lines.contains(&(OutputStream::Stderr, "bad inode".to_string())));
    assert_eq!(lines.len(), 3);
}

#[test]
fn preserves_line_order_within_a_stream() {
    let (code, lines) = sh("for i in 1 2 3 4 5; do echo line$i; done");
    assert_eq!(code, 0);
    let stdout: Vec<_> = lines
        .into_iter()
        .filter(|(stream, _)| *stream == OutputStream::Stdout)
        .map(|(_, line)| line)
        .collect();
    assert_eq!(stdout, ["line1", "line2", "line3", "line4", "line5"]);
}

#[test]
fn large_output_is_not_dropped() {
    let (code, lines) = sh("seq 1 20000");
    assert_eq!(code, 0);
    assert_eq!(lines.len(), 20000);
    assert_eq!(lines.last().unwrap().1, "20000");
}

#[test]
fn line_spanning_several_reads_stays_whole() {
    let (code, lines) = sh("head -c 10000 /dev/zero | tr '\\0' x; echo; echo tail");
    assert_eq!(code, 0);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].1, "x".repeat(10000));
    assert_eq!(lines[1].1, "tail");
}

#[test]
fn trailing_partial_line_is_emitted() {
    let (_, lines) = sh("printf 'no newline'");
    assert_eq!(lines, vec![(OutputStream::Stdout, "no newline".to_string())]);
}

#[test]
fn silent_child_returns_shortly_after_exit() {
    let start = Instant::now();
    let (code, lines) = sh("sleep 0.3; exit 1");
    assert_eq!(code, 1);
    assert!(lines.is_empty());
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[test]
fn signalled_child_reports_128_plus_signal() {
    let (code, _) = sh("kill -9 $$");
    assert_eq!(code, 128 + 9);
}

#[test]
fn missing_program_cannot_spawn() {
    let result = run_blocking(&["/nonexistent/fsck.ext9", "/dev/null"], |_, _| {});
    assert!(matches!(result, Err(ProcessError::Spawn { .. })));
}

#[test]
fn empty_argv_is_rejected() {
    let argv: [&str; 0] = [];
    assert!(matches!(
        run_blocking(&argv, |_, _| {}),
        Err(ProcessError::EmptyCommand)
    ));
}
