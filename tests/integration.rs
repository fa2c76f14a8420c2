//! End-to-end behaviour against a real `bash` (and `sh` for the POSIX
//! dialect).

use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;

use shx::process::StdinSource;
use shx::{Arg, Dialect, ExecError, PipeFailure, QuotingError, Shell, Signal, StdinMode, sh};

fn shell() -> Shell {
    Shell::default().quiet()
}

fn no_args() -> Vec<Arg> {
    Vec::new()
}

macro_rules! round_trip {
    ($name:ident, $value:expr) => {
        #[tokio::test]
        async fn $name() {
            let value: &str = $value;
            let out = sh!(shell() => "printf '%s' {}", value)
                .unwrap()
                .await
                .unwrap();
            assert_eq!(out.stdout(), value, "value: {:?}", value);
        }
    };
}

// ── Quoting round-trips through bash ──

round_trip!(round_trip_empty, "");
round_trip!(round_trip_plain_word, "hello");
round_trip!(round_trip_spaces, "a  b   c");
round_trip!(round_trip_single_quote, "it's");
round_trip!(round_trip_double_quotes, "say \"hi\"");
round_trip!(round_trip_dollar, "$HOME ${PATH} $1");
round_trip!(round_trip_backticks, "`whoami`");
round_trip!(round_trip_command_substitution, "$(id -u)");
round_trip!(round_trip_newlines, "line one\nline two\n");
round_trip!(round_trip_tab_and_cr, "a\tb\rc");
round_trip!(round_trip_backslashes, "C:\\path\\n\\t");
round_trip!(round_trip_glob, "*.rs ?[a-z]");
round_trip!(round_trip_operators, "a; b && c | d > e");
round_trip!(round_trip_leading_dash, "-n");
round_trip!(round_trip_unicode, "héllo wörld ✓");
round_trip!(round_trip_history_bang, "wow!");

#[tokio::test]
async fn posix_dialect_round_trip() {
    let posix = shell().with_dialect(Dialect::Posix);
    for value in ["", "it's", "$HOME", "a\nb", "`x`"] {
        let out = sh!(posix => "printf '%s' {}", value).unwrap().await.unwrap();
        assert_eq!(out.stdout(), value);
    }
}

#[tokio::test]
async fn nul_is_rejected_before_spawning() {
    let err = sh!(shell() => "echo {}", "a\0b").unwrap_err();
    assert!(matches!(
        err,
        ExecError::Quoting(QuotingError::Nul { offset: 1, .. })
    ));
}

// ── Injection safety ──

#[tokio::test]
async fn interpolated_syntax_is_never_executed() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("pwned");
    let payload = format!("; touch {}", marker.display());
    let out = sh!(shell() => "echo {}", payload.as_str())
        .unwrap()
        .await
        .unwrap();
    assert_eq!(out.stdout(), format!("{payload}\n"));
    assert!(!marker.exists());
}

#[tokio::test]
async fn sequences_become_separate_words() {
    let files = vec!["a b", "c"];
    let out = sh!(shell() => "printf '<%s>' {}", &files)
        .unwrap()
        .await
        .unwrap();
    assert_eq!(out.stdout(), "<a b><c>");
}

#[tokio::test]
async fn echo_keeps_embedded_quotes() {
    let out = shell().args(["echo", "f\"o\"o"]).unwrap().await.unwrap();
    assert_eq!(out.stdout(), "f\"o\"o\n");
}

// ── Exit status and nothrow ──

#[tokio::test]
async fn false_raises_command_failure() {
    let err = sh!(shell() => "false").unwrap().await.unwrap_err();
    match &err {
        ExecError::CommandFailure { code, output } => {
            assert_eq!(*code, 1);
            assert_eq!(output.command(), "false");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn false_with_nothrow_yields_result() {
    let result = sh!(shell() => "false").unwrap().nothrow().await.unwrap();
    assert_eq!(result.exit_code(), Some(1));
    assert!(!result.success());
}

#[tokio::test]
async fn exact_exit_code_and_stderr_are_reported() {
    let err = sh!(shell() => "echo boom >&2; exit 2")
        .unwrap()
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
    let text = err.to_string();
    assert!(text.contains("Misuse of shell builtins"), "{text}");
    assert!(text.contains("boom"), "{text}");
    assert_eq!(err.output().map(|o| o.stderr().into_owned()), Some("boom\n".into()));
}

#[tokio::test]
async fn prefix_enables_pipefail() {
    let err = sh!(shell() => "false | cat").unwrap().await.unwrap_err();
    assert_eq!(err.exit_code(), 1);
    let lenient = shell().with_prefix("");
    assert!(sh!(lenient => "false | cat").unwrap().await.is_ok());
}

#[tokio::test]
async fn spawn_failure_is_raised_even_with_nothrow() {
    let broken = shell().with_shell("/nonexistent/shx-shell").nothrow();
    let handle = sh!(broken => "true").unwrap();
    assert_eq!(handle.pid(), None);
    let err = handle.await.unwrap_err();
    assert!(matches!(err, ExecError::Spawn { .. }), "{err:?}");
    assert_eq!(err.exit_code(), shx::error::exit::OSERR);
}

// ── Environment and working directory ──

#[tokio::test]
async fn env_and_cwd_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let scoped = shell().with_env("SHX_TEST_VALUE", "v 1").with_cwd(dir.path());
    let out = sh!(scoped => "printf '%s|' \"$SHX_TEST_VALUE\"; pwd -P")
        .unwrap()
        .await
        .unwrap();
    let canonical = dir.path().canonicalize().unwrap();
    assert_eq!(out.stdout(), format!("v 1|{}\n", canonical.display()));
    // The base context is untouched
    assert!(shell().options().env.is_empty());
}

// ── Stdin ──

#[tokio::test]
async fn cat_piped_to_wc_counts_written_lines() {
    let sh = shell();
    let lines = sh!(sh => "cat")
        .unwrap()
        .pipe(sh.build("wc -l", no_args()).unwrap());
    lines.write_stdin("one\ntwo\nthree\n").await.unwrap();
    lines.close_stdin();
    let out = lines.await.unwrap();
    assert_eq!(out.stdout().trim(), "3");
}

#[tokio::test]
async fn awaiting_closes_unclaimed_stdin() {
    let handle = sh!(shell() => "cat").unwrap();
    handle.write_stdin(b"partial").await.unwrap();
    let out = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("cat should see EOF")
        .unwrap();
    assert_eq!(out.stdout(), "partial");
}

#[tokio::test]
async fn forwarded_source_reaches_child() {
    let source = Arc::new(StdinSource::new("test", &b"one\ntwo\n"[..]));
    let forwarding = shell().with_stdin_source(source);
    let out = sh!(forwarding => "cat").unwrap().await.unwrap();
    assert_eq!(out.stdout(), "one\ntwo\n");
}

#[tokio::test]
async fn forwarded_input_arrives_while_child_runs() {
    let (mut writer, reader) = tokio::io::duplex(64);
    let source = Arc::new(StdinSource::new("typed", reader));
    let forwarding = shell().with_stdin_source(source);
    let handle = sh!(forwarding => "while read -r line; do echo \"got $line\"; done").unwrap();

    let started = Instant::now();
    writer.write_all(b"foo\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!handle.is_settled());
    writer.write_all(b"bar\n").await.unwrap();
    drop(writer);

    let out = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("child should see EOF once the writer is gone")
        .unwrap();
    assert_eq!(out.stdout(), "got foo\ngot bar\n");
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn busy_source_is_rejected() {
    let (_writer, reader) = tokio::io::duplex(64);
    let source = Arc::new(StdinSource::new("busy", reader));
    let held = source.try_lease().unwrap();
    let handle = sh!(shell() => "cat").unwrap();
    assert!(matches!(
        handle.forward_stdin(&source),
        Err(ExecError::StdinBusy)
    ));
    drop(held);
    handle.close_stdin();
    handle.await.unwrap();
}

// ── Pipelines ──

#[tokio::test]
async fn pipe_matches_feeding_stdin_directly() {
    let sh = shell();
    let piped = sh!(sh => "printf 'b\\na\\nc\\n'")
        .unwrap()
        .pipe(sh.build("sort", no_args()).unwrap())
        .await
        .unwrap();

    let direct = sh!(sh => "sort").unwrap();
    direct.write_stdin("b\na\nc\n").await.unwrap();
    let direct = direct.await.unwrap();

    assert_eq!(piped.stdout(), direct.stdout());
    assert_eq!(piped.stdout(), "a\nb\nc\n");
}

#[tokio::test]
async fn pipe_into_running_handle_and_chain() {
    let sh = shell();
    let upper = sh!(sh => "tr a-z A-Z").unwrap();
    let out = sh!(sh => "echo hello")
        .unwrap()
        .pipe(upper)
        .pipe(sh.build("tr -d E", no_args()).unwrap())
        .await
        .unwrap();
    assert_eq!(out.stdout(), "HLLO\n");
}

#[tokio::test]
async fn early_exiting_sink_ends_endless_source() {
    let sh = shell();
    let pipeline = sh!(sh => "yes")
        .unwrap()
        .nothrow()
        .pipe(sh.build("head -n 1", no_args()).unwrap());
    let out = tokio::time::timeout(Duration::from_secs(5), pipeline)
        .await
        .expect("`yes` should see a broken pipe once `head` exits")
        .unwrap();
    assert_eq!(out.stdout(), "y\n");
}

#[tokio::test]
async fn upstream_failure_is_attributed_to_its_stage() {
    let sh = shell();
    let err = sh!(sh => "echo partial; exit 3")
        .unwrap()
        .pipe(sh.build("cat", no_args()).unwrap())
        .await
        .unwrap_err();
    match &err {
        ExecError::PipelineStage { index, source } => {
            assert_eq!(*index, 0);
            assert_eq!(source.exit_code(), 3);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(err.exit_code(), 3);
    assert_eq!(err.output().map(|o| o.stdout().into_owned()), Some("partial\n".into()));
}

#[tokio::test]
async fn nothrow_stage_is_not_reported() {
    let sh = shell();
    let out = sh!(sh => "echo x; exit 3")
        .unwrap()
        .nothrow()
        .pipe(sh.build("cat", no_args()).unwrap())
        .await
        .unwrap();
    assert_eq!(out.stdout(), "x\n");
}

#[tokio::test]
async fn all_policy_reports_every_failing_stage() {
    let sh = shell();
    let err = sh!(sh => "exit 3")
        .unwrap()
        .pipe(sh!(sh => "cat >/dev/null; exit 4").unwrap())
        .pipe_failure(PipeFailure::All)
        .await
        .unwrap_err();
    match err {
        ExecError::PipelineStages { failures } => {
            let codes: Vec<(usize, i32)> = failures
                .iter()
                .map(|f| (f.index, f.error.exit_code()))
                .collect();
            assert_eq!(codes, vec![(0, 3), (1, 4)]);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn sink_without_stdin_pipe_is_reported() {
    let sh = shell();
    let closed = sh.with_stdin(StdinMode::Null);
    let err = sh!(sh => "echo a")
        .unwrap()
        .pipe(sh!(closed => "cat").unwrap())
        .await
        .unwrap_err();
    assert!(
        matches!(err, ExecError::PipeUnavailable { index: 1 }),
        "{err:?}"
    );
}

// ── Timeouts, signals, parallelism ──

#[tokio::test]
async fn timeout_settles_as_timeout_failure() {
    let started = Instant::now();
    let err = sh!(shell() => "sleep 5")
        .unwrap()
        .timeout(Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(3));
    match err {
        ExecError::Timeout { after, output } => {
            assert_eq!(after, Duration::from_millis(200));
            assert_eq!(output.timed_out(), Some(after));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn timeout_escalates_past_ignored_signal() {
    let started = Instant::now();
    let patient = shell().with_timeout(Duration::from_millis(200));
    let result = sh!(patient => "trap '' TERM; sleep 10")
        .unwrap()
        .nothrow()
        .await
        .unwrap();
    // Default grace period is two seconds before SIGKILL.
    assert!(started.elapsed() < Duration::from_secs(6));
    assert_eq!(result.timed_out(), Some(Duration::from_millis(200)));
    assert!(!result.success());
}

#[tokio::test]
async fn kill_settles_as_signal_termination() {
    let handle = sh!(shell() => "sleep 5").unwrap();
    handle.kill(Signal::Kill);
    match handle.await.unwrap_err() {
        ExecError::SignalTermination { signal, .. } => assert_eq!(signal, "SIGKILL"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn timeout_reaches_background_job_holding_stdout() {
    let started = Instant::now();
    let err = sh!(shell() => "sleep 8 & echo started")
        .unwrap()
        .timeout(Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(4));
    match err {
        ExecError::Timeout { output, .. } => assert_eq!(output.stdout(), "started\n"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn kill_reaches_background_job_after_shell_exits() {
    let handle = sh!(shell() => "sleep 8 & echo started").unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let started = Instant::now();
    handle.kill(Signal::Kill);
    let result = handle.nothrow().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(result.stdout(), "started\n");
}

#[tokio::test]
async fn unawaited_commands_run_in_parallel() {
    let started = Instant::now();
    let a = sh!(shell() => "sleep 0.5").unwrap();
    let b = sh!(shell() => "sleep 0.5").unwrap();
    a.await.unwrap();
    b.await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(950));
}

// ── Output reuse ──

#[tokio::test]
async fn settled_output_interpolates_quoted() {
    let name = sh!(shell() => "echo 'a b; c'").unwrap().await.unwrap();
    let out = sh!(shell() => "printf '<%s>' {}", &name)
        .unwrap()
        .await
        .unwrap();
    assert_eq!(out.stdout(), "<a b; c>");
}

#[tokio::test]
async fn settled_handle_displays_trimmed_stdout() {
    let handle = sh!(shell() => "echo value").unwrap();
    assert_eq!(handle.exit_code().await, Some(0));
    assert!(handle.is_settled());
    assert_eq!(handle.to_string(), "value");
    let out = sh!(shell() => "printf '%s' {}", &handle).unwrap().await.unwrap();
    assert_eq!(out.stdout(), "value");
}

#[tokio::test]
async fn pending_handle_cannot_be_interpolated() {
    let pending = sh!(shell() => "sleep 1").unwrap();
    let err = shell().build("echo {}", [&pending]).unwrap_err();
    assert!(matches!(err, QuotingError::Unsettled { .. }));
    pending.kill(Signal::Kill);
    pending.nothrow().await.unwrap();
}

// ── The shx binary ──

fn shx(args: &[&str]) -> Output {
    let home = tempfile::tempdir().unwrap();
    Command::new(env!("CARGO_BIN_EXE_shx"))
        .args(args)
        .env("HOME", home.path())
        .stdin(Stdio::null())
        .output()
        .unwrap()
}

#[test]
fn output_is_echoed_unless_quiet() {
    let loud = shx(&["-e", "echo out; echo err >&2"]);
    assert!(loud.status.success());
    assert_eq!(String::from_utf8_lossy(&loud.stdout), "out\n");
    assert!(String::from_utf8_lossy(&loud.stderr).contains("err\n"));

    let quiet = shx(&["--quiet", "-e", "echo out; echo err >&2"]);
    assert!(quiet.status.success());
    assert!(quiet.stdout.is_empty());
    assert!(!String::from_utf8_lossy(&quiet.stderr).contains("err"));
}

#[test]
fn verbose_prints_command_to_stderr() {
    let out = shx(&["--verbose", "--quiet", "-e", "true"]);
    assert!(out.status.success());
    assert!(out.stdout.is_empty());
    assert!(String::from_utf8_lossy(&out.stderr).contains("$ true\n"));
}

#[test]
fn failing_command_sets_exit_status() {
    let out = shx(&["--quiet", "-e", "exit 3"]);
    assert_eq!(out.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&out.stderr).contains("-e:1"));
}
