//! shx: run a shell script, markdown file, or one command through the shx
//! engine.
//!
//! Each unit (the whole script, or each `sh`/`bash`/`shell` block of a
//! markdown file) runs as one command with the configured prefix. The first
//! unit that fails ends the run with that command's exit code.

use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use log::debug;
use shx::config::{self, Config};
use shx::error::exit as code;
use shx::script::{self, Location, Unit};
use shx::{QuotedCommand, Shell, StdinMode};

const USAGE: &str = "\
usage: shx [OPTIONS] (SCRIPT | -e COMMAND)

  SCRIPT           shell script or markdown file; `-` reads stdin
  -e COMMAND       run COMMAND instead of a script
  --shell PATH     shell binary
  --prefix TEXT    code run before every command
  --quiet          do not echo command output
  --verbose        print each command before running it
  --nothrow        keep going after a failing command
  --timeout MS     kill commands running longer than MS milliseconds
  --json           print each result as a JSON line
  --dump-config    print the effective configuration and exit";

#[derive(Debug, Default)]
struct Args {
    shell: Option<String>,
    prefix: Option<String>,
    quiet: bool,
    verbose: bool,
    nothrow: bool,
    timeout: Option<Duration>,
    json: bool,
    dump_config: bool,
    source: Option<Source>,
}

#[derive(Debug, PartialEq)]
enum Source {
    Script(PathBuf),
    Eval(String),
}

fn parse_args(mut argv: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut args = Args::default();
    let set_source = |args: &mut Args, source: Source| match args.source {
        Some(_) => Err("only one SCRIPT or -e COMMAND is allowed".to_string()),
        None => {
            args.source = Some(source);
            Ok(())
        }
    };
    while let Some(arg) = argv.next() {
        let mut value = |flag: &str| argv.next().ok_or(format!("{flag} needs a value"));
        match arg.as_str() {
            "-e" | "--eval" => {
                let command = value(arg.as_str())?;
                set_source(&mut args, Source::Eval(command))?;
            }
            "--shell" => args.shell = Some(value(arg.as_str())?),
            "--prefix" => args.prefix = Some(value(arg.as_str())?),
            "--timeout" => {
                let ms = value(arg.as_str())?;
                let ms: u64 = ms
                    .parse()
                    .map_err(|_| format!("--timeout expects milliseconds, got `{ms}`"))?;
                args.timeout = Some(Duration::from_millis(ms));
            }
            "--quiet" | "-q" => args.quiet = true,
            "--verbose" | "-v" => args.verbose = true,
            "--nothrow" => args.nothrow = true,
            "--json" => args.json = true,
            "--dump-config" => args.dump_config = true,
            "-" => set_source(&mut args, Source::Script(PathBuf::from("-")))?,
            flag if flag.starts_with('-') => return Err(format!("unknown option `{flag}`")),
            path => set_source(&mut args, Source::Script(PathBuf::from(path)))?,
        }
    }
    Ok(args)
}

fn shell_for(args: &Args, config: &Config) -> Result<Shell, config::ConfigError> {
    let mut shell = Shell::from_config(config)?;
    if let Some(path) = &args.shell {
        shell = shell.with_shell(config::resolve_shell(path, shell.dialect()));
    }
    if let Some(prefix) = &args.prefix {
        shell = shell.with_prefix(prefix.as_str());
    }
    if args.quiet || args.json {
        shell = shell.quiet();
    }
    if args.verbose {
        shell = shell.verbose();
    }
    if args.nothrow {
        shell = shell.nothrow();
    }
    if let Some(after) = args.timeout {
        shell = shell.with_timeout(after);
    }
    // Units are awaited at once, so a buffered pipe would only ever be
    // empty. Give them the terminal unless the script itself is on stdin.
    let reads_stdin = args.source == Some(Source::Script(PathBuf::from("-")));
    if reads_stdin {
        shell = shell.with_stdin(StdinMode::Null);
    } else if shell.options().stdin == StdinMode::Buffered {
        shell = shell.with_stdin(StdinMode::Inherit);
    }
    Ok(shell)
}

fn units_for(source: &Source) -> Result<Vec<Unit>, script::LoadError> {
    match source {
        Source::Script(path) => script::load(path),
        Source::Eval(command) => Ok(vec![Unit {
            location: Location {
                path: PathBuf::from("-e"),
                line: 1,
            },
            source: command.clone(),
        }]),
    }
}

fn print_json(result: &shx::ProcessResult) {
    match serde_json::to_string(result) {
        Ok(line) => println!("{line}"),
        Err(e) => eprintln!("shx: encoding result: {e}"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("shx: {msg}\n{USAGE}");
            exit(code::USAGE);
        }
    };

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("shx: {e}");
            exit(code::CONFIG);
        }
    };
    shx::logging::init(config.log_level());

    if args.dump_config {
        match config.to_toml() {
            Ok(text) => print!("{text}"),
            Err(e) => {
                eprintln!("shx: {e}");
                exit(code::CONFIG);
            }
        }
        return;
    }

    let Some(source) = &args.source else {
        eprintln!("shx: nothing to run\n{USAGE}");
        exit(code::USAGE);
    };
    let units = match units_for(source) {
        Ok(units) => units,
        Err(e) => {
            eprintln!("shx: {e}");
            exit(code::NOINPUT);
        }
    };
    let shell = match shell_for(&args, &config) {
        Ok(shell) => shell,
        Err(e) => {
            eprintln!("shx: {e}");
            exit(code::CONFIG);
        }
    };

    for unit in units {
        debug!("running {}", unit.location);
        match shell.run(QuotedCommand::raw(unit.source)).await {
            Ok(result) => {
                if args.json {
                    print_json(&result);
                }
            }
            Err(e) => {
                if args.json
                    && let Some(result) = e.output()
                {
                    print_json(result);
                }
                eprintln!("shx: {}: {e}", unit.location);
                exit(e.exit_code());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Result<Args, String> {
        parse_args(argv.iter().map(|s| s.to_string()))
    }

    #[test]
    fn script_and_flags() {
        let args = parse(&["--quiet", "--timeout", "250", "deploy.md"]).unwrap();
        assert!(args.quiet);
        assert_eq!(args.timeout, Some(Duration::from_millis(250)));
        assert_eq!(args.source, Some(Source::Script("deploy.md".into())));
    }

    #[test]
    fn eval_command() {
        let args = parse(&["-e", "echo hi", "--json"]).unwrap();
        assert!(args.json);
        assert_eq!(args.source, Some(Source::Eval("echo hi".into())));
    }

    #[test]
    fn usage_errors() {
        assert!(parse(&["--timeout"]).is_err());
        assert!(parse(&["--timeout", "soon"]).is_err());
        assert!(parse(&["--frobnicate"]).is_err());
        assert!(parse(&["a.sh", "b.sh"]).is_err());
    }

    #[test]
    fn eval_unit_location() {
        let units = units_for(&Source::Eval("ls".into())).unwrap();
        assert_eq!(units[0].location.to_string(), "-e:1");
        assert_eq!(units[0].source, "ls");
    }

    #[test]
    fn json_forces_quiet() {
        let args = parse(&["--json", "-e", "true"]).unwrap();
        let shell = shell_for(&args, &Config::default_config()).unwrap();
        assert!(shell.options().quiet);
        assert_eq!(shell.options().stdin, StdinMode::Inherit);
    }
}
