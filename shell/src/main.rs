use argh::{EarlyExit, FromArgs};
use cmd_shell::{BreakSignal, Environment, Interpreter};
use std::io::{IsTerminal, Write};
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(FromArgs, Debug)]
/// Starts a new instance of the batch command interpreter.
struct Options {
    #[argh(switch, short = 'a')]
    /// output ANSI text to pipes and files.
    ansi: bool,

    #[argh(switch, short = 'u')]
    /// output UTF-16 text to pipes and files.
    unicode: bool,

    #[argh(switch, short = 'q')]
    /// turn echo off.
    quiet: bool,

    #[argh(switch, short = 'd')]
    /// do not run AutoRun commands.
    no_autorun: bool,

    #[argh(switch, short = 's')]
    /// always strip the outer quotes of the command string.
    strip_quotes: bool,

    #[argh(option, short = 'e')]
    /// enable (ON) or disable (OFF) command extensions.
    extensions: Option<String>,

    #[argh(option, short = 'f')]
    /// enable (ON) or disable (OFF) file name completion.
    completion: Option<String>,

    #[argh(option, short = 'v')]
    /// enable (ON) or disable (OFF) delayed expansion of !var!.
    delayed: Option<String>,

    #[argh(option, short = 't')]
    /// background and foreground colours as two hex digits.
    color: Option<String>,

    #[argh(option, short = 'c')]
    /// run the command string and exit.
    command: Option<String>,

    #[argh(option, short = 'k')]
    /// run the command string and stay interactive.
    keep: Option<String>,
}

/// Rewrites `/X` and `/X:value` switches as argh flags.
///
/// Switches are case-insensitive. Everything after `/C` or `/K`, including text
/// glued to the switch itself, becomes the command string.
fn normalize_args(args: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let Some(switch) = arg.strip_prefix('/') else {
            out.push(arg);
            continue;
        };
        let mut chars = switch.chars();
        let Some(letter) = chars.next().map(|c| c.to_ascii_lowercase()) else {
            out.push(arg);
            continue;
        };
        let value = chars.as_str().trim_start_matches(':');
        match letter {
            'c' | 'k' => {
                let mut command: Vec<String> = Vec::new();
                if !value.is_empty() {
                    command.push(value.to_string());
                }
                command.extend(args.by_ref());
                out.push(format!("-{letter}"));
                out.push(command.join(" "));
                break;
            }
            'e' | 'f' | 'v' => {
                out.push(format!("-{letter}"));
                out.push(if value.is_empty() { "ON" } else { value }.to_string());
            }
            't' => {
                out.push("-t".to_string());
                out.push(if value.is_empty() { "07" } else { value }.to_string());
            }
            _ => out.push(format!("-{letter}")),
        }
    }
    out
}

fn is_on(value: &str) -> bool {
    !value.eq_ignore_ascii_case("off")
}

const ANSI_COLORS: [u32; 8] = [30, 34, 32, 36, 31, 35, 33, 37];

/// Escape sequence for a `/T:bf` colour attribute, `None` if it is not two
/// different hex digits.
fn color_sequence(spec: &str) -> Option<String> {
    let mut digits = spec.chars().map(|c| c.to_digit(16));
    let (Some(Some(background)), Some(Some(foreground)), None) = (digits.next(), digits.next(), digits.next()) else {
        return None;
    };
    if background == foreground {
        return None;
    }
    let ansi = |digit: u32| ANSI_COLORS[(digit & 7) as usize] + if digit >= 8 { 60 } else { 0 };
    Some(format!("\x1b[{};{}m", ansi(foreground), ansi(background) + 10))
}

fn run(options: Options) -> anyhow::Result<i32> {
    debug!(?options, "starting");
    let mut env = Environment::new();
    if env.get_var("COMSPEC").is_none() {
        if let Ok(exe) = std::env::current_exe() {
            env.set_var("COMSPEC", exe.to_string_lossy());
        }
    }
    if env.get_var("PROMPT").is_none() {
        env.set_var("PROMPT", "$P$G");
    }

    let signal = BreakSignal::install().unwrap_or_else(|e| {
        warn!(error = %e, "Ctrl-C handler not installed");
        BreakSignal::new()
    });
    let mut cmd = Interpreter::new(env).with_interrupt(signal);
    if options.quiet {
        cmd.set_echo_mode(false);
    }
    if let Some(value) = options.delayed.as_deref() {
        cmd.set_delayed_expansion(is_on(value));
    }
    if let Some(value) = options.extensions.as_deref() {
        cmd.set_extensions(is_on(value));
    }
    if let Some(spec) = options.color.as_deref() {
        match color_sequence(spec) {
            Some(sequence) if std::io::stdout().is_terminal() => {
                let mut stdout = std::io::stdout();
                stdout.write_all(sequence.as_bytes())?;
                stdout.flush()?;
            }
            Some(_) => {}
            None => warn!(spec, "ignoring invalid colour attribute"),
        }
    }

    if let Some(command) = options.command {
        let command = cmd.prepare_command_string(&command, options.strip_quotes);
        cmd.execute_line(&command)?;
        return Ok(cmd.exit_code().unwrap_or(cmd.errorlevel()));
    }
    if let Some(command) = options.keep {
        let command = cmd.prepare_command_string(&command, options.strip_quotes);
        cmd.execute_line(&command)?;
        if let Some(code) = cmd.exit_code() {
            return Ok(code);
        }
    }
    cmd.repl()?;
    Ok(cmd.exit_code().unwrap_or(cmd.errorlevel()))
}

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let args = normalize_args(std::env::args().skip(1));
    let argv: Vec<&str> = args.iter().map(String::as_str).collect();
    let options = match Options::from_args(&["cmd"], &argv) {
        Ok(options) => options,
        Err(EarlyExit { output, status }) => match status {
            Ok(()) => {
                println!("{output}");
                std::process::exit(0);
            }
            Err(()) => {
                eprintln!("{output}");
                std::process::exit(1);
            }
        },
    };

    match run(options) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(args: &[&str]) -> Vec<String> {
        normalize_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn windows_switches_become_flags() {
        assert_eq!(normalized(&["/Q", "/V:ON", "/eoff"]), vec!["-q", "-v", "ON", "-e", "off"]);
        assert_eq!(normalized(&["/T:1e"]), vec!["-t", "1e"]);
    }

    #[test]
    fn command_string_takes_the_rest() {
        assert_eq!(normalized(&["/d", "/c", "echo", "/q", "x"]), vec!["-d", "-c", "echo /q x"]);
        assert_eq!(normalized(&["/Cecho", "hi"]), vec!["-c", "echo hi"]);
        assert_eq!(normalized(&["/K"]), vec!["-k", ""]);
    }

    #[test]
    fn options_parse_after_normalizing() {
        let args = normalized(&["/S", "/V:OFF", "/C", "dir"]);
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        let options = Options::from_args(&["cmd"], &argv).unwrap();
        assert!(options.strip_quotes);
        assert_eq!(options.delayed.as_deref(), Some("OFF"));
        assert_eq!(options.command.as_deref(), Some("dir"));
        assert!(!is_on("off"));
        assert!(is_on("ON"));
    }

    #[test]
    fn color_attributes() {
        assert_eq!(color_sequence("1e").as_deref(), Some("\x1b[93;44m"));
        assert_eq!(color_sequence("07").as_deref(), Some("\x1b[37;40m"));
        assert_eq!(color_sequence("77"), None);
        assert_eq!(color_sequence("0g"), None);
        assert_eq!(color_sequence("012"), None);
    }
}
