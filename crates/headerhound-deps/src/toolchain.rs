//! External tool invocations
//!
//! Wraps the three processes HeaderHound shells out to: the compiler's
//! built-in macro dump (`-dM -E -`), the reference preprocessor
//! (dependency listing via `-MM` and comment-preserving preprocessing
//! via `-C -E`), and `pkg-config`.
//!
//! A header file has no translation unit of its own, so it is fed to
//! the preprocessor through a synthetic empty one: `-include <header>
//! -x c++ /dev/null`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use headerhound_core::{files, Error, Result};
use tracing::{debug, warn};

use crate::fscache;
use crate::macros::MacroMap;

/// How long the compiler gets to dump its predefined macros before the
/// query degrades to an empty result.
pub const MACRO_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a `Command` from a tool line such as `"ccache g++"`.
fn command_for(tool_line: &str) -> Option<Command> {
    let mut tokens = tool_line.split_whitespace();
    let program = tokens.next()?;
    let mut cmd = Command::new(program);
    cmd.args(tokens);
    Some(cmd)
}

/// Query a compiler for its predefined macros.
///
/// Runs `<compiler> -dM -E -` with empty input and parses the
/// `#define NAME [VALUE]` lines, stripping surrounding quotes from the
/// value. Any failure (missing binary, non-zero exit, timeout) yields
/// an empty map, never an error.
pub fn query_builtin_macros(compiler: &str) -> MacroMap {
    let mut macros = MacroMap::new();

    let Some(mut cmd) = command_for(compiler) else {
        debug!("no compiler specified, skipping macro query");
        return macros;
    };
    cmd.args(["-dM", "-E", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let stdout = match run_with_timeout(cmd, MACRO_QUERY_TIMEOUT) {
        Some(output) => output,
        None => {
            debug!("macro query failed for {}", compiler);
            return macros;
        }
    };

    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("#define ") {
            let mut parts = rest.splitn(2, char::is_whitespace);
            let Some(name) = parts.next() else { continue };
            let mut value = parts.next().unwrap_or("1").trim().to_string();
            if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                value = value[1..value.len() - 1].to_string();
            }
            macros.insert(name.to_string(), value);
        }
    }

    debug!("queried {} macros from {}", macros.len(), compiler);
    macros
}

/// Run a command, returning its stdout only when it exits zero within
/// the deadline. The child is killed on timeout.
///
/// Stdout is drained on a helper thread; polling alone would deadlock
/// once the pipe buffer fills.
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Option<String> {
    use std::io::Read;

    let mut child = cmd.spawn().ok()?;
    let mut stdout = child.stdout.take()?;
    let reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        buf
    });

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let buf = reader.join().ok()?;
                if !status.success() {
                    return None;
                }
                return Some(String::from_utf8_lossy(&buf).to_string());
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
        }
    }
}

/// Invoke the real preprocessor on `realpath` with extra arguments,
/// returning its stdout. Failure is fatal: a broken preprocessor cannot
/// be distinguished from "no output".
fn preprocess(preprocessor: &str, cppflags: &str, realpath: &Path, extra: &[&str]) -> Result<String> {
    let mut cmd = command_for(preprocessor).ok_or_else(|| Error::Preprocessor {
        file: realpath.to_path_buf(),
        message: "no preprocessor configured".to_string(),
    })?;

    cmd.args(cppflags.split_whitespace());
    cmd.args(extra);
    if files::is_header(realpath) {
        cmd.args(["-include"])
            .arg(realpath)
            .args(["-x", "c++", "/dev/null"]);
    } else {
        cmd.arg(realpath);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("running {:?}", cmd);

    let output = cmd.output().map_err(|e| Error::Preprocessor {
        file: realpath.to_path_buf(),
        message: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(Error::Preprocessor {
            file: realpath.to_path_buf(),
            message: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Run `<preprocessor> <CPPFLAGS> -MM <file>` and parse the Make-rule
/// output into an ordered, de-duplicated dependency list.
pub fn dependency_listing(preprocessor: &str, cppflags: &str, realpath: &Path) -> Result<Vec<PathBuf>> {
    let output = preprocess(preprocessor, cppflags, realpath, &["-MM"])?;
    Ok(parse_make_rule(&output, realpath))
}

/// Run `<preprocessor> <CPPFLAGS> -C -E <file>`, preprocessing while
/// keeping comments so magic flags survive.
pub fn preprocess_keep_comments(preprocessor: &str, cppflags: &str, realpath: &Path) -> Result<String> {
    preprocess(preprocessor, cppflags, realpath, &["-C", "-E"])
}

/// Parse `target: dep1 dep2 \` Make-rule output.
///
/// The target, the literal `/dev/null` sentinel, and the queried file
/// itself are discarded; the rest is canonicalized and de-duplicated
/// preserving encounter order.
pub fn parse_make_rule(output: &str, realpath: &Path) -> Vec<PathBuf> {
    let deplist = match output.split_once(':') {
        Some((_target, rest)) => rest,
        None => return Vec::new(),
    };

    let mut deps = Vec::new();
    for token in deplist.split_whitespace() {
        let token = token.trim_matches(|c| c == '\\' || c == '\t' || c == '\n' || c == '\r');
        if token.is_empty() || token == "/dev/null" {
            continue;
        }
        let dep = fscache::realpath(Path::new(token));
        if dep == *realpath {
            continue;
        }
        deps.push(dep);
    }

    crate::ordered_unique(&deps)
}

/// Query pkg-config for a package's cflags and libs.
///
/// Returns `None` when pkg-config is missing or does not know the
/// package; an environment problem, not a build declaration error.
pub fn pkg_config(package: &str) -> Option<(String, String)> {
    let cflags = pkg_config_query("--cflags", package)?;
    let libs = pkg_config_query("--libs", package)?;
    Some((cflags, libs))
}

fn pkg_config_query(mode: &str, package: &str) -> Option<String> {
    let output = Command::new("pkg-config")
        .args([mode, package])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .ok()?;

    if !output.status.success() {
        warn!("pkg-config {} {} failed", mode, package);
        return None;
    }

    Some(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
}
