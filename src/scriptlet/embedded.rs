// src/scriptlet/embedded.rs

//! Builtin command language for embedded scriptlets
//!
//! One command per line, `#` starts a comment:
//!
//! ```text
//! mkdir /var/lib/foo 0750
//! write /etc/foo/enabled yes
//! symlink /usr/lib/foo/foo.service /etc/systemd/system/foo.service
//! chmod 0640 /etc/foo/secret
//! remove /var/cache/foo/index
//! echo configured $STRATA_PACKAGE_NAME
//! sleep 1
//! exit 0
//! ```
//!
//! The parent parses a body into an `EmbeddedScript` and ships it to the
//! forked worker as JSON. The worker runs it against a `ExecContext` built
//! from scratch; nothing about the parent process leaks in.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum EmbeddedOp {
    Mkdir { path: PathBuf, mode: Option<u32> },
    Symlink { target: PathBuf, link: PathBuf },
    Chmod { mode: u32, path: PathBuf },
    Write { path: PathBuf, text: String },
    Remove { path: PathBuf },
    Echo { text: String },
    Sleep { seconds: u64 },
    Exit { code: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedScript {
    pub ops: Vec<EmbeddedOp>,
}

/// Everything an embedded script can see
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecContext {
    pub env: BTreeMap<String, String>,
}

fn parse_mode(s: &str, line_no: usize) -> Result<u32> {
    u32::from_str_radix(s, 8)
        .ok()
        .filter(|m| *m <= 0o7777)
        .ok_or_else(|| Error::ParseError(format!("line {}: invalid mode '{}'", line_no, s)))
}

fn rest_after(line: &str, skip: usize) -> String {
    line.split_whitespace().skip(skip).collect::<Vec<_>>().join(" ")
}

impl EmbeddedScript {
    pub fn parse(body: &str) -> Result<Self> {
        let mut ops = Vec::new();

        for (idx, raw) in body.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let args: Vec<&str> = line.split_whitespace().collect();
            let arity = |min: usize, max: usize| -> Result<()> {
                let n = args.len() - 1;
                if n < min || n > max {
                    return Err(Error::ParseError(format!(
                        "line {}: '{}' takes {} argument(s), got {}",
                        line_no,
                        args[0],
                        if min == max { min.to_string() } else { format!("{}-{}", min, max) },
                        n
                    )));
                }
                Ok(())
            };

            let op = match args[0] {
                "mkdir" => {
                    arity(1, 2)?;
                    EmbeddedOp::Mkdir {
                        path: PathBuf::from(args[1]),
                        mode: args.get(2).map(|m| parse_mode(m, line_no)).transpose()?,
                    }
                }
                "symlink" => {
                    arity(2, 2)?;
                    EmbeddedOp::Symlink {
                        target: PathBuf::from(args[1]),
                        link: PathBuf::from(args[2]),
                    }
                }
                "chmod" => {
                    arity(2, 2)?;
                    EmbeddedOp::Chmod {
                        mode: parse_mode(args[1], line_no)?,
                        path: PathBuf::from(args[2]),
                    }
                }
                "write" => {
                    arity(1, usize::MAX)?;
                    EmbeddedOp::Write {
                        path: PathBuf::from(args[1]),
                        text: rest_after(line, 2),
                    }
                }
                "remove" => {
                    arity(1, 1)?;
                    EmbeddedOp::Remove {
                        path: PathBuf::from(args[1]),
                    }
                }
                "echo" => EmbeddedOp::Echo {
                    text: rest_after(line, 1),
                },
                "sleep" => {
                    arity(1, 1)?;
                    EmbeddedOp::Sleep {
                        seconds: args[1].parse().map_err(|_| {
                            Error::ParseError(format!(
                                "line {}: invalid seconds '{}'",
                                line_no, args[1]
                            ))
                        })?,
                    }
                }
                "exit" => {
                    arity(1, 1)?;
                    EmbeddedOp::Exit {
                        code: args[1].parse().map_err(|_| {
                            Error::ParseError(format!(
                                "line {}: invalid exit code '{}'",
                                line_no, args[1]
                            ))
                        })?,
                    }
                }
                other => {
                    return Err(Error::ParseError(format!(
                        "line {}: unknown command '{}'",
                        line_no, other
                    )));
                }
            };
            ops.push(op);
        }

        Ok(Self { ops })
    }

    /// Run every op in order and return the exit status
    ///
    /// The first failing op writes a message to `err` and ends the script
    /// with status 1.
    pub fn run(&self, ctx: &ExecContext, out: &mut dyn Write, err: &mut dyn Write) -> i32 {
        for op in &self.ops {
            match self.run_op(op, ctx, out) {
                Ok(Some(code)) => return code,
                Ok(None) => {}
                Err(e) => {
                    let _ = writeln!(err, "{:?}: {}", op, e);
                    return 1;
                }
            }
        }
        let _ = out.flush();
        0
    }

    fn run_op(
        &self,
        op: &EmbeddedOp,
        ctx: &ExecContext,
        out: &mut dyn Write,
    ) -> std::io::Result<Option<i32>> {
        match op {
            EmbeddedOp::Mkdir { path, mode } => {
                fs::create_dir_all(path)?;
                if let Some(mode) = mode {
                    fs::set_permissions(path, fs::Permissions::from_mode(*mode))?;
                }
            }
            EmbeddedOp::Symlink { target, link } => {
                if fs::symlink_metadata(link).is_ok() {
                    fs::remove_file(link)?;
                }
                std::os::unix::fs::symlink(target, link)?;
            }
            EmbeddedOp::Chmod { mode, path } => {
                fs::set_permissions(path, fs::Permissions::from_mode(*mode))?;
            }
            EmbeddedOp::Write { path, text } => {
                fs::write(path, format!("{}\n", expand(text, ctx)))?;
            }
            EmbeddedOp::Remove { path } => match fs::symlink_metadata(path) {
                Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
                Ok(_) => fs::remove_file(path)?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            },
            EmbeddedOp::Echo { text } => {
                writeln!(out, "{}", expand(text, ctx))?;
                out.flush()?;
            }
            EmbeddedOp::Sleep { seconds } => std::thread::sleep(Duration::from_secs(*seconds)),
            EmbeddedOp::Exit { code } => return Ok(Some(*code)),
        }
        Ok(None)
    }

    pub fn to_json(&self, ctx: &ExecContext) -> Result<Vec<u8>> {
        serde_json::to_vec(&Payload {
            script: self.clone(),
            context: ctx.clone(),
        })
        .map_err(|e| Error::ScriptletError(format!("Failed to encode embedded script: {}", e)))
    }

    pub fn from_json(bytes: &[u8]) -> Result<(Self, ExecContext)> {
        let payload: Payload = serde_json::from_slice(bytes).map_err(|e| {
            Error::ScriptletError(format!("Failed to decode embedded script: {}", e))
        })?;
        Ok((payload.script, payload.context))
    }
}

#[derive(Serialize, Deserialize)]
struct Payload {
    script: EmbeddedScript,
    context: ExecContext,
}

/// Replace `$NAME` words with values from the context; unknown names stay as written
fn expand(text: &str, ctx: &ExecContext) -> String {
    text.split(' ')
        .map(|word| match word.strip_prefix('$') {
            Some(name) => ctx.env.get(name).map(String::as_str).unwrap_or(word),
            None => word,
        })
        .collect::<Vec<_>>()
        .join(" ")
}
