//! Control protocol codec
//!
//! Commands are single CRLF-terminated lines. Replies are one or more lines
//! of the form `NNN<sep>text` where `sep` is `-` for a continuation line,
//! `+` for a line followed by a dot-terminated data block, and a space for
//! the final line.

use crate::error::{Result, TorPoolError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// A parsed control reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Three digit status code of the final line
    pub status: u16,
    /// Text of every reply line, without status and separator
    pub lines: Vec<String>,
}

impl Reply {
    /// Whether the status is in the 2xx range
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Text of the final line
    pub fn message(&self) -> &str {
        self.lines.last().map(String::as_str).unwrap_or("")
    }

    /// Turn a non-2xx reply into an error naming the command
    pub fn check(self, command: &str) -> Result<Reply> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(TorPoolError::Control(format!(
                "{} rejected: {} {}",
                command,
                self.status,
                self.message()
            )))
        }
    }
}

/// Quote a string for use as a command argument
pub fn quote_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Write a single command line
pub async fn write_command<T: AsyncWrite + Unpin>(conn: &mut T, command: &str) -> Result<()> {
    trace!("control >> {}", command);
    conn.write_all(command.as_bytes()).await?;
    conn.write_all(b"\r\n").await?;
    conn.flush().await?;
    Ok(())
}

/// Read one complete reply
pub async fn read_reply<T: AsyncBufRead + Unpin>(conn: &mut T) -> Result<Reply> {
    let mut lines = Vec::new();

    loop {
        let line = read_line(conn).await?;
        trace!("control << {}", line);

        let (status, sep, text) = split_reply_line(&line)?;
        lines.push(text.to_string());

        match sep {
            ' ' => return Ok(Reply { status, lines }),
            '-' => continue,
            '+' => loop {
                let data = read_line(conn).await?;
                if data == "." {
                    break;
                }
            },
            other => {
                return Err(TorPoolError::Control(format!(
                    "Malformed reply separator {:?} in {:?}",
                    other, line
                )))
            }
        }
    }
}

async fn read_line<T: AsyncBufRead + Unpin>(conn: &mut T) -> Result<String> {
    let mut line = String::new();
    if conn.read_line(&mut line).await? == 0 {
        return Err(TorPoolError::Control(
            "Control connection closed".to_string(),
        ));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn split_reply_line(line: &str) -> Result<(u16, char, &str)> {
    let malformed = || TorPoolError::Control(format!("Malformed reply line: {:?}", line));

    let status = line
        .get(..3)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(malformed)?;
    let sep = line.get(3..4).and_then(|s| s.chars().next()).ok_or_else(malformed)?;
    let text = line.get(4..).unwrap_or("");

    Ok((status, sep, text))
}
