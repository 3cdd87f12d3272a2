//! SMTP reply parsing and representation.

use crate::error::{Result, SmtpError};

/// A complete SMTP reply: one status code and one or more text lines.
///
/// Multi-line replies (`250-first`, `250 last`) collapse into a single
/// `Reply` whose `lines` holds each line's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// The reply text with lines joined by newlines.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// 2xx: the command completed.
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 4xx: transient failure, worth a later retry.
    #[must_use]
    pub const fn is_transient_failure(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    /// 5xx: permanent failure.
    #[must_use]
    pub const fn is_permanent_failure(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Parse one reply line into `(code, is_last, text)`.
    fn parse_line(line: &str) -> Result<(u16, bool, &str)> {
        if line.len() < 3 {
            return Err(SmtpError::Malformed(format!("reply line too short: {line:?}")));
        }

        let code = line[..3]
            .parse::<u16>()
            .map_err(|_| SmtpError::Malformed(format!("invalid status code in {line:?}")))?;

        // Fourth character: space ends the reply, a dash continues it.
        let is_last = match line.as_bytes().get(3) {
            Some(b' ') | None => true,
            Some(b'-') => false,
            Some(&c) => {
                return Err(SmtpError::Malformed(format!(
                    "invalid separator {:?} in {line:?}",
                    char::from(c)
                )));
            }
        };

        let text = if line.len() > 4 { &line[4..] } else { "" };
        Ok((code, is_last, text))
    }

    /// Parse a complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes consumed, or `None` when
    /// the buffer does not yet hold a full reply.
    ///
    /// # Errors
    ///
    /// Returns [`SmtpError::Malformed`] on non-UTF-8 input, unparseable
    /// lines, or a code change inside a multi-line reply.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let text = std::str::from_utf8(buffer)
            .map_err(|e| SmtpError::Malformed(format!("reply is not UTF-8: {e}")))?;

        let mut lines = Vec::new();
        let mut code = None;
        let mut consumed = 0;

        loop {
            let rest = &text[consumed..];
            let Some(end) = rest.find('\n') else {
                return Ok(None); // incomplete final line, need more data
            };
            let line = rest[..end].trim_end_matches('\r');
            consumed += end + 1;

            if line.is_empty() {
                continue;
            }

            let (line_code, is_last, line_text) = Self::parse_line(line)?;
            match code {
                None => code = Some(line_code),
                Some(expected) if expected != line_code => {
                    return Err(SmtpError::Malformed(format!(
                        "status code changed mid-reply: {expected} then {line_code}"
                    )));
                }
                Some(_) => {}
            }
            lines.push(line_text.to_string());

            if is_last {
                let Some(code) = code else {
                    return Ok(None);
                };
                return Ok(Some((Self::new(code, lines), consumed)));
            }
        }
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.text())
    }
}
