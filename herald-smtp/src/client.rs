//! SMTP session driver.

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Result, SmtpError};
use crate::reply::Reply;

/// Identity announced in HELO. Fixed; the service never impersonates a
/// resolvable host.
const HELO_IDENTITY: &str = "me";

/// Size of each DATA body slice, in bytes.
const DATA_CHUNK: usize = 3000;

/// Maximum number of 551 forward hops after the initial RCPT.
const MAX_FORWARD_HOPS: usize = 21;

/// Initial size of the reply read buffer.
const BUFFER_SIZE: usize = 4096;

/// Upper bound on the reply buffer, to cap a misbehaving server.
const MAX_BUFFER_SIZE: usize = 512 * 1024;

/// Format a timestamp as `Dow, DD Mon YYYY HH:MM:SS` (title-case day and
/// month), the form used in the `Date:` header and the body preamble.
#[must_use]
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S").to_string()
}

/// First whitespace-delimited token of a 551 reply text that looks like an
/// address (contains `@`).
fn forward_address(text: &str) -> Option<&str> {
    text.split_whitespace().find(|token| token.contains('@'))
}

/// An open SMTP session.
///
/// Each method issues one command (or one write) and, where the protocol
/// answers, reads one complete reply. The session performs no retries of
/// its own except the 551 forward chase inside [`Self::rcpt_to`].
pub struct SmtpConnection {
    stream: TcpStream,
    buffer: Vec<u8>,
    filled: usize,
}

impl SmtpConnection {
    /// Connect and introduce ourselves.
    ///
    /// Reads the greeting and, when it is `220`, issues `HELO`. The
    /// returned reply is the HELO reply on the happy path and the greeting
    /// itself otherwise, so callers check a single code: the open
    /// succeeded iff `reply.code == 250`.
    ///
    /// # Errors
    ///
    /// Returns an error when the TCP connect fails or a reply cannot be
    /// read.
    pub async fn open(host: &str, port: u16) -> Result<(Self, Reply)> {
        let stream = TcpStream::connect((host, port)).await?;
        let mut session = Self {
            stream,
            buffer: vec![0_u8; BUFFER_SIZE],
            filled: 0,
        };

        let greeting = session.read_reply().await?;
        if greeting.code != 220 {
            return Ok((session, greeting));
        }

        let helo = session.command(&format!("HELO {HELO_IDENTITY}")).await?;
        Ok((session, helo))
    }

    /// Issue `MAIL FROM:<email>` — the address is appended verbatim, with
    /// no angle brackets, for wire compatibility. Success is `250`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure.
    pub async fn mail_from(&mut self, email: &str) -> Result<Reply> {
        self.command(&format!("MAIL FROM:{email}")).await
    }

    /// Issue `RCPT TO:<email>` (verbatim address, no brackets), chasing
    /// 551 "user not local" forwards.
    ///
    /// On a `551` reply the first whitespace-delimited token containing
    /// `@` in the reply text becomes the next RCPT address, up to
    /// [`MAX_FORWARD_HOPS`] retries after the initial attempt. Replies
    /// outside `{250, 251, 551}` return immediately, as does a `551`
    /// carrying no forward address. A transport failure mid-chase
    /// terminates the chase and yields the last reply received.
    ///
    /// # Errors
    ///
    /// Returns an error only when the very first command fails before any
    /// reply arrives.
    pub async fn rcpt_to(&mut self, email: &str) -> Result<Reply> {
        let mut address = email.to_string();
        let mut previous: Option<Reply> = None;
        let mut hops = 0;

        loop {
            let reply = match self.command(&format!("RCPT TO:{address}")).await {
                Ok(reply) => reply,
                Err(err) => return previous.map_or(Err(err), Ok),
            };

            if reply.code != 551 || hops == MAX_FORWARD_HOPS {
                return Ok(reply);
            }

            let text = reply.text();
            let Some(forward) = forward_address(&text) else {
                return Ok(reply);
            };
            address = forward.to_string();
            previous = Some(reply);
            hops += 1;
        }
    }

    /// Issue `DATA`. Success is `354`; the code is carried through
    /// untouched for the caller to judge.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure.
    pub async fn open_data(&mut self) -> Result<Reply> {
        self.command("DATA").await
    }

    /// Write the message headers and the header/body separator line.
    ///
    /// `Subject:` is deliberately written without a space after the colon
    /// (wire compatibility; a known RFC 5322 deviation).
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure.
    pub async fn write_headers(
        &mut self,
        from: &str,
        to: &str,
        subject: &str,
        date: &DateTime<Utc>,
    ) -> Result<()> {
        let headers = format!(
            "Date: {}\r\nFrom: {from}\r\nTo: {to}\r\nSubject:{subject}\r\nContent-type: text/plain\r\n\r\n",
            format_timestamp(date),
        );
        self.send(headers.as_bytes()).await
    }

    /// Write a string into an open DATA section. No reply is read.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure.
    pub async fn write_string(&mut self, s: &str) -> Result<()> {
        self.send(s.as_bytes()).await
    }

    /// Stream a body into an open DATA section in [`DATA_CHUNK`]-byte
    /// slices until exhausted. No reply is read.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure.
    pub async fn write_chunks(&mut self, blob: &[u8]) -> Result<()> {
        for chunk in blob.chunks(DATA_CHUNK) {
            self.send(chunk).await?;
        }
        Ok(())
    }

    /// Terminate the DATA section with `<CRLF>.<CRLF>`. Success is `250`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure.
    pub async fn close_data(&mut self) -> Result<Reply> {
        self.send(b"\r\n.\r\n").await?;
        self.read_reply().await
    }

    /// Quit and drop the session. Best-effort: errors are ignored, the
    /// message exchange is already settled by the time this runs.
    pub async fn close(mut self) {
        if self.send(b"QUIT\r\n").await.is_ok() {
            let _ = self.read_reply().await;
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        Ok(())
    }

    async fn command(&mut self, line: &str) -> Result<Reply> {
        self.send(format!("{line}\r\n").as_bytes()).await?;
        self.read_reply().await
    }

    /// Read one complete (possibly multi-line) reply.
    async fn read_reply(&mut self) -> Result<Reply> {
        loop {
            if let Some((reply, consumed)) = Reply::parse(&self.buffer[..self.filled])? {
                self.buffer.copy_within(consumed..self.filled, 0);
                self.filled -= consumed;
                return Ok(reply);
            }

            if self.filled >= self.buffer.len() {
                let grown = self.buffer.len() * 2;
                if grown > MAX_BUFFER_SIZE {
                    return Err(SmtpError::Malformed(format!(
                        "reply exceeds {MAX_BUFFER_SIZE} bytes"
                    )));
                }
                self.buffer.resize(grown, 0);
            }

            let n = self.stream.read(&mut self.buffer[self.filled..]).await?;
            if n == 0 {
                return Err(SmtpError::ConnectionClosed);
            }
            self.filled += n;
        }
    }
}
