//! Operator notifications.

use parking_lot::Mutex;
use std::io::{self, Write};
use std::process::{Command, Stdio};
use tracing::info;

/// A message for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorMessage {
    /// Sender address.
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
}

impl OperatorMessage {
    /// Renders the message as RFC 5322 text.
    pub fn to_rfc5322(&self) -> String {
        let date = chrono::Local::now().to_rfc2822();
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nDate: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
            self.from,
            self.to,
            self.subject,
            date,
            self.body.replace('\n', "\r\n")
        )
    }
}

/// Delivers operator messages.
pub trait Notifier: Send + Sync {
    /// Sends `message`.
    fn send(&self, message: &OperatorMessage) -> io::Result<()>;
}

/// Pipes messages to `sendmail -t`.
#[derive(Debug, Clone)]
pub struct SendmailNotifier {
    program: String,
}

impl SendmailNotifier {
    /// Uses `/usr/sbin/sendmail`.
    pub fn new() -> Self {
        Self::with_program("/usr/sbin/sendmail")
    }

    /// Uses a different sendmail-compatible program.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SendmailNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for SendmailNotifier {
    fn send(&self, message: &OperatorMessage) -> io::Result<()> {
        let mut child = Command::new(&self.program)
            .arg("-t")
            .stdin(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message.to_rfc5322().as_bytes())?;
        }
        let status = child.wait()?;
        if !status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} exited with {}", self.program, status),
            ));
        }
        info!(to = %message.to, subject = %message.subject, "operator mail sent");
        Ok(())
    }
}

/// Keeps sent messages in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<OperatorMessage>>,
}

impl MemoryNotifier {
    /// Creates an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far.
    pub fn sent(&self) -> Vec<OperatorMessage> {
        self.sent.lock().clone()
    }
}

impl Notifier for MemoryNotifier {
    fn send(&self, message: &OperatorMessage) -> io::Result<()> {
        self.sent.lock().push(message.clone());
        Ok(())
    }
}
