//! The message relay pipeline.
//!
//! Messages are read one at a time from a source receiver, forwarded to a
//! destination sender and completed at the source only after the forward
//! succeeded. Progress is written to the supplied console writer as it happens.

use crate::format::{body_text, MessageFormatter};
use queue_runtime::{MessageReceiver, MessageSender, OutboundMessage, QueueError};
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

#[cfg(test)]
#[path = "relay_tests.rs"]
mod tests;

/// Errors that stop a relay run
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Transport(#[from] QueueError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Check if a later re-run of the same relay may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_transient(),
            Self::Io(_) => false,
        }
    }
}

/// How messages are read from the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Messages stay at the source unless completed
    Peek,
    /// Messages are locked and hidden from other readers until completed
    Consume,
}

/// Counts of a finished relay run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaySummary {
    pub forwarded: usize,
    pub completed: usize,
}

/// Forward every message visible at the source, completing each after its send
pub async fn peek_and_send(
    receiver: &mut dyn MessageReceiver,
    sender: &mut dyn MessageSender,
    out: &mut (dyn Write + Send),
) -> Result<RelaySummary, RelayError> {
    relay(receiver, sender, RelayMode::Peek, out).await
}

/// Drain the source, completing each message after its send
///
/// A message received but not completed keeps its lock until the service
/// expires it, after which it is delivered again.
pub async fn consume_and_send(
    receiver: &mut dyn MessageReceiver,
    sender: &mut dyn MessageSender,
    out: &mut (dyn Write + Send),
) -> Result<RelaySummary, RelayError> {
    relay(receiver, sender, RelayMode::Consume, out).await
}

async fn relay(
    receiver: &mut dyn MessageReceiver,
    sender: &mut dyn MessageSender,
    mode: RelayMode,
    out: &mut (dyn Write + Send),
) -> Result<RelaySummary, RelayError> {
    info!(
        source = %receiver.entity_path(),
        destination = %sender.entity_path(),
        mode = ?mode,
        "Starting relay"
    );

    let mut summary = RelaySummary::default();
    loop {
        let next = match mode {
            RelayMode::Peek => receiver.peek().await?,
            RelayMode::Consume => receiver.receive().await?,
        };
        let Some(message) = next else {
            break;
        };

        debug!(
            message_id = %message.message_id,
            sequence_number = message.sequence_number,
            "Relaying message"
        );
        writeln!(out, "Received message: {}", body_text(&message.body))?;

        sender.send(message.to_outbound()).await?;
        summary.forwarded += 1;
        writeln!(out, "Resubmitted message.")?;

        receiver.complete(&message.lock_token).await?;
        summary.completed += 1;
        writeln!(out, "Completed message.")?;
    }

    info!(
        forwarded = summary.forwarded,
        completed = summary.completed,
        "Relay finished"
    );
    Ok(summary)
}

/// A receiver and sender owned by one relay run
pub struct RelaySession {
    receiver: Box<dyn MessageReceiver>,
    sender: Box<dyn MessageSender>,
}

impl RelaySession {
    pub fn new(receiver: Box<dyn MessageReceiver>, sender: Box<dyn MessageSender>) -> Self {
        Self { receiver, sender }
    }

    /// Run the relay, then close both ends whatever the outcome
    ///
    /// The relay's own error is reported in preference to a close error.
    pub async fn run(
        mut self,
        mode: RelayMode,
        out: &mut (dyn Write + Send),
    ) -> Result<RelaySummary, RelayError> {
        let result = relay(self.receiver.as_mut(), self.sender.as_mut(), mode, out).await;

        let receiver_closed = self.receiver.close().await;
        let sender_closed = self.sender.close().await;

        let summary = result?;
        receiver_closed?;
        sender_closed?;
        Ok(summary)
    }
}

/// Send one message per input line until end of input or the first empty line
///
/// Returns the number of messages sent.
pub async fn stream_from_text<R>(
    input: R,
    sender: &mut dyn MessageSender,
    out: &mut (dyn Write + Send),
) -> Result<usize, RelayError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut lines = input.lines();
    let mut sent = 0;

    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            debug!(sent, "Empty line ends input");
            break;
        }

        writeln!(out, "Sending... {}", line)?;
        sender.send(OutboundMessage::new(line)).await?;
        sent += 1;
        writeln!(out, "Sent!")?;
    }

    info!(destination = %sender.entity_path(), sent, "Finished sending lines");
    Ok(sent)
}

/// Print a header and up to `count` peeked messages
///
/// Nothing is completed. Returns the number of messages listed.
///
/// Every peek is a delivery on Service Bus, so each listing raises the
/// delivery count of the listed messages. Once that count reaches the
/// entity's maximum the service dead-letters the message.
pub async fn list_messages(
    receiver: &mut dyn MessageReceiver,
    count: usize,
    formatter: &MessageFormatter,
    out: &mut (dyn Write + Send),
) -> Result<usize, RelayError> {
    writeln!(out, "{}", formatter.format_header())?;

    let mut listed = 0;
    while listed < count {
        let Some(message) = receiver.peek().await? else {
            break;
        };
        writeln!(out, "{}", formatter.format_message(&message))?;
        listed += 1;
    }

    debug!(source = %receiver.entity_path(), listed, "Listed messages");
    Ok(listed)
}
