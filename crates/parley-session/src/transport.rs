use chrono::{DateTime, Utc};
use parley_core::{Envelope, Sequence};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Instruction to the task that owns a live socket.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCommand {
    /// Write one envelope as a text frame.
    Deliver(Envelope),
    /// Send a close frame and stop.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Non-owning handle to the single live transport of a session.
///
/// The socket itself lives in the task that drains the receiving half; the
/// session only keeps the sender plus the delivery watermark. Nothing at or
/// below the watermark is ever sent again through this handle.
#[derive(Debug)]
pub struct TransportHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<TransportCommand>,
    delivered: Sequence,
    attached_at: DateTime<Utc>,
}

impl TransportHandle {
    /// Wraps a sender; `last_seen` is the highest sequence the client reports.
    pub fn new(id: Uuid, tx: mpsc::UnboundedSender<TransportCommand>, last_seen: Sequence) -> Self {
        Self {
            id,
            tx,
            delivered: last_seen,
            attached_at: Utc::now(),
        }
    }

    /// Transport instance id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Highest sequence pushed through (or already held by) this transport.
    pub fn delivered(&self) -> Sequence {
        self.delivered
    }

    /// When the transport was accepted.
    pub fn attached_at(&self) -> DateTime<Utc> {
        self.attached_at
    }

    /// True once the socket task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Pushes the envelopes above the watermark, in order.
    ///
    /// Returns how many were sent, or `Err(())` when the receiving task is
    /// gone; the caller should then drop the handle.
    #[allow(clippy::result_unit_err)]
    pub fn deliver(&mut self, envelopes: &[Envelope]) -> Result<usize, ()> {
        let mut sent = 0;
        for env in envelopes {
            if env.sequence <= self.delivered {
                continue;
            }
            self.tx
                .send(TransportCommand::Deliver(env.clone()))
                .map_err(|_| ())?;
            self.delivered = env.sequence;
            sent += 1;
        }
        Ok(sent)
    }

    /// Asks the socket task to close with the given code.
    pub fn close(self, code: u16, reason: impl Into<String>) {
        let _ = self.tx.send(TransportCommand::Close {
            code,
            reason: reason.into(),
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use parley_core::Payload;

    fn env(seq: Sequence) -> Envelope {
        Envelope::new(seq, Payload::agent_message(format!("m{seq}")))
    }

    #[test]
    fn test_deliver_skips_at_or_below_watermark() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = TransportHandle::new(Uuid::new_v4(), tx, 2);

        let sent = handle.deliver(&[env(1), env(2), env(3), env(4)]).unwrap();
        assert_eq!(sent, 2);
        assert_eq!(handle.delivered(), 4);
        assert_eq!(rx.try_recv().unwrap(), TransportCommand::Deliver(env(3)));
        assert_eq!(rx.try_recv().unwrap(), TransportCommand::Deliver(env(4)));

        // Same batch again: nothing re-sent.
        assert_eq!(handle.deliver(&[env(3), env(4)]).unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_deliver_fails_when_receiver_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut handle = TransportHandle::new(Uuid::new_v4(), tx, 0);
        drop(rx);
        assert!(handle.is_closed());
        assert!(handle.deliver(&[env(1)]).is_err());
    }

    #[test]
    fn test_close_sends_command() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = TransportHandle::new(Uuid::new_v4(), tx, 0);
        handle.close(4001, "superseded");
        assert_eq!(
            rx.try_recv().unwrap(),
            TransportCommand::Close {
                code: 4001,
                reason: "superseded".into()
            }
        );
    }
}
