use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use ipclink_frame::ChannelId;
use tokio::sync::oneshot;

use crate::error::{LinkError, Result};

pub(crate) type ReceiptSender = oneshot::Sender<Result<u64>>;

/// Completion handle for one sent message.
///
/// Resolves to the message's sequence number once every frame was accepted by
/// the transport, or to the error that stopped delivery. Await it from async
/// code or call [`wait`](Self::wait) from a plain thread.
#[derive(Debug)]
#[must_use = "a receipt reports whether the message was delivered"]
pub struct DeliveryReceipt {
    channel: ChannelId,
    sequence: u64,
    rx: oneshot::Receiver<Result<u64>>,
}

impl DeliveryReceipt {
    pub(crate) fn new(channel: ChannelId, sequence: u64) -> (ReceiptSender, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                channel,
                sequence,
                rx,
            },
        )
    }

    /// Sequence number assigned to the message.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Channel the message was sent on.
    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Block until delivery finishes.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context; await
    /// the receipt there instead.
    pub fn wait(self) -> Result<u64> {
        let channel = self.channel;
        self.rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(LinkError::ChannelTornDown(channel.to_string())))
    }

    /// The outcome, if delivery already finished.
    pub fn try_result(&mut self) -> Option<Result<u64>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(Err(LinkError::ChannelTornDown(self.channel.to_string())))
            }
        }
    }
}

impl Future for DeliveryReceipt {
    type Output = Result<u64>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(LinkError::ChannelTornDown(this.channel.to_string())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(sequence: u64) -> (ReceiptSender, DeliveryReceipt) {
        DeliveryReceipt::new(ChannelId::new("A").expect("valid name"), sequence)
    }

    #[test]
    fn wait_returns_sequence() {
        let (tx, rx) = receipt(7);
        tx.send(Ok(7)).expect("receiver alive");
        assert_eq!(rx.wait().expect("delivered"), 7);
    }

    #[test]
    fn dropped_sender_means_torn_down() {
        let (tx, rx) = receipt(0);
        drop(tx);
        assert!(matches!(rx.wait(), Err(LinkError::ChannelTornDown(name)) if name == "A"));
    }

    #[test]
    fn try_result_is_pending_until_sent() {
        let (tx, mut rx) = receipt(1);
        assert!(rx.try_result().is_none());
        tx.send(Ok(1)).expect("receiver alive");
        assert!(matches!(rx.try_result(), Some(Ok(1))));
    }

    #[tokio::test]
    async fn receipt_is_awaitable() {
        let (tx, rx) = receipt(3);
        std::thread::spawn(move || {
            let _ = tx.send(Ok(3));
        });
        assert_eq!(rx.await.expect("delivered"), 3);
    }
}
