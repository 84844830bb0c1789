//! Portable pump backed by a channel.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::trace;

use crate::error::PumpError;
use crate::{MessagePoster, MessagePump, PostedMessage, PumpEvent, PumpHandle, PumpResult};

/// A message queue with the same contract as a native thread queue.
pub struct ChannelPump {
    sender: Sender<PostedMessage>,
    receiver: Receiver<PostedMessage>,
    thread: ThreadId,
}

impl ChannelPump {
    /// Create a pump owned by the calling thread.
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender,
            receiver,
            thread: thread::current().id(),
        }
    }

    /// Number of messages waiting to be pumped.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl Default for ChannelPump {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagePump for ChannelPump {
    fn handle(&self) -> PumpHandle {
        PumpHandle::new(
            Arc::new(ChannelPoster {
                sender: self.sender.clone(),
            }),
            self.thread,
        )
    }

    fn wait(&mut self) -> PumpResult<PumpEvent> {
        let message = self
            .receiver
            .recv()
            .map_err(|_| PumpError::Disconnected)?;
        trace!(?message, "Pumped message");
        Ok(message.into())
    }

    fn poll(&mut self) -> PumpResult<Option<PumpEvent>> {
        match self.receiver.try_recv() {
            Ok(message) => Ok(Some(message.into())),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(PumpError::Disconnected),
        }
    }
}

struct ChannelPoster {
    sender: Sender<PostedMessage>,
}

impl MessagePoster for ChannelPoster {
    fn post(&self, message: PostedMessage) -> PumpResult<()> {
        self.sender
            .send(message)
            .map_err(|_| PumpError::Disconnected)
    }
}
