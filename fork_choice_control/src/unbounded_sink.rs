use futures::{
    channel::mpsc::{TrySendError, UnboundedSender},
    sink::Drain,
};

/// A channel that the mutator can send to without blocking.
///
/// Sending fails only if the receiver was dropped. The message is returned in that case.
pub trait UnboundedSink<T>: Send + 'static {
    // `Drain` does not implement `Clone`.
    fn clone(&self) -> Self;

    fn unbounded_send(&self, message: T) -> Result<(), T>;
}

impl<T, S: UnboundedSink<T> + Clone> UnboundedSink<T> for Option<S> {
    fn clone(&self) -> Self {
        Clone::clone(self)
    }

    fn unbounded_send(&self, message: T) -> Result<(), T> {
        self.as_ref()
            .map_or(Ok(()), |sink| sink.unbounded_send(message))
    }
}

impl<T: Send + 'static> UnboundedSink<T> for UnboundedSender<T> {
    fn clone(&self) -> Self {
        Clone::clone(self)
    }

    fn unbounded_send(&self, message: T) -> Result<(), T> {
        self.unbounded_send(message)
            .map_err(TrySendError::into_inner)
    }
}

impl<T: Send + 'static> UnboundedSink<T> for Drain<T> {
    fn clone(&self) -> Self {
        futures::sink::drain()
    }

    fn unbounded_send(&self, _message: T) -> Result<(), T> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sending_to_dropped_receiver_returns_message() {
        let (tx, rx) = futures::channel::mpsc::unbounded();

        drop(rx);

        assert_eq!(UnboundedSink::unbounded_send(&tx, 7), Err(7));
    }

    #[test]
    fn absent_sink_discards_messages() {
        let sink = None::<UnboundedSender<u8>>;

        assert_eq!(sink.unbounded_send(7), Ok(()));
    }
}
