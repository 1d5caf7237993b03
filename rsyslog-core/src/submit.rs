use std::sync::Mutex;

use crate::{Message, Result};

/// Accepts parsed messages from an input module for routing.
pub trait MessageSubmitter: Send + Sync {
    fn submit(&self, msg: Message) -> Result<()>;

    /// Submit a batch in one call. The default forwards one by one; hosts
    /// with a cheaper bulk path override this.
    fn submit_multiple(&self, msgs: Vec<Message>) -> Result<()> {
        for msg in msgs {
            self.submit(msg)?;
        }
        Ok(())
    }
}

/// Default capacity of a [`MultiSubmit`] buffer.
pub const MULTI_SUBMIT_CAPACITY: usize = 50;

/// Buffers outbound messages so an input can amortize submission cost over
/// several records. Must be flushed explicitly; dropping a non-empty buffer
/// loses messages (inputs flush at end of request/connection).
pub struct MultiSubmit<'a> {
    submitter: &'a dyn MessageSubmitter,
    buf: Vec<Message>,
    capacity: usize,
}

impl<'a> MultiSubmit<'a> {
    pub fn new(submitter: &'a dyn MessageSubmitter) -> Self {
        MultiSubmit {
            submitter,
            buf: Vec::with_capacity(MULTI_SUBMIT_CAPACITY),
            capacity: MULTI_SUBMIT_CAPACITY,
        }
    }

    pub fn with_capacity(submitter: &'a dyn MessageSubmitter, capacity: usize) -> Self {
        MultiSubmit {
            submitter,
            buf: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn add(&mut self, msg: Message) -> Result<()> {
        self.buf.push(msg);
        if self.buf.len() >= self.capacity {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.buf);
        self.submitter.submit_multiple(batch)
    }
}

/// Test submitter that records everything it receives.
#[derive(Debug, Default)]
pub struct CollectingSubmitter {
    messages: Mutex<Vec<Message>>,
}

impl CollectingSubmitter {
    pub fn new() -> Self {
        CollectingSubmitter::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageSubmitter for CollectingSubmitter {
    fn submit(&self, msg: Message) -> Result<()> {
        self.messages.lock().unwrap().push(msg);
        Ok(())
    }
}
