//! Sequencing collectors
//!
//! [`CollectorQueue`] feeds its members one after another. Members waiting to
//! run live behind a shared [`CollectorHandle`], so a member's completion
//! callback can append the next member. That is how a header decides the
//! shape of the body in length-prefixed protocols.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::{Collector, Step};
use crate::error::CodecError;

type Pending = Rc<RefCell<VecDeque<Box<dyn Collector>>>>;

/// Appends members to a [`CollectorQueue`] from inside callbacks.
#[derive(Clone)]
pub struct CollectorHandle {
    pending: Pending,
}

impl CollectorHandle {
    pub fn push<C: Collector + 'static>(&self, collector: C) {
        self.pending.borrow_mut().push_back(Box::new(collector));
    }

    pub fn push_boxed(&self, collector: Box<dyn Collector>) {
        self.pending.borrow_mut().push_back(collector);
    }
}

/// Runs member collectors in order; completes after the last one.
#[derive(Default)]
pub struct CollectorQueue {
    current: Option<Box<dyn Collector>>,
    pending: Pending,
    started: bool,
    done: bool,
}

impl CollectorQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_collectors<I>(collectors: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn Collector>>,
    {
        let queue = Self::new();
        queue.pending.borrow_mut().extend(collectors);
        queue
    }

    pub fn push<C: Collector + 'static>(&mut self, collector: C) {
        self.pending.borrow_mut().push_back(Box::new(collector));
    }

    pub fn handle(&self) -> CollectorHandle {
        CollectorHandle {
            pending: self.pending.clone(),
        }
    }

    /// Members not yet finished, including the running one.
    pub fn len(&self) -> usize {
        self.pending.borrow().len() + self.current.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_member(&mut self) -> Option<Box<dyn Collector>> {
        // The borrow ends before the member runs; its callbacks may push.
        self.current
            .take()
            .or_else(|| self.pending.borrow_mut().pop_front())
    }
}

impl Collector for CollectorQueue {
    fn add_data(&mut self, data: &[u8]) -> Result<Step, CodecError> {
        if self.done {
            return Ok(Step::done(0));
        }
        let mut offset = 0;
        loop {
            let Some(mut member) = self.next_member() else {
                self.done = true;
                return Ok(Step::done(offset));
            };
            let step = member.add_data(&data[offset..])?;
            offset += step.consumed;
            if step.consumed > 0 {
                self.started = true;
            }
            if !step.done {
                self.current = Some(member);
                return Ok(Step::more(offset));
            }
            // Finished member dropped; go straight on so zero-length members settle.
        }
    }

    fn close(&mut self) -> Result<bool, CodecError> {
        if self.done {
            return Ok(true);
        }
        let complete = match self.current.as_mut() {
            Some(member) => member.close()?,
            None => false,
        };
        let pending = self.pending.borrow().len();
        if complete {
            self.current = None;
        }
        match (complete, pending) {
            (true, 0) => {
                self.done = true;
                Ok(true)
            }
            (false, _) if !self.started => Ok(false),
            _ => Err(CodecError::Truncated {
                received: 0,
                expected: pending.max(1),
            }),
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

type Factory = Box<dyn FnMut() -> Option<Box<dyn Collector>>>;

/// Pulls members from a closure, one after another.
///
/// Completes once the closure returns `None`. Useful as the long-lived
/// collector of a connection carrying a stream of messages.
pub struct FactoryCollector {
    factory: Factory,
    current: Option<Box<dyn Collector>>,
    done: bool,
}

impl FactoryCollector {
    pub fn new<F>(factory: F) -> Self
    where
        F: FnMut() -> Option<Box<dyn Collector>> + 'static,
    {
        Self {
            factory: Box::new(factory),
            current: None,
            done: false,
        }
    }

    /// Adapts an iterator of collectors.
    pub fn from_iterator<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn Collector>>,
        I::IntoIter: 'static,
    {
        let mut iter = iter.into_iter();
        Self::new(move || iter.next())
    }
}

impl Collector for FactoryCollector {
    fn add_data(&mut self, data: &[u8]) -> Result<Step, CodecError> {
        if self.done {
            return Ok(Step::done(0));
        }
        let mut offset = 0;
        loop {
            let mut member = match self.current.take() {
                Some(member) => member,
                None => match (self.factory)() {
                    Some(member) => member,
                    None => {
                        self.done = true;
                        return Ok(Step::done(offset));
                    }
                },
            };
            let step = member.add_data(&data[offset..])?;
            offset += step.consumed;
            if !step.done {
                self.current = Some(member);
                return Ok(Step::more(offset));
            }
            if offset == data.len() && step.consumed == 0 {
                // Nothing left to offer; create the next member on the next call.
                return Ok(Step::more(offset));
            }
        }
    }

    fn close(&mut self) -> Result<bool, CodecError> {
        if self.done {
            return Ok(true);
        }
        self.done = true;
        match self.current.as_mut() {
            Some(member) => member.close(),
            None => Ok(false),
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }
}
