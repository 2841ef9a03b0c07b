//! Sequencing inputs
//!
//! Mirror of [`CollectorQueue`](super::CollectorQueue) on the sending side.
//! A handler's outgoing data is one `InputQueue`; raw `send` calls append a
//! [`BytesInput`](super::BytesInput) to it, so bytes leave in enqueue order.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use super::{Input, Sink, Tick};

type Pending = Rc<RefCell<VecDeque<Box<dyn Input>>>>;

/// Appends members to an [`InputQueue`] from inside callbacks.
#[derive(Clone)]
pub struct InputHandle {
    pending: Pending,
}

impl InputHandle {
    pub fn push<I: Input + 'static>(&self, input: I) {
        self.pending.borrow_mut().push_back(Box::new(input));
    }

    pub fn push_boxed(&self, input: Box<dyn Input>) {
        self.pending.borrow_mut().push_back(input);
    }
}

/// Runs member inputs in order.
///
/// The queue reports `done` whenever it runs dry; pushing more members
/// afterwards makes it productive again.
#[derive(Default)]
pub struct InputQueue {
    current: Option<Box<dyn Input>>,
    pending: Pending,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<I: Input + 'static>(&mut self, input: I) {
        self.pending.borrow_mut().push_back(Box::new(input));
    }

    pub fn push_boxed(&mut self, input: Box<dyn Input>) {
        self.pending.borrow_mut().push_back(input);
    }

    pub fn handle(&self) -> InputHandle {
        InputHandle {
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

    /// Drop every member, closing the unfinished ones.
    pub fn clear(&mut self) {
        if let Some(mut current) = self.current.take() {
            current.close();
        }
        let drained: Vec<_> = self.pending.borrow_mut().drain(..).collect();
        for mut input in drained {
            input.close();
        }
    }
}

impl Input for InputQueue {
    fn tick(&mut self, sink: &mut dyn Sink) -> io::Result<Tick> {
        let mut sent = 0;
        loop {
            let next = self
                .current
                .take()
                .or_else(|| self.pending.borrow_mut().pop_front());
            let Some(mut member) = next else {
                return Ok(Tick { sent, done: true });
            };
            let tick = member.tick(sink)?;
            sent += tick.sent;
            if !tick.done {
                self.current = Some(member);
                return Ok(Tick { sent, done: false });
            }
        }
    }

    fn remaining(&self) -> Option<usize> {
        let mut total = match &self.current {
            Some(member) => member.remaining()?,
            None => 0,
        };
        for member in self.pending.borrow().iter() {
            total += member.remaining()?;
        }
        Some(total)
    }

    fn close(&mut self) {
        self.clear();
    }
}

type Factory = Box<dyn FnMut() -> Option<Box<dyn Input>>>;

/// Pulls members from a closure until it returns `None`.
pub struct FactoryInput {
    factory: Factory,
    current: Option<Box<dyn Input>>,
    done: bool,
}

impl FactoryInput {
    pub fn new<F>(factory: F) -> Self
    where
        F: FnMut() -> Option<Box<dyn Input>> + 'static,
    {
        Self {
            factory: Box::new(factory),
            current: None,
            done: false,
        }
    }

    pub fn from_iterator<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn Input>>,
        I::IntoIter: 'static,
    {
        let mut iter = iter.into_iter();
        Self::new(move || iter.next())
    }
}

impl Input for FactoryInput {
    fn tick(&mut self, sink: &mut dyn Sink) -> io::Result<Tick> {
        let mut sent = 0;
        while !self.done {
            let mut member = match self.current.take() {
                Some(member) => member,
                None => match (self.factory)() {
                    Some(member) => member,
                    None => {
                        self.done = true;
                        break;
                    }
                },
            };
            let tick = member.tick(sink)?;
            sent += tick.sent;
            if !tick.done {
                self.current = Some(member);
                return Ok(Tick { sent, done: false });
            }
        }
        Ok(Tick { sent, done: true })
    }

    fn close(&mut self) {
        if let Some(mut current) = self.current.take() {
            current.close();
        }
        self.done = true;
    }
}
