use crate::{
    error::Result,
    log::Log,
    transaction::{Data, Transaction},
    util::FileData,
    Status,
};
use std::rc::Rc;

/// Runs a list of callbacks in registration order. A callback returning
/// `Declined` passes control to the next one; `Stop` and `Error` abort the
/// run and propagate to the state machine.
macro_rules! run_all {
    ($callbacks:expr, $arg:expr) => {{
        for cbk in &$callbacks {
            match cbk($arg) {
                Ok(()) | Err(Status::Declined) => {}
                other => return other,
            }
        }
        Ok(())
    }};
}

/// Callbacks receiving a transaction at a lifecycle boundary (request line
/// seen, headers complete, transaction complete, ...).
#[derive(Clone, Default)]
pub struct TxHook {
    callbacks: Vec<Rc<dyn Fn(&mut Transaction) -> Result<()>>>,
}

impl TxHook {
    pub fn register(&mut self, cbk: impl Fn(&mut Transaction) -> Result<()> + 'static) {
        self.callbacks.push(Rc::new(cbk));
    }

    pub fn run_all(&self, tx: &mut Transaction) -> Result<()> {
        run_all!(self.callbacks, tx)
    }
}

/// Callbacks receiving a chunk of body, header, or trailer bytes.
#[derive(Clone, Default)]
pub struct DataHook {
    callbacks: Vec<Rc<dyn for<'a> Fn(&mut Data<'a>) -> Result<()>>>,
}

impl DataHook {
    pub fn register(&mut self, cbk: impl for<'a> Fn(&mut Data<'a>) -> Result<()> + 'static) {
        self.callbacks.push(Rc::new(cbk));
    }

    pub fn run_all(&self, data: &mut Data<'_>) -> Result<()> {
        run_all!(self.callbacks, data)
    }
}

/// Callbacks receiving file body chunks from PUT requests.
#[derive(Clone, Default)]
pub struct FileDataHook {
    callbacks: Vec<Rc<dyn for<'a> Fn(&mut FileData<'a>) -> Result<()>>>,
}

impl FileDataHook {
    pub fn register(&mut self, cbk: impl for<'a> Fn(&mut FileData<'a>) -> Result<()> + 'static) {
        self.callbacks.push(Rc::new(cbk));
    }

    pub fn run_all(&self, data: &mut FileData<'_>) -> Result<()> {
        run_all!(self.callbacks, data)
    }
}

/// Callbacks receiving every recorded log entry.
#[derive(Clone, Default)]
pub struct LogHook {
    callbacks: Vec<Rc<dyn Fn(&Log) -> Result<()>>>,
}

impl LogHook {
    pub fn register(&mut self, cbk: impl Fn(&Log) -> Result<()> + 'static) {
        self.callbacks.push(Rc::new(cbk));
    }

    pub fn run_all(&self, log: &Log) -> Result<()> {
        run_all!(self.callbacks, log)
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn declined_continues_stop_aborts() {
        let seen = Rc::new(Cell::new(0u32));
        let mut hook = TxHook::default();
        let s = Rc::clone(&seen);
        hook.register(move |_| {
            s.set(s.get() + 1);
            Err(Status::Declined)
        });
        let s = Rc::clone(&seen);
        hook.register(move |_| {
            s.set(s.get() + 1);
            Err(Status::Stop)
        });
        let s = Rc::clone(&seen);
        hook.register(move |_| {
            s.set(s.get() + 1);
            Ok(())
        });

        let mut tx = Transaction::new(0);
        assert_eq!(hook.run_all(&mut tx), Err(Status::Stop));
        assert_eq!(seen.get(), 2);
    }
}
