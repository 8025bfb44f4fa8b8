//! A single thread that runs listener callbacks in order.
//!
//! Workers post notifications here instead of calling listeners themselves, so listener code never runs
//! concurrently with itself and a slow listener can't hold up a worker.
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

pub(crate) type Notification = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct Delivery {
    _thread: JoinHandle<()>,
}

impl Delivery {
    /// Start the delivery thread.  It runs until every [Sender] returned alongside it is dropped.
    pub(crate) fn start() -> std::io::Result<(Delivery, Sender<Notification>)> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let thread = std::thread::Builder::new()
            .name("asset-loader-delivery".into())
            .spawn(move || run(receiver))?;
        Ok((Delivery { _thread: thread }, sender))
    }
}

fn run(receiver: Receiver<Notification>) {
    for notification in receiver.iter() {
        if catch_unwind(AssertUnwindSafe(notification)).is_err() {
            log::error!("Listener panicked while handling a notification");
        }
    }
    log::debug!("Delivery thread exiting");
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_in_order_on_one_thread() {
        let (_delivery, sender) = Delivery::start().unwrap();
        let seen = Arc::new(Mutex::new(vec![]));
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        for i in 0..50 {
            let seen = seen.clone();
            sender
                .send(Box::new(move || {
                    let name = std::thread::current().name().map(String::from);
                    seen.lock().unwrap().push((i, name));
                }))
                .unwrap();
        }
        sender.send(Box::new(|| panic!("listener exploded"))).unwrap();
        sender
            .send(Box::new(move || done_tx.send(()).unwrap()))
            .unwrap();

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            (0..50).collect::<Vec<_>>()
        );
        assert!(seen
            .iter()
            .all(|(_, n)| n.as_deref() == Some("asset-loader-delivery")));
    }
}
