//! Bounded fan-out over independent items.
//!
//! Items must be commutative (disjoint paths or cache entries); no
//! inter-item ordering is imposed. A bounded worker count caps in-flight
//! work, a progress channel feeds the reporter without participating in
//! correctness, and the cancel token is checked between items.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use anyhow::{Result, anyhow};

use crate::report::{CancelToken, Progress, Reporter};

fn worker_count(items: usize) -> usize {
    let cores = thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1);
    cores.min(items).max(1)
}

/// Apply `f` to every item on a bounded worker pool and return results in
/// item order. The first failure wins; remaining items are skipped.
pub fn map<T, R, F>(
    name: &str,
    items: Vec<T>,
    f: F,
    reporter: &mut dyn Reporter,
    cancel: &CancelToken,
) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Sync,
{
    cancel.check()?;
    reporter.progress(Progress::Started {
        name: name.to_string(),
        total: items.len(),
    });

    if items.is_empty() {
        reporter.progress(Progress::Done {
            name: name.to_string(),
        });
        return Ok(Vec::new());
    }

    let total = items.len();
    let next = AtomicUsize::new(0);
    let slots: Mutex<Vec<Option<R>>> = Mutex::new((0..total).map(|_| None).collect());
    let failure: Mutex<Option<anyhow::Error>> = Mutex::new(None);
    let (tick_tx, tick_rx) = mpsc::channel::<()>();

    thread::scope(|scope| {
        for _ in 0..worker_count(total) {
            let tick = tick_tx.clone();
            scope.spawn(|| {
                let tick = tick;
                loop {
                    if cancel.is_cancelled() || failure.lock().expect("failure lock").is_some() {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    if index >= total {
                        break;
                    }
                    match f(&items[index]) {
                        Ok(result) => {
                            slots.lock().expect("slots lock")[index] = Some(result);
                            let _ = tick.send(());
                        }
                        Err(err) => {
                            let mut failure = failure.lock().expect("failure lock");
                            if failure.is_none() {
                                *failure = Some(err);
                            }
                            break;
                        }
                    }
                }
            });
        }
        drop(tick_tx);

        // Drain ticks while workers run so the reporter sees progress live.
        while tick_rx.recv().is_ok() {
            reporter.progress(Progress::Ticked {
                name: name.to_string(),
            });
        }
    });

    reporter.progress(Progress::Done {
        name: name.to_string(),
    });

    if let Some(err) = failure.into_inner().expect("failure lock") {
        return Err(err);
    }
    cancel.check()?;

    let results = slots.into_inner().expect("slots lock");
    results
        .into_iter()
        .collect::<Option<Vec<R>>>()
        .ok_or_else(|| anyhow!("fan-out `{name}` dropped an item"))
}
