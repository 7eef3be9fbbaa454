// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use clap::Parser;
use gda_thread_wrapper::{Emitter, ShutdownMode, SignalSource, ThreadWrapper, Value, ValueType};
use log::{debug, info};
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Number of calling threads
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Jobs submitted by each calling thread
    #[arg(long, default_value_t = 25)]
    jobs: usize,

    /// What to do with the worker thread on exit
    #[arg(long, value_enum, default_value_t = ShutdownMode::Join)]
    shutdown: ShutdownMode,
}

#[derive(Debug, Serialize)]
struct ThreadSummary {
    thread: usize,
    sum: i64,
    signals: usize,
    errors: usize,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let wrapper = ThreadWrapper::builder()
        .worker_name("gda-demo-worker")
        .shutdown(args.shutdown)
        .build()?;
    let counter = Arc::new(
        Emitter::new("demo counter").with_signal("added", &[ValueType::Int, ValueType::Int]),
    );
    info!(
        "Running {} thread(s) with {} job(s) each on {}",
        args.threads,
        args.jobs,
        wrapper.config().worker_name
    );

    let summaries = thread::scope(|s| {
        let handles: Vec<_> = (0..args.threads)
            .map(|t| {
                let wrapper = &wrapper;
                let counter = counter.clone();
                s.spawn(move || run_thread(wrapper, counter, t, args.jobs))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| anyhow::anyhow!("calling thread panicked"))
                    .and_then(|summary| summary)
            })
            .collect::<anyhow::Result<Vec<_>>>()
    })?;

    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

fn run_thread(
    wrapper: &ThreadWrapper,
    counter: Arc<Emitter>,
    thread_index: usize,
    jobs: usize,
) -> anyhow::Result<ThreadSummary> {
    let signals = Arc::new(AtomicUsize::new(0));
    let seen = signals.clone();
    let handler = wrapper.connect(
        counter.clone(),
        "added",
        move |_: &ThreadWrapper, _: &dyn SignalSource, _: &str, args: &[Value]| {
            let value = args.first().and_then(Value::as_i64).unwrap_or_default();
            debug!("Counter reported {value}");
            seen.fetch_add(1, Ordering::Relaxed);
        },
    )?;

    let mut ids = Vec::with_capacity(jobs);
    for i in 0..jobs {
        let counter = counter.clone();
        let value = (thread_index * jobs + i) as i64;
        ids.push(wrapper.submit(move || {
            if value % 10 == 9 {
                anyhow::bail!("refusing to add {value}");
            }
            counter.emit("added", &[Value::from(value), Value::from(value * 2)]);
            Ok(value * 2)
        })?);
    }

    let mut summary = ThreadSummary {
        thread: thread_index,
        sum: 0,
        signals: 0,
        errors: 0,
    };
    for id in ids {
        match wrapper.fetch_result::<i64>(true, id) {
            Some(Ok(value)) => summary.sum += value,
            Some(Err(e)) => {
                debug!("Job {id} failed: {e}");
                summary.errors += 1;
            }
            None => anyhow::bail!("job {id} has no result"),
        }
    }

    wrapper.disconnect(handler)?;
    summary.signals = signals.load(Ordering::Relaxed);
    Ok(summary)
}
