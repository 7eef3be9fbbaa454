// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use clap::Parser;
use gda_thread_wrapper::{ShutdownMode, SignalSource, ThreadWrapper, Value};
use gda_thread_wrapper_tests::connection::Connection;
use gda_thread_wrapper_tests::run_log::{LoggedJob, RunLog};
use log::{info, warn};

/// Hammers one connection, which only tolerates a single thread, from many
/// threads through a thread wrapper and prints a JSON run log.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Number of calling threads
    #[arg(long, default_value_t = 10)]
    threads: usize,

    /// Inserts per calling thread
    #[arg(long, default_value_t = 10)]
    calls: usize,

    /// Every n-th insert uses an empty name, which the connection refuses
    #[arg(long, default_value_t = 0)]
    refuse_every: usize,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let wrapper = ThreadWrapper::builder()
        .worker_name("cnc-worker")
        .shutdown(ShutdownMode::Join)
        .build()?;
    let cnc = Arc::new(Connection::new());
    let signals_received = Arc::new(AtomicUsize::new(0));

    let jobs = thread::scope(|s| {
        let handles: Vec<_> = (0..args.threads)
            .map(|t| {
                let wrapper = &wrapper;
                let cnc = cnc.clone();
                let signals_received = signals_received.clone();
                s.spawn(move || -> anyhow::Result<Vec<LoggedJob>> {
                    let handler = wrapper.connect(
                        cnc.clone(),
                        "row-inserted",
                        move |_: &ThreadWrapper, _: &dyn SignalSource, _: &str, _: &[Value]| {
                            signals_received.fetch_add(1, Ordering::Relaxed);
                        },
                    )?;

                    let mut submitted = Vec::with_capacity(args.calls);
                    for i in 0..args.calls {
                        let refuse = args.refuse_every > 0 && (i + 1) % args.refuse_every == 0;
                        let row = if refuse {
                            String::new()
                        } else {
                            format!("thread {t} row {i}")
                        };
                        let cnc = cnc.clone();
                        let id = wrapper.submit_with_arg(row.clone(), move |row: &mut String| {
                            cnc.insert(row.as_str())
                        })?;
                        submitted.push((id, row));
                    }

                    let mut logged = Vec::with_capacity(submitted.len());
                    for (id, row) in submitted {
                        let (inserted_id, error) = match wrapper.fetch_result::<i64>(true, id) {
                            Some(Ok(inserted)) => (Some(inserted), None),
                            Some(Err(e)) => (None, Some(e.to_string())),
                            None => (None, Some("no result".to_string())),
                        };
                        logged.push(LoggedJob {
                            thread: t,
                            job_id: id.get(),
                            row,
                            inserted_id,
                            error,
                        });
                    }
                    wrapper.disconnect(handler)?;
                    Ok(logged)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| anyhow::anyhow!("calling thread panicked"))
                    .and_then(|logged| logged)
            })
            .collect::<anyhow::Result<Vec<_>>>()
    })?;

    let count_cnc = cnc.clone();
    let id = wrapper.submit(move || count_cnc.row_count())?;
    let rows_in_table = wrapper
        .fetch_result::<usize>(true, id)
        .ok_or_else(|| anyhow::anyhow!("row count job has no result"))??;

    let jobs: Vec<LoggedJob> = jobs.into_iter().flatten().collect();
    let failures = jobs
        .iter()
        .filter(|job| job.error.is_some() && !job.row.is_empty())
        .count();
    if failures > 0 {
        warn!("{failures} insert(s) failed unexpectedly");
    }
    info!("{} row(s) inserted", rows_in_table);

    let log = RunLog {
        threads: args.threads,
        calls: args.calls,
        rows_in_table,
        signals_received: signals_received.load(Ordering::Relaxed),
        failures,
        jobs,
    };
    println!("{}", serde_json::to_string_pretty(&log)?);
    Ok(())
}
