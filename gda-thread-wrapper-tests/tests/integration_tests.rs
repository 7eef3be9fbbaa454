// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gda_thread_wrapper::{ConnectFlags, SignalSource, ThreadWrapper, Value};
use gda_thread_wrapper_tests::connection::Connection;
use gda_thread_wrapper_tests::dummy_object::{dummy_object, emit_sequence, SignalLog};
use gda_thread_wrapper_tests::run_log::RunLog;

const NTHREADS: usize = 10;
const NCALLS: usize = 10;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct FreeCounter(Arc<AtomicUsize>);

impl Drop for FreeCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Many threads share one wrapper, each mixing value and void jobs, and
/// every argument is freed exactly once.
#[test]
fn test_many_threads_mixed_jobs() {
    init_logging();
    let wrapper = ThreadWrapper::new().unwrap();
    let freed = Arc::new(AtomicUsize::new(0));

    thread::scope(|s| {
        for t in 0..NTHREADS {
            let wrapper = &wrapper;
            let freed = freed.clone();
            s.spawn(move || {
                let mut ids = Vec::with_capacity(NCALLS);
                for i in 0..NCALLS {
                    let arg = (i + t * 1000) as i64;
                    let id = wrapper.submit(move || Ok(arg)).unwrap();
                    ids.push((id, arg));

                    let label = format!("thread {t} call {i}");
                    wrapper
                        .submit_void_with_arg(
                            (label, FreeCounter(freed.clone())),
                            |(label, _): &mut (String, FreeCounter)| {
                                log::debug!("void job for {label}");
                                Ok(())
                            },
                        )
                        .unwrap();
                    if i % 3 == 0 {
                        thread::yield_now();
                    }
                }

                for (id, expected) in ids {
                    let value = wrapper.fetch_result::<i64>(true, id).unwrap().unwrap();
                    assert_eq!(value, expected);
                }
                while wrapper.waiting_size() > 0 {
                    wrapper.iterate(false);
                    thread::sleep(Duration::from_millis(1));
                }
                wrapper.iterate(false);
                assert_eq!(wrapper.waiting_size(), 0);
            });
        }
    });

    assert_eq!(freed.load(Ordering::SeqCst), NTHREADS * NCALLS);
}

/// Every thread receives exactly the signals its own jobs caused, in
/// emission order, and nothing emitted outside the worker.
#[test]
fn test_signals_reach_the_right_thread() {
    init_logging();
    let wrapper = ThreadWrapper::new().unwrap();
    let dummy = Arc::new(dummy_object());

    thread::scope(|s| {
        for t in 0..NTHREADS {
            let wrapper = &wrapper;
            let dummy = dummy.clone();
            s.spawn(move || {
                let received = SignalLog::default();
                let sent = SignalLog::default();

                let handlers: Vec<_> = ["sig0", "sig1", "sig2"]
                    .into_iter()
                    .map(|name| {
                        let received = received.clone();
                        wrapper
                            .connect_raw(
                                dummy.clone(),
                                name,
                                ConnectFlags::default(),
                                move |_: &ThreadWrapper,
                                      _: &dyn SignalSource,
                                      name: &str,
                                      args: &[Value]| {
                                    received.push(name, args);
                                },
                            )
                            .unwrap()
                    })
                    .collect();

                let mut ids = Vec::with_capacity(NCALLS);
                for i in 0..NCALLS {
                    let dummy_in_job = dummy.clone();
                    let sent_in_job = sent.clone();
                    let tag = (t * 100 + i) as i64;
                    let id = wrapper
                        .submit(move || {
                            emit_sequence(&dummy_in_job, tag, "Hello", &sent_in_job);
                            Ok(tag)
                        })
                        .unwrap();
                    ids.push((id, tag));

                    if i % 2 == 0 {
                        let dummy_in_job = dummy.clone();
                        let sent_in_job = sent.clone();
                        wrapper
                            .submit_void(move || {
                                emit_sequence(&dummy_in_job, -tag, "Thread", &sent_in_job);
                                Ok(())
                            })
                            .unwrap();
                    }
                }

                for (id, tag) in ids {
                    // emitted outside the worker, must be ignored
                    dummy.emit("sig0", &[]);
                    assert_eq!(wrapper.fetch_result::<i64>(true, id).unwrap().unwrap(), tag);
                    dummy.emit("sig1", &[Value::from(666)]);
                }
                while wrapper.waiting_size() > 0 {
                    wrapper.iterate(false);
                    thread::sleep(Duration::from_millis(1));
                }
                wrapper.iterate(false);

                assert_eq!(received.snapshot(), sent.snapshot());
                for handler in handlers {
                    wrapper.disconnect(handler).unwrap();
                }
            });
        }
    });

    assert_eq!(dummy.handler_count(), 0);
}

/// The connection refuses foreign threads when used directly, but works
/// from any thread through the wrapper.
#[test]
fn test_connection_through_wrapper() {
    init_logging();
    let wrapper = ThreadWrapper::new().unwrap();
    let cnc = Arc::new(Connection::new());
    let inserted = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));

    let seen = inserted.clone();
    let row_handler = wrapper
        .connect(
            cnc.clone(),
            "row-inserted",
            move |_: &ThreadWrapper, _: &dyn SignalSource, _: &str, args: &[Value]| {
                assert_eq!(args.len(), 2);
                assert_eq!(args[0].as_i64(), Some(1));
                assert_eq!(args[1].as_str(), Some("alice"));
                seen.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
    let seen = errors.clone();
    let error_handler = wrapper
        .connect(
            cnc.clone(),
            "error",
            move |_: &ThreadWrapper, _: &dyn SignalSource, _: &str, _: &[Value]| {
                seen.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

    let job_cnc = cnc.clone();
    let id = wrapper.submit(move || job_cnc.insert("alice")).unwrap();
    assert_eq!(wrapper.fetch_result::<i64>(true, id).unwrap().unwrap(), 1);

    // bound to the worker now
    assert!(cnc.insert("mallory").is_err());

    thread::scope(|s| {
        s.spawn(|| {
            let job_cnc = cnc.clone();
            let id = wrapper.submit(move || job_cnc.insert("bob")).unwrap();
            assert_eq!(wrapper.fetch_result::<i64>(true, id).unwrap().unwrap(), 2);
        });
    });

    let job_cnc = cnc.clone();
    let id = wrapper.submit(move || job_cnc.insert("")).unwrap();
    let err = wrapper.fetch_result::<i64>(true, id).unwrap().unwrap_err();
    assert!(err.as_execution().is_some());

    let job_cnc = cnc.clone();
    let id = wrapper.submit(move || job_cnc.select(2)).unwrap();
    assert_eq!(
        wrapper
            .fetch_result::<Option<String>>(true, id)
            .unwrap()
            .unwrap()
            .as_deref(),
        Some("bob")
    );

    // bob was inserted by another thread's job
    assert_eq!(inserted.load(Ordering::SeqCst), 1);
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    wrapper.disconnect(row_handler).unwrap();
    wrapper.disconnect(error_handler).unwrap();
}

#[test]
fn test_threaded_cnc_binary() {
    let threaded_cnc = env!("CARGO_BIN_EXE_threaded-cnc");

    let out = Command::new(threaded_cnc)
        .args(["--threads", "4", "--calls", "6", "--refuse-every", "3"])
        .output()
        .unwrap_or_else(|e| panic!("failed to run threaded-cnc: {e}"));

    println!("stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert!(out.status.success());

    let log: RunLog = serde_json::from_slice(&out.stdout).expect("run log is not valid JSON");
    assert_eq!(log.jobs.len(), 4 * 6);
    assert_eq!(log.failures, 0);
    assert_eq!(log.rows_in_table, 4 * 4);
    assert_eq!(log.signals_received, log.rows_in_table);
    assert!(log
        .jobs
        .iter()
        .all(|job| job.row.is_empty() == job.error.is_some()));
}
