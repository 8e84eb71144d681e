use stage_pipeline::{
    Channel, CollectErrors, Counter, FeedError, Identity, Pipeline, PipelineBuilder, PipelineError, PipelineState,
    ProduceError, StageConfig,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sorted<T: Ord>(mut items: Vec<T>) -> Vec<T> {
    items.sort();
    items
}

#[test]
fn test_three_stage_scenario() {
    init_logging();
    let pipeline = PipelineBuilder::new(5)
        .stage(StageConfig::map("double", 2, |x: &i64| x * 2))
        .stage(StageConfig::map("increment", 2, |x: &i64| x + 1))
        .stage(StageConfig::map("to_string", 1, |x: &i64| x.to_string()))
        .build()
        .expect("Pipeline build failed");

    for i in 1..=20 {
        pipeline.feed(i, None).expect("Feed failed");
    }
    pipeline.shutdown(Some(Duration::from_secs(10))).expect("Shutdown failed");
    assert_eq!(pipeline.state(), PipelineState::Closed);

    let results = pipeline.drain(Some(Duration::ZERO));
    let expected: Vec<String> = (1..=20).map(|x: i64| (2 * x + 1).to_string()).collect();
    assert_eq!(sorted(results), sorted(expected));
}

#[test]
fn test_single_worker_order_preserved() {
    init_logging();
    let pipeline = Pipeline::from_stages(3, vec![StageConfig::map("triple", 1, |x: &u32| x * 3)])
        .expect("Pipeline build failed");

    for i in 1..=100 {
        pipeline.feed(i, None).expect("Feed failed");
    }
    pipeline.shutdown(None).expect("Shutdown failed");

    let expected: Vec<u32> = (1..=100).map(|x| x * 3).collect();
    assert_eq!(pipeline.drain(Some(Duration::ZERO)), expected);
}

#[test]
fn test_single_worker_chain_is_fifo_end_to_end() {
    let pipeline = Pipeline::from_stages(
        2,
        vec![
            StageConfig::new("first", 1, Identity::<u16>::new()),
            StageConfig::new("second", 1, Identity::<u16>::new()),
            StageConfig::new("third", 1, Identity::<u16>::new()),
        ],
    )
    .expect("Pipeline build failed");

    for i in 0..200u16 {
        pipeline.feed(i, None).expect("Feed failed");
    }
    pipeline.shutdown(None).expect("Shutdown failed");
    assert_eq!(pipeline.drain(None), (0..200).collect::<Vec<u16>>());
}

#[test]
fn test_no_loss_no_duplication_with_many_workers() {
    init_logging();
    for workers in [1, 2, 4, 8] {
        let pipeline = Pipeline::from_stages(4, vec![StageConfig::new("identity", workers, Identity::<u32>::new())])
            .expect("Pipeline build failed");

        for i in 0..500u32 {
            pipeline.feed(i, None).expect("Feed failed");
        }
        pipeline.shutdown(None).expect("Shutdown failed");

        let results = pipeline.drain(Some(Duration::ZERO));
        assert_eq!(sorted(results), (0..500).collect::<Vec<u32>>(), "workers = {workers}");
    }
}

#[test]
fn test_shutdown_completeness_with_slow_stages() {
    init_logging();
    let pipeline = PipelineBuilder::new(2)
        .stage(StageConfig::map("slow", 3, |x: &u64| {
            thread::sleep(Duration::from_millis(2));
            *x
        }))
        .stage(StageConfig::map("slower", 2, |x: &u64| {
            thread::sleep(Duration::from_millis(3));
            x + 1
        }))
        .build()
        .expect("Pipeline build failed");

    let fed = 60u64;
    for i in 0..fed {
        pipeline.feed(i, None).expect("Feed failed");
    }
    pipeline.shutdown(Some(Duration::from_secs(30))).expect("Shutdown failed");

    let results = pipeline.drain(Some(Duration::ZERO));
    assert_eq!(results.len() as u64, fed);
    assert_eq!(sorted(results), (1..=fed).collect::<Vec<_>>());
}

#[test]
fn test_feed_applies_backpressure() {
    let pipeline = Pipeline::from_stages(
        1,
        vec![StageConfig::map("stuck", 1, |x: &u8| {
            thread::sleep(Duration::from_millis(200));
            *x
        })],
    )
    .expect("Pipeline build failed");

    // The worker holds one item, the input holds another: the third cannot fit
    pipeline.feed(1, None).expect("Feed failed");
    thread::sleep(Duration::from_millis(20));
    pipeline.feed(2, None).expect("Feed failed");

    let start = Instant::now();
    assert_eq!(pipeline.feed(3, Some(Duration::ZERO)), Err(FeedError::Full(3)));
    assert!(start.elapsed() < Duration::from_millis(100));

    pipeline.shutdown(Some(Duration::from_secs(10))).expect("Shutdown failed");
    assert_eq!(pipeline.drain(Some(Duration::ZERO)), vec![1, 2]);
}

#[test]
fn test_feed_rejected_once_shutdown_started() {
    let pipeline = Arc::new(
        Pipeline::from_stages(
            0,
            vec![StageConfig::map("sleepy", 1, |x: &u8| {
                thread::sleep(Duration::from_millis(100));
                *x
            })],
        )
        .expect("Pipeline build failed"),
    );
    pipeline.feed(1, None).expect("Feed failed");

    let stopper = {
        let pipeline = Arc::clone(&pipeline);
        thread::spawn(move || pipeline.shutdown(Some(Duration::from_secs(10))))
    };
    thread::sleep(Duration::from_millis(20));
    assert!(matches!(pipeline.feed(2, None), Err(FeedError::NotRunning(2)) | Err(FeedError::Closed(2))));

    stopper.join().unwrap().expect("Shutdown failed");
    assert_eq!(pipeline.drain(None), vec![1]);
}

#[test]
fn test_shutdown_timeout_preserves_state() {
    init_logging();
    let pipeline = Pipeline::from_stages(
        4,
        vec![StageConfig::map("slow", 1, |x: &u32| {
            thread::sleep(Duration::from_millis(150));
            *x
        })],
    )
    .expect("Pipeline build failed");

    for i in 0..3 {
        pipeline.feed(i, None).expect("Feed failed");
    }
    let err = pipeline.shutdown(Some(Duration::from_millis(10))).unwrap_err();
    assert!(matches!(err, PipelineError::ShutdownTimeout { ref stage, .. } if stage == "slow"));
    assert_eq!(pipeline.state(), PipelineState::ShuttingDown);
    assert!(matches!(pipeline.feed(9, None), Err(FeedError::NotRunning(9))));

    pipeline.shutdown(Some(Duration::from_secs(10))).expect("Shutdown failed");
    assert_eq!(pipeline.state(), PipelineState::Closed);
    assert_eq!(pipeline.drain(Some(Duration::ZERO)), vec![0, 1, 2]);
}

#[test]
fn test_transform_errors_skip_items() {
    init_logging();
    let errors = Arc::new(CollectErrors::<String>::new());
    let pipeline = PipelineBuilder::new(4)
        .stage(
            StageConfig::try_map("parse", 2, |s: &String| s.trim().parse::<i32>()).with_error_sink(Arc::clone(&errors)),
        )
        .stage(StageConfig::map("negate", 1, |x: &i32| -x))
        .build()
        .expect("Pipeline build failed");

    for s in ["1", " 2", "three", "4 ", "", "6"] {
        pipeline.feed(s.to_string(), None).expect("Feed failed");
    }
    pipeline.shutdown(None).expect("Shutdown failed");

    assert_eq!(sorted(pipeline.drain(Some(Duration::ZERO))), vec![-6, -4, -2, -1]);
    let failed = sorted(errors.take().into_iter().map(|e| e.into_item()).collect::<Vec<_>>());
    assert_eq!(failed, vec!["", "three"]);

    let metrics = pipeline.stage_metrics(0).expect("Metrics not found");
    assert_eq!(metrics.total_processed(), 4);
    assert_eq!(metrics.total_failed(), 2);
}

#[test]
fn test_panicking_transform_does_not_lose_later_items() {
    init_logging();
    let errors = Arc::new(CollectErrors::<u32>::new());
    let pipeline = PipelineBuilder::new(0)
        .stage(
            StageConfig::map("reciprocal", 1, |x: &u32| {
                if *x == 0 {
                    panic!("division by zero");
                }
                1000 / x
            })
            .with_error_sink(Arc::clone(&errors)),
        )
        .stage(StageConfig::map("label", 1, |x: &u32| x.to_string()))
        .build()
        .expect("Pipeline build failed");

    for i in 0..5 {
        pipeline.feed(i, None).expect("Feed failed");
    }
    pipeline.shutdown(Some(Duration::from_secs(10))).expect("Shutdown failed");

    assert_eq!(pipeline.drain(Some(Duration::ZERO)), vec!["1000", "500", "333", "250"]);
    assert!(pipeline.channel_stats().iter().all(|s| s.len == 0));

    let failed = errors.take();
    assert_eq!(failed.len(), 1);
    assert_eq!(*failed[0].item(), 0);
    assert_eq!(failed[0].stage(), "reciprocal");
    assert!(failed[0].cause().to_string().contains("division by zero"));
    assert_eq!(pipeline.stage_metrics(0).expect("Metrics not found").total_failed(), 1);
}

#[test]
fn test_drain_while_running() {
    let pipeline = Pipeline::from_stages(8, vec![StageConfig::map("inc", 2, |x: &i32| x + 1)])
        .expect("Pipeline build failed");

    for i in 0..10 {
        pipeline.feed(i, None).expect("Feed failed");
    }

    let mut collected = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while collected.len() < 10 && Instant::now() < deadline {
        collected.extend(pipeline.drain(Some(Duration::from_millis(20))));
    }
    assert_eq!(sorted(collected), (1..=10).collect::<Vec<_>>());

    // Nothing left: a zero-timeout drain returns at once
    assert!(pipeline.drain(Some(Duration::ZERO)).is_empty());
    pipeline.shutdown(None).expect("Shutdown failed");
}

#[test]
fn test_concurrent_feeders() {
    init_logging();
    let pipeline = Pipeline::from_stages(4, vec![StageConfig::map("square", 3, |x: &u64| x * x)])
        .expect("Pipeline build failed");

    thread::scope(|scope| {
        for feeder in 0..4u64 {
            let pipeline = &pipeline;
            scope.spawn(move || {
                for i in 0..100 {
                    pipeline.feed(feeder * 100 + i, None).expect("Feed failed");
                }
            });
        }
    });
    pipeline.shutdown(None).expect("Shutdown failed");

    let expected: Vec<u64> = (0..400).map(|x| x * x).collect();
    assert_eq!(sorted(pipeline.drain(Some(Duration::ZERO))), expected);
}

#[test]
fn test_counter_as_instrumentation() {
    let seen = Arc::new(Counter::default());
    let pipeline = {
        let seen = Arc::clone(&seen);
        Pipeline::from_stages(
            4,
            vec![StageConfig::map("count", 4, move |x: &u32| {
                seen.increment();
                *x
            })],
        )
        .expect("Pipeline build failed")
    };

    for i in 0..250 {
        pipeline.feed(i, None).expect("Feed failed");
    }
    pipeline.shutdown(None).expect("Shutdown failed");

    assert_eq!(seen.get(), 250);
    assert_eq!(pipeline.drain(None).len(), 250);
}

#[test]
fn test_counter_concurrent_increments() {
    for (threads, increments) in [(1, 1), (4, 250), (10, 1000)] {
        let counter = Arc::new(Counter::new(0));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..increments {
                        counter.increment();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.get(), threads * increments);
    }
}

#[test]
fn test_channel_fifo_for_all_capacities() {
    for capacity in [1, 2, 7, 64] {
        let channel = Arc::new(Channel::new(capacity));
        let producer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                for i in 0..300 {
                    channel.produce(i, None).expect("Produce failed");
                }
                channel.close();
            })
        };

        let mut received = Vec::new();
        while let Ok(item) = channel.consume(None) {
            received.push(item);
        }
        producer.join().unwrap();
        assert_eq!(received, (0..300).collect::<Vec<_>>(), "capacity = {capacity}");
    }
}

#[test]
fn test_channel_probe_on_full() {
    let channel = Channel::new(1);
    channel.try_produce("first").unwrap();
    let start = Instant::now();
    assert_eq!(channel.produce("second", Some(Duration::ZERO)), Err(ProduceError::Full("second")));
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[test]
fn test_metrics_summary_lists_stages() {
    let pipeline = PipelineBuilder::new(4)
        .stage(StageConfig::map("words", 1, |line: &String| line.split_whitespace().count()))
        .stage(StageConfig::map("label", 1, |n: &usize| format!("{n} words")))
        .build()
        .expect("Pipeline build failed");

    pipeline.feed("a b c".to_string(), None).expect("Feed failed");
    pipeline.shutdown(None).expect("Shutdown failed");

    let summary = pipeline.metrics_summary();
    assert!(summary.contains("words: Processed: 1"));
    assert!(summary.contains("label: Processed: 1"));
    assert_eq!(pipeline.drain(None), vec!["3 words".to_string()]);

    let counts: HashMap<&str, u64> = pipeline
        .stage_names()
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), pipeline.stage_metrics(i).unwrap().total_processed()))
        .collect();
    assert_eq!(counts["words"], 1);
}
