//! Number processing pipeline demonstrating filtering, failures and metrics
//!
//! Pipeline:
//! 1. Parse: turns text into numbers, rejecting anything that is not one
//! 2. Filter: keeps only even numbers
//! 3. Transform: multiplies by 10 on a pool of workers
//!
//! The main thread feeds the inputs, shuts the pipeline down and sums what
//! comes out of the last stage.
//!
//! Usage: RUST_LOG=debug cargo run --example filter_pipeline --release

use stage_pipeline::{CollectErrors, PipelineBuilder, StageConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Number Processing Pipeline");
    println!("==========================");
    println!("Parsing numbers 1-100, filtering evens, multiplying by 10, and summing");
    println!();

    let start = Instant::now();
    let rejected = Arc::new(CollectErrors::<String>::new());

    let pipeline = PipelineBuilder::new(50)
        .stage(StageConfig::try_map("parse", 2, |s: &String| s.parse::<u32>()).with_error_sink(Arc::clone(&rejected)))
        .stage(StageConfig::map("even_filter", 2, |n: &u32| (n % 2 == 0).then_some(*n)))
        .stage(StageConfig::map("multiply_by_10", 4, |n: &Option<u32>| n.map(|n| u64::from(n) * 10)))
        .build()?;

    for i in 1..=100 {
        pipeline.feed(i.to_string(), None)?;
        if i % 25 == 0 {
            pipeline.feed(format!("not-a-number-{i}"), None)?;
        }
    }
    pipeline.shutdown(Some(Duration::from_secs(10)))?;

    let kept: Vec<u64> = pipeline.drain(None).into_iter().flatten().collect();
    let sum: u64 = kept.iter().sum();

    println!("=== Final Results ===");
    println!("Total numbers kept: {}", kept.len());
    println!("Sum of all numbers: {}", sum);
    if !kept.is_empty() {
        println!("Average: {:.2}", sum as f64 / kept.len() as f64);
    }
    println!("Rejected inputs:");
    for error in rejected.take() {
        println!("  {:?}: {}", error.item(), error.cause());
    }

    println!("\n{}", pipeline.metrics_summary());
    println!("Pipeline execution time: {:.3}s", start.elapsed().as_secs_f64());

    Ok(())
}
