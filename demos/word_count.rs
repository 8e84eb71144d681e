//! Word frequency counter pipeline
//!
//! Reads lines from stdin, splits them into words, cleans the words on a pool
//! of workers and counts frequencies once the pipeline has shut down.
//!
//! Usage: RUST_LOG=info cargo run --example word_count --release
//!        (Then type lines of text and press Ctrl-D to finish)

use stage_pipeline::{PipelineBuilder, StageConfig};
use std::collections::HashMap;
use std::io::{self, BufRead};
use std::time::Duration;

/// Split a line into lowercase words
fn split_words(line: &String) -> Vec<String> {
    line.split_whitespace().map(|w| w.to_lowercase()).collect()
}

/// Keep alphanumeric characters of every word, dropping words of two
/// characters or less
fn clean_words(words: &Vec<String>) -> Vec<String> {
    words
        .iter()
        .map(|word| word.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|word| word.chars().count() > 2)
        .collect()
}

fn top_n(counts: &HashMap<String, usize>, n: usize) -> Vec<(&str, usize)> {
    let mut items: Vec<_> = counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    items.into_iter().take(n).collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Word Frequency Counter Pipeline");
    println!("================================");
    println!("Enter lines of text (Ctrl-D to finish):");
    println!();

    let pipeline = PipelineBuilder::new(100)
        .stage(StageConfig::map("reader", 1, split_words))
        .stage(StageConfig::map("cleaner", 4, clean_words))
        .build()?;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for line in io::stdin().lock().lines() {
        pipeline.feed(line?, None)?;
        // Count what is ready so results never pile up
        for words in pipeline.drain(Some(Duration::ZERO)) {
            for word in words {
                *counts.entry(word).or_insert(0) += 1;
            }
        }
    }

    pipeline.shutdown(Some(Duration::from_secs(10)))?;
    for words in pipeline.drain(None) {
        for word in words {
            *counts.entry(word).or_insert(0) += 1;
        }
    }

    println!("\n=== Top 10 Words ===");
    for (i, (word, count)) in top_n(&counts, 10).iter().enumerate() {
        println!("{:2}. {} ({})", i + 1, word, count);
    }
    println!("\n{}", pipeline.metrics_summary());

    Ok(())
}
