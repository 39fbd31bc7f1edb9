//! Reporters consume statistics snapshots.
//!
//! The engine calls [`Reporter::header`] once before the first strategy
//! runs, [`Reporter::report`] at the configured cadence while strategies
//! run, and [`Reporter::summarize`] once at the end. Formatting and
//! persistence live entirely on the reporter side; the engine only hands
//! over [`PeekHolder`] snapshots. Two built-ins cover quick use: a plain
//! text reporter and a JSON-lines reporter. Anything richer (HTML,
//! histogram logs, databases) belongs in a downstream crate.

use async_trait::async_trait;

use crate::error::OpError;
use crate::stats::{PeekHolder, StatisticsPeek, WindowPeek};

/// Periodic and final consumer of statistics snapshots.
///
/// Reporter failures never fail the run; the engine logs and keeps going.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once, before any strategy runs, with descriptive lines.
    async fn header(&self, lines: &[String]) -> Result<(), OpError>;

    /// Called at the report cadence with the latest periodic snapshot.
    async fn report(&self, peek: &PeekHolder) -> Result<(), OpError>;

    /// Called once after the last strategy finishes.
    async fn summarize(&self, peek: &PeekHolder) -> Result<(), OpError>;
}

fn window_line(label: &str, w: &WindowPeek) -> String {
    format!(
        "{label}: {} ops, {:.1} tps, {:.3} ms avg",
        w.count, w.tps, w.average_latency_ms
    )
}

fn peek_lines(peek: &StatisticsPeek) -> String {
    let rows: Vec<String> = peek
        .rows
        .iter()
        .filter(|row| row.cumulative.count > 0)
        .map(|row| format!("{}={}", row.outcome, row.cumulative.count))
        .collect();
    format!(
        "  {:<24} {} | {} | {}",
        peek.name,
        window_line("periodic", &peek.periodic),
        window_line("cumulative", &peek.cumulative),
        rows.join(" ")
    )
}

/// Plain-text reporter writing one block per snapshot to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutReporter;

#[async_trait]
impl Reporter for StdoutReporter {
    async fn header(&self, lines: &[String]) -> Result<(), OpError> {
        for line in lines {
            println!("{line}");
        }
        Ok(())
    }

    async fn report(&self, peek: &PeekHolder) -> Result<(), OpError> {
        for p in &peek.peeks {
            println!("{}", peek_lines(p));
        }
        println!(
            "  {:<24} {} | {}",
            "ALL",
            window_line("periodic", &peek.total.periodic),
            window_line("cumulative", &peek.total.cumulative),
        );
        Ok(())
    }

    async fn summarize(&self, peek: &PeekHolder) -> Result<(), OpError> {
        println!("== summary ==");
        self.report(peek).await
    }
}

/// Machine-readable reporter: one JSON document per snapshot on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonReporter;

#[async_trait]
impl Reporter for JsonReporter {
    async fn header(&self, lines: &[String]) -> Result<(), OpError> {
        println!("{}", serde_json::to_string(&lines)?);
        Ok(())
    }

    async fn report(&self, peek: &PeekHolder) -> Result<(), OpError> {
        println!("{}", serde_json::to_string(peek)?);
        Ok(())
    }

    async fn summarize(&self, peek: &PeekHolder) -> Result<(), OpError> {
        self.report(peek).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{Outcome, StatisticsEngine};
    use std::time::Duration;

    #[test]
    fn text_lines_carry_name_counts_and_outcomes() {
        let stats = StatisticsEngine::new(&[Outcome::OK, Outcome::MISS]);
        stats.record("get", Duration::from_millis(2), Outcome::OK);
        stats.record("get", Duration::from_millis(2), Outcome::MISS);
        let holder = stats.peek();
        let line = peek_lines(holder.peek_for("get").unwrap());
        assert!(line.contains("get"));
        assert!(line.contains("2 ops"));
        assert!(line.contains("OK=1"));
        assert!(line.contains("MISS=1"));
    }

    #[tokio::test]
    async fn json_reporter_emits_valid_documents() {
        let stats = StatisticsEngine::new(&[Outcome::OK]);
        stats.record("get", Duration::from_millis(1), Outcome::OK);
        let holder = stats.peek();
        // Round-trips through serde_json without error.
        JsonReporter.report(&holder).await.unwrap();
        let encoded = serde_json::to_value(&holder).unwrap();
        assert!(encoded.get("peeks").is_some());
        assert!(encoded.get("total").is_some());
    }
}
