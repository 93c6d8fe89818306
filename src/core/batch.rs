//! Fixed-size windowing of an ordered stream
//!
//! [`Batcher`] collects items into windows of `batch_size` and hands each full
//! window to a [`BatchSink`]; [`Batcher::finish`] flushes the remainder. A
//! failed window is recorded and never retried, and later windows still run.

use crate::domain::{Result, SyncError};
use async_trait::async_trait;

/// One window handed to a sink
#[derive(Debug, Clone, PartialEq)]
pub struct BatchWindow<T> {
    /// 0-based window number
    pub index: usize,
    /// Position of the first item in the whole stream
    pub offset: usize,
    pub items: Vec<T>,
}

impl<T> BatchWindow<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Receiver of windows
#[async_trait]
pub trait BatchSink<T: Send + 'static>: Send {
    /// Name recorded on failures (usually the resource type)
    fn label(&self) -> String;

    /// Submits one window and returns how many items were accepted
    async fn submit(&mut self, window: BatchWindow<T>) -> Result<usize>;
}

/// A window whose submission failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub label: String,
    pub window_index: usize,
    pub offset: usize,
    pub size: usize,
    pub error: String,
}

/// Outcome of a batched run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Windows submitted, failed ones included
    pub windows: usize,
    /// Items handed to the sink
    pub items: usize,
    /// Items the sink accepted
    pub succeeded: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_successful(&self) -> bool {
        self.failures.is_empty()
    }

    /// Items in failed windows
    pub fn failed_items(&self) -> usize {
        self.failures.iter().map(|f| f.size).sum()
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.windows += other.windows;
        self.items += other.items;
        self.succeeded += other.succeeded;
        self.failures.extend(other.failures);
    }
}

/// Partitions a stream into windows of at most `batch_size` items
pub struct Batcher<T> {
    batch_size: usize,
    window: Vec<T>,
    offset: usize,
    report: BatchReport,
}

impl<T: Send + 'static> Batcher<T> {
    /// # Errors
    ///
    /// Returns [`SyncError::Validation`] if `batch_size` is 0.
    pub fn new(batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(SyncError::Validation(
                "Batch size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            batch_size,
            window: Vec::with_capacity(batch_size),
            offset: 0,
            report: BatchReport::default(),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Items waiting in the current window
    pub fn pending(&self) -> usize {
        self.window.len()
    }

    /// Adds an item, submitting the window once it is full
    pub async fn push<S>(&mut self, item: T, sink: &mut S)
    where
        S: BatchSink<T> + ?Sized,
    {
        self.window.push(item);
        if self.window.len() >= self.batch_size {
            self.flush(sink).await;
        }
    }

    /// Submits the remainder, if any, and returns the report
    pub async fn finish<S>(mut self, sink: &mut S) -> BatchReport
    where
        S: BatchSink<T> + ?Sized,
    {
        self.flush(sink).await;
        self.report
    }

    /// Windows `items` through `sink` in one go
    pub async fn run<I, S>(batch_size: usize, items: I, sink: &mut S) -> Result<BatchReport>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send,
        S: BatchSink<T> + ?Sized,
    {
        let mut batcher = Self::new(batch_size)?;
        for item in items {
            batcher.push(item, sink).await;
        }
        Ok(batcher.finish(sink).await)
    }

    async fn flush<S>(&mut self, sink: &mut S)
    where
        S: BatchSink<T> + ?Sized,
    {
        if self.window.is_empty() {
            return;
        }

        let items = std::mem::replace(&mut self.window, Vec::with_capacity(self.batch_size));
        let size = items.len();
        let window = BatchWindow {
            index: self.report.windows,
            offset: self.offset,
            items,
        };
        let (index, offset) = (window.index, window.offset);
        self.report.windows += 1;
        self.report.items += size;
        self.offset += size;

        match sink.submit(window).await {
            Ok(accepted) => self.report.succeeded += accepted,
            Err(e) => {
                let label = sink.label();
                tracing::error!(
                    label = %label,
                    window = index,
                    offset = offset,
                    size = size,
                    error = %e,
                    "Batch submission failed, continuing with next window"
                );
                self.report.failures.push(BatchFailure {
                    label,
                    window_index: index,
                    offset,
                    size,
                    error: e.to_string(),
                });
            }
        }
    }
}
