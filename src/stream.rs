//! Streaming batch API: emit results group by group.
//!
//! [`BatchRunner::process_batch`] returns only after the last group
//! finishes. [`BatchRunner::stream`] yields each group's results as soon as
//! that group completes, so callers can persist results or drive a progress
//! display incrementally. Order, concurrency cap and failure isolation are
//! the same as the eager API; batch metrics are reported when the stream is
//! exhausted.

use crate::batch::BatchRunner;
use crate::output::ConversionResult;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Instant;
use tokio_stream::Stream;
use tracing::{info, warn};

/// A boxed stream of per-document results.
pub type ResultStream = Pin<Box<dyn Stream<Item = ConversionResult> + Send>>;

struct StreamState {
    runner: BatchRunner,
    groups: std::vec::IntoIter<(usize, Vec<PathBuf>)>,
    ready: VecDeque<ConversionResult>,
    total: usize,
    successes: usize,
    started: Instant,
}

impl BatchRunner {
    /// Convert every PDF in `dir`, yielding results in discovery order.
    ///
    /// A directory that cannot be listed yields a single failure.
    pub fn stream(&self, dir: impl AsRef<Path>) -> ResultStream {
        let dir = dir.as_ref().to_path_buf();
        let runner = self.clone();
        info!("Starting streaming batch: {}", dir.display());

        let s = stream::once(async move {
            match runner.discover(&dir).await {
                Ok(files) => runner.stream_files(files),
                Err(err) => {
                    warn!("Cannot list {}: {}", dir.display(), err);
                    runner.pipeline().metrics().record_error(err.code, err.step);
                    stream::iter([ConversionResult::failure(err)]).boxed()
                }
            }
        })
        .flatten();

        Box::pin(s)
    }

    /// Stream the conversion of an explicit list of files.
    pub fn stream_files(&self, files: Vec<PathBuf>) -> ResultStream {
        let total = files.len();
        if let Some(cb) = self.progress_callback() {
            cb.on_batch_start(total);
        }

        let concurrency = self.concurrency();
        let groups: Vec<(usize, Vec<PathBuf>)> = files
            .chunks(concurrency)
            .enumerate()
            .map(|(i, group)| (i * concurrency, group.to_vec()))
            .collect();

        let state = StreamState {
            runner: self.clone(),
            groups: groups.into_iter(),
            ready: VecDeque::new(),
            total,
            successes: 0,
            started: Instant::now(),
        };

        let s = stream::unfold(state, |mut st| async move {
            loop {
                if let Some(result) = st.ready.pop_front() {
                    return Some((result, st));
                }
                match st.groups.next() {
                    Some((offset, group)) => {
                        let results = st.runner.run_group(offset, &group, st.total).await;
                        st.successes += results.iter().filter(|r| r.is_success()).count();
                        st.ready.extend(results);
                    }
                    None => {
                        st.runner.finish_batch(st.total, st.successes, st.started);
                        return None;
                    }
                }
            }
        });

        Box::pin(s)
    }
}
