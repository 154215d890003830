// src/ingest/balance.rs
//! Source balancing: round-robin over a shuffled source list with an
//! anti-repetition rule, so no single feed dominates a delivery batch.

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::ingest::filter::CandidatePool;
use crate::ingest::types::Article;

/// Bounded FIFO of the source names most recently delivered.
#[derive(Debug, Clone)]
pub struct RecentSources {
    buf: VecDeque<String>,
    cap: usize,
}

impl Default for RecentSources {
    fn default() -> Self {
        Self::with_capacity(5)
    }
}

impl RecentSources {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            buf: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push(&mut self, source: &str) {
        self.buf.push_back(source.to_string());
        while self.buf.len() > self.cap {
            self.buf.pop_front();
        }
    }

    /// How many of the newest entries in a row equal `source`.
    pub fn trailing_run(&self, source: &str) -> usize {
        self.buf.iter().rev().take_while(|s| s.as_str() == source).count()
    }

    pub fn last(&self) -> Option<&str> {
        self.buf.back().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.buf.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }
}

pub struct SourceBalancer {
    max_run: usize,
}

impl Default for SourceBalancer {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SourceBalancer {
    /// `max_run` = how many times in a row one source may appear (K).
    pub fn new(max_run: usize) -> Self {
        Self {
            max_run: max_run.max(1),
        }
    }

    /// Interleave every pooled article into one delivery order.
    ///
    /// Each source keeps its own oldest-first order. A source is passed over
    /// while it already holds the last `max_run` slots of the running history
    /// (seeded from `recent`), unless it is the only source left.
    pub fn balance<R: Rng + ?Sized>(
        &self,
        pool: CandidatePool,
        recent: &RecentSources,
        rng: &mut R,
    ) -> VecDeque<Article> {
        let mut buckets: Vec<(String, VecDeque<Article>)> = pool
            .into_buckets()
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(source, mut v)| {
                v.sort_by_key(|a| a.published);
                (source, VecDeque::from(v))
            })
            .collect();
        buckets.shuffle(rng);

        let total: usize = buckets.iter().map(|(_, q)| q.len()).sum();
        let mut running = RecentSources::with_capacity(recent.capacity().max(self.max_run));
        for s in recent.iter() {
            running.push(s);
        }

        let mut out = VecDeque::with_capacity(total);
        while out.len() < total {
            let mut progressed = false;

            for i in 0..buckets.len() {
                if buckets[i].1.is_empty() {
                    continue;
                }
                let others_pending = buckets
                    .iter()
                    .enumerate()
                    .any(|(j, (_, q))| j != i && !q.is_empty());
                if others_pending && running.trailing_run(&buckets[i].0) >= self.max_run {
                    continue;
                }
                if let Some(article) = buckets[i].1.pop_front() {
                    running.push(&buckets[i].0);
                    out.push_back(article);
                    progressed = true;
                }
            }

            // only one source left and it is at its run limit
            if !progressed {
                if let Some((source, q)) = buckets.iter_mut().find(|(_, q)| !q.is_empty()) {
                    if let Some(article) = q.pop_front() {
                        running.push(source);
                        out.push_back(article);
                    }
                }
            }
        }

        out
    }
}
