use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Tips shown under the slide status while a deck is being generated.
pub const TIPS: &[&str] = &[
    "Paste a URL into your request and the agent will summarize the page into slides.",
    "After a deck is ready you can ask for changes like \"make it simpler\" or \"less text\".",
    "Decks can be exported as PDF or PowerPoint, or shared as a public link.",
    "Slides are written in Marp markdown, so every deck is plain text under the hood.",
    "Web search results are cited on a references slide at the end of the deck.",
    "Attach a PDF up to 10 MB and the agent will use it as reference material.",
    "Each conversation keeps its own session, so follow-up edits remember the deck.",
    "Shared decks carry preview tags, so links unfurl nicely on social media.",
    "Switch themes with --theme; the agent restyles the deck on the next turn.",
    "Keep each slide to a few bullet points; the agent trims slides that overflow.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipTiming {
    pub initial_delay: Duration,
    pub period: Duration,
}

impl Default for TipTiming {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            period: Duration::from_secs(5),
        }
    }
}

/// Shuffle-bag over `0..len`: every index comes out once before any repeats.
#[derive(Debug)]
pub struct TipBag {
    len: usize,
    queue: Vec<usize>,
    rng: StdRng,
}

impl TipBag {
    pub fn new(len: usize) -> Self {
        Self::with_rng(len, StdRng::from_entropy())
    }

    pub fn seeded(len: usize, seed: u64) -> Self {
        Self::with_rng(len, StdRng::seed_from_u64(seed))
    }

    fn with_rng(len: usize, rng: StdRng) -> Self {
        Self {
            len,
            queue: Vec::new(),
            rng,
        }
    }

    pub fn next_index(&mut self) -> Option<usize> {
        if self.queue.is_empty() {
            if self.len == 0 {
                return None;
            }
            self.queue = (0..self.len).collect();
            self.queue.shuffle(&mut self.rng);
        }
        self.queue.pop()
    }
}

/// Running rotation. Dropping it stops the timers as well.
#[derive(Debug)]
pub struct RotationHandle {
    task: Option<JoinHandle<()>>,
}

impl RotationHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancels the pending delay or interval. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for RotationHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts rotating: after `initial_delay`, then every `period`, the next index
/// from `bag` is handed to `on_tip`.
pub fn start_rotation<F>(bag: Arc<Mutex<TipBag>>, timing: TipTiming, mut on_tip: F) -> RotationHandle
where
    F: FnMut(usize) + Send + 'static,
{
    let task = tokio::spawn(async move {
        tokio::time::sleep(timing.initial_delay).await;
        let mut ticker = tokio::time::interval(timing.period);
        loop {
            ticker.tick().await;
            let next = match bag.lock() {
                Ok(mut bag) => bag.next_index(),
                Err(poisoned) => poisoned.into_inner().next_index(),
            };
            match next {
                Some(index) => on_tip(index),
                None => return,
            }
        }
    });
    RotationHandle { task: Some(task) }
}
