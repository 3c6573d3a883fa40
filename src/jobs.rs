//! Background execution of the heavy pixel operations (compositing, flood
//! fill, transform bakes) on rayon's pool.
//!
//! Jobs work on deep-copied snapshots and report back over an `mpsc`
//! channel.  Each submission gets a token; a newer submission for the same
//! target supersedes older ones, whose results are dropped on arrival.
//! Stroke stamping never goes through here.

use image::Rgba;
use std::collections::HashMap;
use std::sync::mpsc;

use crate::canvas::{Layer, PixelBuffer, PixelRegion, Selection};
use crate::ops::compositor::Compositor;
use crate::ops::fill::flood_fill;
use crate::ops::transform::{Affine, bake_pixels};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobTarget {
    Composite,
    Layer(usize),
}

pub enum JobOutput {
    Composite(PixelBuffer),
    /// `before` is the snapshot the fill ran on; `region` is `None` when the
    /// fill changed nothing.
    Fill {
        before: PixelBuffer,
        after: PixelBuffer,
        region: Option<PixelRegion>,
    },
    Bake(PixelBuffer),
    /// The job panicked; nothing to apply.
    Failed(String),
}

pub struct JobResult {
    pub token: u64,
    pub target: JobTarget,
    /// Generation of the target layer when the snapshot was taken (0 for composites).
    pub generation: u64,
    pub description: String,
    pub output: JobOutput,
}

pub struct JobQueue {
    sender: mpsc::Sender<JobResult>,
    receiver: mpsc::Receiver<JobResult>,
    latest: HashMap<JobTarget, u64>,
    next_token: u64,
    in_flight: usize,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver,
            latest: HashMap::new(),
            next_token: 0,
            in_flight: 0,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Run `work` on the rayon pool.  Returns the submission token.
    pub fn submit<F>(&mut self, target: JobTarget, generation: u64, description: &str, work: F) -> u64
    where
        F: FnOnce() -> JobOutput + Send + 'static,
    {
        self.next_token += 1;
        let token = self.next_token;
        if let Some(old) = self.latest.insert(target, token) {
            log_info!("Jobs: '{}' supersedes token {} for {:?}", description, old, target);
        }
        self.in_flight += 1;

        let sender = self.sender.clone();
        let description = description.to_string();
        rayon::spawn(move || {
            let output = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(work)) {
                Ok(output) => output,
                Err(panic_info) => {
                    let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.to_string()
                    } else {
                        "unknown panic payload".to_string()
                    };
                    JobOutput::Failed(msg)
                }
            };
            let _ = sender.send(JobResult {
                token,
                target,
                generation,
                description,
                output,
            });
        });
        token
    }

    pub fn submit_composite(&mut self, layers: Vec<Layer>, width: u32, height: u32, compositor: Compositor) -> u64 {
        self.submit(JobTarget::Composite, 0, "Composite", move || {
            JobOutput::Composite(compositor.render(&layers, width, height))
        })
    }

    pub fn submit_fill(
        &mut self,
        layer_index: usize,
        generation: u64,
        pixels: PixelBuffer,
        seed: (i64, i64),
        color: Rgba<u8>,
        tolerance: u8,
        clip: Option<Selection>,
    ) -> u64 {
        self.submit(JobTarget::Layer(layer_index), generation, "Fill", move || {
            let mut after = pixels.clone();
            let region = flood_fill(&mut after, seed, color, tolerance, clip.as_ref());
            JobOutput::Fill {
                before: pixels,
                after,
                region,
            }
        })
    }

    pub fn submit_bake(
        &mut self,
        layer_index: usize,
        generation: u64,
        pixels: PixelBuffer,
        matrix: Affine,
        width: u32,
        height: u32,
    ) -> u64 {
        self.submit(JobTarget::Layer(layer_index), generation, "Commit Transform", move || {
            JobOutput::Bake(bake_pixels(&pixels, &matrix, width, height))
        })
    }

    /// Results that arrived since the last call, superseded ones removed.
    /// Never blocks.
    pub fn poll(&mut self) -> Vec<JobResult> {
        let mut out = Vec::new();
        while let Ok(result) = self.receiver.try_recv() {
            self.accept(result, &mut out);
        }
        out
    }

    /// Block until every submitted job has reported back.
    pub fn wait(&mut self) -> Vec<JobResult> {
        let mut out = Vec::new();
        while self.in_flight > 0 {
            match self.receiver.recv() {
                Ok(result) => self.accept(result, &mut out),
                Err(_) => break,
            }
        }
        out
    }

    fn accept(&mut self, result: JobResult, out: &mut Vec<JobResult>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if let JobOutput::Failed(msg) = &result.output {
            log_err!("Jobs: '{}' (token {}) panicked: {}", result.description, result.token, msg);
        }
        if self.latest.get(&result.target) == Some(&result.token) {
            self.latest.remove(&result.target);
            out.push(result);
        } else {
            log_info!(
                "Jobs: discarded superseded '{}' result (token {}) for {:?}",
                result.description,
                result.token,
                result.target
            );
        }
    }
}
