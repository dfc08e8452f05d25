// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! CPU miner. Every thread owns a LunaHash scratchpad and walks its own
//! nonce lane: thread `i` of `n` tries `start + i`, `start + i + n`, and so on.
//! Work is tagged with a generation so results for a replaced template can be
//! told apart from current ones.

use crate::primitives::{Block, LunaHasher};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use triomphe::Arc;

/// Hashes between control channel polls
const CTRL_POLL_INTERVAL: u64 = 16;

pub struct Miner {
    threads: Vec<JoinHandle<()>>,
    ctrl_recv: Vec<Receiver<MinerCtrl>>,
    ctrl_send: Vec<Sender<MinerCtrl>>,
    miner_states: Vec<Arc<Mutex<MinerStatus>>>,
    hashes: Arc<AtomicU64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MinerResult {
    /// A nonce satisfying the template's bits was found
    Found { generation: u64, block: Block },

    /// The thread's nonce lane ran out before a solution was found
    Exhausted { generation: u64 },
}

impl Miner {
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let mut threads = Vec::with_capacity(num_threads);
        let mut ctrl_recv = Vec::with_capacity(num_threads);
        let mut ctrl_send = Vec::with_capacity(num_threads);
        let mut miner_states = Vec::with_capacity(num_threads);
        let hashes = Arc::new(AtomicU64::new(0));

        for index in 0..num_threads {
            let (s1, r1): (Sender<MinerCtrl>, Receiver<MinerCtrl>) = unbounded();
            let (s2, r2): (Sender<MinerCtrl>, Receiver<MinerCtrl>) = unbounded();
            let state = Arc::new(Mutex::new(MinerStatus::Paused));
            let worker = Worker {
                lane: index as u64,
                stride: num_threads as u64,
                ctrl_recv: r2,
                ctrl_send: s1,
                status: state.clone(),
                hashes: hashes.clone(),
            };

            let handle = thread::Builder::new()
                .name(format!("miner-{index}"))
                .spawn(move || worker.run());

            match handle {
                Ok(handle) => threads.push(handle),
                Err(err) => {
                    error!("Could not spawn miner thread {}: {}", index, err);
                    continue;
                }
            }

            ctrl_recv.push(r1);
            ctrl_send.push(s2);
            miner_states.push(state);
        }

        Miner {
            threads,
            ctrl_recv,
            ctrl_send,
            miner_states,
            hashes,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn status(&self) -> MinerStatus {
        if self.miner_states.iter().any(|s| *s.lock() == MinerStatus::Running) {
            MinerStatus::Running
        } else {
            MinerStatus::Paused
        }
    }

    /// Total hashes computed since the miner was created
    pub fn hashes(&self) -> u64 {
        self.hashes.load(Ordering::Relaxed)
    }

    /// Replaces the current work on every thread
    pub fn start(&self, generation: u64, block: Block) {
        for sender in &self.ctrl_send {
            let _ = sender.send(MinerCtrl::Start {
                generation,
                block: block.clone(),
            });
        }
    }

    pub fn pause(&self) {
        for sender in &self.ctrl_send {
            let _ = sender.send(MinerCtrl::Pause);
        }
    }

    pub fn block_wait_result(&self, timeout: Duration) -> Option<MinerResult> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(result) = self.try_recv_result() {
                return Some(result);
            }

            if Instant::now() >= deadline {
                return None;
            }

            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Polls every thread for a result. Finding a block pauses all threads.
    pub fn try_recv_result(&self) -> Option<MinerResult> {
        for recv in &self.ctrl_recv {
            match recv.try_recv() {
                Ok(MinerCtrl::FoundNonce { generation, block }) => {
                    self.pause();
                    return Some(MinerResult::Found { generation, block });
                }

                Ok(MinerCtrl::ExhaustedNonces { generation }) => {
                    return Some(MinerResult::Exhausted { generation });
                }

                Ok(_) | Err(TryRecvError::Empty) => {}

                Err(TryRecvError::Disconnected) => {
                    warn!("Miner thread stopped unexpectedly");
                }
            }
        }

        None
    }
}

impl Drop for Miner {
    fn drop(&mut self) {
        for sender in &self.ctrl_send {
            let _ = sender.send(MinerCtrl::Exit);
        }

        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MinerStatus {
    Paused,
    Running,
}

struct Job {
    generation: u64,
    block: Block,

    /// Header bytes without the nonce, computed once per template
    pow_bytes: Vec<u8>,
    nonce: u64,
}

enum MinerCtrl {
    FoundNonce { generation: u64, block: Block },
    ExhaustedNonces { generation: u64 },
    Pause,
    Start { generation: u64, block: Block },
    Exit,
}

struct Worker {
    lane: u64,
    stride: u64,
    ctrl_recv: Receiver<MinerCtrl>,
    ctrl_send: Sender<MinerCtrl>,
    status: Arc<Mutex<MinerStatus>>,
    hashes: Arc<AtomicU64>,
}

impl Worker {
    fn run(self) {
        let mut hasher = LunaHasher::new();
        let mut job: Option<Job> = None;

        loop {
            let ctrl = if job.is_some() {
                match self.ctrl_recv.try_recv() {
                    Ok(ctrl) => Some(ctrl),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => return,
                }
            } else {
                match self.ctrl_recv.recv_timeout(Duration::from_millis(100)) {
                    Ok(ctrl) => Some(ctrl),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            };

            match ctrl {
                Some(MinerCtrl::Exit) => return,

                Some(MinerCtrl::Pause) => {
                    job = None;
                    *self.status.lock() = MinerStatus::Paused;
                    continue;
                }

                Some(MinerCtrl::Start { generation, block }) => {
                    let Some(nonce) = block.header.nonce.checked_add(self.lane) else {
                        let _ = self.ctrl_send.send(MinerCtrl::ExhaustedNonces { generation });
                        continue;
                    };

                    job = Some(Job {
                        generation,
                        pow_bytes: block.header.pow_bytes(),
                        block,
                        nonce,
                    });
                    *self.status.lock() = MinerStatus::Running;
                }

                Some(_) | None => {}
            }

            let Some(current) = job.as_mut() else {
                continue;
            };

            if let Some(msg) = self.search(&mut hasher, current) {
                let _ = self.ctrl_send.send(msg);
                job = None;
                *self.status.lock() = MinerStatus::Paused;
            }
        }
    }

    /// Tries a batch of nonces. Returns a message if the job is finished.
    fn search(&self, hasher: &mut LunaHasher, job: &mut Job) -> Option<MinerCtrl> {
        let bits = job.block.header.bits;

        for _ in 0..CTRL_POLL_INTERVAL {
            let hash = hasher.hash(&job.pow_bytes, job.nonce);
            self.hashes.fetch_add(1, Ordering::Relaxed);

            if hash.meets_difficulty(bits) {
                let mut block = job.block.clone();
                block.header.nonce = job.nonce;

                return Some(MinerCtrl::FoundNonce {
                    generation: job.generation,
                    block,
                });
            }

            match job.nonce.checked_add(self.stride) {
                Some(next) => job.nonce = next,
                None => {
                    return Some(MinerCtrl::ExhaustedNonces {
                        generation: job.generation,
                    })
                }
            }
        }

        None
    }
}
