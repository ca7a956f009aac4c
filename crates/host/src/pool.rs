use std::collections::VecDeque;

use crate::{WorkerHandle, WorkerLauncher};

/// Keeps a few pre-launched workers warm so a retired worker can be replaced
/// without paying interpreter startup on the request path.
pub struct WorkerPool {
    launcher: Box<dyn WorkerLauncher>,
    warm: VecDeque<Box<dyn WorkerHandle>>,
    target_warm: usize,
}

impl WorkerPool {
    pub fn new(launcher: Box<dyn WorkerLauncher>, target_warm: usize) -> Result<Self, String> {
        let mut pool = Self {
            launcher,
            warm: VecDeque::new(),
            target_warm,
        };
        pool.refill_strict()?;
        Ok(pool)
    }

    pub fn acquire(&mut self) -> Result<Box<dyn WorkerHandle>, String> {
        let handle = if let Some(handle) = self.warm.pop_front() {
            handle
        } else {
            self.launcher.launch()?
        };
        self.refill_best_effort();
        Ok(handle)
    }

    pub fn retire(&mut self, mut handle: Box<dyn WorkerHandle>) {
        handle.terminate();
        self.refill_best_effort();
    }

    pub fn warm_len(&self) -> usize {
        self.warm.len()
    }

    fn refill_strict(&mut self) -> Result<(), String> {
        while self.warm.len() < self.target_warm {
            self.warm.push_back(self.launcher.launch()?);
        }
        Ok(())
    }

    fn refill_best_effort(&mut self) {
        while self.warm.len() < self.target_warm {
            match self.launcher.launch() {
                Ok(handle) => self.warm.push_back(handle),
                Err(_) => break,
            }
        }
    }
}
