//! Per-call execution context and environment-driven settings.
//!
//! A [`FitContext`] replaces process-global numeric state: it carries the
//! random seed, a cancellation handle, an optional progress channel and an
//! optional dedicated thread pool. Two fits with equal contexts and inputs
//! produce identical results regardless of the number of threads.
//!
//! # Environment Variables
//!
//! Read by [`EngineSettings::from_env`] (a `.env` file is honoured):
//!
//! - `SPECFIT_SEED`: master random seed
//! - `SPECFIT_THREADS`: size of the dedicated thread pool
//! - `SPECFIT_POISSON_PENALTY`: per-channel penalty for `μ ≤ 0`
//! - `SPECFIT_LOG`: log level (see `logging`)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::Arc;

use crate::error::{FitError, Result};
use crate::fit::{FitOptions, ProgressEvent};
use crate::logging::LogLevel;
use crate::stats::DEFAULT_POISSON_PENALTY;

pub const DEFAULT_SEED: u64 = 42;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; running samplers return a partial result.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct FitContext {
    pub seed: u64,
    pub stop: StopHandle,
    progress: Option<SyncSender<ProgressEvent>>,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl Default for FitContext {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl FitContext {
    pub fn new(seed: u64) -> Self {
        FitContext {
            seed,
            stop: StopHandle::new(),
            progress: None,
            pool: None,
        }
    }

    /// Run parallel work on a dedicated pool of `threads` workers.
    pub fn with_threads(mut self, threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| FitError::InvalidConfig(format!("thread pool: {e}")))?;
        self.pool = Some(Arc::new(pool));
        Ok(self)
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Attach a bounded progress channel; returns the receiving end.
    pub fn with_progress(mut self, capacity: usize) -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = sync_channel(capacity.max(1));
        self.progress = Some(tx);
        (self, rx)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Send a progress event without blocking; dropped when the channel is
    /// full or nobody listens.
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.try_send(event);
        }
    }

    /// Run `f` inside the dedicated pool, or on the global pool.
    pub fn install<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }
}

/// Defaults read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub seed: u64,
    pub threads: Option<usize>,
    pub poisson_penalty: f64,
    pub log_level: Option<LogLevel>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            seed: DEFAULT_SEED,
            threads: None,
            poisson_penalty: DEFAULT_POISSON_PENALTY,
            log_level: None,
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let mut settings = EngineSettings::default();
        if let Some(v) = lookup("SPECFIT_SEED") {
            settings.seed = parse_env("SPECFIT_SEED", &v)?;
        }
        if let Some(v) = lookup("SPECFIT_THREADS") {
            let threads: usize = parse_env("SPECFIT_THREADS", &v)?;
            if threads == 0 {
                return Err(FitError::InvalidConfig("SPECFIT_THREADS must be >= 1".into()));
            }
            settings.threads = Some(threads);
        }
        if let Some(v) = lookup("SPECFIT_POISSON_PENALTY") {
            let penalty: f64 = parse_env("SPECFIT_POISSON_PENALTY", &v)?;
            if !(penalty.is_finite() && penalty > 0.0) {
                return Err(FitError::InvalidConfig(
                    "SPECFIT_POISSON_PENALTY must be finite and > 0".into(),
                ));
            }
            settings.poisson_penalty = penalty;
        }
        if let Some(v) = lookup("SPECFIT_LOG") {
            settings.log_level = Some(LogLevel::parse(&v).ok_or_else(|| {
                FitError::InvalidConfig(format!("SPECFIT_LOG: unknown level '{v}'"))
            })?);
        }
        Ok(settings)
    }

    pub fn context(&self) -> Result<FitContext> {
        let ctx = FitContext::new(self.seed);
        match self.threads {
            Some(n) => ctx.with_threads(n),
            None => Ok(ctx),
        }
    }

    pub fn options(&self) -> FitOptions {
        FitOptions {
            poisson_penalty: self.poisson_penalty,
            ..FitOptions::default()
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| FitError::InvalidConfig(format!("{key}: cannot parse '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn settings_parse_known_keys() {
        let s = EngineSettings::from_lookup(lookup(&[
            ("SPECFIT_SEED", "7"),
            ("SPECFIT_THREADS", "2"),
            ("SPECFIT_POISSON_PENALTY", "1e6"),
            ("SPECFIT_LOG", "debug"),
        ]))
        .unwrap();
        assert_eq!(s.seed, 7);
        assert_eq!(s.threads, Some(2));
        assert_eq!(s.poisson_penalty, 1e6);
        assert_eq!(s.log_level, Some(LogLevel::Debug));
        assert_eq!(s.options().poisson_penalty, 1e6);
    }

    #[test]
    fn settings_reject_garbage() {
        assert!(EngineSettings::from_lookup(lookup(&[("SPECFIT_SEED", "abc")])).is_err());
        assert!(EngineSettings::from_lookup(lookup(&[("SPECFIT_THREADS", "0")])).is_err());
        assert!(EngineSettings::from_lookup(lookup(&[("SPECFIT_POISSON_PENALTY", "-1")])).is_err());
        assert_eq!(EngineSettings::from_lookup(lookup(&[])).unwrap(), EngineSettings::default());
    }

    #[test]
    fn progress_is_dropped_when_full() {
        let (ctx, rx) = FitContext::new(1).with_progress(1);
        ctx.emit(ProgressEvent::Started { backend: "optimize".into() });
        ctx.emit(ProgressEvent::Started { backend: "optimize".into() });
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "second event must have been dropped");
    }

    #[test]
    fn stop_handle_is_shared() {
        let ctx = FitContext::new(1);
        let handle = ctx.stop.clone();
        handle.stop();
        assert!(ctx.is_stopped());
    }

    #[test]
    fn dedicated_pool_runs_closures() {
        let ctx = FitContext::new(1).with_threads(2).unwrap();
        assert_eq!(ctx.install(rayon::current_num_threads), 2);
    }
}
