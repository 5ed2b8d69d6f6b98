//! Concurrent decryption pipeline
//!
//! ```text
//!  producer ──jobs──▶ worker 0..N ──results──▶ consumer (caller thread)
//!                         │
//!                         └──done──▶ coordinator (drops the last result sender)
//! ```
//!
//! Jobs and results travel over rendezvous channels. Each worker owns its own
//! key unwrap client built by the caller's factory. The consumer stops at the
//! first error and drops its receiver, which unblocks every worker and, once
//! the workers are gone, the producer.

use crate::config::Base64Alphabet;
use crate::decrypt::{DecryptOptions, Decryptor};
use crate::engine::DecryptError;
use crate::env::{decode_payload, EnvJob};
use crate::kms::{KeyUnwrap, UnwrapError};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::fmt;
use std::thread;
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

/// A successfully decrypted variable
pub struct DecryptedVar {
    pub name: String,
    pub value: Zeroizing<String>,
}

impl fmt::Debug for DecryptedVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedVar")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to decrypt {name}: {source}")]
    Value {
        name: String,
        #[source]
        source: DecryptError,
    },

    #[error("value of {name} is not valid base64: {source}")]
    Base64 {
        name: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("decrypted value of {name} is not valid UTF-8")]
    NotUtf8 { name: String },

    /// Plaintext holds a NUL byte, which no environment value can carry
    #[error("decrypted value of {name} contains a NUL byte")]
    InvalidValue { name: String },

    #[error("failed to initialise key service client: {0}")]
    ClientInit(#[source] UnwrapError),

    #[error("decryption worker panicked")]
    WorkerPanicked,
}

impl PipelineError {
    /// Name of the variable that failed, when the failure belongs to one
    pub fn variable(&self) -> Option<&str> {
        match self {
            Self::Value { name, .. }
            | Self::Base64 { name, .. }
            | Self::NotUtf8 { name }
            | Self::InvalidValue { name } => Some(name),
            Self::ClientInit(_) | Self::WorkerPanicked => None,
        }
    }
}

type JobResult = Result<DecryptedVar, PipelineError>;

/// Fixed-size pool of decryption workers
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    alphabet: Base64Alphabet,
    options: DecryptOptions,
}

impl WorkerPool {
    /// A pool of `workers` threads; zero is treated as one
    pub fn new(workers: usize, alphabet: Base64Alphabet) -> Self {
        Self {
            workers: workers.max(1),
            alphabet,
            options: DecryptOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DecryptOptions) -> Self {
        self.options = options;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Decrypt `jobs`, handing each result to `on_result` as it arrives
    ///
    /// Results arrive in completion order. Returns the number of variables
    /// decrypted, or the first error any worker reported.
    pub fn run_with<C, F, G>(
        &self,
        factory: F,
        jobs: Vec<EnvJob>,
        mut on_result: G,
    ) -> Result<usize, PipelineError>
    where
        C: KeyUnwrap,
        F: Fn() -> Result<C, UnwrapError> + Sync,
        G: FnMut(DecryptedVar),
    {
        if jobs.is_empty() {
            debug!("no encrypted values, pool not started");
            return Ok(0);
        }

        let workers = self.workers;
        let alphabet = self.alphabet;
        let options = self.options;
        let total = jobs.len();

        let (job_tx, job_rx) = bounded::<EnvJob>(0);
        let (out_tx, out_rx) = bounded::<JobResult>(0);
        let (done_tx, done_rx) = bounded::<()>(workers);

        thread::scope(|scope| {
            // ---- Producer ----
            scope.spawn(move || {
                for job in jobs {
                    if job_tx.send(job).is_err() {
                        debug!("job channel closed, producer stopping early");
                        break;
                    }
                }
            });

            // ---- Workers ----
            let factory = &factory;
            let handles: Vec<_> = (0..workers)
                .map(|id| {
                    let rx = job_rx.clone();
                    let tx = out_tx.clone();
                    let done = done_tx.clone();
                    scope.spawn(move || {
                        run_worker(id, factory, rx, tx, alphabet, options);
                        let _ = done.send(());
                    })
                })
                .collect();
            drop(job_rx);
            drop(done_tx);

            // ---- Coordinator ----
            scope.spawn(move || {
                for _ in 0..workers {
                    if done_rx.recv().is_err() {
                        break;
                    }
                }
                drop(out_tx);
            });

            // ---- Consumer ----
            let mut decrypted = 0;
            let mut failure = None;
            for result in out_rx.iter() {
                match result {
                    Ok(var) => {
                        decrypted += 1;
                        on_result(var);
                    }
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            drop(out_rx);

            let panicked = handles
                .into_iter()
                .map(|handle| handle.join())
                .filter(Result::is_err)
                .count();

            if let Some(err) = failure {
                warn!(variable = err.variable(), error = %err, "decryption failed");
                return Err(err);
            }
            if panicked > 0 {
                return Err(PipelineError::WorkerPanicked);
            }
            debug!(decrypted, total, "pool finished");
            Ok(decrypted)
        })
    }

    /// Decrypt `jobs` and collect every result
    pub fn run<C, F>(&self, factory: F, jobs: Vec<EnvJob>) -> Result<Vec<DecryptedVar>, PipelineError>
    where
        C: KeyUnwrap,
        F: Fn() -> Result<C, UnwrapError> + Sync,
    {
        let mut vars = Vec::with_capacity(jobs.len());
        self.run_with(factory, jobs, |var| vars.push(var))?;
        Ok(vars)
    }
}

fn run_worker<C, F>(
    id: usize,
    factory: &F,
    jobs: Receiver<EnvJob>,
    results: Sender<JobResult>,
    alphabet: Base64Alphabet,
    options: DecryptOptions,
) where
    C: KeyUnwrap,
    F: Fn() -> Result<C, UnwrapError>,
{
    let client = match factory() {
        Ok(client) => client,
        Err(err) => {
            let _ = results.send(Err(PipelineError::ClientInit(err)));
            return;
        }
    };
    let decryptor = Decryptor::with_options(client, options);
    debug!(worker = id, "worker started");

    for job in jobs.iter() {
        let result = decrypt_job(&decryptor, job, alphabet);
        if results.send(result).is_err() {
            debug!(worker = id, "result channel closed, worker stopping");
            break;
        }
    }
}

fn decrypt_job<C: KeyUnwrap>(
    decryptor: &Decryptor<C>,
    job: EnvJob,
    alphabet: Base64Alphabet,
) -> JobResult {
    let EnvJob { name, value } = job;
    info!(name = %name, "decrypting value");

    let ciphertext = match decode_payload(&value, alphabet) {
        Ok(ciphertext) => ciphertext,
        Err(source) => return Err(PipelineError::Base64 { name, source }),
    };

    let mut plaintext = match decryptor.decrypt(&ciphertext) {
        Ok(plaintext) => plaintext,
        Err(source) => return Err(PipelineError::Value { name, source }),
    };

    if plaintext.contains(&0) {
        plaintext.zeroize();
        return Err(PipelineError::InvalidValue { name });
    }

    match String::from_utf8(std::mem::take(&mut *plaintext)) {
        Ok(text) => Ok(DecryptedVar {
            name,
            value: Zeroizing::new(text),
        }),
        Err(err) => {
            err.into_bytes().zeroize();
            Err(PipelineError::NotUtf8 { name })
        }
    }
}
