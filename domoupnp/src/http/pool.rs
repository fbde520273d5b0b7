//! Pool borné de workers pour le travail bloquant.
//!
//! Les jobs sont des messages-valeurs (closures possédantes) poussés
//! dans un canal borné ; aucun worker ne voit de référence vers l'état
//! des moteurs. Le pool s'arrête quand le dernier émetteur est lâché.

use std::thread;

use crossbeam_channel::{bounded, Sender, TrySendError};
use tracing::warn;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool de threads de taille fixe avec file d'attente bornée.
#[derive(Clone)]
pub struct WorkerPool {
    jobs: Sender<Job>,
}

impl WorkerPool {
    /// Démarre `workers` threads nommés `name-N`, avec une file d'au
    /// plus `depth` jobs en attente.
    pub fn new(name: &str, workers: usize, depth: usize) -> Self {
        let (jobs, receiver) = bounded::<Job>(depth.max(1));

        for index in 0..workers.max(1) {
            let receiver = receiver.clone();
            let result = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                });
            if let Err(e) = result {
                warn!("❌ Failed to spawn worker thread {}-{}: {}", name, index, e);
            }
        }

        Self { jobs }
    }

    /// Soumet un job, en bloquant si la file est pleine.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.jobs.send(Box::new(job)).is_err() {
            warn!("❌ Worker pool is shut down, dropping job");
        }
    }

    /// Soumet un job sans bloquer ; `false` si la file est pleine.
    pub fn try_submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.jobs.try_send(Box::new(job)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => {
                warn!("❌ Worker pool is shut down, dropping job");
                false
            }
        }
    }
}
