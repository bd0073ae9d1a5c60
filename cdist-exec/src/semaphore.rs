use std::sync::Arc;

use async_lock::{Semaphore, SemaphoreGuardArc};

/// Default concurrency caps (spec §4.1, §5): Local 20/20, Remote 5/5 (sized
/// to a typical `MaxSessions 10` on sshd). Each of `exec`/`check_output`/
/// `copy` acquires the relevant permit for the full duration of the child
/// process — this is the backpressure that keeps the scheduler from
/// exceeding remote transport limits.
pub const LOCAL_DEFAULT_CONCURRENCY: usize = 20;
pub const REMOTE_DEFAULT_CONCURRENCY: usize = 5;

fn concurrency_from_env(var: &str, default: usize) -> usize {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

/// The pair of semaphores an Executor owns: one gating subprocess execution,
/// one gating file copies (spec §4.1 "Concurrency bounds").
pub struct ExecSemaphores {
    pub exec: Arc<Semaphore>,
    pub copy: Arc<Semaphore>,
}

impl ExecSemaphores {
    pub fn local() -> ExecSemaphores {
        ExecSemaphores {
            exec: Arc::new(Semaphore::new(concurrency_from_env(
                "CDIST_LOCAL_EXEC_CONCURRENCY",
                LOCAL_DEFAULT_CONCURRENCY,
            ))),
            copy: Arc::new(Semaphore::new(concurrency_from_env(
                "CDIST_LOCAL_COPY_CONCURRENCY",
                LOCAL_DEFAULT_CONCURRENCY,
            ))),
        }
    }

    pub fn remote() -> ExecSemaphores {
        ExecSemaphores {
            exec: Arc::new(Semaphore::new(concurrency_from_env(
                "CDIST_REMOTE_EXEC_CONCURRENCY",
                REMOTE_DEFAULT_CONCURRENCY,
            ))),
            copy: Arc::new(Semaphore::new(concurrency_from_env(
                "CDIST_REMOTE_COPY_CONCURRENCY",
                REMOTE_DEFAULT_CONCURRENCY,
            ))),
        }
    }

    pub async fn acquire_exec(&self) -> SemaphoreGuardArc {
        self.exec.acquire_arc().await
    }

    pub async fn acquire_copy(&self) -> SemaphoreGuardArc {
        self.copy.acquire_arc().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn exec_semaphore_gates_concurrency() {
        let sems = ExecSemaphores { exec: Arc::new(Semaphore::new(2)), copy: Arc::new(Semaphore::new(2)) };
        let in_flight = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let max_seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let sems_exec = sems.exec.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sems_exec.acquire_arc().await;
                let now = in_flight.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, std::sync::atomic::Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(max_seen.load(std::sync::atomic::Ordering::SeqCst) <= 2);
    }
}
