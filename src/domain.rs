use crate::error::{DoorbellError, Result};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

enum Job {
    Run(BoxFuture<'static, ()>),
    Stop,
}

/// A named worker thread that runs posted work one item at a time, in the
/// order it was posted.
///
/// Each domain owns a current-thread runtime, so work posted here never
/// competes with the main loop or with other domains.
pub struct SchedulingDomain {
    handle: DomainHandle,
    thread: Option<JoinHandle<()>>,
    // Fires once the worker loop has returned
    stopped: Option<oneshot::Receiver<()>>,
}

/// Cloneable posting side of a [`SchedulingDomain`]
#[derive(Clone)]
pub struct DomainHandle {
    name: Arc<str>,
    sender: mpsc::UnboundedSender<Job>,
    closed: Arc<AtomicBool>,
}

impl SchedulingDomain {
    pub fn spawn(name: &str) -> Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let (stopped_tx, stopped_rx) = oneshot::channel();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let thread_name = name.to_string();
        let thread = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(job) = receiver.recv().await {
                        match job {
                            Job::Run(work) => work.await,
                            Job::Stop => break,
                        }
                    }
                });
                debug!("Scheduling domain {} stopped", thread_name);
                let _ = stopped_tx.send(());
            })?;

        info!("Started scheduling domain {}", name);

        Ok(Self {
            handle: DomainHandle {
                name: Arc::from(name),
                sender,
                closed: Arc::new(AtomicBool::new(false)),
            },
            thread: Some(thread),
            stopped: Some(stopped_rx),
        })
    }

    pub fn name(&self) -> &str {
        &self.handle.name
    }

    pub fn handle(&self) -> DomainHandle {
        self.handle.clone()
    }

    /// Post work directly on this domain
    pub fn post<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.post(work)
    }

    /// Stop accepting work, let queued work finish, then join the thread.
    ///
    /// Returns `false` if the thread did not exit within `timeout`; it is
    /// then left detached and the caller's runtime holds nothing on it.
    pub async fn shutdown(&mut self, timeout: Duration) -> bool {
        let Some(thread) = self.thread.take() else {
            return true;
        };

        self.handle.closed.store(true, Ordering::SeqCst);
        // Stop is queued behind any work already posted
        let _ = self.handle.sender.send(Job::Stop);

        // A dropped sender means the worker loop unwound
        let signalled = match self.stopped.take() {
            Some(stopped) => tokio::time::timeout(timeout, stopped).await.is_ok(),
            None => true,
        };

        if !signalled {
            warn!(
                "Scheduling domain {} did not stop within {:?}; detaching",
                self.handle.name, timeout
            );
            drop(thread);
            return false;
        }

        // The worker has left its loop, so this join is immediate
        match thread.join() {
            Ok(()) => info!("Scheduling domain {} shut down", self.handle.name),
            Err(_) => error!("Scheduling domain {} panicked", self.handle.name),
        }
        true
    }
}

impl Drop for SchedulingDomain {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.handle.closed.store(true, Ordering::SeqCst);
            let _ = self.handle.sender.send(Job::Stop);
        }
    }
}

impl DomainHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queue `work` to run after everything posted before it
    pub fn post<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_closed() {
            return Err(DoorbellError::component(
                self.name.to_string(),
                "scheduling domain is shut down",
            ));
        }

        self.sender
            .send(Job::Run(Box::pin(work)))
            .map_err(|_| DoorbellError::component(self.name.to_string(), "scheduling domain stopped"))
    }
}

impl std::fmt::Debug for DomainHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainHandle")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_runs_work_in_post_order() {
        let mut domain = SchedulingDomain::spawn("test-fifo").unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3u32 {
            let order = Arc::clone(&order);
            domain
                .post(async move {
                    // Earlier work sleeps longer; order must still hold
                    tokio::time::sleep(Duration::from_millis(u64::from(3 - i) * 10)).await;
                    order.lock().push(i);
                })
                .unwrap();
        }

        let (tx, rx) = oneshot::channel();
        domain
            .post(async move {
                let _ = tx.send(());
            })
            .unwrap();
        rx.await.unwrap();

        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert!(domain.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_work_runs_on_named_thread() {
        let mut domain = SchedulingDomain::spawn("test-named").unwrap();
        let (tx, rx) = oneshot::channel();
        domain
            .handle()
            .post(async move {
                let _ = tx.send(std::thread::current().name().map(str::to_string));
            })
            .unwrap();

        assert_eq!(rx.await.unwrap().as_deref(), Some("test-named"));
        assert!(domain.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_queued_work_finishes_before_shutdown() {
        let mut domain = SchedulingDomain::spawn("test-drain").unwrap();
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        domain
            .post(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();

        assert!(domain.shutdown(Duration::from_secs(1)).await);
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_post_after_shutdown_fails() {
        let mut domain = SchedulingDomain::spawn("test-closed").unwrap();
        let handle = domain.handle();
        assert!(domain.shutdown(Duration::from_secs(1)).await);

        assert!(handle.is_closed());
        assert!(handle.post(async {}).is_err());
        // Second shutdown is a no-op
        assert!(domain.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_shutdown_gives_up_on_stuck_work() {
        let mut domain = SchedulingDomain::spawn("test-stuck").unwrap();
        domain.post(futures::future::pending::<()>()).unwrap();

        assert!(!domain.shutdown(Duration::from_millis(50)).await);
        assert!(domain.handle().is_closed());
    }

    #[test]
    fn test_host_runtime_drops_after_detached_shutdown() {
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let detached = runtime.block_on(async {
                let mut domain = SchedulingDomain::spawn("test-detach").unwrap();
                domain.post(futures::future::pending::<()>()).unwrap();
                !domain.shutdown(Duration::from_millis(50)).await
            });
            drop(runtime);
            let _ = done_tx.send(detached);
        });

        let detached = done_rx
            .recv_timeout(Duration::from_secs(3))
            .expect("host runtime hung after detaching a stuck domain");
        assert!(detached);
    }
}
