//! Serializes disk I/O through a request queue drained by one worker thread.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use parking_lot::RwLock;

use crate::disk_manager::DiskManager;
use crate::{PageBuf, PageId};

/// A single disk I/O request routed through the scheduler.
pub struct DiskRequest {
    pub is_write: bool,
    /// Shared handle to the frame buffer the request reads from or fills.
    pub data: Arc<RwLock<PageBuf>>,
    pub page_id: PageId,
    /// Single-shot completion; `true` means the request succeeded.
    pub done: Sender<bool>,
}

/// Owns the worker thread and the channel feeding it. `None` on the channel
/// is the shutdown sentinel: the worker drains whatever is still queued
/// behind it, then exits.
pub struct DiskScheduler {
    queue: Mutex<Sender<Option<DiskRequest>>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(mut disk: DiskManager) -> Self {
        let (tx, rx) = channel::<Option<DiskRequest>>();
        let worker = thread::spawn(move || Self::run_worker(&mut disk, &rx));
        Self {
            queue: Mutex::new(tx),
            worker: Some(worker),
        }
    }

    /// Enqueues a request. Requests are serviced strictly in enqueue order.
    pub fn schedule(&self, request: DiskRequest) {
        self.queue
            .lock()
            .unwrap()
            .send(Some(request))
            .expect("disk scheduler worker is gone");
    }

    /// Creates the completion pair a caller blocks on.
    pub fn create_promise() -> (Sender<bool>, Receiver<bool>) {
        channel()
    }

    fn run_worker(disk: &mut DiskManager, rx: &Receiver<Option<DiskRequest>>) {
        while let Ok(message) = rx.recv() {
            match message {
                Some(request) => Self::service(disk, request),
                None => break,
            }
        }
        // Drain requests enqueued behind the shutdown sentinel.
        while let Ok(Some(request)) = rx.try_recv() {
            Self::service(disk, request);
        }
    }

    fn service(disk: &mut DiskManager, request: DiskRequest) {
        let ok = if request.is_write {
            let data = request.data.read();
            match disk.write_page(request.page_id, &data) {
                Ok(()) => true,
                Err(err) => {
                    crate::quarry_debug_log!(
                        "[DiskScheduler] write of page {} failed: {err}",
                        request.page_id
                    );
                    false
                }
            }
        } else {
            let mut data = request.data.write();
            match disk.read_page(request.page_id, &mut data) {
                Ok(()) => true,
                Err(err) => {
                    crate::quarry_debug_log!(
                        "[DiskScheduler] read of page {} failed: {err}",
                        request.page_id
                    );
                    false
                }
            }
        };
        // The caller may have stopped waiting; a dead receiver is fine.
        let _ = request.done.send(ok);
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        let _ = self.queue.lock().unwrap().send(None);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
