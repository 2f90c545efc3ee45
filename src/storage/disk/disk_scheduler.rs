use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::{BurrowError, PageId, Result, PAGE_SIZE};

use super::DiskManager;

/// What the worker should do with a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskRequestKind {
    /// Fill the buffer with the page's on-disk bytes (a page fetch)
    Fetch,
    /// Persist the buffer's bytes to the page's slot in the file
    /// (eviction write-back or an explicit flush)
    WriteBack,
}

/// One unit of work for the I/O worker: a page id, the frame buffer it
/// touches, and a completion signal the buffer pool blocks on.
pub struct DiskRequest {
    pub kind: DiskRequestKind,
    /// The page whose file slot is read or written
    pub page_id: PageId,
    /// Pointer to the frame buffer (must be PAGE_SIZE bytes).
    /// Fetches write into it; write-backs only read from it.
    pub frame_buf: *mut u8,
    /// Completion signal carrying the worker's success/failure
    pub completion: Option<std::sync::mpsc::Sender<bool>>,
}

// Safety: a request is handed to exactly one worker thread, and the
// buffer pool keeps the frame buffer valid until the completion signal
// arrives
unsafe impl Send for DiskRequest {}

impl DiskRequest {
    /// Builds a fetch: the worker fills `frame_buf` with the page bytes.
    pub fn fetch(page_id: PageId, frame_buf: *mut u8) -> Self {
        Self {
            kind: DiskRequestKind::Fetch,
            page_id,
            frame_buf,
            completion: None,
        }
    }

    /// Builds a write-back: the worker persists the bytes in `frame_buf`.
    pub fn write_back(page_id: PageId, frame_buf: *mut u8) -> Self {
        Self {
            kind: DiskRequestKind::WriteBack,
            page_id,
            frame_buf,
            completion: None,
        }
    }

    /// Attaches the completion signal for this request.
    pub fn with_completion(mut self, completion: std::sync::mpsc::Sender<bool>) -> Self {
        self.completion = Some(completion);
        self
    }
}

/// DiskScheduler owns the background thread through which the buffer
/// pool talks to the page file. Requests queue on a bounded channel; the
/// synchronous entry points block until the worker signals completion.
pub struct DiskScheduler {
    /// The disk manager for actual I/O operations
    disk_manager: Arc<DiskManager>,
    /// Channel sender for queuing requests
    request_sender: Sender<DiskRequest>,
    /// Flag to signal shutdown
    shutdown: Arc<AtomicBool>,
    /// Handle to the background worker thread
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a new DiskScheduler with the given DiskManager.
    /// Spawns a background worker thread to process requests.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(128);
        let shutdown = Arc::new(AtomicBool::new(false));

        let dm_clone = Arc::clone(&disk_manager);
        let shutdown_clone = Arc::clone(&shutdown);

        let worker_handle = thread::spawn(move || {
            Self::start_worker_thread(dm_clone, receiver, shutdown_clone);
        });

        Self {
            disk_manager,
            request_sender: sender,
            shutdown,
            worker_handle: Some(worker_handle),
        }
    }

    /// Schedules a disk request for processing by the background worker.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .send(request)
            .map_err(|e| BurrowError::DiskScheduler(format!("Failed to schedule request: {}", e)))
    }

    /// Fetches a page into the buffer and waits for completion.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (tx, rx) = std::sync::mpsc::channel();
        let request = DiskRequest::fetch(page_id, data.as_mut_ptr()).with_completion(tx);

        self.schedule(request)?;

        let ok = rx.recv().map_err(|e| {
            BurrowError::DiskScheduler(format!("Failed to receive completion: {}", e))
        })?;
        // The worker reports I/O failure out of band. A failed fetch must
        // not be mistaken for a successfully read page, or the pool would
        // serve the frame's leftover bytes as page contents.
        if !ok {
            return Err(BurrowError::DiskScheduler(format!(
                "Fetch of {} failed",
                page_id
            )));
        }

        Ok(())
    }

    /// Writes a page back from the buffer and waits for completion.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (tx, rx) = std::sync::mpsc::channel();
        // Safety: the worker only reads the buffer for write-backs, so
        // handing over a const pointer as mutable is sound here
        let request = DiskRequest::write_back(page_id, data.as_ptr() as *mut u8).with_completion(tx);

        self.schedule(request)?;

        let ok = rx.recv().map_err(|e| {
            BurrowError::DiskScheduler(format!("Failed to receive completion: {}", e))
        })?;
        // A write-back that failed silently would discard the only copy
        // of a dirty page once its frame is evicted.
        if !ok {
            return Err(BurrowError::DiskScheduler(format!(
                "Write-back of {} failed",
                page_id
            )));
        }

        Ok(())
    }

    /// The background worker thread function.
    /// Processes requests from the queue until shutdown is signaled.
    fn start_worker_thread(
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            // Check for shutdown
            if shutdown.load(Ordering::Relaxed) {
                // Drain remaining requests before exiting
                while let Ok(request) = receiver.try_recv() {
                    Self::process_request(&disk_manager, request);
                }
                break;
            }

            // Wait for a request with timeout
            match receiver.recv_timeout(std::time::Duration::from_millis(100)) {
                Ok(request) => {
                    Self::process_request(&disk_manager, request);
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    // Continue loop, check shutdown flag
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    // Channel closed, exit
                    break;
                }
            }
        }
    }

    /// Processes a single disk request.
    fn process_request(disk_manager: &DiskManager, request: DiskRequest) {
        let success = match request.kind {
            DiskRequestKind::WriteBack => {
                // Safety: the requester keeps the frame buffer valid for
                // PAGE_SIZE bytes until the completion signal is sent
                let data = unsafe { std::slice::from_raw_parts(request.frame_buf, PAGE_SIZE) };
                disk_manager.write_page(request.page_id, data).is_ok()
            }
            DiskRequestKind::Fetch => {
                // Safety: as above, and fetches have exclusive access to
                // the buffer
                let data = unsafe { std::slice::from_raw_parts_mut(request.frame_buf, PAGE_SIZE) };
                disk_manager.read_page(request.page_id, data).is_ok()
            }
        };

        // Signal completion
        if let Some(completion) = request.completion {
            let _ = completion.send(success);
        }
    }

    /// Returns a reference to the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Signal shutdown
        self.shutdown.store(true, Ordering::SeqCst);

        // Wait for worker thread to finish
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
