//! Device Owner Thread
//!
//! This module implements the "single owner" pattern for the device API.
//!
//! # Architecture
//!
//! One dedicated OS thread owns the [`DeviceRegistry`] (and through it every
//! driver handle). All other components submit work through a
//! [`DeviceController`], which pushes boxed closures onto an unbounded FIFO
//! channel and hands back a future for the result.
//!
//! The native device API is thread-affine, so this is an OS thread rather
//! than a tokio task: a task may be resumed on any worker.
//!
//! Work items run one at a time, in submission order. Submission happens
//! when [`DeviceController::run`] is *called*, not when the returned future
//! is first polled, so "submit A, then submit B" from any threads implies A's
//! side effects are visible to B.
//!
//! # Usage
//!
//! ```ignore
//! let controller = spawn_device_thread(driver_factory(move || MountDriver::new(root)))?;
//!
//! let exists = controller
//!     .run(|registry| registry.get_or_connect("Pixel 7")?.file_exists("DCIM\\a.jpg"))
//!     .await?;
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::driver::{DeviceInfo, DriverFactory};
use super::error::DeviceError;
use super::registry::DeviceRegistry;

/// Name of the device thread, visible in debuggers and panics
pub const DEVICE_THREAD_NAME: &str = "device-io";

type Job = Box<dyn FnOnce(&mut DeviceRegistry) + Send>;

/// Commands sent to the device thread
pub enum DeviceCommand {
    /// Run a unit of work against the registry
    Run(Job),

    /// Stop the thread after the items already queued ahead of this one
    Shutdown,
}

/// Controller for submitting work to the device thread
///
/// # Clone Semantics
///
/// Cloning only copies the channel sender. The thread exits once every
/// controller is dropped or [`shutdown`](Self::shutdown) is called.
#[derive(Clone)]
pub struct DeviceController {
    cmd_tx: mpsc::UnboundedSender<DeviceCommand>,
}

impl DeviceController {
    /// Submit a work item and get a future for its result.
    ///
    /// The item is enqueued before this function returns. The future always
    /// resolves: with the item's result, with `WorkPanicked` if the item
    /// panicked, or with `ThreadStopped` if the thread is gone.
    pub fn run<R, F>(&self, work: F) -> impl Future<Output = Result<R, DeviceError>> + Send + 'static
    where
        F: FnOnce(&mut DeviceRegistry) -> Result<R, DeviceError> + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let job: Job = Box::new(move |registry| {
            let result = match catch_unwind(AssertUnwindSafe(|| work(registry))) {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("Device work item panicked: {}", message);
                    Err(DeviceError::WorkPanicked(message))
                }
            };
            if reply_tx.send(result).is_err() {
                debug!("Caller dropped before receiving device work result");
            }
        });

        let queued = self.cmd_tx.send(DeviceCommand::Run(job)).is_ok();

        async move {
            if !queued {
                return Err(DeviceError::ThreadStopped);
            }
            reply_rx.await.map_err(|_| DeviceError::ThreadStopped)?
        }
    }

    /// Enumerate currently reachable devices
    pub async fn visible_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        self.run(|registry| registry.visible_devices()).await
    }

    /// Friendly names of currently reachable devices
    pub async fn visible_device_names(&self) -> Result<Vec<String>, DeviceError> {
        self.run(|registry| registry.visible_device_names()).await
    }

    /// Tear down every cached device connection
    pub async fn disconnect_all(&self) -> Result<(), DeviceError> {
        self.run(|registry| {
            registry.disconnect_all();
            Ok(())
        })
        .await
    }

    /// Ask the thread to stop once the items queued so far have run
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(DeviceCommand::Shutdown);
    }
}

/// Spawn the device thread
///
/// The driver is built by `factory` on the new thread and never leaves it.
pub fn spawn_device_thread(factory: DriverFactory) -> Result<DeviceController, DeviceError> {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<DeviceCommand>();

    std::thread::Builder::new()
        .name(DEVICE_THREAD_NAME.to_string())
        .spawn(move || {
            let mut registry = DeviceRegistry::new(factory());
            info!("Device thread started");

            while let Some(cmd) = cmd_rx.blocking_recv() {
                match cmd {
                    DeviceCommand::Run(job) => job(&mut registry),
                    DeviceCommand::Shutdown => {
                        info!("Device thread shutdown requested");
                        break;
                    }
                }
            }

            // === Cleanup phase ===
            drain_pending_commands(&mut cmd_rx);
            registry.disconnect_all();
            info!("Device thread terminated");
        })?;

    Ok(DeviceController { cmd_tx })
}

/// Drop everything still queued; each dropped reply sender resolves its
/// caller's future with `ThreadStopped`
fn drain_pending_commands(cmd_rx: &mut mpsc::UnboundedReceiver<DeviceCommand>) {
    cmd_rx.close();

    let mut dropped = 0usize;
    while let Ok(cmd) = cmd_rx.try_recv() {
        if let DeviceCommand::Run(job) = cmd {
            drop(job);
            dropped += 1;
        }
    }
    if dropped > 0 {
        warn!("Device thread stopped with {} queued work items", dropped);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::driver::driver_factory;
    use crate::device::memory::{MemoryDevice, MemoryDriver};
    use std::sync::{Arc, Mutex};

    fn spawn_memory() -> (DeviceController, MemoryDriver) {
        let driver = MemoryDriver::new(vec![MemoryDevice::new("1", "DeviceA", "Handheld A")]);
        let for_thread = driver.clone();
        let controller = spawn_device_thread(driver_factory(move || for_thread)).unwrap();
        (controller, driver)
    }

    #[tokio::test]
    async fn test_work_runs_on_device_thread() {
        let (controller, _) = spawn_memory();
        let name = controller
            .run(|_| Ok(std::thread::current().name().map(str::to_string)))
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some(DEVICE_THREAD_NAME));
    }

    #[tokio::test]
    async fn test_items_complete_in_submission_order() {
        let (controller, _) = spawn_memory();
        let log = Arc::new(Mutex::new(Vec::new()));

        let futures: Vec<_> = (0..50)
            .map(|i| {
                let log = log.clone();
                controller.run(move |_| {
                    log.lock().unwrap().push(i);
                    Ok(i)
                })
            })
            .collect();

        // Await in reverse; execution order is still submission order
        for (i, fut) in futures.into_iter().enumerate().rev() {
            assert_eq!(fut.await.unwrap(), i);
        }
        assert_eq!(*log.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_write_then_read_from_two_threads() {
        let (controller, _) = spawn_memory();
        let (submitted_tx, submitted_rx) = std::sync::mpsc::channel();

        let writer = {
            let controller = controller.clone();
            std::thread::spawn(move || {
                let w1 = controller.run(|registry| {
                    registry
                        .get_or_connect("DeviceA")?
                        .upload(&mut &b"X"[..], "F.txt")
                });
                submitted_tx.send(()).unwrap();
                tokio::runtime::Builder::new_current_thread()
                    .build()
                    .unwrap()
                    .block_on(w1)
                    .unwrap();
            })
        };

        let reader = {
            let controller = controller.clone();
            std::thread::spawn(move || {
                submitted_rx.recv().unwrap();
                let w2 = controller.run(|registry| {
                    let mut out = Vec::new();
                    registry.get_or_connect("DeviceA")?.download("F.txt", &mut out)?;
                    Ok(out)
                });
                tokio::runtime::Builder::new_current_thread()
                    .build()
                    .unwrap()
                    .block_on(w2)
                    .unwrap()
            })
        };

        writer.join().unwrap();
        assert_eq!(reader.join().unwrap(), b"X");
    }

    #[tokio::test]
    async fn test_panic_is_reported_and_thread_survives() {
        let (controller, _) = spawn_memory();

        let result: Result<(), DeviceError> = controller.run(|_| panic!("driver exploded")).await;
        match result {
            Err(DeviceError::WorkPanicked(msg)) => assert!(msg.contains("driver exploded")),
            other => panic!("Expected WorkPanicked, got {:?}", other),
        }

        assert_eq!(controller.run(|_| Ok(7)).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_shutdown_fails_later_work() {
        let (controller, _) = spawn_memory();
        controller.shutdown();

        let result = controller.run(|_| Ok(())).await;
        assert!(matches!(result, Err(DeviceError::ThreadStopped)));
    }

    #[tokio::test]
    async fn test_visible_devices_and_disconnect_all() {
        let (controller, driver) = spawn_memory();

        assert_eq!(controller.visible_device_names().await.unwrap(), vec!["DeviceA"]);
        controller
            .run(|registry| registry.get_or_connect("DeviceA").map(|_| ()))
            .await
            .unwrap();
        controller.disconnect_all().await.unwrap();

        let count = controller.run(|registry| Ok(registry.connection_count())).await.unwrap();
        assert_eq!(count, 0);
        assert_eq!(driver.connect_count("1"), 1);
    }
}
