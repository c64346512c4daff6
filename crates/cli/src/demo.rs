//! Demo workload: the kind of work an image viewer defers while the user
//! scrolls.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use lull_scheduler::{IdleOptions, Scheduler, TaskFailure, TaskHandle};

const REDRAW_REQUESTS: u32 = 10;
const THUMBNAILS: u64 = 4;
/// This thumbnail fails to decode.
const BROKEN_THUMBNAIL: u64 = 3;

/// Submit the workload. Returns a handle that finishes once every
/// submitted task has finished.
pub fn submit(scheduler: &Scheduler, tasks: usize) -> Result<TaskHandle> {
    let mut handles = Vec::with_capacity(tasks + THUMBNAILS as usize + 1);

    for i in 0..tasks {
        let options = IdleOptions::new()
            .priority((i % 5) as i32)
            .after(Duration::from_millis((i as u64 % 4) * 10))
            .timeout(Duration::from_millis(5))
            .name(format!("layout-{}", i % 3));
        handles.push(scheduler.enqueue_idle(
            move || {
                thread::sleep(Duration::from_millis(2));
                debug!(step = i, "layout step");
                Ok(())
            },
            options,
        ));
    }

    // Bursts of redraw requests collapse into one redraw.
    let mut redraw = None;
    for frame in 0..REDRAW_REQUESTS {
        redraw = Some(scheduler.enqueue_idle(
            move || {
                info!(frame, "redraw");
                Ok(())
            },
            IdleOptions::new().priority(-1).coalesce("redraw"),
        ));
    }
    handles.extend(redraw);

    for n in 1..=THUMBNAILS {
        handles.push(scheduler.background(
            move || {
                thread::sleep(Duration::from_millis(5 * n));
                if n == BROKEN_THUMBNAIL {
                    anyhow::bail!("thumbnail {n} is not a valid image");
                }
                Ok(n * 1024)
            },
            move |result: Result<u64, TaskFailure>| {
                match result {
                    Ok(bytes) => info!(thumbnail = n, bytes, "thumbnail ready"),
                    Err(failure) => warn!(thumbnail = n, error = %failure, "thumbnail failed"),
                }
                Ok(())
            },
        )?);
    }

    Ok(scheduler.wait(handles, || {
        info!("all demo work finished");
        Ok(())
    }))
}
