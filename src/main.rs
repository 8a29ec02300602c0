use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread::sleep,
    time::{Duration, Instant},
};

use tracing::info;
use tracing_subscriber::EnvFilter;
use workgroup::{Error, Worker};

const DEFAULT_LIMIT: usize = 4;
const DEFAULT_WORD: &str = "abcdefghijklmnopqrstuvwxyz";

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let limit = args
        .next()
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(DEFAULT_LIMIT);
    let word = args.next().unwrap_or_else(|| DEFAULT_WORD.to_string());

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let visited = Arc::new(AtomicUsize::new(0));

    let worker = {
        let (running, peak, visited) = (running.clone(), peak.clone(), visited.clone());
        Worker::with_limit(limit, move |worker: &Worker<String>, word: String| {
            let len = word.chars().count();
            if len <= 1 {
                visited.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }

            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            info!(%word, running = now, "splitting");
            sleep(Duration::from_millis(10));
            running.fetch_sub(1, Ordering::SeqCst);

            // Split in half and queue both parts instead of recursing.
            worker.add(word.chars().take(len / 2).collect())?;
            worker.add(word.chars().skip(len / 2).collect())
        })
    };

    let start = Instant::now();
    worker.add(word)?;
    worker.wait()?;

    info!(
        elapsed = ?start.elapsed(),
        letters = visited.load(Ordering::SeqCst),
        peak = peak.load(Ordering::SeqCst),
        limit = worker.limit(),
        "done"
    );
    Ok(())
}
