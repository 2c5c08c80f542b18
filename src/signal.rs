//! Signal dispatcher (component C, spec.md §4.C), grounded in the Go
//! source's `signal.go` (`SetSigHandler`/`ServeSignals`/`ErrStop`) but
//! realized with `signal-hook`'s queueing iterator so handlers run on a
//! plain thread rather than in signal-handler context, per spec.md §9 and
//! the same pattern used in
//! `examples/other_examples/4ab30125_leynos-weaver__crates-weaverd-src-process.rs.rs`.

use anyhow::Result;
use signal_hook::consts::SIGTERM;
use signal_hook::iterator::Signals;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// A registered handler: takes the delivered signal number.
pub type Handler = Arc<dyn Fn(i32) -> HandlerResult + Send + Sync>;

/// What a handler reports back to `serve`.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Either the "stop" sentinel or a genuine handler failure.
#[derive(Debug)]
pub enum HandlerError {
    /// Requests that `serve` return cleanly with no error.
    Stop,
    /// A real failure; `serve` stops and surfaces it.
    Other(anyhow::Error),
}

/// The sentinel a handler returns to end `serve` cleanly (mirrors the Go
/// source's `ErrStop`).
pub fn stop() -> HandlerResult {
    Err(HandlerError::Stop)
}

struct Registry {
    handlers: HashMap<i32, Vec<Handler>>,
    serving: AtomicBool,
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut handlers: HashMap<i32, Vec<Handler>> = HashMap::new();
        handlers.insert(SIGTERM, vec![default_sigterm_handler()]);
        Mutex::new(Registry {
            handlers,
            serving: AtomicBool::new(false),
        })
    })
}

fn default_sigterm_handler() -> Handler {
    Arc::new(|_sig| stop())
}

/// Appends `handler` to each of `signals`'s handler list (spec.md §4.C:
/// per-signal lists are append-only; registration order is call order).
pub fn register<F>(handler: F, signals: &[i32])
where
    F: Fn(i32) -> HandlerResult + Send + Sync + 'static,
{
    let handler: Handler = Arc::new(handler);
    let mut reg = registry().lock().expect("signal registry poisoned");
    for &sig in signals {
        reg.handlers.entry(sig).or_default().push(handler.clone());
    }
}

/// Blocks, delivering each received signal to its registered handlers in
/// registration order, until a handler returns `stop()` or a real error.
/// Refuses to run re-entrantly; the latch resets once this call returns,
/// so a later call can `serve` again in the same process (spec.md §4.C).
pub fn serve() -> Result<()> {
    let sig_list: Vec<i32> = {
        let reg = registry().lock().expect("signal registry poisoned");
        if reg.serving.swap(true, Ordering::SeqCst) {
            anyhow::bail!("serve is already running in this process");
        }
        reg.handlers.keys().copied().collect()
    };

    let result = run(&sig_list);

    registry()
        .lock()
        .expect("signal registry poisoned")
        .serving
        .store(false, Ordering::SeqCst);
    result
}

fn run(sig_list: &[i32]) -> Result<()> {
    let mut signals = Signals::new(sig_list)?;
    for sig in signals.forever() {
        let handlers = {
            let reg = registry().lock().expect("signal registry poisoned");
            reg.handlers.get(&sig).cloned().unwrap_or_default()
        };
        if dispatch(sig, &handlers)? {
            break;
        }
    }
    Ok(())
}

/// Runs every handler in `handlers` for `sig`, in order. Returns `Ok(true)`
/// once `serve` should stop (spec.md §4.C): a "stop" request from one
/// handler never short-circuits the rest of this signal's own list — it
/// only requests that `serve` return once that list has run to completion.
/// This mirrors the Go source's `ServeSignals`, which nulls `ErrStop`
/// before its "break on error" check so later handlers for the same signal
/// still fire; a pre-registered default handler returning "stop" must not
/// silently swallow a later-registered handler for the same signal.
fn dispatch(sig: i32, handlers: &[Handler]) -> Result<bool> {
    let mut should_stop = false;
    for handler in handlers {
        match handler(sig) {
            Ok(()) => {}
            Err(HandlerError::Stop) => should_stop = true,
            Err(HandlerError::Other(e)) => return Err(e),
        }
    }
    Ok(should_stop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn default_sigterm_handler_requests_stop() {
        let handler = default_sigterm_handler();
        assert!(matches!(handler(SIGTERM), Err(HandlerError::Stop)));
    }

    #[test]
    fn register_appends_the_same_handler_to_every_listed_signal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        register(
            move |_sig| {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            &[signal_hook::consts::SIGUSR1, signal_hook::consts::SIGUSR2],
        );

        let reg = registry().lock().unwrap();
        for sig in [signal_hook::consts::SIGUSR1, signal_hook::consts::SIGUSR2] {
            let handlers = reg.handlers.get(&sig).expect("registered signal");
            assert!(!handlers.is_empty());
        }
    }

    #[test]
    fn stop_from_an_earlier_handler_does_not_skip_a_later_one() {
        let later_ran = Arc::new(AtomicBool::new(false));
        let later_ran_in_handler = Arc::clone(&later_ran);
        let handlers: Vec<Handler> = vec![
            Arc::new(|_sig| stop()),
            Arc::new(move |_sig| {
                later_ran_in_handler.store(true, Ordering::SeqCst);
                Ok(())
            }),
        ];

        let should_stop = dispatch(SIGTERM, &handlers).unwrap();

        assert!(later_ran.load(Ordering::SeqCst));
        assert!(should_stop);
    }

    #[test]
    fn a_real_error_stops_dispatch_before_later_handlers_run() {
        let later_ran = Arc::new(AtomicBool::new(false));
        let later_ran_in_handler = Arc::clone(&later_ran);
        let handlers: Vec<Handler> = vec![
            Arc::new(|_sig| Err(HandlerError::Other(anyhow::anyhow!("boom")))),
            Arc::new(move |_sig| {
                later_ran_in_handler.store(true, Ordering::SeqCst);
                Ok(())
            }),
        ];

        assert!(dispatch(SIGTERM, &handlers).is_err());
        assert!(!later_ran.load(Ordering::SeqCst));
    }
}
