//! Local "file changed" notifications.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Listener = Arc<dyn Fn(&str) + Send + Sync>;

/// Observer list owned by one scope.
///
/// Emission is synchronous and in-process: listeners run on the emitting task
/// before the mutating call returns.
#[derive(Default)]
pub(crate) struct ChangeEmitter {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

impl ChangeEmitter {
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&str) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        ListenerHandle {
            id,
            emitter: Arc::downgrade(self),
        }
    }

    pub(crate) fn emit(&self, path: &str) {
        // Snapshot so listeners may subscribe or detach while running
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(path);
        }
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn remove(&self, id: u64) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }
}

/// Subscription returned by
/// [`ScopedFileService::on_file_changed`](super::ScopedFileService::on_file_changed).
///
/// Dropping the handle keeps the listener registered; call
/// [`remove`](Self::remove) to detach.
#[derive(Debug)]
pub struct ListenerHandle {
    id: u64,
    emitter: Weak<ChangeEmitter>,
}

impl ListenerHandle {
    /// Detaches the listener. No-op if the scope is gone.
    pub fn remove(self) {
        if let Some(emitter) = self.emitter.upgrade() {
            emitter.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_and_remove() {
        let emitter = Arc::new(ChangeEmitter::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let handle = emitter.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit("data/a.json");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        handle.remove();
        emitter.emit("data/a.json");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_listener_receives_path() {
        let emitter = Arc::new(ChangeEmitter::default());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let _handle = emitter.subscribe(move |path| sink.lock().push(path.to_string()));

        emitter.emit("data/global/x.json");
        assert_eq!(*seen.lock(), vec!["data/global/x.json".to_string()]);
    }

    #[test]
    fn test_remove_after_emitter_dropped() {
        let emitter = Arc::new(ChangeEmitter::default());
        let handle = emitter.subscribe(|_| {});
        drop(emitter);
        handle.remove();
    }
}
