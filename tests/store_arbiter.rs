use isolate_host::HostError;
use isolate_host::Store::{Node, StorageBackend, StoreArbiter, StoreHolders};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// Minimal tree backend: container nodes list children, data nodes hold bytes.
#[derive(Default)]
struct MemoryBackend {
    nodes: Mutex<BTreeMap<String, Node>>,
}

fn missing(uri: &str) -> HostError {
    HostError::Storage {
        message: format!("no node at {}", uri),
    }
}

impl StorageBackend for MemoryBackend {
    fn create_data_node(&self, uri: &str, data: &[u8]) -> isolate_host::Result<()> {
        self.nodes.lock().insert(
            uri.to_owned(),
            Node::Data {
                uri: uri.to_owned(),
                data: data.to_vec(),
            },
        );
        Ok(())
    }

    fn create_node(&self, uri: &str) -> isolate_host::Result<()> {
        self.nodes.lock().insert(
            uri.to_owned(),
            Node::Container {
                uri: uri.to_owned(),
                children: Vec::new(),
            },
        );
        Ok(())
    }

    fn get_node(&self, uri: &str) -> isolate_host::Result<Option<Node>> {
        Ok(self.nodes.lock().get(uri).cloned())
    }

    fn delete_node(&self, uri: &str) -> isolate_host::Result<()> {
        self.nodes
            .lock()
            .remove(uri)
            .map(|_| ())
            .ok_or_else(|| missing(uri))
    }

    fn update_data_node(&self, uri: &str, data: &[u8]) -> isolate_host::Result<()> {
        match self.nodes.lock().get_mut(uri) {
            Some(Node::Data { data: stored, .. }) => {
                *stored = data.to_vec();
                Ok(())
            }
            _ => Err(missing(uri)),
        }
    }
}

fn arbiter() -> Arc<StoreArbiter> {
    Arc::new(StoreArbiter::new(Arc::new(MemoryBackend::default())))
}

/// Spawn an `open_store` call and report when it was granted.
fn open_in_background(
    arbiter: &Arc<StoreArbiter>,
    exclusive: bool,
) -> (mpsc::Receiver<()>, Arc<AtomicBool>, thread::JoinHandle<()>) {
    let (granted_tx, granted_rx) = mpsc::channel();
    let release = Arc::new(AtomicBool::new(false));
    let arbiter = arbiter.clone();
    let release_flag = release.clone();
    let handle = thread::spawn(move || {
        let handle = arbiter.open_store(exclusive);
        granted_tx.send(()).unwrap();
        while !release_flag.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(2));
        }
        arbiter.close_store(handle);
    });
    (granted_rx, release, handle)
}

const SHORT: Duration = Duration::from_millis(100);
const LONG: Duration = Duration::from_secs(5);

#[test]
fn exclusive_holder_blocks_both_modes() {
    let arbiter = arbiter();
    let writer = arbiter.open_store(true);

    let (shared_rx, shared_release, shared_thread) = open_in_background(&arbiter, false);
    let (excl_rx, excl_release, excl_thread) = open_in_background(&arbiter, true);
    assert!(shared_rx.recv_timeout(SHORT).is_err());
    assert!(excl_rx.recv_timeout(SHORT).is_err());

    arbiter.close_store(writer);

    // both eventually get in, one after another
    shared_release.store(true, Ordering::SeqCst);
    excl_release.store(true, Ordering::SeqCst);
    shared_rx.recv_timeout(LONG).unwrap();
    excl_rx.recv_timeout(LONG).unwrap();
    shared_thread.join().unwrap();
    excl_thread.join().unwrap();
    assert_eq!(arbiter.holders(), StoreHolders::default());
}

#[test]
fn shared_holders_stack_and_block_exclusive_until_all_close() {
    let arbiter = arbiter();
    let readers: Vec<_> = (0..3).map(|_| arbiter.open_store(false)).collect();
    assert_eq!(
        arbiter.holders(),
        StoreHolders {
            exclusive: 0,
            shared: 3
        }
    );

    let (excl_rx, excl_release, excl_thread) = open_in_background(&arbiter, true);
    let mut readers = readers.into_iter();
    for _ in 0..3 {
        assert!(excl_rx.recv_timeout(SHORT).is_err());
        if let Some(reader) = readers.next() {
            arbiter.close_store(reader);
        }
    }
    excl_rx.recv_timeout(LONG).unwrap();
    excl_release.store(true, Ordering::SeqCst);
    excl_thread.join().unwrap();
}

#[test]
fn readers_may_join_while_a_writer_waits() {
    let arbiter = arbiter();
    let first_reader = arbiter.open_store(false);
    let (excl_rx, excl_release, excl_thread) = open_in_background(&arbiter, true);
    assert!(excl_rx.recv_timeout(SHORT).is_err());

    // reader preference: a new shared request is granted immediately
    let second_reader = arbiter.open_store_timeout(false, SHORT).unwrap();
    assert!(excl_rx.try_recv().is_err());

    drop(first_reader);
    drop(second_reader);
    excl_rx.recv_timeout(LONG).unwrap();
    excl_release.store(true, Ordering::SeqCst);
    excl_thread.join().unwrap();
}

#[test]
fn open_with_timeout_gives_up() {
    let arbiter = arbiter();
    let _writer = arbiter.open_store(true);
    assert!(matches!(
        arbiter.open_store_timeout(false, Duration::from_millis(30)),
        Err(HostError::TimedOut { .. })
    ));
    assert!(matches!(
        arbiter.open_store_timeout(true, Duration::from_millis(30)),
        Err(HostError::TimedOut { .. })
    ));
    assert_eq!(
        arbiter.holders(),
        StoreHolders {
            exclusive: 1,
            shared: 0
        }
    );
}

#[test]
fn shared_handle_cannot_mutate() {
    let arbiter = arbiter();
    {
        let writer = arbiter.open_store(true);
        writer.create_node("/apps").unwrap();
        writer.create_data_node("/apps/clock", b"v1").unwrap();
        writer.update_data_node("/apps/clock", b"v2").unwrap();
    }

    let reader = arbiter.open_store(false);
    assert!(!reader.is_exclusive());
    assert!(matches!(
        reader.create_node("/x"),
        Err(HostError::AccessDenied { .. })
    ));
    assert!(matches!(
        reader.create_data_node("/x", b""),
        Err(HostError::AccessDenied { .. })
    ));
    assert!(matches!(
        reader.update_data_node("/apps/clock", b"v3"),
        Err(HostError::AccessDenied { .. })
    ));
    assert!(matches!(
        reader.delete_node("/apps/clock"),
        Err(HostError::AccessDenied { .. })
    ));

    assert_eq!(
        reader.get_node("/apps/clock").unwrap(),
        Some(Node::Data {
            uri: "/apps/clock".to_owned(),
            data: b"v2".to_vec()
        })
    );
    assert_eq!(reader.get_node("/missing").unwrap(), None);
}

#[test]
fn backend_errors_pass_through_exclusive_handle() {
    let arbiter = arbiter();
    let writer = arbiter.open_store(true);
    assert!(matches!(
        writer.delete_node("/nothing"),
        Err(HostError::Storage { .. })
    ));
}

#[test]
fn concurrent_readers_and_writers_never_overlap() {
    let arbiter = arbiter();
    let active = Mutex::new(StoreHolders::default());

    crossbeam_utils::thread::scope(|s| {
        for worker in 0..8 {
            let arbiter = &arbiter;
            let active = &active;
            s.spawn(move |_| {
                for round in 0..50 {
                    let exclusive = (worker + round) % 4 == 0;
                    let handle = arbiter.open_store(exclusive);
                    {
                        let mut now = active.lock();
                        if exclusive {
                            assert_eq!(*now, StoreHolders::default());
                            now.exclusive += 1;
                        } else {
                            assert_eq!(now.exclusive, 0);
                            now.shared += 1;
                        }
                    }
                    thread::yield_now();
                    {
                        let mut now = active.lock();
                        if exclusive {
                            now.exclusive -= 1;
                        } else {
                            now.shared -= 1;
                        }
                    }
                    arbiter.close_store(handle);
                }
            });
        }
    })
    .unwrap();

    assert_eq!(arbiter.holders(), StoreHolders::default());
}

#[test]
fn unbounded_timeout_waits_instead_of_overflowing() {
    let arbiter = arbiter();
    let writer = arbiter.open_store_timeout(true, Duration::MAX).unwrap();
    assert!(writer.is_exclusive());

    let (granted_tx, granted_rx) = mpsc::channel();
    let waiter = {
        let arbiter = arbiter.clone();
        thread::spawn(move || {
            let reader = arbiter.open_store_timeout(false, Duration::MAX).unwrap();
            granted_tx.send(()).unwrap();
            arbiter.close_store(reader);
        })
    };
    assert!(granted_rx.recv_timeout(SHORT).is_err());

    arbiter.close_store(writer);
    granted_rx.recv_timeout(LONG).unwrap();
    waiter.join().unwrap();
    assert_eq!(arbiter.holders(), StoreHolders::default());
}
