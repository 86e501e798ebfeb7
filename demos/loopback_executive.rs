// Executive and simulated isolates in one process, wired over a loopback transport.
//
// Run with `RUST_LOG=debug` to see dispatcher and lifecycle tracing.

use isolate_host::Core::process::ProcessSpawner;
use isolate_host::Core::transport::LoopbackTransport;
use isolate_host::Isolate::{
    notify_destroyed, notify_initialized, AppModel, IsolateManager, IsolateManagerConfig,
    IsolateState,
};
use isolate_host::Messaging::{Message, MessagingService, MessagingServiceBuilder, SenderHandle};
use std::env;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// "Processes" are threads that answer on the isolate side of the transport.
struct ThreadSpawner {
    isolate_side: Arc<MessagingService>,
    next_pid: AtomicU32,
}

impl ProcessSpawner for ThreadSpawner {
    fn create_process(&self, args: &[String]) -> io::Result<u32> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        println!("Spawner: pid {} launched with {:?}", pid, args);
        let service = self.isolate_side.clone();
        thread::Builder::new()
            .name(format!("isolate-{}", pid))
            .spawn(move || {
                thread::sleep(Duration::from_millis(30));
                if let Err(e) = notify_initialized(&service, pid) {
                    eprintln!("Isolate {}: failed to report: {}", pid, e);
                }
            })?;
        Ok(pid)
    }
}

/// Isolate side of a "clock" request: replies with the request count so far.
fn clock_service(service: Weak<MessagingService>) -> impl Fn(Message) + Send + Sync + 'static {
    let served = AtomicU32::new(0);
    move |message: Message| {
        let Some(service) = service.upgrade() else {
            return;
        };
        let count = served.fetch_add(1, Ordering::SeqCst) + 1;
        let sent = service.new_reply(&message).and_then(|mut reply| {
            reply.write_i32(count as i32);
            service.send(&reply)
        });
        if let Err(e) = sent {
            eprintln!("Isolate: failed to answer tick: {}", e);
        }
    }
}

fn main() -> isolate_host::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    let isolates: usize = if args.len() > 1 {
        args[1].parse().unwrap_or(2)
    } else {
        2
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .map_err(|e| isolate_host::HostError::IllegalState {
        message: format!("cannot install Ctrl-C handler: {}", e),
    })?;

    let (executive_end, isolate_end) = LoopbackTransport::pair_with(4, 256);
    let executive = Arc::new(
        MessagingServiceBuilder::new()
            .with_own_sender(SenderHandle::Process(1))
            .with_thread_name("executive-reader")
            .build(Arc::new(executive_end))?,
    );
    let isolate_side = Arc::new(
        MessagingServiceBuilder::new()
            .with_own_sender(SenderHandle::Process(2))
            .with_thread_name("isolate-reader")
            .build(Arc::new(isolate_end))?,
    );
    let _clock = isolate_side
        .message_dispatcher()
        .register_handler("clock.tick", clock_service(Arc::downgrade(&isolate_side)))?;

    let manager = IsolateManager::new(
        IsolateManagerConfig::new()
            .with_default_vm_args(["-Xmx8m"])
            .with_init_timeout(Duration::from_secs(5)),
        Arc::new(ThreadSpawner {
            isolate_side: isolate_side.clone(),
            next_pid: AtomicU32::new(100),
        }),
        executive.clone(),
    )?;

    for _ in 0..isolates {
        let isolate = manager.new_isolate(AppModel::Main, &[])?;
        println!("Executive: isolate {} is {}", isolate.pid(), isolate.state());
    }

    println!("Executive: ticking, press Ctrl-C to stop");
    while running.load(Ordering::SeqCst) {
        let request = executive.new_outgoing_message("clock.tick", Some("clock.tock"))?;
        let mut reply = executive.request(&request, Duration::from_secs(1))?;
        println!("Executive: tock {}", reply.read_i32()?);
        thread::sleep(Duration::from_millis(500));
    }

    for isolate in manager.active_isolates() {
        notify_destroyed(&isolate_side, isolate.pid())?;
        isolate.wait_for_state(IsolateState::Destroyed, Duration::from_secs(1))?;
        println!("Executive: isolate {} is {}", isolate.pid(), isolate.state());
    }

    drop(manager);
    isolate_side.shutdown();
    executive.shutdown();
    Ok(())
}
