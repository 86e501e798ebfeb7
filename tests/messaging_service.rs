use isolate_host::Core::transport::{LoopbackTransport, Transport};
use isolate_host::HostError;
use isolate_host::Messaging::{Message, MessagingService, MessagingServiceBuilder, SenderHandle};
use std::sync::{Arc, Weak};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn endpoints(data_offset: usize) -> (Arc<MessagingService>, Arc<MessagingService>) {
    let (a, b) = LoopbackTransport::pair_with(data_offset, 64);
    let executive = MessagingServiceBuilder::new()
        .with_own_sender(SenderHandle::Process(1))
        .with_poll_interval(Duration::from_millis(10))
        .build(Arc::new(a))
        .unwrap();
    let isolate = MessagingServiceBuilder::new()
        .with_own_sender(SenderHandle::Process(2))
        .with_poll_interval(Duration::from_millis(10))
        .with_initial_capacity(16)
        .build(Arc::new(b))
        .unwrap();
    (Arc::new(executive), Arc::new(isolate))
}

#[test]
fn fresh_messages_are_not_responses() {
    let (executive, _isolate) = endpoints(0);
    let first = executive.new_outgoing_message("a", None).unwrap();
    let second = executive.new_outgoing_message("a", None).unwrap();
    assert!(!first.is_response_message());
    assert_eq!(first.sender(), SenderHandle::Process(1));
    assert_ne!(first.id(), second.id());
    assert!(first.id() >= 0);
}

#[test]
fn reply_points_at_its_request() {
    let (executive, isolate) = endpoints(8);
    let _inbox = isolate.message_dispatcher().register_direct("query").unwrap();

    let mut request = executive
        .new_outgoing_message("query", Some("query.result"))
        .unwrap();
    request.write_utf(Some("uptime")).unwrap();
    executive.send(&request).unwrap();

    let mut received = isolate
        .message_dispatcher()
        .wait_for_message("query", WAIT)
        .unwrap();
    assert_eq!(received.sender(), SenderHandle::Process(1));
    assert_eq!(received.read_utf().unwrap().as_deref(), Some("uptime"));

    let reply = isolate.new_reply(&received).unwrap();
    assert_eq!(reply.response_id(), request.id());
    assert_eq!(reply.message_type(), "query.result");
    assert!(reply.is_response_message());
    assert_eq!(reply.return_type(), None);
}

#[test]
fn cannot_reply_without_return_type() {
    let (executive, isolate) = endpoints(0);
    let note = executive.new_outgoing_message("note", None).unwrap();
    let decoded = isolate.new_message(note.into_bytes()).unwrap();
    assert!(matches!(
        isolate.new_reply(&decoded),
        Err(HostError::IllegalState { .. })
    ));
}

fn echo_handler(service: Weak<MessagingService>) -> impl Fn(Message) + Send + Sync + 'static {
    move |mut message: Message| {
        let Some(service) = service.upgrade() else {
            return;
        };
        let value = message.read_i64().unwrap();
        let mut reply = service.new_reply(&message).unwrap();
        reply.write_i64(value * 2);
        service.send(&reply).unwrap();
    }
}

#[test]
fn request_waits_for_the_matching_reply() {
    let (executive, isolate) = endpoints(4);
    let _echo = isolate
        .message_dispatcher()
        .register_handler("double", echo_handler(Arc::downgrade(&isolate)))
        .unwrap();

    for value in [1i64, 21, -4] {
        let mut request = executive
            .new_outgoing_message("double", Some("double.result"))
            .unwrap();
        request.write_i64(value);
        let mut reply = executive.request(&request, WAIT).unwrap();
        assert_eq!(reply.response_id(), request.id());
        assert_eq!(reply.read_i64().unwrap(), value * 2);
    }

    // the reply type is free again afterwards
    assert!(executive.message_dispatcher().registered_types().is_empty());
}

#[test]
fn request_times_out_without_responder() {
    let (executive, _isolate) = endpoints(0);
    let request = executive
        .new_outgoing_message("void", Some("void.result"))
        .unwrap();
    assert!(matches!(
        executive.request(&request, Duration::from_millis(50)),
        Err(HostError::TimedOut { .. })
    ));
    assert!(executive.message_dispatcher().registered_types().is_empty());
}

#[test]
fn request_needs_a_return_type() {
    let (executive, _isolate) = endpoints(0);
    let request = executive.new_outgoing_message("void", None).unwrap();
    assert!(matches!(
        executive.request(&request, WAIT),
        Err(HostError::IllegalState { .. })
    ));
}

#[test]
fn small_initial_capacity_still_sends_large_messages() {
    let (executive, isolate) = endpoints(4);
    let _inbox = executive.message_dispatcher().register_direct("blob").unwrap();

    let payload: Vec<u8> = (0..4096).map(|i| (i * 7 % 256) as u8).collect();
    let mut message = isolate.new_outgoing_message("blob", None).unwrap();
    message.write_byte_array(&payload).unwrap();
    assert!(message.header_offset() > 0);
    isolate.send(&message).unwrap();

    let mut received = executive
        .message_dispatcher()
        .wait_for_message("blob", WAIT)
        .unwrap();
    assert_eq!(received.read_byte_array().unwrap(), payload);
}

#[test]
fn send_fails_once_peer_is_gone() {
    let (a, b) = LoopbackTransport::pair();
    let service = MessagingServiceBuilder::new()
        .with_poll_interval(Duration::from_millis(10))
        .build(Arc::new(a))
        .unwrap();
    b.close();
    let message = service.new_outgoing_message("late", None).unwrap();
    assert!(matches!(service.send(&message), Err(HostError::Transport(_))));
    drop(b);
}

#[test]
fn request_accepts_an_unbounded_timeout() {
    let (executive, isolate) = endpoints(4);
    let _echo = isolate
        .message_dispatcher()
        .register_handler("double", echo_handler(Arc::downgrade(&isolate)))
        .unwrap();

    let mut request = executive
        .new_outgoing_message("double", Some("double.result"))
        .unwrap();
    request.write_i64(8);
    let mut reply = executive.request(&request, Duration::MAX).unwrap();
    assert_eq!(reply.response_id(), request.id());
    assert_eq!(reply.read_i64().unwrap(), 16);
}

#[test]
fn unbounded_poll_interval_still_delivers_and_shuts_down() {
    let (a, b) = LoopbackTransport::pair();
    let executive = MessagingServiceBuilder::new()
        .with_poll_interval(Duration::MAX)
        .build(Arc::new(a))
        .unwrap();
    let isolate = MessagingServiceBuilder::new()
        .with_poll_interval(Duration::MAX)
        .build(Arc::new(b))
        .unwrap();
    let _inbox = executive.message_dispatcher().register_direct("hello").unwrap();

    let mut message = isolate.new_outgoing_message("hello", None).unwrap();
    message.write_i32(42);
    isolate.send(&message).unwrap();
    let mut received = executive
        .message_dispatcher()
        .wait_for_message("hello", WAIT)
        .unwrap();
    assert_eq!(received.read_i32().unwrap(), 42);

    // both readers are parked in unbounded receives; shutdown must still return
    let (done_tx, done_rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        executive.shutdown();
        drop(isolate);
        done_tx.send(()).unwrap();
    });
    done_rx.recv_timeout(WAIT).unwrap();
}
