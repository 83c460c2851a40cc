//! End-to-end scenarios driving the public API the way an application
//! would: construct a `Loop`, register a handful of resources against it,
//! and pump `run_once` until the scenario's done condition is observed.
//! Unlike the per-module unit tests, nothing here reaches into crate-
//! internal types.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use loopio::net::{TcpListener, TcpStream, UdpSocket};
use loopio::sip::{Method, Session, StartLine, StatusCode, TransportKind};
use loopio::{Future, Loop, Signal, Timer};

fn pump_until(loop_: &Arc<Loop>, deadline: Instant, mut done: impl FnMut() -> bool) {
    while !done() && Instant::now() < deadline {
        loop_.run_once(Some(Duration::from_millis(50))).unwrap();
    }
}

#[test]
fn tcp_echo_round_trip() {
    let loop_ = Loop::new().unwrap();

    let accepted_streams: Arc<Mutex<Vec<Arc<TcpStream>>>> = Arc::new(Mutex::new(Vec::new()));
    let accepted_streams2 = accepted_streams.clone();
    let listener = TcpListener::bind(&loop_, "127.0.0.1:0".parse().unwrap(), move |accepted| {
        let stream = Arc::new(accepted.unwrap());
        let echoer = stream.clone();
        stream
            .start_read(move |data| {
                if let Ok(bytes) = data {
                    let _ = echoer.write(bytes.to_vec(), |_| {});
                }
            })
            .unwrap();
        accepted_streams2.lock().unwrap().push(stream);
    })
    .unwrap();
    let addr = listener.local_addr().unwrap();

    let connected = Arc::new(AtomicBool::new(false));
    let connected2 = connected.clone();
    let client = TcpStream::connect(&loop_, addr, move |r| {
        connected2.store(r.is_ok(), Ordering::SeqCst);
    })
    .unwrap();

    pump_until(&loop_, Instant::now() + Duration::from_secs(3), || connected.load(Ordering::SeqCst));
    assert!(connected.load(Ordering::SeqCst));

    let echoed: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let echoed2 = echoed.clone();
    client
        .start_read(move |data| {
            if let Ok(bytes) = data {
                echoed2.lock().unwrap().extend_from_slice(bytes);
            }
        })
        .unwrap();
    client.write(b"ping".to_vec(), |_| {}).unwrap();

    pump_until(&loop_, Instant::now() + Duration::from_secs(3), || !echoed.lock().unwrap().is_empty());
    assert_eq!(&*echoed.lock().unwrap(), b"ping");
}

#[test]
fn udp_datagram_round_trip() {
    let loop_ = Loop::new().unwrap();
    let a = UdpSocket::bind(&loop_, "127.0.0.1:0".parse().unwrap()).unwrap();
    let b = UdpSocket::bind(&loop_, "127.0.0.1:0".parse().unwrap()).unwrap();
    let b_addr = b.local_addr().unwrap();

    let got: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let got2 = got.clone();
    b.start_read(move |r| {
        if let Ok((bytes, _from)) = r {
            got2.lock().unwrap().extend_from_slice(bytes);
        }
    })
    .unwrap();

    a.send_to(b"hello loop".to_vec(), b_addr, |_| {}).unwrap();

    pump_until(&loop_, Instant::now() + Duration::from_secs(3), || !got.lock().unwrap().is_empty());
    assert_eq!(&*got.lock().unwrap(), b"hello loop");
}

#[test]
fn timer_fires_repeatedly_when_reset_from_its_own_callback() {
    let loop_ = Loop::new().unwrap();
    let timer = Arc::new(Timer::new(&loop_).unwrap());
    let ticks = Arc::new(AtomicU32::new(0));

    let ticks_cb = ticks.clone();
    let timer_for_cb = timer.clone();
    timer
        .start(Duration::from_millis(100), move || {
            ticks_cb.fetch_add(1, Ordering::SeqCst);
            let _ = timer_for_cb.reset(None);
        })
        .unwrap();

    pump_until(&loop_, Instant::now() + Duration::from_secs(2), || ticks.load(Ordering::SeqCst) >= 3);
    assert!(ticks.load(Ordering::SeqCst) >= 3);
}

#[test]
fn future_delay_runs_once_on_the_loop_thread() {
    let loop_ = Loop::new().unwrap();
    let ran = Arc::new(AtomicBool::new(false));
    let ran2 = ran.clone();
    let future = Future::execute(&loop_, Duration::from_millis(10), move || {
        ran2.store(true, Ordering::SeqCst);
    })
    .unwrap();

    pump_until(&loop_, Instant::now() + Duration::from_secs(2), || ran.load(Ordering::SeqCst));
    assert!(ran.load(Ordering::SeqCst));
    assert!(future.is_finished());
}

#[test]
fn connect_completion_is_always_deferred_past_the_call_that_triggers_it() {
    // Connecting to a loopback listener that's already accepting resolves
    // the underlying socket() + connect() immediately (no EINPROGRESS), but
    // the callback must still only run once the loop has actually spun --
    // never synchronously inside `connect`.
    let loop_ = Loop::new().unwrap();
    let listener = TcpListener::bind(&loop_, "127.0.0.1:0".parse().unwrap(), |_| {}).unwrap();
    let addr = listener.local_addr().unwrap();

    let connected = Arc::new(AtomicBool::new(false));
    let connected2 = connected.clone();
    let _client = TcpStream::connect(&loop_, addr, move |r| {
        connected2.store(r.is_ok(), Ordering::SeqCst);
    })
    .unwrap();

    // Nothing has run the loop yet: the callback cannot have fired.
    assert!(!connected.load(Ordering::SeqCst));

    pump_until(&loop_, Instant::now() + Duration::from_secs(3), || connected.load(Ordering::SeqCst));
    assert!(connected.load(Ordering::SeqCst));
}

#[test]
fn cross_thread_signal_wakes_the_loop() {
    let loop_ = Loop::new().unwrap();
    let fired = Arc::new(AtomicBool::new(false));
    let fired2 = fired.clone();
    let signal = Arc::new(Signal::new(&loop_, move || fired2.store(true, Ordering::SeqCst)).unwrap());

    let signal_for_thread = signal.clone();
    let th = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        signal_for_thread.set().unwrap();
    });

    pump_until(&loop_, Instant::now() + Duration::from_secs(3), || fired.load(Ordering::SeqCst));
    assert!(fired.load(Ordering::SeqCst));
    th.join().unwrap();
}

#[test]
fn sip_invite_over_tcp_gets_a_200_ok() {
    let loop_ = Loop::new().unwrap();

    let server_sessions: Arc<Mutex<Vec<Arc<Session>>>> = Arc::new(Mutex::new(Vec::new()));
    let server_sessions2 = server_sessions.clone();
    let loop_for_accept = loop_.clone();

    let listener = TcpListener::bind(&loop_, "127.0.0.1:0".parse().unwrap(), move |accepted| {
        let tcp = accepted.unwrap();
        let session = Arc::new(Session::from_accepted_tcp(&loop_for_accept, tcp).unwrap());
        let responder = session.clone();
        session.listen(Method::Invite, move |request| {
            let cseq = request.header::<loopio::sip::headers::CSeq>("cseq").unwrap().sequence;
            let mut response = loopio::sip::Message::new();
            response.set_start_line(StartLine::Response {
                version: "SIP/2.0".to_string(),
                code: StatusCode::OK,
                reason: "OK".to_string(),
            });
            response.add_header(
                "cseq",
                Box::new(loopio::sip::headers::CSeq {
                    sequence: cseq,
                    method: Method::Invite,
                }),
            );
            responder.send(response).unwrap();
        });
        server_sessions2.lock().unwrap().push(session);
    })
    .unwrap();
    let addr = listener.local_addr().unwrap();

    let client = Session::new(&loop_, TransportKind::Tcp);
    let opened = Arc::new(AtomicBool::new(false));
    let opened2 = opened.clone();
    client.open(addr, move |r| opened2.store(r.is_ok(), Ordering::SeqCst)).unwrap();
    pump_until(&loop_, Instant::now() + Duration::from_secs(3), || opened.load(Ordering::SeqCst));
    assert!(opened.load(Ordering::SeqCst));

    let mut invite = loopio::sip::Message::new();
    invite.set_start_line(StartLine::Request {
        method: Method::Invite,
        uri: "sip:bob@example.com".to_string(),
        version: "SIP/2.0".to_string(),
    });
    invite.add_header(
        "cseq",
        Box::new(loopio::sip::headers::CSeq {
            sequence: 1,
            method: Method::Invite,
        }),
    );

    let response: Arc<Mutex<Option<loopio::Result<loopio::sip::Message>>>> = Arc::new(Mutex::new(None));
    let response2 = response.clone();
    client
        .request(invite, move |r| {
            *response2.lock().unwrap() = Some(r);
        })
        .unwrap();

    pump_until(&loop_, Instant::now() + Duration::from_secs(3), || response.lock().unwrap().is_some());
    assert!(response.lock().unwrap().is_some());
}
