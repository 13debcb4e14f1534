//! End-to-end scenario 1: connect to a loopback server, write "ping"
//! inline, flush, read it back byte-identical.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

fn poll_until<T>(timeout: Duration, mut attempt: impl FnMut() -> Option<T>) -> T {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(v) = attempt() {
            return v;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for condition");
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn ping_round_trips_over_loopback() {
    let _ = env_logger::try_init();
    let srv = sockflow::listen("127.0.0.1", 18391).unwrap();
    assert!(sockflow::is_valid(srv));

    let mut client = TcpStream::connect("127.0.0.1:18391").unwrap();

    let accepted = poll_until(Duration::from_secs(2), || sockflow::accept(srv));
    assert!(sockflow::is_valid(accepted));

    sockflow::write(accepted, b"ping").unwrap();
    sockflow::flush(accepted).unwrap();

    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");

    // Exercise the read direction through the library too.
    client.write_all(b"pong").unwrap();
    let mut echoed = [0u8; 4];
    let n = poll_until(Duration::from_secs(2), || match sockflow::read(accepted, &mut echoed) {
        Ok(0) => None,
        Ok(n) => Some(n),
        Err(_) => Some(0),
    });
    assert_eq!(n, 4);
    assert_eq!(&echoed, b"pong");

    sockflow::force_close(accepted);
    sockflow::force_close(srv);
}
