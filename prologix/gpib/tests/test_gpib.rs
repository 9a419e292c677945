//! Tests for the shared GPIB bus and its client sessions.

use std::time::{Duration, Instant};

use rstest::*;

use labdaemon::LoopbackLink;

use prologix_gpib::*;

// Type alias for a bus over a loopback link.
type GpibLbk = GpibBus<LoopbackLink>;

/// Create a connected bus, returning it with the time of connection.
#[fixture]
fn bus() -> (GpibLbk, Instant) {
    let t0 = Instant::now();
    let mut bus = GpibBus::new(LoopbackLink::new(vec![]), BusConfig::default());
    bus.link_mut().expect_cmd("++auto 0");
    bus.on_connect(t0).unwrap();
    (bus, t0)
}

/// Create a session with the given address.
fn session(name: &str, addr: u8, bus: &mut GpibLbk) -> GpibSession {
    let mut s = GpibSession::new(name);
    assert!(s.process_message(&format!("set_addr {addr}"), bus).is_empty());
    s
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Expect the given lines to be sent on the next tick.
fn tick(bus: &mut GpibLbk, now: Instant, live: &[u8], exp: &[&str]) {
    for line in exp {
        bus.link_mut().expect_cmd(line);
    }
    bus.on_tick(now, live.iter().copied()).unwrap();
}

#[rstest]
fn connect_status(bus: (GpibLbk, Instant)) {
    let (mut bus, _) = bus;
    let mut s = GpibSession::new("c");
    let replies = s.process_message("get_status", &mut bus);
    assert_eq!(replies, vec!["status hw_connected=1 current_addr=-1"]);
    assert_eq!(bus.current_addr(), None);
}

#[rstest]
fn round_robin_fairness(bus: (GpibLbk, Instant)) {
    let (mut bus, t0) = bus;
    let mut s3 = session("a", 3, &mut bus);
    let mut s5 = session("b", 5, &mut bus);
    let mut s7 = session("c", 7, &mut bus);
    s5.process_message("OUTP ON", &mut bus);
    s7.process_message("VOLT 1", &mut bus);
    s3.process_message("CURR 2", &mut bus);

    let live = [3, 5, 7];
    tick(&mut bus, t0 + ms(10), &live, &["++addr 3", "CURR 2"]);
    tick(&mut bus, t0 + ms(20), &live, &["++addr 5", "OUTP ON"]);
    tick(&mut bus, t0 + ms(30), &live, &["++addr 7", "VOLT 1"]);
    assert_eq!(bus.current_addr(), Some(7));
    assert_eq!(bus.status().get(CURRENT_ADDR).as_deref(), Some("7"));
}

#[rstest]
fn round_robin_no_starvation(bus: (GpibLbk, Instant)) {
    let (mut bus, t0) = bus;
    let mut s3 = session("a", 3, &mut bus);
    let mut s5 = session("b", 5, &mut bus);
    s3.process_message("A1", &mut bus);
    s3.process_message("A2", &mut bus);
    s3.process_message("A3", &mut bus);
    s5.process_message("B1", &mut bus);

    let live = [3, 5];
    tick(&mut bus, t0 + ms(10), &live, &["++addr 3", "A1"]);
    tick(&mut bus, t0 + ms(20), &live, &["++addr 5", "B1"]);
    tick(&mut bus, t0 + ms(30), &live, &["++addr 3", "A2"]);
    // address 3 is already selected, no switch required
    tick(&mut bus, t0 + ms(40), &live, &["A3"]);
    assert_eq!(bus.pending(3), 0);
}

#[rstest]
fn query_busy_and_reply(bus: (GpibLbk, Instant)) {
    let (mut bus, t0) = bus;
    let mut s5 = session("a", 5, &mut bus);
    let mut s7 = session("b", 7, &mut bus);
    s5.process_message("?$*IDN?", &mut bus);
    assert_eq!(bus.pending(5), 2);

    let live = [5, 7];
    tick(&mut bus, t0, &live, &["++addr 5", "*IDN?"]);
    assert!(!bus.is_busy());
    tick(&mut bus, t0, &live, &[READ_EOI]);
    assert!(bus.is_busy());

    // nothing is sent while waiting for the reply
    s7.process_message("VOLT 1", &mut bus);
    tick(&mut bus, t0 + ms(1000), &live, &[]);
    tick(&mut bus, t0 + ms(2900), &live, &[]);

    let reply = bus.on_message("KEITHLEY 2000\r\n", t0 + ms(2950)).unwrap();
    assert_eq!(
        reply,
        BusReply {
            addr: 5,
            text: "KEITHLEY 2000".to_string()
        }
    );
    assert!(s5.accepts(&reply));
    assert!(!s7.accepts(&reply));
    assert!(!bus.is_busy());

    tick(&mut bus, t0 + ms(3000), &live, &["++addr 7", "VOLT 1"]);
}

#[rstest]
fn busy_timeout_reissues_read(bus: (GpibLbk, Instant)) {
    let (mut bus, t0) = bus;
    let mut s5 = session("a", 5, &mut bus);
    s5.process_message("?$MEAS?", &mut bus);

    let live = [5];
    tick(&mut bus, t0, &live, &["++addr 5", "MEAS?"]);
    tick(&mut bus, t0 + ms(10), &live, &[READ_EOI]);
    tick(&mut bus, t0 + ms(2000), &live, &[]);
    tick(&mut bus, t0 + ms(3010), &live, &[READ_EOI]);
    assert!(bus.is_busy());
    // the busy timer restarted with the second read
    tick(&mut bus, t0 + ms(5000), &live, &[]);
    tick(&mut bus, t0 + ms(6010), &live, &[READ_EOI]);

    assert!(bus.on_message("1.234", t0 + ms(6100)).is_some());
}

#[rstest]
fn keepalive_when_idle(bus: (GpibLbk, Instant)) {
    let (mut bus, t0) = bus;
    tick(&mut bus, t0 + ms(500), &[], &[]);
    tick(&mut bus, t0 + ms(1500), &[], &[ADDR_QUERY]);
    assert!(bus.is_busy());
    tick(&mut bus, t0 + ms(1600), &[], &[]);

    // the controller reply to the keepalive is absorbed
    assert_eq!(bus.on_message("0", t0 + ms(1700)), None);
    assert!(!bus.is_busy());
    tick(&mut bus, t0 + ms(2000), &[], &[]);
    tick(&mut bus, t0 + ms(2800), &[], &[ADDR_QUERY]);
}

#[rstest]
fn reply_without_address(bus: (GpibLbk, Instant)) {
    let (mut bus, t0) = bus;
    assert_eq!(bus.on_message("stray", t0), None);
}

#[rstest]
fn stale_queue_drains(bus: (GpibLbk, Instant)) {
    let (mut bus, t0) = bus;
    let mut s4 = session("a", 4, &mut bus);
    s4.process_message("A1", &mut bus);
    s4.process_message("A2", &mut bus);
    drop(s4);

    // the session is gone, its queue is still serviced until it is empty
    tick(&mut bus, t0, &[], &["++addr 4", "A1"]);
    assert_eq!(bus.addresses().collect::<Vec<_>>(), vec![4]);
    tick(&mut bus, t0, &[], &["A2"]);
    assert_eq!(bus.addresses().count(), 0);
}

#[rstest]
fn srq_reads_itself(bus: (GpibLbk, Instant)) {
    let (mut bus, t0) = bus;
    let mut s = session("a", 9, &mut bus);
    s.process_message("?$++srq", &mut bus);
    assert_eq!(bus.pending(9), 1);
    tick(&mut bus, t0, &[9], &["++addr 9", SRQ]);
    assert!(bus.is_busy());
}

#[rstest]
fn send_command(bus: (GpibLbk, Instant)) {
    let (mut bus, t0) = bus;
    let mut s = session("a", 2, &mut bus);
    assert!(s.process_message("send ?$READ?", &mut bus).is_empty());
    tick(&mut bus, t0, &[2], &["++addr 2", "READ?"]);
    tick(&mut bus, t0, &[2], &[READ_EOI]);
}

#[rstest]
fn unaddressed_session_sends_directly(bus: (GpibLbk, Instant)) {
    let (mut bus, _) = bus;
    let mut s = GpibSession::new("a");
    bus.link_mut().expect_cmd("++ver");
    assert!(s.process_message("send ++ver", &mut bus).is_empty());

    let replies = s.process_message("*IDN?", &mut bus);
    assert_eq!(replies, vec!["command *IDN? not implemented"]);
}

#[rstest]
fn direct_send_waits_for_reply(bus: (GpibLbk, Instant)) {
    let (mut bus, t0) = bus;
    let mut s5 = session("a", 5, &mut bus);
    let mut direct = GpibSession::new("b");
    s5.process_message("?$*IDN?", &mut bus);

    let live = [5];
    tick(&mut bus, t0, &live, &["++addr 5", "*IDN?"]);
    tick(&mut bus, t0, &live, &[READ_EOI]);
    assert!(bus.is_busy());

    // nothing is written while the read is pending
    assert!(direct.process_message("send ++ver", &mut bus).is_empty());
    assert_eq!(bus.held(), 1);
    tick(&mut bus, t0 + ms(100), &live, &[]);

    let reply = bus.on_message("KEITHLEY 2000", t0 + ms(200)).unwrap();
    assert_eq!(reply.addr, 5);
    tick(&mut bus, t0 + ms(300), &live, &["++ver"]);
    assert_eq!(bus.held(), 0);
}

#[rstest]
#[case("set_addr 0")]
#[case("set_addr 31")]
#[case("set_addr five")]
fn set_addr_invalid(bus: (GpibLbk, Instant), #[case] line: &str) {
    let (mut bus, _) = bus;
    let mut s = GpibSession::new("a");
    let replies = s.process_message(line, &mut bus);
    assert_eq!(replies.len(), 1);
    assert!(replies[0].contains("invalid GPIB address"));
    assert_eq!(s.addr(), None);
}

#[rstest]
fn set_addr_clear(bus: (GpibLbk, Instant)) {
    let (mut bus, _) = bus;
    let mut s = session("a", 12, &mut bus);
    assert_eq!(s.addr(), Some(12));
    s.process_message("SET_ADDR", &mut bus);
    assert_eq!(s.addr(), None);
}

#[rstest]
fn too_many_dollars(bus: (GpibLbk, Instant)) {
    let (mut bus, _) = bus;
    let mut s = session("a", 3, &mut bus);
    let replies = s.process_message("?$A$B", &mut bus);
    assert_eq!(replies.len(), 1);
    assert!(replies[0].contains("?$cmd"));
    assert_eq!(bus.pending(3), 0);
}

#[rstest]
fn disconnect(bus: (GpibLbk, Instant)) {
    let (mut bus, t0) = bus;
    let mut s = session("a", 3, &mut bus);
    s.process_message("A1", &mut bus);
    tick(&mut bus, t0, &[3], &["++addr 3", "A1"]);
    s.process_message("A2", &mut bus);

    bus.on_disconnect();
    assert_eq!(bus.pending(3), 0);
    assert_eq!(bus.current_addr(), None);
    assert_eq!(
        s.process_message("get_status", &mut bus),
        vec!["status hw_connected=0 current_addr=-1"]
    );
    assert_eq!(
        s.process_message("A3", &mut bus),
        vec!["Hardware is not connected"]
    );
    tick(&mut bus, t0 + ms(5000), &[3], &[]);
}
