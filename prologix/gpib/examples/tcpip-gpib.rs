use std::time::Instant;

use labdaemon::TcpLink;

use prologix_gpib::{BusConfig, GpibBus, GpibSession};

fn main() {
    // Define the link to the Prologix GPIB-ETHERNET controller.
    let link = TcpLink::try_new("192.168.127.42:1234").unwrap();

    let mut bus = GpibBus::new(link, BusConfig::default());
    bus.on_connect(Instant::now()).unwrap();

    // Two clients, each talking to its own instrument.
    let mut dmm = GpibSession::new("dmm");
    let mut psu = GpibSession::new("psu");
    dmm.process_message("set_addr 5", &mut bus);
    psu.process_message("set_addr 7", &mut bus);

    dmm.process_message("?$*IDN?", &mut bus);
    psu.process_message("?$*IDN?", &mut bus);

    let sessions = [&dmm, &psu];
    let live: Vec<u8> = sessions.iter().filter_map(|s| s.addr()).collect();

    // Tick until both instruments replied.
    let mut replies = 0;
    while replies < sessions.len() {
        bus.on_tick(Instant::now(), live.iter().copied()).unwrap();
        if !bus.is_busy() {
            continue;
        }
        let line = bus.link_mut().read_line().unwrap();
        if let Some(reply) = bus.on_message(&line, Instant::now()) {
            for s in sessions.iter().filter(|s| s.accepts(&reply)) {
                println!("{}: {}", s.name(), reply.text);
            }
            replies += 1;
        }
    }

    println!("{:?}", psu.process_message("get_status", &mut bus));
}
