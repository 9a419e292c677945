use labdaemon::ChannelConfig;

use standa_smsc5::{Smsc5Device, Smsc5SerialLink, Smsc5Session};

fn main() {
    let port = "/dev/ttyACM0";

    // Open the serial link with the settings of the 8SMC5 controller.
    let link = Smsc5SerialLink::simple(port).expect("Failed to open serial port");

    // No status polls in between, we only want the replies to our own commands.
    let config = ChannelConfig {
        status_polling: false,
        debug: false,
    };
    let mut ch = Smsc5Device::channel(link, config);
    ch.on_connect();

    let session = Smsc5Session::new("example");
    for line in ["get_device_info", "get_position", "move 1000 0", "get_status"] {
        for reply in session.process_message(line, &mut ch) {
            println!("{line}: {reply}");
        }

        // Transmit the queued command and wait for its reply.
        while !ch.queue().is_empty() {
            ch.on_tick().unwrap();
            let data = ch.link_mut().read_reply().unwrap();
            let event = ch.on_binary(&data);
            if let Some(reply) = event.reply {
                println!("{line}: {}", reply.body);
            }
        }
    }
}
