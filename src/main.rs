use clap::Parser;
use log::{debug, error, info, warn};
use std::error::Error;
use std::thread;
use std::time::Duration;
use wakebot::iface;
use wakebot::scan::{self, Nmap, Scanner, StateFilter};
use wakebot::telegram::{Bot, Message};
use wakebot::wol::{self, Broadcast, MacAddress};

const USAGE: &str = "Commands:\n\
    /wake [mac] - send a Wake-on-LAN packet (configured machine by default)\n\
    /list - scan the local network for hosts";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// MAC address of the machine to wake, in xx:xx:xx:xx:xx:xx form.
    #[arg(long, env = "WAKE_MAC_ADDR")]
    mac: String,

    /// Network interface to broadcast from and to derive the scan subnet.
    #[arg(long)]
    iface: Option<String>,

    /// Broadcast address for the magic packet.
    #[arg(long, default_value = "255.255.255.255")]
    bcast: String,

    /// UDP port the magic packet is sent to.
    #[arg(long, default_value_t = 9)]
    port: u16,

    /// Telegram bot token.
    #[arg(long, env = "BOT_TOKEN")]
    token: String,

    /// Only react to commands from this chat.
    #[arg(long, env = "WAKE_CHAT_ID")]
    chat_id: Option<i64>,

    /// Path to the nmap binary used for host discovery.
    #[arg(long, default_value = "nmap")]
    nmap_path: String,

    /// List every host in the scan report, not only those reported up.
    #[arg(long)]
    all_hosts: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("INFO"))
        .format_timestamp(Some(env_logger::fmt::TimestampPrecision::Millis))
        .init();

    // Reject an unparseable MAC at startup instead of on the first /wake.
    args.mac.parse::<MacAddress>()?;

    let bot = Bot::new(&args.token);
    let scanner = Nmap::with_program(&args.nmap_path);
    info!("bot ready");

    let mut offset = 0i64;
    loop {
        let updates = match bot.get_updates(offset) {
            Ok(updates) => updates,
            Err(err) => {
                warn!("getUpdates failed: {}", err);
                thread::sleep(Duration::from_secs(5));
                continue;
            }
        };
        for update in updates {
            offset = offset.max(update.update_id + 1);
            if let Some(message) = update.message {
                if let Some(allowed) = args.chat_id {
                    if message.chat.id != allowed {
                        warn!("ignoring message from chat {}", message.chat.id);
                        continue;
                    }
                }
                handle_message(&bot, &scanner, &args, &message);
            }
        }
    }
}

fn handle_message(bot: &Bot, scanner: &dyn Scanner, args: &Args, message: &Message) {
    let text = match &message.text {
        Some(text) => text.trim(),
        None => return,
    };
    let mut words = text.split_whitespace();
    let command = match words.next() {
        Some(command) => command,
        None => return,
    };

    let reply = match command {
        "/wake" | "/on" => {
            let mac = words.next().unwrap_or(&args.mac);
            info!("wake requested for {}", mac);
            match wake_host(args, mac) {
                Ok(()) => format!("Magic packet sent to {}", mac),
                Err(err) => {
                    error!("wake failed: {}", err);
                    format!("Could not wake {}: {}", mac, err)
                }
            }
        }
        "/list" => {
            // Scans take a few seconds; acknowledge before starting.
            if let Err(err) = bot.send_message(message.chat.id, "Scanning the local network...") {
                error!("sendMessage failed: {}", err);
            }
            match list_hosts(args, scanner) {
                Ok(addresses) if addresses.is_empty() => {
                    "No hosts found on the local network".to_string()
                }
                Ok(addresses) => format!(
                    "Hosts found on the local network:\n{}",
                    addresses.join("\n")
                ),
                Err(err) => {
                    error!("scan failed: {}", err);
                    format!("Scan failed: {}", err)
                }
            }
        }
        "/start" | "/help" => USAGE.to_string(),
        other => {
            debug!("ignoring {:?} from chat {}", other, message.chat.id);
            return;
        }
    };

    if let Err(err) = bot.send_message(message.chat.id, &reply) {
        error!("sendMessage failed: {}", err);
    }
}

fn wake_host(args: &Args, mac: &str) -> Result<(), Box<dyn Error>> {
    let local_addr = match &args.iface {
        Some(name) => Some(iface::resolve_local_addr(name)?),
        None => None,
    };
    let bcast = Broadcast {
        addr: args.bcast.clone(),
        port: args.port,
        local_addr,
    };
    wol::wake(mac, &bcast)?;
    Ok(())
}

fn list_hosts(args: &Args, scanner: &dyn Scanner) -> Result<Vec<String>, Box<dyn Error>> {
    let name = args
        .iface
        .as_deref()
        .ok_or("set --iface to scan the local network")?;
    let local = iface::resolve_local_addr(name)?;
    let report = scanner.discover(scan::subnet_base(local))?;
    if let Some(counts) = report.runstats.as_ref().and_then(|stats| stats.hosts.as_ref()) {
        info!(
            "scan finished: {} up, {} down, {} total",
            counts.up, counts.down, counts.total
        );
    }
    let filter = if args.all_hosts {
        StateFilter::Any
    } else {
        StateFilter::Up
    };
    Ok(report.addresses(filter))
}
