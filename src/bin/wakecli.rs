use std::env;
use std::process;
use wakebot::wol::{self, Broadcast};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: wakecli <mac> [broadcast-ip]");
        process::exit(2);
    }

    let mut bcast = Broadcast::default();
    if let Some(addr) = args.get(2) {
        bcast.addr = addr.clone();
    }
    wol::wake(&args[1], &bcast)?;
    println!("magic packet sent to {}", args[1]);
    Ok(())
}
