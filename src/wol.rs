use log::info;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::str::FromStr;

const SYNCHRONIZATION_SCHEME: [u8; 6] = [0xff; 6];
const MAGIC_PACKET_LEN: usize = 102;

#[derive(thiserror::Error, Debug)]
pub enum WolError {
    #[error("invalid hardware address {0:?}")]
    InvalidHardwareAddress(String),
    #[error("cannot resolve broadcast address {addr}: {source}")]
    AddressResolution { addr: String, source: io::Error },
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),
    #[error("magic packet sent was {0} bytes (expected {MAGIC_PACKET_LEN})")]
    ShortWrite(usize),
}

/// A 6-byte hardware address. Parses from colon-separated, dash-separated
/// or bare 12-digit hex strings; all three forms yield the same bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl FromStr for MacAddress {
    type Err = WolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WolError::InvalidHardwareAddress(s.to_string());
        let digits: String = s.chars().filter(|c| !matches!(c, ':' | '-')).collect();
        if digits.len() != 12 {
            return Err(invalid());
        }
        let mut bytes = [0u8; 6];
        for (i, chunk) in digits.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| invalid())?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
        }
        Ok(MacAddress(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// The fixed Wake-on-LAN payload: six 0xff bytes followed by the target
/// hardware address repeated 16 times.
pub struct MagicPacket([u8; MAGIC_PACKET_LEN]);

impl MagicPacket {
    pub fn new(mac: &MacAddress) -> MagicPacket {
        let mut data = [0u8; MAGIC_PACKET_LEN];
        data[..6].copy_from_slice(&SYNCHRONIZATION_SCHEME);
        for i in 0..16 {
            let offset = 6 + i * 6;
            data[offset..offset + 6].copy_from_slice(mac.as_bytes());
        }
        MagicPacket(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Where a wake packet goes and which local endpoint it leaves from.
/// Built per invocation; `local_addr` pins the sending interface on
/// multi-homed hosts.
#[derive(Clone, Debug)]
pub struct Broadcast {
    pub addr: String,
    pub port: u16,
    pub local_addr: Option<Ipv4Addr>,
}

impl Default for Broadcast {
    fn default() -> Self {
        Broadcast {
            addr: "255.255.255.255".to_string(),
            port: 9,
            local_addr: None,
        }
    }
}

/// Send a magic packet for `mac_addr` to `bcast`.
///
/// One datagram, one attempt. A write of anything other than the full
/// 102 bytes is an error even when the send call itself succeeded.
pub fn wake(mac_addr: &str, bcast: &Broadcast) -> Result<(), WolError> {
    let mac: MacAddress = mac_addr.parse()?;
    let packet = MagicPacket::new(&mac);

    let dest = format!("{}:{}", bcast.addr, bcast.port);
    let target: SocketAddr = dest
        .to_socket_addrs()
        .map_err(|source| WolError::AddressResolution {
            addr: dest.clone(),
            source,
        })?
        .next()
        .ok_or_else(|| WolError::AddressResolution {
            addr: dest.clone(),
            source: io::Error::new(io::ErrorKind::AddrNotAvailable, "resolved to no addresses"),
        })?;

    let local = SocketAddr::from((bcast.local_addr.unwrap_or(Ipv4Addr::UNSPECIFIED), 0));
    let socket = UdpSocket::bind(local)?;
    socket.set_broadcast(true)?;

    info!("sending magic packet for {} to {}", mac, target);
    let sent = socket.send_to(packet.as_bytes(), target)?;
    if sent != MAGIC_PACKET_LEN {
        return Err(WolError::ShortWrite(sent));
    }
    info!("magic packet sent to {}", mac);
    Ok(())
}
