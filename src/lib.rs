pub mod iface;
pub mod scan;
pub mod telegram;
pub mod wol;
