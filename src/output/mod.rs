pub mod mpegts;
pub mod soundcard;
pub mod udp;
