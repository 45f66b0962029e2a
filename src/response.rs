use std::fmt;
use std::net::Ipv4Addr;

/// A decoded ICMP echo reply together with the surrounding IPv4 header
/// fields and both endpoint timestamps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub total_length: u16,
    pub ttl: u8,
    pub icmp_type: u8,
    pub icmp_code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
    pub source_ip: Ipv4Addr,
    pub destination_ip: Ipv4Addr,
    pub send_time_us: u64,
    pub reply_time_us: u64,
}

impl Response {
    /// Round-trip time in microseconds. Negative values are possible when
    /// the wall clock moves between send and receive.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn rtt_us(&self) -> i64 {
        self.reply_time_us.wrapping_sub(self.send_time_us) as i64
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[allow(clippy::cast_precision_loss)]
        let rtt_ms = self.rtt_us() as f64 / 1000.0;
        write!(
            f,
            "total_length={}|ttl={}|icmp_type={}|icmp_code={}|ident={}|sequence={}|source_ip={}|destination_ip={}|rtt={}ms",
            self.total_length,
            self.ttl,
            self.icmp_type,
            self.icmp_code,
            self.identifier,
            self.sequence,
            self.source_ip,
            self.destination_ip,
            rtt_ms
        )
    }
}
