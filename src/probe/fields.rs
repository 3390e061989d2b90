//! The static table of every reported field.
//!
//! Output, filtering, metrics exposition and `--metrics` all work from this
//! one table, so a field's name, help text and exportability are defined
//! exactly once.

use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};

use super::result::ProbeResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Int(i64),
    Text(String),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Int(v) => serializer.serialize_i64(*v),
            FieldValue::Text(s) => serializer.serialize_str(s),
        }
    }
}

pub struct FieldDesc {
    pub name: &'static str,
    pub help: &'static str,
    /// Whether the field is exposed to Prometheus.
    pub exportable: bool,
    pub get: fn(&ProbeResult) -> FieldValue,
}

impl FieldDesc {
    /// `SndCwnd` -> `snd_cwnd`, `HTTPStatusCode` -> `http_status_code`.
    pub fn snake_name(&self) -> String {
        let chars: Vec<char> = self.name.chars().collect();
        let mut out = String::with_capacity(chars.len() + 4);
        for (i, c) in chars.iter().enumerate() {
            if c.is_ascii_uppercase() && i > 0 {
                let prev = chars[i - 1];
                let next_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
                if prev.is_ascii_lowercase() || prev.is_ascii_digit() || (prev.is_ascii_uppercase() && next_lower) {
                    out.push('_');
                }
            }
            out.push(c.to_ascii_lowercase());
        }
        out
    }
}

fn micros(d: Duration) -> FieldValue {
    FieldValue::Int(i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
}

fn count(v: u64) -> FieldValue {
    FieldValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
}

macro_rules! tcp {
    ($name:literal, $field:ident, $help:literal) => {
        FieldDesc {
            name: $name,
            help: $help,
            exportable: true,
            get: |r| FieldValue::Int(r.snapshot.$field),
        }
    };
}

pub static FIELDS: &[FieldDesc] = &[
    tcp!("State", state, "TCP state"),
    tcp!("CaState", ca_state, "state of congestion avoidance"),
    tcp!("Retransmits", retransmits, "number of retransmissions on timeout invoked"),
    tcp!("Probes", probes, "consecutive zero window probes that have gone unanswered"),
    tcp!("Backoff", backoff, "used for exponential backoff re-transmission"),
    tcp!("Options", options, "number of requesting options"),
    tcp!("SndWscale", snd_wscale, "window scale advertised by the peer"),
    tcp!("RcvWscale", rcv_wscale, "window scale sent to the peer"),
    tcp!("Rto", rto, "tcp re-transmission timeout value, the unit is microsecond"),
    tcp!("Ato", ato, "ack timeout, unit is microsecond"),
    tcp!("SndMss", snd_mss, "current maximum segment size"),
    tcp!("RcvMss", rcv_mss, "maximum observed segment size from the remote host"),
    tcp!("Unacked", unacked, "number of unack'd segments"),
    tcp!("Sacked", sacked, "scoreboard segment marked SACKED by sack blocks accounting for the pipe algorithm"),
    tcp!("Lost", lost, "scoreboard segments marked lost by loss detection heuristics accounting for the pipe algorithm"),
    tcp!("Retrans", retrans, "how many times the retransmission occurs"),
    tcp!("Fackets", fackets, "forward acknowledged segments"),
    tcp!("LastDataSent", last_data_sent, "time since last data segment was sent, the unit is millisecond"),
    tcp!("LastAckSent", last_ack_sent, "time since the last ack was sent, the unit is millisecond"),
    tcp!("LastDataRecv", last_data_recv, "time since last data segment was received, the unit is millisecond"),
    tcp!("LastAckRecv", last_ack_recv, "time since the last ack was received, the unit is millisecond"),
    tcp!("Pmtu", pmtu, "path MTU"),
    tcp!("RcvSsthresh", rcv_ssthresh, "tcp congestion window slow start threshold"),
    tcp!("Rtt", rtt, "smoothed round trip time, the unit is microsecond"),
    tcp!("Rttvar", rttvar, "round trip time variance, the unit is microsecond"),
    tcp!("SndSsthresh", snd_ssthresh, "slow start threshold"),
    tcp!("SndCwnd", snd_cwnd, "congestion window size"),
    tcp!("Advmss", advmss, "advertised maximum segment size"),
    tcp!("Reordering", reordering, "number of reordered segments allowed"),
    tcp!("RcvRtt", rcv_rtt, "receiver side round trip time estimate, the unit is microsecond"),
    tcp!("RcvSpace", rcv_space, "space reserved for the receive queue"),
    tcp!("TotalRetrans", total_retrans, "total number of segments containing retransmitted data"),
    tcp!("PacingRate", pacing_rate, "the pacing rate, bytes per second"),
    tcp!("MaxPacingRate", max_pacing_rate, "max pacing rate, bytes per second"),
    tcp!("BytesAcked", bytes_acked, "RFC4898 tcpEStatsAppHCThruOctetsAcked"),
    tcp!("BytesReceived", bytes_received, "RFC4898 tcpEStatsAppHCThruOctetsReceived"),
    tcp!("SegsOut", segs_out, "RFC4898 tcpEStatsPerfSegsOut"),
    tcp!("SegsIn", segs_in, "RFC4898 tcpEStatsPerfSegsIn"),
    tcp!("NotsentBytes", notsent_bytes, "bytes queued but not yet sent"),
    tcp!("MinRtt", min_rtt, "minimum round trip time seen, the unit is microsecond"),
    tcp!("DataSegsIn", data_segs_in, "RFC4898 tcpEStatsDataSegsIn"),
    tcp!("DataSegsOut", data_segs_out, "RFC4898 tcpEStatsDataSegsOut"),
    tcp!("DeliveryRate", delivery_rate, "most recent delivery rate, bytes per second"),
    tcp!("BusyTime", busy_time, "time busy sending data, the unit is microsecond"),
    tcp!("RwndLimited", rwnd_limited, "time limited by receive window, the unit is microsecond"),
    tcp!("SndbufLimited", sndbuf_limited, "time limited by send buffer, the unit is microsecond"),
    tcp!("Delivered", delivered, "data segments delivered, including retransmits"),
    tcp!("DeliveredCe", delivered_ce, "delivered segments marked with ECN CE"),
    tcp!("BytesSent", bytes_sent, "RFC4898 tcpEStatsPerfHCDataOctetsOut"),
    tcp!("BytesRetrans", bytes_retrans, "RFC4898 tcpEStatsPerfOctetsRetrans"),
    tcp!("DsackDups", dsack_dups, "RFC4898 tcpEStatsStackDSACKDups"),
    tcp!("ReordSeen", reord_seen, "reordering events seen"),
    tcp!("RcvOoopack", rcv_ooopack, "out-of-order packets received"),
    tcp!("SndWnd", snd_wnd, "peer's advertised receive window after scaling, bytes"),
    FieldDesc {
        name: "TCPCongesAlg",
        help: "TCP congestion avoidance algorithm",
        exportable: false,
        get: |r| FieldValue::Text(r.snapshot.congestion_alg.clone()),
    },
    FieldDesc {
        name: "HTTPStatusCode",
        help: "HTTP 1xx-5xx status code, 0 without a response",
        exportable: true,
        get: |r| FieldValue::Int(r.http_status.into()),
    },
    FieldDesc {
        name: "HTTPRcvdBytes",
        help: "HTTP bytes received",
        exportable: true,
        get: |r| count(r.http_rcvd_bytes),
    },
    FieldDesc {
        name: "HTTPRequest",
        help: "HTTP request, the unit is microsecond",
        exportable: true,
        get: |r| micros(r.timings.request),
    },
    FieldDesc {
        name: "HTTPFirstByte",
        help: "HTTP time to first response byte, the unit is microsecond",
        exportable: true,
        get: |r| micros(r.timings.first_byte),
    },
    FieldDesc {
        name: "HTTPResponse",
        help: "HTTP response, the unit is microsecond",
        exportable: true,
        get: |r| micros(r.timings.response),
    },
    FieldDesc {
        name: "DNSResolve",
        help: "domain lookup, the unit is microsecond",
        exportable: true,
        get: |r| micros(r.timings.dns),
    },
    FieldDesc {
        name: "TCPConnect",
        help: "TCP connect, the unit is microsecond",
        exportable: true,
        get: |r| micros(r.timings.connect),
    },
    FieldDesc {
        name: "TLSHandshake",
        help: "TLS handshake, the unit is microsecond",
        exportable: true,
        get: |r| micros(r.timings.tls),
    },
    FieldDesc {
        name: "TCPConnectError",
        help: "total TCP connect errors",
        exportable: true,
        get: |r| count(r.connect_errors),
    },
    FieldDesc {
        name: "DNSResolveError",
        help: "total DNS resolve errors",
        exportable: true,
        get: |r| count(r.dns_errors),
    },
    FieldDesc {
        name: "TLSHandshakeError",
        help: "total TLS handshake errors",
        exportable: true,
        get: |r| count(r.tls_errors),
    },
];

pub fn find(name: &str) -> Option<&'static FieldDesc> {
    FIELDS.iter().find(|f| f.name == name)
}

pub fn exportable() -> impl Iterator<Item = &'static FieldDesc> {
    FIELDS.iter().filter(|f| f.exportable)
}
