//! Protocol-specific heuristics: SYN floods and DNS amplification.

use crate::core::detectors::{DetectionContext, DetectionDetails, DetectionResult, DetectorError, SignalDetector, ThreatType};
use crate::core::event::{Event, Protocol};

const DNS_PORT: u16 = 53;
const DNS_AMPLIFICATION_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Default, Clone, Copy)]
pub struct ProtocolDetector;

impl SignalDetector for ProtocolDetector {
    fn name(&self) -> &str {
        "protocol"
    }

    fn evaluate(&self, event: &Event, ctx: &DetectionContext<'_>) -> Result<DetectionResult, DetectorError> {
        match event.protocol {
            Protocol::Tcp if event.flags.is_syn_without_ack() => {
                let syn_count = ctx.window.half_open_syn_count();
                let threshold = ctx.config.syn_flood_threshold;
                if syn_count > threshold {
                    return Ok(DetectionResult::detected(
                        ThreatType::SynFlood,
                        (syn_count as f64 / (threshold as f64 * 2.0)).min(1.0),
                        DetectionDetails {
                            syn_count: Some(syn_count),
                            ..DetectionDetails::default()
                        },
                    ));
                }
            }
            Protocol::Udp if event.destination_port == Some(DNS_PORT) => {
                if event.size < ctx.config.dns_small_query_bytes {
                    return Ok(DetectionResult::detected(
                        ThreatType::DnsAmplification,
                        DNS_AMPLIFICATION_CONFIDENCE,
                        DetectionDetails {
                            port: Some(DNS_PORT),
                            packet_size: Some(event.size),
                            ..DetectionDetails::default()
                        },
                    ));
                }
            }
            _ => {}
        }

        Ok(DetectionResult::clear())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::detectors::test_support::{at, Harness};
    use crate::core::event::TcpFlags;
    use crate::core::DetectionConfig;
    use chrono::Utc;
    use std::net::{IpAddr, Ipv4Addr};

    fn syn_from(i: u32, base: chrono::DateTime<Utc>) -> Event {
        let source = IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + i));
        Event::new(source, Protocol::Tcp, 64, at(base, i as i64 * 10))
            .with_port(80)
            .with_flags(TcpFlags::syn())
    }

    #[test]
    fn test_syn_flood_over_threshold() {
        let base = Utc::now();
        let mut harness = Harness::new(DetectionConfig::default());
        for i in 0..100 {
            assert!(!harness.run(&ProtocolDetector, &syn_from(i, base)).detected);
        }
        let result = harness.run(&ProtocolDetector, &syn_from(100, base));
        assert!(result.detected);
        assert_eq!(result.threat_type, Some(ThreatType::SynFlood));
        assert_eq!(result.details.syn_count, Some(101));
        assert!((result.confidence - 101.0 / 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_syn_ack_not_counted() {
        let base = Utc::now();
        let mut harness = Harness::new(DetectionConfig::default());
        for i in 0..150 {
            let event = syn_from(i, base).with_flags(TcpFlags::parse("SYN,ACK"));
            assert!(!harness.run(&ProtocolDetector, &event).detected);
        }
        assert_eq!(harness.window.half_open_syn_count(), 0);
    }

    #[test]
    fn test_small_dns_query_flagged() {
        let mut harness = Harness::new(DetectionConfig::default());
        let query = Event::new("10.0.0.1".parse().unwrap(), Protocol::Udp, 60, Utc::now()).with_port(53);
        let result = harness.run(&ProtocolDetector, &query);
        assert!(result.detected);
        assert_eq!(result.threat_type, Some(ThreatType::DnsAmplification));
        assert_eq!(result.confidence, 0.7);

        let large = Event::new("10.0.0.1".parse().unwrap(), Protocol::Udp, 512, Utc::now()).with_port(53);
        assert!(!harness.run(&ProtocolDetector, &large).detected);

        let other_port = Event::new("10.0.0.1".parse().unwrap(), Protocol::Udp, 60, Utc::now()).with_port(123);
        assert!(!harness.run(&ProtocolDetector, &other_port).detected);
    }
}
