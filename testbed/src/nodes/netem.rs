//! Link shaping for container nodes via `tc qdisc ... netem`
//!
//! Settings accumulate: setting latency and later loss keeps both. The
//! combined state is persisted beside the node so each invocation can rebuild
//! the full qdisc.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;

use shared::SharedError;

use crate::core::duration::parse_duration;
use crate::error::{TestbedError, TestbedResult};

pub const STATE_FILE: &str = "netem.json";

pub const ATTR_LATENCY: &str = "latency";
pub const ATTR_JITTER: &str = "jitter";
pub const ATTR_BANDWIDTH: &str = "bandwidth";
pub const ATTR_LOSS: &str = "loss";

pub fn shaping_attrs() -> Vec<String> {
    [ATTR_LATENCY, ATTR_JITTER, ATTR_BANDWIDTH, ATTR_LOSS]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn shaping_desc(name: &str) -> Option<&'static str> {
    match name {
        ATTR_LATENCY => Some("link latency, e.g. 50ms (settable)"),
        ATTR_JITTER => Some("latency jitter, e.g. 10ms (settable)"),
        ATTR_BANDWIDTH => Some("bandwidth limit in Mbps (settable)"),
        ATTR_LOSS => Some("packet loss percentage 0-100 (settable)"),
        _ => None,
    }
}

/// Accumulated shaping for one interface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkShaping {
    pub delay_ms: Option<u64>,
    pub jitter_ms: Option<u64>,
    pub loss_percent: Option<u8>,
    pub rate_kbit: Option<u64>,
}

impl LinkShaping {
    /// Apply one `name=value` attribute assignment
    pub fn set(&mut self, name: &str, value: &str) -> TestbedResult<()> {
        match name {
            ATTR_LATENCY => self.delay_ms = Some(whole_millis(name, value)?),
            ATTR_JITTER => self.jitter_ms = Some(whole_millis(name, value)?),
            ATTR_BANDWIDTH => {
                let mbps: f64 = value
                    .parse()
                    .ok()
                    .filter(|v: &f64| v.is_finite() && *v > 0.0)
                    .ok_or_else(|| SharedError::invalid_attribute(name, value, "expected a positive Mbps value"))?;
                self.rate_kbit = Some((mbps * 1000.0).round() as u64);
            }
            ATTR_LOSS => {
                let percent: u8 = value
                    .parse()
                    .ok()
                    .filter(|v| *v <= 100)
                    .ok_or_else(|| SharedError::invalid_attribute(name, value, "expected a percentage 0-100"))?;
                self.loss_percent = Some(percent);
            }
            other => return Err(TestbedError::not_found("attribute", other)),
        }
        Ok(())
    }

    /// Current value of a shaping attribute, as it would be set
    pub fn get(&self, name: &str) -> Option<String> {
        match name {
            ATTR_LATENCY => self.delay_ms.map(|ms| format!("{ms}ms")),
            ATTR_JITTER => self.jitter_ms.map(|ms| format!("{ms}ms")),
            ATTR_BANDWIDTH => self.rate_kbit.map(|kbit| format!("{}", kbit as f64 / 1000.0)),
            ATTR_LOSS => self.loss_percent.map(|p| p.to_string()),
            _ => None,
        }
    }

    /// Args for `tc qdisc replace dev <iface> root netem ...`
    pub fn to_tc_args(&self, interface: &str) -> Vec<String> {
        let mut args: Vec<String> = ["qdisc", "replace", "dev", interface, "root", "netem"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        // tc only accepts jitter as the second operand of delay.
        if self.delay_ms.is_some() || self.jitter_ms.is_some() {
            args.push("delay".into());
            args.push(format!("{}ms", self.delay_ms.unwrap_or(0)));
            if let Some(jitter) = self.jitter_ms {
                args.push(format!("{jitter}ms"));
            }
        }

        if let Some(loss) = self.loss_percent {
            args.push("loss".into());
            args.push(format!("{loss}%"));
        }

        if let Some(rate) = self.rate_kbit {
            args.push("rate".into());
            args.push(format!("{rate}kbit"));
        }

        args
    }

    pub async fn load(dir: &Path) -> TestbedResult<Self> {
        match tokio::fs::read(dir.join(STATE_FILE)).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, dir: &Path) -> TestbedResult<()> {
        tokio::fs::write(dir.join(STATE_FILE), serde_json::to_vec_pretty(self)?).await?;
        Ok(())
    }
}

/// Delays are applied in milliseconds; anything finer is rejected, not rounded
fn whole_millis(name: &str, value: &str) -> TestbedResult<u64> {
    let delay = parse_duration(value)?;
    if delay.subsec_nanos() % 1_000_000 != 0 {
        return Err(SharedError::invalid_attribute(name, value, "expected whole milliseconds").into());
    }
    u64::try_from(delay.as_millis())
        .map_err(|_| SharedError::invalid_attribute(name, value, "delay too long").into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_builds_tc_args() {
        let mut shaping = LinkShaping::default();
        shaping.set(ATTR_LATENCY, "200ms").unwrap();

        assert_eq!(
            shaping.to_tc_args("veth0"),
            vec!["qdisc", "replace", "dev", "veth0", "root", "netem", "delay", "200ms"]
        );
    }

    #[test]
    fn test_jitter_without_latency_uses_zero_delay() {
        let mut shaping = LinkShaping::default();
        shaping.set(ATTR_JITTER, "15ms").unwrap();

        assert_eq!(
            shaping.to_tc_args("veth0"),
            vec!["qdisc", "replace", "dev", "veth0", "root", "netem", "delay", "0ms", "15ms"]
        );
    }

    #[test]
    fn test_settings_accumulate() {
        let mut shaping = LinkShaping::default();
        shaping.set(ATTR_LATENCY, "100ms").unwrap();
        shaping.set(ATTR_JITTER, "20ms").unwrap();
        shaping.set(ATTR_LOSS, "5").unwrap();
        shaping.set(ATTR_BANDWIDTH, "1.5").unwrap();

        assert_eq!(
            shaping.to_tc_args("vethab12"),
            vec![
                "qdisc", "replace", "dev", "vethab12", "root", "netem", "delay", "100ms", "20ms",
                "loss", "5%", "rate", "1500kbit"
            ]
        );
        assert_eq!(shaping.get(ATTR_BANDWIDTH).as_deref(), Some("1.5"));
        assert_eq!(shaping.get(ATTR_LATENCY).as_deref(), Some("100ms"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut shaping = LinkShaping::default();
        assert!(shaping.set(ATTR_LOSS, "101").is_err());
        assert!(shaping.set(ATTR_LOSS, "-1").is_err());
        assert!(shaping.set(ATTR_BANDWIDTH, "0").is_err());
        assert!(shaping.set(ATTR_LATENCY, "fast").is_err());
        assert!(shaping.set("mtu", "1500").is_err());
        assert_eq!(shaping, LinkShaping::default());
    }

    #[test]
    fn test_sub_millisecond_delays_rejected() {
        let mut shaping = LinkShaping::default();
        for fine in ["500us", "999us", "1ms 500us"] {
            assert!(shaping.set(ATTR_LATENCY, fine).is_err(), "{fine} should be rejected");
            assert!(shaping.set(ATTR_JITTER, fine).is_err(), "{fine} should be rejected");
        }
        assert_eq!(shaping, LinkShaping::default());

        shaping.set(ATTR_LATENCY, "2000us").unwrap();
        shaping.set(ATTR_JITTER, "0").unwrap();
        assert_eq!(shaping.get(ATTR_LATENCY).as_deref(), Some("2ms"));
        assert_eq!(shaping.get(ATTR_JITTER).as_deref(), Some("0ms"));
    }

    #[tokio::test]
    async fn test_state_persists() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(LinkShaping::load(dir.path()).await.unwrap(), LinkShaping::default());

        let mut shaping = LinkShaping::default();
        shaping.set(ATTR_LOSS, "10").unwrap();
        shaping.save(dir.path()).await.unwrap();

        let loaded = LinkShaping::load(dir.path()).await.unwrap();
        assert_eq!(loaded.loss_percent, Some(10));
    }
}
