use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum OnuStatus {
    Online,
    Offline,
    Los,
    Discovered,
}

/// Raw signal reported by a driver before normalization into `OnuStatus`.
/// Drivers speak this vendor-agnostic shape; the core never inspects the
/// vendor payload itself.
#[derive(Debug, Clone, Default)]
pub struct RawOnuSignal {
    pub is_online: bool,
    pub oper_state: Option<String>,
}

impl RawOnuSignal {
    /// §4.5 step 5: `online` if `IsOnline`, else `los`/`discovered` if
    /// `OperState` matches, else `offline`.
    pub fn derive_status(&self) -> OnuStatus {
        if self.is_online {
            return OnuStatus::Online;
        }
        match self.oper_state.as_deref() {
            Some(s) if s.eq_ignore_ascii_case("los") => OnuStatus::Los,
            Some(s) if s.eq_ignore_ascii_case("discovered") => OnuStatus::Discovered,
            _ => OnuStatus::Offline,
        }
    }
}

/// Normalized ONU record. Produced by drivers; the core never parses
/// vendor-specific payloads directly.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct OnuData {
    pub serial: String,
    pub pon_port: String,
    pub onu_id: u32,
    pub status: OnuStatus,
    #[serde(default)]
    pub distance_m: Option<f64>,
    #[serde(default)]
    pub rx_power_dbm: Option<f64>,
    #[serde(default)]
    pub tx_power_dbm: Option<f64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub software_version: Option<String>,
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl OnuData {
    /// Subscriber identity convention used by delete/suspend/resume/update.
    pub fn subscriber_id(&self) -> String {
        format!("ont-{}-{}", self.pon_port, self.onu_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_wins_regardless_of_oper_state() {
        let s = RawOnuSignal {
            is_online: true,
            oper_state: Some("los".into()),
        };
        assert_eq!(s.derive_status(), OnuStatus::Online);
    }

    #[test]
    fn los_oper_state_when_offline() {
        let s = RawOnuSignal {
            is_online: false,
            oper_state: Some("LOS".into()),
        };
        assert_eq!(s.derive_status(), OnuStatus::Los);
    }

    #[test]
    fn discovered_oper_state_when_offline() {
        let s = RawOnuSignal {
            is_online: false,
            oper_state: Some("discovered".into()),
        };
        assert_eq!(s.derive_status(), OnuStatus::Discovered);
    }

    #[test]
    fn defaults_to_offline() {
        let s = RawOnuSignal {
            is_online: false,
            oper_state: None,
        };
        assert_eq!(s.derive_status(), OnuStatus::Offline);
    }

    #[test]
    fn subscriber_id_matches_convention() {
        let onu = OnuData {
            serial: "X".into(),
            pon_port: "0/1/2".into(),
            onu_id: 7,
            status: OnuStatus::Online,
            distance_m: None,
            rx_power_dbm: None,
            tx_power_dbm: None,
            model: None,
            software_version: None,
            detail: None,
        };
        assert_eq!(onu.subscriber_id(), "ont-0/1/2-7");
    }
}
