//! The verification protocol (component H): a bounded retry-with-poll
//! primitive used by provision/delete/update/reboot/VLAN/profile writes.
//! Certain OLTs reflect writes asynchronously; a one-shot check yields
//! false failures, so every write is followed by a bounded read-back loop.
use std::thread::sleep;
use std::time::Duration;

use regex::Regex;

use crate::driver::{DriverError, OltDriverExt, OnuFilter};
use crate::error::{ValidationError, VerifyError};

/// Runs `predicate` up to `max_attempts` times, sleeping `delay` before each
/// attempt. Succeeds on the first `(true, Ok(()))`; a predicate error is
/// fatal immediately (it does not consume a retry). Returns a timeout error
/// if every attempt returns `(false, Ok(()))`.
pub fn verify<P>(mut predicate: P, max_attempts: u32, delay: Duration) -> Result<(), VerifyError>
where
    P: FnMut() -> Result<bool, VerifyError>,
{
    for attempt in 1..=max_attempts {
        sleep(delay);
        match predicate() {
            Ok(true) => return Ok(()),
            Ok(false) => {
                tracing::debug!(attempt, max_attempts, "verification not yet reflected");
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    Err(VerifyError::Timeout {
        attempts: max_attempts,
    })
}

pub const PROVISION_ATTEMPTS: u32 = 6;
pub const PROVISION_DELAY: Duration = Duration::from_secs(2);
pub const DELETION_ATTEMPTS: u32 = 3;
pub const DELETION_DELAY: Duration = Duration::from_secs(1);
pub const VLAN_ATTEMPTS: u32 = 3;
pub const VLAN_DELAY: Duration = Duration::from_secs(2);
pub const LINE_PROFILE_ATTEMPTS: u32 = 3;
pub const LINE_PROFILE_DELAY: Duration = Duration::from_secs(2);

/// Lookup ONU by (pon_port, onu_id); pass if present AND online.
pub fn provision_predicate<D: OltDriverExt>(
    driver: &mut D,
    pon_port: &str,
    onu_id: u32,
) -> Result<bool, VerifyError> {
    let filter = OnuFilter {
        pon_port: Some(pon_port.to_string()),
    };
    match driver.get_onu_list(Some(&filter)) {
        Ok(onus) => Ok(onus
            .iter()
            .any(|o| o.onu_id == onu_id && o.status == crate::model::OnuStatus::Online)),
        Err(e) => Err(VerifyError::Predicate(e.to_string())),
    }
}

/// Lookup returns "not found" (the driver error string contains that
/// phrase, matching the string-sniffing contract of spec.md §4.7).
pub fn deletion_predicate<D: OltDriverExt>(driver: &mut D, serial: &str) -> Result<bool, VerifyError> {
    match driver.get_onu_by_serial(serial) {
        Ok(None) => Ok(true),
        Ok(Some(_)) => Ok(false),
        Err(DriverError::NotFound) => Ok(true),
        Err(e) if e.to_string().contains("not found") => Ok(true),
        Err(e) => Err(VerifyError::Predicate(e.to_string())),
    }
}

/// Prefer an SNMP VLAN read if supported; else fall back to `GetONUDetails`.
pub fn vlan_predicate<D: OltDriverExt>(
    driver: &mut D,
    onu_id: &str,
    expected: u16,
    supports_snmp_vlan: bool,
) -> Result<bool, VerifyError> {
    if supports_snmp_vlan {
        return match driver.get_onu_vlan_via_snmp(onu_id) {
            Ok(vlan) => Ok(vlan == expected),
            Err(e) => Err(VerifyError::Predicate(e.to_string())),
        };
    }
    match driver.get_onu_details(onu_id) {
        Ok(Some(detail)) => Ok(detail.vlan == Some(expected)),
        Ok(None) => Ok(false),
        Err(e) => Err(VerifyError::Predicate(e.to_string())),
    }
}

fn line_profile_patterns(onu_id: &str, name: &str) -> Vec<Regex> {
    vec![
        Regex::new(&format!(r"onu {} profile line name {}", regex::escape(onu_id), regex::escape(name))).unwrap(),
        Regex::new(&format!(r"profile line name {}", regex::escape(name))).unwrap(),
        Regex::new(&format!(r"profile line id \d+ name {}", regex::escape(name))).unwrap(),
    ]
}

/// Read running-config; pass if any of the three documented patterns match.
/// If the driver lacks the capability, verification is skipped, not failed
/// (the caller should check `supports_running_config` before invoking
/// `verify` at all — this function only implements the match logic).
pub fn line_profile_predicate<D: OltDriverExt>(
    driver: &mut D,
    onu_id: &str,
    profile_name: &str,
) -> Result<bool, VerifyError> {
    match driver.get_onu_running_config(onu_id) {
        Ok(config) => {
            let patterns = line_profile_patterns(onu_id, profile_name);
            Ok(patterns.iter().any(|re| re.is_match(&config)))
        }
        Err(e) => Err(VerifyError::Predicate(e.to_string())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileVlanDecision {
    Profile,
    DirectVlan,
}

/// Write-time policy (not verification): resolves a potential mismatch
/// between a requested VLAN and the VLAN implied by a profile name.
pub fn resolve_profile_vlan(
    line_profile: Option<&str>,
    vlan: Option<u16>,
    force: bool,
) -> Result<ProfileVlanDecision, ValidationError> {
    let (Some(profile), Some(requested)) = (line_profile, vlan) else {
        return Ok(ProfileVlanDecision::Profile);
    };

    let Some(parsed) = extract_profile_vlan(profile) else {
        // Profile name doesn't follow the vlan_<n> convention: trust the user.
        return Ok(ProfileVlanDecision::Profile);
    };

    if parsed == requested {
        return Ok(ProfileVlanDecision::Profile);
    }
    if force {
        return Ok(ProfileVlanDecision::DirectVlan);
    }
    Err(ValidationError::ProfileVlanMismatch {
        profile: profile.to_string(),
        parsed,
        requested,
    })
}

/// Parses `(?:line[_-])?vlan[_-](\d+)` from a profile name.
pub fn extract_profile_vlan(name: &str) -> Option<u16> {
    let re = Regex::new(r"^(?:line[_-])?vlan[_-](\d+)$").unwrap();
    re.captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::test_support::StubDriver;
    use crate::model::{OnuData, OnuStatus};
    use std::cell::RefCell;
    use std::time::Duration;

    fn onu(serial: &str, status: OnuStatus) -> OnuData {
        OnuData {
            serial: serial.into(),
            pon_port: "0/1/1".into(),
            onu_id: 1,
            status,
            distance_m: None,
            rx_power_dbm: None,
            tx_power_dbm: None,
            model: None,
            software_version: None,
            detail: None,
        }
    }

    #[test]
    fn verify_retry_succeeds_on_third_attempt() {
        let calls = RefCell::new(0);
        let result = verify(
            || {
                *calls.borrow_mut() += 1;
                Ok(*calls.borrow() >= 3)
            },
            6,
            Duration::from_millis(1),
        );
        assert!(result.is_ok());
        assert_eq!(*calls.borrow(), 3);
    }

    #[test]
    fn verify_exhausts_attempts_and_times_out() {
        let result = verify(|| Ok(false), 3, Duration::from_millis(1));
        assert!(matches!(result, Err(VerifyError::Timeout { attempts: 3 })));
    }

    #[test]
    fn verify_propagates_predicate_errors_immediately() {
        let calls = RefCell::new(0);
        let result = verify(
            || {
                *calls.borrow_mut() += 1;
                Err(VerifyError::Predicate("boom".into()))
            },
            6,
            Duration::from_millis(1),
        );
        assert!(result.is_err());
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn provision_predicate_passes_when_present_and_online() {
        let mut driver = StubDriver::default();
        driver.onus.push(onu("SN1", OnuStatus::Online));
        assert!(provision_predicate(&mut driver, "0/1/1", 1).unwrap());
    }

    #[test]
    fn provision_predicate_fails_when_present_but_offline() {
        let mut driver = StubDriver::default();
        driver.onus.push(onu("SN1", OnuStatus::Offline));
        assert!(!provision_predicate(&mut driver, "0/1/1", 1).unwrap());
    }

    #[test]
    fn provision_predicate_fails_when_onu_id_does_not_match() {
        let mut driver = StubDriver::default();
        driver.onus.push(onu("SN1", OnuStatus::Online));
        assert!(!provision_predicate(&mut driver, "0/1/1", 2).unwrap());
    }

    #[test]
    fn deletion_predicate_passes_when_absent() {
        let mut driver = StubDriver::default();
        assert!(deletion_predicate(&mut driver, "SN-gone").unwrap());
    }

    #[test]
    fn profile_vlan_mismatch_without_force_fails_with_both_numbers_mentioned() {
        let err = resolve_profile_vlan(Some("line_vlan_100"), Some(200), false).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("200"));
    }

    #[test]
    fn profile_vlan_mismatch_with_force_applies_direct_vlan() {
        let decision = resolve_profile_vlan(Some("line_vlan_100"), Some(200), true).unwrap();
        assert_eq!(decision, ProfileVlanDecision::DirectVlan);
    }

    #[test]
    fn profile_vlan_match_applies_profile() {
        let decision = resolve_profile_vlan(Some("vlan_100"), Some(100), false).unwrap();
        assert_eq!(decision, ProfileVlanDecision::Profile);
    }

    #[test]
    fn profile_not_matching_convention_trusts_user() {
        let decision = resolve_profile_vlan(Some("gold-tier"), Some(100), false).unwrap();
        assert_eq!(decision, ProfileVlanDecision::Profile);
    }

    #[test]
    fn extract_profile_vlan_parses_both_separators() {
        assert_eq!(extract_profile_vlan("vlan_100"), Some(100));
        assert_eq!(extract_profile_vlan("line-vlan-200"), Some(200));
        assert_eq!(extract_profile_vlan("gold-tier"), None);
    }

    #[test]
    fn line_profile_predicate_matches_any_of_the_three_patterns() {
        let mut driver = StubDriver::default();
        driver
            .running_config_queue
            .push_back(Ok("interface pon 0/1/1\n profile line name gold\n".into()));
        assert!(line_profile_predicate(&mut driver, "1", "gold").unwrap());
    }
}
