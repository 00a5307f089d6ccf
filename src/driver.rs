//! The driver capability set (component A): the vendor-agnostic contract
//! consumed by the worker pool and the verification protocol. Concrete
//! drivers (V-SOL/Huawei/ZTE/FiberHome SNMP OID parsing, vendor CLI
//! dialects, NETCONF/gNMI/REST clients) are external collaborators; only
//! the contract lives in the core.
use bitflags::bitflags;
use thiserror::Error;

use crate::model::{OltConfig, OnuData, TelemetryData};

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("connect failed: `{0}`")]
    Connect(String),
    #[error("not found")]
    NotFound,
    #[error("driver does not support this capability")]
    Unsupported,
    #[error("transport error: `{0}`")]
    Transport(String),
}

bitflags! {
    /// Optional capabilities discovered by probing, per spec.md §9: modeled
    /// as an explicit capability set rather than runtime type assertions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DriverCapabilities: u8 {
        const EXTENDED          = 0b0000_0001;
        const ONU_DETAILS       = 0b0000_0010;
        const VLAN_VIA_SNMP     = 0b0000_0100;
        const RUNNING_CONFIG    = 0b0000_1000;
        const EXEC_COMMANDS     = 0b0001_0000;
    }
}

#[derive(Debug, Clone, Default)]
pub struct OnuFilter {
    pub pon_port: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubscriberSpec {
    pub pon_port: String,
    pub onu_id: u32,
    pub serial: String,
    pub vlan: Option<u16>,
    pub line_profile: Option<String>,
    pub tier: Option<String>,
}

impl SubscriberSpec {
    pub fn subscriber_id(&self) -> String {
        format!("ont-{}-{}", self.pon_port, self.onu_id)
    }
}

#[derive(Debug, Clone)]
pub struct OnuPower {
    pub rx_dbm: f64,
    pub tx_dbm: f64,
}

#[derive(Debug, Clone)]
pub struct PortInfo {
    pub port: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct VlanInfo {
    pub id: u16,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ServicePortSpec {
    pub id: String,
    pub pon_port: String,
    pub vlan: u16,
    pub gem_port: u32,
}

#[derive(Debug, Clone)]
pub struct OnuDetail {
    pub vlan: Option<u16>,
    pub raw: serde_json::Value,
}

/// Basic capability set every vendor-specific driver must implement.
pub trait OltDriver: Send {
    fn connect(&mut self, config: &OltConfig) -> Result<(), DriverError>;
    fn disconnect(&mut self);
    fn create_subscriber(&mut self, subscriber: &SubscriberSpec) -> Result<(), DriverError>;
    fn update_subscriber(&mut self, subscriber: &SubscriberSpec) -> Result<(), DriverError>;
    fn delete_subscriber(&mut self, id: &str) -> Result<(), DriverError>;
    fn suspend_subscriber(&mut self, id: &str) -> Result<(), DriverError>;
    fn resume_subscriber(&mut self, id: &str) -> Result<(), DriverError>;
    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities::empty()
    }
}

/// Richer capability set, probed for at runtime via `capabilities()` rather
/// than a downcast: the worker pool fails a job with `unsupported_driver`
/// before calling `get_onu_list` when the driver doesn't carry `EXTENDED`.
pub trait OltDriverExt: OltDriver {
    fn get_onu_list(&mut self, filter: Option<&OnuFilter>) -> Result<Vec<OnuData>, DriverError>;
    fn get_onu_by_serial(&mut self, serial: &str) -> Result<Option<OnuData>, DriverError>;
    fn get_onu_power(&mut self, id: &str) -> Result<OnuPower, DriverError>;
    fn get_olt_status(&mut self) -> Result<TelemetryData, DriverError>;
    fn list_ports(&mut self) -> Result<Vec<PortInfo>, DriverError>;
    fn set_port_state(&mut self, port: &str, enabled: bool) -> Result<(), DriverError>;
    fn get_pon_power(&mut self, port: &str) -> Result<OnuPower, DriverError>;
    fn list_vlans(&mut self) -> Result<Vec<VlanInfo>, DriverError>;
    fn get_vlan(&mut self, id: u16) -> Result<Option<VlanInfo>, DriverError>;
    fn create_vlan(&mut self, id: u16, name: &str) -> Result<(), DriverError>;
    fn delete_vlan(&mut self, id: u16, force: bool) -> Result<(), DriverError>;
    fn add_service_port(&mut self, spec: &ServicePortSpec) -> Result<(), DriverError>;
    fn delete_service_port(&mut self, id: &str) -> Result<(), DriverError>;
    fn list_service_ports(&mut self) -> Result<Vec<ServicePortSpec>, DriverError>;
    fn discover_onus(&mut self) -> Result<Vec<OnuData>, DriverError>;
    fn run_diagnostics(&mut self, id: &str) -> Result<String, DriverError>;
    fn get_alarms(&mut self) -> Result<Vec<String>, DriverError>;
    fn restart_onu(&mut self, id: &str) -> Result<(), DriverError>;
    fn bulk_provision(&mut self, subscribers: &[SubscriberSpec]) -> Result<(), DriverError>;

    /// Present only when `capabilities()` carries `ONU_DETAILS`.
    fn get_onu_details(&mut self, _id: &str) -> Result<Option<OnuDetail>, DriverError> {
        Err(DriverError::Unsupported)
    }
    /// Present only when `capabilities()` carries `VLAN_VIA_SNMP`.
    fn get_onu_vlan_via_snmp(&mut self, _id: &str) -> Result<u16, DriverError> {
        Err(DriverError::Unsupported)
    }
    /// Present only when `capabilities()` carries `RUNNING_CONFIG`.
    fn get_onu_running_config(&mut self, _id: &str) -> Result<String, DriverError> {
        Err(DriverError::Unsupported)
    }
    /// Present only when `capabilities()` carries `EXEC_COMMANDS`.
    fn exec_commands(&mut self, _commands: &[String]) -> Result<String, DriverError> {
        Err(DriverError::Unsupported)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::collections::VecDeque;

    /// A hand-rolled stand-in for the out-of-scope vendor drivers, used by
    /// the worker pool, result processor and verification protocol tests.
    /// Scripted with queues of canned responses rather than a generated mock
    /// expectation set, since `OltDriverExt` is large and most tests only
    /// exercise a couple of its methods.
    #[derive(Default)]
    pub struct StubDriver {
        pub connected: bool,
        pub caps: DriverCapabilities,
        pub onus: Vec<OnuData>,
        pub status: Option<TelemetryData>,
        pub connect_result: Option<Result<(), DriverError>>,
        pub connect_delay: Option<std::time::Duration>,
        pub onu_list_result: Option<Result<Vec<OnuData>, DriverError>>,
        pub lookup_queue: VecDeque<Option<OnuData>>,
        pub vlan_queue: VecDeque<Result<u16, DriverError>>,
        pub running_config_queue: VecDeque<Result<String, DriverError>>,
    }

    impl OltDriver for StubDriver {
        fn connect(&mut self, _config: &OltConfig) -> Result<(), DriverError> {
            if let Some(delay) = self.connect_delay.take() {
                std::thread::sleep(delay);
            }
            let result = self.connect_result.take().unwrap_or(Ok(()));
            if result.is_ok() {
                self.connected = true;
            }
            result
        }
        fn disconnect(&mut self) {
            self.connected = false;
        }
        fn create_subscriber(&mut self, _subscriber: &SubscriberSpec) -> Result<(), DriverError> {
            Ok(())
        }
        fn update_subscriber(&mut self, _subscriber: &SubscriberSpec) -> Result<(), DriverError> {
            Ok(())
        }
        fn delete_subscriber(&mut self, id: &str) -> Result<(), DriverError> {
            self.onus.retain(|o| o.subscriber_id() != id);
            Ok(())
        }
        fn suspend_subscriber(&mut self, _id: &str) -> Result<(), DriverError> {
            Ok(())
        }
        fn resume_subscriber(&mut self, _id: &str) -> Result<(), DriverError> {
            Ok(())
        }
        fn capabilities(&self) -> DriverCapabilities {
            self.caps
        }
    }

    impl OltDriverExt for StubDriver {
        fn get_onu_list(&mut self, _filter: Option<&OnuFilter>) -> Result<Vec<OnuData>, DriverError> {
            self.onu_list_result
                .take()
                .unwrap_or_else(|| Ok(self.onus.clone()))
        }
        fn get_onu_by_serial(&mut self, serial: &str) -> Result<Option<OnuData>, DriverError> {
            if let Some(next) = self.lookup_queue.pop_front() {
                return Ok(next);
            }
            Ok(self.onus.iter().find(|o| o.serial == serial).cloned())
        }
        fn get_onu_power(&mut self, _id: &str) -> Result<OnuPower, DriverError> {
            Ok(OnuPower {
                rx_dbm: -20.0,
                tx_dbm: 2.0,
            })
        }
        fn get_olt_status(&mut self) -> Result<TelemetryData, DriverError> {
            self.status.clone().ok_or(DriverError::Unsupported)
        }
        fn list_ports(&mut self) -> Result<Vec<PortInfo>, DriverError> {
            Ok(vec![])
        }
        fn set_port_state(&mut self, _port: &str, _enabled: bool) -> Result<(), DriverError> {
            Ok(())
        }
        fn get_pon_power(&mut self, _port: &str) -> Result<OnuPower, DriverError> {
            Ok(OnuPower {
                rx_dbm: -20.0,
                tx_dbm: 2.0,
            })
        }
        fn list_vlans(&mut self) -> Result<Vec<VlanInfo>, DriverError> {
            Ok(vec![])
        }
        fn get_vlan(&mut self, _id: u16) -> Result<Option<VlanInfo>, DriverError> {
            Ok(None)
        }
        fn create_vlan(&mut self, _id: u16, _name: &str) -> Result<(), DriverError> {
            Ok(())
        }
        fn delete_vlan(&mut self, _id: u16, _force: bool) -> Result<(), DriverError> {
            Ok(())
        }
        fn add_service_port(&mut self, _spec: &ServicePortSpec) -> Result<(), DriverError> {
            Ok(())
        }
        fn delete_service_port(&mut self, _id: &str) -> Result<(), DriverError> {
            Ok(())
        }
        fn list_service_ports(&mut self) -> Result<Vec<ServicePortSpec>, DriverError> {
            Ok(vec![])
        }
        fn discover_onus(&mut self) -> Result<Vec<OnuData>, DriverError> {
            Ok(self.onus.clone())
        }
        fn run_diagnostics(&mut self, _id: &str) -> Result<String, DriverError> {
            Ok(String::new())
        }
        fn get_alarms(&mut self) -> Result<Vec<String>, DriverError> {
            Ok(vec![])
        }
        fn restart_onu(&mut self, _id: &str) -> Result<(), DriverError> {
            Ok(())
        }
        fn bulk_provision(&mut self, _subscribers: &[SubscriberSpec]) -> Result<(), DriverError> {
            Ok(())
        }
        fn get_onu_vlan_via_snmp(&mut self, _id: &str) -> Result<u16, DriverError> {
            self.vlan_queue
                .pop_front()
                .unwrap_or(Err(DriverError::Unsupported))
        }
        fn get_onu_running_config(&mut self, _id: &str) -> Result<String, DriverError> {
            self.running_config_queue
                .pop_front()
                .unwrap_or(Err(DriverError::Unsupported))
        }
    }
}
