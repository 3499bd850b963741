pub mod snmp;
pub mod snmp_client;

pub use snmp::{ScriptedSnmpWorker, SnmpWorker};
pub use snmp_client::SnmpClientWorker;
