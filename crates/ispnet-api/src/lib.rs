// ispnet-api: Async transport clients for ISP network devices (RouterOS + SNMP)

pub mod error;
pub mod routeros;
pub mod snmp;
pub mod transport;

pub use error::Error;
pub use routeros::{ApiClient, RestClient, RouterSession, Row};
pub use snmp::{Oid, SnmpClient, SnmpVersion, UsmUser, Value};
pub use transport::{TlsMode, TransportConfig};
