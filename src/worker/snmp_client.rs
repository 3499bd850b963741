//! Production `SnmpWorker`: issues GET/WALK/BULK requests over SNMPv2c.
//!
//! `olt_endpoint` is `host:port`; the community string comes from the
//! environment rather than per-OLT config, matching the current single
//! tenant deployment. Var-binds are collapsed into a JSON object keyed by
//! OID string — shape beyond that is a worker/consumer contract this
//! scheduler doesn't need to understand.

use super::snmp::SnmpWorker;
use crate::common::errors::ExecutionErrorKind;
use crate::domains::jobs::models::job::OperationType;
use async_trait::async_trait;
use serde_json::{json, Value};
use snmp2::tokio::Session;
use snmp2::{Oid, Value as SnmpValue};
use std::time::Duration;

pub struct SnmpClientWorker {
    community: Vec<u8>,
}

impl SnmpClientWorker {
    pub fn new() -> Self {
        let community = std::env::var("SNMP_COMMUNITY").unwrap_or_else(|_| "public".to_string());
        Self {
            community: community.into_bytes(),
        }
    }

    fn classify(err: snmp2::Error) -> ExecutionErrorKind {
        match err {
            snmp2::Error::AsnParseError(_)
            | snmp2::Error::AsnInvalidLen
            | snmp2::Error::AsnWrongType
            | snmp2::Error::AsnUnsupportedType
            | snmp2::Error::AsnEof => ExecutionErrorKind::Protocol,
            snmp2::Error::SendError | snmp2::Error::ReceiveError => ExecutionErrorKind::Transport,
            snmp2::Error::AuthFailure => ExecutionErrorKind::Auth,
            _ => ExecutionErrorKind::Internal,
        }
    }

    fn render(oid: &Oid, value: SnmpValue) -> (String, Value) {
        let rendered = match value {
            SnmpValue::Integer(i) => json!(i),
            SnmpValue::OctetString(bytes) => {
                json!(String::from_utf8_lossy(bytes).into_owned())
            }
            SnmpValue::Counter32(v) | SnmpValue::Unsigned32(v) | SnmpValue::Timeticks(v) => {
                json!(v)
            }
            SnmpValue::Counter64(v) => json!(v),
            SnmpValue::Boolean(b) => json!(b),
            SnmpValue::ObjectIdentifier(oid) => json!(oid.to_string()),
            SnmpValue::IpAddress(ip) => json!(format!("{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3])),
            SnmpValue::Null | SnmpValue::EndOfMibView | SnmpValue::NoSuchObject | SnmpValue::NoSuchInstance => {
                Value::Null
            }
            _ => Value::Null,
        };
        (oid.to_string(), rendered)
    }
}

impl Default for SnmpClientWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnmpWorker for SnmpClientWorker {
    async fn execute(
        &self,
        olt_endpoint: &str,
        operation_type: OperationType,
        oid: &str,
        timeout: Duration,
    ) -> Result<Value, ExecutionErrorKind> {
        let target = olt_endpoint
            .parse()
            .map_err(|_| ExecutionErrorKind::Config)?;
        let root: Oid = Oid::from_str(oid).map_err(|_| ExecutionErrorKind::Config)?;

        let mut session = Session::new(target, &self.community, Some(timeout), 0)
            .await
            .map_err(Self::classify)?;

        let mut object = serde_json::Map::new();

        match operation_type {
            OperationType::Discovery | OperationType::Get => {
                let response = session.get(&root).await.map_err(Self::classify)?;
                for (oid, value) in response.varbinds {
                    let (k, v) = Self::render(&oid, value);
                    object.insert(k, v);
                }
            }
            OperationType::Walk | OperationType::Table => {
                let mut current = root.clone();
                loop {
                    let response = session.getnext(&current).await.map_err(Self::classify)?;
                    let Some((next_oid, value)) = response.varbinds.into_iter().next() else {
                        break;
                    };
                    if !next_oid.as_slice().starts_with(root.as_slice()) {
                        break;
                    }
                    let (k, v) = Self::render(&next_oid, value);
                    object.insert(k, v);
                    current = next_oid;
                }
            }
            OperationType::Bulk => {
                let response = session
                    .getbulk(&[root.clone()], 0, 50)
                    .await
                    .map_err(Self::classify)?;
                for (oid, value) in response.varbinds {
                    if !oid.as_slice().starts_with(root.as_slice()) {
                        break;
                    }
                    let (k, v) = Self::render(&oid, value);
                    object.insert(k, v);
                }
            }
        }

        Ok(Value::Object(object))
    }
}
