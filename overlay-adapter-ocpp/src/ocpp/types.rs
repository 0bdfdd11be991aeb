//! OCPP 2.0.1 message types
//!
//! Payload schemas for the actions the overlay sends and answers:
//! - BootNotification / Heartbeat
//! - StatusNotification / MeterValues
//! - Authorize
//! - DataTransfer / BinaryDataTransfer
//! - Reset / SetVariables

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use overlay_core::{OverlayError, Payload};
use serde::{Deserialize, Serialize};

// ============================================================================
// Enumerations
// ============================================================================

/// Connector status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorStatus {
    Available,
    Occupied,
    Reserved,
    Unavailable,
    Faulted,
}

/// Generic OCPP status for responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum GenericStatus {
    Accepted,
    Rejected,
}

/// Registration status for BootNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

/// Authorization status for Authorize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AuthorizationStatus {
    Accepted,
    Blocked,
    Expired,
    Invalid,
    NoCredit,
    NotAllowedTypeEVSE,
    NotAtThisLocation,
    NotAtThisTime,
    Unknown,
}

/// Outcome of a DataTransfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataTransferStatus {
    Accepted,
    Rejected,
    UnknownMessageId,
    UnknownVendorId,
}

/// Reset type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetType {
    Immediate,
    OnIdle,
}

/// Reset outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetStatus {
    Accepted,
    Rejected,
    Scheduled,
}

/// Outcome of one SetVariables entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetVariableStatus {
    Accepted,
    Rejected,
    UnknownComponent,
    UnknownVariable,
    NotSupportedAttributeType,
    RebootRequired,
}

/// Variable attribute addressed by SetVariables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttributeType {
    #[default]
    Actual,
    Target,
    MinSet,
    MaxSet,
}

/// Boot reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootReason {
    ApplicationReset,
    FirmwareUpdate,
    LocalReset,
    PowerUp,
    RemoteReset,
    ScheduledReset,
    Triggered,
    Unknown,
    Watchdog,
}

/// Measurand types for meter values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Measurand {
    #[serde(rename = "Current.Import")]
    CurrentImport,
    #[serde(rename = "Current.Export")]
    CurrentExport,
    #[serde(rename = "Energy.Active.Import.Register")]
    EnergyActiveImportRegister,
    #[serde(rename = "Energy.Active.Export.Register")]
    EnergyActiveExportRegister,
    #[serde(rename = "Power.Active.Import")]
    PowerActiveImport,
    #[serde(rename = "Power.Active.Export")]
    PowerActiveExport,
    #[serde(rename = "Voltage")]
    Voltage,
    #[serde(rename = "SoC")]
    SoC,
}

/// Reading context for meter values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadingContext {
    #[serde(rename = "Sample.Clock")]
    SampleClock,
    #[serde(rename = "Sample.Periodic")]
    SamplePeriodic,
    #[serde(rename = "Transaction.Begin")]
    TransactionBegin,
    #[serde(rename = "Transaction.End")]
    TransactionEnd,
    Trigger,
}

/// Unit of a sampled value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitOfMeasure {
    Wh,
    #[serde(rename = "kWh")]
    KWh,
    W,
    #[serde(rename = "kW")]
    KW,
    A,
    V,
    Celsius,
    Percent,
}

// ============================================================================
// Complex Types
// ============================================================================

/// Token for identification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdToken {
    pub id_token: String,
    #[serde(rename = "type")]
    pub token_type: String,
}

impl IdToken {
    pub fn new(id_token: impl Into<String>, token_type: impl Into<String>) -> Self {
        Self {
            id_token: id_token.into(),
            token_type: token_type.into(),
        }
    }
}

/// Authorization verdict for a token
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTokenInfo {
    pub status: AuthorizationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_expiry_date_time: Option<DateTime<Utc>>,
}

/// Sampled value for meter readings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledValue {
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ReadingContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurand: Option<Measurand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measure: Option<UnitOfMeasure>,
}

/// Meter value with timestamp and samples
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValue {
    pub timestamp: DateTime<Utc>,
    pub sampled_value: Vec<SampledValue>,
}

/// Status info for responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    pub reason_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<String>,
}

/// Charging station information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingStationInfo {
    pub model: String,
    pub vendor_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

/// Device model component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Device model variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// One variable assignment in a SetVariables request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetVariableData {
    #[serde(default)]
    pub attribute_type: AttributeType,
    pub attribute_value: String,
    pub component: Component,
    pub variable: Variable,
}

impl SetVariableData {
    pub fn new(component: &str, variable: &str, value: impl Into<String>) -> Self {
        Self {
            attribute_type: AttributeType::Actual,
            attribute_value: value.into(),
            component: Component {
                name: component.to_string(),
                instance: None,
            },
            variable: Variable {
                name: variable.to_string(),
                instance: None,
            },
        }
    }
}

/// Outcome of one variable assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetVariableResult {
    #[serde(default)]
    pub attribute_type: AttributeType,
    pub attribute_status: SetVariableStatus,
    pub component: Component,
    pub variable: Variable,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_status_info: Option<StatusInfo>,
}

// ============================================================================
// Request Messages
// ============================================================================

/// BootNotification request (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
    pub charging_station: ChargingStationInfo,
    pub reason: BootReason,
}

/// Heartbeat request (CP -> CSMS)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

/// StatusNotification request (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotificationRequest {
    pub timestamp: DateTime<Utc>,
    pub connector_status: ConnectorStatus,
    pub evse_id: i32,
    pub connector_id: i32,
}

/// MeterValues request (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValuesRequest {
    pub evse_id: i32,
    pub meter_value: Vec<MeterValue>,
}

/// Authorize request (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub id_token: IdToken,
}

/// DataTransfer request (either direction)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTransferRequest {
    pub vendor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Reset request (CSMS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    #[serde(rename = "type")]
    pub reset_type: ResetType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evse_id: Option<i32>,
}

/// SetVariables request (CSMS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetVariablesRequest {
    pub set_variable_data: Vec<SetVariableData>,
}

// ============================================================================
// Response Messages
// ============================================================================

/// BootNotification response (CSMS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationResponse {
    pub current_time: DateTime<Utc>,
    pub interval: i32,
    pub status: RegistrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_info: Option<StatusInfo>,
}

/// Heartbeat response (CSMS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub current_time: DateTime<Utc>,
}

/// StatusNotification response (CSMS -> CP)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusNotificationResponse {}

/// MeterValues response (CSMS -> CP)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeterValuesResponse {}

/// Authorize response (CSMS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    pub id_token_info: IdTokenInfo,
}

/// DataTransfer response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTransferResponse {
    pub status: DataTransferStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_info: Option<StatusInfo>,
}

/// Reset response (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResponse {
    pub status: ResetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_info: Option<StatusInfo>,
}

/// SetVariables response (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetVariablesResponse {
    pub set_variable_result: Vec<SetVariableResult>,
}

// ============================================================================
// Binary Data Transfer
// ============================================================================

/// BinaryDataTransfer request, carried as a raw binary payload
///
/// Layout: `u16 vendor_len | vendor | u16 message_len | message | data`.
/// An empty message id means none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryDataTransferRequest {
    pub vendor_id: String,
    pub message_id: Option<String>,
    pub data: Bytes,
}

impl BinaryDataTransferRequest {
    pub fn new(vendor_id: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            vendor_id: vendor_id.into(),
            message_id: None,
            data: data.into(),
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn to_payload(&self) -> Result<Payload, OverlayError> {
        let message_id = self.message_id.as_deref().unwrap_or("");
        let mut buf =
            BytesMut::with_capacity(4 + self.vendor_id.len() + message_id.len() + self.data.len());
        put_str(&mut buf, &self.vendor_id)?;
        put_str(&mut buf, message_id)?;
        buf.put_slice(&self.data);
        Ok(Payload::binary(buf.freeze()))
    }

    pub fn from_payload(payload: &Payload) -> Result<Self, OverlayError> {
        let mut buf = binary_body(payload)?;
        let vendor_id = take_str(&mut buf)?;
        let message_id = take_str(&mut buf)?;
        Ok(Self {
            vendor_id,
            message_id: (!message_id.is_empty()).then_some(message_id),
            data: buf,
        })
    }
}

/// BinaryDataTransfer response: one status byte followed by the data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryDataTransferResponse {
    pub status: DataTransferStatus,
    pub data: Bytes,
}

impl BinaryDataTransferResponse {
    pub fn new(status: DataTransferStatus, data: impl Into<Bytes>) -> Self {
        Self {
            status,
            data: data.into(),
        }
    }

    pub fn to_payload(&self) -> Payload {
        let mut buf = BytesMut::with_capacity(1 + self.data.len());
        buf.put_u8(status_byte(self.status));
        buf.put_slice(&self.data);
        Payload::binary(buf.freeze())
    }

    pub fn from_payload(payload: &Payload) -> Result<Self, OverlayError> {
        let mut buf = binary_body(payload)?;
        if !buf.has_remaining() {
            return Err(OverlayError::Payload("empty BinaryDataTransfer response".into()));
        }
        let status = match buf.get_u8() {
            0 => DataTransferStatus::Accepted,
            1 => DataTransferStatus::Rejected,
            2 => DataTransferStatus::UnknownMessageId,
            3 => DataTransferStatus::UnknownVendorId,
            other => {
                return Err(OverlayError::Payload(format!("unknown transfer status {}", other)))
            }
        };
        Ok(Self { status, data: buf })
    }
}

fn status_byte(status: DataTransferStatus) -> u8 {
    match status {
        DataTransferStatus::Accepted => 0,
        DataTransferStatus::Rejected => 1,
        DataTransferStatus::UnknownMessageId => 2,
        DataTransferStatus::UnknownVendorId => 3,
    }
}

fn binary_body(payload: &Payload) -> Result<Bytes, OverlayError> {
    payload
        .as_bytes()
        .cloned()
        .ok_or_else(|| OverlayError::Payload("expected a binary payload".into()))
}

fn put_str(buf: &mut BytesMut, s: &str) -> Result<(), OverlayError> {
    let len = u16::try_from(s.len())
        .map_err(|_| OverlayError::Payload(format!("field too long ({} bytes)", s.len())))?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn take_str(buf: &mut Bytes) -> Result<String, OverlayError> {
    if buf.remaining() < 2 {
        return Err(OverlayError::Payload("truncated length prefix".into()));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(OverlayError::Payload("truncated string field".into()));
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|e| OverlayError::Payload(e.to_string()))
}
