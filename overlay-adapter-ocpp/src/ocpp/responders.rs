//! Default domain handlers
//!
//! `CsmsResponder` answers the station-originated actions at a CSMS node and
//! `StationResponder` answers the CSMS-originated ones at a station. Both
//! are plain `ActionHandler`s and can be replaced per action.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use overlay_core::{
    Action, ActionHandler, ErrorCode, HandlerError, NodeId, OverlayNode, Payload, Request,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::types::*;

/// Actions a CSMS answers
pub const CSMS_ACTIONS: [Action; 7] = [
    Action::BootNotification,
    Action::Heartbeat,
    Action::StatusNotification,
    Action::MeterValues,
    Action::Authorize,
    Action::DataTransfer,
    Action::BinaryDataTransfer,
];

/// Actions a charging station answers
pub const STATION_ACTIONS: [Action; 4] = [
    Action::Reset,
    Action::SetVariables,
    Action::DataTransfer,
    Action::BinaryDataTransfer,
];

fn parse<T: DeserializeOwned>(request: &Request) -> Result<T, HandlerError> {
    request.payload.parse().map_err(|e| {
        HandlerError::new(ErrorCode::FormatViolation, format!("{} payload: {}", request.action, e))
    })
}

fn json(value: impl serde::Serialize) -> Result<Payload, HandlerError> {
    Payload::json(value).map_err(HandlerError::from)
}

fn not_implemented(action: &Action) -> HandlerError {
    HandlerError::new(ErrorCode::NotImplemented, format!("no handler for {}", action))
}

// ============================================================================
// CSMS
// ============================================================================

/// What the CSMS knows about one station
#[derive(Debug, Clone)]
pub struct StationRecord {
    pub info: ChargingStationInfo,
    pub connectors: HashMap<(i32, i32), ConnectorStatus>,
    pub last_meter_value: Option<MeterValue>,
}

#[derive(Debug, Default)]
struct CsmsState {
    stations: HashMap<NodeId, StationRecord>,
    heartbeats: HashMap<NodeId, u64>,
}

/// Default CSMS behaviour: accept boots, record status and meter values,
/// authorize known tokens
#[derive(Clone)]
pub struct CsmsResponder {
    heartbeat_interval: i32,
    vendor_id: String,
    accepted_tokens: Option<Arc<HashSet<String>>>,
    state: Arc<RwLock<CsmsState>>,
}

impl Default for CsmsResponder {
    fn default() -> Self {
        Self {
            heartbeat_interval: 300,
            vendor_id: "Elektrokombinacija".to_string(),
            accepted_tokens: None,
            state: Arc::new(RwLock::new(CsmsState::default())),
        }
    }
}

impl CsmsResponder {
    pub fn new(heartbeat_interval: i32) -> Self {
        Self {
            heartbeat_interval,
            ..Default::default()
        }
    }

    /// Only authorize these tokens; every token is accepted otherwise
    pub fn with_accepted_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accepted_tokens = Some(Arc::new(tokens.into_iter().map(Into::into).collect()));
        self
    }

    /// Vendor whose DataTransfer messages are accepted
    pub fn with_vendor_id(mut self, vendor_id: impl Into<String>) -> Self {
        self.vendor_id = vendor_id.into();
        self
    }

    /// Register for every CSMS action on `node`
    pub fn install(&self, node: &OverlayNode) {
        for action in CSMS_ACTIONS {
            node.handle(action, self.clone());
        }
    }

    pub fn station(&self, id: &NodeId) -> Option<StationRecord> {
        self.state.read().stations.get(id).cloned()
    }

    pub fn registered_stations(&self) -> Vec<NodeId> {
        self.state.read().stations.keys().cloned().collect()
    }

    pub fn heartbeats(&self, id: &NodeId) -> u64 {
        self.state.read().heartbeats.get(id).copied().unwrap_or(0)
    }

    fn originator(request: &Request) -> Result<NodeId, HandlerError> {
        request
            .source()
            .cloned()
            .ok_or_else(|| HandlerError::new(ErrorCode::ProtocolError, "request without origin"))
    }

    fn boot(&self, request: &Request) -> Result<Payload, HandlerError> {
        let boot: BootNotificationRequest = parse(request)?;
        let station = Self::originator(request)?;
        info!(
            "Station {} booted ({:?}): {} {}",
            station, boot.reason, boot.charging_station.vendor_name, boot.charging_station.model
        );

        self.state.write().stations.insert(
            station,
            StationRecord {
                info: boot.charging_station,
                connectors: HashMap::new(),
                last_meter_value: None,
            },
        );

        json(BootNotificationResponse {
            current_time: Utc::now(),
            interval: self.heartbeat_interval,
            status: RegistrationStatus::Accepted,
            status_info: None,
        })
    }

    fn heartbeat(&self, request: &Request) -> Result<Payload, HandlerError> {
        let station = Self::originator(request)?;
        *self.state.write().heartbeats.entry(station).or_default() += 1;
        json(HeartbeatResponse {
            current_time: Utc::now(),
        })
    }

    fn status_notification(&self, request: &Request) -> Result<Payload, HandlerError> {
        let status: StatusNotificationRequest = parse(request)?;
        let station = Self::originator(request)?;
        debug!(
            "Station {} EVSE {}/{} is {:?}",
            station, status.evse_id, status.connector_id, status.connector_status
        );

        if let Some(record) = self.state.write().stations.get_mut(&station) {
            record
                .connectors
                .insert((status.evse_id, status.connector_id), status.connector_status);
        }
        json(StatusNotificationResponse {})
    }

    fn meter_values(&self, request: &Request) -> Result<Payload, HandlerError> {
        let values: MeterValuesRequest = parse(request)?;
        let station = Self::originator(request)?;

        if let Some(record) = self.state.write().stations.get_mut(&station) {
            record.last_meter_value = values.meter_value.last().cloned();
        }
        json(MeterValuesResponse {})
    }

    fn authorize(&self, request: &Request) -> Result<Payload, HandlerError> {
        let authorize: AuthorizeRequest = parse(request)?;
        let status = match &self.accepted_tokens {
            Some(tokens) if !tokens.contains(&authorize.id_token.id_token) => {
                AuthorizationStatus::Invalid
            }
            _ => AuthorizationStatus::Accepted,
        };
        debug!("Authorize {}: {:?}", authorize.id_token.id_token, status);

        json(AuthorizeResponse {
            id_token_info: IdTokenInfo {
                status,
                cache_expiry_date_time: None,
            },
        })
    }

    fn data_transfer(&self, request: &Request) -> Result<Payload, HandlerError> {
        let transfer: DataTransferRequest = parse(request)?;
        json(answer_transfer(&self.vendor_id, transfer))
    }

    fn binary_data_transfer(&self, request: &Request) -> Result<Payload, HandlerError> {
        let transfer = BinaryDataTransferRequest::from_payload(&request.payload)?;
        Ok(answer_binary_transfer(&self.vendor_id, transfer).to_payload())
    }
}

#[async_trait]
impl ActionHandler for CsmsResponder {
    async fn handle(&self, request: &Request) -> Result<Payload, HandlerError> {
        match request.action {
            Action::BootNotification => self.boot(request),
            Action::Heartbeat => self.heartbeat(request),
            Action::StatusNotification => self.status_notification(request),
            Action::MeterValues => self.meter_values(request),
            Action::Authorize => self.authorize(request),
            Action::DataTransfer => self.data_transfer(request),
            Action::BinaryDataTransfer => self.binary_data_transfer(request),
            ref other => Err(not_implemented(other)),
        }
    }
}

/// Echo data back for the configured vendor
fn answer_transfer(vendor_id: &str, transfer: DataTransferRequest) -> DataTransferResponse {
    if transfer.vendor_id != vendor_id {
        return DataTransferResponse {
            status: DataTransferStatus::UnknownVendorId,
            data: None,
            status_info: None,
        };
    }
    DataTransferResponse {
        status: DataTransferStatus::Accepted,
        data: transfer.data,
        status_info: None,
    }
}

fn answer_binary_transfer(
    vendor_id: &str,
    transfer: BinaryDataTransferRequest,
) -> BinaryDataTransferResponse {
    if transfer.vendor_id != vendor_id {
        return BinaryDataTransferResponse::new(DataTransferStatus::UnknownVendorId, Bytes::new());
    }
    BinaryDataTransferResponse::new(DataTransferStatus::Accepted, transfer.data)
}

// ============================================================================
// Charging station
// ============================================================================

#[derive(Debug, Default)]
struct StationState {
    variables: HashMap<(String, String), String>,
    pending_reset: Option<ResetType>,
}

/// Default station behaviour: accept resets, keep a writable set of
/// device-model variables, echo vendor data
#[derive(Clone)]
pub struct StationResponder {
    vendor_id: String,
    writable: Arc<HashSet<(String, String)>>,
    state: Arc<RwLock<StationState>>,
}

impl Default for StationResponder {
    fn default() -> Self {
        let writable = [
            ("OCPPCommCtrlr", "HeartbeatInterval"),
            ("OCPPCommCtrlr", "NetworkProfileConnectionAttempts"),
            ("SmartChargingCtrlr", "Enabled"),
            ("AuthCtrlr", "AuthorizeRemoteStart"),
        ];
        Self {
            vendor_id: "Elektrokombinacija".to_string(),
            writable: Arc::new(
                writable
                    .iter()
                    .map(|(c, v)| (c.to_string(), v.to_string()))
                    .collect(),
            ),
            state: Arc::new(RwLock::new(StationState::default())),
        }
    }
}

impl StationResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow SetVariables on `component.variable`
    pub fn with_variable(self, component: &str, variable: &str) -> Self {
        let mut writable = (*self.writable).clone();
        writable.insert((component.to_string(), variable.to_string()));
        Self {
            writable: Arc::new(writable),
            ..self
        }
    }

    pub fn with_vendor_id(mut self, vendor_id: impl Into<String>) -> Self {
        self.vendor_id = vendor_id.into();
        self
    }

    /// Register for every station action on `node`
    pub fn install(&self, node: &OverlayNode) {
        for action in STATION_ACTIONS {
            node.handle(action, self.clone());
        }
    }

    pub fn variable(&self, component: &str, variable: &str) -> Option<String> {
        self.state
            .read()
            .variables
            .get(&(component.to_string(), variable.to_string()))
            .cloned()
    }

    /// Reset accepted but not yet carried out
    pub fn pending_reset(&self) -> Option<ResetType> {
        self.state.read().pending_reset
    }

    fn reset(&self, request: &Request) -> Result<Payload, HandlerError> {
        let reset: ResetRequest = parse(request)?;
        let status = match reset.evse_id {
            // Per-EVSE reset is not supported by this station
            Some(_) => ResetStatus::Rejected,
            None => {
                self.state.write().pending_reset = Some(reset.reset_type);
                match reset.reset_type {
                    ResetType::Immediate => ResetStatus::Accepted,
                    ResetType::OnIdle => ResetStatus::Scheduled,
                }
            }
        };
        info!("Reset {:?} requested: {:?}", reset.reset_type, status);

        json(ResetResponse {
            status,
            status_info: None,
        })
    }

    fn set_variables(&self, request: &Request) -> Result<Payload, HandlerError> {
        let set: SetVariablesRequest = parse(request)?;
        let mut state = self.state.write();

        let results = set
            .set_variable_data
            .into_iter()
            .map(|data| {
                let key = (data.component.name.clone(), data.variable.name.clone());
                let attribute_status = if !self.writable.iter().any(|(c, _)| *c == key.0) {
                    SetVariableStatus::UnknownComponent
                } else if !self.writable.contains(&key) {
                    SetVariableStatus::UnknownVariable
                } else if data.attribute_type != AttributeType::Actual {
                    SetVariableStatus::NotSupportedAttributeType
                } else {
                    state.variables.insert(key, data.attribute_value);
                    SetVariableStatus::Accepted
                };
                SetVariableResult {
                    attribute_type: data.attribute_type,
                    attribute_status,
                    component: data.component,
                    variable: data.variable,
                    attribute_status_info: None,
                }
            })
            .collect();

        json(SetVariablesResponse {
            set_variable_result: results,
        })
    }
}

#[async_trait]
impl ActionHandler for StationResponder {
    async fn handle(&self, request: &Request) -> Result<Payload, HandlerError> {
        match request.action {
            Action::Reset => self.reset(request),
            Action::SetVariables => self.set_variables(request),
            Action::DataTransfer => json(answer_transfer(&self.vendor_id, parse(request)?)),
            Action::BinaryDataTransfer => {
                let transfer = BinaryDataTransferRequest::from_payload(&request.payload)?;
                Ok(answer_binary_transfer(&self.vendor_id, transfer).to_payload())
            }
            ref other => Err(not_implemented(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_core::{Destination, NetworkPath, NodeConfig, NodeRole};
    use serde_json::json;

    fn request_from(station: &str, action: Action, payload: Payload) -> Request {
        let mut request = Request::new(action, payload, Destination::Csms);
        request.network_path = NetworkPath::from([station, "lc"]);
        request
    }

    #[tokio::test]
    async fn test_boot_registers_station() {
        let csms = CsmsResponder::new(60);
        let payload = Payload::json(json!({
            "chargingStation": {"model": "EK3", "vendorName": "Elektrokombinacija"},
            "reason": "PowerUp"
        }))
        .unwrap();

        let answer = csms
            .handle(&request_from("cs1", Action::BootNotification, payload))
            .await
            .unwrap();
        let response: BootNotificationResponse = answer.parse().unwrap();

        assert_eq!(response.status, RegistrationStatus::Accepted);
        assert_eq!(response.interval, 60);
        assert_eq!(csms.station(&"cs1".into()).unwrap().info.model, "EK3");
    }

    #[tokio::test]
    async fn test_malformed_payload_is_format_violation() {
        let csms = CsmsResponder::default();
        let err = csms
            .handle(&request_from(
                "cs1",
                Action::Authorize,
                Payload::json(json!({"token": 1})).unwrap(),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::FormatViolation);
    }

    #[tokio::test]
    async fn test_unknown_token_is_invalid() {
        let csms = CsmsResponder::default().with_accepted_tokens(["04A2B3C4"]);
        let request = |token: &str| {
            request_from(
                "cs1",
                Action::Authorize,
                Payload::json(AuthorizeRequest {
                    id_token: IdToken::new(token, "ISO14443"),
                })
                .unwrap(),
            )
        };

        let known: AuthorizeResponse =
            csms.handle(&request("04A2B3C4")).await.unwrap().parse().unwrap();
        let unknown: AuthorizeResponse =
            csms.handle(&request("FFFF")).await.unwrap().parse().unwrap();
        assert_eq!(known.id_token_info.status, AuthorizationStatus::Accepted);
        assert_eq!(unknown.id_token_info.status, AuthorizationStatus::Invalid);
    }

    #[tokio::test]
    async fn test_set_variables_statuses() {
        let station = StationResponder::new();
        let payload = Payload::json(SetVariablesRequest {
            set_variable_data: vec![
                SetVariableData::new("OCPPCommCtrlr", "HeartbeatInterval", "120"),
                SetVariableData::new("OCPPCommCtrlr", "Nope", "1"),
                SetVariableData::new("Nowhere", "HeartbeatInterval", "1"),
            ],
        })
        .unwrap();

        let answer = station
            .handle(&request_from("csms", Action::SetVariables, payload))
            .await
            .unwrap();
        let response: SetVariablesResponse = answer.parse().unwrap();
        let statuses: Vec<_> = response
            .set_variable_result
            .iter()
            .map(|r| r.attribute_status)
            .collect();

        assert_eq!(
            statuses,
            vec![
                SetVariableStatus::Accepted,
                SetVariableStatus::UnknownVariable,
                SetVariableStatus::UnknownComponent,
            ]
        );
        assert_eq!(
            station.variable("OCPPCommCtrlr", "HeartbeatInterval").as_deref(),
            Some("120")
        );
    }

    #[tokio::test]
    async fn test_reset_on_idle_is_scheduled() {
        let station = StationResponder::new();
        let payload = Payload::json(json!({"type": "OnIdle"})).unwrap();

        let response: ResetResponse = station
            .handle(&request_from("csms", Action::Reset, payload))
            .await
            .unwrap()
            .parse()
            .unwrap();

        assert_eq!(response.status, ResetStatus::Scheduled);
        assert_eq!(station.pending_reset(), Some(ResetType::OnIdle));
    }

    #[tokio::test]
    async fn test_unhandled_action_is_not_implemented() {
        let station = StationResponder::new();
        let err = station
            .handle(&request_from("csms", Action::GetVariables, Payload::empty()))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotImplemented);
    }

    #[test]
    fn test_install_registers_role_actions() {
        let csms = OverlayNode::new(NodeConfig::new("csms", NodeRole::Csms));
        CsmsResponder::default().install(&csms);
        assert!(CSMS_ACTIONS.iter().all(|action| csms.has_handler(action)));
        assert!(!csms.has_handler(&Action::Reset));

        let station = OverlayNode::new(NodeConfig::new("cs1", NodeRole::ChargingStation));
        StationResponder::new().install(&station);
        assert!(STATION_ACTIONS.iter().all(|action| station.has_handler(action)));
        assert!(!station.has_handler(&Action::BootNotification));
    }
}
