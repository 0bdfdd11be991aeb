//! Typed send operations
//!
//! One method per OCPP action. Each builds the action's request payload,
//! originates it through the overlay towards `destination` and parses the
//! answer into the action's response type. Error envelopes come back as
//! `OverlayError::Rejected`.

use async_trait::async_trait;
use chrono::Utc;
use overlay_core::{Action, Destination, OverlayError, OverlayNode, Payload};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::types::*;

#[async_trait]
pub trait OcppRequests {
    async fn send_boot_notification(
        &self,
        destination: Destination,
        station: ChargingStationInfo,
        reason: BootReason,
    ) -> Result<BootNotificationResponse, OverlayError>;

    async fn authorize(
        &self,
        destination: Destination,
        id_token: IdToken,
    ) -> Result<AuthorizeResponse, OverlayError>;

    async fn transfer_data(
        &self,
        destination: Destination,
        request: DataTransferRequest,
    ) -> Result<DataTransferResponse, OverlayError>;

    async fn transfer_binary_data(
        &self,
        destination: Destination,
        request: BinaryDataTransferRequest,
    ) -> Result<BinaryDataTransferResponse, OverlayError>;

    async fn send_meter_values(
        &self,
        destination: Destination,
        evse_id: i32,
        meter_value: Vec<MeterValue>,
    ) -> Result<MeterValuesResponse, OverlayError>;

    async fn send_heartbeat(&self, destination: Destination) -> Result<HeartbeatResponse, OverlayError>;

    async fn send_status_notification(
        &self,
        destination: Destination,
        evse_id: i32,
        connector_id: i32,
        status: ConnectorStatus,
    ) -> Result<StatusNotificationResponse, OverlayError>;

    async fn reset(
        &self,
        destination: Destination,
        reset_type: ResetType,
        evse_id: Option<i32>,
    ) -> Result<ResetResponse, OverlayError>;

    async fn set_variables(
        &self,
        destination: Destination,
        data: Vec<SetVariableData>,
    ) -> Result<SetVariablesResponse, OverlayError>;
}

#[async_trait]
impl OcppRequests for OverlayNode {
    async fn send_boot_notification(
        &self,
        destination: Destination,
        station: ChargingStationInfo,
        reason: BootReason,
    ) -> Result<BootNotificationResponse, OverlayError> {
        let request = BootNotificationRequest {
            charging_station: station,
            reason,
        };
        call(self, destination, Action::BootNotification, &request).await
    }

    async fn authorize(
        &self,
        destination: Destination,
        id_token: IdToken,
    ) -> Result<AuthorizeResponse, OverlayError> {
        call(self, destination, Action::Authorize, &AuthorizeRequest { id_token }).await
    }

    async fn transfer_data(
        &self,
        destination: Destination,
        request: DataTransferRequest,
    ) -> Result<DataTransferResponse, OverlayError> {
        call(self, destination, Action::DataTransfer, &request).await
    }

    async fn transfer_binary_data(
        &self,
        destination: Destination,
        request: BinaryDataTransferRequest,
    ) -> Result<BinaryDataTransferResponse, OverlayError> {
        let response = self
            .request(destination, Action::BinaryDataTransfer, request.to_payload()?)
            .await?;
        BinaryDataTransferResponse::from_payload(&response.payload)
    }

    async fn send_meter_values(
        &self,
        destination: Destination,
        evse_id: i32,
        meter_value: Vec<MeterValue>,
    ) -> Result<MeterValuesResponse, OverlayError> {
        let request = MeterValuesRequest {
            evse_id,
            meter_value,
        };
        call(self, destination, Action::MeterValues, &request).await
    }

    async fn send_heartbeat(&self, destination: Destination) -> Result<HeartbeatResponse, OverlayError> {
        call(self, destination, Action::Heartbeat, &HeartbeatRequest {}).await
    }

    async fn send_status_notification(
        &self,
        destination: Destination,
        evse_id: i32,
        connector_id: i32,
        status: ConnectorStatus,
    ) -> Result<StatusNotificationResponse, OverlayError> {
        let request = StatusNotificationRequest {
            timestamp: Utc::now(),
            connector_status: status,
            evse_id,
            connector_id,
        };
        call(self, destination, Action::StatusNotification, &request).await
    }

    async fn reset(
        &self,
        destination: Destination,
        reset_type: ResetType,
        evse_id: Option<i32>,
    ) -> Result<ResetResponse, OverlayError> {
        let request = ResetRequest {
            reset_type,
            evse_id,
        };
        call(self, destination, Action::Reset, &request).await
    }

    async fn set_variables(
        &self,
        destination: Destination,
        data: Vec<SetVariableData>,
    ) -> Result<SetVariablesResponse, OverlayError> {
        let request = SetVariablesRequest {
            set_variable_data: data,
        };
        call(self, destination, Action::SetVariables, &request).await
    }
}

async fn call<Req, Resp>(
    node: &OverlayNode,
    destination: Destination,
    action: Action,
    request: &Req,
) -> Result<Resp, OverlayError>
where
    Req: Serialize + Sync,
    Resp: DeserializeOwned,
{
    debug!("{}: {} -> {}", node.id(), action, destination);
    let response = node.request(destination, action, Payload::json(request)?).await?;
    response.parse_payload()
}
