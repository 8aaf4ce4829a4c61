use serde::{Deserialize, Serialize};
use smsrelay::{MessageRequest, Outcome, RequestId, RequestStatus};

/// A message request as the backend serializes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsRequestDto {
    pub id: RequestId,
    pub phone_number: String,
    pub message: String,
    pub status: RequestStatus,
}

impl From<SmsRequestDto> for MessageRequest {
    fn from(dto: SmsRequestDto) -> Self {
        MessageRequest {
            id: dto.id,
            phone_number: dto.phone_number,
            body: dto.message,
            status: dto.status,
        }
    }
}

/// Body of the status update PUT.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: Outcome,
}
