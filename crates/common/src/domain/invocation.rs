use serde_json::json;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// A named remote invocation (direct method) received from the cloud
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub name: String,
    pub payload: Vec<u8>,
}

impl InvocationRequest {
    pub fn new(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }
}

/// Acknowledgement returned to the invoker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResponse {
    pub status_code: u16,
    pub payload: Vec<u8>,
}

impl InvocationResponse {
    /// Success acknowledgement: `{"result":"Executed direct method: <name>"}`
    pub fn executed(name: &str) -> Self {
        let body = json!({ "result": format!("Executed direct method: {}", name) });
        Self {
            status_code: STATUS_OK,
            payload: body.to_string().into_bytes(),
        }
    }

    /// Failure acknowledgement: `{"error":"<message>"}`
    pub fn error(status_code: u16, message: impl Into<String>) -> Self {
        let body = json!({ "error": message.into() });
        Self {
            status_code,
            payload: body.to_string().into_bytes(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK
    }

    pub fn body_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executed_response_body() {
        let response = InvocationResponse::executed("SetFruit");

        assert!(response.is_success());
        assert_eq!(
            response.payload,
            br#"{"result":"Executed direct method: SetFruit"}"#.to_vec()
        );
    }

    #[test]
    fn test_error_response_body() {
        let response = InvocationResponse::error(STATUS_BAD_REQUEST, "bad envelope");

        assert!(!response.is_success());
        assert_eq!(response.status_code, 400);
        assert_eq!(
            response.body_json(),
            Some(json!({ "error": "bad envelope" }))
        );
    }
}
