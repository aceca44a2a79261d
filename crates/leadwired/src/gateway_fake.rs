//! In-process fake `TelephonyGateway`, used by integration tests (spec.md
//! §4.3: "the rest of the system is testable with an in-process fake").
use crate::gateway::{GatewayError, LineType, NumberLookup, TelephonyGateway};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

pub struct FakeGateway {
    pub sent: Mutex<Vec<(String, String)>>,
    pub lookups: Mutex<HashMap<String, NumberLookup>>,
    pub next_id: Mutex<u64>,
    pub fail_next: Mutex<Option<GatewayError>>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            lookups: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
            fail_next: Mutex::new(None),
        }
    }
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_line_type(&self, number: &str, line_type: LineType) {
        self.lookups.lock().insert(
            number.to_string(),
            NumberLookup {
                line_type,
                caller_name: None,
            },
        );
    }

    pub fn fail_next_send(&self, err: GatewayError) {
        *self.fail_next.lock() = Some(err);
    }

    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl TelephonyGateway for FakeGateway {
    fn verify_signature(&self, _url: &str, _body_params: &[(&str, &str)], _signature: &str) -> bool {
        true
    }

    async fn send(&self, to: &str, body: &str) -> Result<String, GatewayError> {
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        self.sent.lock().push((to.to_string(), body.to_string()));
        let mut next_id = self.next_id.lock();
        *next_id += 1;
        Ok(format!("FAKE{:08}", *next_id))
    }

    async fn lookup(&self, number: &str) -> Result<NumberLookup, GatewayError> {
        Ok(self
            .lookups
            .lock()
            .get(number)
            .cloned()
            .unwrap_or(NumberLookup {
                line_type: LineType::Unknown,
                caller_name: None,
            }))
    }
}
