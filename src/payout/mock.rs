//! Scripted payout provider for tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::provider::{PayoutInstruction, PayoutProvider, ProviderError, ProviderReceipt};

/// One scripted provider answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    Accept(String),
    Reject(String),
    Unreachable,
    ServerError,
    /// Never answers.
    Hang,
}

/// Answers from a script, then accepts everything.
#[derive(Default)]
pub struct MockPayoutProvider {
    script: Mutex<VecDeque<MockResponse>>,
    sent: Mutex<Vec<PayoutInstruction>>,
}

impl MockPayoutProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(responses: impl IntoIterator<Item = MockResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().collect()),
            sent: Mutex::default(),
        }
    }

    pub async fn push(&self, response: MockResponse) {
        self.script.lock().await.push_back(response);
    }

    /// Instructions received, in order.
    pub async fn sent(&self) -> Vec<PayoutInstruction> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl PayoutProvider for MockPayoutProvider {
    async fn send(&self, instruction: &PayoutInstruction) -> Result<ProviderReceipt, ProviderError> {
        self.sent.lock().await.push(instruction.clone());
        let response = self.script.lock().await.pop_front();

        match response {
            None => Ok(ProviderReceipt {
                reference: format!("mock-{}", instruction.payout_id),
            }),
            Some(MockResponse::Accept(reference)) => Ok(ProviderReceipt { reference }),
            Some(MockResponse::Reject(reason)) => Err(ProviderError::Rejected(reason)),
            Some(MockResponse::Unreachable) => {
                Err(ProviderError::Unreachable("connection refused".to_string()))
            }
            Some(MockResponse::ServerError) => {
                Err(ProviderError::ServerError("HTTP 502 Bad Gateway".to_string()))
            }
            Some(MockResponse::Hang) => {
                futures::future::pending::<()>().await;
                Err(ProviderError::Timeout)
            }
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
