// Payment oracle proxy (spec §1, §6). The real oracle is an external
// collaborator this node only calls out to; the marketplace `buy` handler
// depends on the trait object, not a concrete HTTP client, so tests can
// swap in a stub.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Success,
    Waiting,
    Error,
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub currency_type: u8,
    pub receipt: Vec<u8>,
    pub server_private_key: [u8; 32],
    pub price: u32,
    pub seller_address: String,
    pub tx_id: String,
}

#[async_trait]
pub trait PaymentOracle: Send + Sync {
    async fn check_payment(&self, request: PaymentRequest) -> PaymentOutcome;
}

/// Stand-in used when no live payment oracle is configured. Spec §1 lists
/// the oracle as an assumed-present external collaborator; this node
/// never embeds its HTTP client.
pub struct UnconfiguredPaymentOracle;

#[async_trait]
impl PaymentOracle for UnconfiguredPaymentOracle {
    async fn check_payment(&self, _request: PaymentRequest) -> PaymentOutcome {
        PaymentOutcome::Error
    }
}

/// Test-only stub that always confirms payment; lets handler tests drive
/// the `buy` flow without a real oracle.
#[cfg(test)]
pub struct AlwaysSucceedsPaymentOracle;

#[cfg(test)]
#[async_trait]
impl PaymentOracle for AlwaysSucceedsPaymentOracle {
    async fn check_payment(&self, _request: PaymentRequest) -> PaymentOutcome {
        PaymentOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_oracle_always_errors() {
        let oracle = UnconfiguredPaymentOracle;
        let outcome = oracle
            .check_payment(PaymentRequest {
                currency_type: 0,
                receipt: vec![],
                server_private_key: [0u8; 32],
                price: 0,
                seller_address: String::new(),
                tx_id: String::new(),
            })
            .await;
        assert_eq!(outcome, PaymentOutcome::Error);
    }
}
