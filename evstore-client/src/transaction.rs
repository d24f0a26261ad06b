//! Explicit multi-write transactions.

use crate::client::EventStoreClient;
use crate::error::ClientError;
use crate::operation::{OperationOutput, OperationRequest};
use crate::types::{EventData, ExpectedVersion, WriteResult};
use evstore_protocol::Credentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

/// A server-side transaction on one stream.
///
/// Writes are staged by the server and become visible on commit. Rolling
/// back only abandons the handle; the server discards the transaction once
/// it times out.
#[derive(Debug)]
pub struct Transaction {
    client: EventStoreClient,
    transaction_id: i64,
    stream: Option<String>,
    expected_version: Option<ExpectedVersion>,
    credentials: Option<Credentials>,
    state: TransactionState,
}

impl Transaction {
    pub(crate) fn new(
        client: EventStoreClient,
        transaction_id: i64,
        stream: Option<String>,
        expected_version: Option<ExpectedVersion>,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            client,
            transaction_id,
            stream,
            expected_version,
            credentials,
            state: TransactionState::Open,
        }
    }

    pub fn transaction_id(&self) -> i64 {
        self.transaction_id
    }

    /// Stages events in the transaction.
    pub async fn write(&self, events: Vec<EventData>) -> Result<(), ClientError> {
        self.ensure_open("write to")?;
        let request = OperationRequest::TransactionalWrite {
            transaction_id: self.transaction_id,
            events,
            require_master: self.client.settings().require_master,
        };
        match self.client.execute(request, self.credentials.clone()).await? {
            OperationOutput::TransactionWritten => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Commits the transaction.
    pub async fn commit(&mut self) -> Result<WriteResult, ClientError> {
        self.ensure_open("commit")?;
        let request = OperationRequest::CommitTransaction {
            transaction_id: self.transaction_id,
            stream: self.stream.clone(),
            expected_version: self.expected_version,
            require_master: self.client.settings().require_master,
        };
        let output = self.client.execute(request, self.credentials.clone()).await?;
        self.state = TransactionState::Committed;
        match output {
            OperationOutput::TransactionCommitted(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    /// Abandons the transaction without contacting the server.
    pub fn rollback(&mut self) -> Result<(), ClientError> {
        self.ensure_open("roll back")?;
        self.state = TransactionState::RolledBack;
        Ok(())
    }

    fn ensure_open(&self, action: &str) -> Result<(), ClientError> {
        match self.state {
            TransactionState::Open => Ok(()),
            TransactionState::Committed => Err(ClientError::InvalidRequest(format!(
                "cannot {} committed transaction {}",
                action, self.transaction_id
            ))),
            TransactionState::RolledBack => Err(ClientError::InvalidRequest(format!(
                "cannot {} rolled back transaction {}",
                action, self.transaction_id
            ))),
        }
    }
}

fn unexpected(output: OperationOutput) -> ClientError {
    ClientError::ProtocolViolation(format!("unexpected transaction result {:?}", output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use std::time::Duration;

    #[tokio::test]
    async fn test_rollback_closes_handle_locally() {
        let settings = Settings::new("127.0.0.1:1".parse().unwrap())
            .with_reconnection_delay(Duration::from_secs(60));
        let client = EventStoreClient::new(settings).unwrap();
        let mut transaction = client.continue_transaction(42, None);

        assert_eq!(transaction.transaction_id(), 42);
        transaction.rollback().unwrap();

        let err = transaction.write(vec![]).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
        assert!(err.to_string().contains("rolled back transaction 42"));
        assert!(transaction.rollback().is_err());
        assert!(matches!(
            transaction.commit().await,
            Err(ClientError::InvalidRequest(_))
        ));

        client.close().await;
    }
}
