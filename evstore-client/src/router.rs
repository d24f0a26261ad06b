//! Inbound package routing.

use crate::operation_engine::OperationEngine;
use crate::subscription_engine::SubscriptionEngine;
use evstore_protocol::Package;
use uuid::Uuid;

/// Destination of an inbound package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Heartbeat,
    Authentication,
    Operation,
    Subscription,
    /// No owner; the package is discarded.
    Unmatched,
}

/// Picks the owner of an inbound package. Heartbeats are matched on their
/// command, everything else on its correlation id.
pub fn route(
    package: &Package,
    pending_authentication: Option<Uuid>,
    operations: &OperationEngine,
    subscriptions: &SubscriptionEngine,
) -> Route {
    if package.command.is_heartbeat() {
        Route::Heartbeat
    } else if package.command.is_authentication_result()
        && pending_authentication == Some(package.correlation_id)
    {
        Route::Authentication
    } else if operations.contains(&package.correlation_id) {
        Route::Operation
    } else if subscriptions.contains(&package.correlation_id) {
        Route::Subscription
    } else {
        Route::Unmatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionId;
    use crate::operation::OperationRequest;
    use crate::operation_engine::{OperationEngineConfig, OperationItem};
    use crate::settings::SubscriptionRecovery;
    use crate::subscription::{ChannelListener, SubscriptionTarget};
    use crate::subscription_engine::SubscriptionItem;
    use crate::types::ExpectedVersion;
    use evstore_protocol::Command;
    use std::time::{Duration, Instant};

    fn engines() -> (OperationEngine, SubscriptionEngine) {
        let operations = OperationEngine::new(OperationEngineConfig {
            max_retries: 10,
            timeout: Duration::from_secs(7),
            fail_on_no_server_response: false,
            rotate_correlation_on_retry: true,
        });
        (operations, SubscriptionEngine::new(SubscriptionRecovery::Drop, 10))
    }

    #[test]
    fn test_heartbeat_routes_by_command() {
        let (ops, subs) = engines();
        let package = Package::new(Command::HeartbeatRequest, Uuid::new_v4());
        assert_eq!(route(&package, None, &ops, &subs), Route::Heartbeat);
    }

    #[test]
    fn test_authentication_result_needs_pending_id() {
        let (ops, subs) = engines();
        let id = Uuid::new_v4();
        let package = Package::new(Command::Authenticated, id);
        assert_eq!(route(&package, Some(id), &ops, &subs), Route::Authentication);
        assert_eq!(route(&package, None, &ops, &subs), Route::Unmatched);
        assert_eq!(
            route(&package, Some(Uuid::new_v4()), &ops, &subs),
            Route::Unmatched
        );
    }

    #[test]
    fn test_operation_and_subscription_lookup() {
        let (mut ops, mut subs) = engines();
        let conn = ConnectionId::new(1);

        let (op, _rx) = OperationItem::new(
            OperationRequest::DeleteStream {
                stream: "s".to_string(),
                expected_version: ExpectedVersion::Any,
                hard_delete: false,
                require_master: true,
            },
            None,
        );
        let op_id = ops.schedule(op, conn, Instant::now()).unwrap().correlation_id;

        let (listener, _events) = ChannelListener::new();
        let (sub, _confirmed) =
            SubscriptionItem::new(SubscriptionTarget::All, false, Box::new(listener), None);
        let sub_id = subs.schedule(sub, conn).unwrap().correlation_id;

        let to_op = Package::new(Command::DeleteStreamCompleted, op_id);
        let to_sub = Package::new(Command::StreamEventAppeared, sub_id);
        let stray = Package::new(Command::BadRequest, Uuid::new_v4());

        assert_eq!(route(&to_op, None, &ops, &subs), Route::Operation);
        assert_eq!(route(&to_sub, None, &ops, &subs), Route::Subscription);
        assert_eq!(route(&stray, None, &ops, &subs), Route::Unmatched);
    }
}
