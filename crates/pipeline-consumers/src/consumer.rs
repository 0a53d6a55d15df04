//! The per-tick contract shared by both pipeline stages.

use std::sync::Arc;

use async_trait::async_trait;
use pipeline_storage::{MessageQueue, ReceivedMessage};
use tracing::{error, info, warn};

use crate::error::ConsumerError;
use crate::retry::Disposition;

/// Result of one polling tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No visible message
    Idle,
    /// One message was received and settled
    Handled {
        message_id: String,
        disposition: Disposition,
    },
}

/// A stage that handles at most one message per tick.
#[async_trait]
pub trait Consumer: Send + Sync {
    fn name(&self) -> &str;

    /// Queue the stage polls.
    fn queue_name(&self) -> &str;

    /// Receive and settle at most one message.
    ///
    /// Errors are reserved for failures outside any message (e.g. the
    /// queue cannot be read) or while settling one.
    async fn tick(&self) -> Result<TickOutcome, ConsumerError>;
}

/// Apply a disposition to a received message.
///
/// Complete and discard acknowledge the message; a discard is first copied
/// to the dead-letter queue when one is configured. Retry leaves the message
/// for redelivery when its lease expires.
pub(crate) async fn settle(
    stage: &str,
    queue: &dyn MessageQueue,
    dead_letter: Option<&Arc<dyn MessageQueue>>,
    message: &ReceivedMessage,
    disposition: &Disposition,
) -> Result<(), ConsumerError> {
    match disposition {
        Disposition::Complete => {
            info!(stage, message_id = %message.message_id, "Message processed");
        }
        Disposition::Discard { reason } => {
            error!(
                stage,
                message_id = %message.message_id,
                delivery_count = message.delivery_count,
                reason = %reason,
                "Discarding message"
            );
            if let Some(dead_letter) = dead_letter {
                dead_letter.send(&message.text).await?;
            }
        }
        Disposition::Retry { reason } => {
            warn!(
                stage,
                message_id = %message.message_id,
                delivery_count = message.delivery_count,
                reason = %reason,
                "Leaving message for redelivery"
            );
            return Ok(());
        }
    }

    queue.delete(&message.message_id, &message.receipt).await?;
    Ok(())
}
