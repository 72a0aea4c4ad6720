//! Collaborators that action nodes call into.
//!
//! The CRM, the message channels and the random source live outside the
//! engine.  Nodes only see these narrow traits, so the binary wires in
//! Postgres/HTTP implementations and tests wire in the doubles from
//! [`crate::mock`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Failure of an external collaborator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// A deal to create from an automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDeal {
    pub title: String,
    pub contact_id: Option<Uuid>,
    pub pipeline_id: Option<Uuid>,
    pub stage_id: Option<Uuid>,
    pub value: Option<f64>,
}

/// CRM writes performed by action nodes.  Every call is tenant-scoped.
#[async_trait]
pub trait CrmServices: Send + Sync {
    /// Add `tag` to the contact.  Returns `false` when it was already there.
    async fn add_tag(&self, organization_id: Uuid, contact_id: Uuid, tag: &str) -> Result<bool, ServiceError>;

    /// Remove `tag` from the contact.  Returns `false` when it was absent.
    async fn remove_tag(&self, organization_id: Uuid, contact_id: Uuid, tag: &str) -> Result<bool, ServiceError>;

    /// Store an internal team notification and return its id.
    async fn create_notification(&self, organization_id: Uuid, title: &str, message: &str) -> Result<Uuid, ServiceError>;

    /// Create a deal and return its id.
    async fn create_deal(&self, organization_id: Uuid, deal: NewDeal) -> Result<Uuid, ServiceError>;

    /// Move a deal to another pipeline stage.
    async fn move_deal(&self, organization_id: Uuid, deal_id: Uuid, stage_id: Uuid) -> Result<(), ServiceError>;
}

/// Outbound messaging channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Whatsapp,
    Email,
    Sms,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whatsapp => write!(f, "whatsapp"),
            Self::Email    => write!(f, "email"),
            Self::Sms      => write!(f, "sms"),
        }
    }
}

/// A message handed to a [`ChannelSender`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub organization_id: Uuid,
    pub channel: Channel,
    pub to: String,
    pub subject: Option<String>,
    pub body: String,
}

/// What the provider returned for an accepted message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: Option<String>,
}

/// WhatsApp / Email / SMS transport.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, ServiceError>;
}

/// Sender used when no transport is wired for a channel; every send is a
/// recoverable failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredChannel;

#[async_trait]
impl ChannelSender for UnconfiguredChannel {
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, ServiceError> {
        Err(ServiceError::Unavailable(format!("no sender configured for {}", message.channel)))
    }
}

/// Source of uniform draws in `[0, 100)` for A/B splits.
pub trait RandomSource: Send + Sync {
    fn percent(&self) -> f64;
}

/// Thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn percent(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..100.0)
    }
}
