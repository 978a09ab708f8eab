//! Identities of the resources streams are opened against.

use std::{fmt, str::FromStr};

use crate::error::{WireError, WireResult};

/// `projects/<project>/locations/<location>/<collection>/<id>`
fn parse_path(path: &str, collection: &str) -> WireResult<(String, String, String)> {
    let parts = path.split('/').collect::<Vec<_>>();
    match parts.as_slice() {
        ["projects", project, "locations", location, c, id]
            if *c == collection && !project.is_empty() && !location.is_empty() && !id.is_empty() =>
        {
            Ok((project.to_string(), location.to_string(), id.to_string()))
        }
        _ => Err(WireError::InvalidResourcePath(path.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPath {
    pub project: String,
    pub location: String,
    pub topic: String,
}

impl fmt::Display for TopicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/locations/{}/topics/{}",
            self.project, self.location, self.topic
        )
    }
}

impl FromStr for TopicPath {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (project, location, topic) = parse_path(s, "topics")?;
        Ok(Self {
            project,
            location,
            topic,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionPath {
    pub project: String,
    pub location: String,
    pub subscription: String,
}

impl fmt::Display for SubscriptionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/locations/{}/subscriptions/{}",
            self.project, self.location, self.subscription
        )
    }
}

impl FromStr for SubscriptionPath {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (project, location, subscription) = parse_path(s, "subscriptions")?;
        Ok(Self {
            project,
            location,
            subscription,
        })
    }
}

/// A single partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartition {
    pub path: TopicPath,
    pub partition: i64,
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/partitions/{}", self.path, self.partition)
    }
}

/// A single partition of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionPartition {
    pub path: SubscriptionPath,
    pub partition: i64,
}

impl fmt::Display for SubscriptionPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/partitions/{}", self.path, self.partition)
    }
}

/// The location of a published message, returned to publishers once the
/// server has accepted it. Serializes as `"<partition>:<offset>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageMetadata {
    pub partition: i64,
    pub offset: i64,
}

impl fmt::Display for MessageMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition, self.offset)
    }
}

impl FromStr for MessageMetadata {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WireError::InvalidMetadata(s.to_string());
        let (partition, offset) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            partition: partition.parse().map_err(|_| invalid())?,
            offset: offset.parse().map_err(|_| invalid())?,
        })
    }
}
