use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::id::ResourceID;

/// Implemented by every resource-kind's `properties` payload.
pub trait Properties:
    Serialize + for<'de> Deserialize<'de> + Clone + Send + Sync + 'static
{
    /// The fully-qualified ARM type this payload is for, e.g.
    /// `Applications.Core/containers`.
    fn resource_type() -> &'static str;
}

/// Implemented by every resource-kind's `status` payload; always carries a
/// `provisioningState` alongside whatever else the resource tracks.
pub trait Status: Serialize + for<'de> Deserialize<'de> + Clone + Send + Sync + Default + 'static {
    fn provisioning_state(&self) -> ProvisioningState;
    fn set_provisioning_state(&mut self, state: ProvisioningState);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProvisioningState {
    Accepted,
    Provisioning,
    Updating,
    Deleting,
    Succeeded,
    Failed,
    Canceled,
}

impl ProvisioningState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProvisioningState::Succeeded | ProvisioningState::Failed | ProvisioningState::Canceled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrincipalType {
    User,
    Application,
    ManagedIdentity,
    Key,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemData {
    pub created_by: Option<String>,
    pub created_by_type: Option<PrincipalType>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_modified_by: Option<String>,
    pub last_modified_by_type: Option<PrincipalType>,
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl SystemData {
    /// Stamps the system data for a write, distinguishing create (no
    /// previous record) from update.
    pub fn stamp(previous: Option<&SystemData>, principal: &str, principal_type: PrincipalType) -> Self {
        let now = Utc::now();
        let mut data = previous.cloned().unwrap_or_default();
        if data.created_at.is_none() {
            data.created_by = Some(principal.to_owned());
            data.created_by_type = Some(principal_type);
            data.created_at = Some(now);
        }
        data.last_modified_by = Some(principal.to_owned());
        data.last_modified_by_type = Some(principal_type);
        data.last_modified_at = Some(now);
        data
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound = "P: Properties, S: Status")]
pub struct TrackedResource<P: Properties, S: Status> {
    #[serde(skip)]
    pub id: ResourceID,
    pub name: String,
    pub resource_type: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub system_data: SystemData,
    pub properties: P,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<S>,
}

impl<P: Properties, S: Status> TrackedResource<P, S> {
    pub fn new(id: ResourceID, properties: P) -> Self {
        TrackedResource {
            name: id.name().unwrap_or_default().to_owned(),
            resource_type: P::resource_type().to_owned(),
            location: "global".to_owned(),
            tags: BTreeMap::new(),
            system_data: SystemData::default(),
            properties,
            status: None,
            id,
        }
    }
}

/// An output resource a processor (C7) produced, keyed by the template's
/// `localID` so a later reconciliation can diff generations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputResource {
    pub local_id: String,
    pub id: String,
    pub radius_managed: bool,
}
